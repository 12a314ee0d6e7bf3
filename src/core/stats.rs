use serde::{Serialize, Deserialize};
use crate::chain::walk::{self, RecordSource};
use crate::core::error::Result;
use crate::core::types::Address;

/// Space accounting for one store/index pair
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub store_bytes: u64,
    pub total_records: u64,
    pub live_records: u64,
    // Logically deleted records still taking space until compaction
    pub garbage_records: u64,
    pub non_empty_buckets: u64,
    pub longest_chain: u64,
    pub broken_chains: u64,
}

impl StoreStats {
    /// Walk every chain reachable from `heads` and compare against store size.
    pub fn collect<S, I>(src: &mut S, heads: I) -> Result<Self>
    where
        S: RecordSource,
        I: IntoIterator<Item = (usize, Option<Address>)>,
    {
        let store_bytes = src.store_len()?;
        let total_records = store_bytes / crate::core::types::RECORD_SIZE as u64;
        let mut stats = StoreStats { store_bytes, total_records, ..Default::default() };

        for (bucket, head) in heads {
            if head.is_none() {
                continue;
            }
            let chain = walk::walk(src, bucket, head)?;
            let len = chain.nodes.len() as u64;

            stats.non_empty_buckets += 1;
            stats.live_records += len;
            stats.longest_chain = stats.longest_chain.max(len);
            if chain.broken.is_some() {
                stats.broken_chains += 1;
            }
        }

        stats.garbage_records = stats.total_records.saturating_sub(stats.live_records);
        Ok(stats)
    }

    /// Fraction of the store that compaction would reclaim.
    pub fn garbage_ratio(&self) -> f64 {
        if self.total_records == 0 {
            return 0.0;
        }
        self.garbage_records as f64 / self.total_records as f64
    }
}
