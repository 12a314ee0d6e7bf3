use std::fs::{self, File};
use std::io::BufReader;
use std::path::PathBuf;
use tracing::{debug, info};
use crate::core::error::Result;
use crate::core::types::RECORD_SIZE;
use crate::storage::record_store::RecordStore;

/// Concatenates worker shards onto the end of the store, in the order given.
pub struct ShardMerger {
    shards: Vec<PathBuf>,
}

impl ShardMerger {
    /// `shards` must already be in worker-rank order.
    pub fn new(shards: Vec<PathBuf>) -> Self {
        ShardMerger { shards }
    }

    /// Append every shard, deleting each once it is consumed. Returns the
    /// number of records appended.
    pub fn merge_into(self, store: &mut RecordStore) -> Result<u64> {
        let mut total = 0u64;

        for shard in self.shards {
            let file = File::open(&shard)?;
            let mut reader = BufReader::with_capacity(RECORD_SIZE * 4096, file);
            let appended = store.append_encoded(&mut reader)?;
            drop(reader);

            debug!(shard = %shard.display(), records = appended, "shard merged");
            fs::remove_file(&shard)?;
            total += appended;
        }

        store.flush()?;
        info!(records = total, store_records = store.record_count(), "shards merged");
        Ok(total)
    }
}
