use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::Path;
use crc32fast::Hasher;
use serde::Serialize;
use tracing::{info, warn};
use crate::chain::walk;
use crate::core::config::Config;
use crate::core::error::{Error, Result};
use crate::core::types::{Address, RECORD_SIZE};
use crate::storage::file_lock::FileLock;
use crate::storage::hash_index::HashIndex;
use crate::storage::layout::StorageLayout;
use crate::storage::record_store::RecordStore;

const PROGRESS_EVERY: usize = 8192;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompactionReport {
    pub buckets: u32,
    pub non_empty_buckets: u64,
    pub records_kept: u64,
    pub records_reclaimed: u64,
    pub bytes_before: u64,
    pub bytes_after: u64,
    pub broken_chains: u64,
    /// CRC32 of the rewritten store
    pub store_checksum: u32,
}

/// Offline rewrite of the store/index pair that drops every record not
/// reachable from a bucket head.
///
/// Chains keep their order: each one is written oldest first so the newest
/// record ends up as the head again. Not crash-atomic: the originals are
/// removed before the new files are renamed into place. Must not run while
/// anything else has the store open; the file lock enforces that when enabled.
pub struct Compactor {
    layout: StorageLayout,
    table_size: u32,
    use_file_lock: bool,
}

impl Compactor {
    pub fn new(config: &Config) -> Result<Self> {
        config.validate()?;
        Ok(Compactor {
            layout: StorageLayout::new(config)?,
            table_size: config.table_size,
            use_file_lock: config.use_file_lock,
        })
    }

    pub fn run(&self) -> Result<CompactionReport> {
        let layout = &self.layout;
        for path in [&layout.store_path, &layout.index_path] {
            if !path.exists() {
                return Err(Error::init(format!("cannot open source file {:?}", path)));
            }
        }

        let _lock = FileLock::acquire_if(layout, self.use_file_lock)?;

        let mut source = RecordStore::open(&layout.store_path)
            .map_err(|e| Error::init(format!("store {:?}: {}", layout.store_path, e)))?;
        let heads = HashIndex::open(&layout.index_path, self.table_size)
            .and_then(|mut index| index.load_all())
            .map_err(|e| Error::init(format!("index {:?}: {}", layout.index_path, e)))?;

        let mut target = RecordStore::create(&layout.compact_store_path())?;
        let mut new_heads: Vec<Option<Address>> = vec![None; self.table_size as usize];
        let mut report = CompactionReport {
            buckets: self.table_size,
            non_empty_buckets: 0,
            records_kept: 0,
            records_reclaimed: 0,
            bytes_before: source.len(),
            bytes_after: 0,
            broken_chains: 0,
            store_checksum: 0,
        };

        info!(buckets = self.table_size, bytes = source.len(), "compaction started");

        for (bucket, head) in heads.into_iter().enumerate() {
            if bucket % PROGRESS_EVERY == 0 {
                info!(bucket, of = self.table_size, "compacting");
            }
            if head.is_none() {
                continue;
            }

            let chain = walk::walk(&mut source, bucket, head)?;
            if chain.broken.is_some() {
                // keep the readable prefix; the rest was already unreachable
                report.broken_chains += 1;
            }

            let records: Vec<_> = chain.nodes.into_iter().map(|(_, record)| record).collect();
            if records.is_empty() {
                continue;
            }
            report.non_empty_buckets += 1;
            report.records_kept += records.len() as u64;
            new_heads[bucket] = walk::relink(&mut target, records)?;
        }

        let mut new_index = HashIndex::create(&layout.compact_index_path(), self.table_size)?;
        new_index.store_all(&new_heads)?;
        new_index.sync()?;
        target.sync()?;

        report.bytes_after = target.len();
        report.records_reclaimed = source.record_count().saturating_sub(report.records_kept);
        report.store_checksum = checksum(&layout.compact_store_path())?;

        drop(source);
        drop(target);
        drop(new_index);

        fs::remove_file(&layout.index_path)?;
        fs::remove_file(&layout.store_path)?;
        fs::rename(layout.compact_index_path(), &layout.index_path)?;
        fs::rename(layout.compact_store_path(), &layout.store_path)?;

        if report.broken_chains > 0 {
            warn!(broken = report.broken_chains, "compaction dropped unreadable chain tails");
        }
        info!(
            kept = report.records_kept,
            reclaimed = report.records_reclaimed,
            bytes_after = report.bytes_after,
            "compaction finished"
        );
        Ok(report)
    }
}

fn checksum(path: &Path) -> Result<u32> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Hasher::new();
    let mut buf = vec![0u8; RECORD_SIZE * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize())
}
