use tracing::info;
use crate::core::config::Config;
use crate::core::error::{Error, Result};
use crate::core::types::{bucket_of, Address};
use crate::storage::file_lock::FileLock;
use crate::storage::hash_index::HashIndex;
use crate::storage::layout::StorageLayout;
use crate::storage::record_store::RecordStore;

/// Relink the store under `config` and rewrite its index in place.
///
/// The store must already exist. A missing index is created; an existing one
/// keeps its old table until the relink pass has finished.
pub fn reindex(config: &Config) -> Result<u64> {
    config.validate()?;
    let layout = StorageLayout::new(config)
        .map_err(|e| Error::init(format!("data dir {:?}: {}", config.data_dir, e)))?;
    if !layout.store_path.exists() {
        return Err(Error::init(format!("cannot open {:?}", layout.store_path)));
    }

    let _lock = FileLock::acquire_if(&layout, config.use_file_lock)?;
    let mut index = HashIndex::open(&layout.index_path, config.table_size)
        .map_err(|e| Error::init(format!("index {:?}: {}", layout.index_path, e)))?;
    let mut store = RecordStore::open(&layout.store_path)
        .map_err(|e| Error::init(format!("store {:?}: {}", layout.store_path, e)))?;

    let linked = rebuild_index(&mut store, &mut index)?;
    store.sync()?;
    info!(linked, store = %layout.store_path.display(), "store reindexed");
    Ok(linked)
}

/// Relink every record in `store` from offset 0, in file order, and write a
/// fresh table into `index`.
///
/// Each record's successor becomes the current head of its bucket and the
/// record becomes the new head, which is exactly what inserting every record
/// in store order would produce. Records that were logically deleted become
/// reachable again, so compact before reindexing a store that has seen deletes.
///
/// Every record is decoded once before the first one is rewritten, so an
/// undecodable record fails the call with store and index untouched.
///
/// Returns the number of records linked.
pub fn rebuild_index(store: &mut RecordStore, index: &mut HashIndex) -> Result<u64> {
    let table_size = index.table_size();
    let mut heads: Vec<Option<Address>> = vec![None; table_size as usize];
    let total = store.record_count();

    for entry in store.scan()? {
        entry?;
    }

    // The scan reads through its own handle; each record is rewritten only
    // after it has been read.
    for (n, entry) in store.scan()?.enumerate() {
        let (at, mut record) = entry?;
        let bucket = bucket_of(record.id, table_size);

        record.next = heads[bucket];
        store.write_at(at, &record)?;
        heads[bucket] = Some(at);

        if n > 0 && n % 1_000_000 == 0 {
            info!(linked = n, total, "rebuilding index");
        }
    }

    store.flush()?;
    index.store_all(&heads)?;
    index.sync()?;
    Ok(total)
}
