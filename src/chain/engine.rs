use tracing::{debug, info};
use crate::chain::walk::{self, Rewrite, SearchResults};
use crate::core::config::Config;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::stats::StoreStats;
use crate::core::types::{bucket_of, Address, Record};
use crate::storage::file_lock::FileLock;
use crate::storage::hash_index::HashIndex;
use crate::storage::layout::StorageLayout;
use crate::storage::record_store::RecordStore;

/// Single-owner chain engine over one store/index pair.
///
/// Every call goes straight to disk; there is no cache. Use
/// [`Database`](crate::core::database::Database) for shared multi-threaded access.
pub struct ChainEngine {
    pub layout: StorageLayout,
    store: RecordStore,
    index: HashIndex,
    table_size: u32,
    read_only: bool,
    _lock: Option<FileLock>,
}

impl ChainEngine {
    /// Open the store and index, creating either if absent.
    pub fn open(config: &Config) -> Result<Self> {
        Self::open_with(config, true)
    }

    /// Open an existing store and index; missing files are an
    /// `InitializationFailure`.
    pub fn open_existing(config: &Config) -> Result<Self> {
        Self::open_with(config, false)
    }

    /// Open an existing store and index for searches and stats only. Takes
    /// the shared lock, so any number of readers can run side by side while
    /// no writer holds the data dir.
    pub fn open_read_only(config: &Config) -> Result<Self> {
        let layout = Self::existing_layout(config)?;
        let lock = FileLock::acquire_shared_if(&layout, config.use_file_lock)?;

        let index = HashIndex::open_read_only(&layout.index_path, config.table_size)
            .map_err(|e| Error::init(format!("index {:?}: {}", layout.index_path, e)))?;
        let store = RecordStore::open_read_only(&layout.store_path)
            .map_err(|e| Error::init(format!("store {:?}: {}", layout.store_path, e)))?;

        Ok(Self::assemble(config, layout, store, index, true, lock))
    }

    fn open_with(config: &Config, create: bool) -> Result<Self> {
        let layout = if create {
            config.validate()?;
            StorageLayout::new(config)
                .map_err(|e| Error::init(format!("data dir {:?}: {}", config.data_dir, e)))?
        } else {
            Self::existing_layout(config)?
        };

        let lock = FileLock::acquire_if(&layout, config.use_file_lock)?;

        let index = HashIndex::open(&layout.index_path, config.table_size)
            .map_err(|e| Error::init(format!("index {:?}: {}", layout.index_path, e)))?;
        let store = RecordStore::open(&layout.store_path)
            .map_err(|e| Error::init(format!("store {:?}: {}", layout.store_path, e)))?;

        Ok(Self::assemble(config, layout, store, index, false, lock))
    }

    fn existing_layout(config: &Config) -> Result<StorageLayout> {
        config.validate()?;
        let layout = StorageLayout::new(config)
            .map_err(|e| Error::init(format!("data dir {:?}: {}", config.data_dir, e)))?;

        for path in [&layout.store_path, &layout.index_path] {
            if !path.exists() {
                return Err(Error::init(format!("cannot open {:?}", path)));
            }
        }
        Ok(layout)
    }

    fn assemble(
        config: &Config,
        layout: StorageLayout,
        store: RecordStore,
        index: HashIndex,
        read_only: bool,
        lock: Option<FileLock>,
    ) -> Self {
        info!(
            store = %layout.store_path.display(),
            index = %layout.index_path.display(),
            table_size = config.table_size,
            records = store.record_count(),
            read_only,
            "chain engine opened"
        );

        ChainEngine {
            layout,
            store,
            index,
            table_size: config.table_size,
            read_only,
            _lock: lock,
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn writable(&self) -> Result<()> {
        if self.read_only {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!("store at {:?} was opened read-only", self.layout.base_dir),
            ));
        }
        Ok(())
    }

    pub fn table_size(&self) -> u32 {
        self.table_size
    }

    pub fn bucket(&self, id: i32) -> usize {
        bucket_of(id, self.table_size)
    }

    /// Prepend `record` to its bucket chain. O(1): one append, one head write.
    pub fn insert(&mut self, record: Record) -> Result<Address> {
        self.writable()?;
        let bucket = self.bucket(record.id);
        let head = self.index.get_head(bucket)?;
        let at = walk::insert(&mut self.store, head, record)?;
        self.index.set_head(bucket, Some(at))?;
        Ok(at)
    }

    /// All records for `id`, most recent first.
    pub fn search(&mut self, id: i32) -> Result<SearchResults> {
        let bucket = self.bucket(id);
        let head = self.index.get_head(bucket)?;
        walk::search(&mut self.store, bucket, head, id)
    }

    /// Logically delete every record for `id`. Returns how many were unlinked.
    pub fn delete_all(&mut self, id: i32) -> Result<usize> {
        self.writable()?;
        let bucket = self.bucket(id);
        let head = self.index.get_head(bucket)?;
        let rewrite = walk::delete_all(&mut self.store, bucket, head, id)?;
        self.publish(bucket, rewrite)?;
        Ok(rewrite.removed)
    }

    /// Logically delete the `occurrence`-th record (0-based, most recent first) for `id`.
    pub fn delete_one(&mut self, id: i32, occurrence: usize) -> Result<()> {
        self.writable()?;
        let bucket = self.bucket(id);
        let head = self.index.get_head(bucket)?;
        let rewrite = walk::delete_one(&mut self.store, bucket, head, id, occurrence)?;
        self.publish(bucket, rewrite)
    }

    fn publish(&mut self, bucket: usize, rewrite: Rewrite) -> Result<()> {
        debug!(bucket, removed = rewrite.removed, retained = rewrite.retained, "chain rewritten");
        self.index.set_head(bucket, rewrite.new_head)
    }

    pub fn stats(&mut self) -> Result<StoreStats> {
        let heads = self.index.load_all()?;
        StoreStats::collect(&mut self.store, heads.into_iter().enumerate())
    }

    pub fn record_count(&self) -> u64 {
        self.store.record_count()
    }

    pub fn sync(&mut self) -> Result<()> {
        if self.read_only {
            return Ok(());
        }
        self.store.sync()?;
        self.index.sync()
    }
}
