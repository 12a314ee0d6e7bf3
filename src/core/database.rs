use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};
use crate::chain::walk::{self, RecordSink, RecordSource, Rewrite, SearchResults};
use crate::core::config::Config;
use crate::core::error::{Error, Result};
use crate::core::stats::StoreStats;
use crate::core::types::{bucket_of, Address, Record};
use crate::storage::file_lock::FileLock;
use crate::storage::hash_index::HashIndex;
use crate::storage::layout::StorageLayout;
use crate::storage::record_store::RecordStore;

/// Shared handle for multi-threaded use of one store/index pair.
///
/// Bucket heads are mirrored in memory and split into `lock_stripes`
/// readers-writer stripes; bucket `b` lives in stripe `b & (stripes - 1)`.
/// Head reads take the stripe shared. Insert and delete hold their stripe
/// exclusively for the whole operation (append, update mirror, persist head),
/// so mutations of one bucket are totally ordered. With a single stripe every
/// mutation is globally serialized.
///
/// The store file is behind its own mutex so each seek+read or seek+write pair
/// is atomic. A reader that fetched a head walks the chain taking only the
/// store mutex per node; this is sound because the store is append-only and
/// never rewrites bytes a chain can reach.
pub struct Database {
    config: Config,
    layout: StorageLayout,

    stripes: Vec<RwLock<Vec<Option<Address>>>>,
    stripe_shift: u32,

    store: Mutex<RecordStore>,
    index_file: Mutex<HashIndex>,
    _lock: Option<FileLock>,
}

/// Store access that takes the store mutex once per call.
struct SharedStore<'a>(&'a Mutex<RecordStore>);

impl RecordSource for SharedStore<'_> {
    fn read_record(&mut self, at: Address) -> Result<Record> {
        self.0.lock().read(at)
    }

    fn store_len(&mut self) -> Result<u64> {
        Ok(self.0.lock().len())
    }
}

impl RecordSink for SharedStore<'_> {
    fn append_record(&mut self, record: &Record) -> Result<Address> {
        self.0.lock().append(record)
    }
}

impl Database {
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let layout = StorageLayout::new(&config)
            .map_err(|e| Error::init(format!("data dir {:?}: {}", config.data_dir, e)))?;

        let lock = FileLock::acquire_if(&layout, config.use_file_lock)?;

        let mut index = HashIndex::open(&layout.index_path, config.table_size)
            .map_err(|e| Error::init(format!("index {:?}: {}", layout.index_path, e)))?;
        let store = RecordStore::open(&layout.store_path)
            .map_err(|e| Error::init(format!("store {:?}: {}", layout.store_path, e)))?;

        // Load the whole table once; it is the source of truth for heads from here on
        let heads = index
            .load_all()
            .map_err(|e| Error::init(format!("index {:?}: {}", layout.index_path, e)))?;

        let stripe_count = config.lock_stripes as usize;
        let stripe_shift = config.lock_stripes.trailing_zeros();
        let per_stripe = config.table_size as usize / stripe_count;
        let mut stripes: Vec<Vec<Option<Address>>> =
            (0..stripe_count).map(|_| Vec::with_capacity(per_stripe)).collect();
        for (bucket, head) in heads.into_iter().enumerate() {
            stripes[bucket & (stripe_count - 1)].push(head);
        }

        info!(
            store = %layout.store_path.display(),
            index = %layout.index_path.display(),
            table_size = config.table_size,
            lock_stripes = stripe_count,
            records = store.record_count(),
            "database opened"
        );

        Ok(Database {
            config,
            layout,
            stripes: stripes.into_iter().map(RwLock::new).collect(),
            stripe_shift,
            store: Mutex::new(store),
            index_file: Mutex::new(index),
            _lock: lock,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    pub fn bucket(&self, id: i32) -> usize {
        bucket_of(id, self.config.table_size)
    }

    // (stripe, slot within stripe)
    fn slot(&self, bucket: usize) -> (usize, usize) {
        let mask = self.stripes.len() - 1;
        (bucket & mask, bucket >> self.stripe_shift)
    }

    /// Current head of `bucket`, read under the stripe's shared lock.
    pub fn head(&self, bucket: usize) -> Option<Address> {
        let (stripe, slot) = self.slot(bucket);
        self.stripes[stripe].read()[slot]
    }

    pub fn insert(&self, record: Record) -> Result<Address> {
        let bucket = self.bucket(record.id);
        let (stripe, slot) = self.slot(bucket);

        let mut heads = self.stripes[stripe].write();
        let at = walk::insert(&mut SharedStore(&self.store), heads[slot], record)?;
        heads[slot] = Some(at);
        self.persist_head(bucket, Some(at))?;
        Ok(at)
    }

    pub fn search(&self, id: i32) -> Result<SearchResults> {
        let bucket = self.bucket(id);
        let head = self.head(bucket);
        walk::search(&mut SharedStore(&self.store), bucket, head, id)
    }

    pub fn delete_all(&self, id: i32) -> Result<usize> {
        let bucket = self.bucket(id);
        let (stripe, slot) = self.slot(bucket);

        let mut heads = self.stripes[stripe].write();
        let rewrite = walk::delete_all(&mut SharedStore(&self.store), bucket, heads[slot], id)?;
        heads[slot] = rewrite.new_head;
        self.publish(bucket, rewrite)?;
        Ok(rewrite.removed)
    }

    pub fn delete_one(&self, id: i32, occurrence: usize) -> Result<()> {
        let bucket = self.bucket(id);
        let (stripe, slot) = self.slot(bucket);

        let mut heads = self.stripes[stripe].write();
        let rewrite = walk::delete_one(
            &mut SharedStore(&self.store),
            bucket,
            heads[slot],
            id,
            occurrence,
        )?;
        heads[slot] = rewrite.new_head;
        self.publish(bucket, rewrite)
    }

    fn publish(&self, bucket: usize, rewrite: Rewrite) -> Result<()> {
        debug!(bucket, removed = rewrite.removed, retained = rewrite.retained, "chain rewritten");
        self.persist_head(bucket, rewrite.new_head)
    }

    fn persist_head(&self, bucket: usize, head: Option<Address>) -> Result<()> {
        self.index_file.lock().set_head(bucket, head)
    }

    /// Snapshot of every head, stripe by stripe.
    pub fn heads(&self) -> Vec<Option<Address>> {
        let mut out = vec![None; self.config.table_size as usize];
        for (stripe, lock) in self.stripes.iter().enumerate() {
            let heads = lock.read();
            for (slot, head) in heads.iter().enumerate() {
                out[(slot << self.stripe_shift) | stripe] = *head;
            }
        }
        out
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let heads = self.heads();
        StoreStats::collect(&mut SharedStore(&self.store), heads.into_iter().enumerate())
    }

    pub fn record_count(&self) -> u64 {
        self.store.lock().record_count()
    }

    pub fn sync(&self) -> Result<()> {
        self.store.lock().sync()?;
        self.index_file.lock().sync()
    }
}
