pub mod core;
pub mod storage;
pub mod chain;
pub mod parallel;

pub use crate::chain::engine::ChainEngine;
pub use crate::core::config::Config;
pub use crate::core::database::Database;
pub use crate::core::error::{Error, ErrorKind, Result};
pub use crate::core::types::{Address, Record};

/*
┌──────────────────────────────── VISITSTORE STRUCT ARCHITECTURE ────────────────────────────────┐
│                                                                                                 │
│  ┌──────────────────────────────────── struct Database ───────────────────────────────────┐    │
│  │ config: Config                              // table size, stripes, paths              │    │
│  │ layout: StorageLayout                       // file names under data_dir               │    │
│  │ stripes: Vec<RwLock<Vec<Option<Address>>>>  // head mirror, bucket b -> stripe b&(n-1)  │    │
│  │ store: Mutex<RecordStore>                   // seek+read / seek+write pairs            │    │
│  │ index_file: Mutex<HashIndex>                // one 8-byte entry per bucket             │    │
│  │ _lock: Option<FileLock>                     // one owner per data dir                  │    │
│  └────────────────────────────────────────────────────────────────────────────────────────┘    │
│                                                                                                 │
│  ┌──────────────────────┐  ┌─────────────────────────┐  ┌──────────────────────────────────┐   │
│  │ struct ChainEngine   │  │ struct Record (307 B)   │  │ struct Address(u64)              │   │
│  │ • store: RecordStore │  │ • date        11        │  │ • byte offset into the store     │   │
│  │ • index: HashIndex   │  │ • id          4  (key)  │  │ • -1 on disk = end of chain      │   │
│  │ • single owner       │  │ • 8 text fields         │  │ • check(len) before every read   │   │
│  └──────────────────────┘  │ • age         4         │  └──────────────────────────────────┘   │
│                            │ • next        8         │                                          │
│                            └─────────────────────────┘                                          │
├──────────────────────────────────────── CHAIN LAYER ────────────────────────────────────────────┤
│  walk::walk ──> search / insert / delete_all / delete_one ──> relink                            │
│     generic over RecordSource / RecordSink, so ChainEngine, Database and Compactor share it     │
├────────────────────────────────────── OFFLINE LAYER ────────────────────────────────────────────┤
│  Compactor   : every head ──walk──> relink into *_new files ──rename──> live files             │
│  BulkLoader  : files ──broadcast──> workers ──ParallelParser──> temp_rank_N.dat shards          │
│                ──barrier──> ShardMerger (rank order) ──> rebuild_index from offset 0            │
└─────────────────────────────────────────────────────────────────────────────────────────────────┘
*/
