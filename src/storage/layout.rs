use std::path::PathBuf;
use std::fs;
use uuid::Uuid;
use crate::core::config::Config;
use crate::core::error::Result;

/// File names of one store on disk
#[derive(Debug, Clone)]
pub struct StorageLayout {
    pub base_dir: PathBuf,      // Root directory
    pub store_path: PathBuf,    // Encoded records
    pub index_path: PathBuf,    // Bucket heads
}

impl StorageLayout {
    pub fn new(config: &Config) -> Result<Self> {
        let base_dir = config.data_dir.clone();
        fs::create_dir_all(&base_dir)?;

        Ok(StorageLayout {
            store_path: base_dir.join(&config.store_file),
            index_path: base_dir.join(&config.index_file),
            base_dir,
        })
    }

    pub fn lock_path(&self) -> PathBuf {
        self.base_dir.join(".lock")
    }

    /// Compaction writes here, then renames over the live files.
    pub fn compact_store_path(&self) -> PathBuf {
        with_suffix(&self.store_path, "_new")
    }

    pub fn compact_index_path(&self) -> PathBuf {
        with_suffix(&self.index_path, "_new")
    }

    /// Private work directory of one bulk-load run.
    pub fn load_dir(&self, job: &Uuid) -> PathBuf {
        self.base_dir.join(format!("load-{}", job))
    }

    pub fn shard_path(load_dir: &std::path::Path, rank: usize) -> PathBuf {
        load_dir.join(format!("temp_rank_{}.dat", rank))
    }
}

// registros.dat -> registros_new.dat
fn with_suffix(path: &std::path::Path, suffix: &str) -> PathBuf {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("data");
    let name = match path.extension().and_then(|s| s.to_str()) {
        Some(ext) => format!("{}{}.{}", stem, suffix, ext),
        None => format!("{}{}", stem, suffix),
    };
    path.with_file_name(name)
}
