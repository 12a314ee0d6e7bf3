use std::path::PathBuf;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::TABLE_SIZE;

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub store_file: String,
    pub index_file: String,

    // Fixed for the lifetime of a store; the index never grows
    pub table_size: u32,
    pub lock_stripes: u32,
    pub use_file_lock: bool,

    // Bulk loader
    pub loader_workers: usize,
    pub loader_threads_per_worker: usize,  // 0 = cores / workers
    pub input_extension: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data_dir: PathBuf::from("."),
            store_file: "registros.dat".to_string(),
            index_file: "tabla_hash.dat".to_string(),

            table_size: TABLE_SIZE,
            lock_stripes: 64,
            use_file_lock: true,

            loader_workers: num_cpus::get(),
            loader_threads_per_worker: 0,
            input_extension: "csv".to_string(),
        }
    }
}

impl Config {
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    /// Also narrows `lock_stripes` so there are never more stripes than buckets.
    pub fn with_table_size(mut self, table_size: u32) -> Self {
        self.table_size = table_size;
        if table_size.is_power_of_two() {
            self.lock_stripes = self.lock_stripes.min(table_size);
        }
        self
    }

    pub fn with_lock_stripes(mut self, stripes: u32) -> Self {
        self.lock_stripes = stripes;
        self
    }

    pub fn with_file_lock(mut self, enabled: bool) -> Self {
        self.use_file_lock = enabled;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.loader_workers = workers;
        self
    }

    /// Rayon threads each loader worker parses with. Unset means an even
    /// share of the cores, at least one.
    pub fn parser_threads(&self) -> usize {
        if self.loader_threads_per_worker > 0 {
            return self.loader_threads_per_worker;
        }
        (num_cpus::get() / self.loader_workers.max(1)).max(1)
    }

    pub fn validate(&self) -> Result<()> {
        if self.table_size == 0 || !self.table_size.is_power_of_two() {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!("table_size {} is not a power of two", self.table_size),
            ));
        }
        if self.lock_stripes == 0
            || !self.lock_stripes.is_power_of_two()
            || self.lock_stripes > self.table_size
        {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!(
                    "lock_stripes {} must be a power of two no larger than table_size",
                    self.lock_stripes
                ),
            ));
        }
        if self.loader_workers == 0 {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                "loader_workers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn small_tables_narrow_the_stripes() {
        let config = Config::default().with_table_size(16);
        assert_eq!(config.lock_stripes, 16);
        assert!(config.validate().is_ok());

        let config = Config::default().with_table_size(1);
        assert_eq!(config.lock_stripes, 1);
        assert!(config.validate().is_ok());

        assert_eq!(Config::default().with_table_size(1 << 20).lock_stripes, 64);
    }

    #[test]
    fn parser_threads_share_the_cores() {
        let cores = num_cpus::get();
        let config = Config::default().with_workers(cores * 2);
        assert_eq!(config.parser_threads(), 1);

        let config = Config::default().with_workers(1);
        assert_eq!(config.parser_threads(), cores);

        let mut config = Config::default().with_workers(4);
        config.loader_threads_per_worker = 3;
        assert_eq!(config.parser_threads(), 3);
    }

    #[test]
    fn table_and_stripes_must_be_powers_of_two() {
        assert!(Config::default().with_table_size(1000).validate().is_err());
        assert!(Config::default().with_lock_stripes(3).validate().is_err());
        assert!(Config::default()
            .with_table_size(16)
            .with_lock_stripes(32)
            .validate()
            .is_err());
        assert!(Config::default().with_workers(0).validate().is_err());
        assert!(Config::default()
            .with_table_size(16)
            .with_lock_stripes(16)
            .validate()
            .is_ok());
    }
}
