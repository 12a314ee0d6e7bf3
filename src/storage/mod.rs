pub mod codec;
pub mod record_store;
pub mod hash_index;
pub mod layout;
pub mod file_lock;
pub mod rebuild;
pub mod compactor;
