pub mod load;
pub mod types;

pub use load::{get_statevault_data_dir, load_default, load_from_path};
pub use types::{AppConfig, CopyMode, LoggingConfig, StorageConfig, StorageKind, StoreConfig};
