//! SQLite persistence and TOML configuration for engram-core state.

pub mod config;
pub mod error;
pub mod json_bridge;
pub mod schema;
pub mod store;

pub use config::{
    CONFIG_FILE, CompactionConfig, DB_FILE, EngineConfig, MaintenanceConfig, default_data_dir,
};
pub use error::{Result, StoreError};
pub use store::Store;
