//! Persistence contracts, the SQLite store and outbound HTTP utilities for flashfood.

pub mod http;
pub mod repository;
pub mod sqlite;

use thiserror::Error;

pub use repository::{
    BlockedRepository, CandidateRepository, CatalogStore, CatalogTx, JobRunRepository,
    MasterRepository, NotificationRepository, TrendRepository, UserSettingsRepository,
};
pub use sqlite::SqliteStore;

pub const CRATE_NAME: &str = "flashfood-storage";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}
