//! Alert catalog: the primary store contract and the scheduling cache

pub mod cache;
pub mod store;

pub use cache::{AlertCatalogCache, CatalogSnapshot, CatalogStats};
pub use store::{AlertStore, InMemoryAlertStore};

/// Catalog errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum CatalogError {
    #[error("Alert catalog not initialized")]
    NotInitialized,

    #[error("Alert store error: {0}")]
    Store(String),
}
