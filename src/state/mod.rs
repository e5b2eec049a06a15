//! Notification cooldown and active-status state

pub mod cache;
pub mod store;

pub use cache::NotificationStateCache;
pub use store::{
    InMemoryNotificationStateStore, NotificationState, NotificationStateStore, StateTables,
};

/// Notification state errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum StateError {
    #[error("Notification state store error: {0}")]
    Store(String),
}
