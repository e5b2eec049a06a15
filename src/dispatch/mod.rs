//! Alert evaluation: query, decide, notify, record

pub mod dispatcher;
pub mod history;
pub mod stats;

pub use dispatcher::{DataLagGate, DispatcherConfig, EvaluationOutcome, NoDataLag, NotificationDispatcher};
pub use history::{AuditTrail, HistoryEntry, HistoryLog, JobStatus};
pub use stats::{EvaluationStats, EvaluationStatsSnapshot};

use crate::catalog::CatalogError;
use crate::data::AlertId;
use crate::notify::NotifierError;
use crate::source::SourceError;
use crate::state::StateError;

/// Reasons a single alert evaluation fails
#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    #[error("Alert {0} does not exist")]
    NotFound(AlertId),

    #[error("Alert {0} is disabled")]
    Disabled(AlertId),

    #[error("Alert {0} has no notifications")]
    NoNotifications(AlertId),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Notifier(#[from] NotifierError),
}
