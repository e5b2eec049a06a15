pub mod alert;
pub mod series;
pub mod task;

pub use alert::{
    AlertDefinition, AlertId, Notification, NotificationId, Trigger, TriggerId, TriggerType,
};
pub use series::{state_key, Series};
pub use task::ScheduledTask;
