//! Notifier that keeps every event in memory
//!
//! Used to embed the evaluator in tests and dry runs where deliveries should
//! be inspected rather than sent.

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{DeliveryMode, NotificationContext, Notifier, NotifierError};
use crate::data::{AlertId, NotificationId, TriggerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifierEventKind {
    Send,
    Clear,
}

/// One recorded delivery
#[derive(Debug, Clone, PartialEq)]
pub struct NotifierEvent {
    pub kind: NotifierEventKind,
    pub alert_id: AlertId,
    pub notification_id: NotificationId,
    pub trigger_id: Option<TriggerId>,
    pub series: String,
    pub fired_at_ms: i64,
    pub value: Option<f64>,
}

/// How the recorder answers deliveries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderResponse {
    Accept,
    Decline,
    Fail,
}

pub struct RecordingNotifier {
    name: String,
    mode: DeliveryMode,
    events: Mutex<Vec<NotifierEvent>>,
    response: Mutex<RecorderResponse>,
}

impl RecordingNotifier {
    pub fn new(name: impl Into<String>, mode: DeliveryMode) -> Self {
        Self {
            name: name.into(),
            mode,
            events: Mutex::new(Vec::new()),
            response: Mutex::new(RecorderResponse::Accept),
        }
    }

    pub fn set_response(&self, response: RecorderResponse) {
        *self.response.lock() = response;
    }

    pub fn events(&self) -> Vec<NotifierEvent> {
        self.events.lock().clone()
    }

    pub fn sends(&self) -> usize {
        self.count(NotifierEventKind::Send)
    }

    pub fn clears(&self) -> usize {
        self.count(NotifierEventKind::Clear)
    }

    pub fn reset(&self) {
        self.events.lock().clear();
    }

    fn count(&self, kind: NotifierEventKind) -> usize {
        self.events.lock().iter().filter(|e| e.kind == kind).count()
    }

    fn record(&self, kind: NotifierEventKind, ctx: &NotificationContext) -> Result<bool, NotifierError> {
        self.events.lock().push(NotifierEvent {
            kind,
            alert_id: ctx.alert.id,
            notification_id: ctx.notification.id,
            trigger_id: ctx.trigger.as_ref().map(|t| t.id),
            series: ctx.series.identity(),
            fired_at_ms: ctx.fired_at_ms,
            value: ctx.value,
        });
        match *self.response.lock() {
            RecorderResponse::Accept => Ok(true),
            RecorderResponse::Decline => Ok(false),
            RecorderResponse::Fail => Err(NotifierError::Delivery(format!(
                "{} configured to fail",
                self.name
            ))),
        }
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn mode(&self) -> DeliveryMode {
        self.mode
    }

    async fn send(&self, ctx: &NotificationContext) -> Result<bool, NotifierError> {
        self.record(NotifierEventKind::Send, ctx)
    }

    async fn clear(&self, ctx: &NotificationContext) -> Result<bool, NotifierError> {
        self.record(NotifierEventKind::Clear, ctx)
    }
}
