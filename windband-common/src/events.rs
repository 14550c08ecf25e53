//! Progress event bus
//!
//! Conversion progress is published on a `tokio::sync::broadcast` channel so
//! SSE clients can follow jobs without polling. Delivery is best effort: slow
//! subscribers lag and lose old events, and publishing with no subscribers is
//! not an error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Conversion lifecycle event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ProgressEvent {
    /// Background conversion registered for a job
    ConversionStarted {
        job_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// A stage finished; `percent` is cumulative
    ConversionProgress {
        job_id: Uuid,
        percent: u8,
        stage_label: String,
        timestamp: DateTime<Utc>,
    },

    /// All stages finished and the result is stored
    ConversionCompleted {
        job_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// Conversion stopped with an error (stage failure, cancellation, timeout)
    ConversionFailed {
        job_id: Uuid,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
}

impl ProgressEvent {
    /// Event name used for the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            ProgressEvent::ConversionStarted { .. } => "ConversionStarted",
            ProgressEvent::ConversionProgress { .. } => "ConversionProgress",
            ProgressEvent::ConversionCompleted { .. } => "ConversionCompleted",
            ProgressEvent::ConversionFailed { .. } => "ConversionFailed",
        }
    }

    pub fn job_id(&self) -> Uuid {
        match self {
            ProgressEvent::ConversionStarted { job_id, .. }
            | ProgressEvent::ConversionProgress { job_id, .. }
            | ProgressEvent::ConversionCompleted { job_id, .. }
            | ProgressEvent::ConversionFailed { job_id, .. } => *job_id,
        }
    }
}

/// Broadcast bus for [`ProgressEvent`]s
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ProgressEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus buffering at most `capacity` events per subscriber
    ///
    /// ```
    /// use windband_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(100);
    /// assert_eq!(event_bus.capacity(), 100);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring the case where nobody is listening
    pub fn emit_lossy(&self, event: ProgressEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
