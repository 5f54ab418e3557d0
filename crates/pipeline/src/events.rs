//! In-process delivery event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] implements [`DeliveryObserver`], so validation and export
//! publish straight onto it. It is meant to be shared as `Arc<EventBus>`
//! between the export task and whoever displays progress.

use std::sync::Mutex;

use tokio::sync::broadcast;

use delivery_core::events::{DeliveryEvent, DeliveryObserver};
use delivery_core::types::EntityId;

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out of [`DeliveryEvent`]s.
pub struct EventBus {
    sender: broadcast::Sender<DeliveryEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed events are dropped
    /// and slow receivers observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers. Dropped when nobody
    /// listens.
    pub fn publish(&self, event: DeliveryEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeliveryEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl DeliveryObserver for EventBus {
    fn notify(&self, event: DeliveryEvent) {
        self.publish(event);
    }
}

// ---------------------------------------------------------------------------
// EventLogger
// ---------------------------------------------------------------------------

/// Background service that writes every delivery event to the log.
pub struct EventLogger;

impl EventLogger {
    /// Run the logging loop. Exits when the [`EventBus`] is dropped.
    pub async fn run(mut receiver: broadcast::Receiver<DeliveryEvent>) {
        loop {
            match receiver.recv().await {
                Ok(event) => Self::log(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Event logger lagged, some events were not logged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::debug!("Event bus closed, event logger shutting down");
                    break;
                }
            }
        }
    }

    fn log(event: &DeliveryEvent) {
        match event {
            DeliveryEvent::ValidationMessage { version_id, message } => {
                tracing::info!(version_id, %message, "Version status");
            }
            DeliveryEvent::ValidationError { version_id, message } => {
                tracing::error!(version_id, %message, "Version error");
            }
            DeliveryEvent::Progress { version_id, progress } => {
                tracing::debug!(version_id, progress, "Version progress");
            }
            DeliveryEvent::ExportFinished => tracing::info!("Export finished"),
        }
    }
}

// ---------------------------------------------------------------------------
// RecordingObserver
// ---------------------------------------------------------------------------

/// Observer that keeps every event, in order.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<DeliveryEvent>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<DeliveryEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Messages reported for one version.
    pub fn messages_for(&self, version_id: EntityId) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                DeliveryEvent::ValidationMessage { version_id: id, message } if id == version_id => {
                    Some(message)
                }
                _ => None,
            })
            .collect()
    }

    /// Errors reported for one version.
    pub fn errors_for(&self, version_id: EntityId) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                DeliveryEvent::ValidationError { version_id: id, message } if id == version_id => {
                    Some(message)
                }
                _ => None,
            })
            .collect()
    }

    /// Progress values reported for one version.
    pub fn progress_for(&self, version_id: EntityId) -> Vec<f64> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                DeliveryEvent::Progress { version_id: id, progress } if id == version_id => {
                    Some(progress)
                }
                _ => None,
            })
            .collect()
    }
}

impl DeliveryObserver for RecordingObserver {
    fn notify(&self, event: DeliveryEvent) {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(event);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
