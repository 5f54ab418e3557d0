//! Delivery progress notifications.
//!
//! Validation, rendering and export report state changes as
//! [`DeliveryEvent`]s to a [`DeliveryObserver`]. Consumers decide how to
//! surface them (log lines, a progress UI, a broadcast channel).

use serde::Serialize;

use crate::types::EntityId;
use crate::version::Version;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeliveryEvent {
    /// Informational status for a version.
    ValidationMessage { version_id: EntityId, message: String },
    /// A version failed validation or delivery.
    ValidationError { version_id: EntityId, message: String },
    /// Overall progress of a version, `0.0..=1.0`.
    Progress { version_id: EntityId, progress: f64 },
    /// The whole export batch is done.
    ExportFinished,
}

impl DeliveryEvent {
    pub fn version_id(&self) -> Option<EntityId> {
        match self {
            Self::ValidationMessage { version_id, .. }
            | Self::ValidationError { version_id, .. }
            | Self::Progress { version_id, .. } => Some(*version_id),
            Self::ExportFinished => None,
        }
    }
}

pub trait DeliveryObserver: Send + Sync {
    fn notify(&self, event: DeliveryEvent);
}

/// Observer that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl DeliveryObserver for NullObserver {
    fn notify(&self, _event: DeliveryEvent) {}
}

/// Set a version's message and notify.
pub fn report_message(observer: &dyn DeliveryObserver, version: &mut Version, message: impl Into<String>) {
    version.validation_message = message.into();
    observer.notify(DeliveryEvent::ValidationMessage {
        version_id: version.id,
        message: version.validation_message.clone(),
    });
}

/// Set a version's error and notify.
pub fn report_error(observer: &dyn DeliveryObserver, version: &mut Version, message: impl Into<String>) {
    version.validation_error = message.into();
    observer.notify(DeliveryEvent::ValidationError {
        version_id: version.id,
        message: version.validation_error.clone(),
    });
}

/// Set a version's progress and notify.
pub fn report_progress(observer: &dyn DeliveryObserver, version: &mut Version, progress: f64) {
    version.progress = progress;
    observer.notify(DeliveryEvent::Progress {
        version_id: version.id,
        progress,
    });
}
