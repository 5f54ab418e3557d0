//! Delivery pipeline: loads the delivery set from the production
//! database cache, validates it and exports it.
//!
//! Export runs on a tokio task. Each version is delivered in turn
//! (preview renders, the frame sequence, the attachment and LUT, status
//! updates), then every delivery folder gets its CSV manifest. Progress
//! and failures are published as [`delivery_core::events::DeliveryEvent`]s.

pub mod deliver;
pub mod error;
pub mod events;
pub mod export;
pub mod loader;
pub mod manifest;
pub mod numbering;
pub mod transfer;
pub mod validate;

pub use error::{DeliveryError, ExportError};
pub use events::{EventBus, EventLogger};
pub use export::{ExportReport, ExportRequest, Exporter};
pub use loader::{load_entities, ProjectInfo};
pub use validate::{passed_deliverables, validate_all, ValidationSummary};
