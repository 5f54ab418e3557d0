//! Production database access.
//!
//! [`ShotGridConnection`] is the query seam (`find`, `update`, schema
//! reads). [`InMemoryShotGrid`] answers it from a JSON snapshot, and
//! [`ShotGridCache`] is the memoizing read-through layer the rest of the
//! delivery pipeline reads records from.

pub mod cache;
pub mod connection;
pub mod error;
pub mod memory;

pub use cache::ShotGridCache;
pub use connection::{Filter, FilterOperator, ShotGridConnection};
pub use error::ShotGridError;
pub use memory::InMemoryShotGrid;
