//! facewatch-store: SQLite persistence for detections, known faces,
//! notifications and settings.
//!
//! Each collection is a table of JSON documents keyed by record id. The
//! schema is versioned with `PRAGMA user_version` and only ever grows.

pub mod record;
pub mod schema;
pub mod store;

pub use record::{Collection, Record};
pub use store::{Store, StoreError};
