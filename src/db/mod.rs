//! Database module: SQLite pool setup plus the two device-local stores.
//!
//! - `repo`: pool creation, migrations and the missing-schema self-heal.
//! - `model`: row-to-entity mapping shared by the stores.
//! - `recordings`: the local record store (capture artifacts and upload status).
//! - `events`: the sync event store (outbound status events).
//!
//! External modules should import from `recsync::db`.

pub mod events;
pub mod model;
pub mod recordings;
pub mod repo;

pub use events::SyncEventStore;
pub use model::StatusCounts;
pub use recordings::LocalRecordStore;
pub use repo::*;
