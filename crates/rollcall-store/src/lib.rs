//! rollcall-store — Concrete backends for the rollcall storage seams.
//!
//! [`SqliteStore`] implements both relational seams ([`rollcall_core::ProfileStore`]
//! and [`rollcall_core::AttendanceLedger`]); [`FsObjectStore`] implements
//! [`rollcall_core::PhotoStore`] on a local directory tree.

pub mod objects;
pub mod sqlite;

pub use objects::FsObjectStore;
pub use sqlite::SqliteStore;
