//! Membership store (C2): lists, memberships, and knowns, backed by
//! SQLite through a pooled connection handle, mirroring the teacher's
//! `sqlite` backend feature (`store::backend::sqlite`) minus the generic
//! key/value abstraction layer that backend shares with RocksDB/FDB/Postgres
//! — this system only ever talks to one small relational schema, so the
//! pool is opened directly against it rather than routed through a trait
//! object per backend.

pub mod error;
pub mod model;
mod schema;
mod sqlite;

pub use error::StoreError;
pub use model::{Action, Actions, List, Membership, MembershipInfo, Status};
pub use sqlite::SqliteStore;

/// Maximum addresses accepted in one `AddMembers`/`RemoveMembers`/
/// `AddKnowns`/`RemoveKnowns` call.
pub const BATCH_LIMIT: usize = 1000;

pub const HMAC_KEY_LEN: usize = 32;
