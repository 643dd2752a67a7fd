//! End-to-end coverage (C11): drives real LMTP sessions against a
//! temp-file-backed `SqliteStore` and a `RecordingSink`, the way the
//! teacher's own integration suite wires a throwaway sqlite `directory`
//! through the same production types the server uses rather than mocking
//! the store boundary.

pub mod support;

mod checkback_flow;
mod lmtp;
