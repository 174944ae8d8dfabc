//! Services layer
//!
//! Business logic that sits beside the update engine and shares its store,
//! access policy and clock.
//!
//! ## Services
//!
//! - **Roster**: class and student creation, archival and read helpers

pub mod roster;

pub use roster::RosterService;
