//! Record store abstraction
//!
//! Versioned document storage with optimistic multi-document transactions.
//! One backend instance is constructed at process start and shared by every
//! request handler; see [`crate::runtime::EngineRuntime`].

pub mod memory;
pub mod mongo;
pub mod schemas;
pub mod store;

pub use memory::MemoryStore;
pub use mongo::MongoStore;
pub use store::{
    Collection, CommitRequest, Document, RecordKey, RecordStore, Transaction, Versioned, WriteOp,
};
