//! Testing utilities for the append pipeline
//!
//! - **InMemoryLogStorage**: storage whose writes and commits are driven by
//!   the test, with injectable write and commit failures
//!
//! # Example
//!
//! ```ignore
//! use tidelog_durability::testing::{CommitOutcome, InMemoryLogStorage};
//!
//! let storage = InMemoryLogStorage::new();
//! // ... start an appender against it, offer records ...
//! assert_eq!(storage.commit_next(), Some(CommitOutcome::Committed(1)));
//! ```

mod memory_storage;

pub use memory_storage::{CommitOutcome, InMemoryLogStorage};
