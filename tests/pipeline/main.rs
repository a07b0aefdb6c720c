//! End-to-end tests for the append pipeline.
//!
//! Producers, appenders, limiters and storage run together on real
//! threads: records go through the write buffer, are admitted by the
//! partition's limiter, appended and committed by storage on a background
//! thread, and completed through their handlers.

#[path = "../common/mod.rs"]
mod common;

mod configuration;
mod partitions;
