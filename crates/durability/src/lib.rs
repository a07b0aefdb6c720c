//! Durability layer for Tidelog
//!
//! This crate moves records from producers into durable storage:
//!
//! - Frame: On-disk record framing (12-byte header, 8-byte alignment, batch flags)
//! - WriteBuffer: Single-subscriber buffer handing out blocks of whole writes
//! - Batch: Completion handler resolution for committed entries
//! - Storage: The `LogStorage` / `AppendListener` contract
//! - Appender: The actor draining a buffer into storage under backpressure
//! - Metrics: Per-partition append counters
//! - Testing: In-memory storage with manual commits and fault injection

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod appender; // Log storage appender actor
pub mod batch; // Handler resolution over committed frames
pub mod frame; // Record framing
pub mod metrics; // Append backpressure metrics
pub mod storage; // Storage contract
pub mod testing; // In-memory storage for tests
pub mod write_buffer; // Producer-side block buffer

pub use appender::{
    AppenderConfig, AppenderHandle, LogStorageAppender, DEFAULT_MAX_APPEND_BLOCK_SIZE,
};
pub use batch::{BatchState, CompletionHandler, CompletionQueue, HandlerAction};
pub use frame::{
    aligned_frame_length, encode_frame, Frame, FrameFlags, FrameHeader, FrameIter,
    FRAME_ALIGNMENT, HEADER_LENGTH,
};
pub use metrics::{AppendMetrics, AppendMetricsSnapshot};
pub use storage::{AppendListener, LogEntry, LogStorage};
pub use write_buffer::{BlockPeek, Subscription, WriteBuffer, DEFAULT_BUFFER_CAPACITY};
