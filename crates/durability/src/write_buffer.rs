//! Bounded write buffer between producers and the log appender
//!
//! Producers frame their records into the buffer together with one
//! completion handler per logical write. A single subscriber (the appender)
//! peeks contiguous blocks of whole writes and marks them completed once
//! they were handed to storage; until then they stay buffered and are
//! peeked again on the next attempt.
//!
//! A block never splits a write, so every frame of a batch lands in the same
//! storage entry.

use crate::batch::{CompletionHandler, CompletionQueue};
use crate::frame::{aligned_frame_length, encode_frame, FrameFlags};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tidelog_core::{Error, Result, StreamId, MAX_RECORDS_PER_ENTRY};
use tracing::trace;

/// Default buffer capacity in bytes (16 MiB)
pub const DEFAULT_BUFFER_CAPACITY: usize = 16 * 1024 * 1024;

type DataListener = Arc<dyn Fn() + Send + Sync>;

struct PendingWrite {
    bytes: Vec<u8>,
    records: usize,
    handler: CompletionHandler,
}

#[derive(Default)]
struct BufferState {
    writes: VecDeque<PendingWrite>,
    used_bytes: usize,
}

struct BufferInner {
    capacity: usize,
    state: Mutex<BufferState>,
    listener: Mutex<Option<DataListener>>,
    subscribed: AtomicBool,
}

impl BufferInner {
    fn notify(&self) {
        let listener = self.listener.lock().clone();
        if let Some(listener) = listener {
            listener();
        }
    }
}

/// Producer side of the buffer
#[derive(Clone)]
pub struct WriteBuffer {
    inner: Arc<BufferInner>,
}

impl WriteBuffer {
    /// Buffer holding at most `capacity` framed bytes
    pub fn new(capacity: usize) -> Self {
        WriteBuffer {
            inner: Arc::new(BufferInner {
                capacity,
                state: Mutex::new(BufferState::default()),
                listener: Mutex::new(None),
                subscribed: AtomicBool::new(false),
            }),
        }
    }

    /// Write one standalone record
    pub fn offer(
        &self,
        stream_id: StreamId,
        payload: &[u8],
        handler: CompletionHandler,
    ) -> Result<()> {
        let mut bytes = Vec::with_capacity(aligned_frame_length(payload.len()));
        encode_frame(&mut bytes, payload, FrameFlags::STANDALONE, stream_id)?;
        self.push(PendingWrite {
            bytes,
            records: 1,
            handler,
        })
    }

    /// Write several records as one batch sharing `handler`
    pub fn offer_batch<I, P>(
        &self,
        stream_id: StreamId,
        payloads: I,
        handler: CompletionHandler,
    ) -> Result<()>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<[u8]>,
    {
        let payloads: Vec<P> = payloads.into_iter().collect();
        let count = payloads.len();
        if count == 0 {
            return Err(Error::protocol("cannot write an empty batch"));
        }
        if count > MAX_RECORDS_PER_ENTRY {
            return Err(Error::protocol(format!(
                "batch of {} records exceeds the {} records an entry can hold",
                count, MAX_RECORDS_PER_ENTRY
            )));
        }

        let mut bytes = Vec::with_capacity(
            payloads
                .iter()
                .map(|p| aligned_frame_length(p.as_ref().len()))
                .sum(),
        );
        for (i, payload) in payloads.iter().enumerate() {
            encode_frame(
                &mut bytes,
                payload.as_ref(),
                FrameFlags::for_batch_member(i, count),
                stream_id,
            )?;
        }
        self.push(PendingWrite {
            bytes,
            records: count,
            handler,
        })
    }

    fn push(&self, write: PendingWrite) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            let available = self.inner.capacity.saturating_sub(state.used_bytes);
            if write.bytes.len() > available {
                return Err(Error::BufferFull {
                    requested: write.bytes.len(),
                    available,
                });
            }
            state.used_bytes += write.bytes.len();
            state.writes.push_back(write);
        }
        self.inner.notify();
        Ok(())
    }

    /// Attach the single consumer
    pub fn subscribe(&self) -> Result<Subscription> {
        if self.inner.subscribed.swap(true, Ordering::AcqRel) {
            return Err(Error::Config(
                "write buffer already has a subscriber".to_string(),
            ));
        }
        Ok(Subscription {
            inner: Arc::clone(&self.inner),
            scratch: Vec::new(),
        })
    }

    /// Logical writes waiting to be appended
    pub fn pending_writes(&self) -> usize {
        self.inner.state.lock().writes.len()
    }

    /// Framed bytes currently buffered
    pub fn used_bytes(&self) -> usize {
        self.inner.state.lock().used_bytes
    }

    /// Maximum framed bytes
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }
}

impl Default for WriteBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}

impl fmt::Debug for WriteBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteBuffer")
            .field("capacity", &self.inner.capacity)
            .field("used_bytes", &self.used_bytes())
            .field("pending_writes", &self.pending_writes())
            .finish()
    }
}

/// Consumer side of the buffer
pub struct Subscription {
    inner: Arc<BufferInner>,
    scratch: Vec<u8>,
}

impl Subscription {
    /// Peek the longest run of whole writes that fits into `max_block_size`
    /// bytes and one entry's record limit. The first write is always taken,
    /// even if it is larger.
    ///
    /// Returns `None` when the buffer is empty. Nothing is removed until
    /// [`BlockPeek::mark_completed`].
    pub fn peek_block(&mut self, max_block_size: usize) -> Option<BlockPeek<'_>> {
        self.scratch.clear();
        let mut writes = 0;
        let mut records = 0;
        {
            let state = self.inner.state.lock();
            for write in &state.writes {
                let fits = self.scratch.len() + write.bytes.len() <= max_block_size
                    && records + write.records <= MAX_RECORDS_PER_ENTRY;
                if writes > 0 && !fits {
                    break;
                }
                self.scratch.extend_from_slice(&write.bytes);
                writes += 1;
                records += write.records;
            }
        }
        if writes == 0 {
            return None;
        }
        trace!(
            bytes = self.scratch.len(),
            writes,
            records,
            "Peeked block"
        );
        Some(BlockPeek {
            subscription: self,
            writes,
            records,
        })
    }

    /// Whether any write is buffered
    pub fn has_data(&self) -> bool {
        !self.inner.state.lock().writes.is_empty()
    }

    /// Invoke `listener` after every successful offer
    pub fn set_data_listener<F>(&self, listener: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.inner.listener.lock() = Some(Arc::new(listener));
    }

    /// Stop notifying
    pub fn clear_data_listener(&self) {
        self.inner.listener.lock().take();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.clear_data_listener();
        self.inner.subscribed.store(false, Ordering::Release);
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("has_data", &self.has_data())
            .finish()
    }
}

/// A peeked block. Its bytes are only valid while the peek is alive.
pub struct BlockPeek<'a> {
    subscription: &'a mut Subscription,
    writes: usize,
    records: usize,
}

impl<'a> BlockPeek<'a> {
    /// Framed bytes of the block
    pub fn bytes(&self) -> &[u8] {
        &self.subscription.scratch
    }

    /// Length of the block in bytes
    pub fn block_length(&self) -> usize {
        self.subscription.scratch.len()
    }

    /// Logical writes in the block
    pub fn write_count(&self) -> usize {
        self.writes
    }

    /// Frames in the block
    pub fn record_count(&self) -> usize {
        self.records
    }

    /// Remove the peeked writes from the buffer and hand over their handlers
    pub fn mark_completed(self) -> CompletionQueue {
        let mut state = self.subscription.inner.state.lock();
        let mut handlers = CompletionQueue::new();
        for _ in 0..self.writes {
            if let Some(write) = state.writes.pop_front() {
                state.used_bytes -= write.bytes.len();
                handlers.push(write.handler);
            }
        }
        handlers
    }
}

impl fmt::Debug for BlockPeek<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockPeek")
            .field("bytes", &self.block_length())
            .field("writes", &self.writes)
            .field("records", &self.records)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameIter, HEADER_LENGTH};
    use crate::storage::LogEntry;
    use std::sync::atomic::AtomicUsize;
    use tidelog_core::Position;

    fn noop() -> CompletionHandler {
        Box::new(|_: &LogEntry, _: Position, _: usize| {})
    }

    fn stream() -> StreamId {
        StreamId::new(1)
    }

    #[test]
    fn test_empty_buffer_has_no_block() {
        let buffer = WriteBuffer::new(1024);
        let mut subscription = buffer.subscribe().unwrap();
        assert!(subscription.peek_block(1024).is_none());
    }

    #[test]
    fn test_peek_without_complete_keeps_data() {
        let buffer = WriteBuffer::new(1024);
        let mut subscription = buffer.subscribe().unwrap();
        buffer.offer(stream(), b"a", noop()).unwrap();

        let first = subscription.peek_block(1024).unwrap().bytes().to_vec();
        let peek = subscription.peek_block(1024).unwrap();
        assert_eq!(peek.bytes(), &first[..]);
        assert_eq!(peek.mark_completed().len(), 1);
        assert!(subscription.peek_block(1024).is_none());
        assert_eq!(buffer.used_bytes(), 0);
    }

    #[test]
    fn test_block_respects_max_size() {
        let buffer = WriteBuffer::new(1024);
        let mut subscription = buffer.subscribe().unwrap();
        for _ in 0..4 {
            buffer.offer(stream(), &[7; 4], noop()).unwrap();
        }
        // each frame is 16 bytes
        let peek = subscription.peek_block(40).unwrap();
        assert_eq!(peek.write_count(), 2);
        assert_eq!(peek.block_length(), 32);
        peek.mark_completed();
        assert_eq!(buffer.pending_writes(), 2);
    }

    #[test]
    fn test_oversized_write_is_still_peeked() {
        let buffer = WriteBuffer::new(1024);
        let mut subscription = buffer.subscribe().unwrap();
        buffer.offer(stream(), &[1; 100], noop()).unwrap();
        buffer.offer(stream(), &[2; 1], noop()).unwrap();
        let peek = subscription.peek_block(16).unwrap();
        assert_eq!(peek.write_count(), 1);
        assert_eq!(peek.block_length(), aligned_frame_length(100));
        assert_eq!(peek.block_length(), HEADER_LENGTH + 100);
    }

    #[test]
    fn test_batch_is_never_split() {
        let buffer = WriteBuffer::new(4096);
        let mut subscription = buffer.subscribe().unwrap();
        buffer.offer(stream(), b"x", noop()).unwrap();
        buffer
            .offer_batch(stream(), [b"a", b"b", b"c"], noop())
            .unwrap();

        // Room for the standalone frame and part of the batch only
        let peek = subscription.peek_block(48).unwrap();
        assert_eq!(peek.write_count(), 1);
        assert_eq!(peek.record_count(), 1);
        peek.mark_completed();

        let peek = subscription.peek_block(48).unwrap();
        assert_eq!(peek.record_count(), 3);
        let flags: Vec<_> = FrameIter::new(peek.bytes())
            .map(|f| f.unwrap().header.flags)
            .collect();
        assert_eq!(flags, vec![FrameFlags::BEGIN, FrameFlags::INTERIOR, FrameFlags::END]);
    }

    #[test]
    fn test_block_never_exceeds_entry_record_limit() {
        let buffer = WriteBuffer::new(1 << 20);
        let mut subscription = buffer.subscribe().unwrap();
        for _ in 0..MAX_RECORDS_PER_ENTRY + 10 {
            buffer.offer(stream(), b"r", noop()).unwrap();
        }
        let peek = subscription.peek_block(1 << 20).unwrap();
        assert_eq!(peek.record_count(), MAX_RECORDS_PER_ENTRY);
    }

    #[test]
    fn test_buffer_full() {
        let buffer = WriteBuffer::new(32);
        buffer.offer(stream(), &[0; 4], noop()).unwrap();
        buffer.offer(stream(), &[0; 4], noop()).unwrap();
        let err = buffer.offer(stream(), &[0; 4], noop()).unwrap_err();
        assert!(matches!(
            err,
            Error::BufferFull {
                requested: 16,
                available: 0
            }
        ));
    }

    #[test]
    fn test_invalid_batches_rejected() {
        let buffer = WriteBuffer::new(1 << 20);
        let empty: [&[u8]; 0] = [];
        assert!(buffer.offer_batch(stream(), empty, noop()).is_err());
        let huge = vec![b"r".to_vec(); MAX_RECORDS_PER_ENTRY + 1];
        assert!(buffer.offer_batch(stream(), huge, noop()).is_err());
        assert_eq!(buffer.pending_writes(), 0);
    }

    #[test]
    fn test_single_subscriber() {
        let buffer = WriteBuffer::new(1024);
        let subscription = buffer.subscribe().unwrap();
        assert!(buffer.subscribe().is_err());
        drop(subscription);
        assert!(buffer.subscribe().is_ok());
    }

    #[test]
    fn test_listener_fires_on_offer() {
        let buffer = WriteBuffer::new(1024);
        let subscription = buffer.subscribe().unwrap();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        subscription.set_data_listener(move || {
            f.fetch_add(1, Ordering::SeqCst);
        });

        buffer.offer(stream(), b"a", noop()).unwrap();
        buffer.offer_batch(stream(), [b"b", b"c"], noop()).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 2);

        subscription.clear_data_listener();
        buffer.offer(stream(), b"d", noop()).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }
}
