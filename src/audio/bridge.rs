use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::debug;

#[derive(Debug)]
struct TaggedFrame {
    generation: u64,
    data: Bytes,
}

/// Hands decoded frames from a session's decode worker to the voice transport.
///
/// The transport calls [`next_frame`](Self::next_frame) every 20ms. That call
/// never parks the calling thread: it only drains the channel with `try_recv`
/// and reads atomics, so it cannot wait on the scheduler lock or on I/O.
///
/// Frames are tagged with the generation of the playback that produced them.
/// Switching generation makes every frame still in flight from the previous
/// track invisible to the transport.
#[derive(Debug)]
pub struct FrameBridge {
    tx: flume::Sender<TaggedFrame>,
    rx: flume::Receiver<TaggedFrame>,
    capacity: usize,
    generation: AtomicU64,
    closed: AtomicBool,
    delivered: AtomicU64,
    discarded: AtomicU64,
}

impl FrameBridge {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = flume::bounded(capacity);
        Self {
            tx,
            rx,
            capacity,
            generation: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            delivered: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        }
    }

    /// Next 20ms frame, or `None` if nothing is ready for this tick.
    ///
    /// Always `None` once the bridge is closed.
    pub fn next_frame(&self) -> Option<Bytes> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }

        let current = self.generation.load(Ordering::Acquire);
        while let Ok(frame) = self.rx.try_recv() {
            if frame.generation == current {
                self.delivered.fetch_add(1, Ordering::Relaxed);
                return Some(frame.data);
            }
            self.discarded.fetch_add(1, Ordering::Relaxed);
        }

        None
    }

    /// Producer handle for the playback tagged `generation`.
    pub fn sink(&self, generation: u64) -> FrameSink {
        FrameSink {
            tx: self.tx.clone(),
            generation,
        }
    }

    /// Makes `generation` the only playback whose frames are delivered and
    /// drops everything buffered so far.
    pub fn switch_to(&self, generation: u64) {
        self.generation.store(generation, Ordering::Release);
        let flushed = self.rx.drain().count();
        if flushed > 0 {
            debug!("🧹 {} frames descartados al cambiar de track", flushed);
            self.discarded.fetch_add(flushed as u64, Ordering::Relaxed);
        }
    }

    /// Permanently stops delivery. Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.rx.drain().for_each(drop);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Frames currently buffered, including stale ones not yet discarded.
    pub fn buffered(&self) -> usize {
        self.rx.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> BridgeStats {
        BridgeStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            buffered: self.buffered(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeStats {
    pub delivered: u64,
    pub discarded: u64,
    pub buffered: usize,
}

/// Write end of a [`FrameBridge`], bound to one playback generation.
#[derive(Debug, Clone)]
pub struct FrameSink {
    tx: flume::Sender<TaggedFrame>,
    generation: u64,
}

impl FrameSink {
    /// Waits for free space in the buffer, then stores `data`.
    ///
    /// A full buffer suspends the caller instead of dropping frames; this is
    /// how the decoder is paused until the transport catches up.
    pub async fn send(&self, data: Bytes) -> bool {
        self.tx
            .send_async(TaggedFrame {
                generation: self.generation,
                data,
            })
            .await
            .is_ok()
    }
}
