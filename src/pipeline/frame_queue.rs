//! Decoded-frame queue between a decode worker and a consumer
//!
//! Small bounded FIFO of pre-allocated frame slots. Producers decode
//! directly into a slot and consumers present directly out of one, so no
//! pixel or sample buffer is ever reallocated in steady state: buffers grow
//! to the stream's frame size once and are reused for the rest of playback.
//!
//! # Design
//!
//! Writes are two-phase (`peek_writable` then `commit_write`) and reads are
//! two-phase (`peek_readable` then `next`), mirroring the underlying
//! [`Ring`]. `peek_next` gives the consumer one slot of lookahead for
//! late-frame drop decisions without consuming anything.
//!
//! # Thread Safety
//!
//! Single producer, single consumer. The ring sits behind a mutex, but the
//! references returned by the peek methods outlive the lock: this is sound
//! because cursors only move in `commit_write`/`next`, the producer is the
//! only thread that ever touches the write slot and the consumer the only
//! one that touches readable slots, and a slot is never simultaneously the
//! write target and readable.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::pipeline::ring::Ring;
use crate::pipeline::state::SharedState;

/// Bound on decoded frames buffered ahead of presentation.
pub const FRAME_QUEUE_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Yuv420p,
}

/// What kind of payload a frame slot currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameDesc {
    /// Slot has never been filled (or was cleared).
    #[default]
    Empty,
    Video {
        width: u32,
        height: u32,
        format: PixelFormat,
    },
    Audio {
        sample_rate: u32,
        channels: u16,
    },
}

/// One decoded frame. Video fills `data`, audio fills `samples`.
#[derive(Default)]
pub struct Frame {
    /// Packed pixel data, stride-free, plane after plane.
    pub data: Vec<u8>,
    /// Interleaved f32 samples.
    pub samples: Vec<f32>,
    /// Presentation timestamp in seconds of stream time.
    pub pts: f64,
    /// Nominal display/playback duration in seconds, `0.0` when unknown.
    pub duration: f64,
    /// Generation serial inherited from the compressed unit.
    pub serial: i32,
    pub desc: FrameDesc,
}

struct Shared {
    ring: Mutex<Ring<Frame, FRAME_QUEUE_CAPACITY>>,
    cond: Condvar,
}

/// Bounded SPSC queue of reusable decoded-frame slots.
pub struct FrameQueue {
    shared: Shared,
    state: Arc<SharedState>,
}

impl FrameQueue {
    pub fn new(state: Arc<SharedState>) -> Self {
        Self {
            shared: Shared {
                ring: Mutex::new(Ring::new(Frame::default)),
                cond: Condvar::new(),
            },
            state,
        }
    }

    /// Producer: borrow the next writable slot, blocking while full.
    ///
    /// Returns `None` once the pipeline is aborted. The caller fills the
    /// slot (reusing its buffers) and publishes it with [`commit_write`].
    ///
    /// [`commit_write`]: FrameQueue::commit_write
    pub fn peek_writable(&self) -> Option<&mut Frame> {
        let mut g = self.shared.ring.lock();
        loop {
            if self.state.is_aborted() {
                return None;
            }
            if !g.is_full() {
                break;
            }
            self.shared.cond.wait(&mut g);
        }
        // Checked non-full above; peek_write cannot be None here.
        let slot: *mut Frame = g.peek_write()?;
        drop(g);
        // Safety: single producer. Only this thread writes through the
        // write cursor, the cursor does not move until commit_write, and
        // the consumer cannot reach this slot while len < capacity keeps
        // it outside the readable window.
        Some(unsafe { &mut *slot })
    }

    /// Producer: publish the slot obtained from [`peek_writable`].
    ///
    /// [`peek_writable`]: FrameQueue::peek_writable
    pub fn commit_write(&self) {
        let mut g = self.shared.ring.lock();
        g.commit_write();
        drop(g);
        self.shared.cond.notify_one();
    }

    /// Consumer: borrow the oldest frame, blocking while empty.
    ///
    /// Returns `None` once the pipeline is aborted. The frame stays in the
    /// queue until [`next`] consumes it, so repeated calls return the same
    /// frame.
    ///
    /// [`next`]: FrameQueue::next
    pub fn peek_readable(&self) -> Option<&Frame> {
        let mut g = self.shared.ring.lock();
        loop {
            if self.state.is_aborted() {
                return None;
            }
            if !g.is_empty() {
                break;
            }
            self.shared.cond.wait(&mut g);
        }
        let slot: *const Frame = g.peek_read()?;
        drop(g);
        // Safety: single consumer, and the producer cannot recycle this
        // slot until next() advances the read cursor.
        Some(unsafe { &*slot })
    }

    /// Consumer: non-blocking [`peek_readable`].
    ///
    /// [`peek_readable`]: FrameQueue::peek_readable
    pub fn try_peek_readable(&self) -> Option<&Frame> {
        if self.state.is_aborted() {
            return None;
        }
        let g = self.shared.ring.lock();
        let slot: *const Frame = g.peek_read()?;
        drop(g);
        // Safety: same single-consumer argument as peek_readable.
        Some(unsafe { &*slot })
    }

    /// Consumer: lookahead at the frame after the current one, if queued.
    pub fn peek_next(&self) -> Option<&Frame> {
        let g = self.shared.ring.lock();
        let slot: *const Frame = g.peek_read_at(1)?;
        drop(g);
        // Safety: slot index 1 is inside the readable window, which the
        // producer never touches.
        Some(unsafe { &*slot })
    }

    /// Consumer: release the current frame's slot back to the producer.
    ///
    /// The slot's buffers are kept allocated for reuse.
    pub fn next(&self) {
        let mut g = self.shared.ring.lock();
        if g.is_empty() {
            return;
        }
        g.commit_read();
        drop(g);
        self.shared.cond.notify_one();
    }

    /// Wake every thread blocked on this queue (shutdown path; callers set
    /// the abort flag first).
    pub fn signal_all(&self) {
        self.shared.cond.notify_all();
    }

    pub fn len(&self) -> usize {
        self.shared.ring.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn queue() -> (Arc<FrameQueue>, Arc<SharedState>) {
        let state = Arc::new(SharedState::new());
        (Arc::new(FrameQueue::new(Arc::clone(&state))), state)
    }

    fn push(q: &FrameQueue, pts: f64, serial: i32) {
        let slot = q.peek_writable().unwrap();
        slot.pts = pts;
        slot.serial = serial;
        q.commit_write();
    }

    #[test]
    fn test_fifo_and_peek_stability() {
        let (q, _state) = queue();
        push(&q, 0.0, 1);
        push(&q, 0.04, 1);
        assert_eq!(q.len(), 2);
        assert_eq!(q.peek_readable().unwrap().pts, 0.0);
        // Peeking again returns the same frame.
        assert_eq!(q.peek_readable().unwrap().pts, 0.0);
        q.next();
        assert_eq!(q.peek_readable().unwrap().pts, 0.04);
        q.next();
        assert!(q.is_empty());
    }

    #[test]
    fn test_lookahead() {
        let (q, _state) = queue();
        push(&q, 0.0, 1);
        assert!(q.peek_next().is_none());
        push(&q, 0.04, 1);
        assert_eq!(q.peek_next().unwrap().pts, 0.04);
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn test_buffers_survive_recycling() {
        let (q, _state) = queue();
        {
            let slot = q.peek_writable().unwrap();
            slot.data.resize(1024, 7);
            slot.pts = 0.0;
        }
        q.commit_write();
        q.peek_readable().unwrap();
        q.next();
        // One full lap later the same slot comes around again with its
        // allocation intact. The write cursor already sits one past it, so
        // the lap is capacity minus one writes.
        for i in 0..FRAME_QUEUE_CAPACITY - 1 {
            push(&q, i as f64, 1);
            q.next();
        }
        let slot = q.peek_writable().unwrap();
        assert!(slot.data.capacity() >= 1024);
    }

    #[test]
    fn test_abort_unblocks_producer_and_consumer() {
        let (q, state) = queue();
        // Fill the queue so the producer blocks.
        for i in 0..FRAME_QUEUE_CAPACITY {
            push(&q, i as f64, 1);
        }
        let qp = Arc::clone(&q);
        let producer = thread::spawn(move || qp.peek_writable().is_none());

        let (q2, state2) = queue();
        let qc = Arc::clone(&q2);
        let consumer = thread::spawn(move || qc.peek_readable().is_none());

        thread::sleep(Duration::from_millis(50));
        state.request_abort();
        q.signal_all();
        state2.request_abort();
        q2.signal_all();

        assert!(producer.join().unwrap());
        assert!(consumer.join().unwrap());
    }

    #[test]
    fn test_try_peek_is_non_blocking() {
        let (q, _state) = queue();
        assert!(q.try_peek_readable().is_none());
        push(&q, 1.5, 2);
        assert_eq!(q.try_peek_readable().unwrap().pts, 1.5);
    }

    #[test]
    fn test_concurrent_produce_consume() {
        let (q, _state) = queue();
        let qp = Arc::clone(&q);
        let producer = thread::spawn(move || {
            for i in 0..200 {
                let slot = qp.peek_writable().unwrap();
                slot.pts = i as f64;
                qp.commit_write();
            }
        });
        let mut expected = 0.0;
        for _ in 0..200 {
            let pts = q.peek_readable().unwrap().pts;
            assert_eq!(pts, expected);
            expected += 1.0;
            q.next();
        }
        producer.join().unwrap();
        assert!(q.is_empty());
    }
}
