//! Compressed-unit queue between the read loop and a decode worker
//!
//! Holds demuxed, still-encoded units together with the generation serial
//! they were enqueued under. A seek flushes the queue and bumps the serial,
//! so downstream consumers can tell pre-seek leftovers from fresh data
//! without any extra signalling channel.
//!
//! # Design
//!
//! A new queue starts in the aborted state and accepts nothing until
//! [`start`] is called; this makes "not yet armed" and "shut down"
//! indistinguishable to producers, which is exactly right for both.
//!
//! # Thread Safety
//!
//! All state lives behind one [`parking_lot::Mutex`] with a [`Condvar`] for
//! blocked consumers. The serial is additionally mirrored in an
//! [`AtomicI32`] so the presenter and audio callback can read it without
//! touching the queue lock; it is only ever written while the lock is held.
//!
//! [`start`]: PacketQueue::start

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::engine::CompressedUnit;
use crate::pipeline::ring::Ring;

/// Bound on buffered compressed units per stream.
pub const PACKET_QUEUE_CAPACITY: usize = 256;

/// Rejected `put`. The unit travels back to the caller in both variants.
pub enum PutError<U> {
    /// The queue is at capacity; retry later.
    Full(U),
    /// The queue is aborted; the unit will never be accepted.
    Aborted(U),
}

impl<U> fmt::Debug for PutError<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PutError::Full(_) => write!(f, "PutError::Full(..)"),
            PutError::Aborted(_) => write!(f, "PutError::Aborted(..)"),
        }
    }
}

impl<U> fmt::Display for PutError<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PutError::Full(_) => write!(f, "packet queue full"),
            PutError::Aborted(_) => write!(f, "packet queue aborted"),
        }
    }
}

impl<U> std::error::Error for PutError<U> {}

/// The queue was aborted while a consumer was waiting.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("pipeline aborted")]
pub struct Aborted;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TryGetError {
    #[error("packet queue empty")]
    Empty,
    #[error("pipeline aborted")]
    Aborted,
}

struct Entry<U> {
    unit: Option<U>,
    serial: i32,
}

impl<U> Default for Entry<U> {
    fn default() -> Self {
        Self {
            unit: None,
            serial: 0,
        }
    }
}

struct Inner<U> {
    ring: Ring<Entry<U>, PACKET_QUEUE_CAPACITY>,
    /// Total payload bytes currently queued.
    size: usize,
    /// Total queued duration in stream time-base units.
    duration: i64,
    abort: bool,
}

/// Bounded FIFO of compressed units tagged with a generation serial.
pub struct PacketQueue<U: CompressedUnit> {
    inner: Mutex<Inner<U>>,
    cond: Condvar,
    serial: Arc<AtomicI32>,
}

impl<U: CompressedUnit> PacketQueue<U> {
    /// Create a queue in the aborted state with serial 0.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                ring: Ring::new(Entry::default),
                size: 0,
                duration: 0,
                abort: true,
            }),
            cond: Condvar::new(),
            serial: Arc::new(AtomicI32::new(0)),
        }
    }

    /// Arm the queue: clear the abort flag and open a new generation.
    pub fn start(&self) {
        let mut g = self.inner.lock();
        g.abort = false;
        self.serial.fetch_add(1, Ordering::SeqCst);
    }

    /// Shut the queue down and wake every blocked consumer.
    pub fn abort(&self) {
        let mut g = self.inner.lock();
        g.abort = true;
        drop(g);
        self.cond.notify_all();
    }

    /// Enqueue one unit under the current serial.
    ///
    /// Never blocks. A [`PutError::Full`] result hands the unit back so the
    /// caller can retry it after a delay.
    pub fn put(&self, unit: U) -> Result<(), PutError<U>> {
        let mut g = self.inner.lock();
        if g.abort {
            return Err(PutError::Aborted(unit));
        }
        if g.ring.is_full() {
            return Err(PutError::Full(unit));
        }
        g.size += unit.size();
        g.duration += unit.duration();
        let entry = Entry {
            unit: Some(unit),
            serial: self.serial.load(Ordering::SeqCst),
        };
        // Cannot fail: fullness was checked under the same lock.
        let _ = g.ring.put(entry);
        drop(g);
        self.cond.notify_one();
        Ok(())
    }

    /// Dequeue the oldest unit, blocking while the queue is empty.
    ///
    /// Returns the unit with the serial it was enqueued under. Errs only
    /// when the queue is aborted, before or during the wait.
    pub fn get(&self) -> Result<(U, i32), Aborted> {
        let mut g = self.inner.lock();
        loop {
            if g.abort {
                return Err(Aborted);
            }
            if let Some(entry) = g.ring.get() {
                if let Some(unit) = entry.unit {
                    g.size -= unit.size();
                    g.duration -= unit.duration();
                    return Ok((unit, entry.serial));
                }
                continue;
            }
            self.cond.wait(&mut g);
        }
    }

    /// Non-blocking variant of [`get`].
    ///
    /// [`get`]: PacketQueue::get
    pub fn try_get(&self) -> Result<(U, i32), TryGetError> {
        let mut g = self.inner.lock();
        loop {
            if g.abort {
                return Err(TryGetError::Aborted);
            }
            let Some(entry) = g.ring.get() else {
                return Err(TryGetError::Empty);
            };
            if let Some(unit) = entry.unit {
                g.size -= unit.size();
                g.duration -= unit.duration();
                return Ok((unit, entry.serial));
            }
        }
    }

    /// Discard all queued units and open a new generation.
    ///
    /// Units already handed to a consumer keep their old serial, which is
    /// how the consumer learns a discontinuity happened.
    pub fn flush(&self) {
        let mut g = self.inner.lock();
        while g.ring.get().is_some() {}
        g.size = 0;
        g.duration = 0;
        self.serial.fetch_add(1, Ordering::SeqCst);
    }

    /// Queued unit count.
    pub fn len(&self) -> usize {
        self.inner.lock().ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total queued payload bytes.
    pub fn size(&self) -> usize {
        self.inner.lock().size
    }

    /// Total queued duration in stream time-base units.
    pub fn duration(&self) -> i64 {
        self.inner.lock().duration
    }

    /// Current generation serial.
    pub fn serial(&self) -> i32 {
        self.serial.load(Ordering::SeqCst)
    }

    /// Lock-free handle to the serial for hot-path readers.
    pub fn serial_handle(&self) -> Arc<AtomicI32> {
        Arc::clone(&self.serial)
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.lock().abort
    }
}

impl<U: CompressedUnit> Default for PacketQueue<U> {
    fn default() -> Self {
        Self::new()
    }
}
