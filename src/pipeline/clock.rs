//! Drift-compensated playback clocks
//!
//! Each stream owns a [`PlaybackClock`] that tracks media time without being
//! ticked: the clock stores the drift between the last anchored pts and the
//! wall time of anchoring, so reading it is just `drift + now`. Pausing
//! freezes the reading; resuming recomputes the drift so the reading
//! continues from the frozen value.
//!
//! # Thread Safety
//!
//! A small mutex guards the anchor state. Readers include the audio device
//! callback, so the critical sections are a handful of float operations.

use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Instant;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Monotonic seconds since process start.
pub fn now_secs() -> f64 {
    EPOCH.elapsed().as_secs_f64()
}

struct ClockInner {
    /// Last anchored media pts in seconds; NAN before the first anchor.
    pts: f64,
    /// `pts - anchor_time`; reading the clock is `drift + now`.
    drift: f64,
    paused: bool,
}

/// Media-time clock anchored to pts observations.
pub struct PlaybackClock {
    inner: Mutex<ClockInner>,
    /// Serial of the last anchor, -1 before the first.
    serial: AtomicI32,
    /// Serial of the queue this clock paces, for staleness checks.
    queue_serial: Arc<AtomicI32>,
}

impl PlaybackClock {
    pub fn new(queue_serial: Arc<AtomicI32>) -> Self {
        Self {
            inner: Mutex::new(ClockInner {
                pts: f64::NAN,
                drift: f64::NAN,
                paused: false,
            }),
            serial: AtomicI32::new(-1),
            queue_serial,
        }
    }

    /// Current media time in seconds. NAN until the first [`set`].
    ///
    /// [`set`]: PlaybackClock::set
    pub fn get(&self) -> f64 {
        self.get_at(now_secs())
    }

    /// Clock reading as of the given wall time.
    pub fn get_at(&self, time: f64) -> f64 {
        let g = self.inner.lock();
        if g.paused { g.pts } else { g.drift + time }
    }

    /// Anchor the clock at `pts` now.
    pub fn set(&self, pts: f64, serial: i32) {
        self.set_at(pts, serial, now_secs());
    }

    /// Anchor the clock at `pts` as of the given wall time.
    pub fn set_at(&self, pts: f64, serial: i32, time: f64) {
        let mut g = self.inner.lock();
        g.pts = pts;
        g.drift = pts - time;
        drop(g);
        self.serial.store(serial, Ordering::SeqCst);
    }

    /// Freeze or unfreeze the clock.
    ///
    /// On pause the current reading is captured as the frozen pts; on
    /// resume the drift is recomputed so the reading continues from it.
    pub fn set_paused(&self, paused: bool) {
        let now = now_secs();
        let mut g = self.inner.lock();
        if paused && !g.paused {
            g.pts = g.drift + now;
        } else if !paused && g.paused {
            g.drift = g.pts - now;
        }
        g.paused = paused;
    }

    /// Serial of the last anchor.
    pub fn serial(&self) -> i32 {
        self.serial.load(Ordering::SeqCst)
    }

    /// Whether this clock's last anchor matches its queue's generation.
    pub fn is_current(&self) -> bool {
        self.serial() == self.queue_serial.load(Ordering::SeqCst)
    }
}
