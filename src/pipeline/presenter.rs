//! Video frame presenter
//!
//! Polled pacing loop: each call looks at the head of the video frame
//! queue, decides via [`sync::adjust_delay`] whether the frame is due, and
//! either shows it, keeps waiting, or drops it when the one-frame lookahead
//! proves it is already obsolete. Runs on the caller's thread (the main
//! loop), never its own.
//!
//! # Design
//!
//! The internal `frame_timer` advances by the adjusted delay of each shown
//! frame rather than snapping to the wall clock, so pacing error does not
//! accumulate; it only resnaps when it has fallen further behind than
//! [`SYNC_THRESHOLD_MAX`].
//!
//! [`sync::adjust_delay`]: crate::pipeline::sync::adjust_delay

use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};

use log::{debug, info};

use crate::pipeline::clock::PlaybackClock;
use crate::pipeline::frame_queue::{Frame, FrameQueue};
use crate::pipeline::state::SharedState;
use crate::pipeline::sync::{SYNC_THRESHOLD_MAX, adjust_delay};

const STATS_INTERVAL_SECS: f64 = 5.0;

/// Where shown frames go. The main loop supplies the implementation.
pub trait VideoSink {
    fn display(&mut self, frame: &Frame) -> anyhow::Result<()>;
}

/// Pacing state for the video stream.
pub struct VideoPresenter {
    frames: Arc<FrameQueue>,
    queue_serial: Arc<AtomicI32>,
    video_clock: Arc<PlaybackClock>,
    master_clock: Arc<PlaybackClock>,
    state: Arc<SharedState>,
    /// Wall time the current frame became (or will become) due.
    frame_timer: f64,
    last_pts: f64,
    last_delay: f64,
    last_serial: i32,
    frames_shown: u64,
    frames_dropped: u64,
    last_stats: f64,
}

impl VideoPresenter {
    pub fn new(
        frames: Arc<FrameQueue>,
        queue_serial: Arc<AtomicI32>,
        video_clock: Arc<PlaybackClock>,
        master_clock: Arc<PlaybackClock>,
        state: Arc<SharedState>,
    ) -> Self {
        Self {
            frames,
            queue_serial,
            video_clock,
            master_clock,
            state,
            frame_timer: 0.0,
            last_pts: f64::NAN,
            last_delay: 0.04,
            last_serial: -1,
            frames_shown: 0,
            frames_dropped: 0,
            last_stats: 0.0,
        }
    }

    pub fn frames_shown(&self) -> u64 {
        self.frames_shown
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped
    }

    /// Advance presentation by at most one frame.
    ///
    /// Returns `true` when a frame was shown or dropped, `false` when there
    /// is nothing due yet. Call it frequently; it never blocks.
    pub fn poll(&mut self, now: f64, sink: &mut dyn VideoSink) -> anyhow::Result<bool> {
        if self.state.is_aborted() || self.state.is_paused() {
            return Ok(false);
        }
        self.log_stats(now);

        // Discard frames from a previous generation outright.
        let (pts, serial) = loop {
            let Some(frame) = self.frames.try_peek_readable() else {
                return Ok(false);
            };
            if frame.serial == self.queue_serial.load(Ordering::SeqCst) {
                break (frame.pts, frame.serial);
            }
            self.frames.next();
            self.frames_dropped += 1;
        };

        if serial != self.last_serial && self.last_serial != -1 {
            // Seek discontinuity; restart pacing from here. Latch the new
            // serial immediately so the reset fires exactly once per
            // generation change. (The initial frame_timer of 0.0 makes the
            // very first frame of playback due at once instead.)
            self.frame_timer = now;
            self.last_pts = f64::NAN;
            self.last_serial = serial;
        }

        let mut raw_delay = pts - self.last_pts;
        if !(raw_delay > 0.0) || raw_delay >= 1.0 {
            // First frame, backwards pts, or an implausible gap.
            raw_delay = self.last_delay;
        }

        let diff = pts - self.master_clock.get_at(now);
        let delay = adjust_delay(raw_delay, diff);

        if now < self.frame_timer + delay {
            return Ok(false);
        }
        self.frame_timer += delay;
        if delay > 0.0 && now - self.frame_timer > SYNC_THRESHOLD_MAX {
            self.frame_timer = now;
        }

        self.video_clock.set_at(pts, serial, now);
        self.last_pts = pts;
        self.last_delay = delay;
        self.last_serial = serial;

        // If the following frame is also already due, this one is obsolete:
        // skip straight past it without displaying.
        let obsolete = match self.frames.peek_next() {
            Some(next) => next.serial == serial && now > self.frame_timer + (next.pts - pts),
            None => false,
        };
        if obsolete {
            debug!("dropping late video frame at pts {pts:.3}");
            self.frames.next();
            self.frames_dropped += 1;
            return Ok(true);
        }

        if let Some(frame) = self.frames.try_peek_readable() {
            sink.display(frame)?;
        }
        self.frames.next();
        self.frames_shown += 1;
        Ok(true)
    }

    fn log_stats(&mut self, now: f64) {
        if now - self.last_stats < STATS_INTERVAL_SECS {
            return;
        }
        if self.last_stats > 0.0 {
            info!(
                "video: {} shown, {} dropped, clock {:.3}s, master diff {:+.3}s",
                self.frames_shown,
                self.frames_dropped,
                self.video_clock.get_at(now),
                self.video_clock.get_at(now) - self.master_clock.get_at(now)
            );
        }
        self.last_stats = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CollectSink {
        shown: Vec<(f64, i32)>,
    }

    impl CollectSink {
        fn new() -> Self {
            Self { shown: Vec::new() }
        }
    }

    impl VideoSink for CollectSink {
        fn display(&mut self, frame: &Frame) -> anyhow::Result<()> {
            self.shown.push((frame.pts, frame.serial));
            Ok(())
        }
    }

    struct Rig {
        frames: Arc<FrameQueue>,
        serial: Arc<AtomicI32>,
        master: Arc<PlaybackClock>,
        state: Arc<SharedState>,
        presenter: VideoPresenter,
    }

    fn rig() -> Rig {
        let state = Arc::new(SharedState::new());
        let frames = Arc::new(FrameQueue::new(Arc::clone(&state)));
        let serial = Arc::new(AtomicI32::new(1));
        let video_clock = Arc::new(PlaybackClock::new(Arc::clone(&serial)));
        let master = Arc::new(PlaybackClock::new(Arc::clone(&serial)));
        let presenter = VideoPresenter::new(
            Arc::clone(&frames),
            Arc::clone(&serial),
            video_clock,
            Arc::clone(&master),
            Arc::clone(&state),
        );
        Rig {
            frames,
            serial,
            master,
            state,
            presenter,
        }
    }

    fn push(frames: &FrameQueue, pts: f64, serial: i32) {
        let slot = frames.peek_writable().unwrap();
        slot.pts = pts;
        slot.duration = 0.04;
        slot.serial = serial;
        frames.commit_write();
    }

    #[test]
    fn test_frame_not_due_is_not_shown() {
        let mut r = rig();
        r.master.set_at(0.0, 1, 100.0);
        push(&r.frames, 0.0, 1);
        let mut sink = CollectSink::new();
        // The very first frame is due immediately.
        assert!(r.presenter.poll(100.0, &mut sink).unwrap());
        push(&r.frames, 0.04, 1);
        // 10ms later the next frame (due at +40ms) is still waiting.
        assert!(!r.presenter.poll(100.01, &mut sink).unwrap());
        assert_eq!(sink.shown.len(), 1);
        // At its due time it shows.
        assert!(r.presenter.poll(100.05, &mut sink).unwrap());
        assert_eq!(sink.shown, vec![(0.0, 1), (0.04, 1)]);
    }

    #[test]
    fn test_in_sync_stream_plays_in_order() {
        let mut r = rig();
        r.master.set_at(0.0, 1, 100.0);
        for i in 0..5 {
            push(&r.frames, i as f64 * 0.04, 1);
        }
        let mut sink = CollectSink::new();
        let mut now = 100.0;
        // Poll densely; pacing decides which polls show a frame.
        while now < 100.3 {
            r.presenter.poll(now, &mut sink).unwrap();
            now += 0.005;
        }
        let pts: Vec<f64> = sink.shown.iter().map(|(p, _)| *p).collect();
        assert_eq!(pts, vec![0.0, 0.04, 0.08, 0.12, 0.16]);
        assert_eq!(r.presenter.frames_dropped(), 0);
    }

    #[test]
    fn test_stale_serial_frames_are_discarded() {
        let mut r = rig();
        r.master.set_at(5.0, 2, 100.0);
        push(&r.frames, 0.0, 1);
        push(&r.frames, 0.04, 1);
        r.serial.store(2, Ordering::SeqCst);
        push(&r.frames, 5.0, 2);

        let mut sink = CollectSink::new();
        assert!(r.presenter.poll(100.0, &mut sink).unwrap());
        assert_eq!(r.presenter.frames_dropped(), 2);
        assert_eq!(sink.shown, vec![(5.0, 2)]);
    }

    #[test]
    fn test_obsolete_frame_is_dropped_via_lookahead() {
        let mut r = rig();
        // Master clock a second ahead of every queued frame.
        r.master.set_at(1.0, 1, 100.0);
        push(&r.frames, 0.0, 1);
        push(&r.frames, 0.04, 1);
        push(&r.frames, 0.08, 1);
        let mut sink = CollectSink::new();
        // Late frames get a zero delay; once wall time has moved past the
        // inter-frame gap, lookahead dropping kicks in.
        r.presenter.poll(100.0, &mut sink).unwrap();
        r.presenter.poll(100.1, &mut sink).unwrap();
        r.presenter.poll(100.1, &mut sink).unwrap();
        assert!(r.presenter.frames_dropped() >= 1);
        // The queue fully drains without stalling.
        assert!(r.frames.is_empty());
    }

    #[test]
    fn test_presentation_resumes_after_seek() {
        let mut r = rig();
        r.master.set_at(0.0, 1, 100.0);
        push(&r.frames, 0.0, 1);
        let mut sink = CollectSink::new();
        assert!(r.presenter.poll(100.0, &mut sink).unwrap());

        // Seek: new generation far from the master clock, which stays
        // anchored at the old position until a new frame is shown.
        r.serial.store(2, Ordering::SeqCst);
        push(&r.frames, 60.0, 2);
        push(&r.frames, 60.04, 2);

        // First poll after the discontinuity restarts pacing and waits.
        assert!(!r.presenter.poll(100.5, &mut sink).unwrap());
        // Pacing must then run from the restarted timer, not restart again:
        // one nominal frame interval later the frame is due.
        assert!(r.presenter.poll(100.56, &mut sink).unwrap());
        assert!(r.presenter.poll(100.6, &mut sink).unwrap());
        assert_eq!(sink.shown, vec![(0.0, 1), (60.0, 2), (60.04, 2)]);
        assert_eq!(r.presenter.frames_dropped(), 0);
        assert!(r.frames.is_empty());
    }

    #[test]
    fn test_paused_presenter_does_nothing() {
        let mut r = rig();
        push(&r.frames, 0.0, 1);
        r.state.set_paused(true);
        let mut sink = CollectSink::new();
        assert!(!r.presenter.poll(100.0, &mut sink).unwrap());
        assert!(sink.shown.is_empty());
        assert_eq!(r.frames.len(), 1);
    }

    #[test]
    fn test_video_clock_anchored_on_show() {
        let mut r = rig();
        r.master.set_at(0.0, 1, 100.0);
        push(&r.frames, 0.0, 1);
        let mut sink = CollectSink::new();
        assert!(r.presenter.poll(100.0, &mut sink).unwrap());
        assert_eq!(r.presenter.video_clock.get_at(100.0), 0.0);
        assert_eq!(r.presenter.video_clock.serial(), 1);
    }
}
