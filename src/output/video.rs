//! Video output sinks
//!
//! The pipeline is display-agnostic: the presenter hands finished frames to
//! a [`VideoSink`] and what happens next is the binary's business. The
//! headless sink here logs playback progress; a windowed front end would
//! implement the same trait.

use log::info;

use crate::pipeline::clock::now_secs;
use crate::pipeline::frame_queue::{Frame, FrameDesc};
use crate::pipeline::presenter::VideoSink;

const REPORT_INTERVAL_SECS: f64 = 1.0;

/// Headless sink: consumes frames and logs position once a second.
pub struct StatsSink {
    frames: u64,
    last_report: f64,
}

impl StatsSink {
    pub fn new() -> Self {
        Self {
            frames: 0,
            last_report: 0.0,
        }
    }
}

impl Default for StatsSink {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoSink for StatsSink {
    fn display(&mut self, frame: &Frame) -> anyhow::Result<()> {
        self.frames += 1;
        let now = now_secs();
        if now - self.last_report >= REPORT_INTERVAL_SECS {
            if let FrameDesc::Video { width, height, .. } = frame.desc {
                info!(
                    "video: pts {:.3}s, {}x{}, {} frames shown",
                    frame.pts, width, height, self.frames
                );
            } else {
                info!("video: pts {:.3}s, {} frames shown", frame.pts, self.frames);
            }
            self.last_report = now;
        }
        Ok(())
    }
}
