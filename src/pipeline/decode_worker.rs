//! Per-stream decode worker
//!
//! One worker thread per elementary stream: pull compressed units from the
//! stream's [`PacketQueue`], run them through the [`StreamDecoder`], and
//! write decoded frames into the stream's [`FrameQueue`] slots. The worker
//! stamps every frame with the serial of the unit that produced it, so
//! stale frames are detectable downstream after a seek.
//!
//! # Design
//!
//! Backpressure is entirely passive: the worker blocks on an empty packet
//! queue and on a full frame queue, nothing else throttles it. Soft decode
//! errors drop the offending unit and keep going; only abort ends the loop.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, info, warn};

use crate::engine::{DrainStatus, StreamDecoder, StreamKind};
use crate::pipeline::frame_queue::FrameQueue;
use crate::pipeline::packet_queue::PacketQueue;
use crate::pipeline::sync::pts_to_seconds;

/// Decode loop for one elementary stream.
pub struct DecodeWorker<D: StreamDecoder> {
    stream: StreamKind,
    packets: Arc<PacketQueue<D::Unit>>,
    frames: Arc<FrameQueue>,
    decoder: D,
    /// Serial of the last unit fed; a change means a seek happened.
    last_serial: i32,
    frames_decoded: u64,
    units_dropped: u64,
}

impl<D: StreamDecoder + 'static> DecodeWorker<D> {
    pub fn new(
        stream: StreamKind,
        packets: Arc<PacketQueue<D::Unit>>,
        frames: Arc<FrameQueue>,
        decoder: D,
    ) -> Self {
        Self {
            stream,
            packets,
            frames,
            decoder,
            last_serial: -1,
            frames_decoded: 0,
            units_dropped: 0,
        }
    }

    /// Spawn the worker on a named thread.
    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(format!("{}-decode", self.stream))
            .spawn(move || self.run())
    }

    /// Run the decode loop until the packet queue aborts.
    pub fn run(mut self) {
        info!("{} decode worker started", self.stream);
        loop {
            let Ok((unit, serial)) = self.packets.get() else {
                break;
            };
            // Leftover from before a flush; the queue already moved on.
            if serial != self.packets.serial() {
                self.units_dropped += 1;
                continue;
            }
            if serial != self.last_serial {
                if self.last_serial != -1 {
                    debug!(
                        "{} decoder reset, serial {} -> {}",
                        self.stream, self.last_serial, serial
                    );
                    self.decoder.reset();
                }
                self.last_serial = serial;
            }
            if let Err(err) = self.decoder.feed(unit) {
                warn!("{} decode: dropped unit: {err}", self.stream);
                self.units_dropped += 1;
                continue;
            }
            if !self.drain(serial) {
                break;
            }
        }
        info!(
            "{} decode worker stopped: {} frames decoded, {} units dropped",
            self.stream, self.frames_decoded, self.units_dropped
        );
    }

    /// Drain every frame the decoder has buffered into the frame queue.
    ///
    /// Returns `false` when the pipeline aborted while waiting for a slot.
    fn drain(&mut self, serial: i32) -> bool {
        loop {
            let Some(slot) = self.frames.peek_writable() else {
                return false;
            };
            match self.decoder.drain_into(slot) {
                Ok(DrainStatus::Frame {
                    raw_pts,
                    raw_duration,
                }) => {
                    let tb = self.decoder.time_base();
                    slot.pts = pts_to_seconds(raw_pts, tb);
                    slot.duration = if raw_duration > 0 {
                        raw_duration as f64 * tb
                    } else {
                        0.0
                    };
                    slot.serial = serial;
                    self.frames.commit_write();
                    self.frames_decoded += 1;
                }
                Ok(DrainStatus::NeedsInput) => return true,
                Ok(DrainStatus::EndOfStream) => {
                    debug!("{} decoder drained to end of stream", self.stream);
                    self.decoder.reset();
                    return true;
                }
                Err(err) => {
                    warn!("{} decode: drain failed: {err}", self.stream);
                    return true;
                }
            }
        }
    }
}
