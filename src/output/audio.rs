//! Audio device output
//!
//! The device callback is the pacing authority for audio: it drains the
//! audio frame queue at exactly the device rate and re-anchors the audio
//! clock with every buffer it fills, which is what every other component
//! syncs against. [`AudioFeed`] holds the callback's state and is testable
//! without a device; [`AudioOutput`] wires it to a cpal stream.

use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};

use anyhow::{Context, anyhow};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use log::{error, info, warn};

use crate::pipeline::clock::PlaybackClock;
use crate::pipeline::frame_queue::{FrameDesc, FrameQueue};
use crate::pipeline::state::SharedState;

/// Output format negotiated with (or assumed for) the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioParams {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for AudioParams {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
        }
    }
}

/// Callback-side consumer of the audio frame queue.
///
/// `fill` never blocks and never allocates: a starved queue produces
/// silence, not a stalled device thread.
pub struct AudioFeed {
    frames: Arc<FrameQueue>,
    queue_serial: Arc<AtomicI32>,
    clock: Arc<PlaybackClock>,
    state: Arc<SharedState>,
    params: AudioParams,
    /// Read position in the current frame's sample buffer.
    offset: usize,
    warned_mismatch: bool,
}

impl AudioFeed {
    pub fn new(
        frames: Arc<FrameQueue>,
        queue_serial: Arc<AtomicI32>,
        clock: Arc<PlaybackClock>,
        state: Arc<SharedState>,
        params: AudioParams,
    ) -> Self {
        Self {
            frames,
            queue_serial,
            clock,
            state,
            params,
            offset: 0,
            warned_mismatch: false,
        }
    }

    /// Fill one device buffer with interleaved samples.
    pub fn fill(&mut self, out: &mut [f32]) {
        if self.state.is_aborted() || self.state.is_paused() {
            out.fill(0.0);
            return;
        }
        let mut written = 0;
        while written < out.len() {
            let Some(frame) = self.frames.try_peek_readable() else {
                break;
            };
            if frame.serial != self.queue_serial.load(Ordering::SeqCst) {
                self.offset = 0;
                self.frames.next();
                continue;
            }
            let ok = matches!(
                frame.desc,
                FrameDesc::Audio { channels, .. } if channels == self.params.channels
            );
            if !ok {
                if !self.warned_mismatch {
                    warn!("audio: skipping frame with unexpected layout {:?}", frame.desc);
                    self.warned_mismatch = true;
                }
                self.offset = 0;
                self.frames.next();
                continue;
            }

            let avail = &frame.samples[self.offset..];
            let n = avail.len().min(out.len() - written);
            out[written..written + n].copy_from_slice(&avail[..n]);
            written += n;
            self.offset += n;

            // Anchor the clock at the exact stream position of the last
            // sample handed to the device.
            let consumed = (self.offset / self.params.channels as usize) as f64
                / self.params.sample_rate as f64;
            self.clock.set(frame.pts + consumed, frame.serial);

            if self.offset >= frame.samples.len() {
                self.offset = 0;
                self.frames.next();
            }
        }
        // Starved: pad with silence rather than repeating stale samples.
        out[written..].fill(0.0);
    }
}

/// Open cpal stream feeding from an [`AudioFeed`].
pub struct AudioOutput {
    stream: cpal::Stream,
    params: AudioParams,
}

impl AudioOutput {
    /// Open the default output device and start playback.
    pub fn open(mut feed: AudioFeed, params: AudioParams) -> anyhow::Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| anyhow!("no audio output device available"))?;
        info!(
            "audio: opening output device ({} Hz, {} ch)",
            params.sample_rate, params.channels
        );

        let config = cpal::StreamConfig {
            channels: params.channels,
            sample_rate: params.sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };
        let stream = device
            .build_output_stream(
                &config,
                move |out: &mut [f32], _| feed.fill(out),
                |err| error!("audio: stream error: {err}"),
                None,
            )
            .context("failed to build audio output stream")?;
        stream.play().context("failed to start audio stream")?;
        Ok(Self { stream, params })
    }

    pub fn params(&self) -> AudioParams {
        self.params
    }

    /// Pause or resume the device stream.
    pub fn set_paused(&self, paused: bool) {
        let result = if paused {
            self.stream.pause().map_err(anyhow::Error::from)
        } else {
            self.stream.play().map_err(anyhow::Error::from)
        };
        if let Err(err) = result {
            warn!("audio: pause/play failed: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Rig {
        frames: Arc<FrameQueue>,
        serial: Arc<AtomicI32>,
        clock: Arc<PlaybackClock>,
        state: Arc<SharedState>,
        feed: AudioFeed,
    }

    fn rig() -> Rig {
        let state = Arc::new(SharedState::new());
        let frames = Arc::new(FrameQueue::new(Arc::clone(&state)));
        let serial = Arc::new(AtomicI32::new(1));
        let clock = Arc::new(PlaybackClock::new(Arc::clone(&serial)));
        let feed = AudioFeed::new(
            Arc::clone(&frames),
            Arc::clone(&serial),
            Arc::clone(&clock),
            Arc::clone(&state),
            AudioParams::default(),
        );
        Rig {
            frames,
            serial,
            clock,
            state,
            feed,
        }
    }

    fn push_audio(frames: &FrameQueue, pts: f64, serial: i32, stereo_samples: usize, value: f32) {
        let slot = frames.peek_writable().unwrap();
        slot.samples.clear();
        slot.samples.resize(stereo_samples * 2, value);
        slot.data.clear();
        slot.pts = pts;
        slot.serial = serial;
        slot.desc = FrameDesc::Audio {
            sample_rate: 48_000,
            channels: 2,
        };
        frames.commit_write();
    }

    #[test]
    fn test_fill_copies_and_advances_clock() {
        let mut r = rig();
        push_audio(&r.frames, 1.0, 1, 480, 0.5);
        let mut out = [0.0f32; 960];
        r.feed.fill(&mut out);
        assert!(out.iter().all(|&s| s == 0.5));
        // Frame fully consumed: clock sits at pts + 10ms of samples.
        assert!((r.clock.get() - 1.01).abs() < 0.05);
        assert!(r.frames.is_empty());
    }

    #[test]
    fn test_partial_frame_consumption_spans_fills() {
        let mut r = rig();
        push_audio(&r.frames, 0.0, 1, 480, 0.25);
        let mut out = [0.0f32; 400];
        r.feed.fill(&mut out);
        assert!(out.iter().all(|&s| s == 0.25));
        assert_eq!(r.frames.len(), 1);
        let mut rest = [0.0f32; 560];
        r.feed.fill(&mut rest);
        assert!(rest.iter().all(|&s| s == 0.25));
        assert!(r.frames.is_empty());
    }

    #[test]
    fn test_starved_queue_emits_silence() {
        let mut r = rig();
        push_audio(&r.frames, 0.0, 1, 100, 1.0);
        let mut out = [9.0f32; 960];
        r.feed.fill(&mut out);
        assert!(out[..200].iter().all(|&s| s == 1.0));
        assert!(out[200..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_paused_feed_is_silent_and_keeps_frames() {
        let mut r = rig();
        push_audio(&r.frames, 0.0, 1, 480, 1.0);
        r.state.set_paused(true);
        let mut out = [9.0f32; 960];
        r.feed.fill(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(r.frames.len(), 1);
    }

    #[test]
    fn test_stale_serial_frames_are_skipped() {
        let mut r = rig();
        push_audio(&r.frames, 0.0, 1, 480, 1.0);
        r.serial.store(2, Ordering::SeqCst);
        push_audio(&r.frames, 10.0, 2, 480, 0.75);
        let mut out = [0.0f32; 960];
        r.feed.fill(&mut out);
        assert!(out.iter().all(|&s| s == 0.75));
        assert_eq!(r.clock.serial(), 2);
    }

    #[test]
    fn test_non_audio_frame_is_skipped_once_warned() {
        let mut r = rig();
        {
            let slot = r.frames.peek_writable().unwrap();
            slot.desc = FrameDesc::Empty;
            slot.serial = 1;
            r.frames.commit_write();
        }
        push_audio(&r.frames, 0.0, 1, 480, 0.5);
        let mut out = [0.0f32; 960];
        r.feed.fill(&mut out);
        assert!(out.iter().all(|&s| s == 0.5));
    }
}
