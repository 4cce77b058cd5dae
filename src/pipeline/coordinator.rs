//! Pipeline orchestrator
//!
//! Owns the whole playback graph: the demux read loop, one packet queue,
//! frame queue and decode worker per selected stream, the per-stream
//! clocks, the audio device output and the video presenter. The binary
//! talks to [`Player`] and nothing below it.
//!
//! # Design
//!
//! Construction and startup are separate phases: `new` only wires the
//! graph, `start` arms the queues and spawns threads. Seeks are posted into
//! a mailbox serviced by the read loop, so demuxer access stays on one
//! thread. Shutdown is cooperative: set the abort flag, wake every blocked
//! thread through its own queue, then join.
//!
//! # Thread Safety
//!
//! `Player` itself lives on the main thread (the cpal stream it owns is
//! not sendable on every platform). Everything it shares with workers is
//! behind `Arc`.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, bail};
use log::{info, warn};
use parking_lot::Mutex;

use crate::engine::{CompressedUnit, MediaSource, SourceRead, StreamDecoder, StreamKind};
use crate::output::audio::{AudioFeed, AudioOutput, AudioParams};
use crate::pipeline::clock::{PlaybackClock, now_secs};
use crate::pipeline::decode_worker::DecodeWorker;
use crate::pipeline::frame_queue::FrameQueue;
use crate::pipeline::packet_queue::{PacketQueue, PutError};
use crate::pipeline::presenter::{VideoPresenter, VideoSink};
use crate::pipeline::state::SharedState;

/// Delay before retrying a full queue or a dry source.
const READ_RETRY: Duration = Duration::from_millis(10);

type BoxedDecoder<U> = Box<dyn StreamDecoder<Unit = U>>;

/// Queues for one selected elementary stream.
struct StreamPipeline<U: CompressedUnit> {
    packets: Arc<PacketQueue<U>>,
    frames: Arc<FrameQueue>,
    clock: Arc<PlaybackClock>,
}

impl<U: CompressedUnit> StreamPipeline<U> {
    fn new(state: &Arc<SharedState>) -> Self {
        let packets = Arc::new(PacketQueue::new());
        let clock = Arc::new(PlaybackClock::new(packets.serial_handle()));
        Self {
            packets,
            frames: Arc::new(FrameQueue::new(Arc::clone(state))),
            clock,
        }
    }
}

/// The assembled playback pipeline for one media source.
pub struct Player<S: MediaSource + 'static> {
    state: Arc<SharedState>,
    video: Option<StreamPipeline<S::Unit>>,
    audio: Option<StreamPipeline<S::Unit>>,
    presenter: Option<VideoPresenter>,
    audio_out: Option<AudioOutput>,
    audio_params: AudioParams,
    /// Pending absolute seek target in seconds, serviced by the read loop.
    seek: Arc<Mutex<Option<f64>>>,
    threads: Vec<JoinHandle<()>>,
    // Consumed by start().
    source: Option<S>,
    video_decoder: Option<BoxedDecoder<S::Unit>>,
    audio_decoder: Option<BoxedDecoder<S::Unit>>,
    started: bool,
}

impl<S: MediaSource + 'static> Player<S> {
    /// Wire the playback graph for the streams that have a decoder.
    ///
    /// Nothing runs until [`start`] is called.
    ///
    /// [`start`]: Player::start
    pub fn new(
        source: S,
        video_decoder: Option<BoxedDecoder<S::Unit>>,
        audio_decoder: Option<BoxedDecoder<S::Unit>>,
        audio_params: AudioParams,
    ) -> anyhow::Result<Self> {
        if video_decoder.is_none() && audio_decoder.is_none() {
            bail!("no playable streams");
        }
        let state = Arc::new(SharedState::new());
        let video = video_decoder.is_some().then(|| StreamPipeline::new(&state));
        let audio = audio_decoder.is_some().then(|| StreamPipeline::new(&state));
        Ok(Self {
            state,
            video,
            audio,
            presenter: None,
            audio_out: None,
            audio_params,
            seek: Arc::new(Mutex::new(None)),
            threads: Vec::new(),
            source: Some(source),
            video_decoder,
            audio_decoder,
            started: false,
        })
    }

    /// Arm the queues, open the audio device and spawn all worker threads.
    pub fn start(&mut self) -> anyhow::Result<()> {
        if self.started {
            return Ok(());
        }
        self.started = true;

        // Audio is best-effort: a missing device degrades to video-only
        // playback instead of failing the whole pipeline.
        if let Some(audio) = &self.audio {
            let feed = AudioFeed::new(
                Arc::clone(&audio.frames),
                audio.packets.serial_handle(),
                Arc::clone(&audio.clock),
                Arc::clone(&self.state),
                self.audio_params,
            );
            match AudioOutput::open(feed, self.audio_params) {
                Ok(out) => {
                    let granted = out.params();
                    info!(
                        "audio: device running at {} Hz, {} ch",
                        granted.sample_rate, granted.channels
                    );
                    self.audio_out = Some(out);
                }
                Err(err) => {
                    warn!("audio unavailable, continuing without it: {err:#}");
                    self.audio = None;
                    self.audio_decoder = None;
                }
            }
        }

        for pipeline in [&self.video, &self.audio].into_iter().flatten() {
            pipeline.packets.start();
        }

        if let (Some(video), Some(decoder)) = (&self.video, self.video_decoder.take()) {
            let worker = DecodeWorker::new(
                StreamKind::Video,
                Arc::clone(&video.packets),
                Arc::clone(&video.frames),
                decoder,
            );
            self.threads
                .push(worker.spawn().context("failed to spawn video decoder")?);
        }
        if let (Some(audio), Some(decoder)) = (&self.audio, self.audio_decoder.take()) {
            let worker = DecodeWorker::new(
                StreamKind::Audio,
                Arc::clone(&audio.packets),
                Arc::clone(&audio.frames),
                decoder,
            );
            self.threads
                .push(worker.spawn().context("failed to spawn audio decoder")?);
        }

        let source = self
            .source
            .take()
            .context("player already started once")?;
        let reader = ReadLoop {
            source,
            state: Arc::clone(&self.state),
            video: self.video.as_ref().map(|p| Arc::clone(&p.packets)),
            audio: self.audio.as_ref().map(|p| Arc::clone(&p.packets)),
            seek: Arc::clone(&self.seek),
        };
        self.threads.push(
            thread::Builder::new()
                .name("demux-read".into())
                .spawn(move || reader.run())
                .context("failed to spawn read loop")?,
        );

        if let Some(video) = &self.video {
            self.presenter = Some(VideoPresenter::new(
                Arc::clone(&video.frames),
                video.packets.serial_handle(),
                Arc::clone(&video.clock),
                self.master_clock(),
                Arc::clone(&self.state),
            ));
        }
        info!(
            "playback started (video: {}, audio: {})",
            self.video.is_some(),
            self.audio.is_some()
        );
        Ok(())
    }

    /// The clock everything else syncs to: audio when present.
    fn master_clock(&self) -> Arc<PlaybackClock> {
        match (&self.audio, &self.video) {
            (Some(a), _) => Arc::clone(&a.clock),
            (None, Some(v)) => Arc::clone(&v.clock),
            (None, None) => unreachable!("player without streams"),
        }
    }

    /// Advance video presentation; call frequently from the main loop.
    pub fn refresh(&mut self, sink: &mut dyn VideoSink) -> anyhow::Result<bool> {
        match &mut self.presenter {
            Some(p) => p.poll(now_secs(), sink),
            None => Ok(false),
        }
    }

    /// Flip pause for the whole pipeline: flags, clocks and device stream.
    pub fn toggle_pause(&self) {
        let paused = self.state.toggle_paused();
        for pipeline in [&self.video, &self.audio].into_iter().flatten() {
            pipeline.clock.set_paused(paused);
        }
        if let Some(out) = &self.audio_out {
            out.set_paused(paused);
        }
        info!("{}", if paused { "paused" } else { "resumed" });
    }

    pub fn is_paused(&self) -> bool {
        self.state.is_paused()
    }

    /// Request a seek relative to the current master clock position.
    pub fn seek_by(&self, delta_secs: f64) {
        let pos = self.master_clock().get();
        let pos = if pos.is_nan() { 0.0 } else { pos };
        self.seek_to(pos + delta_secs);
    }

    /// Request a seek to an absolute position in seconds.
    pub fn seek_to(&self, target_secs: f64) {
        let target = target_secs.max(0.0);
        *self.seek.lock() = Some(target);
    }

    /// Stop every thread and release the device. Idempotent.
    pub fn shutdown(&mut self) {
        self.state.request_abort();
        for pipeline in [&self.video, &self.audio].into_iter().flatten() {
            pipeline.packets.abort();
            pipeline.frames.signal_all();
        }
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                warn!("worker thread panicked during shutdown");
            }
        }
        self.audio_out = None;
    }
}

impl<S: MediaSource + 'static> Drop for Player<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Demux loop state, owned by the read thread.
struct ReadLoop<S: MediaSource> {
    source: S,
    state: Arc<SharedState>,
    video: Option<Arc<PacketQueue<S::Unit>>>,
    audio: Option<Arc<PacketQueue<S::Unit>>>,
    seek: Arc<Mutex<Option<f64>>>,
}

impl<S: MediaSource> ReadLoop<S> {
    fn run(mut self) {
        info!("read loop started");
        while !self.state.is_aborted() {
            self.service_seek();

            match self.source.read_unit() {
                Ok(SourceRead::Unit(kind, unit)) => {
                    let queue = match kind {
                        StreamKind::Video => self.video.as_ref(),
                        StreamKind::Audio => self.audio.as_ref(),
                    };
                    if let Some(queue) = queue {
                        self.enqueue(queue, unit);
                    }
                }
                Ok(SourceRead::EndOfStream) => {
                    // May be a transient stall on a live source; also keeps
                    // the thread responsive to seeks after end of file.
                    thread::sleep(READ_RETRY);
                }
                Err(err) => {
                    warn!("read failed, retrying: {err}");
                    thread::sleep(READ_RETRY);
                }
            }
        }
        info!("read loop stopped");
    }

    fn service_seek(&mut self) {
        let Some(target) = self.seek.lock().take() else {
            return;
        };
        match self.source.seek(target) {
            Ok(()) => {
                for queue in [&self.video, &self.audio].into_iter().flatten() {
                    queue.flush();
                    queue.start();
                }
                info!("seeked to {target:.3}s");
            }
            Err(err) => warn!("seek to {target:.3}s failed: {err}"),
        }
    }

    /// Enqueue with backpressure: retry a full queue until it drains, a
    /// seek arrives (the unit is obsolete) or the pipeline aborts.
    fn enqueue(&self, queue: &PacketQueue<S::Unit>, unit: S::Unit) {
        let mut pending = unit;
        loop {
            match queue.put(pending) {
                Ok(()) => return,
                Err(PutError::Aborted(_)) => return,
                Err(PutError::Full(unit)) => {
                    if self.state.is_aborted() || self.seek.lock().is_some() {
                        return;
                    }
                    pending = unit;
                    thread::sleep(READ_RETRY);
                }
            }
        }
    }
}
