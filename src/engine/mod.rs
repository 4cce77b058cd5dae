//! External demux/decode engine boundary
//!
//! The pipeline never talks to a container parser or codec directly; it
//! consumes the narrow capabilities below. `engine::ffmpeg` provides the
//! production binding over ac-ffmpeg; tests substitute mock implementations.

pub mod ffmpeg;

use thiserror::Error;

use crate::pipeline::frame_queue::Frame;

/// Sentinel for "this unit/frame carries no timestamp".
pub const NO_TIMESTAMP: i64 = i64::MIN;

/// Which elementary stream a compressed unit belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Video,
    Audio,
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamKind::Video => write!(f, "video"),
            StreamKind::Audio => write!(f, "audio"),
        }
    }
}

/// One demuxed, still-encoded chunk of data for one elementary stream.
///
/// The pipeline treats the payload as opaque; it only needs byte and
/// stream-duration accounting for queue diagnostics.
pub trait CompressedUnit: Send + 'static {
    /// Payload size in bytes.
    fn size(&self) -> usize;

    /// Duration in stream time-base units, `0` when unknown.
    fn duration(&self) -> i64;
}

/// Outcome of pulling one unit from a media source.
pub enum SourceRead<U> {
    /// A unit for the given stream.
    Unit(StreamKind, U),
    /// Nothing to deliver right now. For a file this is the end; for a live
    /// source it may be transient, so the read loop retries after a delay.
    EndOfStream,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to open media source: {0}")]
    Open(String),
    #[error("read failed: {0}")]
    Read(String),
    #[error("seek failed: {0}")]
    Seek(String),
    #[error("no playable streams")]
    NoStreams,
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("decoder rejected unit: {0}")]
    Feed(String),
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("unsupported frame layout: {0}")]
    Unsupported(String),
}

/// Result of draining one decoded frame out of a stream decoder.
pub enum DrainStatus {
    /// The slot was filled. Timestamps are in stream time-base units;
    /// `raw_pts` may be [`NO_TIMESTAMP`], `raw_duration` may be `0`.
    Frame { raw_pts: i64, raw_duration: i64 },
    /// No frame buffered; feed more input.
    NeedsInput,
    /// The decoder has emitted everything it will ever emit.
    EndOfStream,
}

/// Demux side of the engine: pull compressed units, seek the source.
pub trait MediaSource: Send {
    type Unit: CompressedUnit;

    fn read_unit(&mut self) -> Result<SourceRead<Self::Unit>, EngineError>;

    /// Seek the source to an absolute position in seconds.
    fn seek(&mut self, target_secs: f64) -> Result<(), EngineError>;
}

/// Decode side of the engine for one elementary stream.
///
/// Feed/drain mirror the usual send-packet/receive-frame codec shape: one
/// feed may yield zero or more drained frames.
pub trait StreamDecoder: Send {
    type Unit: CompressedUnit;

    /// Feed one compressed unit. A hard error here means this unit is lost;
    /// it never invalidates the decoder itself.
    fn feed(&mut self, unit: Self::Unit) -> Result<(), DecodeError>;

    /// Drain one decoded frame into the pre-allocated slot.
    fn drain_into(&mut self, slot: &mut Frame) -> Result<DrainStatus, DecodeError>;

    /// Discard all internal decoder state (seek discontinuity, end of drain).
    fn reset(&mut self);

    /// Seconds per stream time-base unit for this decoder's timestamps.
    fn time_base(&self) -> f64;
}

impl<U: CompressedUnit> StreamDecoder for Box<dyn StreamDecoder<Unit = U>> {
    type Unit = U;

    fn feed(&mut self, unit: U) -> Result<(), DecodeError> {
        (**self).feed(unit)
    }

    fn drain_into(&mut self, slot: &mut Frame) -> Result<DrainStatus, DecodeError> {
        (**self).drain_into(slot)
    }

    fn reset(&mut self) {
        (**self).reset()
    }

    fn time_base(&self) -> f64 {
        (**self).time_base()
    }
}
