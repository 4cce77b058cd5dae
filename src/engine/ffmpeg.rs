//! FFmpeg engine binding via ac-ffmpeg
//!
//! Implements [`MediaSource`] over the container demuxer and
//! [`StreamDecoder`] over the video/audio codecs. All timestamps are
//! rescaled to microseconds on the way out, so the rest of the pipeline
//! never sees a stream time base.
//!
//! # Design
//!
//! Decoder reset after a seek is a rebuild from the kept codec parameters;
//! ac-ffmpeg exposes no lighter flush that also drops buffered frames.
//! Video output is packed YUV420p with stride padding stripped, written
//! straight into the frame queue's reusable slot buffer.

use std::fs::File;
use std::path::Path;

use ac_ffmpeg::codec::audio::AudioDecoder;
use ac_ffmpeg::codec::video::VideoDecoder;
use ac_ffmpeg::codec::{AudioCodecParameters, Decoder, VideoCodecParameters};
use ac_ffmpeg::format::demuxer::{Demuxer, DemuxerWithStreamInfo, SeekTarget};
use ac_ffmpeg::format::io::IO;
use ac_ffmpeg::packet::Packet;
use ac_ffmpeg::time::Timestamp;
use log::{error, info};

use crate::engine::{
    CompressedUnit, DecodeError, DrainStatus, EngineError, MediaSource, SourceRead, StreamKind,
    NO_TIMESTAMP,
};
use crate::output::audio::AudioParams;
use crate::pipeline::frame_queue::{Frame, FrameDesc, PixelFormat};

const I16_TO_F32: f32 = 1.0 / 32768.0;

/// One demuxed packet plus the byte count captured at demux time.
pub struct MediaPacket {
    packet: Packet,
    size: usize,
}

// The wrapped AVPacket is owned exclusively by this value and only ever
// touched from one thread at a time.
unsafe impl Send for MediaPacket {}

impl CompressedUnit for MediaPacket {
    fn size(&self) -> usize {
        self.size
    }

    fn duration(&self) -> i64 {
        0
    }
}

/// Container demuxer selecting the first video and first audio stream.
pub struct FfmpegSource {
    demuxer: DemuxerWithStreamInfo<File>,
    video_index: Option<usize>,
    audio_index: Option<usize>,
    video_params: Option<VideoCodecParameters>,
    audio_params: Option<AudioCodecParameters>,
}

// Same exclusive-ownership argument as MediaPacket: the demuxer moves to
// the read thread and stays there.
unsafe impl Send for FfmpegSource {}

impl FfmpegSource {
    /// Open a media file and probe its streams.
    pub fn open(path: &Path) -> Result<Self, EngineError> {
        let input = File::open(path).map_err(|e| EngineError::Open(e.to_string()))?;
        let io = IO::from_seekable_read_stream(input);
        let demuxer = Demuxer::builder()
            .build(io)
            .map_err(|e| EngineError::Open(e.to_string()))?
            .find_stream_info(None)
            .map_err(|(_, e)| EngineError::Open(e.to_string()))?;

        let mut video_index = None;
        let mut audio_index = None;
        let mut video_params = None;
        let mut audio_params = None;
        for (index, stream) in demuxer.streams().iter().enumerate() {
            let params = stream.codec_parameters();
            if video_index.is_none() && params.is_video_codec() {
                video_index = Some(index);
                video_params = params.into_video_codec_parameters();
            } else if audio_index.is_none() && params.is_audio_codec() {
                audio_index = Some(index);
                audio_params = params.into_audio_codec_parameters();
            }
        }
        if video_index.is_none() && audio_index.is_none() {
            return Err(EngineError::NoStreams);
        }
        info!(
            "opened {}: video stream {:?}, audio stream {:?}",
            path.display(),
            video_index,
            audio_index
        );
        Ok(Self {
            demuxer,
            video_index,
            audio_index,
            video_params,
            audio_params,
        })
    }

    pub fn has_video(&self) -> bool {
        self.video_index.is_some()
    }

    pub fn has_audio(&self) -> bool {
        self.audio_index.is_some()
    }

    /// Build a decoder for the selected video stream.
    pub fn video_decoder(&self) -> Result<FfmpegVideoDecoder, EngineError> {
        let params = self
            .video_params
            .as_ref()
            .ok_or(EngineError::NoStreams)?
            .clone();
        let decoder = VideoDecoder::from_codec_parameters(&params)
            .and_then(|b| b.build())
            .map_err(|e| EngineError::Open(e.to_string()))?;
        Ok(FfmpegVideoDecoder {
            decoder,
            params,
            pending: None,
        })
    }

    /// Build a decoder for the selected audio stream.
    pub fn audio_decoder(&self) -> Result<FfmpegAudioDecoder, EngineError> {
        let params = self
            .audio_params
            .as_ref()
            .ok_or(EngineError::NoStreams)?
            .clone();
        let decoder = AudioDecoder::from_codec_parameters(&params)
            .and_then(|b| b.build())
            .map_err(|e| EngineError::Open(e.to_string()))?;
        let output = self.audio_output_params().unwrap_or_default();
        Ok(FfmpegAudioDecoder {
            decoder,
            params,
            pending: None,
            sample_rate: output.sample_rate,
            channels: output.channels,
        })
    }

    /// Device format for the selected audio stream.
    pub fn audio_output_params(&self) -> Option<AudioParams> {
        let params = self.audio_params.as_ref()?;
        Some(AudioParams {
            sample_rate: params.sample_rate(),
            channels: params.channel_layout().channels() as u16,
        })
    }
}

impl MediaSource for FfmpegSource {
    type Unit = MediaPacket;

    fn read_unit(&mut self) -> Result<SourceRead<MediaPacket>, EngineError> {
        loop {
            let packet = self
                .demuxer
                .take()
                .map_err(|e| EngineError::Read(e.to_string()))?;
            let Some(packet) = packet else {
                return Ok(SourceRead::EndOfStream);
            };
            let index = packet.stream_index();
            let kind = if Some(index) == self.video_index {
                StreamKind::Video
            } else if Some(index) == self.audio_index {
                StreamKind::Audio
            } else {
                continue;
            };
            let size = packet.data().len();
            return Ok(SourceRead::Unit(kind, MediaPacket { packet, size }));
        }
    }

    fn seek(&mut self, target_secs: f64) -> Result<(), EngineError> {
        let micros = (target_secs * 1_000_000.0) as i64;
        self.demuxer
            .seek_to_timestamp(Timestamp::from_micros(micros), SeekTarget::UpTo)
            .map_err(|e| EngineError::Seek(e.to_string()))
    }
}

fn frame_pts_micros(pts: Timestamp) -> i64 {
    pts.as_micros().unwrap_or(NO_TIMESTAMP)
}

/// [`StreamDecoder`] over an ac-ffmpeg video codec.
pub struct FfmpegVideoDecoder {
    decoder: VideoDecoder,
    /// Kept so reset can rebuild the codec.
    params: VideoCodecParameters,
    /// Packet the codec refused with EAGAIN; retried during drain.
    pending: Option<Packet>,
}

unsafe impl Send for FfmpegVideoDecoder {}

impl crate::engine::StreamDecoder for FfmpegVideoDecoder {
    type Unit = MediaPacket;

    fn feed(&mut self, unit: MediaPacket) -> Result<(), DecodeError> {
        let backup = unit.packet.clone();
        match self.decoder.try_push(unit.packet) {
            Ok(()) => Ok(()),
            Err(e) if e.is_again() => {
                // Frames must be drained first; keep the packet for then.
                self.pending = Some(backup);
                Ok(())
            }
            Err(e) => Err(DecodeError::Feed(e.to_string())),
        }
    }

    fn drain_into(&mut self, slot: &mut Frame) -> Result<DrainStatus, DecodeError> {
        loop {
            match self.decoder.take() {
                Ok(Some(frame)) => {
                    let raw_pts = frame_pts_micros(frame.pts());
                    pack_video_frame(&frame, slot)?;
                    self.retry_pending();
                    return Ok(DrainStatus::Frame {
                        raw_pts,
                        raw_duration: 0,
                    });
                }
                Ok(None) => {
                    if self.retry_pending() {
                        continue;
                    }
                    return Ok(DrainStatus::NeedsInput);
                }
                Err(e) => return Err(DecodeError::Decode(e.to_string())),
            }
        }
    }

    fn reset(&mut self) {
        self.pending = None;
        match VideoDecoder::from_codec_parameters(&self.params).and_then(|b| b.build()) {
            Ok(decoder) => self.decoder = decoder,
            Err(e) => error!("video decoder rebuild failed: {e}"),
        }
    }

    fn time_base(&self) -> f64 {
        1.0 / 1_000_000.0
    }
}

impl FfmpegVideoDecoder {
    /// Returns true when the pending packet was accepted.
    fn retry_pending(&mut self) -> bool {
        let Some(packet) = self.pending.take() else {
            return false;
        };
        let backup = packet.clone();
        match self.decoder.try_push(packet) {
            Ok(()) => true,
            Err(e) if e.is_again() => {
                self.pending = Some(backup);
                false
            }
            Err(e) => {
                error!("video decode: dropping pending packet: {e}");
                false
            }
        }
    }
}

/// Strip stride padding and pack Y, U, V planes contiguously into the slot.
fn pack_video_frame(
    frame: &ac_ffmpeg::codec::video::VideoFrame,
    slot: &mut Frame,
) -> Result<(), DecodeError> {
    let width = frame.width();
    let height = frame.height();
    let planes = frame.planes();
    if planes.len() < 3 {
        return Err(DecodeError::Unsupported(format!(
            "expected 3 planes, got {}",
            planes.len()
        )));
    }
    let (cw, ch) = (width / 2, height / 2);
    let total = width * height + cw * ch * 2;
    slot.data.resize(total, 0);
    slot.samples.clear();

    let y_size = width * height;
    let c_size = cw * ch;
    extract_plane(
        &mut slot.data[..y_size],
        planes[0].data(),
        planes[0].line_size(),
        width,
        height,
    );
    extract_plane(
        &mut slot.data[y_size..y_size + c_size],
        planes[1].data(),
        planes[1].line_size(),
        cw,
        ch,
    );
    extract_plane(
        &mut slot.data[y_size + c_size..],
        planes[2].data(),
        planes[2].line_size(),
        cw,
        ch,
    );
    slot.desc = FrameDesc::Video {
        width: width as u32,
        height: height as u32,
        format: PixelFormat::Yuv420p,
    };
    Ok(())
}

/// Copy one plane from padded source to contiguous destination.
fn extract_plane(dst: &mut [u8], src: &[u8], stride: usize, width: usize, height: usize) {
    // Fast path: no stride padding.
    if stride == width && src.len() >= width * height {
        dst.copy_from_slice(&src[..width * height]);
        return;
    }
    for row in 0..height {
        let src_start = row * stride;
        let dst_start = row * width;
        if src_start + width > src.len() || dst_start + width > dst.len() {
            break;
        }
        dst[dst_start..dst_start + width].copy_from_slice(&src[src_start..src_start + width]);
    }
}

/// [`StreamDecoder`] over an ac-ffmpeg audio codec, producing interleaved
/// f32 samples.
pub struct FfmpegAudioDecoder {
    decoder: AudioDecoder,
    params: AudioCodecParameters,
    pending: Option<Packet>,
    sample_rate: u32,
    channels: u16,
}

unsafe impl Send for FfmpegAudioDecoder {}

impl crate::engine::StreamDecoder for FfmpegAudioDecoder {
    type Unit = MediaPacket;

    fn feed(&mut self, unit: MediaPacket) -> Result<(), DecodeError> {
        let backup = unit.packet.clone();
        match self.decoder.try_push(unit.packet) {
            Ok(()) => Ok(()),
            Err(e) if e.is_again() => {
                self.pending = Some(backup);
                Ok(())
            }
            Err(e) => Err(DecodeError::Feed(e.to_string())),
        }
    }

    fn drain_into(&mut self, slot: &mut Frame) -> Result<DrainStatus, DecodeError> {
        loop {
            match self.decoder.take() {
                Ok(Some(frame)) => {
                    let raw_pts = frame_pts_micros(frame.pts());
                    self.interleave_frame(&frame, slot)?;
                    self.retry_pending();
                    return Ok(DrainStatus::Frame {
                        raw_pts,
                        raw_duration: 0,
                    });
                }
                Ok(None) => {
                    if self.retry_pending() {
                        continue;
                    }
                    return Ok(DrainStatus::NeedsInput);
                }
                Err(e) => return Err(DecodeError::Decode(e.to_string())),
            }
        }
    }

    fn reset(&mut self) {
        self.pending = None;
        match AudioDecoder::from_codec_parameters(&self.params).and_then(|b| b.build()) {
            Ok(decoder) => self.decoder = decoder,
            Err(e) => error!("audio decoder rebuild failed: {e}"),
        }
    }

    fn time_base(&self) -> f64 {
        1.0 / 1_000_000.0
    }
}

impl FfmpegAudioDecoder {
    fn retry_pending(&mut self) -> bool {
        let Some(packet) = self.pending.take() else {
            return false;
        };
        let backup = packet.clone();
        match self.decoder.try_push(packet) {
            Ok(()) => true,
            Err(e) if e.is_again() => {
                self.pending = Some(backup);
                false
            }
            Err(e) => {
                error!("audio decode: dropping pending packet: {e}");
                false
            }
        }
    }

    fn interleave_frame(
        &self,
        frame: &ac_ffmpeg::codec::audio::AudioFrame,
        slot: &mut Frame,
    ) -> Result<(), DecodeError> {
        let samples = frame.samples();
        let channels = self.channels as usize;
        slot.samples.clear();
        slot.data.clear();

        let planes = frame.planes();
        let ok = if planes.len() >= channels && channels > 1 {
            let data: Vec<&[u8]> = planes.iter().take(channels).map(|p| p.data()).collect();
            extend_planar(&mut slot.samples, &data, samples)
        } else if let Some(plane) = planes.first() {
            extend_interleaved(&mut slot.samples, plane.data(), samples * channels)
        } else {
            false
        };
        if !ok {
            return Err(DecodeError::Unsupported(format!(
                "audio frame layout: {} planes, {} samples",
                planes.len(),
                samples
            )));
        }
        slot.desc = FrameDesc::Audio {
            sample_rate: self.sample_rate,
            channels: self.channels,
        };
        Ok(())
    }
}

/// Interleave one plane per channel, converting f32 or i16 samples.
fn extend_planar(out: &mut Vec<f32>, planes: &[&[u8]], sample_count: usize) -> bool {
    let min_bytes_f32 = sample_count * 4;
    if planes.iter().all(|p| p.len() >= min_bytes_f32) {
        let channels: Vec<&[f32]> = planes
            .iter()
            .map(|p| unsafe {
                std::slice::from_raw_parts(p.as_ptr() as *const f32, sample_count)
            })
            .collect();
        for i in 0..sample_count {
            for channel in &channels {
                out.push(channel[i]);
            }
        }
        return true;
    }

    let min_bytes_i16 = sample_count * 2;
    if planes.iter().all(|p| p.len() >= min_bytes_i16) {
        let channels: Vec<&[i16]> = planes
            .iter()
            .map(|p| unsafe {
                std::slice::from_raw_parts(p.as_ptr() as *const i16, sample_count)
            })
            .collect();
        for i in 0..sample_count {
            for channel in &channels {
                out.push(channel[i] as f32 * I16_TO_F32);
            }
        }
        return true;
    }

    false
}

/// Append already interleaved f32 or i16 samples.
fn extend_interleaved(out: &mut Vec<f32>, data: &[u8], total_samples: usize) -> bool {
    if data.len() >= total_samples * 4 {
        let samples: &[f32] =
            unsafe { std::slice::from_raw_parts(data.as_ptr() as *const f32, total_samples) };
        out.extend_from_slice(samples);
        return true;
    }
    if data.len() >= total_samples * 2 {
        let samples: &[i16] =
            unsafe { std::slice::from_raw_parts(data.as_ptr() as *const i16, total_samples) };
        out.extend(samples.iter().map(|&s| s as f32 * I16_TO_F32));
        return true;
    }
    false
}
