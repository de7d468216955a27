//! Sample-format, rate and layout conversion
//!
//! Converts decoded frames of any format to packed `f32` at the working
//! sample rate and channel count the DSP code expects.

use crate::error::{FfmpegError, Result};
use crate::ffmpeg::frame::{frame_channels, read_packed_f32, PACKED_F32};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::software::resampling;
use ffmpeg_next::util::channel_layout::ChannelLayout;

/// Extra output room per call beyond the rate-scaled input size
const OUTPUT_SLACK: usize = 256;
/// Frame size used to drain buffered samples at end of stream
const FLUSH_FRAME: usize = 4096;

/// Layout for a channel count the service works with
pub fn layout_for(channels: u16) -> ChannelLayout {
    match channels {
        1 => ChannelLayout::MONO,
        _ => ChannelLayout::STEREO,
    }
}

/// Channel layout of a decoded frame, guessed from the channel count when
/// the decoder left it unspecified.
pub fn source_layout(frame: &ffmpeg::util::frame::Audio) -> ChannelLayout {
    if frame.channel_layout().bits() == 0 {
        match frame_channels(frame) {
            1 => ChannelLayout::MONO,
            _ => ChannelLayout::STEREO,
        }
    } else {
        frame.channel_layout()
    }
}

/// Wrapper around FFmpeg's `SwrContext` producing interleaved `f32`
pub struct AudioResampler {
    context: resampling::Context,
    source_layout: ChannelLayout,
    source_rate: u32,
    output_rate: u32,
    output_layout: ChannelLayout,
}

impl AudioResampler {
    /// Build a resampler from the format of the first decoded frame.
    pub fn new(src_frame: &ffmpeg::util::frame::Audio, target_rate: u32, channels: u16) -> Result<Self> {
        let source_layout = source_layout(src_frame);
        let output_layout = layout_for(channels);

        let context = resampling::Context::get(
            src_frame.format(),
            source_layout,
            src_frame.rate(),
            PACKED_F32,
            output_layout,
            target_rate,
        )
        .map_err(|e| FfmpegError::ResamplerCreate(e.to_string()))?;

        Ok(Self {
            context,
            source_layout,
            source_rate: src_frame.rate(),
            output_rate: target_rate,
            output_layout,
        })
    }

    fn output_frame(&self, capacity: usize) -> ffmpeg::util::frame::Audio {
        let mut out = ffmpeg::util::frame::Audio::new(PACKED_F32, capacity, self.output_layout);
        out.set_rate(self.output_rate);
        out
    }

    /// Convert one decoded frame, returning its interleaved samples.
    ///
    /// May return fewer samples than the input implies; the remainder comes
    /// out of later calls or [`flush`](Self::flush).
    pub fn convert(&mut self, frame: &mut ffmpeg::util::frame::Audio) -> Result<Vec<f32>> {
        if frame.channel_layout().bits() == 0 {
            frame.set_channel_layout(self.source_layout);
        }
        let scaled = frame.samples() as u64 * self.output_rate as u64 / self.source_rate.max(1) as u64;
        let mut out = self.output_frame(scaled as usize + OUTPUT_SLACK);

        self.context
            .run(frame, &mut out)
            .map_err(|e| FfmpegError::Resample(e.to_string()))?;

        Ok(read_packed_f32(&out))
    }

    /// Drain samples still buffered inside the resampler.
    pub fn flush(&mut self) -> Result<Vec<f32>> {
        let mut samples = Vec::new();
        loop {
            let mut out = self.output_frame(FLUSH_FRAME);
            if let Err(e) = self.context.flush(&mut out) {
                // Passthrough contexts have nothing buffered
                tracing::debug!("Resampler flush returned non-fatal error: {}", e);
                break;
            }
            if out.samples() == 0 {
                break;
            }
            samples.extend(read_packed_f32(&out));
        }
        Ok(samples)
    }

    pub fn output_rate(&self) -> u32 {
        self.output_rate
    }
}
