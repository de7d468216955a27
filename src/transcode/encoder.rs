//! MP3 encoding
//!
//! Wraps an FFmpeg `libmp3lame` codec context and muxes its packets into an
//! in-memory MP3 file.

use crate::audio::PcmBuffer;
use crate::error::{FfmpegError, Result};
use crate::ffmpeg::frame::{write_planar_f32, PLANAR_F32};
use crate::ffmpeg::io::MemoryOutput;
use crate::transcode::resampler::layout_for;
use ffmpeg_next as ffmpeg;
use ffmpeg_next::codec;

/// Samples per channel in one MPEG-1 Layer III frame
pub const MP3_FRAME_SIZE: usize = 1152;

/// MP3 encoder backed by a real FFmpeg codec context
pub struct Mp3Encoder {
    encoder: ffmpeg::encoder::Audio,
    sample_rate: u32,
    channels: u16,
    frame_size: usize,
    time_base: ffmpeg::Rational,
    pts: i64,
}

impl Mp3Encoder {
    pub fn open(sample_rate: u32, channels: u16, bitrate: usize) -> Result<Self> {
        let codec = codec::encoder::find(codec::Id::MP3)
            .ok_or_else(|| FfmpegError::EncoderNotFound("mp3".into()))?;

        let time_base = ffmpeg::Rational::new(1, sample_rate as i32);
        let mut context = codec::Context::new_with_codec(codec);
        context.set_time_base(time_base);

        let mut audio_enc = context
            .encoder()
            .audio()
            .map_err(|e| FfmpegError::EncoderCreate(format!("audio handle: {}", e)))?;

        audio_enc.set_rate(sample_rate as i32);
        audio_enc.set_format(PLANAR_F32);
        audio_enc.set_channel_layout(layout_for(channels));
        audio_enc.set_bit_rate(bitrate);

        let encoder = audio_enc
            .open_as(codec)
            .map_err(|e| FfmpegError::EncoderCreate(format!("open libmp3lame: {}", e)))?;

        let frame_size = match encoder.frame_size() as usize {
            0 => MP3_FRAME_SIZE,
            n => n,
        };

        Ok(Self {
            encoder,
            sample_rate,
            channels: channels.clamp(1, 2),
            frame_size,
            time_base,
            pts: 0,
        })
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn time_base(&self) -> ffmpeg::Rational {
        self.time_base
    }

    /// Encode one chunk of interleaved samples, padding it to a full frame.
    pub fn send_samples(&mut self, interleaved: &[f32]) -> Result<()> {
        let ch = self.channels as usize;
        let mut frame =
            ffmpeg::util::frame::Audio::new(PLANAR_F32, self.frame_size, layout_for(self.channels));
        frame.set_rate(self.sample_rate);

        for c in 0..ch {
            let mut plane: Vec<f32> = interleaved.iter().skip(c).step_by(ch).copied().collect();
            plane.resize(self.frame_size, 0.0);
            write_planar_f32(&mut frame, c, &plane);
        }

        frame.set_pts(Some(self.pts));
        self.pts += self.frame_size as i64;

        self.encoder
            .send_frame(&frame)
            .map_err(|e| FfmpegError::EncodeFrame(format!("send_frame: {}", e)).into())
    }

    pub fn send_eof(&mut self) -> Result<()> {
        self.encoder
            .send_eof()
            .map_err(|e| FfmpegError::EncodeFrame(format!("send_eof: {}", e)).into())
    }

    /// Next encoded packet, or `None` when the encoder needs more input.
    pub fn receive_packet(&mut self) -> Result<Option<ffmpeg::codec::packet::Packet>> {
        let mut packet = ffmpeg::codec::packet::Packet::empty();
        match self.encoder.receive_packet(&mut packet) {
            Ok(()) => Ok(Some(packet)),
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => Ok(None),
            Err(ffmpeg::Error::Eof) => Ok(None),
            Err(e) => Err(FfmpegError::EncodeFrame(format!("receive_packet: {}", e)).into()),
        }
    }

    /// Codec parameters for the muxer stream, copied from the open context.
    pub fn codec_parameters(&self) -> ffmpeg::codec::Parameters {
        use std::ops::Deref;
        use std::rc::Rc;
        let ctx: &ffmpeg::codec::Context = self.encoder.deref();
        // SAFETY: `ctx` is a live, opened encoder context; the freshly
        // allocated parameters are owned by the returned wrapper.
        unsafe {
            let params = ffmpeg::ffi::avcodec_parameters_alloc();
            ffmpeg::ffi::avcodec_parameters_from_context(params, ctx.as_ptr());
            ffmpeg::codec::Parameters::wrap(params, None::<Rc<dyn std::any::Any>>)
        }
    }
}

/// Whether the FFmpeg build carries an MP3 encoder
pub fn is_mp3_encoder_available() -> bool {
    codec::encoder::find(codec::Id::MP3).is_some()
}

/// Encode a PCM buffer to a complete MP3 file in memory.
///
/// Mono stays mono; anything wider is folded to stereo.
pub fn encode_mp3(pcm: &PcmBuffer, bitrate: usize) -> Result<Vec<u8>> {
    let pcm = match pcm.channels {
        1 | 2 => std::borrow::Cow::Borrowed(pcm),
        _ => std::borrow::Cow::Owned(pcm.to_stereo()),
    };

    let mut encoder = Mp3Encoder::open(pcm.sample_rate, pcm.channels, bitrate)?;
    let mut muxer = MemoryOutput::new("mp3")?;

    {
        let output = muxer.output();
        let mut stream = output
            .add_stream(ffmpeg::encoder::find(codec::Id::None))
            .map_err(|e| FfmpegError::MuxerCreate(format!("add_stream: {}", e)))?;
        stream.set_parameters(encoder.codec_parameters());
        stream.set_time_base(encoder.time_base());
    }

    muxer
        .output()
        .write_header()
        .map_err(|e| FfmpegError::WriteHeader(e.to_string()))?;

    let stream_tb = muxer
        .output()
        .stream(0)
        .map(|s| s.time_base())
        .unwrap_or_else(|| encoder.time_base());

    let chunk = encoder.frame_size() * pcm.channels as usize;
    let mut packets = 0usize;
    for samples in pcm.samples.chunks(chunk) {
        encoder.send_samples(samples)?;
        packets += drain_packets(&mut encoder, &mut muxer, stream_tb)?;
    }
    encoder.send_eof()?;
    packets += drain_packets(&mut encoder, &mut muxer, stream_tb)?;

    muxer
        .output()
        .write_trailer()
        .map_err(|e| FfmpegError::WriteTrailer(e.to_string()))?;

    let bytes = muxer.into_bytes();
    tracing::debug!(
        frames = pcm.frames(),
        packets,
        bytes = bytes.len(),
        "Encoded MP3"
    );
    Ok(bytes)
}

fn drain_packets(
    encoder: &mut Mp3Encoder,
    muxer: &mut MemoryOutput,
    stream_tb: ffmpeg::Rational,
) -> Result<usize> {
    let mut count = 0;
    while let Some(mut packet) = encoder.receive_packet()? {
        packet.set_stream(0);
        packet.rescale_ts(encoder.time_base(), stream_tb);
        packet
            .write_interleaved(muxer.output())
            .map_err(|e| FfmpegError::WritePacket(e.to_string()))?;
        count += 1;
    }
    Ok(count)
}
