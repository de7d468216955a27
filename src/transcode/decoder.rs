//! File decoding to PCM
//!
//! Opens any container FFmpeg can probe, picks the best audio stream and
//! decodes it to interleaved `f32` at the requested rate and channel count.

use std::path::Path;

use crate::audio::PcmBuffer;
use crate::error::{FfmpegError, MixerError, Result};
use crate::transcode::resampler::AudioResampler;
use ffmpeg_next as ffmpeg;

/// Decoder for one audio stream of an open input
pub struct AudioDecoder {
    decoder: ffmpeg::decoder::Audio,
    stream_index: usize,
}

impl AudioDecoder {
    /// Open a decoder from the stream's own codec parameters.
    pub fn open(stream: &ffmpeg::format::stream::Stream) -> Result<Self> {
        let stream_index = stream.index();
        let context = ffmpeg::codec::Context::from_parameters(stream.parameters())
            .map_err(|e| FfmpegError::DecoderCreate(format!("stream {}: {}", stream_index, e)))?;

        let decoder = context
            .decoder()
            .audio()
            .map_err(|e| FfmpegError::DecoderCreate(format!("stream {}: {}", stream_index, e)))?;

        Ok(Self {
            decoder,
            stream_index,
        })
    }

    /// Send a compressed packet. Corrupt packets are skipped.
    pub fn send_packet(&mut self, packet: &ffmpeg::codec::packet::Packet) -> Result<()> {
        match self.decoder.send_packet(packet) {
            Ok(()) => Ok(()),
            Err(ffmpeg::Error::InvalidData) => {
                tracing::debug!(stream_index = self.stream_index, "Skipping invalid packet");
                Ok(())
            }
            Err(e) => Err(FfmpegError::DecodePacket(format!(
                "send_packet on stream {}: {}",
                self.stream_index, e
            ))
            .into()),
        }
    }

    pub fn send_eof(&mut self) -> Result<()> {
        match self.decoder.send_eof() {
            Ok(()) | Err(ffmpeg::Error::Eof) => Ok(()),
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => Ok(()),
            Err(e) => Err(FfmpegError::DecodePacket(format!("send_eof: {}", e)).into()),
        }
    }

    /// Next decoded frame, or `None` when the decoder needs more input.
    pub fn receive_frame(&mut self) -> Result<Option<ffmpeg::util::frame::Audio>> {
        let mut frame = ffmpeg::util::frame::Audio::empty();
        match self.decoder.receive_frame(&mut frame) {
            Ok(()) => Ok(Some(frame)),
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => Ok(None),
            Err(ffmpeg::Error::Eof) => Ok(None),
            Err(e) => Err(FfmpegError::DecodePacket(format!("receive_frame: {}", e)).into()),
        }
    }

    pub fn stream_index(&self) -> usize {
        self.stream_index
    }
}

/// Feeds decoded frames through a lazily built resampler
struct PcmSink {
    target_rate: u32,
    channels: u16,
    resampler: Option<AudioResampler>,
    samples: Vec<f32>,
}

impl PcmSink {
    fn push(&mut self, mut frame: ffmpeg::util::frame::Audio) -> Result<()> {
        if frame.samples() == 0 {
            return Ok(());
        }
        if self.resampler.is_none() {
            self.resampler = Some(AudioResampler::new(&frame, self.target_rate, self.channels)?);
        }
        if let Some(resampler) = self.resampler.as_mut() {
            self.samples.extend(resampler.convert(&mut frame)?);
        }
        Ok(())
    }

    fn finish(mut self) -> Result<PcmBuffer> {
        if let Some(resampler) = self.resampler.as_mut() {
            self.samples.extend(resampler.flush()?);
        }
        Ok(PcmBuffer::new(self.target_rate, self.channels, self.samples))
    }
}

/// Decode the best audio stream of `path`.
///
/// Any failure to open, probe or decode is reported as
/// [`MixerError::Undecodable`] so callers can tell bad input from codec or
/// resource problems further down the line.
pub fn decode_file(path: &Path, target_rate: u32, channels: u16) -> Result<PcmBuffer> {
    decode_inner(path, target_rate, channels).map_err(|e| match e {
        MixerError::Ffmpeg(inner) => MixerError::Undecodable(inner.to_string()),
        other => other,
    })
}

fn decode_inner(path: &Path, target_rate: u32, channels: u16) -> Result<PcmBuffer> {
    let mut input = ffmpeg::format::input(&path)
        .map_err(|e| FfmpegError::OpenInput(format!("{}: {}", path.display(), e)))?;

    let stream = input
        .streams()
        .best(ffmpeg::media::Type::Audio)
        .ok_or_else(|| FfmpegError::NoAudioStream(path.display().to_string()))?;
    let mut decoder = AudioDecoder::open(&stream)?;
    let stream_index = decoder.stream_index();

    let mut sink = PcmSink {
        target_rate,
        channels,
        resampler: None,
        samples: Vec::new(),
    };

    for (stream, packet) in input.packets() {
        if stream.index() != stream_index {
            continue;
        }
        decoder.send_packet(&packet)?;
        while let Some(frame) = decoder.receive_frame()? {
            sink.push(frame)?;
        }
    }

    decoder.send_eof()?;
    while let Some(frame) = decoder.receive_frame()? {
        sink.push(frame)?;
    }

    let pcm = sink.finish()?;
    tracing::debug!(
        path = %path.display(),
        frames = pcm.frames(),
        duration_secs = pcm.duration_secs(),
        "Decoded audio"
    );
    Ok(pcm)
}

/// Decode an uploaded payload by spilling it to a temporary file.
///
/// `filename` only contributes its extension, which helps FFmpeg probe
/// formats without a strong signature.
pub fn decode_bytes(data: &[u8], filename: &str, target_rate: u32, channels: u16) -> Result<PcmBuffer> {
    use std::io::Write;

    let suffix = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e))
        .unwrap_or_default();

    let mut file = tempfile::Builder::new()
        .prefix("upload-")
        .suffix(&suffix)
        .tempfile()?;
    file.write_all(data)?;
    file.flush()?;

    decode_file(file.path(), target_rate, channels)
}
