//! FFmpeg audio filter graphs over PCM buffers
//!
//! Used for the effects that are better left to FFmpeg: `atempo`
//! time-stretching and the 432 Hz retune (`asetrate` + `aresample` +
//! `atempo`). Input is fed through `abuffer` as packed `f32`, and an
//! `aformat` stage in front of the sink guarantees packed `f32` back out.

use crate::audio::PcmBuffer;
use crate::error::{FfmpegError, Result};
use crate::ffmpeg::frame::{frame_channels, read_packed_f32, write_packed_f32, PACKED_F32};
use crate::transcode::resampler::layout_for;
use ffmpeg_next as ffmpeg;

/// Frames per buffer fed into the graph
const FEED_FRAMES: usize = 4096;

/// Range a single `atempo` instance handles without degrading quality
const ATEMPO_MIN: f64 = 0.5;
const ATEMPO_MAX: f64 = 2.0;

/// Reference pitch the retune moves away from
pub const CONCERT_PITCH_HZ: f64 = 440.0;
pub const RETUNE_PITCH_HZ: f64 = 432.0;

fn layout_name(channels: u16) -> &'static str {
    match channels {
        1 => "mono",
        _ => "stereo",
    }
}

/// `atempo` stages multiplying to `factor`, each within 0.5..=2.0
pub fn atempo_chain(factor: f64) -> String {
    let mut remaining = factor;
    let mut stages = Vec::new();
    while remaining < ATEMPO_MIN {
        stages.push(format!("atempo={}", ATEMPO_MIN));
        remaining /= ATEMPO_MIN;
    }
    while remaining > ATEMPO_MAX {
        stages.push(format!("atempo={}", ATEMPO_MAX));
        remaining /= ATEMPO_MAX;
    }
    stages.push(format!("atempo={}", remaining));
    stages.join(",")
}

/// Pitch down from 440 Hz to 432 Hz reference, keeping duration.
pub fn retune_432_chain(sample_rate: u32) -> String {
    let ratio = RETUNE_PITCH_HZ / CONCERT_PITCH_HZ;
    format!(
        "asetrate={}*{}/{},aresample={},{}",
        sample_rate,
        RETUNE_PITCH_HZ as u32,
        CONCERT_PITCH_HZ as u32,
        sample_rate,
        atempo_chain(1.0 / ratio)
    )
}

/// Run `pcm` through the filter chain described by `spec`.
///
/// The output keeps the input's channel count; its rate is whatever the
/// chain ends with.
pub fn run_filter(pcm: &PcmBuffer, spec: &str) -> Result<PcmBuffer> {
    if pcm.is_empty() {
        return Ok(pcm.clone());
    }

    let graph_err = |what: &str, e: ffmpeg::Error| FfmpegError::FilterGraph(format!("{}: {}", what, e));

    let mut graph = ffmpeg::filter::Graph::new();
    let abuffer = ffmpeg::filter::find("abuffer")
        .ok_or_else(|| FfmpegError::FilterGraph("abuffer filter missing".into()))?;
    let abuffersink = ffmpeg::filter::find("abuffersink")
        .ok_or_else(|| FfmpegError::FilterGraph("abuffersink filter missing".into()))?;

    let args = format!(
        "time_base=1/{rate}:sample_rate={rate}:sample_fmt=flt:channel_layout={layout}",
        rate = pcm.sample_rate,
        layout = layout_name(pcm.channels)
    );
    graph
        .add(&abuffer, "in", &args)
        .map_err(|e| graph_err("abuffer", e))?;
    graph
        .add(&abuffersink, "out", "")
        .map_err(|e| graph_err("abuffersink", e))?;

    let chain = format!(
        "{},aformat=sample_fmts=flt:channel_layouts={}",
        spec,
        layout_name(pcm.channels)
    );
    graph
        .output("in", 0)
        .and_then(|p| p.input("out", 0))
        .and_then(|p| p.parse(&chain))
        .map_err(|e| graph_err(&chain, e))?;
    graph.validate().map_err(|e| graph_err("validate", e))?;

    let mut samples = Vec::with_capacity(pcm.samples.len());
    let mut out_rate = pcm.sample_rate;
    let ch = pcm.channels as usize;
    let mut pts = 0i64;

    for chunk in pcm.samples.chunks(FEED_FRAMES * ch) {
        let frames = chunk.len() / ch;
        let mut frame = ffmpeg::util::frame::Audio::new(PACKED_F32, frames, layout_for(pcm.channels));
        frame.set_rate(pcm.sample_rate);
        frame.set_pts(Some(pts));
        pts += frames as i64;
        write_packed_f32(&mut frame, chunk);

        graph
            .get("in")
            .ok_or_else(|| FfmpegError::FilterGraph("source missing".into()))?
            .source()
            .add(&frame)
            .map_err(|e| graph_err("push frame", e))?;
        drain(&mut graph, &mut samples, &mut out_rate)?;
    }

    graph
        .get("in")
        .ok_or_else(|| FfmpegError::FilterGraph("source missing".into()))?
        .source()
        .flush()
        .map_err(|e| graph_err("flush", e))?;
    drain(&mut graph, &mut samples, &mut out_rate)?;

    Ok(PcmBuffer::new(out_rate, pcm.channels, samples))
}

fn drain(graph: &mut ffmpeg::filter::Graph, samples: &mut Vec<f32>, rate: &mut u32) -> Result<()> {
    let mut sink = graph
        .get("out")
        .ok_or_else(|| FfmpegError::FilterGraph("sink missing".into()))?;
    loop {
        let mut frame = ffmpeg::util::frame::Audio::empty();
        match sink.sink().frame(&mut frame) {
            Ok(()) => {
                if frame_channels(&frame) > 0 {
                    *rate = frame.rate();
                    samples.extend(read_packed_f32(&frame));
                }
            }
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => break,
            Err(ffmpeg::Error::Eof) => break,
            Err(e) => return Err(FfmpegError::FilterGraph(format!("pull frame: {}", e)).into()),
        }
    }
    Ok(())
}

/// Time-stretch without changing pitch.
pub fn change_tempo(pcm: &PcmBuffer, factor: f64) -> Result<PcmBuffer> {
    run_filter(pcm, &atempo_chain(factor))
}

/// Shift the reference pitch from 440 Hz to 432 Hz.
pub fn retune_432(pcm: &PcmBuffer) -> Result<PcmBuffer> {
    run_filter(pcm, &retune_432_chain(pcm.sample_rate))
}
