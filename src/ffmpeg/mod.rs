//! FFmpeg access
//!
//! - Library initialization and log level
//! - Custom AVIOContext for in-memory muxing
//! - Raw audio plane access for PCM frames

pub mod frame;
pub mod io;

pub use ffmpeg_next as ffmpeg;

/// Initialize FFmpeg and quiet its own logging down to warnings.
///
/// Called once at startup. Safe to call again; FFmpeg ignores repeated
/// registration.
pub fn init() -> Result<(), crate::error::FfmpegError> {
    ffmpeg::init().map_err(|e| {
        crate::error::FfmpegError::InitFailed(format!("ffmpeg::init() failed: {}", e))
    })?;

    unsafe {
        ffmpeg::ffi::av_log_set_level(ffmpeg::ffi::AV_LOG_WARNING as i32);
    }

    tracing::info!(libavutil = %version_info(), mp3_encoder = crate::transcode::is_mp3_encoder_available(), "FFmpeg initialized");

    Ok(())
}

/// libavutil version as `major.minor.micro`
pub fn version_info() -> String {
    let v = ffmpeg::util::version();
    format!("{}.{}.{}", v >> 16, (v >> 8) & 0xff, v & 0xff)
}
