use thiserror::Error;

/// Main error type for the mixer service
#[derive(Error, Debug)]
pub enum MixerError {
    #[error("FFmpeg error: {0}")]
    Ffmpeg(#[from] FfmpegError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Track not found: {0}")]
    TrackNotFound(String),

    #[error("Track could not be read: {0}")]
    TrackUnreadable(String),

    #[error("Catalog unavailable: {0}")]
    Catalog(String),

    #[error("Undecodable input: {0}")]
    Undecodable(String),

    #[error("Unknown speed label: {0}")]
    UnknownSpeed(String),

    #[error("No speed labels requested")]
    NoSpeeds,

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Worker task failed: {0}")]
    Worker(String),

    #[error("Job cancelled")]
    Cancelled,
}

/// FFmpeg-specific errors
#[derive(Error, Debug)]
pub enum FfmpegError {
    #[error("FFmpeg initialization failed: {0}")]
    InitFailed(String),

    #[error("Failed to open input file: {0}")]
    OpenInput(String),

    #[error("No audio stream in input: {0}")]
    NoAudioStream(String),

    #[error("Failed to create decoder: {0}")]
    DecoderCreate(String),

    #[error("Failed to find encoder: codec_id={0}")]
    EncoderNotFound(String),

    #[error("Failed to create encoder: {0}")]
    EncoderCreate(String),

    #[error("Failed to create resampler: {0}")]
    ResamplerCreate(String),

    #[error("Failed to resample: {0}")]
    Resample(String),

    #[error("Failed to build filter graph: {0}")]
    FilterGraph(String),

    #[error("Failed to create muxer: {0}")]
    MuxerCreate(String),

    #[error("Failed to write header: {0}")]
    WriteHeader(String),

    #[error("Failed to write packet: {0}")]
    WritePacket(String),

    #[error("Failed to write trailer: {0}")]
    WriteTrailer(String),

    #[error("Failed to decode packet: {0}")]
    DecodePacket(String),

    #[error("Failed to encode frame: {0}")]
    EncodeFrame(String),
}

impl From<zip::result::ZipError> for MixerError {
    fn from(err: zip::result::ZipError) -> Self {
        MixerError::Archive(err.to_string())
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, MixerError>;
