//! Audio codec adapter
//!
//! - Decoding any FFmpeg-readable file or upload to PCM
//! - Resampling to the working rate and layout
//! - FFmpeg filter graphs (tempo, 432 Hz retune)
//! - MP3 encoding into memory

pub mod decoder;
pub mod encoder;
pub mod filter;
pub mod resampler;

pub use decoder::{decode_bytes, decode_file};
pub use encoder::{encode_mp3, is_mp3_encoder_available};
pub use filter::{change_tempo, retune_432};
