//! Sample-level processing used by the mix recipes
//!
//! - Zero-phase Butterworth low-pass filtering
//! - Level measurement, gain, normalization and silence trimming
//! - Looping weighted mix
//! - Harmonic/percussive separation
//! - Tempo and beat analysis

pub mod beat;
pub mod filter;
pub mod hpss;
pub mod level;

pub use beat::{BeatAnalysis, BeatAnalyzer, DEFAULT_TEMPO};
pub use filter::ButterworthLowpass;
pub use hpss::{percussive, HpssConfig};
