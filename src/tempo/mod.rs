//! Tempo adjustment job
//!
//! Retimes one decoded upload to each requested speed label and collects
//! the successes for the archive. A label that fails (or panics) is
//! recorded with its error and the others carry on.

pub mod archive;

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;

use crate::audio::PcmBuffer;
use crate::config::AudioConfig;
use crate::error::{MixerError, Result};
use crate::transcode::{change_tempo, encode_mp3};

/// Closed set of playback speeds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum SpeedLabel {
    Slow,
    Normal,
    Fast,
}

impl SpeedLabel {
    pub const ALL: [SpeedLabel; 3] = [SpeedLabel::Slow, SpeedLabel::Normal, SpeedLabel::Fast];

    /// Playback rate multiplier
    pub fn factor(self) -> f64 {
        match self {
            SpeedLabel::Slow => 0.8,
            SpeedLabel::Normal => 1.0,
            SpeedLabel::Fast => 1.2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SpeedLabel::Slow => "Slow",
            SpeedLabel::Normal => "Normal",
            SpeedLabel::Fast => "Fast",
        }
    }
}

impl fmt::Display for SpeedLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SpeedLabel {
    type Err = MixerError;

    fn from_str(s: &str) -> Result<Self> {
        SpeedLabel::ALL
            .into_iter()
            .find(|label| label.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| MixerError::UnknownSpeed(s.trim().to_string()))
    }
}

/// Parse raw form values into a deduplicated, canonically ordered label set.
///
/// Each value may hold several comma-separated labels. Blank entries are
/// ignored; an unknown label or an empty result is an error.
pub fn parse_speeds<I, S>(values: I) -> Result<Vec<SpeedLabel>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut labels = BTreeSet::new();
    for value in values {
        for part in value.as_ref().split(',') {
            if part.trim().is_empty() {
                continue;
            }
            labels.insert(part.parse::<SpeedLabel>()?);
        }
    }
    if labels.is_empty() {
        return Err(MixerError::NoSpeeds);
    }
    Ok(labels.into_iter().collect())
}

/// Produces one encoded output for a speed label
pub trait Retimer: Send + Sync {
    fn retime(&self, pcm: &PcmBuffer, label: SpeedLabel) -> Result<Vec<u8>>;
}

/// `atempo` through FFmpeg, then MP3
pub struct FfmpegRetimer {
    bitrate: usize,
}

impl FfmpegRetimer {
    pub fn new(audio: &AudioConfig) -> Self {
        Self {
            bitrate: audio.mp3_bitrate as usize,
        }
    }
}

impl Retimer for FfmpegRetimer {
    fn retime(&self, pcm: &PcmBuffer, label: SpeedLabel) -> Result<Vec<u8>> {
        let retimed = change_tempo(pcm, label.factor())?;
        encode_mp3(&retimed, self.bitrate)
    }
}

/// Outcome of a tempo job, split into archive entries and failures
#[derive(Debug, Default)]
pub struct TempoReport {
    pub outputs: Vec<(SpeedLabel, Vec<u8>)>,
    pub failures: Vec<(SpeedLabel, String)>,
}

impl TempoReport {
    pub fn all_failed(&self) -> bool {
        self.outputs.is_empty()
    }

    /// `Fast: <error>; Slow: <error>` or `None` when nothing failed
    pub fn failure_summary(&self) -> Option<String> {
        if self.failures.is_empty() {
            return None;
        }
        Some(
            self.failures
                .iter()
                .map(|(label, err)| format!("{}: {}", label, err))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

#[derive(Clone)]
pub struct TempoJob {
    retimer: Arc<dyn Retimer>,
}

impl TempoJob {
    pub fn new(retimer: Arc<dyn Retimer>) -> Self {
        Self { retimer }
    }

    pub fn standard(audio: &AudioConfig) -> Self {
        Self::new(Arc::new(FfmpegRetimer::new(audio)))
    }

    /// Retime `pcm` to every label, one label at a time on the blocking pool.
    pub async fn run(&self, pcm: PcmBuffer, labels: &[SpeedLabel]) -> TempoReport {
        let pcm = Arc::new(pcm);
        let mut report = TempoReport::default();

        for &label in labels {
            let retimer = self.retimer.clone();
            let input = pcm.clone();
            let span = tracing::Span::current();
            let outcome = tokio::task::spawn_blocking(move || {
                let _enter = span.enter();
                retimer.retime(&input, label)
            })
            .await;

            match outcome {
                Ok(Ok(bytes)) => {
                    tracing::info!(%label, factor = label.factor(), bytes = bytes.len(), "Speed rendered");
                    report.outputs.push((label, bytes));
                }
                Ok(Err(e)) => {
                    tracing::warn!(%label, error = %e, "Speed failed");
                    report.failures.push((label, e.to_string()));
                }
                Err(join_err) => {
                    let error = if join_err.is_panic() {
                        format!("{} retime panicked", label)
                    } else {
                        join_err.to_string()
                    };
                    tracing::error!(%label, %error, "Speed task failed");
                    report.failures.push((label, error));
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factors() {
        assert_eq!(SpeedLabel::Slow.factor(), 0.8);
        assert_eq!(SpeedLabel::Normal.factor(), 1.0);
        assert_eq!(SpeedLabel::Fast.factor(), 1.2);
    }

    #[test]
    fn test_parse_speeds_dedupes_and_orders() {
        let labels = parse_speeds(["Fast", "Slow,Fast", " normal "]).unwrap();
        assert_eq!(labels, vec![SpeedLabel::Slow, SpeedLabel::Normal, SpeedLabel::Fast]);
    }

    #[test]
    fn test_parse_speeds_rejects_unknown() {
        match parse_speeds(["Slow", "Turbo"]) {
            Err(MixerError::UnknownSpeed(label)) => assert_eq!(label, "Turbo"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_speeds_rejects_empty() {
        assert!(matches!(parse_speeds(Vec::<String>::new()), Err(MixerError::NoSpeeds)));
        assert!(matches!(parse_speeds([" , "]), Err(MixerError::NoSpeeds)));
    }

    struct FailingFast;

    impl Retimer for FailingFast {
        fn retime(&self, pcm: &PcmBuffer, label: SpeedLabel) -> Result<Vec<u8>> {
            match label {
                SpeedLabel::Fast => Err(MixerError::Worker("encoder exploded".into())),
                SpeedLabel::Slow => panic!("slow path panicked"),
                SpeedLabel::Normal => Ok(vec![pcm.frames() as u8]),
            }
        }
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let job = TempoJob::new(Arc::new(FailingFast));
        let report = job
            .run(PcmBuffer::silence(8000, 1, 7), &SpeedLabel::ALL)
            .await;

        assert_eq!(report.outputs, vec![(SpeedLabel::Normal, vec![7])]);
        assert_eq!(report.failures.len(), 2);
        assert!(!report.all_failed());
        let summary = report.failure_summary().unwrap();
        assert!(summary.starts_with("Slow: Slow retime panicked; Fast: "));
        assert!(summary.contains("encoder exploded"));
    }

    #[tokio::test]
    async fn test_ffmpeg_retimer_is_deterministic() {
        crate::ffmpeg::init().unwrap();
        if !crate::transcode::is_mp3_encoder_available() {
            return;
        }
        let pcm = crate::integration::fixtures::tone_pcm(44100, 2, 330.0, 0.4, 1.0);
        let job = TempoJob::standard(&AudioConfig::default());
        let first = job.run(pcm.clone(), &[SpeedLabel::Fast]).await;
        let second = job.run(pcm, &[SpeedLabel::Fast]).await;
        assert!(first.failures.is_empty(), "{:?}", first.failures);
        assert_eq!(first.outputs, second.outputs);
    }
}
