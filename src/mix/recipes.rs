//! The four mix recipes
//!
//! All recipes share a shape: prepare the heartbeat (filter or separate,
//! trim to a few beats, normalize), loudness-normalize the background,
//! match levels, loop the heartbeat under the background, then optionally
//! retune and encode. They differ in how the heartbeat is cleaned up, how
//! long the loop is, whether it is retimed to the music, and the mix
//! weights.

use tokio_util::sync::CancellationToken;

use crate::audio::PcmBuffer;
use crate::config::AudioConfig;
use crate::dsp::level::{
    apply_gain_db, clip, dbfs, loop_mix, loudness_normalize, peak_db, peak_normalize,
    trim_leading_silence, NORMALIZE_HEADROOM_DB,
};
use crate::dsp::{percussive, BeatAnalyzer, ButterworthLowpass, HpssConfig, DEFAULT_TEMPO};
use crate::error::{MixerError, Result};
use crate::transcode::{change_tempo, encode_mp3, retune_432};

use super::{MixInputs, MixRecipe};

/// Beats kept in the looped heartbeat
const BEATS_PER_LOOP: usize = 4;
/// Seconds of heartbeat / background considered by tempo analysis
const HEART_ANALYSIS_SECS: f64 = 30.0;
const MUSIC_ANALYSIS_SECS: f64 = 60.0;

const LOWPASS_ORDER: usize = 5;
const LOWPASS_CUTOFF_HZ: f64 = 500.0;

const LOUDNESS_TARGET_DB: f64 = -16.0;
const LOUDNESS_CEILING_DB: f64 = -1.5;

/// Bounds on the heartbeat retiming ratio
const STRETCH_MIN: f64 = 0.3;
const STRETCH_MAX: f64 = 3.0;

fn checkpoint(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(MixerError::Cancelled)
    } else {
        Ok(())
    }
}

fn seconds_per_beat(bpm: f64) -> f64 {
    60.0 / bpm
}

/// Trim leading silence and cut to `secs`. Falls back to the untrimmed
/// signal when nothing reaches the threshold.
fn trim_clip(buf: &PcmBuffer, threshold_db: f64, secs: f64) -> PcmBuffer {
    let mut trimmed = trim_leading_silence(buf, threshold_db);
    if trimmed.is_empty() {
        tracing::debug!(threshold_db, "Silence removal left nothing, keeping the original");
        trimmed = buf.clone();
    }
    trimmed.truncate_secs(secs);
    trimmed
}

/// Peak-normalize, then add `boost_db` when still quieter than `floor_db`.
fn normalize_with_boost(buf: &mut PcmBuffer, floor_db: f64, boost_db: f64) {
    peak_normalize(buf, NORMALIZE_HEADROOM_DB);
    if dbfs(buf) < floor_db {
        apply_gain_db(buf, boost_db);
    }
}

fn normalized_background(inputs: &MixInputs) -> PcmBuffer {
    let mut bg = inputs.background.clone();
    loudness_normalize(&mut bg, LOUDNESS_TARGET_DB, LOUDNESS_CEILING_DB);
    bg
}

/// Heartbeat tempo and the length of [`BEATS_PER_LOOP`] beats.
///
/// Missing tempo falls back to [`DEFAULT_TEMPO`]; missing duration is
/// `None` so each recipe can apply its own fallback.
fn heart_timing(analyzer: &BeatAnalyzer, heart: &PcmBuffer) -> (f64, Option<f64>) {
    match analyzer.analyze(heart, HEART_ANALYSIS_SECS) {
        Some(analysis) if analysis.bpm > 0.0 => {
            (analysis.bpm, analysis.duration_of_beats(BEATS_PER_LOOP))
        }
        _ => (DEFAULT_TEMPO, None),
    }
}

/// Stretch ratio taking the heartbeat from `heart_bpm` to `target_bpm`
fn stretch_ratio(target_bpm: f64, heart_bpm: f64) -> f64 {
    let ratio = target_bpm / heart_bpm;
    if !ratio.is_finite() || ratio <= 0.0 {
        return 1.0;
    }
    ratio.clamp(STRETCH_MIN, STRETCH_MAX)
}

/// Which of the four fixed mixes to render
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipeKind {
    /// Low-passed heartbeat, four beats, 0.6 : 0.4
    BasicBalance,
    /// Percussive heartbeat, dynamic gate, 0.8 : 0.2, 432 Hz
    PercussiveRetune,
    /// Heartbeat retimed to the music tempo, 0.8 : 0.2
    TempoMatched,
    /// Heartbeat retimed to twice the music tempo, 0.75 : 0.25, 432 Hz
    DoubleTime,
}

impl RecipeKind {
    pub const ALL: [RecipeKind; 4] = [
        RecipeKind::BasicBalance,
        RecipeKind::PercussiveRetune,
        RecipeKind::TempoMatched,
        RecipeKind::DoubleTime,
    ];

    pub fn version(self) -> &'static str {
        match self {
            RecipeKind::BasicBalance => "v1",
            RecipeKind::PercussiveRetune => "v2",
            RecipeKind::TempoMatched => "v3",
            RecipeKind::DoubleTime => "v4",
        }
    }
}

/// A recipe rendered with FFmpeg and the DSP toolkit
pub struct StandardRecipe {
    kind: RecipeKind,
    sample_rate: u32,
    bitrate: usize,
}

impl StandardRecipe {
    pub fn new(kind: RecipeKind, audio: &AudioConfig) -> Self {
        Self {
            kind,
            sample_rate: audio.sample_rate,
            bitrate: audio.mp3_bitrate as usize,
        }
    }

    /// Render to PCM without encoding.
    pub fn mix(&self, inputs: &MixInputs, cancel: &CancellationToken) -> Result<PcmBuffer> {
        let analyzer = BeatAnalyzer::new(self.sample_rate);
        match self.kind {
            RecipeKind::BasicBalance => basic_balance(inputs, &analyzer, cancel),
            RecipeKind::PercussiveRetune => percussive_retune(inputs, &analyzer, cancel),
            RecipeKind::TempoMatched => tempo_matched(inputs, &analyzer, cancel),
            RecipeKind::DoubleTime => double_time(inputs, &analyzer, cancel),
        }
    }
}

impl MixRecipe for StandardRecipe {
    fn version(&self) -> &'static str {
        self.kind.version()
    }

    fn render(&self, inputs: &MixInputs, cancel: &CancellationToken) -> Result<Vec<u8>> {
        let mixed = self.mix(inputs, cancel)?;
        checkpoint(cancel)?;
        encode_mp3(&mixed.to_stereo(), self.bitrate)
    }
}

fn basic_balance(
    inputs: &MixInputs,
    analyzer: &BeatAnalyzer,
    cancel: &CancellationToken,
) -> Result<PcmBuffer> {
    let heart = &inputs.foreground;
    let duration = heart_timing(analyzer, heart)
        .1
        .unwrap_or(BEATS_PER_LOOP as f64 * seconds_per_beat(DEFAULT_TEMPO));
    checkpoint(cancel)?;

    let filtered = ButterworthLowpass::new(LOWPASS_ORDER, LOWPASS_CUTOFF_HZ, heart.sample_rate)
        .apply(heart);
    checkpoint(cancel)?;

    let mut heart = trim_clip(&filtered, -40.0, duration);
    normalize_with_boost(&mut heart, -50.0, 10.0);

    let mut bg = normalized_background(inputs);
    checkpoint(cancel)?;

    let diff = dbfs(&bg) - dbfs(&heart);
    if diff > 0.0 {
        apply_gain_db(&mut heart, diff);
    } else {
        apply_gain_db(&mut bg, diff.abs());
    }

    let mut mixed = loop_mix(&bg, &heart, 0.6, 0.4);
    clip(&mut mixed);
    Ok(mixed)
}

fn percussive_retune(
    inputs: &MixInputs,
    analyzer: &BeatAnalyzer,
    cancel: &CancellationToken,
) -> Result<PcmBuffer> {
    let duration = heart_timing(analyzer, &inputs.foreground)
        .1
        .unwrap_or(BEATS_PER_LOOP as f64 * seconds_per_beat(DEFAULT_TEMPO))
        + 0.5;
    checkpoint(cancel)?;

    let separated = percussive(&inputs.foreground, &HpssConfig::default());
    checkpoint(cancel)?;

    let peak = peak_db(&separated);
    let threshold = if peak.is_finite() {
        (peak - 30.0).max(-50.0)
    } else {
        -50.0
    };
    let mut heart = trim_clip(&separated, threshold, duration);
    normalize_with_boost(&mut heart, -20.0, 6.0);

    let mut bg = normalized_background(inputs);
    checkpoint(cancel)?;

    let diff = dbfs(&bg) - dbfs(&heart);
    apply_gain_db(&mut bg, (-diff).max(0.0));
    apply_gain_db(&mut heart, diff.max(0.0));

    let mut mixed = loop_mix(&bg, &heart, 0.8, 0.2);
    clip(&mut mixed);
    checkpoint(cancel)?;

    retune_432(&mixed)
}

/// Shared front half of the tempo-following recipes: percussive heartbeat
/// retimed from its own tempo to `target(music_bpm)`.
struct Retimed {
    heart: PcmBuffer,
    heart_bpm: f64,
    music_bpm: f64,
    beats_duration: f64,
}

fn retime_heart(
    inputs: &MixInputs,
    analyzer: &BeatAnalyzer,
    cancel: &CancellationToken,
    target: impl Fn(f64) -> f64,
) -> Result<Retimed> {
    let mono = inputs.foreground.to_mono();
    let (heart_bpm, beats) = heart_timing(analyzer, &mono);
    let beats_duration =
        beats.unwrap_or(BEATS_PER_LOOP as f64 * seconds_per_beat(heart_bpm) + 0.5);
    let music_bpm = analyzer.tempo_or_default(&inputs.background, MUSIC_ANALYSIS_SECS);
    checkpoint(cancel)?;

    let separated = percussive(&mono, &HpssConfig::default());
    checkpoint(cancel)?;

    let ratio = stretch_ratio(target(music_bpm), heart_bpm);
    tracing::debug!(heart_bpm, music_bpm, ratio, "Retiming heartbeat");
    let heart = change_tempo(&separated, ratio)?;

    Ok(Retimed {
        heart,
        heart_bpm,
        music_bpm,
        beats_duration,
    })
}

fn tempo_matched(
    inputs: &MixInputs,
    analyzer: &BeatAnalyzer,
    cancel: &CancellationToken,
) -> Result<PcmBuffer> {
    let retimed = retime_heart(inputs, analyzer, cancel, |music| music)?;
    checkpoint(cancel)?;

    let mut heart = retimed.heart;
    heart.truncate_secs(retimed.beats_duration * retimed.heart_bpm / retimed.music_bpm);
    peak_normalize(&mut heart, NORMALIZE_HEADROOM_DB);
    apply_gain_db(&mut heart, -14.0);

    let mut bg = normalized_background(inputs);
    checkpoint(cancel)?;

    let diff = dbfs(&bg) - dbfs(&heart);
    apply_gain_db(&mut bg, (-diff + 2.0).max(0.0));
    apply_gain_db(&mut heart, diff.max(0.0));

    let mut mixed = loop_mix(&bg, &heart, 0.8, 0.2);
    clip(&mut mixed);
    Ok(mixed)
}

fn double_time(
    inputs: &MixInputs,
    analyzer: &BeatAnalyzer,
    cancel: &CancellationToken,
) -> Result<PcmBuffer> {
    let retimed = retime_heart(inputs, analyzer, cancel, |music| music * 2.0)?;
    checkpoint(cancel)?;

    let target_bpm = retimed.music_bpm * 2.0;
    let mut heart = retimed.heart;
    heart.truncate_secs(BEATS_PER_LOOP as f64 * seconds_per_beat(target_bpm));
    normalize_with_boost(&mut heart, -25.0, 3.0);

    let mut bg = normalized_background(inputs);
    checkpoint(cancel)?;

    let diff = dbfs(&bg) - dbfs(&heart);
    apply_gain_db(&mut bg, (-diff + 2.0).max(0.0));
    apply_gain_db(&mut heart, diff.max(0.0));

    let mut mixed = loop_mix(&bg, &heart, 0.75, 0.25);
    clip(&mut mixed);
    checkpoint(cancel)?;

    retune_432(&mixed)
}
