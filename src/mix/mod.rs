//! Mix job pipeline
//!
//! A mix job renders every recipe against one (heartbeat, background) pair
//! and yields one [`VersionRecord`] per recipe, in recipe order, as soon as
//! each finishes. Recipes run one at a time on the blocking pool. A recipe
//! that fails or panics produces a `failed` record and the job moves on.
//!
//! The stream owns a drop guard on the job's cancellation token: when the
//! consumer goes away (client disconnect), the token fires, no further
//! recipe starts, and the running one bails out at its next checkpoint.

pub mod recipes;

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use base64::Engine;
use futures::Stream;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::audio::PcmBuffer;
use crate::config::AudioConfig;
use crate::error::{MixerError, Result};
use crate::transcode::{decode_bytes, decode_file};

pub use recipes::{RecipeKind, StandardRecipe};

/// Decoded inputs shared by every recipe of a job
#[derive(Debug, Clone)]
pub struct MixInputs {
    /// Uploaded heartbeat, stereo at the working rate
    pub foreground: PcmBuffer,
    /// Background track, stereo at the working rate
    pub background: PcmBuffer,
}

impl MixInputs {
    /// Decode both inputs up front.
    ///
    /// An unusable upload is [`MixerError::Undecodable`]; a catalog track
    /// that cannot be decoded is [`MixerError::TrackUnreadable`].
    pub fn decode(
        foreground: &[u8],
        filename: &str,
        background: &Path,
        audio: &AudioConfig,
    ) -> Result<Self> {
        let foreground = decode_bytes(foreground, filename, audio.sample_rate, 2)?;
        if foreground.is_empty() {
            return Err(MixerError::Undecodable(format!("{}: no audio samples", filename)));
        }

        let background = match decode_file(background, audio.sample_rate, 2) {
            Ok(pcm) if pcm.is_empty() => {
                return Err(MixerError::TrackUnreadable(format!(
                    "{}: no audio samples",
                    background.display()
                )))
            }
            Ok(pcm) => pcm,
            Err(MixerError::Undecodable(msg)) => return Err(MixerError::TrackUnreadable(msg)),
            Err(e) => return Err(e),
        };

        Ok(Self {
            foreground,
            background,
        })
    }
}

/// One way of rendering a mix
pub trait MixRecipe: Send + Sync {
    /// Version label reported to the client
    fn version(&self) -> &'static str;

    /// Render the mix to an encoded file. Long-running implementations
    /// should return [`MixerError::Cancelled`] once `cancel` fires.
    fn render(&self, inputs: &MixInputs, cancel: &CancellationToken) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionStatus {
    Done,
    Failed,
}

/// Terminal outcome of one recipe, serialized as one NDJSON line
#[derive(Debug, Clone, Serialize)]
pub struct VersionRecord {
    pub version: String,
    pub status: VersionStatus,
    pub progress: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VersionRecord {
    fn done(version: &str, progress: String, bytes: &[u8]) -> Self {
        Self {
            version: version.to_string(),
            status: VersionStatus::Done,
            progress,
            data: Some(base64::engine::general_purpose::STANDARD.encode(bytes)),
            error: None,
        }
    }

    fn failed(version: &str, progress: String, error: String) -> Self {
        Self {
            version: version.to_string(),
            status: VersionStatus::Failed,
            progress,
            data: None,
            error: Some(error),
        }
    }

    /// JSON line including the trailing newline
    pub fn to_ndjson(&self) -> String {
        let mut line = serde_json::to_string(self).unwrap_or_else(|e| {
            serde_json::json!({
                "version": self.version,
                "status": VersionStatus::Failed,
                "progress": self.progress,
                "error": format!("serialization failed: {}", e),
            })
            .to_string()
        });
        line.push('\n');
        line
    }
}

/// Ordered set of recipes run for every mix job
#[derive(Clone)]
pub struct MixPipeline {
    recipes: Vec<Arc<dyn MixRecipe>>,
}

impl MixPipeline {
    pub fn new(recipes: Vec<Arc<dyn MixRecipe>>) -> Self {
        Self { recipes }
    }

    /// The four production recipes, v1 through v4
    pub fn standard(audio: &AudioConfig) -> Self {
        Self::new(
            RecipeKind::ALL
                .iter()
                .map(|&kind| Arc::new(StandardRecipe::new(kind, audio)) as Arc<dyn MixRecipe>)
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.recipes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipes.is_empty()
    }

    /// Run every recipe in order, yielding each outcome as it completes.
    ///
    /// The stream is lazy: nothing runs until it is polled, and dropping it
    /// cancels the job.
    pub fn run(&self, inputs: MixInputs, job_id: String) -> impl Stream<Item = VersionRecord> + Send + 'static {
        let recipes = self.recipes.clone();
        let inputs = Arc::new(inputs);
        let cancel = CancellationToken::new();
        let total = recipes.len();
        let span = tracing::info_span!("mix_job", job_id = %job_id);

        async_stream::stream! {
            let _guard = cancel.clone().drop_guard();
            let job_started = Instant::now();

            for (index, recipe) in recipes.into_iter().enumerate() {
                if cancel.is_cancelled() {
                    break;
                }
                let version = recipe.version();
                let progress = format!("{}/{}", index + 1, total);
                let started = Instant::now();

                let task_inputs = inputs.clone();
                let task_cancel = cancel.clone();
                let task_span = span.clone();
                let outcome = tokio::task::spawn_blocking(move || {
                    let _enter = task_span.enter();
                    recipe.render(&task_inputs, &task_cancel)
                })
                .await;

                let record = match outcome {
                    Ok(Ok(bytes)) => {
                        tracing::info!(
                            parent: &span,
                            version,
                            %progress,
                            bytes = bytes.len(),
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "Version rendered"
                        );
                        VersionRecord::done(version, progress, &bytes)
                    }
                    Ok(Err(MixerError::Cancelled)) => {
                        tracing::info!(parent: &span, version, "Mix job cancelled");
                        break;
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(parent: &span, version, %progress, error = %e, "Version failed");
                        VersionRecord::failed(version, progress, e.to_string())
                    }
                    Err(join_err) => {
                        let error = if join_err.is_panic() {
                            format!("recipe {} panicked", version)
                        } else {
                            join_err.to_string()
                        };
                        tracing::error!(parent: &span, version, %progress, %error, "Version task failed");
                        VersionRecord::failed(version, progress, error)
                    }
                };
                yield record;
            }

            tracing::info!(
                parent: &span,
                elapsed_ms = job_started.elapsed().as_millis() as u64,
                "Mix job finished"
            );
        }
    }
}
