//! Application state
//!
//! Everything a request needs: configuration, the track catalog, and the
//! two job runners. Jobs themselves keep no shared mutable state.

use crate::catalog::TrackCatalog;
use crate::config::ServerConfig;
use crate::mix::MixPipeline;
use crate::tempo::TempoJob;

pub struct AppState {
    pub config: ServerConfig,
    pub catalog: TrackCatalog,
    pub pipeline: MixPipeline,
    pub tempo: TempoJob,
}

impl AppState {
    /// State with the production recipes and retimer
    pub fn new(config: ServerConfig) -> Self {
        let pipeline = MixPipeline::standard(&config.audio);
        let tempo = TempoJob::standard(&config.audio);
        Self::with_jobs(config, pipeline, tempo)
    }

    pub fn with_jobs(config: ServerConfig, pipeline: MixPipeline, tempo: TempoJob) -> Self {
        let catalog = TrackCatalog::new(config.tracks_dir.clone());
        Self {
            config,
            catalog,
            pipeline,
            tempo,
        }
    }
}
