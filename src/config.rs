//! Server configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default listening port
pub const DEFAULT_PORT: u16 = 8000;

/// Audio rendering configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Working sample rate for decoding, DSP and MP3 output
    pub sample_rate: u32,

    /// MP3 bitrate in bps
    pub mp3_bitrate: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            mp3_bitrate: 192_000,
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Directory holding the background tracks
    pub tracks_dir: PathBuf,

    /// Audio configuration
    pub audio: AudioConfig,

    /// Enable CORS
    pub cors_enabled: bool,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Log output format (pretty, json)
    pub log_format: String,

    /// Maximum request body size in megabytes
    pub max_upload_mb: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            tracks_dir: PathBuf::from("tracks"),
            audio: AudioConfig::default(),
            cors_enabled: true,
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            max_upload_mb: 50,
        }
    }
}

impl ServerConfig {
    /// Get the socket address string
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Maximum request body size in bytes
    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb * 1024 * 1024
    }

    /// Apply `PORT`, `HOST` and `TRACKS_DIR` from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("PORT") {
            match port.trim().parse::<u16>() {
                Ok(p) => self.port = p,
                Err(e) => tracing::warn!("Ignoring invalid PORT value {:?}: {}", port, e),
            }
        }
        if let Some(host) = lookup("HOST").filter(|h| !h.trim().is_empty()) {
            self.host = host.trim().to_string();
        }
        if let Some(dir) = lookup("TRACKS_DIR").filter(|d| !d.trim().is_empty()) {
            self.tracks_dir = PathBuf::from(dir.trim());
        }
    }
}
