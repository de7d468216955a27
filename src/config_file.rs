//! TOML configuration file
//!
//! Every section and key is optional. Keys left out keep the value from
//! [`ServerConfig::default`], so a file can be as small as
//!
//! ```toml
//! [catalog]
//! tracks_dir = "/srv/heartbeat/tracks"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::ServerConfig;

#[derive(Debug, Error)]
pub enum ConfigFileError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid TOML in {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("cannot serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("cannot write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub server: ServerSection,
    pub catalog: CatalogSection,
    pub audio: AudioSection,
    pub logging: LoggingSection,
    pub limits: LimitsSection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub cors_enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogSection {
    /// Directory holding the background tracks
    pub tracks_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSection {
    pub sample_rate: Option<u32>,
    /// bps
    pub mp3_bitrate: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: Option<String>,
    /// `pretty` or `json`
    pub format: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsSection {
    /// Request body limit in MB
    pub max_upload_mb: Option<usize>,
}

impl ConfigFile {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigFileError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigFileError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigFileError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigFileError> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigFileError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overwrite the fields of `config` that this file sets.
    pub fn apply_to(self, config: &mut ServerConfig) {
        let ConfigFile {
            server,
            catalog,
            audio,
            logging,
            limits,
        } = self;

        if let Some(host) = server.host {
            config.host = host;
        }
        if let Some(port) = server.port {
            config.port = port;
        }
        if let Some(cors) = server.cors_enabled {
            config.cors_enabled = cors;
        }
        if let Some(dir) = catalog.tracks_dir {
            config.tracks_dir = dir;
        }
        if let Some(rate) = audio.sample_rate {
            config.audio.sample_rate = rate;
        }
        if let Some(bitrate) = audio.mp3_bitrate {
            config.audio.mp3_bitrate = bitrate;
        }
        if let Some(level) = logging.level {
            config.log_level = level;
        }
        if let Some(format) = logging.format {
            config.log_format = format;
        }
        if let Some(mb) = limits.max_upload_mb {
            config.max_upload_mb = mb;
        }
    }
}

/// Every key spelled out
impl From<&ServerConfig> for ConfigFile {
    fn from(config: &ServerConfig) -> Self {
        Self {
            server: ServerSection {
                host: Some(config.host.clone()),
                port: Some(config.port),
                cors_enabled: Some(config.cors_enabled),
            },
            catalog: CatalogSection {
                tracks_dir: Some(config.tracks_dir.clone()),
            },
            audio: AudioSection {
                sample_rate: Some(config.audio.sample_rate),
                mp3_bitrate: Some(config.audio.mp3_bitrate),
            },
            logging: LoggingSection {
                level: Some(config.log_level.clone()),
                format: Some(config.log_format.clone()),
            },
            limits: LimitsSection {
                max_upload_mb: Some(config.max_upload_mb),
            },
        }
    }
}

/// Write a configuration file holding every default
pub fn generate_default_config<P: AsRef<Path>>(path: P) -> Result<(), ConfigFileError> {
    ConfigFile::from(&ServerConfig::default()).save(path)
}

/// Server configuration from `path` layered over the defaults.
///
/// A missing file is not an error. A file that cannot be read or parsed
/// yields the defaults plus a message for the caller to log once logging
/// is up. Environment overrides are not applied here.
pub fn load_server_config(path: &str) -> (ServerConfig, Option<String>) {
    let mut config = ServerConfig::default();
    if !Path::new(path).exists() {
        return (config, None);
    }
    match ConfigFile::load(path) {
        Ok(file) => {
            file.apply_to(&mut config);
            (config, None)
        }
        Err(e) => (config, Some(format!("{}. Using defaults.", e))),
    }
}
