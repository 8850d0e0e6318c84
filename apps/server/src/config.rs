//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.
//! Defaults reproduce the reference pacing (1024-byte chunks, 16 per
//! second); the CLI's positional arguments always win.

use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use snowcast_core::constants::{CHUNKS_PER_SECOND, CHUNK_SIZE};
use snowcast_core::PacingConfig;

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the control listener binds to.
    /// Override: `SNOWCAST_BIND_HOST`
    pub bind_host: IpAddr,

    /// Bytes per song-data chunk (one UDP datagram each).
    /// Override: `SNOWCAST_CHUNK_SIZE`
    pub chunk_size: usize,

    /// Fan-out ticks per second per station.
    /// Override: `SNOWCAST_CHUNKS_PER_SECOND`
    pub chunks_per_second: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            chunk_size: CHUNK_SIZE,
            chunks_per_second: CHUNKS_PER_SECOND,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("SNOWCAST_BIND_HOST") {
            if let Ok(host) = val.parse() {
                self.bind_host = host;
            }
        }

        if let Ok(val) = std::env::var("SNOWCAST_CHUNK_SIZE") {
            if let Ok(size) = val.parse() {
                self.chunk_size = size;
            }
        }

        if let Ok(val) = std::env::var("SNOWCAST_CHUNKS_PER_SECOND") {
            if let Ok(rate) = val.parse() {
                self.chunks_per_second = rate;
            }
        }
    }

    /// Converts to the core's validated pacing configuration.
    pub fn to_pacing_config(&self) -> Result<PacingConfig> {
        PacingConfig::new(self.chunk_size, self.chunks_per_second).map_err(anyhow::Error::msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn defaults_match_reference_pacing() {
        let config = ServerConfig::default();
        assert_eq!(config.chunk_size, 1024);
        assert_eq!(config.chunks_per_second, 16);
        assert!(config.to_pacing_config().is_ok());
    }

    #[test]
    fn yaml_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "chunk_size: 512\nbind_host: 127.0.0.1").unwrap();
        let config = ServerConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.chunk_size, 512);
        assert_eq!(config.bind_host, IpAddr::V4(Ipv4Addr::LOCALHOST));
        // Unspecified keys keep their defaults.
        assert_eq!(config.chunks_per_second, 16);
    }

    #[test]
    fn invalid_pacing_is_rejected() {
        let config = ServerConfig {
            chunk_size: 0,
            ..Default::default()
        };
        assert!(config.to_pacing_config().is_err());
    }
}
