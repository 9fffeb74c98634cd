//! Configuration handling for the taplink host.
//!
//! This module reads link settings from a YAML file and environment
//! variables, providing a unified configuration interface.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use taplink_session::{LinkConfig, DEFAULT_READ_CHUNK_SIZE};
use taplink_wire::{DEFAULT_MAX_BUFFER_SIZE, MIN_FRAME_SIZE};
use tracing::{info, warn};

/// Host configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaplinkConfig {
    /// Receive buffer ceiling in bytes
    pub max_buffer_bytes: usize,
    /// Bytes requested per read from the agent
    pub read_chunk_bytes: usize,
    /// Send EOT to the agent on Ctrl-C
    pub send_eot_on_exit: bool,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for TaplinkConfig {
    fn default() -> Self {
        Self {
            max_buffer_bytes: DEFAULT_MAX_BUFFER_SIZE,
            read_chunk_bytes: DEFAULT_READ_CHUNK_SIZE,
            send_eot_on_exit: true,
            log_level: "info".to_string(),
        }
    }
}

/// Root configuration structure (matches the YAML structure)
#[derive(Debug, Deserialize)]
struct RootConfig {
    link: Option<LinkSection>,
    logging: Option<LoggingSection>,
}

#[derive(Debug, Deserialize)]
struct LinkSection {
    max_buffer_bytes: Option<usize>,
    read_chunk_bytes: Option<usize>,
    send_eot_on_exit: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct LoggingSection {
    level: Option<String>,
}

impl TaplinkConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let mut config = Self::default();

        // Try to read the config file
        if let Ok(content) = std::fs::read_to_string(&config_path) {
            match serde_yaml::from_str::<RootConfig>(&content) {
                Ok(root_config) => {
                    config.apply_root_config(root_config);
                    info!("Loaded configuration from {:?}", config_path.as_ref());
                }
                Err(e) => {
                    warn!(
                        "Failed to parse config file {:?}, using defaults: {}",
                        config_path.as_ref(),
                        e
                    );
                }
            }
        } else {
            warn!("Config file {:?} not found, using defaults", config_path.as_ref());
        }

        // Override with environment variables
        config.apply_environment_overrides(|key| std::env::var(key).ok());
        config.validate()?;

        info!(
            "Link configuration: max_buffer_bytes={}, read_chunk_bytes={}, send_eot_on_exit={}",
            config.max_buffer_bytes, config.read_chunk_bytes, config.send_eot_on_exit
        );

        Ok(config)
    }

    /// Apply command line overrides and check the result again
    pub fn apply_cli_overrides(
        &mut self,
        log_level: Option<String>,
        max_buffer_bytes: Option<usize>,
        no_eot: bool,
    ) -> Result<()> {
        if let Some(level) = log_level {
            self.log_level = level;
        }
        if let Some(max_buffer) = max_buffer_bytes {
            self.max_buffer_bytes = max_buffer;
        }
        if no_eot {
            self.send_eot_on_exit = false;
        }
        self.validate()
    }

    /// Settings for the link driver
    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            max_buffer: self.max_buffer_bytes,
            read_chunk: self.read_chunk_bytes,
            send_eot_on_shutdown: self.send_eot_on_exit,
        }
    }

    fn apply_root_config(&mut self, root_config: RootConfig) {
        if let Some(link) = root_config.link {
            if let Some(max_buffer) = link.max_buffer_bytes {
                self.max_buffer_bytes = max_buffer;
            }
            if let Some(read_chunk) = link.read_chunk_bytes {
                self.read_chunk_bytes = read_chunk;
            }
            if let Some(send_eot) = link.send_eot_on_exit {
                self.send_eot_on_exit = send_eot;
            }
        }

        if let Some(level) = root_config.logging.and_then(|logging| logging.level) {
            self.log_level = level;
        }
    }

    /// Apply environment variable overrides
    fn apply_environment_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("TAPLINK_MAX_BUFFER_BYTES") {
            if let Ok(max_buffer) = value.parse::<usize>() {
                self.max_buffer_bytes = max_buffer;
                info!("Buffer limit overridden by environment: {}", max_buffer);
            }
        }

        if let Some(value) = lookup("TAPLINK_READ_CHUNK_BYTES") {
            if let Ok(read_chunk) = value.parse::<usize>() {
                self.read_chunk_bytes = read_chunk;
                info!("Read chunk size overridden by environment: {}", read_chunk);
            }
        }

        if let Some(value) = lookup("TAPLINK_SEND_EOT_ON_EXIT") {
            self.send_eot_on_exit = value.to_lowercase() == "true";
            info!("EOT on exit overridden by environment: {}", self.send_eot_on_exit);
        }
    }

    /// Reject settings the link cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_buffer_bytes < MIN_FRAME_SIZE {
            anyhow::bail!(
                "max_buffer_bytes must be at least {} (one empty frame), got {}",
                MIN_FRAME_SIZE,
                self.max_buffer_bytes
            );
        }
        if self.read_chunk_bytes == 0 {
            anyhow::bail!("read_chunk_bytes must be greater than zero");
        }
        Ok(())
    }
}
