//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::path::Path;

use anyhow::{Context, Result};
use audiocrypt_core::PipelineConfig;
use serde::Deserialize;

/// Selects the [`audiocrypt_core::SliceIdGenerator`] implementation wired
/// into the producer's track factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SliceIdStrategy {
    Nanoid,
    Uuid,
    Sequential,
    Timestamp,
    Hash,
}

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port to bind the HTTP server to.
    /// Override: `AUDIOCRYPT_BIND_PORT`
    pub bind_port: u16,

    /// Duration of each slice in milliseconds.
    pub slice_duration_ms: u32,

    /// DEFLATE compression level (0-9).
    pub compression_level: u8,

    /// Randomizes slice length by `slice_length_variance` to obscure
    /// fixed-duration boundaries.
    pub randomize_slice_length: bool,
    pub slice_length_variance: f64,

    /// Number of slices to eagerly prepare after key exchange.
    pub prewarm_slices: u32,
    pub prewarm_concurrency: usize,

    /// Lowers the compression level for already-compressed containers.
    pub adaptive_compression: bool,

    /// Per-track slice cache bound.
    pub server_cache_size: usize,
    pub server_cache_ttl_ms: u64,

    pub track_processing_concurrency: usize,
    pub prewarm_first_track: bool,

    /// Strategy used to mint opaque slice ids.
    pub slice_id_strategy: SliceIdStrategy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let pipeline = PipelineConfig::default();
        Self {
            bind_port: 8787,
            slice_duration_ms: pipeline.slice_duration_ms,
            compression_level: pipeline.compression_level,
            randomize_slice_length: pipeline.randomize_slice_length,
            slice_length_variance: pipeline.slice_length_variance,
            prewarm_slices: pipeline.prewarm_slices,
            prewarm_concurrency: pipeline.prewarm_concurrency,
            adaptive_compression: pipeline.adaptive_compression,
            server_cache_size: pipeline.server_cache_size,
            server_cache_ttl_ms: pipeline.server_cache_ttl_ms,
            track_processing_concurrency: pipeline.track_processing_concurrency,
            prewarm_first_track: pipeline.prewarm_first_track,
            slice_id_strategy: SliceIdStrategy::Nanoid,
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
        if let Ok(val) = std::env::var("AUDIOCRYPT_BIND_PORT") {
            if let Ok(port) = val.parse() {
                self.bind_port = port;
            }
        }

        if let Ok(val) = std::env::var("AUDIOCRYPT_SLICE_DURATION_MS") {
            if let Ok(ms) = val.parse() {
                self.slice_duration_ms = ms;
            }
        }

        if let Ok(val) = std::env::var("AUDIOCRYPT_COMPRESSION_LEVEL") {
            if let Ok(level) = val.parse() {
                self.compression_level = level;
            }
        }
    }

    /// Converts to the core crate's producer pipeline configuration.
    pub fn to_pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            slice_duration_ms: self.slice_duration_ms,
            compression_level: self.compression_level,
            randomize_slice_length: self.randomize_slice_length,
            slice_length_variance: self.slice_length_variance,
            prewarm_slices: self.prewarm_slices,
            prewarm_concurrency: self.prewarm_concurrency,
            adaptive_compression: self.adaptive_compression,
            server_cache_size: self.server_cache_size,
            server_cache_ttl_ms: self.server_cache_ttl_ms,
            track_processing_concurrency: self.track_processing_concurrency,
            prewarm_first_track: self.prewarm_first_track,
        }
    }
}
