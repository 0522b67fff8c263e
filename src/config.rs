use std::collections::HashMap;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::classifier::{BugCategory, WeightProfile};
use crate::error::{FaultlineError, Result};
use crate::indexer::Bm25Params;

/// File name searched for during config discovery.
pub const CONFIG_FILE_NAME: &str = "faultline.toml";

/// Top-level configuration for faultline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub bm25: Bm25Params,
    pub pipeline: PipelineConfig,
    pub extraction: ExtractionConfig,
    /// Per-category weight profile overrides, keyed by category name.
    pub weights: HashMap<String, WeightProfile>,
    pub scan: ScanConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Judgments returned per localization.
    pub top_k: usize,
    /// Relevance hits considered when gathering candidates.
    pub relevance_pool: usize,
    /// Upper bound on the candidate set.
    pub max_candidates: usize,
    /// Overall deadline for external calls in one localization.
    pub deadline_ms: Option<u64>,
    /// Budget for a single external collaborator call.
    pub call_timeout_ms: u64,
    /// Concurrent source-text fetches in the pattern agent.
    pub source_fetch_concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExtractionConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub model: String,
    /// Environment variable holding a bearer token, if the endpoint needs one.
    pub api_key_env: Option<String>,
    pub timeout_ms: u64,
    pub min_interval_ms: u64,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScanConfig {
    pub ignore: Vec<String>,
    pub source_extensions: Vec<String>,
}

// --- Defaults ---

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            relevance_pool: 100,
            max_candidates: 100,
            deadline_ms: None,
            call_timeout_ms: 5_000,
            source_fetch_concurrency: 8,
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "http://localhost:1234/v1/chat/completions".into(),
            model: "local-model".into(),
            api_key_env: None,
            timeout_ms: 60_000,
            min_interval_ms: 1_000,
            max_retries: 3,
            initial_backoff_ms: 10_000,
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            ignore: vec![
                "target".into(),
                "build".into(),
                "out".into(),
                "bin".into(),
                "node_modules".into(),
                ".gradle".into(),
                ".idea".into(),
            ],
            source_extensions: vec!["java".into(), "aj".into(), "kt".into(), "scala".into()],
        }
    }
}

// --- Config methods ---

impl Config {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            FaultlineError::io(format!("reading config from '{}'", path.display()), e)
        })?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| FaultlineError::config_with_source("failed to parse config", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        self.validate()?;
        let content = toml::to_string_pretty(self)
            .map_err(|e| FaultlineError::config_with_source("failed to serialize config", e))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                FaultlineError::io(
                    format!("creating config directory '{}'", parent.display()),
                    e,
                )
            })?;
        }
        std::fs::write(path, content).map_err(|e| {
            FaultlineError::io(format!("writing config to '{}'", path.display()), e)
        })
    }

    /// Validate config values.
    ///
    /// Weight overrides must name a known category and be normalizable;
    /// an all-zero override surfaces as [`FaultlineError::WeightProfile`].
    pub fn validate(&self) -> Result<()> {
        self.bm25.validate()?;

        if self.pipeline.top_k == 0 {
            return Err(FaultlineError::validation(
                "pipeline.top_k",
                "must be greater than 0",
            ));
        }
        if self.pipeline.max_candidates == 0 {
            return Err(FaultlineError::validation(
                "pipeline.max_candidates",
                "must be greater than 0",
            ));
        }
        if self.pipeline.call_timeout_ms == 0 {
            return Err(FaultlineError::validation(
                "pipeline.call_timeout_ms",
                "must be greater than 0",
            ));
        }
        if self.pipeline.source_fetch_concurrency == 0 {
            return Err(FaultlineError::validation(
                "pipeline.source_fetch_concurrency",
                "must be greater than 0",
            ));
        }

        if self.extraction.enabled && self.extraction.endpoint.trim().is_empty() {
            return Err(FaultlineError::validation(
                "extraction.endpoint",
                "must be set when extraction is enabled",
            ));
        }

        for (key, profile) in &self.weights {
            key.parse::<BugCategory>()?;
            profile.normalized().map_err(|e| {
                FaultlineError::weight_profile(format!("weights.{key}: {e}"))
            })?;
        }

        if self.scan.source_extensions.is_empty() {
            return Err(FaultlineError::validation(
                "scan.source_extensions",
                "must list at least one extension",
            ));
        }
        Ok(())
    }

    /// Merge overrides on top of this config (non-default fields win).
    pub fn merge(&mut self, overrides: Config) {
        let defaults = Config::default();
        if overrides.bm25 != defaults.bm25 {
            self.bm25 = overrides.bm25;
        }
        if overrides.pipeline != defaults.pipeline {
            self.pipeline = overrides.pipeline;
        }
        if overrides.extraction != defaults.extraction {
            self.extraction = overrides.extraction;
        }
        if overrides.scan != defaults.scan {
            self.scan = overrides.scan;
        }
        self.weights.extend(overrides.weights);
    }
}

/// Builder for constructing Config with selective overrides.
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.config.pipeline.top_k = top_k;
        self
    }

    pub fn with_deadline_ms(mut self, deadline_ms: Option<u64>) -> Self {
        self.config.pipeline.deadline_ms = deadline_ms;
        self
    }

    pub fn with_bm25(mut self, k1: f64, b: f64) -> Self {
        self.config.bm25 = Bm25Params { k1, b };
        self
    }

    pub fn with_extraction_enabled(mut self, enabled: bool) -> Self {
        self.config.extraction.enabled = enabled;
        self
    }

    pub fn with_weights(mut self, category: impl Into<String>, profile: WeightProfile) -> Self {
        self.config.weights.insert(category.into(), profile);
        self
    }

    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Discover the config file using standard search order:
/// 1. Explicit path (if provided)
/// 2. ./faultline.toml
/// 3. ~/.faultline.toml
/// 4. XDG config dir
pub fn find_config_file(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(p) = explicit {
        if p.exists() {
            return Some(p.to_path_buf());
        }
        return None;
    }

    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.exists() {
        return Some(local);
    }

    if let Some(home) = dirs_home() {
        let home_config = home.join(format!(".{CONFIG_FILE_NAME}"));
        if home_config.exists() {
            return Some(home_config);
        }
    }

    if let Some(proj_dirs) = ProjectDirs::from("", "", "faultline") {
        let xdg = proj_dirs.config_dir().join(CONFIG_FILE_NAME);
        if xdg.exists() {
            return Some(xdg);
        }
    }

    None
}

fn dirs_home() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf())
}
