use anyhow::{Context, Result};
use cactus_core::pipeline::PipelineOptions;
use cactus_core::runner::{CommandRunner, ProcessRunner};
use cactus_core::workflow_config::{cactus_root_path, CACTUS_ROOT_ENV};
use cactus_core::LogLevel;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CliConfig {
    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub jobs: JobsConfig,

    #[serde(default)]
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Directory holding the cactus_* binaries; `PATH` is used when unset
    #[serde(default)]
    pub bin_dir: Option<PathBuf>,

    #[serde(default)]
    pub log_level: LogLevel,

    #[serde(default)]
    pub step_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    #[serde(default)]
    pub retry_count: u32,

    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: u64,
}

fn default_backoff_secs() -> u64 {
    1
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            retry_count: 0,
            backoff_secs: default_backoff_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Installation root used to resolve `default` workflow configs
    #[serde(default)]
    pub cactus_root: Option<PathBuf>,
}

impl CliConfig {
    pub fn load(config_path: &Path) -> Result<Self> {
        // Load config file if it exists, otherwise use defaults
        let config: Self = if config_path.exists() {
            let content = std::fs::read_to_string(config_path)
                .context("Failed to read configuration file")?;
            toml::from_str(&content).context("Failed to parse configuration file")?
        } else {
            tracing::debug!("Configuration file not found, using defaults");
            Self::default()
        };

        Ok(config)
    }

    /// Installation root for `default` workflow configs: `CACTUS_ROOT` when
    /// set, then `[paths] cactus_root`, then the current directory
    pub fn cactus_root(&self) -> PathBuf {
        match (std::env::var_os(CACTUS_ROOT_ENV), &self.paths.cactus_root) {
            (None, Some(root)) => root.clone(),
            _ => cactus_root_path(),
        }
    }

    /// Runner for tool commands
    pub fn runner(&self) -> Arc<dyn CommandRunner> {
        match &self.tools.bin_dir {
            Some(dir) => Arc::new(ProcessRunner::with_bin_dir(dir)),
            None => Arc::new(ProcessRunner::new()),
        }
    }

    /// Pipeline defaults from the configuration file
    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            log_level: self.tools.log_level,
            step_timeout_secs: self.tools.step_timeout_secs,
            retry_count: self.jobs.retry_count,
            backoff_secs: self.jobs.backoff_secs,
            cactus_root: Some(self.cactus_root()),
            ..Default::default()
        }
    }
}
