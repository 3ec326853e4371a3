//! Configuration file management
//!
//! Handles finding, loading, and validating configuration files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::OrchestratorConfig;

/// Configuration file locations (in order of precedence)
const CONFIG_LOCATIONS: &[&str] = &[
    "./suite-orchestrator.yaml",
    "./suite-orchestrator.yml",
    "./.suite-orchestrator.yaml",
    "~/.config/suite-orchestrator/config.yaml",
];

/// Full configuration file structure
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Version of config file format
    #[serde(default = "default_version")]
    pub version: String,

    #[serde(flatten)]
    pub orchestrator: OrchestratorConfig,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            version: default_version(),
            orchestrator: OrchestratorConfig::default(),
        }
    }
}

impl ConfigFile {
    /// Find configuration file in standard locations
    pub fn find() -> Option<PathBuf> {
        CONFIG_LOCATIONS
            .iter()
            .map(|location| expand_path(location))
            .find(|path| path.exists())
    }

    /// Load from an explicit path, the first standard location, or defaults
    pub fn resolve(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        match explicit.map(Path::to_path_buf).or_else(Self::find) {
            Some(path) => Ok((Self::load(&path)?, Some(path))),
            None => Ok((Self::default(), None)),
        }
    }

    /// Load configuration from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = if is_yaml_file(path) {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?
        };

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = if is_yaml_file(path) {
            serde_yaml::to_string(self).context("Failed to serialize config")?
        } else {
            serde_json::to_string_pretty(self).context("Failed to serialize config")?
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !["1.0"].contains(&self.version.as_str()) {
            anyhow::bail!("Unsupported config version: {}", self.version);
        }

        let scheduler = &self.orchestrator.scheduler;
        if scheduler.max_parallel == 0 {
            anyhow::bail!("scheduler.max_parallel must be at least 1");
        }
        if scheduler.meta_unit.trim().is_empty() {
            anyhow::bail!("scheduler.meta_unit must not be empty");
        }

        let app = &self.orchestrator.app;
        if app.startup_marker.is_empty() || app.shutdown_marker.is_empty() {
            anyhow::bail!("app startup/shutdown markers must not be empty");
        }

        let coverage = &self.orchestrator.coverage;
        if coverage.source_markers.iter().any(|m| m.is_empty()) {
            anyhow::bail!("coverage.source_markers must not contain empty entries");
        }

        Ok(())
    }

    /// Generate example configuration
    pub fn example() -> Self {
        let mut orchestrator = OrchestratorConfig::default();
        orchestrator.scheduler.sequential_groups = [1].into_iter().collect();
        orchestrator.scheduler.max_parallel = 4;
        orchestrator.paths.report_document = Some(PathBuf::from("README.md"));
        orchestrator.coverage.ignore_file = Some(PathBuf::from(".coverage-ignore"));
        orchestrator.app.config = Some(PathBuf::from("tests/configs/test_default.json"));
        orchestrator.app.port = Some(5000);
        orchestrator.app.expected_workers = 2;

        Self {
            version: default_version(),
            orchestrator,
        }
    }
}

/// Expand ~ to home directory
pub(crate) fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

/// Check if file is YAML based on extension
pub(crate) fn is_yaml_file(path: &Path) -> bool {
    path.extension()
        .map(|e| e == "yaml" || e == "yml")
        .unwrap_or(false)
}
