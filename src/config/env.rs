//! Environment variable configuration
//!
//! Provides environment variable overrides for configuration, and the
//! variables handed to each unit.

use std::env;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "SUITE_ORCH";

/// Environment configuration from environment variables
#[derive(Clone, Debug, Default)]
pub struct EnvConfig {
    /// Unit directory from SUITE_ORCH_UNIT_DIR
    pub unit_dir: Option<String>,
    /// Results directory from SUITE_ORCH_RESULTS_DIR
    pub results_dir: Option<String>,
    /// Report document from SUITE_ORCH_REPORT
    pub report: Option<String>,
    /// Concurrency cap from SUITE_ORCH_MAX_PARALLEL
    pub max_parallel: Option<usize>,
    /// Stagger delay from SUITE_ORCH_STAGGER_MS
    pub stagger_ms: Option<u64>,
    /// Unit timeout from SUITE_ORCH_TIMEOUT
    pub timeout: Option<u64>,
    /// Config file from SUITE_ORCH_CONFIG
    pub config_file: Option<String>,
    /// Run as if every group were sequential, SUITE_ORCH_SEQUENTIAL
    pub sequential: Option<bool>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self {
            unit_dir: get_env("UNIT_DIR"),
            results_dir: get_env("RESULTS_DIR"),
            report: get_env("REPORT"),
            max_parallel: get_env_parse("MAX_PARALLEL"),
            stagger_ms: get_env_parse("STAGGER_MS"),
            timeout: get_env_parse("TIMEOUT"),
            config_file: get_env("CONFIG"),
            sequential: get_env_bool("SEQUENTIAL"),
        }
    }

    /// Check if any environment variables are set
    pub fn has_any(&self) -> bool {
        self.unit_dir.is_some()
            || self.results_dir.is_some()
            || self.report.is_some()
            || self.max_parallel.is_some()
            || self.stagger_ms.is_some()
            || self.timeout.is_some()
            || self.config_file.is_some()
            || self.sequential.is_some()
    }

    /// Print current environment configuration
    pub fn print_summary(&self) {
        println!("Environment Configuration:");
        println!("  {}_UNIT_DIR:      {:?}", ENV_PREFIX, self.unit_dir);
        println!("  {}_RESULTS_DIR:   {:?}", ENV_PREFIX, self.results_dir);
        println!("  {}_REPORT:        {:?}", ENV_PREFIX, self.report);
        println!("  {}_MAX_PARALLEL:  {:?}", ENV_PREFIX, self.max_parallel);
        println!("  {}_STAGGER_MS:    {:?}", ENV_PREFIX, self.stagger_ms);
        println!("  {}_TIMEOUT:       {:?}", ENV_PREFIX, self.timeout);
        println!("  {}_CONFIG:        {:?}", ENV_PREFIX, self.config_file);
        println!("  {}_SEQUENTIAL:    {:?}", ENV_PREFIX, self.sequential);
    }
}

/// Full name of a prefixed variable
pub fn env_name(name: &str) -> String {
    format!("{ENV_PREFIX}_{name}")
}

/// Get environment variable with prefix
pub fn get_env(name: &str) -> Option<String> {
    env::var(env_name(name)).ok().filter(|v| !v.is_empty())
}

/// Get environment variable and parse to type
pub fn get_env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    get_env(name).and_then(|v| v.trim().parse().ok())
}

/// Get environment variable as boolean
fn get_env_bool(name: &str) -> Option<bool> {
    get_env(name).map(|v| {
        matches!(
            v.to_lowercase().as_str(),
            "1" | "true" | "yes" | "on" | "enabled"
        )
    })
}

/// Builder for setting environment variables (useful for testing)
pub struct EnvBuilder {
    vars: Vec<(String, String)>,
}

impl EnvBuilder {
    /// Create a new environment builder
    pub fn new() -> Self {
        Self { vars: Vec::new() }
    }

    /// Set any prefixed variable
    pub fn var(mut self, name: &str, value: impl Into<String>) -> Self {
        self.vars.push((env_name(name), value.into()));
        self
    }

    pub fn unit_dir(self, dir: impl Into<String>) -> Self {
        self.var("UNIT_DIR", dir)
    }

    pub fn results_dir(self, dir: impl Into<String>) -> Self {
        self.var("RESULTS_DIR", dir)
    }

    pub fn max_parallel(self, max: usize) -> Self {
        self.var("MAX_PARALLEL", max.to_string())
    }

    pub fn timeout(self, timeout: u64) -> Self {
        self.var("TIMEOUT", timeout.to_string())
    }

    pub fn sequential(self, sequential: bool) -> Self {
        self.var("SEQUENTIAL", sequential.to_string())
    }

    /// Apply environment variables
    pub fn apply(self) {
        for (key, value) in self.vars {
            env::set_var(key, value);
        }
    }

    /// Apply and return guard that restores on drop
    pub fn apply_scoped(self) -> EnvGuard {
        let previous: Vec<_> = self
            .vars
            .iter()
            .map(|(k, _)| (k.clone(), env::var(k).ok()))
            .collect();

        self.apply();

        EnvGuard { previous }
    }
}

impl Default for EnvBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard that restores environment variables on drop
pub struct EnvGuard {
    previous: Vec<(String, Option<String>)>,
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in &self.previous {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }
    }
}

/// Print all SUITE_ORCH environment variables
pub fn print_env_help() {
    println!("Environment Variables:");
    println!();
    println!("  {ENV_PREFIX}_CONFIG        Path to configuration file");
    println!("  {ENV_PREFIX}_UNIT_DIR      Directory containing test_<NN>_<name> units");
    println!("  {ENV_PREFIX}_RESULTS_DIR   Directory for records, captures and history");
    println!("  {ENV_PREFIX}_REPORT        Report document to update after a run");
    println!("  {ENV_PREFIX}_MAX_PARALLEL  Maximum concurrently running background units");
    println!("  {ENV_PREFIX}_STAGGER_MS    Delay between background launches");
    println!("  {ENV_PREFIX}_TIMEOUT       Per-unit timeout in seconds (0 disables)");
    println!("  {ENV_PREFIX}_SEQUENTIAL    Run every group sequentially (true/false)");
    println!("  {ENV_PREFIX}_LOG           Log filter (e.g. debug, suite_orchestrator=trace)");
    println!();
    println!("Provided to each unit:");
    println!();
    println!("  {ENV_PREFIX}_RESULT_FILE   Where the unit writes its result record");
    println!("  {ENV_PREFIX}_RUN_TIMESTAMP Timestamp shared by every unit in the run");
    println!("  {ENV_PREFIX}_RESULTS_DIR   Results directory");
    println!("  {ENV_PREFIX}_UNIT_ID       Numeric unit identifier");
    println!("  {ENV_PREFIX}_UNIT_NAME     Unit display name");
    println!();
    println!("Example:");
    println!("  export {ENV_PREFIX}_UNIT_DIR=tests");
    println!("  export {ENV_PREFIX}_MAX_PARALLEL=4");
    println!("  suite-orchestrator run");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_config_default() {
        let config = EnvConfig::default();
        assert!(config.unit_dir.is_none());
        assert!(!config.has_any());
    }

    #[test]
    fn test_env_builder() {
        let _guard = EnvBuilder::new()
            .unit_dir("/srv/units")
            .max_parallel(3)
            .timeout(60)
            .apply_scoped();

        let config = EnvConfig::load();
        assert_eq!(config.unit_dir, Some("/srv/units".to_string()));
        assert_eq!(config.max_parallel, Some(3));
        assert_eq!(config.timeout, Some(60));
        assert!(config.has_any());
    }

    #[test]
    fn test_env_bool_parsing() {
        let _guard = EnvBuilder::new().sequential(true).apply_scoped();

        let config = EnvConfig::load();
        assert_eq!(config.sequential, Some(true));
    }

    #[test]
    fn test_unparseable_value_ignored() {
        let _guard = EnvBuilder::new().var("STAGGER_MS", "soon").apply_scoped();
        assert_eq!(EnvConfig::load().stagger_ms, None);
    }

    #[test]
    fn test_env_name() {
        assert_eq!(env_name("RESULT_FILE"), "SUITE_ORCH_RESULT_FILE");
    }
}
