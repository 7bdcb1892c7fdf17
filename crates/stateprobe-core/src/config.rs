//! Project configuration for stateful conformance runs

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Project configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// API schema: local path or http(s) URL
    #[serde(default)]
    pub location: Option<String>,

    /// Overrides the server declared in the schema
    #[serde(default)]
    pub base_url: Option<String>,

    /// HTTP headers sent with every request (auth, API keys, etc.)
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub checks: ChecksConfig,

    /// Target metrics to maximize, e.g. `["response_time"]`
    #[serde(default)]
    pub targets: Vec<String>,

    #[serde(default)]
    pub filters: FiltersConfig,

    /// Write a JUnit XML report here
    #[serde(default)]
    pub junit_xml: Option<PathBuf>,

    /// Record every interaction
    #[serde(default)]
    pub cassette: Option<CassetteConfig>,

    #[serde(default)]
    pub output: OutputConfig,
}

/// Limits of the stateful run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// RNG seed; random when absent
    pub seed: Option<u64>,
    /// Upper bound on suites. A run also ends after a suite finds nothing new.
    pub max_suites: usize,
    pub scenarios_per_suite: usize,
    /// Steps per scenario (each scenario picks 1..=max_steps)
    pub max_steps: usize,
    /// Probability of generating a negative case, 0.0..=1.0
    pub negative_ratio: f64,
    /// End the run at the first failing scenario
    pub stop_on_failure: bool,
    /// Per-request timeout in seconds
    pub request_timeout: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            seed: None,
            max_suites: 5,
            scenarios_per_suite: 20,
            max_steps: 5,
            negative_ratio: 0.0,
            stop_on_failure: false,
            request_timeout: 10.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChecksConfig {
    /// Check names to run; empty runs every built-in check
    pub enabled: Vec<String>,
    /// Response time limit in seconds (disabled when absent)
    pub max_response_time: Option<f64>,
}

/// Operation filters.
///
/// Each entry is one of `"GET /users"` (operation), `"method:POST"`,
/// `"path:/admin"` (prefix) or `"tag:billing"`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FiltersConfig {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CassetteFormat {
    #[default]
    Vcr,
    Jsonl,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CassetteConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub format: CassetteFormat,
    #[serde(default = "default_true")]
    pub mask_sensitive_headers: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Mask credentials in printed reproduction commands
    pub sanitize: bool,
    /// Maximum response body characters shown in the summary; 0 shows all
    pub truncate_body: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            sanitize: true,
            truncate_body: 200,
        }
    }
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load config from file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e.to_string()))?;

        let config: Self = if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?
        } else {
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?
        };
        config.validate()?;
        Ok(config)
    }

    /// Load from default location (.stateprobe.toml)
    pub fn load_default() -> Result<Self, ConfigError> {
        let candidates = [".stateprobe.toml", ".stateprobe.json", "stateprobe.toml"];

        for name in candidates {
            let path = Path::new(name);
            if path.exists() {
                return Self::load(path);
            }
        }

        // No config file, return default
        Ok(Self::default())
    }

    /// Reject values the engine cannot run with.
    ///
    /// # Errors
    ///
    /// Returns the first invalid field found
    pub fn validate(&self) -> Result<(), ConfigError> {
        let engine = &self.engine;
        if !(0.0..=1.0).contains(&engine.negative_ratio) {
            return Err(ConfigError::Invalid(format!(
                "engine.negative_ratio must be within 0.0..=1.0, got {}",
                engine.negative_ratio
            )));
        }
        if engine.max_steps == 0 {
            return Err(ConfigError::Invalid(
                "engine.max_steps must be at least 1".into(),
            ));
        }
        if engine.request_timeout <= 0.0 {
            return Err(ConfigError::Invalid(
                "engine.request_timeout must be positive".into(),
            ));
        }
        if self.checks.max_response_time.is_some_and(|limit| limit <= 0.0) {
            return Err(ConfigError::Invalid(
                "checks.max_response_time must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Create example config file
    pub fn example() -> &'static str {
        r#"# stateprobe configuration

# API schema (local file or URL)
location = "openapi.yaml"

# Server to test (defaults to the schema's first server)
# base_url = "http://localhost:8080"

# Write a JUnit XML report
# junit_xml = "stateprobe-junit.xml"

# Metrics the generator should try to maximize
# targets = ["response_time"]

# HTTP headers (auth, api keys)
[headers]
Authorization = "Bearer your-token-here"
# X-API-Key = "your-api-key"

[engine]
# seed = 42
max_suites = 5
scenarios_per_suite = 20
max_steps = 5
negative_ratio = 0.0
stop_on_failure = false
request_timeout = 10.0

[checks]
# Empty list runs every built-in check
enabled = []
# max_response_time = 2.0

[filters]
# include = ["GET /users", "tag:orders"]
# exclude = ["method:DELETE", "path:/admin"]

# Record every request/response
# [cassette]
# path = "stateprobe-cassette.yaml"
# format = "vcr"            # or "jsonl"
# mask_sensitive_headers = true

[output]
sanitize = true
truncate_body = 200
"#
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read {0}: {1}")]
    Io(PathBuf, String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert!(config.location.is_none());
        assert_eq!(config.engine.max_suites, 5);
        assert_eq!(config.engine.max_steps, 5);
        assert!(config.output.sanitize);
        assert!(config.cassette.is_none());
    }

    #[test]
    fn parse_toml() {
        let toml = r#"
location = "api.yaml"
base_url = "http://localhost:3000"
targets = ["response_time"]
junit_xml = "out/junit.xml"

[headers]
Authorization = "Bearer token123"

[engine]
seed = 7
max_steps = 3

[checks]
enabled = ["not_a_server_error"]
max_response_time = 1.5

[filters]
exclude = ["method:DELETE"]

[cassette]
path = "cassette.jsonl"
format = "jsonl"
"#;
        let config: Config = toml::from_str(toml).unwrap();

        assert_eq!(config.location.as_deref(), Some("api.yaml"));
        assert_eq!(config.base_url.as_deref(), Some("http://localhost:3000"));
        assert_eq!(config.headers["Authorization"], "Bearer token123");
        assert_eq!(config.engine.seed, Some(7));
        assert_eq!(config.engine.max_steps, 3);
        // untouched fields keep defaults
        assert_eq!(config.engine.scenarios_per_suite, 20);
        assert_eq!(config.checks.enabled, vec!["not_a_server_error"]);
        assert_eq!(config.checks.max_response_time, Some(1.5));
        assert_eq!(config.filters.exclude, vec!["method:DELETE"]);
        assert_eq!(config.targets, vec!["response_time"]);
        assert_eq!(config.junit_xml, Some(PathBuf::from("out/junit.xml")));

        let cassette = config.cassette.unwrap();
        assert_eq!(cassette.format, CassetteFormat::Jsonl);
        assert!(cassette.mask_sensitive_headers);
    }

    #[test]
    fn example_config_parses() {
        let config: Config = toml::from_str(Config::example()).unwrap();
        assert_eq!(config.location.as_deref(), Some("openapi.yaml"));
        config.validate().unwrap();
    }

    #[test]
    fn load_rejects_out_of_range_ratio() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".stateprobe.toml");
        std::fs::write(&path, "[engine]\nnegative_ratio = 1.5\n").unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(err.to_string().contains("negative_ratio"));
    }

    #[test]
    fn load_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".stateprobe.json");
        std::fs::write(&path, r#"{"location": "http://api/openapi.json", "engine": {"max_suites": 1}}"#)
            .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.location.as_deref(), Some("http://api/openapi.json"));
        assert_eq!(config.engine.max_suites, 1);
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let err = Config::load(Path::new("/nonexistent/.stateprobe.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(..)));
    }
}
