//! Load an API schema from a local file or a URL

use std::path::Path;
use std::time::Duration;

use serde_json::Value;

use super::Schema;

/// Where and how to load the schema
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Local path or `http(s)://` URL
    pub location: String,
    /// Overrides the server declared in the schema
    pub base_url: Option<String>,
    pub timeout: Duration,
}

impl LoaderConfig {
    #[must_use]
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            base_url: None,
            timeout: Duration::from_secs(10),
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: Option<String>) -> Self {
        self.base_url = base_url;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    #[error("Schema unreachable: {0}")]
    Unreachable(String),
    #[error("Cannot read schema: {0}")]
    Io(String),
    #[error("Cannot parse schema: {0}")]
    Parse(String),
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),
}

/// Fetch, parse and validate the schema at `config.location`.
///
/// # Errors
///
/// Returns a [`LoaderError`] describing the first stage that failed.
pub fn load_schema(config: &LoaderConfig) -> Result<Schema, LoaderError> {
    let location = config.location.as_str();
    let content = if is_url(location) {
        fetch(location, config.timeout)?
    } else {
        std::fs::read_to_string(location).map_err(|e| LoaderError::Io(format!("{location}: {e}")))?
    };
    let document = parse_spec(location, &content)?;
    tracing::debug!(location, "schema parsed");
    Schema::from_value(document, location, config.base_url.clone())
}

fn is_url(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

fn fetch(url: &str, timeout: Duration) -> Result<String, LoaderError> {
    let client = reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| LoaderError::Unreachable(e.to_string()))?;
    let response = client
        .get(url)
        .send()
        .map_err(|e| LoaderError::Unreachable(format!("{url}: {e}")))?;
    let status = response.status();
    if !status.is_success() {
        return Err(LoaderError::Unreachable(format!(
            "{url}: server returned {status}"
        )));
    }
    response
        .text()
        .map_err(|e| LoaderError::Unreachable(format!("{url}: {e}")))
}

/// Parse a schema document from JSON or YAML.
///
/// Detection strategy: try extension first (`.yaml`/`.yml`/`.json`), then fall
/// back to content sniffing (leading `{` → JSON, otherwise YAML).
///
/// # Errors
///
/// Returns [`LoaderError::Parse`] when the content is not valid in the
/// detected format.
pub fn parse_spec(location: &str, content: &str) -> Result<Value, LoaderError> {
    let path = location.split(['?', '#']).next().unwrap_or(location);
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let json = || {
        serde_json::from_str(content).map_err(|e| LoaderError::Parse(format!("Invalid JSON: {e}")))
    };
    let yaml = || {
        serde_yml::from_str(content).map_err(|e| LoaderError::Parse(format!("Invalid YAML: {e}")))
    };

    match ext.as_str() {
        "yaml" | "yml" => yaml(),
        "json" => json(),
        _ if content.trim_start().starts_with('{') => json(),
        _ => yaml(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL_YAML: &str = "\
openapi: 3.0.0
info:
  title: Mini
  version: '1'
paths:
  /health:
    get:
      responses:
        '200':
          description: OK
";

    #[test]
    fn parse_spec_json_by_extension() {
        let v = parse_spec("api.json", r#"{"openapi": "3.0.0"}"#).unwrap();
        assert_eq!(v["openapi"], "3.0.0");
    }

    #[test]
    fn parse_spec_yaml_by_extension() {
        let v = parse_spec("api.yml", MINIMAL_YAML).unwrap();
        assert_eq!(v["info"]["title"], "Mini");
    }

    #[test]
    fn parse_spec_url_with_query() {
        let v = parse_spec("http://host/openapi.yaml?v=2", MINIMAL_YAML).unwrap();
        assert_eq!(v["openapi"], "3.0.0");
    }

    #[test]
    fn parse_spec_sniffs_content() {
        assert!(parse_spec("schema", r#"{"a": 1}"#).unwrap().is_object());
        assert!(parse_spec("schema", "a: 1\n").unwrap().is_object());
    }

    #[test]
    fn parse_spec_invalid_json_error() {
        let err = parse_spec("api.json", "{not json").unwrap_err();
        assert!(matches!(err, LoaderError::Parse(ref m) if m.starts_with("Invalid JSON")));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("openapi.yaml");
        std::fs::write(&path, MINIMAL_YAML).unwrap();

        let config = LoaderConfig::new(path.to_string_lossy())
            .with_base_url(Some("http://127.0.0.1:9".into()));
        let schema = load_schema(&config).unwrap();
        assert_eq!(schema.get_base_url(), "http://127.0.0.1:9");
        assert_eq!(schema.statistic().operations_total, 1);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_schema(&LoaderConfig::new("/nonexistent/openapi.yaml")).unwrap_err();
        assert!(matches!(err, LoaderError::Io(_)));
    }

    #[test]
    fn unreachable_url() {
        // Port 9 (discard) is closed on test machines
        let config = LoaderConfig::new("http://127.0.0.1:9/openapi.json")
            .with_timeout(Duration::from_millis(500));
        let err = load_schema(&config).unwrap_err();
        assert!(matches!(err, LoaderError::Unreachable(_)));
    }
}
