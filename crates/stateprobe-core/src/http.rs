//! Request/response value types shared by checks, events and reports

use std::collections::BTreeMap;
use std::time::Duration;

use indexmap::IndexMap;

/// Ordered, case-insensitive multi-value header map.
///
/// Keys are looked up case-insensitively; the first spelling seen for a name
/// is kept for display. Repeated headers (`Set-Cookie`) keep every value in
/// arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: IndexMap<String, HeaderEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct HeaderEntry {
    name: String,
    values: Vec<String>,
}

impl Headers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value, keeping any values already present for `name`.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.entries
            .entry(name.to_ascii_lowercase())
            .or_insert_with(|| HeaderEntry {
                name,
                values: Vec::new(),
            })
            .values
            .push(value.into());
    }

    /// Replace all values for `name` with a single value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.entries.insert(
            name.to_ascii_lowercase(),
            HeaderEntry {
                name,
                values: vec![value.into()],
            },
        );
    }

    #[must_use]
    pub fn get_all(&self, name: &str) -> &[String] {
        self.entries
            .get(&name.to_ascii_lowercase())
            .map_or(&[], |e| e.values.as_slice())
    }

    #[must_use]
    pub fn first(&self, name: &str) -> Option<&str> {
        self.get_all(name).first().map(String::as_str)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_ascii_lowercase())
    }

    /// Iterate `(display name, values)` in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .values()
            .map(|e| (e.name.as_str(), e.values.as_slice()))
    }

    /// First value per header, the shape used for reproduction commands.
    #[must_use]
    pub fn first_values(&self) -> BTreeMap<String, String> {
        self.iter()
            .filter_map(|(name, values)| values.first().map(|v| (name.to_string(), v.clone())))
            .collect()
    }

    /// All values per header with deterministic key order, for reports.
    #[must_use]
    pub fn to_map(&self) -> BTreeMap<String, Vec<String>> {
        self.iter()
            .map(|(name, values)| (name.to_string(), values.to_vec()))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Self::new();
        for (k, v) in iter {
            headers.append(k, v);
        }
        headers
    }
}

/// The request that was actually sent for a case.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub uri: String,
    pub headers: Headers,
    pub body: Option<Vec<u8>>,
}

impl Request {
    /// Body as text for reports. Non UTF-8 bytes are replaced.
    #[must_use]
    pub fn encoded_body(&self) -> Option<String> {
        self.body
            .as_deref()
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }
}

/// A received HTTP response. Built once per network call and shared by
/// every check that judged it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    pub status_code: u16,
    /// Reason phrase, e.g. "Not Found"
    pub message: String,
    pub headers: Headers,
    pub content: Vec<u8>,
    pub http_version: String,
    pub elapsed: Duration,
    /// Whether TLS certificates were verified for this call
    pub verify: bool,
}

impl Response {
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.headers.first("content-type")
    }

    /// Media type without parameters: `application/json; charset=utf-8` → `application/json`
    #[must_use]
    pub fn media_type(&self) -> Option<&str> {
        self.content_type()
            .map(|ct| ct.split(';').next().unwrap_or("").trim())
    }

    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.content).into_owned()
    }

    #[must_use]
    pub fn json(&self) -> Option<serde_json::Value> {
        serde_json::from_slice(&self.content).ok()
    }

    /// Charset declared in `Content-Type`, if any.
    #[must_use]
    pub fn encoding(&self) -> Option<String> {
        self.content_type()?.split(';').skip(1).find_map(|param| {
            let (key, value) = param.split_once('=')?;
            key.trim()
                .eq_ignore_ascii_case("charset")
                .then(|| value.trim().trim_matches('"').to_string())
        })
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(content_type: &str) -> Response {
        Response {
            status_code: 200,
            message: "OK".into(),
            headers: Headers::from_iter([("Content-Type", content_type)]),
            content: br#"{"id": 1}"#.to_vec(),
            http_version: "HTTP/1.1".into(),
            elapsed: Duration::from_millis(12),
            verify: true,
        }
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let mut headers = Headers::new();
        headers.append("X-Request-Id", "abc");
        assert_eq!(headers.first("x-request-id"), Some("abc"));
        assert!(headers.contains("X-REQUEST-ID"));
    }

    #[test]
    fn repeated_headers_keep_all_values_in_order() {
        let mut headers = Headers::new();
        headers.append("Set-Cookie", "a=1");
        headers.append("set-cookie", "b=2");
        assert_eq!(headers.get_all("Set-Cookie"), ["a=1", "b=2"]);
        assert_eq!(headers.len(), 1);
        assert_eq!(
            headers.first_values().get("Set-Cookie"),
            Some(&"a=1".to_string())
        );
    }

    #[test]
    fn insert_replaces_values() {
        let mut headers = Headers::from_iter([("Accept", "text/plain"), ("Accept", "*/*")]);
        headers.insert("accept", "application/json");
        assert_eq!(headers.get_all("Accept"), ["application/json"]);
    }

    #[test]
    fn insertion_order_is_preserved() {
        let headers = Headers::from_iter([("B", "1"), ("A", "2"), ("C", "3")]);
        let names: Vec<&str> = headers.iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["B", "A", "C"]);
    }

    #[test]
    fn media_type_strips_parameters() {
        let r = response("application/json; charset=utf-8");
        assert_eq!(r.media_type(), Some("application/json"));
        assert_eq!(r.encoding(), Some("utf-8".to_string()));
    }

    #[test]
    fn json_body_parses() {
        let r = response("application/json");
        assert_eq!(r.json(), Some(serde_json::json!({"id": 1})));
        assert!(r.is_success());
    }
}
