//! Reproduction commands - renders a case as a curl invocation

use std::collections::BTreeMap;

use crate::case::Case;

/// Headers that curl computes itself.
const SKIPPED_HEADERS: &[&str] = &["host", "content-length"];

impl Case {
    /// Render a curl command that replays this case.
    ///
    /// `headers` are the headers that were actually sent (first value per
    /// name); case headers fill in anything missing. Output is a pure
    /// function of the inputs.
    #[must_use]
    pub fn as_curl_command(&self, headers: &BTreeMap<String, String>, verify: bool) -> String {
        let mut parts = vec!["curl".to_string(), "-X".to_string(), self.operation().method.clone()];

        let mut merged: BTreeMap<String, (String, String)> = BTreeMap::new();
        for (name, value) in self.headers.iter().chain(headers.iter()) {
            // Sent headers win over case headers with the same name
            merged.insert(name.to_ascii_lowercase(), (name.clone(), value.clone()));
        }
        if !self.cookies.is_empty() && !merged.contains_key("cookie") {
            let cookie = self
                .cookies
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("; ");
            merged.insert("cookie".into(), ("Cookie".into(), cookie));
        }
        if self.body.is_some() && !merged.contains_key("content-type") {
            let media_type = self
                .media_type
                .clone()
                .unwrap_or_else(|| "application/json".to_string());
            merged.insert("content-type".into(), ("Content-Type".into(), media_type));
        }

        for (key, (name, value)) in &merged {
            if SKIPPED_HEADERS.contains(&key.as_str()) {
                continue;
            }
            parts.push("-H".to_string());
            parts.push(shell_quote(&format!("{name}: {value}")));
        }

        if let Some(body) = &self.body {
            let rendered = match body {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            parts.push("-d".to_string());
            parts.push(shell_quote(&rendered));
        }

        if !verify {
            parts.push("--insecure".to_string());
        }
        parts.push(shell_quote(&self.url()));
        parts.join(" ")
    }
}

/// POSIX single-quote a word: `it's` → `'it'\''s'`
fn shell_quote(word: &str) -> String {
    format!("'{}'", word.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::OperationRef;
    use serde_json::json;
    use std::sync::Arc;

    fn post_case() -> Case {
        let op = Arc::new(OperationRef::new("POST", "/users", "http://localhost:8080"));
        let mut case = Case::new("c1", op);
        case.body = Some(json!({"name": "O'Brien"}));
        case.headers.insert("X-Trace".into(), "from-case".into());
        case
    }

    #[test]
    fn renders_post_with_body() {
        let sent = BTreeMap::from([("Authorization".to_string(), "Bearer t".to_string())]);
        insta::assert_snapshot!(
            post_case().as_curl_command(&sent, true),
            @r#"curl -X POST -H 'Authorization: Bearer t' -H 'Content-Type: application/json' -H 'X-Trace: from-case' -d '{"name":"O'\''Brien"}' 'http://localhost:8080/users'"#
        );
    }

    #[test]
    fn sent_headers_override_case_headers() {
        let sent = BTreeMap::from([("x-trace".to_string(), "sent".to_string())]);
        let cmd = post_case().as_curl_command(&sent, true);
        assert!(cmd.contains("'x-trace: sent'"));
        assert!(!cmd.contains("from-case"));
    }

    #[test]
    fn insecure_flag_follows_verify() {
        let cmd = post_case().as_curl_command(&BTreeMap::new(), false);
        assert!(cmd.contains(" --insecure "));
    }

    #[test]
    fn host_and_content_length_are_skipped() {
        let sent = BTreeMap::from([
            ("Host".to_string(), "localhost".to_string()),
            ("Content-Length".to_string(), "12".to_string()),
        ]);
        let cmd = post_case().as_curl_command(&sent, true);
        assert!(!cmd.contains("Host:"));
        assert!(!cmd.contains("Content-Length"));
    }

    #[test]
    fn cookies_become_a_header() {
        let op = Arc::new(OperationRef::new("GET", "/me", "http://api"));
        let mut case = Case::new("c2", op);
        case.cookies.insert("session".into(), "abc".into());
        let cmd = case.as_curl_command(&BTreeMap::new(), true);
        assert_eq!(cmd, "curl -X GET -H 'Cookie: session=abc' 'http://api/me'");
    }
}
