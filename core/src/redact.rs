//! Credential redaction: masks values keyed by a configured set of
//! case-insensitive patterns before anything reaches a log line, an
//! evidence record, or an event payload.

use regex::RegexSet;
use serde_json::Value;

/// Compiled form of `RedactionConfig::credential_key_patterns`.
#[derive(Clone)]
pub struct Redactor {
    key_patterns: RegexSet,
}

const MASK: &str = "***REDACTED***";

impl Redactor {
    pub fn new(patterns: &[String]) -> Self {
        let key_patterns = RegexSet::new(patterns).unwrap_or_else(|_| RegexSet::empty());
        Self { key_patterns }
    }

    fn key_is_sensitive(&self, key: &str) -> bool {
        self.key_patterns.is_match(key)
    }

    /// Redact object values whose key matches a credential pattern,
    /// recursing into nested objects and arrays.
    pub fn redact_value(&self, value: &Value) -> Value {
        match value {
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| {
                        if self.key_is_sensitive(k) {
                            (k.clone(), Value::String(MASK.to_string()))
                        } else {
                            (k.clone(), self.redact_value(v))
                        }
                    })
                    .collect(),
            ),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.redact_value(v)).collect()),
            other => other.clone(),
        }
    }

    /// Scrub a free-form text blob (stdout/stderr tails) for `key=value` or
    /// `key: value` pairs whose key matches a credential pattern.
    pub fn redact_text(&self, text: &str) -> String {
        text.lines()
            .map(|line| self.redact_line(line))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn redact_line(&self, line: &str) -> String {
        for sep in ['=', ':'] {
            if let Some(idx) = line.find(sep) {
                let key = line[..idx].trim();
                if self.key_is_sensitive(key) {
                    return format!("{}{}{}", &line[..idx], sep, MASK);
                }
            }
        }
        line.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RedactionConfig;

    fn redactor() -> Redactor {
        Redactor::new(&RedactionConfig::default().credential_key_patterns)
    }

    #[test]
    fn masks_sensitive_object_key() {
        let redactor = redactor();
        let value = serde_json::json!({"api_key": "sk-live-abc123", "task": "do a thing"});
        let redacted = redactor.redact_value(&value);
        assert_eq!(redacted["api_key"], "***REDACTED***");
        assert_eq!(redacted["task"], "do a thing");
    }

    #[test]
    fn recurses_into_nested_objects() {
        let redactor = redactor();
        let value = serde_json::json!({"outer": {"token": "xyz"}});
        let redacted = redactor.redact_value(&value);
        assert_eq!(redacted["outer"]["token"], "***REDACTED***");
    }

    #[test]
    fn masks_key_value_pairs_in_text() {
        let redactor = redactor();
        let text = "starting up\nAPI_KEY=sk-abcdef\ndone";
        let redacted = redactor.redact_text(text);
        assert!(redacted.contains("API_KEY=***REDACTED***"));
        assert!(redacted.contains("starting up"));
    }

    #[test]
    fn leaves_unrelated_lines_untouched() {
        let redactor = redactor();
        let text = "plain output line";
        assert_eq!(redactor.redact_text(text), text);
    }
}
