//! Output sanitisation.
//!
//! Walks the result tree of every dispatched action with bounded depth,
//! list size and string length, truncating over-limit content with literal
//! markers and redacting prompt-injection phrasing. Numeric, boolean and
//! null leaves pass through untouched.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

const TRUNCATED_MARKER: &str = "...[TRUNCATED]";
const DEPTH_MARKER: &str = "[TRUNCATED: depth limit]";
const REDACTED_MARKER: &str = "[REDACTED: possible prompt injection]";

static INJECTION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)ignore\s+(all\s+)?previous\s+instructions[^.!\n]*",
        r"(?i)disregard\s+(all\s+)?(prior|previous)\s+(instructions|context)[^.!\n]*",
        r"(?i)you\s+are\s+now\s+(a|an|the)\s+[^.!\n]*",
        r"(?i)system\s*(prompt|override)\s*:[^\n]*",
        r"(?i)<\s*/?\s*(system|assistant)\s*>",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("built-in injection pattern"))
    .collect()
});

#[derive(Debug, Clone)]
pub struct OutputSanitizer {
    pub max_depth: usize,
    pub max_list_items: usize,
    pub max_str_len: usize,
    pub injection_scan: bool,
}

impl Default for OutputSanitizer {
    fn default() -> Self {
        Self {
            max_depth: 16,
            max_list_items: 256,
            max_str_len: 16_384,
            injection_scan: true,
        }
    }
}

impl OutputSanitizer {
    pub fn new(max_depth: usize, max_list_items: usize, max_str_len: usize, injection_scan: bool) -> Self {
        Self {
            max_depth,
            max_list_items,
            max_str_len,
            injection_scan,
        }
    }

    pub fn sanitize(&self, value: &Value) -> Value {
        self.walk(value, 0)
    }

    fn walk(&self, value: &Value, depth: usize) -> Value {
        match value {
            Value::String(s) => Value::String(self.sanitize_string(s)),
            Value::Array(items) => {
                if depth >= self.max_depth {
                    return Value::String(DEPTH_MARKER.to_string());
                }
                items
                    .iter()
                    .take(self.max_list_items)
                    .map(|v| self.walk(v, depth + 1))
                    .collect()
            }
            Value::Object(map) => {
                if depth >= self.max_depth {
                    return Value::String(DEPTH_MARKER.to_string());
                }
                let mut out = serde_json::Map::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(k.clone(), self.walk(v, depth + 1));
                }
                Value::Object(out)
            }
            leaf => leaf.clone(),
        }
    }

    fn sanitize_string(&self, s: &str) -> String {
        let mut out = if s.chars().count() > self.max_str_len {
            let truncated: String = s.chars().take(self.max_str_len).collect();
            format!("{truncated}{TRUNCATED_MARKER}")
        } else {
            s.to_string()
        };
        if self.injection_scan {
            for pattern in INJECTION_PATTERNS.iter() {
                if pattern.is_match(&out) {
                    out = pattern.replace_all(&out, REDACTED_MARKER).into_owned();
                }
            }
        }
        out
    }
}
