//! Input scanner pipeline.
//!
//! Scanners are stateless analysers run in registration order over each
//! action's input before dispatch. Aggregation: any `Reject` blocks; a
//! `Warn` blocks only when the active profile is strict; a scanner that
//! errors degrades to `Warn` with a diagnostic threat so one broken scanner
//! cannot silently open the gate.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::profiles::PermissionProfile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanVerdict {
    Allow,
    Warn,
    Reject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreatDetail {
    pub category: String,
    pub description: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub scanner: String,
    pub verdict: ScanVerdict,
    pub risk_score: f64,
    #[serde(default)]
    pub threats: Vec<ThreatDetail>,
    #[serde(default)]
    pub details: String,
}

impl ScanResult {
    pub fn allow(scanner: &str) -> Self {
        Self {
            scanner: scanner.to_string(),
            verdict: ScanVerdict::Allow,
            risk_score: 0.0,
            threats: Vec::new(),
            details: String::new(),
        }
    }
}

/// What a scanner sees: one action's identity and (stringified) input.
#[derive(Debug, Clone)]
pub struct ScanContext {
    pub module: String,
    pub action: String,
    pub params: Map<String, Value>,
    pub plan_description: String,
}

impl ScanContext {
    /// Flattened text of every string leaf, the surface heuristics match on.
    pub fn text_surface(&self) -> String {
        let mut out = String::new();
        out.push_str(&self.plan_description);
        out.push('\n');
        collect_strings(&Value::Object(self.params.clone()), &mut out);
        out
    }
}

fn collect_strings(value: &Value, out: &mut String) {
    match value {
        Value::String(s) => {
            out.push_str(s);
            out.push('\n');
        }
        Value::Array(items) => items.iter().for_each(|v| collect_strings(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_strings(v, out)),
        _ => {}
    }
}

pub trait InputScanner: Send + Sync {
    fn name(&self) -> &str;
    fn scan(&self, ctx: &ScanContext) -> ScanResult;
}

/// One regex rule of the heuristic scanner.
pub struct PatternRule {
    pub category: String,
    pub pattern: Regex,
    pub score: f64,
    pub description: String,
}

static DEFAULT_RULES: Lazy<Vec<PatternRule>> = Lazy::new(|| {
    let rule = |category: &str, pattern: &str, score: f64, description: &str| PatternRule {
        category: category.to_string(),
        pattern: Regex::new(pattern).expect("built-in scanner pattern"),
        score,
        description: description.to_string(),
    };
    vec![
        rule(
            "destructive_operation",
            r"(?i)\brm\s+-rf\s+[/~]",
            0.95,
            "recursive forced deletion of a root-level path",
        ),
        rule(
            "destructive_operation",
            r"(?i)\b(drop\s+table|truncate\s+table|delete\s+from\s+\w+\s*;?\s*$)",
            0.8,
            "bulk-destructive SQL",
        ),
        rule(
            "privilege_escalation",
            r"(?i)\b(sudo\s|chmod\s+[0-7]*7[0-7]*\s+/|/etc/sudoers)",
            0.7,
            "privilege escalation attempt",
        ),
        rule(
            "prompt_injection",
            r"(?i)ignore\s+(all\s+)?previous\s+instructions",
            0.9,
            "instruction-override phrasing",
        ),
        rule(
            "data_exfiltration",
            r"(?i)(curl|wget|nc)\s+.*\b(\d{1,3}\.){3}\d{1,3}\b",
            0.6,
            "upload to a raw IP address",
        ),
    ]
});

/// Regex-table scanner over the action's text surface.
pub struct HeuristicScanner {
    rules: &'static [PatternRule],
    reject_threshold: f64,
}

impl HeuristicScanner {
    pub fn new() -> Self {
        Self {
            rules: &DEFAULT_RULES,
            reject_threshold: 0.9,
        }
    }
}

impl Default for HeuristicScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl InputScanner for HeuristicScanner {
    fn name(&self) -> &str {
        "heuristic"
    }

    fn scan(&self, ctx: &ScanContext) -> ScanResult {
        let surface = ctx.text_surface();
        let mut threats = Vec::new();
        let mut risk_score: f64 = 0.0;
        for rule in self.rules {
            if rule.pattern.is_match(&surface) {
                risk_score = risk_score.max(rule.score);
                threats.push(ThreatDetail {
                    category: rule.category.clone(),
                    description: rule.description.clone(),
                    score: rule.score,
                });
            }
        }
        let verdict = if risk_score >= self.reject_threshold {
            ScanVerdict::Reject
        } else if !threats.is_empty() {
            ScanVerdict::Warn
        } else {
            ScanVerdict::Allow
        };
        ScanResult {
            scanner: self.name().to_string(),
            verdict,
            risk_score,
            threats,
            details: String::new(),
        }
    }
}

struct Registered {
    scanner: Arc<dyn InputScanner>,
    enabled: AtomicBool,
}

/// Ordered registry; scanners can be listed and toggled at runtime.
pub struct ScannerRegistry {
    scanners: Vec<Registered>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScannerInfo {
    pub name: String,
    pub enabled: bool,
}

/// Outcome of running the whole registry over one input.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    pub verdict: ScanVerdict,
    pub risk_score: f64,
    pub results: Vec<ScanResult>,
}

impl ScannerRegistry {
    pub fn new(scanners: Vec<Arc<dyn InputScanner>>) -> Self {
        Self {
            scanners: scanners
                .into_iter()
                .map(|scanner| Registered {
                    scanner,
                    enabled: AtomicBool::new(true),
                })
                .collect(),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(vec![Arc::new(HeuristicScanner::new())])
    }

    pub fn list(&self) -> Vec<ScannerInfo> {
        self.scanners
            .iter()
            .map(|r| ScannerInfo {
                name: r.scanner.name().to_string(),
                enabled: r.enabled.load(Ordering::Acquire),
            })
            .collect()
    }

    pub fn set_enabled(&self, name: &str, enabled: bool) -> bool {
        for r in &self.scanners {
            if r.scanner.name() == name {
                r.enabled.store(enabled, Ordering::Release);
                return true;
            }
        }
        false
    }

    /// Run every enabled scanner in order and aggregate.
    pub fn scan(&self, ctx: &ScanContext, profile: &PermissionProfile) -> PipelineResult {
        let mut results = Vec::new();
        let mut risk_score: f64 = 0.0;
        let mut worst = ScanVerdict::Allow;

        for r in &self.scanners {
            if !r.enabled.load(Ordering::Acquire) {
                continue;
            }
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                r.scanner.scan(ctx)
            }))
            .unwrap_or_else(|_| ScanResult {
                scanner: r.scanner.name().to_string(),
                verdict: ScanVerdict::Warn,
                risk_score: 0.5,
                threats: vec![ThreatDetail {
                    category: "scanner_failure".to_string(),
                    description: "scanner panicked; treating as warning".to_string(),
                    score: 0.5,
                }],
                details: String::new(),
            });
            risk_score = risk_score.max(result.risk_score);
            worst = match (worst, result.verdict) {
                (_, ScanVerdict::Reject) | (ScanVerdict::Reject, _) => ScanVerdict::Reject,
                (_, ScanVerdict::Warn) | (ScanVerdict::Warn, _) => ScanVerdict::Warn,
                _ => ScanVerdict::Allow,
            };
            results.push(result);
        }

        // Aggregation rule: any reject blocks; a warn blocks only when the
        // profile demands strict mode.
        let verdict = match worst {
            ScanVerdict::Reject => ScanVerdict::Reject,
            ScanVerdict::Warn if profile.strict_mode => ScanVerdict::Reject,
            other => other,
        };
        PipelineResult {
            verdict,
            risk_score,
            results,
        }
    }
}
