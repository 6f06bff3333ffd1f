//! Module version compatibility checks.
//!
//! A plan may pin module versions under `metadata.requires`, e.g.
//! `{"requires": {"filesystem": ">=1.2"}}`. The checker compares those pins
//! against manifest-declared versions and reports mismatches without
//! failing the plan; callers decide whether a report is fatal.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use super::models::Plan;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionMismatch {
    pub module_id: String,
    pub required: String,
    pub available: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompatibilityReport {
    pub compatible: bool,
    pub mismatches: Vec<VersionMismatch>,
}

pub struct ModuleVersionChecker {
    /// module_id -> manifest version
    available: HashMap<String, String>,
}

impl ModuleVersionChecker {
    pub fn new(available: HashMap<String, String>) -> Self {
        Self { available }
    }

    pub fn check(&self, plan: &Plan) -> CompatibilityReport {
        let mut report = CompatibilityReport {
            compatible: true,
            mismatches: Vec::new(),
        };
        let Some(requires) = plan.metadata.get("requires").and_then(Value::as_object) else {
            return report;
        };
        for (module_id, requirement) in requires {
            let Some(required) = requirement.as_str() else {
                continue;
            };
            let available = self.available.get(module_id);
            let ok = match available {
                Some(version) => satisfies(version, required),
                None => false,
            };
            if !ok {
                report.compatible = false;
                report.mismatches.push(VersionMismatch {
                    module_id: module_id.clone(),
                    required: required.to_string(),
                    available: available.cloned(),
                });
            }
        }
        report
    }
}

/// Minimal requirement grammar: `X.Y[.Z]` (exact), `>=X.Y[.Z]`.
fn satisfies(version: &str, requirement: &str) -> bool {
    if let Some(min) = requirement.strip_prefix(">=") {
        compare(version, min.trim()) != std::cmp::Ordering::Less
    } else {
        compare(version, requirement.trim()) == std::cmp::Ordering::Equal
    }
}

fn compare(a: &str, b: &str) -> std::cmp::Ordering {
    let parse = |s: &str| -> Vec<u64> {
        s.split('.')
            .map(|part| part.trim().parse::<u64>().unwrap_or(0))
            .collect()
    };
    let (va, vb) = (parse(a), parse(b));
    let len = va.len().max(vb.len());
    for i in 0..len {
        let (x, y) = (va.get(i).copied().unwrap_or(0), vb.get(i).copied().unwrap_or(0));
        match x.cmp(&y) {
            std::cmp::Ordering::Equal => continue,
            other => return other,
        }
    }
    std::cmp::Ordering::Equal
}
