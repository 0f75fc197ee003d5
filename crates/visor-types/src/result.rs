//! Engine invocation output (spec §6.1, §6.5).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::iteration::{Issue, Severity, SkipReason};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Ok,
    Failed,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultEntry {
    pub check_name: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub issues: Vec<Issue>,
    #[serde(default)]
    pub output: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PerCheckStats {
    pub total_runs: u32,
    pub successful_runs: u32,
    pub failed_runs: u32,
    pub skipped: u32,
    #[serde(default)]
    pub skip_reason: Option<SkipReason>,
    pub total_duration_ms: u64,
    #[serde(default)]
    pub provider_duration_ms: Option<u64>,
    pub issues_found: u32,
    #[serde(default)]
    pub issues_by_severity: HashMap<String, u32>,
    #[serde(default)]
    pub for_each_preview: Option<Vec<Value>>,
}

impl PerCheckStats {
    pub fn record_issues(&mut self, issues: &[Issue]) {
        self.issues_found += issues.len() as u32;
        for issue in issues {
            let key = match issue.severity {
                Severity::Info => "info",
                Severity::Warning => "warning",
                Severity::Error => "error",
                Severity::Critical => "critical",
            };
            *self.issues_by_severity.entry(key.to_string()).or_insert(0) += 1;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Statistics {
    pub total_checks: u32,
    pub total_iterations: u32,
    pub total_duration_ms: u64,
    pub per_check: HashMap<String, PerCheckStats>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RunResult {
    pub status: Option<RunStatus>,
    /// `groupName -> [ResultEntry]` (spec §6.1).
    pub results: HashMap<String, Vec<ResultEntry>>,
    pub statistics: Statistics,
}

impl RunResult {
    pub fn push(&mut self, group: &str, entry: ResultEntry) {
        self.results.entry(group.to_string()).or_default().push(entry);
    }
}
