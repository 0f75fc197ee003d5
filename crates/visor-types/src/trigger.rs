//! Run trigger context (spec §3 "Run Trigger Context", §6.1).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    PrOpened,
    PrUpdated,
    PrClosed,
    IssueOpened,
    IssueComment,
    Manual,
    Schedule,
    WebhookReceived,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FileChange {
    pub path: String,
    pub additions: u32,
    pub deletions: u32,
    #[serde(default)]
    pub diff: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChangeSet {
    #[serde(default)]
    pub files: Vec<FileChange>,
}

impl ChangeSet {
    pub fn total_additions(&self) -> u32 {
        self.files.iter().map(|f| f.additions).sum()
    }

    pub fn total_deletions(&self) -> u32 {
        self.files.iter().map(|f| f.deletions).sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RepositoryCoordinates {
    pub owner: String,
    pub name: String,
    #[serde(default)]
    pub default_branch: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PullRequestInfo {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    pub base: String,
    pub head: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IssueInfo {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
}

/// `tag_filter` — spec §4.G / §6.6.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TagFilter {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// `checks?` in `options` (spec §6.1): either an explicit subset or "all".
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub enum CheckSelection {
    #[default]
    All,
    Named(Vec<String>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunTrigger {
    pub event: EventKind,
    pub actor: String,
    pub repository: RepositoryCoordinates,
    #[serde(default)]
    pub pull_request: Option<PullRequestInfo>,
    #[serde(default)]
    pub issue: Option<IssueInfo>,
    #[serde(default)]
    pub changes: ChangeSet,
    #[serde(default)]
    pub environment: HashMap<String, String>,
}

impl RunTrigger {
    pub fn manual(repository: RepositoryCoordinates, actor: impl Into<String>) -> Self {
        Self {
            event: EventKind::Manual,
            actor: actor.into(),
            repository,
            pull_request: None,
            issue: None,
            changes: ChangeSet::default(),
            environment: HashMap::new(),
        }
    }

    /// Environment with secret-shaped values masked, for logging (spec §3:
    /// "Environment map (redacted when logged)").
    pub fn redacted_environment(&self) -> HashMap<String, String> {
        self.environment
            .iter()
            .map(|(k, v)| {
                let redacted = if looks_secret(k) {
                    "***".to_string()
                } else {
                    v.clone()
                };
                (k.clone(), redacted)
            })
            .collect()
    }
}

fn looks_secret(key: &str) -> bool {
    let upper = key.to_ascii_uppercase();
    ["TOKEN", "SECRET", "KEY", "PASSWORD", "API_KEY"]
        .iter()
        .any(|needle| upper.contains(needle))
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RunOptions {
    #[serde(default)]
    pub checks: CheckSelection,
    #[serde(default)]
    pub tag_filter: TagFilter,
    #[serde(default)]
    pub max_parallelism: Option<usize>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub fail_fast: bool,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub loop_budget: Option<u64>,
    #[serde(default)]
    pub route_on_fail_for_cancellation: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_secret_shaped_env_keys() {
        let mut trigger = RunTrigger::manual(
            RepositoryCoordinates {
                owner: "acme".into(),
                name: "widgets".into(),
                default_branch: None,
            },
            "alice",
        );
        trigger
            .environment
            .insert("GITHUB_TOKEN".to_string(), "ghp_xxx".to_string());
        trigger
            .environment
            .insert("BUILD_DIR".to_string(), "/tmp/build".to_string());
        let redacted = trigger.redacted_environment();
        assert_eq!(redacted.get("GITHUB_TOKEN").unwrap(), "***");
        assert_eq!(redacted.get("BUILD_DIR").unwrap(), "/tmp/build");
    }
}
