//! Declarative check model (spec §3 "Check (declarative)", §6.6 `CheckSpec`).
//!
//! These types are what the engine *consumes*; building them from a config
//! file with `extends` merging and schema validation is explicitly out of
//! scope (spec §1) and lives outside this crate.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::trigger::EventKind;

/// One OR-group of dependency names — `"a|b|c"` in config, any one of which
/// satisfies the dependency at runtime (spec §4.A).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyGroup(pub Vec<String>);

impl<'de> Deserialize<'de> for DependencyGroup {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(DependencyGroup::parse(&raw))
    }
}

impl DependencyGroup {
    pub fn parse(raw: &str) -> Self {
        DependencyGroup(
            raw.split('|')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        )
    }

    pub fn names(&self) -> &[String] {
        &self.0
    }

    pub fn is_satisfied_by(&self, succeeded_or_terminal: impl Fn(&str) -> bool) -> bool {
        self.0.iter().any(|n| succeeded_or_terminal(n))
    }
}

/// `depends_on` accepts a bare string or a list of strings in config; each
/// string may itself be an OR-group (`"a|b"`).
#[derive(Debug, Clone, Default, Serialize)]
pub struct DependsOn(pub Vec<DependencyGroup>);

impl<'de> Deserialize<'de> for DependsOn {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            One(String),
            Many(Vec<String>),
        }
        let raw = Raw::deserialize(deserializer)?;
        let groups = match raw {
            Raw::One(s) => vec![DependencyGroup::parse(&s)],
            Raw::Many(items) => items.iter().map(|s| DependencyGroup::parse(s)).collect(),
        };
        Ok(DependsOn(groups))
    }
}

impl DependsOn {
    pub fn groups(&self) -> &[DependencyGroup] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Flattened set of every name participating in any OR-group, for
    /// closure expansion (spec §4.A: "OR group contributes all names").
    pub fn all_names(&self) -> Vec<String> {
        self.0.iter().flat_map(|g| g.0.clone()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckType {
    Ai,
    Command,
    Script,
    Http,
    HttpInput,
    HttpClient,
    Tool,
    Log,
    Noop,
    Memory,
    #[serde(rename = "claude-code")]
    ClaudeCode,
    Mcp,
}

impl CheckType {
    /// The provider-registry lookup key for this type (spec §4.C capability
    /// tags). Mirrors the `#[serde]` renaming above, spelled out explicitly
    /// so the provider registry doesn't need to round-trip through serde.
    pub fn as_tag(&self) -> &'static str {
        match self {
            CheckType::Ai => "ai",
            CheckType::Command => "command",
            CheckType::Script => "script",
            CheckType::Http => "http",
            CheckType::HttpInput => "http_input",
            CheckType::HttpClient => "http_client",
            CheckType::Tool => "tool",
            CheckType::Log => "log",
            CheckType::Noop => "noop",
            CheckType::Memory => "memory",
            CheckType::ClaudeCode => "claude-code",
            CheckType::Mcp => "mcp",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Criticality {
    Critical,
    NonCritical,
    Internal,
}

impl Default for Criticality {
    fn default() -> Self {
        Criticality::Critical
    }
}

/// `reuse_ai_session` — spec §3 "Session reuse".
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionReuse {
    #[default]
    None,
    /// `true` in YAML: reuse whichever dependency's session is resolved at
    /// schedule time (see DESIGN.md for the OR-dependency tie-break rule).
    Dependency,
    /// An explicit check name to borrow a session from.
    Named(String),
    /// `self` — self-chatting loop, clone-with-history of its own prior run.
    SelfChat,
}

impl Serialize for SessionReuse {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            SessionReuse::None => serializer.serialize_none(),
            SessionReuse::Dependency => serializer.serialize_bool(true),
            SessionReuse::SelfChat => serializer.serialize_str("self"),
            SessionReuse::Named(name) => serializer.serialize_str(name),
        }
    }
}

impl<'de> Deserialize<'de> for SessionReuse {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Bool(bool),
            Name(String),
            Absent,
        }
        let raw = Option::<Raw>::deserialize(deserializer)?;
        Ok(match raw {
            None | Some(Raw::Absent) => SessionReuse::None,
            Some(Raw::Bool(true)) => SessionReuse::Dependency,
            Some(Raw::Bool(false)) => SessionReuse::None,
            Some(Raw::Name(name)) if name == "self" => SessionReuse::SelfChat,
            Some(Raw::Name(name)) => SessionReuse::Named(name),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RetryPolicy {
    #[serde(default = "default_retry_max")]
    pub max: u32,
    #[serde(default = "default_retry_base_ms")]
    pub base_ms: u64,
    #[serde(default = "default_retry_cap_ms")]
    pub cap_ms: u64,
    #[serde(default)]
    pub jitter: bool,
    /// Error kinds that are retried. Defaults to `timeout`/`transient`
    /// per spec §4.E "Retry & backoff".
    #[serde(default = "default_retry_on")]
    pub retry_on: Vec<String>,
}

fn default_retry_max() -> u32 {
    0
}
fn default_retry_base_ms() -> u64 {
    1000
}
fn default_retry_cap_ms() -> u64 {
    30_000
}
fn default_retry_on() -> Vec<String> {
    vec!["timeout".to_string(), "transient".to_string()]
}

impl RetryPolicy {
    /// `base * 2^(attempt-1)` capped at `cap`, spec §4.E.
    pub fn delay_ms(&self, attempt: u32) -> u64 {
        let exp = attempt.saturating_sub(1).min(32);
        let raw = self.base_ms.saturating_mul(1u64 << exp);
        raw.min(self.cap_ms)
    }

    pub fn should_retry(&self, error_kind: &str, attempt: u32) -> bool {
        attempt < self.max && self.retry_on.iter().any(|k| k == error_kind)
    }
}

/// Static `run: [name, ...]` plus a dynamic `run_js` expression producing a
/// list of names (spec §3 "Routing").
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RouteSpec {
    #[serde(default)]
    pub run: Vec<String>,
    #[serde(default)]
    pub run_js: Option<String>,
}

impl RouteSpec {
    pub fn is_empty(&self) -> bool {
        self.run.is_empty() && self.run_js.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Routing {
    #[serde(default)]
    pub on_success: RouteSpec,
    #[serde(default)]
    pub on_fail: RouteSpec,
    #[serde(default)]
    pub on_finish: RouteSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckSpec {
    /// Filled in from the map key by the loader; not part of the YAML body.
    #[serde(skip)]
    pub name: String,
    #[serde(rename = "type")]
    pub check_type: CheckType,
    #[serde(default)]
    pub on: Vec<EventKind>,
    #[serde(default)]
    pub depends_on: DependsOn,
    #[serde(rename = "if", default)]
    pub if_expr: Option<String>,
    #[serde(default)]
    pub fail_if: Option<String>,
    #[serde(rename = "forEach", default)]
    pub for_each: Option<String>,
    #[serde(default)]
    pub children: Vec<String>,
    #[serde(default)]
    pub on_success: RouteSpec,
    #[serde(default)]
    pub on_fail: RouteSpec,
    #[serde(default)]
    pub on_finish: RouteSpec,
    #[serde(default)]
    pub reuse_ai_session: SessionReuse,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub criticality: Criticality,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub group: Option<String>,
    /// Provider-specific config passed through opaquely (prompt text,
    /// command string, URL, etc.) — the engine only renders templated
    /// fields inside it, never interprets it (spec §4.C).
    #[serde(default)]
    pub with: Value,
}

impl CheckSpec {
    pub fn routing(&self) -> Routing {
        Routing {
            on_success: self.on_success.clone(),
            on_fail: self.on_fail.clone(),
            on_finish: self.on_finish.clone(),
        }
    }

    pub fn is_for_each(&self) -> bool {
        self.for_each.is_some()
    }

    pub fn matches_event(&self, kind: EventKind) -> bool {
        self.on.is_empty() || self.on.contains(&kind)
    }
}

/// The full catalog the engine is handed at `run()` time — already resolved
/// (no `extends`), keyed by check name.
pub type CheckCatalog = HashMap<String, CheckSpec>;

pub fn catalog_from_map(mut map: HashMap<String, CheckSpec>) -> CheckCatalog {
    for (name, spec) in map.iter_mut() {
        spec.name = name.clone();
    }
    map
}
