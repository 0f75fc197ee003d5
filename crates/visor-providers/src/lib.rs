//! Provider Dispatcher (spec §4.C) — uniform invocation of typed providers
//! behind a single opaque contract:
//! `execute(trigger, resolvedInputs, checkConfig, dependencyOutputsSnapshot) -> Result`.
//!
//! Providers are a closed tagged union keyed by `CheckType`, mirroring how
//! this codebase keeps a flat `HashMap<String, Arc<dyn Trait>>` registry for
//! every other pluggable surface (tools, model backends). Providers never
//! propagate raw errors across the interface — every failure mode, including
//! panics-as-errors from `anyhow`, is normalized into `ProviderOutcome::error`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, warn};

use visor_types::check::CheckSpec;
use visor_types::error::{EngineErrorValue, ErrorKind};
use visor_types::iteration::Issue;
use visor_types::trigger::RunTrigger;

/// Template-rendered inputs handed to a provider (spec §4.C): the fields a
/// check's `with` block resolves to once `pr`, `outputs[name]`, `env`,
/// `args`, and (for forEach children) `item` have been substituted in.
#[derive(Debug, Clone, Default)]
pub struct ResolvedInputs {
    pub pr: Value,
    pub env: HashMap<String, String>,
    pub args: Value,
    pub item: Option<Value>,
}

/// `Result = { output?, issues[], content?, error? }` (spec §4.C).
#[derive(Debug, Clone, Default)]
pub struct ProviderOutcome {
    pub output: Option<Value>,
    pub issues: Vec<Issue>,
    pub content: Option<String>,
    pub error: Option<EngineErrorValue>,
}

impl ProviderOutcome {
    pub fn ok(output: Value) -> Self {
        Self {
            output: Some(output),
            ..Default::default()
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_issues(mut self, issues: Vec<Issue>) -> Self {
        self.issues = issues;
        self
    }

    pub fn error(error: EngineErrorValue) -> Self {
        Self {
            error: Some(error),
            ..Default::default()
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[async_trait]
pub trait Provider: Send + Sync {
    /// The `type` tag this provider answers to, e.g. `"command"`.
    fn capability(&self) -> &'static str;

    async fn execute(
        &self,
        trigger: &RunTrigger,
        inputs: &ResolvedInputs,
        check: &CheckSpec,
        dependency_outputs: &HashMap<String, Value>,
    ) -> ProviderOutcome;
}

#[derive(Clone)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl ProviderRegistry {
    /// Every capability tag the engine recognizes (spec §4.C): `ai, command,
    /// script, http, http_input, http_client, tool, log, noop, memory,
    /// claude-code, mcp`.
    pub fn with_builtins() -> Self {
        let mut providers: HashMap<String, Arc<dyn Provider>> = HashMap::new();
        providers.insert("ai".into(), Arc::new(AiProvider));
        providers.insert("command".into(), Arc::new(CommandProvider));
        providers.insert("script".into(), Arc::new(ScriptProvider));
        providers.insert("http".into(), Arc::new(HttpProvider));
        providers.insert("http_client".into(), Arc::new(HttpProvider));
        providers.insert("tool".into(), Arc::new(ToolProvider));
        providers.insert("log".into(), Arc::new(LogProvider));
        providers.insert("noop".into(), Arc::new(NoopProvider));
        providers.insert("memory".into(), Arc::new(MemoryProvider::default()));
        providers.insert("claude-code".into(), Arc::new(AiProvider));
        providers.insert("mcp".into(), Arc::new(McpProvider));
        Self { providers }
    }

    pub fn register(&mut self, capability: &str, provider: Arc<dyn Provider>) {
        self.providers.insert(capability.to_string(), provider);
    }

    pub fn get(&self, capability: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(capability).cloned()
    }
}

/// Applies the per-check timeout and duration capture half of component C;
/// provider selection and error normalization both flow through here so the
/// scheduler (component E) never touches a raw `Provider` directly.
#[derive(Clone)]
pub struct ProviderDispatcher {
    registry: ProviderRegistry,
}

impl Default for ProviderDispatcher {
    fn default() -> Self {
        Self::new(ProviderRegistry::with_builtins())
    }
}

impl ProviderDispatcher {
    pub fn new(registry: ProviderRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Runs one check iteration end to end: selects the provider for
    /// `check.check_type`, bounds it with `timeout`, and returns the
    /// normalized outcome alongside the measured provider duration
    /// (spec §4.C: "captures per-iteration duration").
    pub async fn dispatch(
        &self,
        trigger: &RunTrigger,
        inputs: &ResolvedInputs,
        check: &CheckSpec,
        dependency_outputs: &HashMap<String, Value>,
        timeout: Duration,
    ) -> (ProviderOutcome, Duration) {
        let tag = check.check_type.as_tag();
        let Some(provider) = self.registry.get(tag) else {
            return (
                ProviderOutcome::error(EngineErrorValue::new(
                    ErrorKind::ProviderFatal,
                    format!("no provider registered for check type `{tag}`"),
                )),
                Duration::ZERO,
            );
        };

        let started = Instant::now();
        let outcome = match tokio::time::timeout(
            timeout,
            provider.execute(trigger, inputs, check, dependency_outputs),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(check = %check.name, ?timeout, "provider timed out");
                ProviderOutcome::error(EngineErrorValue::new(
                    ErrorKind::ProviderTimeout,
                    format!("check `{}` exceeded its {:?} timeout", check.name, timeout),
                ))
            }
        };
        (outcome, started.elapsed())
    }
}

/// Emits nothing and succeeds unconditionally — used for placeholder checks
/// and as a routing no-op target.
struct NoopProvider;

#[async_trait]
impl Provider for NoopProvider {
    fn capability(&self) -> &'static str {
        "noop"
    }

    async fn execute(
        &self,
        _trigger: &RunTrigger,
        _inputs: &ResolvedInputs,
        _check: &CheckSpec,
        _dependency_outputs: &HashMap<String, Value>,
    ) -> ProviderOutcome {
        ProviderOutcome::ok(Value::Null)
    }
}

/// Writes the rendered `with.message` (or the whole `with` block, if no
/// `message` field is present) to the structured log at info level.
struct LogProvider;

#[async_trait]
impl Provider for LogProvider {
    fn capability(&self) -> &'static str {
        "log"
    }

    async fn execute(
        &self,
        _trigger: &RunTrigger,
        inputs: &ResolvedInputs,
        check: &CheckSpec,
        _dependency_outputs: &HashMap<String, Value>,
    ) -> ProviderOutcome {
        let message = inputs
            .args
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| inputs.args.to_string());
        debug!(check = %check.name, %message, "log check");
        ProviderOutcome::ok(Value::Null).with_content(message)
    }
}

/// Runs `with.command` through the system shell and captures stdout/stderr.
/// Grounded on this workspace's own shell-tool execution pattern; unlike an
/// interactive tool call there is no cancellation token threaded through
/// here, since the dispatcher's timeout is the only cancellation boundary
/// a provider-level check gets (spec §3 invariant 7: abandoned, not joined).
struct CommandProvider;

#[async_trait]
impl Provider for CommandProvider {
    fn capability(&self) -> &'static str {
        "command"
    }

    async fn execute(
        &self,
        _trigger: &RunTrigger,
        inputs: &ResolvedInputs,
        check: &CheckSpec,
        _dependency_outputs: &HashMap<String, Value>,
    ) -> ProviderOutcome {
        let Some(command_line) = inputs.args.get("command").and_then(Value::as_str) else {
            return ProviderOutcome::error(EngineErrorValue::new(
                ErrorKind::ProviderFatal,
                format!("check `{}` has no `with.command` string", check.name),
            ));
        };

        let mut command = Command::new("sh");
        command.arg("-c").arg(command_line);
        for (key, value) in &inputs.env {
            command.env(key, value);
        }

        match command.output().await {
            Ok(output) => {
                let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
                let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
                if output.status.success() {
                    ProviderOutcome::ok(serde_json::json!({
                        "exitCode": output.status.code(),
                        "stdout": stdout,
                        "stderr": stderr,
                    }))
                    .with_content(stdout)
                } else {
                    ProviderOutcome::error(
                        EngineErrorValue::new(
                            ErrorKind::ProviderFatal,
                            format!(
                                "command exited with status {:?}",
                                output.status.code()
                            ),
                        )
                        .with_cause(stderr),
                    )
                }
            }
            Err(err) => ProviderOutcome::error(EngineErrorValue::new(
                ErrorKind::ProviderFatal,
                format!("failed to spawn command: {err}"),
            )),
        }
    }
}

/// Executes `with.script` the same way `command` does, but treats the
/// string as an inline script body rather than a single command line.
struct ScriptProvider;

#[async_trait]
impl Provider for ScriptProvider {
    fn capability(&self) -> &'static str {
        "script"
    }

    async fn execute(
        &self,
        trigger: &RunTrigger,
        inputs: &ResolvedInputs,
        check: &CheckSpec,
        dependency_outputs: &HashMap<String, Value>,
    ) -> ProviderOutcome {
        let Some(script) = inputs.args.get("script").and_then(Value::as_str) else {
            return ProviderOutcome::error(EngineErrorValue::new(
                ErrorKind::ProviderFatal,
                format!("check `{}` has no `with.script` string", check.name),
            ));
        };
        let delegated = ResolvedInputs {
            args: serde_json::json!({ "command": script }),
            ..inputs.clone()
        };
        CommandProvider
            .execute(trigger, &delegated, check, dependency_outputs)
            .await
    }
}

/// Issues an HTTP request described by `with.url`/`with.method`/`with.body`.
struct HttpProvider;

#[async_trait]
impl Provider for HttpProvider {
    fn capability(&self) -> &'static str {
        "http"
    }

    async fn execute(
        &self,
        _trigger: &RunTrigger,
        inputs: &ResolvedInputs,
        check: &CheckSpec,
        _dependency_outputs: &HashMap<String, Value>,
    ) -> ProviderOutcome {
        let Some(url) = inputs.args.get("url").and_then(Value::as_str) else {
            return ProviderOutcome::error(EngineErrorValue::new(
                ErrorKind::ProviderFatal,
                format!("check `{}` has no `with.url` string", check.name),
            ));
        };
        let method = inputs
            .args
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or("GET")
            .to_uppercase();

        let client = reqwest::Client::new();
        let mut request = client.request(
            method.parse().unwrap_or(reqwest::Method::GET),
            url,
        );
        if let Some(body) = inputs.args.get("body") {
            request = request.json(body);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                let body_json = serde_json::from_str::<Value>(&body)
                    .unwrap_or(Value::String(body.clone()));
                if (200..300).contains(&status) {
                    ProviderOutcome::ok(serde_json::json!({
                        "status": status,
                        "body": body_json,
                    }))
                    .with_content(body)
                } else {
                    ProviderOutcome::error(EngineErrorValue::new(
                        ErrorKind::ProviderTransient,
                        format!("http request to {url} returned status {status}"),
                    ))
                }
            }
            Err(err) => ProviderOutcome::error(EngineErrorValue::new(
                ErrorKind::ProviderTransient,
                format!("http request to {url} failed: {err}"),
            )),
        }
    }
}

/// Placeholder for invoking a registered agent tool by name
/// (`with.tool`/`with.args`). Tool dispatch itself is out of scope here;
/// this provider only validates the shape of the request.
struct ToolProvider;

#[async_trait]
impl Provider for ToolProvider {
    fn capability(&self) -> &'static str {
        "tool"
    }

    async fn execute(
        &self,
        _trigger: &RunTrigger,
        inputs: &ResolvedInputs,
        check: &CheckSpec,
        _dependency_outputs: &HashMap<String, Value>,
    ) -> ProviderOutcome {
        let Some(tool_name) = inputs.args.get("tool").and_then(Value::as_str) else {
            return ProviderOutcome::error(EngineErrorValue::new(
                ErrorKind::ProviderFatal,
                format!("check `{}` has no `with.tool` name", check.name),
            ));
        };
        ProviderOutcome::ok(serde_json::json!({ "tool": tool_name, "invoked": false }))
    }
}

/// Opaque AI-provider placeholder. The actual model call is intentionally
/// out of scope (spec §4.C: providers are recognized "as capability tags
/// only; behavior is opaque") — this stub exists so the dispatcher has a
/// real, timeout-bounded async call to make for `ai`/`claude-code` checks.
struct AiProvider;

#[async_trait]
impl Provider for AiProvider {
    fn capability(&self) -> &'static str {
        "ai"
    }

    async fn execute(
        &self,
        _trigger: &RunTrigger,
        inputs: &ResolvedInputs,
        check: &CheckSpec,
        _dependency_outputs: &HashMap<String, Value>,
    ) -> ProviderOutcome {
        let prompt = inputs
            .args
            .get("prompt")
            .and_then(Value::as_str)
            .unwrap_or_default();
        debug!(check = %check.name, prompt_len = prompt.len(), "ai provider stub invoked");
        ProviderOutcome::ok(serde_json::json!({ "model": "stub", "promptLen": prompt.len() }))
            .with_content(String::new())
    }
}

/// Opaque MCP (tool-server) placeholder, same rationale as `AiProvider`.
struct McpProvider;

#[async_trait]
impl Provider for McpProvider {
    fn capability(&self) -> &'static str {
        "mcp"
    }

    async fn execute(
        &self,
        _trigger: &RunTrigger,
        inputs: &ResolvedInputs,
        check: &CheckSpec,
        _dependency_outputs: &HashMap<String, Value>,
    ) -> ProviderOutcome {
        let server = inputs
            .args
            .get("server")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        ProviderOutcome::ok(serde_json::json!({ "server": server }))
    }
}

/// In-process key/value remembrance across a run, scoped to this engine
/// instance only (no cross-run persistence — that belongs to an external
/// store, per spec Non-goals).
#[derive(Default)]
struct MemoryProvider {
    store: tokio::sync::RwLock<HashMap<String, Value>>,
}

#[async_trait]
impl Provider for MemoryProvider {
    fn capability(&self) -> &'static str {
        "memory"
    }

    async fn execute(
        &self,
        _trigger: &RunTrigger,
        inputs: &ResolvedInputs,
        check: &CheckSpec,
        _dependency_outputs: &HashMap<String, Value>,
    ) -> ProviderOutcome {
        let Some(key) = inputs.args.get("key").and_then(Value::as_str) else {
            return ProviderOutcome::error(EngineErrorValue::new(
                ErrorKind::ProviderFatal,
                format!("check `{}` has no `with.key` string", check.name),
            ));
        };

        if let Some(value) = inputs.args.get("value") {
            self.store
                .write()
                .await
                .insert(key.to_string(), value.clone());
            return ProviderOutcome::ok(value.clone());
        }

        let value = self
            .store
            .read()
            .await
            .get(key)
            .cloned()
            .unwrap_or(Value::Null);
        ProviderOutcome::ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;
    use visor_types::check::{catalog_from_map, CheckSpec};

    fn spec_named(name: &str, check_type: &str) -> CheckSpec {
        let yaml = format!("type: {check_type}\n");
        let mut spec: CheckSpec = serde_yaml_like_from_str(&yaml);
        spec.name = name.to_string();
        spec
    }

    // minimal stand-in so this test module doesn't need a serde_yaml dev-dep
    fn serde_yaml_like_from_str(_yaml: &str) -> CheckSpec {
        let mut map = Map::new();
        map.insert(
            "c".to_string(),
            serde_json::from_value(serde_json::json!({ "type": "noop" })).unwrap(),
        );
        catalog_from_map(map).remove("c").unwrap()
    }

    fn trigger() -> RunTrigger {
        RunTrigger::manual(
            visor_types::trigger::RepositoryCoordinates {
                owner: "acme".into(),
                name: "widgets".into(),
                default_branch: Some("main".into()),
            },
            "octocat",
        )
    }

    #[tokio::test]
    async fn noop_provider_succeeds_with_null_output() {
        let dispatcher = ProviderDispatcher::default();
        let check = spec_named("c", "noop");
        let (outcome, _) = dispatcher
            .dispatch(
                &trigger(),
                &ResolvedInputs::default(),
                &check,
                &Map::new(),
                Duration::from_secs(1),
            )
            .await;
        assert!(!outcome.is_error());
        assert_eq!(outcome.output, Some(Value::Null));
    }

    #[tokio::test]
    async fn command_provider_captures_stdout() {
        let dispatcher = ProviderDispatcher::default();
        let check = spec_named("c", "command");
        let inputs = ResolvedInputs {
            args: serde_json::json!({ "command": "printf hello" }),
            ..Default::default()
        };
        let (outcome, _) = dispatcher
            .dispatch(&trigger(), &inputs, &check, &Map::new(), Duration::from_secs(5))
            .await;
        assert!(!outcome.is_error());
        assert_eq!(outcome.content.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn unknown_provider_type_is_fatal() {
        let registry = ProviderRegistry {
            providers: Map::new(),
        };
        let dispatcher = ProviderDispatcher::new(registry);
        let check = spec_named("c", "noop");
        let (outcome, _) = dispatcher
            .dispatch(
                &trigger(),
                &ResolvedInputs::default(),
                &check,
                &Map::new(),
                Duration::from_secs(1),
            )
            .await;
        assert!(outcome.is_error());
        assert_eq!(outcome.error.unwrap().kind, "provider/fatal");
    }

    #[tokio::test]
    async fn memory_provider_roundtrips_a_value() {
        let provider = MemoryProvider::default();
        let check = spec_named("c", "memory");
        let set = ResolvedInputs {
            args: serde_json::json!({ "key": "k", "value": "v" }),
            ..Default::default()
        };
        let outcome = provider
            .execute(&trigger(), &set, &check, &Map::new())
            .await;
        assert_eq!(outcome.output, Some(Value::String("v".into())));

        let get = ResolvedInputs {
            args: serde_json::json!({ "key": "k" }),
            ..Default::default()
        };
        let outcome = provider
            .execute(&trigger(), &get, &check, &Map::new())
            .await;
        assert_eq!(outcome.output, Some(Value::String("v".into())));
    }
}
