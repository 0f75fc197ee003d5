//! Condition & Expression Evaluator (spec §4.D).
//!
//! Every user-supplied `if`, `fail_if`, `goto_js`/`run_js`, and `forEach`
//! value expression runs here, in a sandbox with a fixed read-only context
//! and a hard wall-clock timeout — so a misbehaving expression can never
//! hang a scheduler worker (spec §9 "Template/expression evaluation spread
//! across many helpers").
//!
//! The sandbox is built on `rhai`: no file/network access is wired up (we
//! never register any I/O-capable function), `eval`/`import` are disabled,
//! and an `on_progress` callback enforces the wall-clock budget independent
//! of operation count.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rhai::{Dynamic, Engine, Scope};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Default wall-clock timeout for a single expression evaluation (spec §4.D:
/// "wall-clock timeout (e.g., 5 s)").
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ExprError {
    #[error("expr/timeout: expression exceeded {0:?}")]
    Timeout(Duration),
    #[error("expr/runtime: {0}")]
    Runtime(String),
    #[error("expr/type: {0}")]
    Type(String),
}

impl ExprError {
    pub fn kind(&self) -> &'static str {
        match self {
            ExprError::Timeout(_) => "expr/timeout",
            ExprError::Runtime(_) => "expr/runtime",
            ExprError::Type(_) => "expr/type",
        }
    }
}

/// The fixed read-only context every expression sees (spec §4.D).
#[derive(Debug, Clone, Default, Serialize)]
pub struct EvalContext {
    pub pr: Value,
    #[serde(rename = "files")]
    pub files: Value,
    pub outputs: Value,
    /// Current iteration's single-parent upstream output, when applicable.
    pub output: Value,
    /// `forEach` item, when evaluating a child expression.
    pub item: Value,
    pub env: Value,
    pub check_name: String,
    pub iteration: u32,
}

impl EvalContext {
    fn populate_scope(&self, scope: &mut Scope) {
        scope.push_constant("pr", json_to_dynamic(&self.pr));
        scope.push_constant("files", json_to_dynamic(&self.files));
        scope.push_constant("outputs", json_to_dynamic(&self.outputs));
        scope.push_constant("output", json_to_dynamic(&self.output));
        scope.push_constant("item", json_to_dynamic(&self.item));
        scope.push_constant("env", json_to_dynamic(&self.env));
        scope.push_constant("checkName", self.check_name.clone());
        scope.push_constant("iteration", self.iteration as i64);
    }
}

fn json_to_dynamic(value: &Value) -> Dynamic {
    rhai::serde::to_dynamic(value).unwrap_or(Dynamic::UNIT)
}

/// Builds the sandboxed `rhai::Engine` shared by every evaluation. Cheap to
/// clone (`Engine` is reference-counted internally under the `sync`
/// feature), so one `ExprEngine` per `EngineLoop` is enough.
#[derive(Clone)]
pub struct ExprEngine {
    engine: Arc<Engine>,
    timeout: Duration,
}

impl Default for ExprEngine {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl ExprEngine {
    pub fn new(timeout: Duration) -> Self {
        let mut engine = Engine::new();
        // No I/O surface is registered at all, but these keywords are
        // additionally disabled so a future accidental registration can't
        // be reached from user expressions (spec §4.D: "no I/O, no clock
        // beyond now()").
        engine.disable_symbol("eval");
        engine.disable_symbol("import");
        engine.set_max_expr_depths(64, 32);
        engine.set_max_operations(2_000_000);
        engine.set_max_string_size(1 << 20);
        engine.set_max_array_size(100_000);
        engine.set_max_map_size(100_000);
        Self {
            engine: Arc::new(engine),
            timeout,
        }
    }

    /// `if` / `fail_if` — interpreted as boolean (spec §4.D).
    pub async fn eval_bool(&self, expr: &str, ctx: &EvalContext) -> Result<bool, ExprError> {
        let value = self.eval_raw(expr, ctx).await?;
        to_bool(&value)
    }

    /// `run_js` / `goto_js` — interpreted as a list of check names.
    pub async fn eval_string_list(
        &self,
        expr: &str,
        ctx: &EvalContext,
    ) -> Result<Vec<String>, ExprError> {
        let value = self.eval_raw(expr, ctx).await?;
        to_string_list(&value)
    }

    /// `forEach` — interpreted as an arbitrary JSON value; the caller
    /// (scheduler) is responsible for validating/normalizing it to a
    /// sequence (spec §4.E: non-array scalars are `forEach/invalid`).
    pub async fn eval_value(&self, expr: &str, ctx: &EvalContext) -> Result<Value, ExprError> {
        self.eval_raw(expr, ctx).await
    }

    async fn eval_raw(&self, expr: &str, ctx: &EvalContext) -> Result<Value, ExprError> {
        let engine = self.engine.clone();
        let expr = expr.to_string();
        let ctx = ctx.clone();
        let timeout = self.timeout;

        let eval = tokio::task::spawn_blocking(move || {
            let mut scope = Scope::new();
            ctx.populate_scope(&mut scope);
            let deadline = Instant::now() + timeout;
            let mut engine_for_call = (*engine).clone();
            engine_for_call.on_progress(move |_ops| {
                if Instant::now() >= deadline {
                    Some(Dynamic::from("expr/timeout"))
                } else {
                    None
                }
            });
            engine_for_call
                .eval_with_scope::<Dynamic>(&mut scope, &expr)
                .map_err(|err| classify_rhai_error(&err))
                .and_then(|dynamic| dynamic_to_json(&dynamic))
        });

        match tokio::time::timeout(timeout + Duration::from_millis(250), eval).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(ExprError::Runtime(format!(
                "expression task panicked: {join_err}"
            ))),
            Err(_) => Err(ExprError::Timeout(timeout)),
        }
    }
}

fn classify_rhai_error(err: &rhai::EvalAltResult) -> ExprError {
    let text = err.to_string();
    if text.contains("expr/timeout") || matches!(err, rhai::EvalAltResult::ErrorTerminated(..)) {
        ExprError::Timeout(DEFAULT_TIMEOUT)
    } else {
        ExprError::Runtime(text)
    }
}

fn dynamic_to_json(value: &Dynamic) -> Result<Value, ExprError> {
    rhai::serde::from_dynamic(value)
        .map_err(|err| ExprError::Type(format!("could not convert result to JSON: {err}")))
}

fn to_bool(value: &Value) -> Result<bool, ExprError> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Null => Ok(false),
        Value::Number(n) => Ok(n.as_f64().map(|f| f != 0.0).unwrap_or(false)),
        Value::String(s) => Ok(!s.is_empty()),
        Value::Array(items) => Ok(!items.is_empty()),
        Value::Object(map) => Ok(!map.is_empty()),
    }
}

fn to_string_list(value: &Value) -> Result<Vec<String>, ExprError> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => Ok(s.clone()),
                other => Err(ExprError::Type(format!(
                    "expected string list, found non-string element {other}"
                ))),
            })
            .collect(),
        Value::String(s) => Ok(vec![s.clone()]),
        Value::Null => Ok(Vec::new()),
        other => Err(ExprError::Type(format!(
            "expected a list of check names, found {other}"
        ))),
    }
}

/// Helper for building `EvalContext` incrementally from engine state.
#[derive(Default)]
pub struct EvalContextBuilder {
    ctx: EvalContext,
}

impl EvalContextBuilder {
    pub fn new(check_name: impl Into<String>, iteration: u32) -> Self {
        Self {
            ctx: EvalContext {
                check_name: check_name.into(),
                iteration,
                ..Default::default()
            },
        }
    }

    pub fn pr(mut self, pr: Value) -> Self {
        self.ctx.pr = pr;
        self
    }

    pub fn files(mut self, files: Value) -> Self {
        self.ctx.files = files;
        self
    }

    pub fn outputs(mut self, outputs: HashMap<String, Value>) -> Self {
        self.ctx.outputs = serde_json::to_value(outputs).unwrap_or(Value::Null);
        self
    }

    pub fn output(mut self, output: Value) -> Self {
        self.ctx.output = output;
        self
    }

    pub fn item(mut self, item: Value) -> Self {
        self.ctx.item = item;
        self
    }

    pub fn env(mut self, env: HashMap<String, String>) -> Self {
        self.ctx.env = serde_json::to_value(env).unwrap_or(Value::Null);
        self
    }

    pub fn build(self) -> EvalContext {
        self.ctx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> EvalContext {
        EvalContextBuilder::new("lint", 0)
            .outputs(HashMap::from([("build".to_string(), json!({"ok": true}))]))
            .item(json!("x"))
            .build()
    }

    #[tokio::test]
    async fn evaluates_if_true_from_outputs() {
        let engine = ExprEngine::default();
        let result = engine
            .eval_bool("outputs.build.ok == true", &ctx())
            .await
            .unwrap();
        assert!(result);
    }

    #[tokio::test]
    async fn evaluates_fail_if_false() {
        let engine = ExprEngine::default();
        let result = engine.eval_bool("1 == 2", &ctx()).await.unwrap();
        assert!(!result);
    }

    #[tokio::test]
    async fn evaluates_run_js_list() {
        let engine = ExprEngine::default();
        let result = engine
            .eval_string_list(r#"["a", "b"]"#, &ctx())
            .await
            .unwrap();
        assert_eq!(result, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn for_each_value_can_be_a_plain_array() {
        let engine = ExprEngine::default();
        let value = engine.eval_value(r#"["x", "y", "z"]"#, &ctx()).await.unwrap();
        assert_eq!(value, json!(["x", "y", "z"]));
    }

    #[tokio::test]
    async fn runtime_errors_are_reported_as_expr_runtime() {
        let engine = ExprEngine::default();
        let err = engine.eval_bool("outputs.missing.field", &ctx()).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn long_running_expression_times_out() {
        let engine = ExprEngine::new(Duration::from_millis(100));
        let err = engine
            .eval_bool("let x = 0; while true { x += 1; }", &ctx())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "expr/timeout");
    }

    #[tokio::test]
    async fn item_is_available_to_foreach_children() {
        let engine = ExprEngine::default();
        let result = engine.eval_bool("item == \"x\"", &ctx()).await.unwrap();
        assert!(result);
    }
}
