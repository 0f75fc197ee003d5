//! Event bus wire format (spec §4.F, §6.4).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

/// `{ id, ts, runId, kind, payload }` — the one normative external format
/// (spec §6.4). `kind` is a dotted string (`"check.started"`, ...); `payload`
/// is the event-specific free-form body, kept as `Value` the way the teacher
/// keeps `EngineEvent::properties` untyped so new event kinds never require
/// a wire-format migration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineEvent {
    pub id: String,
    pub ts: DateTime<Utc>,
    #[serde(rename = "runId")]
    pub run_id: String,
    pub kind: String,
    pub payload: Value,
}

impl EngineEvent {
    pub fn new(run_id: impl Into<String>, kind: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            ts: Utc::now(),
            run_id: run_id.into(),
            kind: kind.into(),
            payload,
        }
    }
}

pub const EVENT_RUN_STARTED: &str = "run.started";
pub const EVENT_RUN_COMPLETED: &str = "run.completed";
pub const EVENT_SHUTDOWN: &str = "shutdown";
pub const EVENT_CHECK_STARTED: &str = "check.started";
pub const EVENT_CHECK_COMPLETED: &str = "check.completed";
pub const EVENT_CHECK_ERRORED: &str = "check.errored";
pub const EVENT_STATE_TRANSITION: &str = "state.transition";
pub const EVENT_HUMAN_INPUT_REQUESTED: &str = "human_input.requested";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationState {
    Pending,
    Ready,
    Running,
    Waiting,
    Completed,
    Error,
}

impl EngineEvent {
    pub fn run_started(run_id: impl Into<String>) -> Self {
        let run_id = run_id.into();
        Self::new(run_id, EVENT_RUN_STARTED, json!({}))
    }

    pub fn run_completed(run_id: impl Into<String>, status: &str) -> Self {
        let run_id = run_id.into();
        Self::new(run_id, EVENT_RUN_COMPLETED, json!({ "status": status }))
    }

    pub fn shutdown(run_id: impl Into<String>) -> Self {
        let run_id = run_id.into();
        Self::new(run_id, EVENT_SHUTDOWN, json!({}))
    }

    pub fn check_started(
        run_id: impl Into<String>,
        check_id: &str,
        iteration: u32,
        input_digest: &str,
    ) -> Self {
        let run_id = run_id.into();
        Self::new(
            run_id,
            EVENT_CHECK_STARTED,
            json!({
                "checkId": check_id,
                "iteration": iteration,
                "inputDigest": input_digest,
            }),
        )
    }

    pub fn check_completed(
        run_id: impl Into<String>,
        check_id: &str,
        iteration: u32,
        output: &Value,
        content: Option<&str>,
        duration_ms: u64,
    ) -> Self {
        let run_id = run_id.into();
        Self::new(
            run_id,
            EVENT_CHECK_COMPLETED,
            json!({
                "checkId": check_id,
                "iteration": iteration,
                "output": output,
                "content": content,
                "durationMs": duration_ms,
            }),
        )
    }

    pub fn check_errored(
        run_id: impl Into<String>,
        check_id: &str,
        iteration: u32,
        error_kind: &str,
        message: &str,
    ) -> Self {
        let run_id = run_id.into();
        Self::new(
            run_id,
            EVENT_CHECK_ERRORED,
            json!({
                "checkId": check_id,
                "iteration": iteration,
                "error": { "kind": error_kind, "message": message },
            }),
        )
    }

    pub fn state_transition(
        run_id: impl Into<String>,
        check_id: &str,
        iteration: u32,
        to: IterationState,
    ) -> Self {
        let run_id = run_id.into();
        Self::new(
            run_id,
            EVENT_STATE_TRANSITION,
            json!({ "checkId": check_id, "iteration": iteration, "to": to }),
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn human_input_requested(
        run_id: impl Into<String>,
        check_id: &str,
        prompt: &str,
        placeholder: Option<&str>,
        multiline: bool,
        timeout_ms: Option<u64>,
        default: Option<&str>,
        allow_empty: bool,
    ) -> Self {
        let run_id = run_id.into();
        Self::new(
            run_id,
            EVENT_HUMAN_INPUT_REQUESTED,
            json!({
                "checkId": check_id,
                "prompt": prompt,
                "placeholder": placeholder,
                "multiline": multiline,
                "timeoutMs": timeout_ms,
                "default": default,
                "allowEmpty": allow_empty,
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_json() {
        let event = EngineEvent::check_completed(
            "run-1",
            "build",
            0,
            &json!({"ok": true}),
            Some("done"),
            42,
        );
        let text = serde_json::to_string(&event).unwrap();
        let parsed: EngineEvent = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, event);
    }
}
