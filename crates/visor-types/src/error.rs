//! Error kind taxonomy (spec §7). Kinds are string-valued and hierarchical
//! (`<component>/<condition>`) so they travel unchanged through JSON events
//! and `Failed { kind }` iteration statuses.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    ConfigCycle,
    ConfigUnknownCheck,
    ConfigInvalidForEachTarget,
    ProviderTimeout,
    ProviderTransient,
    ProviderFatal,
    ProviderApiKeyMissing,
    ExprTimeout,
    ExprRuntime,
    ExprType,
    ForEachInvalid,
    LoopBudgetExceeded,
    HumanInputTimeout,
    HumanInputCancelled,
    Cancelled,
    /// `<checkName>/fail_if`
    FailIf(String),
    /// `<checkName>/render-error`
    RenderError(String),
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::ConfigCycle => "config/cycle".to_string(),
            ErrorKind::ConfigUnknownCheck => "config/unknown-check".to_string(),
            ErrorKind::ConfigInvalidForEachTarget => "config/invalid-forEach-target".to_string(),
            ErrorKind::ProviderTimeout => "provider/timeout".to_string(),
            ErrorKind::ProviderTransient => "provider/transient".to_string(),
            ErrorKind::ProviderFatal => "provider/fatal".to_string(),
            ErrorKind::ProviderApiKeyMissing => "provider/api-key-missing".to_string(),
            ErrorKind::ExprTimeout => "expr/timeout".to_string(),
            ErrorKind::ExprRuntime => "expr/runtime".to_string(),
            ErrorKind::ExprType => "expr/type".to_string(),
            ErrorKind::ForEachInvalid => "forEach/invalid".to_string(),
            ErrorKind::LoopBudgetExceeded => "loop-budget-exceeded".to_string(),
            ErrorKind::HumanInputTimeout => "human-input/timeout".to_string(),
            ErrorKind::HumanInputCancelled => "human-input/cancelled".to_string(),
            ErrorKind::Cancelled => "cancelled".to_string(),
            ErrorKind::FailIf(name) => format!("{name}/fail_if"),
            ErrorKind::RenderError(name) => format!("{name}/render-error"),
        };
        write!(f, "{s}")
    }
}

impl ErrorKind {
    pub fn as_str(&self) -> String {
        self.to_string()
    }

    /// Whether this kind is retried at all without consulting a specific
    /// check's `retry_on` list — i.e. it is a transient-shaped provider
    /// error as opposed to a config/expr/budget failure.
    pub fn is_retryable_class(&self) -> bool {
        matches!(
            self,
            ErrorKind::ProviderTimeout | ErrorKind::ProviderTransient
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineErrorValue {
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

impl EngineErrorValue {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind: kind.as_str(),
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dynamic_kinds_render_with_check_name() {
        assert_eq!(ErrorKind::FailIf("lint".into()).as_str(), "lint/fail_if");
        assert_eq!(
            ErrorKind::RenderError("lint".into()).as_str(),
            "lint/render-error"
        );
    }

    #[test]
    fn static_kinds_match_spec_strings() {
        assert_eq!(ErrorKind::LoopBudgetExceeded.as_str(), "loop-budget-exceeded");
        assert_eq!(ErrorKind::ProviderTimeout.as_str(), "provider/timeout");
    }
}
