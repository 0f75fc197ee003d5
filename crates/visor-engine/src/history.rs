//! Output History & Journal (spec §4.B).
//!
//! `map<checkName, ordered sequence<output>>`, appended per iteration in
//! commit order. Readers take a shallow-copy snapshot so a provider's view
//! of the world never changes mid-flight (spec §3 invariant 3: "never
//! disappear or reorder").

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Default)]
pub struct OutputHistory {
    // One lock per engine instance is sufficient here: writes are already
    // serialized by the scheduler (only the worker owning an iteration ever
    // appends for that iteration), so this guards the shared map shape
    // rather than contending per check name.
    inner: Arc<RwLock<HashMap<String, Vec<Value>>>>,
}

impl OutputHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `output` as the newest entry for `check_name` (spec §4.B:
    /// "Writes are append-only and serialized per name").
    pub async fn append(&self, check_name: &str, output: Value) {
        let mut guard = self.inner.write().await;
        guard.entry(check_name.to_string()).or_default().push(output);
    }

    /// The most recent committed output for `check_name`, if any.
    pub async fn latest(&self, check_name: &str) -> Option<Value> {
        self.inner.read().await.get(check_name).and_then(|v| v.last().cloned())
    }

    /// A shallow-copy snapshot of every check's latest committed output,
    /// keyed by name — what providers and expressions see as `outputs`
    /// (spec §4.D).
    pub async fn snapshot_latest(&self) -> HashMap<String, Value> {
        self.inner
            .read()
            .await
            .iter()
            .filter_map(|(name, values)| values.last().cloned().map(|v| (name.clone(), v)))
            .collect()
    }

    /// Every committed output for `check_name`, oldest first — used to
    /// build `forEachPreview` statistics and multi-iteration result entries.
    pub async fn all(&self, check_name: &str) -> Vec<Value> {
        self.inner.read().await.get(check_name).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn snapshot_sees_latest_committed_value_per_check() {
        let history = OutputHistory::new();
        history.append("a", json!({"v": 1})).await;
        history.append("b", json!({"v": 2})).await;
        history.append("a", json!({"v": 3})).await;

        let snapshot = history.snapshot_latest().await;
        assert_eq!(snapshot.get("a"), Some(&json!({"v": 3})));
        assert_eq!(snapshot.get("b"), Some(&json!({"v": 2})));
    }

    #[tokio::test]
    async fn all_preserves_append_order() {
        let history = OutputHistory::new();
        history.append("a", json!(1)).await;
        history.append("a", json!(2)).await;
        assert_eq!(history.all("a").await, vec![json!(1), json!(2)]);
    }
}
