//! Human-Input Coordinator (spec §4.I), modeled directly on this
//! workspace's own permission-request/reply protocol: a `watch` channel per
//! request, a first-response-wins reply, and a cancellation-aware wait.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;

use visor_types::error::ErrorKind;

#[derive(Debug, Clone)]
pub struct HumanInputRequest {
    pub id: String,
    pub check_name: String,
    pub prompt: String,
    pub placeholder: Option<String>,
    pub multiline: bool,
    pub timeout_ms: Option<u64>,
    pub default: Option<String>,
    pub allow_empty: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HumanInputOutcome {
    Answered(String),
    Defaulted(String),
    TimedOut,
    Cancelled,
}

#[derive(Clone, Default)]
pub struct HumanInputCoordinator {
    waiters: Arc<RwLock<HashMap<String, watch::Sender<Option<String>>>>>,
}

impl HumanInputCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a pending request and returns its waiter handle. Call this
    /// before publishing the `HumanInputRequested` event so a fast reply can
    /// never race ahead of the subscriber being registered.
    pub async fn register(&self, request_id: &str) {
        let (tx, _rx) = watch::channel(None);
        self.waiters.write().await.insert(request_id.to_string(), tx);
    }

    /// Pushes a value into the per-request channel. The first reply wins;
    /// later replies to the same id are ignored (the waiter is removed once
    /// `wait` observes one).
    pub async fn respond(&self, request_id: &str, value: String) -> bool {
        if let Some(waiter) = self.waiters.read().await.get(request_id).cloned() {
            let _ = waiter.send(Some(value));
            true
        } else {
            false
        }
    }

    /// Suspends until a reply arrives, the timeout elapses, or `cancel`
    /// fires (spec §4.I steps 3-5).
    pub async fn wait(
        &self,
        request_id: &str,
        timeout_ms: Option<u64>,
        default: Option<String>,
        cancel: CancellationToken,
    ) -> HumanInputOutcome {
        let Some(mut rx) = ({
            let waiters = self.waiters.read().await;
            waiters.get(request_id).map(|tx| tx.subscribe())
        }) else {
            return HumanInputOutcome::Cancelled;
        };

        let outcome = match timeout_ms {
            Some(ms) => {
                tokio::select! {
                    _ = cancel.cancelled() => HumanInputOutcome::Cancelled,
                    _ = tokio::time::sleep(std::time::Duration::from_millis(ms)) => {
                        match default {
                            Some(value) => HumanInputOutcome::Defaulted(value),
                            None => HumanInputOutcome::TimedOut,
                        }
                    }
                    changed = rx.changed() => resolve_reply(changed, &rx),
                }
            }
            None => {
                tokio::select! {
                    _ = cancel.cancelled() => HumanInputOutcome::Cancelled,
                    changed = rx.changed() => resolve_reply(changed, &rx),
                }
            }
        };

        self.waiters.write().await.remove(request_id);
        outcome
    }
}

fn resolve_reply(
    changed: Result<(), watch::error::RecvError>,
    rx: &watch::Receiver<Option<String>>,
) -> HumanInputOutcome {
    if changed.is_err() {
        return HumanInputOutcome::Cancelled;
    }
    match rx.borrow().clone() {
        Some(value) => HumanInputOutcome::Answered(value),
        None => HumanInputOutcome::Cancelled,
    }
}

impl HumanInputOutcome {
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            HumanInputOutcome::TimedOut => Some(ErrorKind::HumanInputTimeout),
            HumanInputOutcome::Cancelled => Some(ErrorKind::HumanInputCancelled),
            HumanInputOutcome::Answered(_) | HumanInputOutcome::Defaulted(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn answered_before_timeout_wins() {
        let coordinator = HumanInputCoordinator::new();
        coordinator.register("r1").await;
        let c2 = coordinator.clone();
        tokio::spawn(async move {
            c2.respond("r1", "yes".into()).await;
        });
        let outcome = coordinator
            .wait("r1", Some(500), None, CancellationToken::new())
            .await;
        assert_eq!(outcome, HumanInputOutcome::Answered("yes".into()));
    }

    #[tokio::test]
    async fn no_responder_times_out_without_default() {
        let coordinator = HumanInputCoordinator::new();
        coordinator.register("r2").await;
        let outcome = coordinator
            .wait("r2", Some(20), None, CancellationToken::new())
            .await;
        assert_eq!(outcome, HumanInputOutcome::TimedOut);
        assert_eq!(outcome.error_kind(), Some(ErrorKind::HumanInputTimeout));
    }

    #[tokio::test]
    async fn no_responder_times_out_with_default() {
        let coordinator = HumanInputCoordinator::new();
        coordinator.register("r3").await;
        let outcome = coordinator
            .wait("r3", Some(20), Some("fallback".into()), CancellationToken::new())
            .await;
        assert_eq!(outcome, HumanInputOutcome::Defaulted("fallback".into()));
    }

    #[tokio::test]
    async fn cancellation_wins_over_pending_wait() {
        let coordinator = HumanInputCoordinator::new();
        coordinator.register("r4").await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = coordinator.wait("r4", None, None, cancel).await;
        assert_eq!(outcome, HumanInputOutcome::Cancelled);
    }
}
