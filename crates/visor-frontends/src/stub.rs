//! Interface-only frontend stubs.
//!
//! Full PR-comment rendering and a terminal UI are out of scope here (the
//! teacher's `tandem-channels`/`tandem-tui` own that complexity); these
//! stubs exist so the richer surfaces have a `Frontend` to grow into without
//! the engine caring which one is wired up.

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use visor_engine::bus::{Frontend, FrontendContext};

/// Subscribes and logs; a real implementation would batch `check.completed`
/// issues into a single PR comment and edit it in place across the run.
pub struct GithubCommentFrontend {
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Default for GithubCommentFrontend {
    fn default() -> Self {
        Self {
            handle: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Frontend for GithubCommentFrontend {
    fn name(&self) -> &str {
        "github-comment"
    }

    async fn start(&self, ctx: FrontendContext) {
        let mut rx = ctx.bus.subscribe();
        let run_id = ctx.run_id.clone();
        let handle = tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                debug!(run_id = %run_id, kind = %event.kind, "github-comment frontend observed event");
            }
        });
        *self.handle.lock().await = Some(handle);
    }

    async fn stop(&self) {
        if let Some(handle) = self.handle.lock().await.take() {
            handle.abort();
        }
    }
}

/// Subscribes and logs; a real implementation would drive a ratatui screen
/// keyed off `state.transition`/`human_input.requested` events.
pub struct TuiFrontend {
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Default for TuiFrontend {
    fn default() -> Self {
        Self {
            handle: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Frontend for TuiFrontend {
    fn name(&self) -> &str {
        "tui"
    }

    async fn start(&self, ctx: FrontendContext) {
        let mut rx = ctx.bus.subscribe();
        let run_id = ctx.run_id.clone();
        let handle = tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                debug!(run_id = %run_id, kind = %event.kind, "tui frontend observed event");
            }
        });
        *self.handle.lock().await = Some(handle);
    }

    async fn stop(&self) {
        if let Some(handle) = self.handle.lock().await.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use visor_engine::bus::EventBus;
    use visor_types::event::EngineEvent;

    #[tokio::test]
    async fn github_comment_frontend_starts_and_stops_cleanly() {
        let bus = EventBus::new();
        let frontend = GithubCommentFrontend::default();
        frontend
            .start(FrontendContext {
                bus: bus.clone(),
                run_id: "run-1".to_string(),
            })
            .await;
        bus.publish(EngineEvent::run_started("run-1"));
        frontend.stop().await;
    }
}
