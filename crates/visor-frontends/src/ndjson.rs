//! NDJSON sink — one `EngineEvent` per line on a writer (spec §6.4: "the one
//! normative external format").

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::warn;

use visor_engine::bus::{Frontend, FrontendContext};

/// Writes each published event as a single JSON line, flushing after every
/// event so a tailing process (or a test harness) sees it immediately.
pub struct NdjsonFrontend<W> {
    name: String,
    writer: Arc<Mutex<W>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl<W> NdjsonFrontend<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(name: impl Into<String>, writer: W) -> Self {
        Self {
            name: name.into(),
            writer: Arc::new(Mutex::new(writer)),
            handle: Mutex::new(None),
        }
    }
}

impl NdjsonFrontend<tokio::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new("ndjson-stdout", tokio::io::stdout())
    }
}

#[async_trait]
impl<W> Frontend for NdjsonFrontend<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self, ctx: FrontendContext) {
        let mut rx = ctx.bus.subscribe();
        let writer = self.writer.clone();
        let name = self.name.clone();
        let handle = tokio::spawn(async move {
            loop {
                let event = match rx.recv().await {
                    Ok(event) => event,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(frontend = %name, skipped, "ndjson frontend lagged behind bus, dropping events");
                        continue;
                    }
                };
                let mut line = match serde_json::to_string(&event) {
                    Ok(line) => line,
                    Err(err) => {
                        warn!(frontend = %name, error = %err, "failed to serialize event");
                        continue;
                    }
                };
                line.push('\n');
                let mut writer = writer.lock().await;
                if let Err(err) = writer.write_all(line.as_bytes()).await {
                    warn!(frontend = %name, error = %err, "failed to write ndjson event");
                    break;
                }
                let _ = writer.flush().await;
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
    use visor_types::event::EngineEvent;

    #[tokio::test]
    async fn writes_one_json_line_per_event() {
        let bus = visor_engine::bus::EventBus::new();
        let (writer, mut reader) = tokio::io::duplex(4096);
        let frontend = NdjsonFrontend::new("test", writer);
        frontend
            .start(FrontendContext {
                bus: bus.clone(),
                run_id: "run-1".to_string(),
            })
            .await;

        bus.publish(EngineEvent::run_started("run-1"));

        use tokio::io::AsyncReadExt;
        let mut buf = vec![0u8; 256];
        let n = reader.read(&mut buf).await.unwrap();
        let text = String::from_utf8(buf[..n].to_vec()).unwrap();
        assert!(text.ends_with('\n'));
        let parsed: EngineEvent = serde_json::from_str(text.trim_end()).unwrap();
        assert_eq!(parsed.kind, "run.started");

        frontend.stop().await;
    }
}
