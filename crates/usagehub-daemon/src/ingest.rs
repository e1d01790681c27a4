//! Event ingestion over a Unix stream socket.
//!
//! Agent hook scripts connect and send newline-delimited JSON
//! [`InboundEvent`]s. Each line is parsed and handed to the orchestrator;
//! malformed lines are logged and skipped so one misbehaving producer cannot
//! stall ingestion.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::AsyncBufReadExt;
use tokio::net::UnixListener;
use tokio_util::sync::CancellationToken;

use usagehub_core::types::InboundEvent;

use crate::orchestrator::Orchestrator;

pub struct IngestSource {
    orchestrator: Arc<Orchestrator>,
    socket_path: PathBuf,
    cancel: CancellationToken,
}

impl IngestSource {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        socket_path: PathBuf,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            orchestrator,
            socket_path,
            cancel,
        }
    }

    /// Listen for events on the Unix socket until cancelled.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        // Remove stale socket file if it exists.
        if self.socket_path.exists() {
            tokio::fs::remove_file(&self.socket_path).await?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;
        tracing::info!(path = %self.socket_path.display(), "ingest source listening");

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, _addr)) => {
                            let orchestrator = Arc::clone(&self.orchestrator);
                            tokio::spawn(async move {
                                let reader = tokio::io::BufReader::new(stream);
                                let mut lines = reader.lines();

                                while let Ok(Some(line)) = lines.next_line().await {
                                    let line = line.trim();
                                    if line.is_empty() {
                                        continue;
                                    }

                                    match serde_json::from_str::<InboundEvent>(line) {
                                        Ok(event) => {
                                            tracing::debug!(
                                                session_id = %event.session_id,
                                                event_type = ?event.event_type,
                                                "event ingested"
                                            );
                                            orchestrator.on_event(event);
                                        }
                                        Err(e) => {
                                            tracing::warn!("failed to parse event JSON: {e}, line: {line}");
                                        }
                                    }
                                }
                            });
                        }
                        Err(e) => {
                            tracing::warn!("ingest accept error: {e}");
                        }
                    }
                }
                _ = self.cancel.cancelled() => {
                    tracing::info!("ingest source: cancellation requested, shutting down");
                    return Ok(());
                }
            }
        }
    }
}
