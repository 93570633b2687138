//! Per-connection dispatch
//!
//! Each connection gets a uuid, a writer task draining its outbound channel,
//! and a read loop routing inbound messages to the session registry.

use std::sync::Arc;

use eyre::Result;
use tokio::io::BufReader;
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::listener::{Frame, read_frame, write_frame};
use crate::config::ServerConfig;
use crate::domain::TenantContext;
use crate::session::{Inbound, Outbound, SessionRegistry};
use crate::workflow::Orchestrator;

/// Outbound messages buffered per connection
const OUTBOX_CAPACITY: usize = 64;

/// Accepts connections and hosts their conversations
#[derive(Clone)]
pub struct Server {
    orchestrator: Orchestrator,
    registry: SessionRegistry,
    max_message_bytes: usize,
}

impl Server {
    pub fn new(orchestrator: Orchestrator, config: &ServerConfig) -> Self {
        debug!(max_message_bytes = %config.max_message_bytes, "Server::new: called");
        Self {
            orchestrator,
            registry: SessionRegistry::new(),
            max_message_bytes: config.max_message_bytes,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Accept connections until `shutdown_rx` fires
    pub async fn serve(&self, listener: UnixListener, mut shutdown_rx: mpsc::Receiver<()>) -> Result<()> {
        info!("Server accepting connections");
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, _)) => {
                            let server = self.clone();
                            tokio::spawn(async move {
                                if let Err(e) = server.handle_connection(stream).await {
                                    warn!(error = %e, "Connection ended with error");
                                }
                            });
                        }
                        Err(e) => warn!(error = %e, "Failed to accept connection"),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Server shutting down");
                    break;
                }
            }
        }
        Ok(())
    }

    /// Serve one client until it disconnects
    pub async fn handle_connection(&self, stream: UnixStream) -> Result<()> {
        let connection_id = Uuid::now_v7().to_string();
        info!(%connection_id, "Client connected");

        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::channel(OUTBOX_CAPACITY);
        let writer = tokio::spawn(write_loop(write_half, rx));
        let mut reader = BufReader::new(read_half);
        let mut context = TenantContext::default();

        let _ = tx
            .send(Outbound::System {
                message: "Connected. Tell me about the campaign you'd like to create.".to_string(),
            })
            .await;

        let result = loop {
            let line = match read_frame(&mut reader, self.max_message_bytes).await {
                Ok(Frame::Line(line)) => line,
                Ok(Frame::Closed) => break Ok(()),
                Ok(Frame::TooLarge(size)) => {
                    warn!(%connection_id, %size, "Message too large, closing connection");
                    let _ = tx
                        .send(Outbound::Error {
                            message: format!("Message too large ({} bytes)", size),
                        })
                        .await;
                    break Ok(());
                }
                Err(e) => break Err(e),
            };
            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<Inbound>(&line) {
                Ok(message) => self.dispatch(&connection_id, &mut context, message, &tx).await,
                Err(e) => {
                    debug!(%connection_id, error = %e, "handle_connection: unparseable message");
                    let _ = tx
                        .send(Outbound::Error {
                            message: format!("Invalid message: {}", e),
                        })
                        .await;
                }
            }
        };

        self.registry.reset(&connection_id).await;
        drop(tx);
        if let Err(e) = writer.await {
            debug!(%connection_id, error = %e, "handle_connection: writer task failed");
        }
        info!(%connection_id, "Client disconnected");
        result
    }

    async fn dispatch(
        &self,
        connection_id: &str,
        context: &mut TenantContext,
        message: Inbound,
        tx: &mpsc::Sender<Outbound>,
    ) {
        match message {
            Inbound::Handshake { location, credentials } => {
                info!(%connection_id, location_id = %location.id, "Handshake received");
                *context = TenantContext::new(location, credentials);
                let name = if context.location.name.is_empty() {
                    "your location".to_string()
                } else {
                    context.location.name.clone()
                };
                let _ = tx
                    .send(Outbound::System {
                        message: format!("Ready to build campaigns for {}.", name),
                    })
                    .await;
            }
            Inbound::UserMessage { text } => {
                if text.trim().is_empty() {
                    let _ = tx
                        .send(Outbound::Error {
                            message: "Please describe the campaign you want to create.".to_string(),
                        })
                        .await;
                    return;
                }
                info!(%connection_id, "Starting conversation");
                // Detached: the registry entry owns the task from here
                let _handle = self
                    .orchestrator
                    .start(&self.registry, connection_id, text, context.clone(), tx.clone())
                    .await;
            }
            Inbound::UserResponse { question_id, text } => {
                if !self.registry.resolve(connection_id, &question_id, &text).await {
                    warn!(%connection_id, %question_id, "Response to no pending question");
                    let _ = tx
                        .send(Outbound::Error {
                            message: format!(
                                "I wasn't expecting an answer to question {}. It may have expired or been answered already.",
                                question_id
                            ),
                        })
                        .await;
                }
            }
            Inbound::Reset => {
                let had_conversation = self.registry.reset(connection_id).await;
                debug!(%connection_id, %had_conversation, "dispatch: reset");
                let _ = tx
                    .send(Outbound::System {
                        message: "Conversation reset. What campaign would you like to create?".to_string(),
                    })
                    .await;
            }
        }
    }
}

async fn write_loop(mut writer: OwnedWriteHalf, mut rx: mpsc::Receiver<Outbound>) {
    while let Some(message) = rx.recv().await {
        if let Err(e) = write_frame(&mut writer, &message).await {
            debug!(error = %e, "write_loop: client gone");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::llm::client::mock::MockLlmClient;
    use crate::server::create_listener_at;
    use crate::workflow::testing::{StubPlatform, services};
    use tempfile::TempDir;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt};

    async fn next_message(lines: &mut tokio::io::Lines<BufReader<tokio::net::unix::OwnedReadHalf>>) -> Outbound {
        let line = lines.next_line().await.unwrap().unwrap();
        serde_json::from_str(&line).unwrap()
    }

    #[tokio::test]
    async fn test_conversation_over_socket() {
        let temp = TempDir::new().unwrap();
        let socket_path = temp.path().join("campaignd.sock");
        let (listener, _) = create_listener_at(&socket_path).unwrap();

        let brief = serde_json::json!({
            "audience": "contacts in New York",
            "content_summary": "Black Friday discount",
            "send_at": "2025-11-28T09:00:00-05:00",
            "segment_name": "new york contacts",
            "missing_info": [],
        })
        .to_string();
        let llm = MockLlmClient::from_texts([brief]);
        let orchestrator = Orchestrator::new(Arc::new(services(llm, StubPlatform::new())));
        let server = Server::new(orchestrator, &ServerConfig::default());
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let serving = tokio::spawn({
            let server = server.clone();
            async move { server.serve(listener, shutdown_rx).await }
        });

        let stream = UnixStream::connect(&socket_path).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();
        assert!(matches!(next_message(&mut lines).await, Outbound::System { .. }));

        write_half
            .write_all(b"{\"type\":\"handshake\",\"location\":{\"id\":42,\"name\":\"Joe's Cafe\"}}\n")
            .await
            .unwrap();
        assert!(matches!(next_message(&mut lines).await, Outbound::System { message } if message.contains("Joe's Cafe")));

        write_half
            .write_all(b"{\"type\":\"user_message\",\"text\":\"Black Friday sale for New York\"}\n")
            .await
            .unwrap();

        // No segments exist, so the flow asks before creating one
        let question_id = loop {
            let message = next_message(&mut lines).await;
            if let Some(id) = message.question_id() {
                break id.to_string();
            }
        };
        assert!(question_id.starts_with("confirm_create_"));
        assert_eq!(server.registry().len().await, 1);

        let answer = format!("{{\"type\":\"user_response\",\"questionId\":\"{}\",\"text\":\"no\"}}\n", question_id);
        write_half.write_all(answer.as_bytes()).await.unwrap();
        loop {
            if let Outbound::Assistant { message } = next_message(&mut lines).await
                && message.contains("cancelled")
            {
                break;
            }
        }

        // Answering the same question again is reported, not ignored
        write_half.write_all(answer.as_bytes()).await.unwrap();
        assert!(matches!(
            next_message(&mut lines).await,
            Outbound::Error { message } if message.contains(&question_id)
        ));

        write_half.write_all(b"not json\n").await.unwrap();
        assert!(matches!(next_message(&mut lines).await, Outbound::Error { .. }));

        drop(write_half);
        shutdown_tx.send(()).await.unwrap();
        serving.await.unwrap().unwrap();
    }
}
