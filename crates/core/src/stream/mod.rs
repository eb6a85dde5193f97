//! WebSocket connection manager for the meeting stream.
//!
//! Owns the socket lifecycle and dispatches inbound messages, in arrival
//! order, as [`StreamEvent`]s. Exactly one socket is live per stream; frames
//! are fire-and-forget and silently skipped while the socket is not open.

use crate::config::DEFAULT_RECONNECT_DELAY_MS;
use crate::protocol::{ClientMessage, ServerMessage};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// What the session layer sees from the connection.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    Status(ConnectionStatus),
    Welcome {
        message: String,
    },
    Analysis {
        data: crate::protocol::AnalysisData,
        coaching: Option<crate::protocol::CoachingFeedback>,
        ai: Option<crate::protocol::AiFeedback>,
    },
    BackendError {
        message: String,
    },
}

#[derive(thiserror::Error, Debug)]
pub enum StreamError {
    #[error("websocket connect failed: {0}")]
    Connect(String),
}

/// One reconnect attempt per unclean close, after a fixed delay, and only
/// while the user still intends to stream.
#[derive(Clone, Copy, Debug)]
pub struct ReconnectPolicy {
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
        }
    }
}

impl ReconnectPolicy {
    pub fn next_attempt(
        &self,
        clean_close: bool,
        streaming_intended: bool,
        already_scheduled: bool,
    ) -> Option<Duration> {
        if !clean_close && streaming_intended && !already_scheduled {
            Some(self.delay)
        } else {
            None
        }
    }
}

struct StreamInner {
    url: Url,
    policy: ReconnectPolicy,
    events: mpsc::Sender<StreamEvent>,
    intent: AtomicBool,
    status: Mutex<ConnectionStatus>,
    outbound: Mutex<Option<mpsc::Sender<ClientMessage>>>,
    reconnect_scheduled: AtomicBool,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct MeetStream {
    inner: Arc<StreamInner>,
}

impl MeetStream {
    /// Returns the stream plus the receiver the session consumes events on.
    pub fn new(url: Url, policy: ReconnectPolicy) -> (Self, mpsc::Receiver<StreamEvent>) {
        let (events, events_rx) = mpsc::channel(32);
        let stream = Self {
            inner: Arc::new(StreamInner {
                url,
                policy,
                events,
                intent: AtomicBool::new(false),
                status: Mutex::new(ConnectionStatus::Disconnected),
                outbound: Mutex::new(None),
                reconnect_scheduled: AtomicBool::new(false),
                reconnect_task: Mutex::new(None),
                reader_task: Mutex::new(None),
            }),
        };
        (stream, events_rx)
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.inner.status.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    /// Marks streaming intent and opens the socket.
    pub async fn start(&self) -> Result<(), StreamError> {
        self.inner.intent.store(true, Ordering::SeqCst);
        self.connect().await
    }

    /// Idempotent: a no-op while a socket is already open or opening.
    async fn connect(&self) -> Result<(), StreamError> {
        {
            let mut status = self
                .inner
                .status
                .lock()
                .unwrap_or_else(|p| p.into_inner());
            if matches!(
                *status,
                ConnectionStatus::Connecting | ConnectionStatus::Connected
            ) {
                return Ok(());
            }
            *status = ConnectionStatus::Connecting;
        }
        self.emit(StreamEvent::Status(ConnectionStatus::Connecting))
            .await;
        tracing::info!(url = %self.inner.url, "connecting");

        let ws = match connect_async(self.inner.url.as_str()).await {
            Ok((ws, _response)) => ws,
            Err(e) => {
                tracing::warn!(error = %e, "websocket connect failed");
                self.set_status(ConnectionStatus::Error).await;
                // A failed connect is an unclean end of the attempt.
                self.maybe_schedule_reconnect(false);
                return Err(StreamError::Connect(e.to_string()));
            }
        };

        let (mut write, mut read) = ws.split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<ClientMessage>(8);
        *self
            .inner
            .outbound
            .lock()
            .unwrap_or_else(|p| p.into_inner()) = Some(outbound_tx);

        self.set_status(ConnectionStatus::Connected).await;
        tracing::info!("connected");

        // Writer: serializes outbound messages; a clean close frame goes out
        // once the channel is dropped by `stop`.
        tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                let json = match serde_json::to_string(&msg) {
                    Ok(j) => j,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to serialize outbound message");
                        continue;
                    }
                };
                if let Err(e) = write.send(Message::Text(json.into())).await {
                    tracing::warn!(error = %e, "websocket send failed");
                    break;
                }
            }
            let _ = write.send(Message::Close(None)).await;
        });

        // Reader: dispatches until the socket ends, then classifies the
        // close and lets the reconnect policy decide.
        let this = self.clone();
        let reader = tokio::spawn(async move {
            let mut clean = false;
            while let Some(item) = read.next().await {
                match item {
                    Ok(Message::Text(text)) => this.dispatch(&text).await,
                    Ok(Message::Close(_)) => {
                        tracing::info!("websocket closed by peer");
                        clean = true;
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "websocket error");
                        break;
                    }
                }
            }
            this.on_socket_closed(clean).await;
        });
        *self
            .inner
            .reader_task
            .lock()
            .unwrap_or_else(|p| p.into_inner()) = Some(reader);

        Ok(())
    }

    /// Queues one frame if the socket is open. Not being ready is expected
    /// during setup/teardown races and is not an error; send failures are
    /// logged and never tear down the connection.
    pub fn send_frame(&self, message: ClientMessage) {
        let tx = self
            .inner
            .outbound
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone();
        match tx {
            Some(tx) => {
                if let Err(e) = tx.try_send(message) {
                    tracing::debug!(error = %e, "frame dropped");
                }
            }
            None => tracing::trace!("socket not open; frame skipped"),
        }
    }

    /// Drops streaming intent, cancels any pending reconnect, sends a clean
    /// `end` notice, and closes the socket. Safe to call repeatedly.
    pub async fn stop(&self) {
        self.inner.intent.store(false, Ordering::SeqCst);

        if let Some(handle) = self
            .inner
            .reconnect_task
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
        {
            handle.abort();
        }
        self.inner.reconnect_scheduled.store(false, Ordering::SeqCst);

        let tx = self
            .inner
            .outbound
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(tx) = tx {
            let _ = tx.send(ClientMessage::End).await;
            // Dropping the sender ends the writer, which sends the close
            // frame on its way out.
        }

        if let Some(handle) = self
            .inner
            .reader_task
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
        {
            handle.abort();
        }

        self.set_status(ConnectionStatus::Disconnected).await;
    }

    async fn dispatch(&self, text: &str) {
        match serde_json::from_str::<ServerMessage>(text) {
            Ok(ServerMessage::Welcome { message, .. }) => {
                tracing::info!(message = %message, "welcome");
                self.emit(StreamEvent::Welcome { message }).await;
            }
            Ok(ServerMessage::Pong) => {}
            Ok(ServerMessage::Analysis {
                data,
                coaching,
                gemini,
            }) => {
                self.emit(StreamEvent::Analysis {
                    data,
                    coaching,
                    ai: gemini,
                })
                .await;
            }
            Ok(ServerMessage::Error { message }) => {
                tracing::warn!(message = %message, "backend error");
                self.emit(StreamEvent::BackendError { message }).await;
            }
            Ok(ServerMessage::Unknown) => {
                tracing::debug!("ignoring unknown message type");
            }
            Err(e) => {
                tracing::warn!(error = %e, "malformed message dropped");
            }
        }
    }

    async fn on_socket_closed(&self, clean: bool) {
        *self
            .inner
            .outbound
            .lock()
            .unwrap_or_else(|p| p.into_inner()) = None;

        let status = if clean {
            ConnectionStatus::Disconnected
        } else {
            ConnectionStatus::Error
        };
        self.set_status(status).await;
        self.maybe_schedule_reconnect(clean);
    }

    fn maybe_schedule_reconnect(&self, clean: bool) {
        let intent = self.inner.intent.load(Ordering::SeqCst);
        let already = self.inner.reconnect_scheduled.load(Ordering::SeqCst);
        let Some(delay) = self.inner.policy.next_attempt(clean, intent, already) else {
            return;
        };

        self.inner.reconnect_scheduled.store(true, Ordering::SeqCst);
        tracing::info!(delay_ms = delay.as_millis() as u64, "reconnect scheduled");

        let this = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.inner
                .reconnect_scheduled
                .store(false, Ordering::SeqCst);
            if this.inner.intent.load(Ordering::SeqCst) {
                tracing::info!("reconnecting");
                let _ = this.connect().await;
            }
        });
        *self
            .inner
            .reconnect_task
            .lock()
            .unwrap_or_else(|p| p.into_inner()) = Some(handle);
    }

    async fn set_status(&self, status: ConnectionStatus) {
        {
            let mut current = self
                .inner
                .status
                .lock()
                .unwrap_or_else(|p| p.into_inner());
            if *current == status {
                return;
            }
            *current = status;
        }
        self.emit(StreamEvent::Status(status)).await;
    }

    async fn emit(&self, event: StreamEvent) {
        // The session dropping its receiver just means nobody is watching.
        let _ = self.inner.events.send(event).await;
    }

    #[cfg(test)]
    fn reconnect_pending(&self) -> bool {
        self.inner.reconnect_scheduled.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_stream() -> (MeetStream, mpsc::Receiver<StreamEvent>) {
        let url = Url::parse("ws://127.0.0.1:9/ws/meet/test").expect("valid url");
        MeetStream::new(url, ReconnectPolicy::default())
    }

    #[test]
    fn policy_schedules_once_for_unclean_close_while_streaming() {
        let policy = ReconnectPolicy::default();
        assert_eq!(
            policy.next_attempt(false, true, false),
            Some(Duration::from_millis(3000))
        );
        assert_eq!(policy.next_attempt(false, true, true), None);
    }

    #[test]
    fn policy_skips_clean_close_and_dropped_intent() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.next_attempt(true, true, false), None);
        assert_eq!(policy.next_attempt(false, false, false), None);
    }

    #[tokio::test]
    async fn dispatch_routes_by_message_type() {
        let (stream, mut events) = test_stream();

        stream
            .dispatch(r#"{"type":"welcome","message":"hi"}"#)
            .await;
        stream.dispatch(r#"{"type":"pong"}"#).await;
        stream
            .dispatch(r#"{"type":"analysis","data":{"frame_num":1}}"#)
            .await;
        stream
            .dispatch(r#"{"type":"error","message":"boom"}"#)
            .await;
        stream.dispatch("not json at all").await;
        stream.dispatch(r#"{"type":"asana_set"}"#).await;

        assert_eq!(
            events.recv().await,
            Some(StreamEvent::Welcome {
                message: "hi".to_owned()
            })
        );
        let Some(StreamEvent::Analysis { data, .. }) = events.recv().await else {
            panic!("expected analysis event");
        };
        assert_eq!(data.frame_num, 1);
        assert_eq!(
            events.recv().await,
            Some(StreamEvent::BackendError {
                message: "boom".to_owned()
            })
        );
        // Pong, malformed, and unknown messages emit nothing.
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_safe_before_start() {
        let (stream, mut events) = test_stream();
        stream.stop().await;
        stream.stop().await;
        assert_eq!(stream.status(), ConnectionStatus::Disconnected);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn failed_connect_schedules_one_reconnect_and_stop_cancels_it() {
        let (stream, _events) = test_stream();

        let result = stream.start().await;
        assert!(result.is_err());
        assert_eq!(stream.status(), ConnectionStatus::Error);
        assert!(stream.reconnect_pending());

        stream.stop().await;
        assert!(!stream.reconnect_pending());
        assert_eq!(stream.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn frames_are_silently_skipped_while_disconnected() {
        let (stream, _events) = test_stream();
        stream.send_frame(ClientMessage::Frame {
            frame: "data:image/jpeg;base64,AAAA".to_owned(),
            timestamp: 0.0,
        });
        assert_eq!(stream.status(), ConnectionStatus::Disconnected);
    }
}
