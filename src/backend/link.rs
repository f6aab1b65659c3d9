//! Outbound WebSocket link to the backend processing service
//!
//! Exactly one connection task runs per [`BackendLink`]. The task walks the
//! `Disconnected → Connecting → Connected → Disconnected` cycle forever:
//! every close (or failed connect) is followed by one fixed-interval sleep
//! and one new attempt. There is no retry cap and no backoff growth.
//!
//! Outbound payloads go through an unbounded channel owned by the live
//! connection, so [`BackendLink::send`] never blocks and never queues while
//! the link is down.

use super::BackendSender;
use crate::error::{BrokerError, Result};
use crate::protocol::BackendMessage;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Delay between a close event and the next connection attempt
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

type BackendStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection state of the backend link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Connecting => "connecting",
            LinkState::Connected => "connected",
        };
        f.write_str(s)
    }
}

pub struct BackendLink {
    url: String,
    reconnect_delay: Duration,
    state: watch::Sender<LinkState>,
    /// Write half of the live connection; `None` unless connected
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<String>>>,
    attempts: AtomicU64,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl BackendLink {
    pub fn new(url: impl Into<String>, reconnect_delay: Duration) -> Self {
        let (state, _) = watch::channel(LinkState::Disconnected);
        Self {
            url: url.into(),
            reconnect_delay,
            state,
            outbound: Mutex::new(None),
            subscribers: Mutex::new(Vec::new()),
            attempts: AtomicU64::new(0),
            task: Mutex::new(None),
        }
    }

    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    /// Receiver that observes every state transition
    pub fn watch_state(&self) -> watch::Receiver<LinkState> {
        self.state.subscribe()
    }

    /// Number of outbound connection attempts made so far
    pub fn connect_attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Whether the connection task is running
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Start the connection task. Calling this while the task is already
    /// running does nothing.
    pub fn connect(self: &Arc<Self>) {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            tracing::debug!(url = %self.url, "Backend link already running");
            return;
        }
        let link = Arc::clone(self);
        *task = Some(tokio::spawn(link.run()));
    }

    /// Stop the connection task and drop the live connection, if any.
    pub fn shutdown(&self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
        self.outbound.lock().take();
        self.set_state(LinkState::Disconnected);
        tracing::info!(url = %self.url, "Backend link shut down");
    }

    /// Register an observer of inbound backend payloads.
    ///
    /// Every payload received after registration is delivered once, in
    /// receipt order. Dropping the receiver unregisters it.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Transmit a command if connected; fails with `BackendUnavailable`
    /// otherwise. No retry, no buffering.
    ///
    /// `Ok` means the command was queued on the live connection. If that
    /// connection closes before the command is written, it is discarded
    /// and logged, and the requesting client gets no reply.
    pub fn send(&self, message: &BackendMessage) -> Result<()> {
        let payload = message.to_json()?;
        self.send_text(payload)
    }

    fn send_text(&self, payload: String) -> Result<()> {
        if self.state() != LinkState::Connected {
            return Err(BrokerError::BackendUnavailable);
        }
        let outbound = self.outbound.lock();
        let tx = outbound.as_ref().ok_or(BrokerError::BackendUnavailable)?;
        tx.send(payload).map_err(|_| BrokerError::BackendUnavailable)
    }

    fn set_state(&self, next: LinkState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::debug!(from = %previous, to = %next, "Backend link state changed");
        }
    }

    fn dispatch(&self, payload: String) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(payload.clone()).is_ok());
    }

    async fn run(self: Arc<Self>) {
        loop {
            self.set_state(LinkState::Connecting);
            let attempt = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::info!(url = %self.url, attempt, "Connecting to backend service");

            let lost = match connect_async(self.url.as_str()).await {
                Ok((stream, _)) => self.serve(stream).await,
                Err(e) => {
                    tracing::error!(url = %self.url, error = %e, "Backend socket error");
                    BrokerError::BackendConnectionLost(e.to_string())
                },
            };

            self.outbound.lock().take();
            self.set_state(LinkState::Disconnected);
            tracing::warn!(
                error = %lost,
                "Backend socket closed. Reconnecting in {:.1}s...",
                self.reconnect_delay.as_secs_f64()
            );

            tokio::time::sleep(self.reconnect_delay).await;
        }
    }

    /// Pump one live connection until it closes; returns why it closed.
    async fn serve(&self, stream: BackendStream) -> BrokerError {
        let (mut write, mut read) = stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel();

        *self.outbound.lock() = Some(tx);
        self.set_state(LinkState::Connected);
        tracing::info!(url = %self.url, "Connected to backend service");

        let reason = loop {
            tokio::select! {
                frame = read.next() => {
                    if let Some(reason) = self.handle_frame(frame) {
                        break reason;
                    }
                }
                Some(payload) = rx.recv() => {
                    if let Err(e) = forward(&mut write, payload).await {
                        tracing::error!(error = %e, "Failed to write to backend");
                        break BrokerError::BackendConnectionLost(e.to_string());
                    }
                }
            }
        };

        // No new sends can be queued once the sender is gone
        self.outbound.lock().take();
        let unsent = discard_unsent(&mut rx);
        if unsent > 0 {
            tracing::warn!(unsent, "Discarded commands queued for a closed backend connection");
        }
        reason
    }

    /// Handle one inbound frame; `Some` means the connection is gone.
    fn handle_frame(
        &self,
        frame: Option<std::result::Result<Message, tokio_tungstenite::tungstenite::Error>>,
    ) -> Option<BrokerError> {
        match frame {
            Some(Ok(Message::Text(text))) => {
                tracing::debug!(bytes = text.len(), "Received from backend");
                self.dispatch(text);
                None
            },
            Some(Ok(Message::Binary(bytes))) => {
                tracing::debug!(bytes = bytes.len(), "Received binary frame from backend");
                self.dispatch(String::from_utf8_lossy(&bytes).into_owned());
                None
            },
            Some(Ok(Message::Close(frame))) => Some(BrokerError::BackendConnectionLost(
                describe_close(frame.as_ref()),
            )),
            Some(Ok(_)) => None,
            Some(Err(e)) => {
                tracing::error!(error = %e, "Backend socket error");
                Some(BrokerError::BackendConnectionLost(e.to_string()))
            },
            None => Some(BrokerError::BackendConnectionLost(
                "stream ended".to_string(),
            )),
        }
    }
}

impl BackendSender for BackendLink {
    fn send(&self, message: &BackendMessage) -> Result<()> {
        BackendLink::send(self, message)
    }
}

async fn forward(
    write: &mut SplitSink<BackendStream, Message>,
    payload: String,
) -> std::result::Result<(), tokio_tungstenite::tungstenite::Error> {
    write.send(Message::Text(payload)).await
}

/// Close the queue and drop whatever was never written; returns the count.
fn discard_unsent(rx: &mut mpsc::UnboundedReceiver<String>) -> usize {
    rx.close();
    let mut unsent = 0;
    while rx.try_recv().is_ok() {
        unsent += 1;
    }
    unsent
}

fn describe_close(frame: Option<&CloseFrame<'_>>) -> String {
    match frame {
        Some(frame) => format!("code {}, reason '{}'", u16::from(frame.code), frame.reason),
        None => "closed without frame".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Action;

    fn view_embeddings() -> BackendMessage {
        BackendMessage {
            action: Action::ViewEmbeddings,
            file_name: None,
            audio_data: None,
            speaker_name: None,
        }
    }

    /// Address with nothing listening on it
    async fn unreachable_url() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("ws://{}", addr)
    }

    #[test]
    fn test_new_link_is_disconnected() {
        let link = BackendLink::new("ws://127.0.0.1:1", DEFAULT_RECONNECT_DELAY);
        assert_eq!(link.state(), LinkState::Disconnected);
        assert_eq!(link.connect_attempts(), 0);
        assert!(!link.is_running());
    }

    #[test]
    fn test_send_while_disconnected_fails() {
        let link = BackendLink::new("ws://127.0.0.1:1", DEFAULT_RECONNECT_DELAY);
        assert!(matches!(
            link.send(&view_embeddings()),
            Err(BrokerError::BackendUnavailable)
        ));
    }

    #[test]
    fn test_link_state_serialization() {
        assert_eq!(
            serde_json::to_string(&LinkState::Connected).unwrap(),
            "\"connected\""
        );
        assert_eq!(LinkState::Disconnected.to_string(), "disconnected");
    }

    #[test]
    fn test_dispatch_reaches_every_subscriber_in_order() {
        let link = BackendLink::new("ws://127.0.0.1:1", DEFAULT_RECONNECT_DELAY);
        let mut first = link.subscribe();
        let mut second = link.subscribe();

        link.dispatch("one".to_string());
        link.dispatch("two".to_string());

        assert_eq!(first.try_recv().unwrap(), "one");
        assert_eq!(first.try_recv().unwrap(), "two");
        assert_eq!(second.try_recv().unwrap(), "one");
        assert_eq!(second.try_recv().unwrap(), "two");
        assert!(first.try_recv().is_err());
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let link = BackendLink::new("ws://127.0.0.1:1", DEFAULT_RECONNECT_DELAY);
        let dropped = link.subscribe();
        let mut kept = link.subscribe();
        drop(dropped);

        link.dispatch("payload".to_string());

        assert_eq!(link.subscribers.lock().len(), 1);
        assert_eq!(kept.try_recv().unwrap(), "payload");
    }

    #[test]
    fn test_discard_unsent_closes_queue() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send("first".to_string()).unwrap();
        tx.send("second".to_string()).unwrap();

        assert_eq!(discard_unsent(&mut rx), 2);
        assert!(tx.send("late".to_string()).is_err());
        assert_eq!(discard_unsent(&mut rx), 0);
    }

    #[tokio::test]
    async fn test_unreachable_backend_retries_at_fixed_interval() {
        let link = Arc::new(BackendLink::new(
            unreachable_url().await,
            Duration::from_millis(200),
        ));
        link.connect();
        // Second call must not start a second connection task
        link.connect();

        tokio::time::sleep(Duration::from_millis(500)).await;
        let attempts = link.connect_attempts();
        link.shutdown();

        assert!(
            (2..=4).contains(&attempts),
            "expected a single retry loop, saw {} attempts",
            attempts
        );
        assert_eq!(link.state(), LinkState::Disconnected);
        assert!(!link.is_running());
    }

    #[tokio::test]
    async fn test_failed_connect_waits_before_retrying() {
        let link = Arc::new(BackendLink::new(
            unreachable_url().await,
            Duration::from_secs(60),
        ));
        let mut states = link.watch_state();
        link.connect();

        let probe = Arc::clone(&link);
        tokio::time::timeout(
            Duration::from_secs(5),
            states.wait_for(|state| {
                *state == LinkState::Disconnected && probe.connect_attempts() >= 1
            }),
        )
        .await
        .expect("first attempt should fail")
        .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(link.connect_attempts(), 1);
        assert_eq!(link.state(), LinkState::Disconnected);
        assert!(link.is_running());
        link.shutdown();
    }
}
