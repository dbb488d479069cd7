// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Per-endpoint session: one connection plus its request queue.

use super::connection::connection_error;
use super::correlator::send_once_marked;
use super::{Connection, Endpoint, Exchange, ExchangeObserver, RequestError, RequestQueue, SessionEvent};
use dspremote_wire::Command;
use parking_lot::Mutex;
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tracing::info;

type SharedConnection = Arc<Mutex<Option<Arc<Connection>>>>;

/// Connection lifecycle and serialized requests for one endpoint.
pub struct SocketSession {
    endpoint: Endpoint,
    timeout: Duration,
    connection: SharedConnection,
    queue: RequestQueue,
    events: Option<mpsc::UnboundedSender<SessionEvent>>,
    observer: Option<ExchangeObserver>,
}

impl SocketSession {
    /// Create a disconnected session. Must be called inside a Tokio runtime.
    pub fn new(endpoint: Endpoint, timeout: Duration) -> Self {
        Self {
            endpoint,
            timeout,
            connection: Arc::new(Mutex::new(None)),
            queue: RequestQueue::new(endpoint),
            events: None,
            observer: None,
        }
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<SessionEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_observer(mut self, observer: ExchangeObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Open the socket. Replaces an existing connection.
    pub async fn connect(&self, url: &str) -> Result<(), RequestError> {
        if self.is_open() {
            self.disconnect();
        }
        let connection = Connection::open(self.endpoint, url, self.events.clone()).await?;
        self.attach(connection);
        Ok(())
    }

    pub(crate) fn attach(&self, connection: Connection) {
        *self.connection.lock() = Some(Arc::new(connection));
        self.emit(SessionEvent::Connected(self.endpoint));
    }

    pub fn is_open(&self) -> bool {
        self.connection
            .lock()
            .as_ref()
            .is_some_and(|connection| connection.is_open())
    }

    /// Close the socket and cancel everything outstanding on it.
    pub fn disconnect(&self) {
        self.queue.cancel_all(&format!("{} socket disconnected", self.endpoint));
        let connection = self.connection.lock().take();
        if let Some(connection) = connection {
            connection.close();
            info!("{} socket disconnected", self.endpoint);
            self.emit(SessionEvent::Disconnected(self.endpoint));
        }
    }

    /// Queue `command` behind any outstanding requests on this endpoint.
    ///
    /// The connection is looked up when the command reaches the head of the
    /// queue, not when it is queued. The observer hears about the outcome even
    /// if the returned future is dropped.
    pub fn request(&self, command: Command) -> impl Future<Output = Result<Value, RequestError>> + Send + 'static {
        let endpoint = self.endpoint;
        let timeout = self.timeout;
        let slot = self.connection.clone();
        let observer = self.observer.clone();
        let name = command.name().to_string();
        let frame = command.to_frame();

        let written = Arc::new(AtomicBool::new(false));
        let marker = written.clone();

        self.queue.enqueue_reported(
            move |cancel| async move {
                let connection = slot.lock().clone();
                match connection {
                    Some(connection) => send_once_marked(&connection, &command, timeout, cancel, &marker).await,
                    None => Err(connection_error(endpoint, "not connected")),
                }
            },
            move |outcome| {
                let Some(observer) = observer else {
                    return;
                };
                let request = if written.load(Ordering::Acquire) { frame } else { String::new() };
                observer(&Exchange {
                    timestamp: SystemTime::now(),
                    endpoint,
                    command: name,
                    request,
                    outcome: outcome.clone(),
                });
            },
        )
    }

    fn emit(&self, event: SessionEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

impl Drop for SocketSession {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.lock().take() {
            connection.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::connection::loopback;
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn test_second_command_written_after_first_reply() {
        let session = SocketSession::new(Endpoint::Control, Duration::from_secs(5));
        let (conn, mut peer) = loopback::pair(Endpoint::Control);
        session.attach(conn);

        let first = session.request(Command::new("GetVolume"));
        let second = session.request(Command::new("GetMute"));

        let server = tokio::spawn(async move {
            let mut log = Vec::new();
            let frame = peer.next_frame().await.unwrap();
            log.push(format!("recv {}", frame));
            // Stall before answering the first command.
            tokio::time::sleep(Duration::from_secs(1)).await;
            // Nothing else may arrive while the first reply is outstanding.
            assert!(peer.outbound_is_empty());
            peer.reply(r#"{"GetVolume": {"result": "Ok", "value": -20.0}}"#);
            log.push("reply GetVolume".to_string());
            let frame = peer.next_frame().await.unwrap();
            log.push(format!("recv {}", frame));
            peer.reply(r#"{"GetMute": {"result": "Ok", "value": false}}"#);
            log
        });

        assert_eq!(first.await.unwrap(), json!(-20.0));
        assert_eq!(second.await.unwrap(), json!(false));
        assert_eq!(
            server.await.unwrap(),
            vec![
                "recv \"GetVolume\"".to_string(),
                "reply GetVolume".to_string(),
                "recv \"GetMute\"".to_string(),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_then_next_command_ignores_late_reply() {
        let session = SocketSession::new(Endpoint::Control, Duration::from_millis(200));
        let (conn, mut peer) = loopback::pair(Endpoint::Control);
        session.attach(conn);

        let first = session.request(Command::new("GetState"));
        let second = session.request(Command::new("GetVolume"));

        let server = tokio::spawn(async move {
            peer.next_frame().await.unwrap();
            let frame = peer.next_frame().await.unwrap();
            assert_eq!(frame, "\"GetVolume\"");
            // Late reply for the timed out command is dropped.
            assert!(!peer.reply(r#"{"GetState": {"result": "Ok", "value": "Running"}}"#));
            assert!(peer.reply(r#"{"GetVolume": {"result": "Ok", "value": -3.0}}"#));
        });

        assert!(first.await.unwrap_err().is_timeout());
        assert_eq!(second.await.unwrap(), json!(-3.0));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_request_without_connection() {
        let session = SocketSession::new(Endpoint::Spectrum, Duration::from_secs(1));
        let err = session.request(Command::new("GetState")).await.unwrap_err();
        assert!(matches!(err, RequestError::Connection { endpoint: Endpoint::Spectrum, .. }));
    }

    #[tokio::test]
    async fn test_disconnect_cancels_and_emits() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = SocketSession::new(Endpoint::Control, Duration::from_secs(30)).with_events(tx);
        let (conn, mut peer) = loopback::pair(Endpoint::Control);
        session.attach(conn);
        assert_eq!(rx.recv().await, Some(SessionEvent::Connected(Endpoint::Control)));

        let running = session.request(Command::new("GetVolume"));
        let queued = session.request(Command::new("GetMute"));
        peer.next_frame().await.unwrap();

        session.disconnect();
        assert!(running.await.unwrap_err().is_cancelled());
        assert!(queued.await.unwrap_err().is_cancelled());
        assert!(!session.is_open());
        assert_eq!(rx.recv().await, Some(SessionEvent::Disconnected(Endpoint::Control)));
    }

    #[tokio::test]
    async fn test_observer_sees_every_settled_request() {
        let seen: Arc<Mutex<Vec<(String, bool)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let session = SocketSession::new(Endpoint::Control, Duration::from_secs(5)).with_observer(
            Arc::new(move |exchange: &Exchange| {
                sink.lock().push((exchange.request.clone(), exchange.outcome.is_ok()));
            }),
        );
        let (conn, mut peer) = loopback::pair(Endpoint::Control);
        session.attach(conn);

        tokio::spawn(async move {
            peer.next_frame().await;
            peer.reply(r#"{"SetMute": {"result": "Error", "value": "not allowed"}}"#);
            peer.next_frame().await;
        });

        let err = session
            .request(Command::with_payload("SetMute", json!(true)))
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::Domain { .. }));
        assert_eq!(*seen.lock(), vec![(r#"{"SetMute":true}"#.to_string(), false)]);
    }

    fn channel_observer() -> (ExchangeObserver, mpsc::UnboundedReceiver<Exchange>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let observer: ExchangeObserver = Arc::new(move |exchange: &Exchange| {
            let _ = tx.send(exchange.clone());
        });
        (observer, rx)
    }

    #[tokio::test]
    async fn test_dropped_request_still_reported() {
        let (observer, mut exchanges) = channel_observer();
        let session = SocketSession::new(Endpoint::Control, Duration::from_secs(5)).with_observer(observer);
        let (conn, mut peer) = loopback::pair(Endpoint::Control);
        session.attach(conn);

        drop(session.request(Command::new("Reload")));
        assert_eq!(peer.next_frame().await.unwrap(), "\"Reload\"");
        assert!(peer.reply(r#"{"Reload": {"result": "Ok", "value": null}}"#));

        let exchange = exchanges.recv().await.unwrap();
        assert_eq!(exchange.command, "Reload");
        assert_eq!(exchange.request, "\"Reload\"");
        assert_eq!(exchange.outcome, Ok(Value::Null));
        assert!(exchanges.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unsent_request_reports_empty_frame() {
        let (observer, mut exchanges) = channel_observer();
        let session = SocketSession::new(Endpoint::Spectrum, Duration::from_secs(1)).with_observer(observer);

        assert!(session.request(Command::new("GetState")).await.is_err());
        let exchange = exchanges.recv().await.unwrap();
        assert_eq!(exchange.command, "GetState");
        assert_eq!(exchange.request, "");
        assert!(matches!(exchange.outcome, Err(RequestError::Connection { .. })));
    }
}
