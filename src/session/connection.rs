// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! WebSocket connection with a dedicated I/O thread.
//!
//! The socket is a blocking `tungstenite` stream polled with a short read
//! timeout. Outbound frames arrive over an unbounded channel, inbound text
//! frames are handed to the connection's [`Correlator`].

use super::{Correlator, Endpoint, RequestError, SessionEvent};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::{debug, info, warn};
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

/// How long a read may block before the I/O thread checks for outbound frames.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

enum Outbound {
    Text(String),
    Close,
}

/// An open duplex connection to one endpoint.
pub struct Connection {
    endpoint: Endpoint,
    outbound: mpsc::UnboundedSender<Outbound>,
    correlator: Arc<Correlator>,
    open: Arc<AtomicBool>,
}

impl Connection {
    /// Open a WebSocket to `url`.
    ///
    /// Resolves once the handshake completes. Unexpected closure later on is
    /// reported through `events` as [`SessionEvent::ConnectionLost`].
    pub async fn open(
        endpoint: Endpoint,
        url: &str,
        events: Option<mpsc::UnboundedSender<SessionEvent>>,
    ) -> Result<Self, RequestError> {
        info!("Connecting {} socket to {}", endpoint, url);

        let target = url.to_string();
        let (socket, _response) = tokio::task::spawn_blocking(move || tungstenite::connect(target))
            .await
            .map_err(|e| connection_error(endpoint, format!("handshake task failed: {}", e)))?
            .map_err(|e| connection_error(endpoint, format!("failed to connect to {}: {}", url, e)))?;

        if let MaybeTlsStream::Plain(stream) = socket.get_ref() {
            stream
                .set_read_timeout(Some(POLL_INTERVAL))
                .map_err(|e| connection_error(endpoint, format!("failed to configure socket: {}", e)))?;
        }

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let correlator = Correlator::new(endpoint);
        let open = Arc::new(AtomicBool::new(true));

        let io = IoLoop {
            endpoint,
            socket,
            outbound: outbound_rx,
            correlator: correlator.clone(),
            open: open.clone(),
            events,
        };
        std::thread::Builder::new()
            .name(format!("dspremote-{}", endpoint))
            .spawn(move || io.run())
            .map_err(|e| connection_error(endpoint, format!("failed to spawn I/O thread: {}", e)))?;

        info!("{} socket connected", endpoint);
        Ok(Self {
            endpoint,
            outbound: outbound_tx,
            correlator,
            open,
        })
    }

    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub fn correlator(&self) -> &Arc<Correlator> {
        &self.correlator
    }

    /// Queue a text frame for writing.
    pub fn send_text(&self, text: String) -> Result<(), RequestError> {
        if !self.is_open() {
            return Err(connection_error(self.endpoint, "socket is not open"));
        }
        self.outbound
            .send(Outbound::Text(text))
            .map_err(|_| connection_error(self.endpoint, "socket writer has stopped"))
    }

    /// Close the socket. Outstanding reply slots fail immediately.
    pub fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            debug!("Closing {} socket", self.endpoint);
        }
        self.correlator.close();
        let _ = self.outbound.send(Outbound::Close);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

pub(crate) fn connection_error(endpoint: Endpoint, message: impl Into<String>) -> RequestError {
    RequestError::Connection {
        endpoint,
        message: message.into(),
    }
}

struct IoLoop {
    endpoint: Endpoint,
    socket: WebSocket<MaybeTlsStream<TcpStream>>,
    outbound: mpsc::UnboundedReceiver<Outbound>,
    correlator: Arc<Correlator>,
    open: Arc<AtomicBool>,
    events: Option<mpsc::UnboundedSender<SessionEvent>>,
}

impl IoLoop {
    fn run(mut self) {
        let lost = self.pump();

        self.open.store(false, Ordering::Release);
        self.correlator.close();

        match lost {
            Some(message) => {
                warn!("{} socket closed: {}", self.endpoint, message);
                if let Some(events) = &self.events {
                    let _ = events.send(SessionEvent::ConnectionLost {
                        endpoint: self.endpoint,
                        message,
                    });
                }
            }
            None => debug!("{} socket I/O thread finished", self.endpoint),
        }
    }

    /// Returns `Some(reason)` when the socket went away on its own.
    fn pump(&mut self) -> Option<String> {
        loop {
            loop {
                match self.outbound.try_recv() {
                    Ok(Outbound::Text(text)) => {
                        if let Err(e) = self.socket.send(Message::text(text)) {
                            return Some(format!("write failed: {}", e));
                        }
                    }
                    Ok(Outbound::Close) | Err(TryRecvError::Disconnected) => {
                        let _ = self.socket.close(None);
                        let _ = self.socket.flush();
                        return None;
                    }
                    Err(TryRecvError::Empty) => break,
                }
            }

            match self.socket.read() {
                Ok(Message::Text(text)) => {
                    self.correlator.dispatch(text.as_str());
                }
                Ok(Message::Close(frame)) => {
                    let reason = frame
                        .map(|f| f.reason.as_str().to_string())
                        .filter(|r| !r.is_empty())
                        .unwrap_or_else(|| "closed by server".to_string());
                    return Some(reason);
                }
                Ok(Message::Binary(data)) => {
                    debug!("Ignoring {} byte binary frame on {}", data.len(), self.endpoint);
                }
                Ok(_) => {}
                Err(tungstenite::Error::Io(e))
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                    ) => {}
                Err(tungstenite::Error::ConnectionClosed) => {
                    return Some("connection closed".to_string());
                }
                Err(e) => return Some(e.to_string()),
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod loopback {
    //! In-process stand-in for a server, driven by tests.

    use super::*;

    /// Server side of a loopback connection.
    pub struct LoopbackPeer {
        outbound: mpsc::UnboundedReceiver<Outbound>,
        correlator: Arc<Correlator>,
        open: Arc<AtomicBool>,
    }

    impl LoopbackPeer {
        /// Next frame written by the client, or `None` once it closes.
        pub async fn next_frame(&mut self) -> Option<String> {
            match self.outbound.recv().await {
                Some(Outbound::Text(text)) => Some(text),
                Some(Outbound::Close) | None => None,
            }
        }

        pub fn outbound_is_empty(&self) -> bool {
            self.outbound.is_empty()
        }

        /// Deliver a frame as if the server sent it.
        pub fn reply(&self, text: &str) -> bool {
            self.correlator.dispatch(text)
        }

        /// Simulate the server dropping the socket.
        pub fn hang_up(&self) {
            self.open.store(false, Ordering::Release);
            self.correlator.close();
        }
    }

    pub fn pair(endpoint: Endpoint) -> (Connection, LoopbackPeer) {
        let (tx, rx) = mpsc::unbounded_channel();
        let correlator = Correlator::new(endpoint);
        let open = Arc::new(AtomicBool::new(true));
        let connection = Connection {
            endpoint,
            outbound: tx,
            correlator: correlator.clone(),
            open: open.clone(),
        };
        let peer = LoopbackPeer {
            outbound: rx,
            correlator,
            open,
        };
        (connection, peer)
    }
}
