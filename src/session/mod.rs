// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Socket sessions to the DSP engine.
//!
//! Each [`Endpoint`] gets its own [`SocketSession`], which owns one WebSocket
//! [`Connection`] and one [`RequestQueue`]. Commands on the same endpoint are
//! strictly serialized; the two endpoints progress independently.

pub mod connection;
pub mod correlator;
pub mod queue;
pub mod socket;

pub use connection::Connection;
pub use correlator::{send_once, Correlator};
pub use queue::{CancelSignal, RequestQueue};
pub use socket::SocketSession;

use dspremote_wire::WireError;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// One of the two independent sockets to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Control,
    Spectrum,
}

impl Endpoint {
    pub fn name(&self) -> &'static str {
        match self {
            Endpoint::Control => "control",
            Endpoint::Spectrum => "spectrum",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Why a request did not produce a value.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RequestError {
    /// Socket not open, handshake failure or connection lost mid-request.
    #[error("{endpoint} connection error: {message}")]
    Connection { endpoint: Endpoint, message: String },
    /// No matching reply arrived before the deadline.
    #[error("{command} timed out after {} ms", timeout.as_millis())]
    Timeout { command: String, timeout: Duration },
    /// The request was torn down before it settled.
    #[error("Request cancelled: {0}")]
    Cancelled(String),
    /// The reply could not be decoded.
    #[error("{0}")]
    Protocol(String),
    /// The engine answered with an error result.
    #[error("{command} failed: {message}")]
    Domain { command: String, message: String },
}

impl RequestError {
    pub(crate) fn from_wire(command: &str, err: WireError) -> Self {
        match err {
            WireError::Protocol(message) => RequestError::Protocol(message),
            WireError::Domain(message) => RequestError::Domain {
                command: command.to_string(),
                message,
            },
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, RequestError::Timeout { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RequestError::Cancelled(_))
    }
}

/// Lifecycle notifications emitted by sessions.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Connected(Endpoint),
    /// The socket closed without being asked to.
    ConnectionLost { endpoint: Endpoint, message: String },
    Disconnected(Endpoint),
    /// A configuration document was downloaded and normalized.
    ConfigLoaded,
}

/// Record of one settled command, for diagnostics only.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub timestamp: SystemTime,
    pub endpoint: Endpoint,
    pub command: String,
    /// Frame as written on the wire (empty if nothing was written).
    pub request: String,
    pub outcome: Result<Value, RequestError>,
}

/// Callback receiving every settled [`Exchange`].
pub type ExchangeObserver = Arc<dyn Fn(&Exchange) + Send + Sync>;
