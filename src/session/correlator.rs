// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Reply correlation and single-shot command sending.
//!
//! Replies carry no request id, only the command name. The correlator keeps
//! one reply slot per in-flight command name; a slot is owned by exactly one
//! [`PendingReply`] and removed when that guard is dropped. A late reply to a
//! request that already timed out finds no slot and is discarded instead of
//! being handed to whatever request runs next.

use super::connection::connection_error;
use super::{CancelSignal, Connection, Endpoint, RequestError};
use dspremote_wire::{decode_reply, split_frame, Command};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

struct Slot {
    ticket: u64,
    tx: oneshot::Sender<Value>,
}

/// Correlation table for one connection.
pub struct Correlator {
    endpoint: Endpoint,
    slots: Mutex<HashMap<String, Slot>>,
    next_ticket: AtomicU64,
    closed: AtomicBool,
}

impl Correlator {
    pub fn new(endpoint: Endpoint) -> Arc<Self> {
        Arc::new(Self {
            endpoint,
            slots: Mutex::new(HashMap::new()),
            next_ticket: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        })
    }

    /// Claim the reply slot for `command`.
    pub fn register(self: &Arc<Self>, command: &str) -> Result<PendingReply, RequestError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(connection_error(self.endpoint, "connection closed"));
        }

        let mut slots = self.slots.lock();
        if slots.contains_key(command) {
            return Err(RequestError::Protocol(format!(
                "{} is already awaiting a reply on {}",
                command, self.endpoint
            )));
        }

        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        slots.insert(command.to_string(), Slot { ticket, tx });

        Ok(PendingReply {
            correlator: Arc::clone(self),
            command: command.to_string(),
            ticket,
            rx,
        })
    }

    /// Route an inbound text frame. Returns whether a waiting request took it.
    pub fn dispatch(&self, text: &str) -> bool {
        let (command, body) = match split_frame(text) {
            Ok(parts) => parts,
            Err(e) => {
                warn!("Discarding undecodable frame on {}: {}", self.endpoint, e);
                return false;
            }
        };

        let slot = self.slots.lock().remove(&command);
        match slot {
            Some(slot) => slot.tx.send(body).is_ok(),
            None => {
                debug!("Discarding {} reply on {} with no pending request", command, self.endpoint);
                false
            }
        }
    }

    /// Fail every waiting request and refuse new registrations.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.slots.lock().clear();
    }

    pub fn pending_count(&self) -> usize {
        self.slots.lock().len()
    }

    fn release(&self, command: &str, ticket: u64) {
        let mut slots = self.slots.lock();
        if slots.get(command).is_some_and(|slot| slot.ticket == ticket) {
            slots.remove(command);
        }
    }
}

/// Owner of one reply slot. Dropping it frees the slot.
pub struct PendingReply {
    correlator: Arc<Correlator>,
    command: String,
    ticket: u64,
    rx: oneshot::Receiver<Value>,
}

impl PendingReply {
    /// Wait for the reply body.
    pub async fn recv(&mut self) -> Result<Value, RequestError> {
        (&mut self.rx).await.map_err(|_| {
            connection_error(
                self.correlator.endpoint,
                format!("connection closed before {} was answered", self.command),
            )
        })
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        self.correlator.release(&self.command, self.ticket);
    }
}

/// Send one command and wait for its reply.
///
/// Settles with whichever comes first: the matching reply, the timeout, or
/// cancellation. The reply slot and the timer are torn down on every path.
pub async fn send_once(
    connection: &Connection,
    command: &Command,
    timeout: Duration,
    cancel: CancelSignal,
) -> Result<Value, RequestError> {
    send_once_marked(connection, command, timeout, cancel, &AtomicBool::new(false)).await
}

/// [`send_once`], setting `written` once the frame has been handed to the socket.
pub(crate) async fn send_once_marked(
    connection: &Connection,
    command: &Command,
    timeout: Duration,
    mut cancel: CancelSignal,
    written: &AtomicBool,
) -> Result<Value, RequestError> {
    if !connection.is_open() {
        return Err(connection_error(connection.endpoint(), "socket is not open"));
    }

    let mut reply = connection.correlator().register(command.name())?;
    connection.send_text(command.to_frame())?;
    written.store(true, Ordering::Release);
    debug!("Sent {} on {}", command.name(), connection.endpoint());

    let body = tokio::select! {
        biased;
        reason = cancel.cancelled() => return Err(RequestError::Cancelled(reason)),
        body = reply.recv() => body?,
        _ = tokio::time::sleep(timeout) => {
            warn!(
                "{} on {} timed out after {} ms",
                command.name(),
                connection.endpoint(),
                timeout.as_millis()
            );
            return Err(RequestError::Timeout {
                command: command.name().to_string(),
                timeout,
            });
        }
    };

    decode_reply(command.name(), &body).map_err(|e| RequestError::from_wire(command.name(), e))
}
