// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Shared wire types for the dspremote control protocol.
//!
//! The DSP engine speaks JSON over WebSocket. An outbound frame is either a
//! bare command name (`"GetVolume"`) or a single-key object carrying the
//! payload (`{"SetVolume": -12.0}`). Every reply echoes the command name as
//! its only key: `{"GetVolume": {"result": "Ok", "value": -12.0}}`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Command names understood by the engine.
pub mod commands {
    pub const GET_VERSION: &str = "GetVersion";
    pub const GET_STATE: &str = "GetState";
    pub const GET_STOP_REASON: &str = "GetStopReason";
    pub const GET_CONFIG_JSON: &str = "GetConfigJson";
    pub const SET_CONFIG_JSON: &str = "SetConfigJson";
    pub const GET_CONFIG_FILE_PATH: &str = "GetConfigFilePath";
    pub const SET_CONFIG_FILE_PATH: &str = "SetConfigFilePath";
    pub const RELOAD: &str = "Reload";
    pub const STOP: &str = "Stop";
    pub const GET_VOLUME: &str = "GetVolume";
    pub const SET_VOLUME: &str = "SetVolume";
    pub const ADJUST_VOLUME: &str = "AdjustVolume";
    pub const GET_MUTE: &str = "GetMute";
    pub const SET_MUTE: &str = "SetMute";
    pub const TOGGLE_MUTE: &str = "ToggleMute";
    pub const GET_CAPTURE_RATE: &str = "GetCaptureRate";
    pub const GET_PROCESSING_LOAD: &str = "GetProcessingLoad";
    pub const GET_CLIPPED_SAMPLES: &str = "GetClippedSamples";
    pub const RESET_CLIPPED_SAMPLES: &str = "ResetClippedSamples";
    pub const GET_SUPPORTED_DEVICE_TYPES: &str = "GetSupportedDeviceTypes";
    pub const GET_AVAILABLE_CAPTURE_DEVICES: &str = "GetAvailableCaptureDevices";
    pub const GET_AVAILABLE_PLAYBACK_DEVICES: &str = "GetAvailablePlaybackDevices";
    pub const GET_PLAYBACK_SIGNAL_PEAK: &str = "GetPlaybackSignalPeak";
    pub const GET_PLAYBACK_SIGNAL_RMS: &str = "GetPlaybackSignalRms";
}

/// Errors produced while encoding commands or decoding replies.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WireError {
    /// The frame or reply envelope did not have the expected shape.
    #[error("Protocol error: {0}")]
    Protocol(String),
    /// The engine answered with an `Error` result.
    #[error("{0}")]
    Domain(String),
}

/// A command addressed to the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    name: String,
    payload: Option<Value>,
}

impl Command {
    /// A command without payload, sent as a bare name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload: None,
        }
    }

    /// A command sent as `{name: payload}`.
    pub fn with_payload(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload: Some(payload),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }

    /// Serialize to the text frame written on the socket.
    pub fn to_frame(&self) -> String {
        let value = match &self.payload {
            None => Value::String(self.name.clone()),
            Some(payload) => {
                let mut map = Map::new();
                map.insert(self.name.clone(), payload.clone());
                Value::Object(map)
            }
        };
        value.to_string()
    }

    /// Whether the success value is itself a serialized document.
    pub fn has_nested_reply(&self) -> bool {
        has_nested_reply(&self.name)
    }
}

/// Commands whose `value` is a JSON document encoded as a string.
pub fn has_nested_reply(command: &str) -> bool {
    command == commands::GET_CONFIG_JSON
}

/// Outcome flag of a reply envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplyStatus {
    Ok,
    Error,
}

/// Split an inbound frame into its command key and reply body.
///
/// Frames must be a JSON object with exactly one key.
pub fn split_frame(text: &str) -> Result<(String, Value), WireError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| WireError::Protocol(format!("invalid JSON frame: {}", e)))?;
    let Value::Object(map) = value else {
        return Err(WireError::Protocol(format!("frame is not an object: {}", text)));
    };
    if map.len() != 1 {
        return Err(WireError::Protocol(format!(
            "frame must have exactly one key, found {}",
            map.len()
        )));
    }
    match map.into_iter().next() {
        Some((key, body)) => Ok((key, body)),
        None => Err(WireError::Protocol("empty frame".to_string())),
    }
}

/// Decode the reply body for `command` into its success value.
pub fn decode_reply(command: &str, body: &Value) -> Result<Value, WireError> {
    let status = body
        .get("result")
        .ok_or_else(|| WireError::Protocol(format!("{} reply has no result field", command)))?;
    let status: ReplyStatus = serde_json::from_value(status.clone()).map_err(|_| {
        WireError::Protocol(format!("{} reply has unknown result {}", command, status))
    })?;

    match status {
        ReplyStatus::Ok => {
            let value = body.get("value").cloned().unwrap_or(Value::Null);
            if has_nested_reply(command) {
                decode_nested(command, &value)
            } else {
                Ok(value)
            }
        }
        ReplyStatus::Error => Err(WireError::Domain(error_message(command, body))),
    }
}

fn decode_nested(command: &str, value: &Value) -> Result<Value, WireError> {
    match value {
        Value::String(text) => serde_json::from_str(text).map_err(|e| {
            WireError::Protocol(format!("{} returned an undecodable document: {}", command, e))
        }),
        other => Err(WireError::Protocol(format!(
            "{} returned {} instead of a serialized document",
            command, other
        ))),
    }
}

/// Resolve a readable message from an error reply.
///
/// Tries `value`, then `error`, then `message`, and finally the whole
/// envelope, so the result is never empty.
pub fn error_message(command: &str, body: &Value) -> String {
    for field in ["value", "error", "message"] {
        if let Some(text) = body.get(field).and_then(describe) {
            return text;
        }
    }
    let mut envelope = Map::new();
    envelope.insert(command.to_string(), body.clone());
    Value::Object(envelope).to_string()
}

fn describe(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
