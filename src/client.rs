// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Typed client for the DSP engine.
//!
//! [`DspClient`] owns one [`SocketSession`] per endpoint and wraps the
//! engine's command set in typed async methods. On connect it downloads the
//! active configuration, normalizes its pipeline and keeps it cached.

use crate::config::ClientConfig;
use crate::pipeline::normalize_document;
use crate::session::{Endpoint, ExchangeObserver, RequestError, SessionEvent, SocketSession};
use dspremote_wire::{commands, Command};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info};

/// Lifecycle events of a [`DspClient`], as a stream.
pub type SessionEvents = UnboundedReceiverStream<SessionEvent>;

/// Where to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    pub control_url: String,
    /// Spectrum socket URL; `None` leaves the spectrum socket closed.
    pub spectrum_url: Option<String>,
}

impl ConnectParams {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            control_url: config.control.url.clone(),
            spectrum_url: config.spectrum.enabled.then(|| config.spectrum.url.clone()),
        }
    }
}

/// Processing state reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum ProcessingState {
    Running,
    Paused,
    Inactive,
    Starting,
    Stalled,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for ProcessingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Why processing last stopped.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub enum StopReason {
    None,
    Done,
    CaptureError(String),
    PlaybackError(String),
    UnknownError(String),
    CaptureFormatChange(u64),
}

/// Backend names the engine was built with.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "(Vec<String>, Vec<String>)")]
pub struct DeviceTypes {
    pub playback: Vec<String>,
    pub capture: Vec<String>,
}

impl From<(Vec<String>, Vec<String>)> for DeviceTypes {
    fn from((playback, capture): (Vec<String>, Vec<String>)) -> Self {
        Self { playback, capture }
    }
}

/// One entry of a device enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "(String, Option<String>)")]
pub struct AudioDevice {
    pub name: String,
    pub description: Option<String>,
}

impl From<(String, Option<String>)> for AudioDevice {
    fn from((name, description): (String, Option<String>)) -> Self {
        Self { name, description }
    }
}

/// Client for the DSP engine's control and spectrum sockets.
pub struct DspClient {
    control: SocketSession,
    spectrum: SocketSession,
    config: Mutex<Option<Value>>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl DspClient {
    /// Create a disconnected client. Must be called inside a Tokio runtime.
    pub fn new(config: &ClientConfig) -> (Self, SessionEvents) {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = Self {
            control: session(config, Endpoint::Control, &tx),
            spectrum: session(config, Endpoint::Spectrum, &tx),
            config: Mutex::new(None),
            events: tx,
        };
        (client, UnboundedReceiverStream::new(rx))
    }

    /// Report every settled command on both sockets to `observer`.
    pub fn with_observer(mut self, observer: ExchangeObserver) -> Self {
        self.control = self.control.with_observer(observer.clone());
        self.spectrum = self.spectrum.with_observer(observer);
        self
    }

    /// Open the sockets and download the active configuration.
    ///
    /// Returns the normalized configuration document.
    pub async fn connect(&self, params: &ConnectParams) -> Result<Value, RequestError> {
        info!("Connecting to DSP engine at {}", params.control_url);
        self.control.connect(&params.control_url).await?;

        if let Some(url) = &params.spectrum_url {
            if let Err(e) = self.spectrum.connect(url).await {
                self.control.disconnect();
                return Err(e);
            }
        }

        match self.refresh_config().await {
            Ok(document) => {
                info!("Connected to DSP engine");
                Ok(document)
            }
            Err(e) => {
                self.disconnect();
                Err(e)
            }
        }
    }

    /// Close both sockets, cancelling everything outstanding.
    pub fn disconnect(&self) {
        self.control.disconnect();
        self.spectrum.disconnect();
    }

    pub fn is_connected(&self) -> bool {
        self.control.is_open()
    }

    pub fn is_spectrum_connected(&self) -> bool {
        self.spectrum.is_open()
    }

    /// Last configuration document downloaded or uploaded.
    pub fn cached_config(&self) -> Option<Value> {
        self.config.lock().clone()
    }

    // ==================== Configuration ====================

    /// Download the active configuration, normalize it and cache it.
    pub async fn refresh_config(&self) -> Result<Value, RequestError> {
        let raw = self.get_config().await?;
        let document = normalize_document(&raw);
        *self.config.lock() = Some(document.clone());
        let _ = self.events.send(SessionEvent::ConfigLoaded);
        Ok(document)
    }

    /// Active configuration as the engine reports it.
    pub async fn get_config(&self) -> Result<Value, RequestError> {
        self.control_request(Command::new(commands::GET_CONFIG_JSON)).await
    }

    /// Normalize and upload `document`, then cache it.
    pub async fn set_config(&self, document: &Value) -> Result<(), RequestError> {
        let document = normalize_document(document);
        let text = serde_json::to_string(&document)
            .map_err(|e| RequestError::Protocol(format!("Failed to serialize config: {}", e)))?;
        debug!("Uploading config ({} bytes)", text.len());
        self.control_unit(Command::with_payload(commands::SET_CONFIG_JSON, json!(text)))
            .await?;
        *self.config.lock() = Some(document);
        Ok(())
    }

    pub async fn get_config_file_path(&self) -> Result<Option<String>, RequestError> {
        self.control_request(Command::new(commands::GET_CONFIG_FILE_PATH)).await
    }

    pub async fn set_config_file_path(&self, path: &str) -> Result<(), RequestError> {
        debug!("Setting config file path to {}", path);
        self.control_unit(Command::with_payload(commands::SET_CONFIG_FILE_PATH, json!(path)))
            .await
    }

    /// Reload the configuration file.
    pub async fn reload(&self) -> Result<(), RequestError> {
        self.control_unit(Command::new(commands::RELOAD)).await
    }

    /// Stop processing.
    pub async fn stop(&self) -> Result<(), RequestError> {
        self.control_unit(Command::new(commands::STOP)).await
    }

    // ==================== Status ====================

    pub async fn version(&self) -> Result<String, RequestError> {
        self.control_request(Command::new(commands::GET_VERSION)).await
    }

    pub async fn state(&self) -> Result<ProcessingState, RequestError> {
        self.control_request(Command::new(commands::GET_STATE)).await
    }

    pub async fn stop_reason(&self) -> Result<StopReason, RequestError> {
        self.control_request(Command::new(commands::GET_STOP_REASON)).await
    }

    /// Measured capture sample rate in Hz.
    pub async fn capture_rate(&self) -> Result<u64, RequestError> {
        self.control_request(Command::new(commands::GET_CAPTURE_RATE)).await
    }

    /// Processing load in percent.
    pub async fn processing_load(&self) -> Result<f64, RequestError> {
        self.control_request(Command::new(commands::GET_PROCESSING_LOAD)).await
    }

    pub async fn clipped_samples(&self) -> Result<u64, RequestError> {
        self.control_request(Command::new(commands::GET_CLIPPED_SAMPLES)).await
    }

    pub async fn reset_clipped_samples(&self) -> Result<(), RequestError> {
        self.control_unit(Command::new(commands::RESET_CLIPPED_SAMPLES)).await
    }

    // ==================== Volume/Mute ====================

    /// Main volume in dB.
    pub async fn volume(&self) -> Result<f64, RequestError> {
        self.control_request(Command::new(commands::GET_VOLUME)).await
    }

    pub async fn set_volume(&self, volume_db: f64) -> Result<(), RequestError> {
        debug!("Setting volume to {} dB", volume_db);
        self.control_unit(Command::with_payload(commands::SET_VOLUME, json!(volume_db)))
            .await
    }

    /// Change the volume by `delta_db`. Returns the new volume.
    pub async fn adjust_volume(&self, delta_db: f64) -> Result<f64, RequestError> {
        debug!("Adjusting volume by {} dB", delta_db);
        self.control_request(Command::with_payload(commands::ADJUST_VOLUME, json!(delta_db)))
            .await
    }

    pub async fn mute(&self) -> Result<bool, RequestError> {
        self.control_request(Command::new(commands::GET_MUTE)).await
    }

    pub async fn set_mute(&self, muted: bool) -> Result<(), RequestError> {
        debug!("Setting mute to {}", muted);
        self.control_unit(Command::with_payload(commands::SET_MUTE, json!(muted)))
            .await
    }

    /// Flip the mute state. Returns the value the engine reports.
    pub async fn toggle_mute(&self) -> Result<bool, RequestError> {
        self.control_request(Command::new(commands::TOGGLE_MUTE)).await
    }

    // ==================== Devices ====================

    pub async fn supported_device_types(&self) -> Result<DeviceTypes, RequestError> {
        self.control_request(Command::new(commands::GET_SUPPORTED_DEVICE_TYPES))
            .await
    }

    pub async fn capture_devices(&self, backend: &str) -> Result<Vec<AudioDevice>, RequestError> {
        self.control_request(Command::with_payload(
            commands::GET_AVAILABLE_CAPTURE_DEVICES,
            json!(backend),
        ))
        .await
    }

    pub async fn playback_devices(&self, backend: &str) -> Result<Vec<AudioDevice>, RequestError> {
        self.control_request(Command::with_payload(
            commands::GET_AVAILABLE_PLAYBACK_DEVICES,
            json!(backend),
        ))
        .await
    }

    // ==================== Spectrum ====================

    /// Per-channel playback peak in dB.
    pub async fn playback_peak(&self) -> Result<Vec<f64>, RequestError> {
        self.spectrum_request(Command::new(commands::GET_PLAYBACK_SIGNAL_PEAK))
            .await
    }

    /// Per-channel playback RMS in dB.
    pub async fn playback_rms(&self) -> Result<Vec<f64>, RequestError> {
        self.spectrum_request(Command::new(commands::GET_PLAYBACK_SIGNAL_RMS))
            .await
    }

    /// Processing state as seen through the spectrum socket.
    pub async fn spectrum_state(&self) -> Result<ProcessingState, RequestError> {
        self.spectrum_request(Command::new(commands::GET_STATE)).await
    }

    // ==================== Helpers ====================

    async fn control_request<T: DeserializeOwned>(&self, command: Command) -> Result<T, RequestError> {
        request_typed(&self.control, command).await
    }

    async fn control_unit(&self, command: Command) -> Result<(), RequestError> {
        debug!("Sending {}", command.name());
        self.control.request(command).await.map(|_| ())
    }

    async fn spectrum_request<T: DeserializeOwned>(&self, command: Command) -> Result<T, RequestError> {
        request_typed(&self.spectrum, command).await
    }
}

fn session(config: &ClientConfig, endpoint: Endpoint, events: &mpsc::UnboundedSender<SessionEvent>) -> SocketSession {
    SocketSession::new(endpoint, config.endpoint(endpoint).timeout()).with_events(events.clone())
}

async fn request_typed<T: DeserializeOwned>(session: &SocketSession, command: Command) -> Result<T, RequestError> {
    let name = command.name().to_string();
    debug!("Sending {} on {}", name, session.endpoint());
    let value = session.request(command).await?;
    decode(&name, value)
}

fn decode<T: DeserializeOwned>(command: &str, value: Value) -> Result<T, RequestError> {
    serde_json::from_value(value)
        .map_err(|e| RequestError::Protocol(format!("{} returned an unexpected value: {}", command, e)))
}
