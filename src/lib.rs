// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! dspremote - remote control for a networked audio DSP engine.
//!
//! The engine exposes a control socket and a spectrum socket. This crate
//! serializes commands over both, and provides the pipeline editing model
//! (normalization, soft-disabled filters, stable step identities) used to
//! change the engine's configuration.

pub mod client;
pub mod config;
pub mod pipeline;
pub mod session;

pub use client::{ConnectParams, DspClient, ProcessingState, SessionEvents};
pub use config::{ClientConfig, ConfigManager};
pub use session::{Endpoint, RequestError, SessionEvent};
