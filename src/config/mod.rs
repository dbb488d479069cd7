// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Configuration management for dspremote.

pub mod client_config;
pub mod persistence;

pub use client_config::{ClientConfig, EditorConfig, EndpointConfig};
pub use persistence::{ConfigError, ConfigManager};
