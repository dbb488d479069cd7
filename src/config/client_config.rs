// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Client configuration (endpoints, editor behavior).

use crate::session::Endpoint;
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;

/// Connection settings for one endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointConfig {
    /// WebSocket URL, e.g. `ws://127.0.0.1:1234`.
    pub url: String,
    /// Per-command reply deadline in milliseconds.
    pub timeout_ms: u64,
    /// Whether to connect this endpoint at all.
    pub enabled: bool,
}

impl EndpointConfig {
    fn with_url(url: &str) -> Self {
        Self {
            url: url.to_string(),
            timeout_ms: 5000,
            enabled: true,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Endpoint section as written; missing fields come from the endpoint's own defaults.
#[derive(Deserialize)]
struct EndpointSection {
    url: Option<String>,
    timeout_ms: Option<u64>,
    enabled: Option<bool>,
}

impl EndpointSection {
    fn apply(self, base: EndpointConfig) -> EndpointConfig {
        EndpointConfig {
            url: self.url.unwrap_or(base.url),
            timeout_ms: self.timeout_ms.unwrap_or(base.timeout_ms),
            enabled: self.enabled.unwrap_or(base.enabled),
        }
    }
}

fn control_section<'de, D: Deserializer<'de>>(deserializer: D) -> Result<EndpointConfig, D::Error> {
    Ok(EndpointSection::deserialize(deserializer)?.apply(EndpointConfig::default()))
}

fn spectrum_section<'de, D: Deserializer<'de>>(deserializer: D) -> Result<EndpointConfig, D::Error> {
    Ok(EndpointSection::deserialize(deserializer)?.apply(default_spectrum()))
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self::with_url("ws://127.0.0.1:1234")
    }
}

/// Pipeline editor settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    /// Keep disabled filters across runs.
    pub persist_disabled_filters: bool,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            persist_disabled_filters: true,
        }
    }
}

/// Complete client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default, deserialize_with = "control_section")]
    pub control: EndpointConfig,
    #[serde(default = "default_spectrum", deserialize_with = "spectrum_section")]
    pub spectrum: EndpointConfig,
    #[serde(default)]
    pub editor: EditorConfig,
}

fn default_spectrum() -> EndpointConfig {
    EndpointConfig::with_url("ws://127.0.0.1:1235")
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            control: EndpointConfig::default(),
            spectrum: default_spectrum(),
            editor: EditorConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load config from TOML string.
    pub fn from_toml(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    /// Serialize to TOML string.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    pub fn endpoint(&self, endpoint: Endpoint) -> &EndpointConfig {
        match endpoint {
            Endpoint::Control => &self.control,
            Endpoint::Spectrum => &self.spectrum,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.control.url, "ws://127.0.0.1:1234");
        assert_eq!(config.spectrum.url, "ws://127.0.0.1:1235");
        assert_eq!(config.control.timeout(), Duration::from_secs(5));
        assert!(config.editor.persist_disabled_filters);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config = ClientConfig::from_toml(
            r#"
[control]
url = "ws://dsp.local:1234"

[spectrum]
timeout_ms = 250
"#,
        )
        .unwrap();
        assert_eq!(config.control.url, "ws://dsp.local:1234");
        assert_eq!(config.control.timeout_ms, 5000);
        // A partial section keeps its own endpoint's defaults.
        assert_eq!(config.spectrum.url, "ws://127.0.0.1:1235");
        assert_eq!(config.spectrum.timeout_ms, 250);
        assert!(config.spectrum.enabled);
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = ClientConfig::default();
        config.spectrum.enabled = false;
        config.editor.persist_disabled_filters = false;
        let parsed = ClientConfig::from_toml(&config.to_toml().unwrap()).unwrap();
        assert_eq!(parsed, config);
        assert_eq!(parsed.endpoint(Endpoint::Spectrum), &config.spectrum);
    }
}
