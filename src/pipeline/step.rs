// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Pipeline step normalization.
//!
//! The engine accepts two dialects for a filter step's channels: a single
//! `channel` number or a `channels` array. Everything downstream works on the
//! canonical [`PipelineStep`], which always carries the array form.

use serde_json::{json, Map, Value};

/// A pipeline step in canonical form.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineStep {
    Mixer {
        name: String,
        description: Option<String>,
        bypassed: Option<bool>,
    },
    Filter {
        channels: Vec<usize>,
        names: Vec<String>,
        description: Option<String>,
        bypassed: Option<bool>,
    },
    Processor {
        name: String,
        description: Option<String>,
        bypassed: Option<bool>,
    },
    /// A step type this client does not know. Kept verbatim.
    Unknown {
        kind: Option<String>,
        raw: Value,
        bypassed: Option<bool>,
    },
}

impl PipelineStep {
    pub fn kind(&self) -> &str {
        match self {
            PipelineStep::Mixer { .. } => "Mixer",
            PipelineStep::Filter { .. } => "Filter",
            PipelineStep::Processor { .. } => "Processor",
            PipelineStep::Unknown { kind, .. } => kind.as_deref().unwrap_or("Unknown"),
        }
    }

    pub fn bypassed(&self) -> Option<bool> {
        match self {
            PipelineStep::Mixer { bypassed, .. }
            | PipelineStep::Filter { bypassed, .. }
            | PipelineStep::Processor { bypassed, .. }
            | PipelineStep::Unknown { bypassed, .. } => *bypassed,
        }
    }

    /// Mixer or processor name.
    pub fn name(&self) -> Option<&str> {
        match self {
            PipelineStep::Mixer { name, .. } | PipelineStep::Processor { name, .. } => Some(name.as_str()),
            _ => None,
        }
    }

    pub fn is_filter(&self) -> bool {
        matches!(self, PipelineStep::Filter { .. })
    }

    /// Serialize back to the document shape.
    pub fn to_value(&self) -> Value {
        let mut map = match self {
            PipelineStep::Mixer { name, description, .. } => {
                let mut map = Map::new();
                map.insert("type".into(), json!("Mixer"));
                map.insert("name".into(), json!(name));
                insert_description(&mut map, description);
                map
            }
            PipelineStep::Filter {
                channels,
                names,
                description,
                ..
            } => {
                let mut map = Map::new();
                map.insert("type".into(), json!("Filter"));
                map.insert("channels".into(), json!(channels));
                map.insert("names".into(), json!(names));
                insert_description(&mut map, description);
                map
            }
            PipelineStep::Processor { name, description, .. } => {
                let mut map = Map::new();
                map.insert("type".into(), json!("Processor"));
                map.insert("name".into(), json!(name));
                insert_description(&mut map, description);
                map
            }
            PipelineStep::Unknown { raw, .. } => return raw.clone(),
        };
        if let Some(bypassed) = self.bypassed() {
            map.insert("bypassed".into(), json!(bypassed));
        }
        Value::Object(map)
    }
}

fn insert_description(map: &mut Map<String, Value>, description: &Option<String>) {
    if let Some(description) = description {
        map.insert("description".into(), json!(description));
    }
}

/// Canonicalize one step. Returns `None` for anything that is not an object;
/// callers skip such entries.
pub fn normalize_step(input: &Value) -> Option<PipelineStep> {
    let object = input.as_object()?;
    let kind = object.get("type").and_then(Value::as_str);
    let bypassed = object.get("bypassed").and_then(Value::as_bool);
    let description = object
        .get("description")
        .and_then(Value::as_str)
        .map(str::to_string);
    let name = || {
        object
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    let step = match kind {
        Some("Mixer") => PipelineStep::Mixer {
            name: name(),
            description,
            bypassed,
        },
        Some("Processor") => PipelineStep::Processor {
            name: name(),
            description,
            bypassed,
        },
        Some("Filter") => PipelineStep::Filter {
            channels: channels_of(object),
            names: object
                .get("names")
                .and_then(Value::as_array)
                .map(|names| {
                    names
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            description,
            bypassed,
        },
        other => PipelineStep::Unknown {
            kind: other.map(str::to_string),
            raw: input.clone(),
            bypassed,
        },
    };
    Some(step)
}

/// The `channels` array wins over a singular `channel`.
fn channels_of(object: &Map<String, Value>) -> Vec<usize> {
    if let Some(channels) = object.get("channels").and_then(Value::as_array) {
        return channels
            .iter()
            .filter_map(Value::as_u64)
            .map(|c| c as usize)
            .collect();
    }
    object
        .get("channel")
        .and_then(Value::as_u64)
        .map(|c| vec![c as usize])
        .unwrap_or_default()
}

/// Normalize all steps of a pipeline array, dropping non-object entries.
pub fn normalize_pipeline(pipeline: &Value) -> Vec<PipelineStep> {
    pipeline
        .as_array()
        .map(|steps| steps.iter().filter_map(normalize_step).collect())
        .unwrap_or_default()
}

/// Return a copy of `document` with its `pipeline` rewritten into canonical steps.
pub fn normalize_document(document: &Value) -> Value {
    let mut normalized = document.clone();
    if let Some(pipeline) = document.get("pipeline").filter(|p| p.is_array()) {
        let steps: Vec<Value> = normalize_pipeline(pipeline)
            .iter()
            .map(PipelineStep::to_value)
            .collect();
        normalized["pipeline"] = Value::Array(steps);
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_singular_channel_becomes_array() {
        let step = normalize_step(&json!({"type": "Filter", "channel": 0, "names": ["A"]})).unwrap();
        assert_eq!(
            step,
            PipelineStep::Filter {
                channels: vec![0],
                names: vec!["A".to_string()],
                description: None,
                bypassed: None,
            }
        );
        assert_eq!(
            step.to_value(),
            json!({"type": "Filter", "channels": [0], "names": ["A"]})
        );
    }

    #[test]
    fn test_channel_array_wins() {
        let step = normalize_step(&json!({
            "type": "Filter", "channel": 3, "channels": [1, 0], "names": [], "bypassed": true
        }))
        .unwrap();
        match step {
            PipelineStep::Filter { channels, bypassed, .. } => {
                assert_eq!(channels, vec![1, 0]);
                assert_eq!(bypassed, Some(true));
            }
            other => panic!("unexpected step {:?}", other),
        }
    }

    #[test]
    fn test_mixer_and_processor() {
        let mixer = normalize_step(&json!({"type": "Mixer", "name": "to_stereo"})).unwrap();
        assert_eq!(mixer.name(), Some("to_stereo"));
        assert_eq!(mixer.bypassed(), None);

        let proc = normalize_step(&json!({
            "type": "Processor", "name": "comp", "bypassed": false, "description": "limiter"
        }))
        .unwrap();
        assert_eq!(
            proc.to_value(),
            json!({"type": "Processor", "name": "comp", "bypassed": false, "description": "limiter"})
        );
    }

    #[test]
    fn test_non_object_is_skipped() {
        assert_eq!(normalize_step(&json!(null)), None);
        assert_eq!(normalize_step(&json!("Filter")), None);
        assert_eq!(normalize_step(&json!([1, 2])), None);
    }

    #[test]
    fn test_unknown_kept_verbatim() {
        let raw = json!({"type": "Splitter", "ways": 3});
        let step = normalize_step(&raw).unwrap();
        assert_eq!(step.kind(), "Splitter");
        assert_eq!(step.to_value(), raw);
    }

    #[test]
    fn test_normalize_document() {
        let doc = json!({
            "devices": {"samplerate": 48000},
            "pipeline": [
                {"type": "Filter", "channel": 1, "names": ["hp"]},
                null,
                {"type": "Mixer", "name": "mono"}
            ]
        });
        let normalized = normalize_document(&doc);
        assert_eq!(normalized["devices"], doc["devices"]);
        assert_eq!(
            normalized["pipeline"],
            json!([
                {"type": "Filter", "channels": [1], "names": ["hp"]},
                {"type": "Mixer", "name": "mono"}
            ])
        );
    }
}
