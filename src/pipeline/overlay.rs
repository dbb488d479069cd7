// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Disabled-filter overlay.
//!
//! A filter can be switched off inside one filter step without deleting it:
//! its name leaves the step's active `names` list, and the overlay remembers
//! where it was so that enabling it again puts it back in the same place.
//! Locations are keyed by [`StepKey`], which embeds the step's sorted channel
//! set and its position in the pipeline.

use super::PipelineStep;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, warn};

/// Current on-disk format version.
pub const OVERLAY_VERSION: u64 = 2;

/// Identifies a filter step by channel set and pipeline position.
///
/// Text form: `Filter:ch<sorted,comma-joined-channels>:idx<index>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StepKey {
    channels: Vec<usize>,
    index: usize,
}

impl StepKey {
    pub fn new(channels: &[usize], index: usize) -> Self {
        let mut channels = channels.to_vec();
        channels.sort_unstable();
        channels.dedup();
        Self { channels, index }
    }

    /// Key for a filter step at `index`. Other step kinds have none.
    pub fn for_step(step: &PipelineStep, index: usize) -> Option<Self> {
        match step {
            PipelineStep::Filter { channels, .. } => Some(Self::new(channels, index)),
            _ => None,
        }
    }

    pub fn channels(&self) -> &[usize] {
        &self.channels
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Same channel set at another position.
    pub fn with_index(&self, index: usize) -> Self {
        Self {
            channels: self.channels.clone(),
            index,
        }
    }
}

impl fmt::Display for StepKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let channels: Vec<String> = self.channels.iter().map(|c| c.to_string()).collect();
        write!(f, "Filter:ch{}:idx{}", channels.join(","), self.index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid step key: {0}")]
pub struct StepKeyParseError(String);

impl FromStr for StepKey {
    type Err = StepKeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || StepKeyParseError(s.to_string());
        let rest = s.strip_prefix("Filter:ch").ok_or_else(invalid)?;
        let (channels, index) = rest.rsplit_once(":idx").ok_or_else(invalid)?;
        let index = index.parse().map_err(|_| invalid())?;
        let channels = if channels.is_empty() {
            Vec::new()
        } else {
            channels
                .split(',')
                .map(|c| c.trim().parse::<usize>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|_| invalid())?
        };
        Ok(Self::new(&channels, index))
    }
}

impl Serialize for StepKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for StepKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Where a disabled filter used to sit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisabledLocation {
    pub step_key: StepKey,
    /// Position in the step's full (enabled + disabled) filter list.
    pub index: usize,
    pub filter_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct OverlayDocument {
    version: u64,
    disabled: BTreeMap<String, Vec<DisabledLocation>>,
}

/// One filter in the reconstructed view of a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterSlot {
    pub name: String,
    pub enabled: bool,
}

/// Disabled filters for an editing session, optionally persisted to a file.
#[derive(Debug, Default)]
pub struct DisabledFilterOverlay {
    disabled: BTreeMap<String, Vec<DisabledLocation>>,
    store: Option<PathBuf>,
}

impl DisabledFilterOverlay {
    /// An empty overlay kept in memory only.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from `path` and write back there after every change.
    ///
    /// A missing, unreadable or unrecognized file yields an empty overlay.
    pub fn with_store(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let disabled = match fs::read_to_string(&path) {
            Ok(content) => match Self::from_json(&content) {
                Ok(overlay) => overlay.disabled,
                Err(e) => {
                    warn!("Ignoring unreadable overlay {}: {}", path.display(), e);
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                warn!("Failed to read overlay {}: {}", path.display(), e);
                BTreeMap::new()
            }
        };
        Self {
            disabled,
            store: Some(path),
        }
    }

    pub fn store_path(&self) -> Option<&Path> {
        self.store.as_deref()
    }

    /// Parse a persisted overlay, migrating older formats.
    ///
    /// Version 1 (or no version) stored one location per filter; each is
    /// wrapped in a one-element list. Unknown versions give an empty overlay.
    pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(content)?;
        let version = value.get("version").and_then(Value::as_u64);

        let disabled = match version {
            Some(OVERLAY_VERSION) => serde_json::from_value::<OverlayDocument>(value)?.disabled,
            Some(1) | None => migrate_v1(&value)?,
            Some(other) => {
                warn!("Unrecognized overlay version {}, starting empty", other);
                BTreeMap::new()
            }
        };

        Ok(Self {
            disabled,
            store: None,
        })
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&OverlayDocument {
            version: OVERLAY_VERSION,
            disabled: self.disabled.clone(),
        })
    }

    /// Record `filter_name` as disabled in `step_key`, where it currently
    /// sits at `current_index` of the active list. Returns the original index.
    ///
    /// Disabling again in the same step only updates the recorded index.
    pub fn disable(&mut self, filter_name: &str, step_key: &StepKey, current_index: usize) -> usize {
        let mut original = current_index;
        for location in self.locations_for_step(step_key) {
            if location.filter_name == filter_name {
                continue;
            }
            if location.index <= original {
                original += 1;
            }
        }

        let locations = self.disabled.entry(filter_name.to_string()).or_default();
        match locations.iter_mut().find(|l| &l.step_key == step_key) {
            Some(existing) => existing.index = original,
            None => locations.push(DisabledLocation {
                step_key: step_key.clone(),
                index: original,
                filter_name: filter_name.to_string(),
            }),
        }
        debug!("Disabled {} in {} at {}", filter_name, step_key, original);

        self.persist();
        original
    }

    /// Forget the location of `filter_name` in `step_key`.
    pub fn enable(&mut self, filter_name: &str, step_key: &StepKey) -> Option<DisabledLocation> {
        let locations = self.disabled.get_mut(filter_name)?;
        let position = locations.iter().position(|l| &l.step_key == step_key)?;
        let removed = locations.remove(position);
        if locations.is_empty() {
            self.disabled.remove(filter_name);
        }
        debug!("Enabled {} in {}", filter_name, step_key);

        self.persist();
        Some(removed)
    }

    /// Forget every location of `filter_name`, in all steps.
    pub fn enable_everywhere(&mut self, filter_name: &str) -> Vec<DisabledLocation> {
        let removed = self.disabled.remove(filter_name).unwrap_or_default();
        if !removed.is_empty() {
            self.persist();
        }
        removed
    }

    /// All locations recorded for `step_key`, by original index.
    pub fn locations_for_step(&self, step_key: &StepKey) -> Vec<DisabledLocation> {
        let mut locations: Vec<DisabledLocation> = self
            .disabled
            .values()
            .flatten()
            .filter(|l| &l.step_key == step_key)
            .cloned()
            .collect();
        locations.sort_by_key(|l| l.index);
        locations
    }

    pub fn is_disabled(&self, filter_name: &str, step_key: &StepKey) -> bool {
        self.disabled
            .get(filter_name)
            .is_some_and(|locations| locations.iter().any(|l| &l.step_key == step_key))
    }

    /// Names of every filter with at least one disabled location.
    pub fn disabled_filter_names(&self) -> impl Iterator<Item = &str> {
        self.disabled.keys().map(String::as_str)
    }

    pub fn locations(&self, filter_name: &str) -> &[DisabledLocation] {
        self.disabled
            .get(filter_name)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.disabled.is_empty()
    }

    /// Rewrite every step key through `rewrite`. Returning `None` drops the
    /// location. Returns how many locations changed.
    pub fn rewrite_keys(&mut self, mut rewrite: impl FnMut(&StepKey) -> Option<StepKey>) -> usize {
        let mut changed = 0;
        for locations in self.disabled.values_mut() {
            locations.retain_mut(|location| match rewrite(&location.step_key) {
                Some(key) => {
                    if key != location.step_key {
                        location.step_key = key;
                        changed += 1;
                    }
                    true
                }
                None => {
                    changed += 1;
                    false
                }
            });
        }
        self.disabled.retain(|_, locations| !locations.is_empty());

        if changed > 0 {
            self.persist();
        }
        changed
    }

    /// Drop all entries.
    pub fn reset(&mut self) {
        self.disabled.clear();
        self.persist();
    }

    fn persist(&self) {
        let Some(path) = &self.store else {
            return;
        };
        let result = self
            .to_json()
            .map_err(|e| e.to_string())
            .and_then(|content| fs::write(path, content).map_err(|e| e.to_string()));
        if let Err(e) = result {
            warn!("Failed to save overlay to {}: {}", path.display(), e);
        }
    }
}

fn migrate_v1(value: &Value) -> Result<BTreeMap<String, Vec<DisabledLocation>>, serde_json::Error> {
    let mut disabled = BTreeMap::new();
    let Some(entries) = value.get("disabled").and_then(Value::as_object) else {
        return Ok(disabled);
    };
    for (name, entry) in entries {
        let locations = match entry {
            Value::Array(_) => serde_json::from_value(entry.clone())?,
            _ => vec![serde_json::from_value::<DisabledLocation>(entry.clone())?],
        };
        disabled.insert(name.clone(), locations);
    }
    Ok(disabled)
}

/// Rebuild a step's full filter list from its active names and the disabled
/// locations recorded for it.
///
/// Each disabled filter goes to its recorded index, moving forward (and
/// wrapping) to the next free slot on collision; active names fill the
/// remaining slots in order.
pub fn reconstruct(active: &[String], disabled: &[DisabledLocation]) -> Vec<FilterSlot> {
    let total = active.len() + disabled.len();
    let mut slots: Vec<Option<FilterSlot>> = vec![None; total];

    for location in disabled {
        let start = location.index.min(total.saturating_sub(1));
        let free = (start..total).chain(0..start).find(|&i| slots[i].is_none());
        if let Some(i) = free {
            slots[i] = Some(FilterSlot {
                name: location.filter_name.clone(),
                enabled: false,
            });
        }
    }

    let mut active = active.iter();
    slots
        .into_iter()
        .filter_map(|slot| {
            slot.or_else(|| {
                active.next().map(|name| FilterSlot {
                    name: name.clone(),
                    enabled: true,
                })
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_step_key_text_round_trip() {
        let key = StepKey::new(&[1, 0], 2);
        assert_eq!(key.to_string(), "Filter:ch0,1:idx2");
        assert_eq!("Filter:ch0,1:idx2".parse::<StepKey>().unwrap(), key);
        assert_eq!("Filter:ch:idx0".parse::<StepKey>().unwrap(), StepKey::new(&[], 0));
        assert!("Mixer:idx0".parse::<StepKey>().is_err());
        assert!("Filter:ch0:idxZ".parse::<StepKey>().is_err());
    }

    #[test]
    fn test_step_key_ignores_channel_order() {
        assert_eq!(StepKey::new(&[2, 0, 1], 4), StepKey::new(&[0, 1, 2], 4));
    }

    #[test]
    fn test_disable_compensates_for_earlier_disables() {
        let key = StepKey::new(&[0], 0);
        let mut overlay = DisabledFilterOverlay::new();
        // Full list: A B C D; disable B, then D (now at active index 2).
        assert_eq!(overlay.disable("B", &key, 1), 1);
        assert_eq!(overlay.disable("D", &key, 2), 3);
        // Two neighbouring disables: A C remain, disable A then C.
        assert_eq!(overlay.disable("A", &key, 0), 0);
        assert_eq!(overlay.disable("C", &key, 0), 2);

        let indices: Vec<usize> = overlay.locations_for_step(&key).iter().map(|l| l.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_disable_is_idempotent_per_step() {
        let key = StepKey::new(&[0], 1);
        let mut overlay = DisabledFilterOverlay::new();
        overlay.disable("eq", &key, 2);
        overlay.disable("eq", &key, 1);
        assert_eq!(overlay.locations("eq").len(), 1);
        assert_eq!(overlay.locations("eq")[0].index, 1);
    }

    #[test]
    fn test_same_filter_in_several_steps() {
        let left = StepKey::new(&[0], 1);
        let right = StepKey::new(&[1], 2);
        let mut overlay = DisabledFilterOverlay::new();
        overlay.disable("bass", &left, 0);
        overlay.disable("bass", &right, 0);
        assert_eq!(overlay.locations("bass").len(), 2);

        assert!(overlay.enable("bass", &left).is_some());
        assert!(!overlay.is_disabled("bass", &left));
        assert!(overlay.is_disabled("bass", &right));

        assert!(overlay.enable("bass", &right).is_some());
        assert!(overlay.is_empty());
        assert!(overlay.enable("bass", &right).is_none());
    }

    #[test]
    fn test_enable_everywhere() {
        let mut overlay = DisabledFilterOverlay::new();
        overlay.disable("bass", &StepKey::new(&[0], 1), 0);
        overlay.disable("bass", &StepKey::new(&[1], 2), 0);
        overlay.disable("treble", &StepKey::new(&[1], 2), 0);
        assert_eq!(overlay.enable_everywhere("bass").len(), 2);
        assert_eq!(overlay.disabled_filter_names().collect::<Vec<_>>(), vec!["treble"]);
    }

    #[test]
    fn test_reconstruct_restores_order() {
        let key = StepKey::new(&[0], 0);
        let mut overlay = DisabledFilterOverlay::new();
        overlay.disable("B", &key, 1);
        overlay.disable("D", &key, 2);

        let view = reconstruct(&names(&["A", "C"]), &overlay.locations_for_step(&key));
        let order: Vec<(&str, bool)> = view.iter().map(|s| (s.name.as_str(), s.enabled)).collect();
        assert_eq!(
            order,
            vec![("A", true), ("B", false), ("C", true), ("D", false)]
        );
    }

    #[test]
    fn test_reconstruct_probes_past_collisions() {
        let key = StepKey::new(&[0], 0);
        let disabled = vec![
            DisabledLocation { step_key: key.clone(), index: 1, filter_name: "X".into() },
            DisabledLocation { step_key: key.clone(), index: 1, filter_name: "Y".into() },
            DisabledLocation { step_key: key, index: 9, filter_name: "Z".into() },
        ];
        let view = reconstruct(&names(&["A"]), &disabled);
        let order: Vec<&str> = view.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(order, vec!["A", "X", "Y", "Z"]);
    }

    #[test]
    fn test_json_document_shape() {
        let mut overlay = DisabledFilterOverlay::new();
        overlay.disable("hp", &StepKey::new(&[0, 1], 3), 0);
        let value: Value = serde_json::from_str(&overlay.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "version": 2,
                "disabled": {"hp": [{"stepKey": "Filter:ch0,1:idx3", "index": 0, "filterName": "hp"}]}
            })
        );
        let back = DisabledFilterOverlay::from_json(&value.to_string()).unwrap();
        assert_eq!(back.locations("hp"), overlay.locations("hp"));
    }

    #[test]
    fn test_migrates_single_location_format() {
        let legacy = r#"{"version": 1, "disabled": {"hp": {"stepKey": "Filter:ch0:idx1", "index": 2, "filterName": "hp"}}}"#;
        let overlay = DisabledFilterOverlay::from_json(legacy).unwrap();
        assert_eq!(
            overlay.locations("hp"),
            &[DisabledLocation {
                step_key: StepKey::new(&[0], 1),
                index: 2,
                filter_name: "hp".to_string(),
            }]
        );
    }

    #[test]
    fn test_unknown_version_resets() {
        let future = r#"{"version": 99, "disabled": {"hp": "whatever"}}"#;
        assert!(DisabledFilterOverlay::from_json(future).unwrap().is_empty());
    }

    #[test]
    fn test_store_round_trip_and_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disabled_filters.json");

        let mut overlay = DisabledFilterOverlay::with_store(&path);
        overlay.disable("lp", &StepKey::new(&[1], 0), 2);
        drop(overlay);

        let reloaded = DisabledFilterOverlay::with_store(&path);
        assert_eq!(reloaded.locations("lp").len(), 1);

        fs::write(&path, "{not json").unwrap();
        assert!(DisabledFilterOverlay::with_store(&path).is_empty());
    }

    #[test]
    fn test_unwritable_store_degrades() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be written as a file.
        let mut overlay = DisabledFilterOverlay::with_store(dir.path());
        assert!(overlay.is_empty());
        overlay.disable("lp", &StepKey::new(&[0], 0), 0);
        assert!(overlay.is_disabled("lp", &StepKey::new(&[0], 0)));
    }
}
