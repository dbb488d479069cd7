// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Pipeline edits that keep the document and the overlay in step.
//!
//! Every structural change goes through here so the overlay's step keys
//! follow the steps they describe.

use super::overlay::reconstruct;
use super::remap::{remap_for_insert, remap_for_move, remap_for_remove};
use super::step::normalize_pipeline;
use super::{BlockId, BlockIdentities, DisabledFilterOverlay, FilterSlot, PipelineStep, StepKey};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EditError {
    #[error("Step {index} out of range (pipeline has {len} steps)")]
    StepOutOfRange { index: usize, len: usize },
    #[error("Step {0} is not a filter step")]
    NotAFilterStep(usize),
    #[error("Filter '{name}' is not active in step {index}")]
    FilterNotActive { name: String, index: usize },
    #[error("Filter '{name}' is not disabled in step {index}")]
    FilterNotDisabled { name: String, index: usize },
}

/// Read the normalized pipeline out of a configuration document.
pub fn pipeline_of(document: &Value) -> Vec<PipelineStep> {
    document
        .get("pipeline")
        .map(normalize_pipeline)
        .unwrap_or_default()
}

/// Write `steps` back into `document`.
pub fn set_pipeline(document: &mut Value, steps: &[PipelineStep]) {
    if let Value::Object(map) = document {
        map.insert(
            "pipeline".to_string(),
            Value::Array(steps.iter().map(PipelineStep::to_value).collect()),
        );
    }
}

fn filter_step_mut(steps: &mut [PipelineStep], index: usize) -> Result<(StepKey, &mut Vec<String>), EditError> {
    let len = steps.len();
    match steps.get_mut(index) {
        Some(PipelineStep::Filter { channels, names, .. }) => Ok((StepKey::new(channels, index), names)),
        Some(_) => Err(EditError::NotAFilterStep(index)),
        None => Err(EditError::StepOutOfRange { index, len }),
    }
}

/// Switch `filter_name` off in the filter step at `step_index`.
///
/// Returns the filter's position in the step's full list.
pub fn disable_filter(
    steps: &mut [PipelineStep],
    step_index: usize,
    filter_name: &str,
    overlay: &mut DisabledFilterOverlay,
) -> Result<usize, EditError> {
    let (key, names) = filter_step_mut(steps, step_index)?;
    let current = names
        .iter()
        .position(|n| n == filter_name)
        .ok_or_else(|| EditError::FilterNotActive {
            name: filter_name.to_string(),
            index: step_index,
        })?;
    names.remove(current);
    Ok(overlay.disable(filter_name, &key, current))
}

/// Switch `filter_name` back on in the filter step at `step_index`.
///
/// Returns where it was reinserted in the active list.
pub fn enable_filter(
    steps: &mut [PipelineStep],
    step_index: usize,
    filter_name: &str,
    overlay: &mut DisabledFilterOverlay,
) -> Result<usize, EditError> {
    let (key, names) = filter_step_mut(steps, step_index)?;
    let location = overlay
        .enable(filter_name, &key)
        .ok_or_else(|| EditError::FilterNotDisabled {
            name: filter_name.to_string(),
            index: step_index,
        })?;

    let disabled_before = overlay
        .locations_for_step(&key)
        .iter()
        .filter(|l| l.index < location.index)
        .count();
    let position = location.index.saturating_sub(disabled_before).min(names.len());
    names.insert(position, filter_name.to_string());
    debug!("Restored {} at {} in step {}", filter_name, position, step_index);
    Ok(position)
}

/// Full ordered view of a filter step, disabled filters included.
pub fn filter_view(step: &PipelineStep, step_index: usize, overlay: &DisabledFilterOverlay) -> Vec<FilterSlot> {
    match step {
        PipelineStep::Filter { channels, names, .. } => {
            let key = StepKey::new(channels, step_index);
            reconstruct(names, &overlay.locations_for_step(&key))
        }
        _ => Vec::new(),
    }
}

/// Move one step from `from` to `to`, carrying its disabled filters along.
pub fn move_step(
    steps: &mut Vec<PipelineStep>,
    from: usize,
    to: usize,
    overlay: &mut DisabledFilterOverlay,
) -> Result<(), EditError> {
    let len = steps.len();
    for index in [from, to] {
        if index >= len {
            return Err(EditError::StepOutOfRange { index, len });
        }
    }
    if from == to {
        return Ok(());
    }
    let step = steps.remove(from);
    steps.insert(to, step);
    remap_for_move(overlay, from, to);
    Ok(())
}

/// Insert `step` at `at` (which may equal the pipeline length).
pub fn insert_step(
    steps: &mut Vec<PipelineStep>,
    at: usize,
    step: PipelineStep,
    overlay: &mut DisabledFilterOverlay,
) -> Result<(), EditError> {
    if at > steps.len() {
        return Err(EditError::StepOutOfRange { index: at, len: steps.len() });
    }
    steps.insert(at, step);
    remap_for_insert(overlay, at);
    Ok(())
}

/// Remove the step at `at`, dropping its disabled filters.
pub fn remove_step(
    steps: &mut Vec<PipelineStep>,
    at: usize,
    overlay: &mut DisabledFilterOverlay,
) -> Result<PipelineStep, EditError> {
    if at >= steps.len() {
        return Err(EditError::StepOutOfRange { index: at, len: steps.len() });
    }
    let removed = steps.remove(at);
    remap_for_remove(overlay, at);
    Ok(removed)
}

/// Drop every reference to `filter_name`, active or disabled.
///
/// Used when the filter definition itself is deleted.
pub fn purge_filter(steps: &mut [PipelineStep], filter_name: &str, overlay: &mut DisabledFilterOverlay) {
    for step in steps.iter_mut() {
        if let PipelineStep::Filter { names, .. } = step {
            names.retain(|n| n != filter_name);
        }
    }
    overlay.enable_everywhere(filter_name);
}

/// Stable identities for every step, in pipeline order.
pub fn block_ids(
    steps: &[PipelineStep],
    overlay: &DisabledFilterOverlay,
    identities: &mut BlockIdentities,
) -> Vec<BlockId> {
    steps
        .iter()
        .enumerate()
        .map(|(index, step)| identities.id_for(step, index, overlay))
        .collect()
}
