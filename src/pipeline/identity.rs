// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Stable identities for pipeline steps.
//!
//! An identity is derived from a content signature, so it survives reordering
//! and replacing the whole document with an equal copy. A filter step's
//! signature counts disabled filters as present, so toggling a filter keeps
//! the identity while really adding or removing one changes it.

use super::{DisabledFilterOverlay, PipelineStep, StepKey};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Surrogate identity of a pipeline step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(u64);

impl BlockId {
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block-{}", self.0)
    }
}

/// Content signature of the step at `index`.
pub fn signature(step: &PipelineStep, index: usize, overlay: &DisabledFilterOverlay) -> String {
    match step {
        PipelineStep::Mixer { name, .. } => format!("Mixer:{}", name),
        PipelineStep::Filter { channels, names, .. } => {
            let key = StepKey::new(channels, index);
            let mut all: BTreeSet<String> = names.iter().cloned().collect();
            all.extend(
                overlay
                    .locations_for_step(&key)
                    .into_iter()
                    .map(|l| l.filter_name),
            );
            let channels: Vec<String> = key.channels().iter().map(|c| c.to_string()).collect();
            let all: Vec<String> = all.into_iter().collect();
            format!("Filter:{}:{}", channels.join(","), all.join(","))
        }
        other => format!("{}:{}", other.kind(), other.name().unwrap_or_default()),
    }
}

/// Signature to identity table for one editing session.
#[derive(Debug, Default)]
pub struct BlockIdentities {
    next: u64,
    by_signature: HashMap<String, BlockId>,
    latest: HashMap<BlockId, PipelineStep>,
}

impl BlockIdentities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identity of the step at `index`, allocating one for a new signature.
    pub fn id_for(&mut self, step: &PipelineStep, index: usize, overlay: &DisabledFilterOverlay) -> BlockId {
        let signature = signature(step, index, overlay);
        let id = match self.by_signature.get(&signature) {
            Some(id) => *id,
            None => {
                self.next += 1;
                let id = BlockId(self.next);
                self.by_signature.insert(signature, id);
                id
            }
        };
        self.latest.insert(id, step.clone());
        id
    }

    /// The step most recently seen with `id`.
    pub fn resolve(&self, id: BlockId) -> Option<&PipelineStep> {
        self.latest.get(&id)
    }

    pub fn len(&self) -> usize {
        self.by_signature.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_signature.is_empty()
    }

    /// Forget every identity, e.g. after loading a new document.
    pub fn reset(&mut self) {
        self.by_signature.clear();
        self.latest.clear();
    }
}
