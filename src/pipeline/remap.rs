// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Step-key remapping when pipeline steps change position.
//!
//! Step keys embed the pipeline index, so every structural edit of the
//! pipeline has to rewrite the overlay's keys to match.

use super::{DisabledFilterOverlay, StepKey};
use tracing::debug;

/// New index of the step that sat at `index` after moving `from` to `to`.
pub fn index_after_move(index: usize, from: usize, to: usize) -> usize {
    if index == from {
        to
    } else if from < to && index > from && index <= to {
        index - 1
    } else if from > to && index >= to && index < from {
        index + 1
    } else {
        index
    }
}

/// Rewrite keys after a single step moved from `from` to `to`.
pub fn remap_for_move(overlay: &mut DisabledFilterOverlay, from: usize, to: usize) -> usize {
    if from == to {
        return 0;
    }
    let changed = overlay.rewrite_keys(|key| Some(key.with_index(index_after_move(key.index(), from, to))));
    debug!("Remapped {} overlay location(s) for move {} -> {}", changed, from, to);
    changed
}

/// Rewrite keys after a step was inserted at `at`.
pub fn remap_for_insert(overlay: &mut DisabledFilterOverlay, at: usize) -> usize {
    overlay.rewrite_keys(|key| Some(shift(key, |i| if i >= at { i + 1 } else { i })))
}

/// Rewrite keys after the step at `at` was removed. Its own locations are dropped.
pub fn remap_for_remove(overlay: &mut DisabledFilterOverlay, at: usize) -> usize {
    overlay.rewrite_keys(|key| match key.index() {
        i if i == at => None,
        i if i > at => Some(key.with_index(i - 1)),
        _ => Some(key.clone()),
    })
}

fn shift(key: &StepKey, f: impl Fn(usize) -> usize) -> StepKey {
    key.with_index(f(key.index()))
}
