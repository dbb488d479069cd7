// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Pipeline editing model.

pub mod editor;
pub mod identity;
pub mod overlay;
pub mod remap;
pub mod step;

pub use editor::EditError;
pub use identity::{BlockId, BlockIdentities};
pub use overlay::{DisabledFilterOverlay, DisabledLocation, FilterSlot, StepKey};
pub use step::{normalize_document, normalize_step, PipelineStep};
