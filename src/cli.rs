// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! CLI definitions for dspremote.

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "dspremote",
    version,
    about = "Remote control for a networked audio DSP engine",
    after_help = "Examples:\n  dspremote status\n  dspremote volume -- -12.5\n  dspremote pipeline disable 2 lowpass\n  dspremote --control ws://dsp.local:1234 devices Alsa"
)]
pub struct Cli {
    /// Show debug logging.
    #[arg(long, short, global = true)]
    pub verbose: bool,
    /// Control socket URL (overrides the config file).
    #[arg(long, global = true)]
    pub control: Option<String>,
    /// Spectrum socket URL (overrides the config file).
    #[arg(long, global = true)]
    pub spectrum: Option<String>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show engine version, state and levels.
    Status,
    /// Show or set the main volume in dB.
    Volume {
        /// New volume; omit to print the current one.
        #[arg(allow_negative_numbers = true)]
        db: Option<f64>,
        /// Treat the value as a relative change.
        #[arg(long)]
        adjust: bool,
    },
    /// Show, set or toggle mute.
    Mute {
        #[command(subcommand)]
        action: Option<MuteAction>,
    },
    /// List backends, or the devices of one backend.
    Devices {
        /// Backend name, e.g. Alsa.
        backend: Option<String>,
    },
    /// Show or edit the processing pipeline.
    Pipeline {
        #[command(subcommand)]
        action: Option<PipelineAction>,
    },
    /// Print where the client config and editor state live.
    ConfigPath,
}

#[derive(Debug, Clone, Copy, Subcommand)]
pub enum MuteAction {
    On,
    Off,
    Toggle,
}

#[derive(Debug, Subcommand)]
pub enum PipelineAction {
    /// Print every step with its filters (default).
    Show,
    /// Switch a filter off inside a filter step.
    Disable { step: usize, filter: String },
    /// Switch a disabled filter back on.
    Enable { step: usize, filter: String },
    /// Move a step to another position.
    Move { from: usize, to: usize },
}
