// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! dspremote - command line remote for a networked audio DSP engine.

mod cli;

use clap::Parser;
use cli::{Cli, Command, MuteAction, PipelineAction};
use dspremote::client::{ConnectParams, DspClient};
use dspremote::config::{ClientConfig, ConfigManager};
use dspremote::pipeline::{editor, BlockId, BlockIdentities, DisabledFilterOverlay, PipelineStep};
use serde_json::Value;
use std::error::Error;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let directive = if cli.verbose { "dspremote=debug" } else { "dspremote=warn" };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(directive.parse()?))
        .init();

    let manager = ConfigManager::new()?;
    if let Command::ConfigPath = cli.command {
        println!("config:  {}", manager.config_path().display());
        println!("overlay: {}", manager.overlay_path().display());
        return Ok(());
    }

    let mut config = manager.load_config().unwrap_or_else(|e| {
        warn!("Ignoring config file: {}", e);
        ClientConfig::default()
    });
    if let Some(url) = cli.control {
        config.control.url = url;
    }
    if let Some(url) = cli.spectrum {
        config.spectrum.url = url;
        config.spectrum.enabled = true;
    }

    let (client, _events) = DspClient::new(&config);
    let document = client.connect(&ConnectParams::from_config(&config)).await?;
    info!("Connected to {}", config.control.url);

    let result = run(&client, &manager, &config, document, cli.command).await;
    client.disconnect();
    result
}

async fn run(
    client: &DspClient,
    manager: &ConfigManager,
    config: &ClientConfig,
    document: Value,
    command: Command,
) -> Result<(), Box<dyn Error>> {
    match command {
        Command::Status => status(client).await?,
        Command::Volume { db: None, .. } => println!("{:.1} dB", client.volume().await?),
        Command::Volume { db: Some(db), adjust: true } => {
            println!("{:.1} dB", client.adjust_volume(db).await?)
        }
        Command::Volume { db: Some(db), adjust: false } => client.set_volume(db).await?,
        Command::Mute { action } => {
            let muted = match action {
                None => client.mute().await?,
                Some(MuteAction::On) => {
                    client.set_mute(true).await?;
                    true
                }
                Some(MuteAction::Off) => {
                    client.set_mute(false).await?;
                    false
                }
                Some(MuteAction::Toggle) => client.toggle_mute().await?,
            };
            println!("{}", if muted { "muted" } else { "unmuted" });
        }
        Command::Devices { backend: None } => {
            let types = client.supported_device_types().await?;
            println!("playback: {}", types.playback.join(", "));
            println!("capture:  {}", types.capture.join(", "));
        }
        Command::Devices { backend: Some(backend) } => {
            println!("capture:");
            for device in client.capture_devices(&backend).await? {
                println!("  {}  {}", device.name, device.description.unwrap_or_default());
            }
            println!("playback:");
            for device in client.playback_devices(&backend).await? {
                println!("  {}  {}", device.name, device.description.unwrap_or_default());
            }
        }
        Command::Pipeline { action } => {
            let mut overlay = manager.open_overlay(config);
            pipeline(client, document, &mut overlay, action.unwrap_or(PipelineAction::Show)).await?
        }
        Command::ConfigPath => {}
    }
    Ok(())
}

async fn status(client: &DspClient) -> Result<(), Box<dyn Error>> {
    println!("version:  {}", client.version().await?);
    println!("state:    {}", client.state().await?);
    println!("rate:     {} Hz", client.capture_rate().await?);
    println!("load:     {:.1} %", client.processing_load().await?);
    println!("volume:   {:.1} dB", client.volume().await?);
    println!("muted:    {}", client.mute().await?);
    println!("clipped:  {}", client.clipped_samples().await?);
    if client.is_spectrum_connected() {
        let peaks: Vec<String> = client
            .playback_peak()
            .await?
            .iter()
            .map(|p| format!("{:.1}", p))
            .collect();
        println!("peak:     {} dB", peaks.join(" / "));
    }
    Ok(())
}

async fn pipeline(
    client: &DspClient,
    mut document: Value,
    overlay: &mut DisabledFilterOverlay,
    action: PipelineAction,
) -> Result<(), Box<dyn Error>> {
    let mut steps = editor::pipeline_of(&document);

    let undo = match &action {
        PipelineAction::Show => None,
        PipelineAction::Disable { step, filter } => {
            editor::disable_filter(&mut steps, *step, filter, overlay)?;
            Some(PipelineAction::Enable { step: *step, filter: filter.clone() })
        }
        PipelineAction::Enable { step, filter } => {
            editor::enable_filter(&mut steps, *step, filter, overlay)?;
            Some(PipelineAction::Disable { step: *step, filter: filter.clone() })
        }
        PipelineAction::Move { from, to } => {
            editor::move_step(&mut steps, *from, *to, overlay)?;
            Some(PipelineAction::Move { from: *to, to: *from })
        }
    };

    if let Some(undo) = undo {
        editor::set_pipeline(&mut document, &steps);
        if let Err(e) = client.set_config(&document).await {
            // Keep the overlay in line with what the engine still runs.
            match undo {
                PipelineAction::Enable { step, filter } => {
                    editor::enable_filter(&mut steps, step, &filter, overlay)?;
                }
                PipelineAction::Disable { step, filter } => {
                    editor::disable_filter(&mut steps, step, &filter, overlay)?;
                }
                PipelineAction::Move { from, to } => editor::move_step(&mut steps, from, to, overlay)?,
                PipelineAction::Show => {}
            }
            return Err(e.into());
        }
        info!("Uploaded edited pipeline");
    }

    let mut identities = BlockIdentities::new();
    let ids = editor::block_ids(&steps, overlay, &mut identities);
    for (index, (step, id)) in steps.iter().zip(ids).enumerate() {
        println!("{}", describe_step(index, id, step, overlay));
    }
    Ok(())
}

fn describe_step(index: usize, id: BlockId, step: &PipelineStep, overlay: &DisabledFilterOverlay) -> String {
    let body = match step {
        PipelineStep::Filter { channels, .. } => {
            let channels: Vec<String> = channels.iter().map(|c| c.to_string()).collect();
            let filters: Vec<String> = editor::filter_view(step, index, overlay)
                .into_iter()
                .map(|slot| if slot.enabled { slot.name } else { format!("({})", slot.name) })
                .collect();
            format!("Filter ch {}: {}", channels.join(","), filters.join(" "))
        }
        other => format!("{} {}", other.kind(), other.name().unwrap_or("?")),
    };
    let bypassed = if step.bypassed() == Some(true) { " [bypassed]" } else { "" };
    format!("{:>3}  {:<9} {}{}", index, id.to_string(), body, bypassed)
}
