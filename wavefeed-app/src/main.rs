//! Wavefeed command-line host.
//!
//! ## Runtime note
//!
//! `cpal::Stream` is `!Send`, so live playback is driven from the main
//! future (`block_on` never moves it across threads). The producer runs on
//! Tokio's blocking pool; offline renders run there too.

mod commands;
mod render;
mod settings;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use settings::{default_settings_path, load_settings, save_settings, AppSettings};
use tracing::info;

#[derive(Parser)]
#[command(name = "wavefeed")]
#[command(author, version, about = "Stream generated audio to an output device", long_about = None)]
struct Cli {
    /// Settings file (defaults to the per-user config directory)
    #[arg(long, global = true, value_name = "FILE")]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Play the reference tone on an output device
    Play(PlayArgs),

    /// Render the stream to a WAV file on a simulated device clock
    Render(RenderArgs),

    /// List output devices
    Devices,
}

/// Overrides shared by `play` and `render`.
#[derive(Args, Clone)]
struct StreamOverrides {
    /// Tone frequency in Hz
    #[arg(short, long)]
    frequency: Option<f64>,

    /// Tone amplitude (0.0 to 1.0)
    #[arg(short, long)]
    amplitude: Option<f64>,

    /// Flow policy: low_water or fill_to_target
    #[arg(long)]
    policy: Option<String>,

    /// Skip the initial buffer fill before audio starts
    #[arg(long)]
    no_prime: bool,

    /// Persist the resulting settings
    #[arg(long)]
    save: bool,
}

#[derive(Args)]
pub struct PlayArgs {
    /// Output device name (falls back to the default device)
    #[arg(short, long)]
    device: Option<String>,

    /// Stop after this many seconds instead of waiting for Ctrl+C
    #[arg(short, long)]
    seconds: Option<f64>,

    #[command(flatten)]
    overrides: StreamOverrides,
}

#[derive(Args)]
pub struct RenderArgs {
    /// Output WAV file
    #[arg(short, long, value_name = "FILE")]
    out: PathBuf,

    /// Duration in seconds
    #[arg(short, long, default_value_t = 5.0)]
    seconds: f64,

    /// Sample rate in Hz
    #[arg(long, default_value_t = 44_100)]
    sample_rate: u32,

    /// Clock speed relative to real time (0 runs unpaced)
    #[arg(long, default_value_t = 1.0)]
    speed: f64,

    #[command(flatten)]
    overrides: StreamOverrides,
}

fn apply_overrides(
    settings: &mut AppSettings,
    overrides: &StreamOverrides,
    device: Option<&str>,
    path: &std::path::Path,
) -> anyhow::Result<()> {
    if let Some(frequency) = overrides.frequency {
        settings.frequency = frequency;
    }
    if let Some(amplitude) = overrides.amplitude {
        settings.amplitude = amplitude;
    }
    if let Some(policy) = overrides.policy.as_deref() {
        settings.flow_policy = policy.into();
    }
    if overrides.no_prime {
        settings.prime = false;
    }
    if let Some(device) = device {
        settings.preferred_output_device = Some(device.into());
    }
    settings.normalize();

    if overrides.save {
        save_settings(path, settings)?;
        info!(path = %path.display(), "settings saved");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("wavefeed=info")),
        )
        .init();

    let cli = Cli::parse();
    let settings_path = cli.settings.unwrap_or_else(default_settings_path);
    let mut settings = load_settings(&settings_path);

    match cli.command {
        Commands::Play(args) => {
            apply_overrides(
                &mut settings,
                &args.overrides,
                args.device.as_deref(),
                &settings_path,
            )?;
            commands::play(&settings, args.seconds).await
        }
        Commands::Render(args) => {
            apply_overrides(&mut settings, &args.overrides, None, &settings_path)?;
            let report = tokio::task::spawn_blocking(move || {
                render::render_to_wav(
                    &settings,
                    args.sample_rate,
                    args.seconds,
                    args.speed,
                    &args.out,
                )
            })
            .await??;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Commands::Devices => {
            commands::devices();
            Ok(())
        }
    }
}
