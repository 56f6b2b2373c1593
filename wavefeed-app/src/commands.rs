//! Live playback and device listing.

use std::sync::{atomic::AtomicBool, Arc};
use std::time::Duration;

use tracing::{info, warn};
use wavefeed_core::{
    audio::device::list_output_devices, AudioOutput, AudioSession, OutputDevice, SineEngine,
};

use crate::settings::AppSettings;

const READY_TIMEOUT: Duration = Duration::from_secs(2);

pub async fn play(settings: &AppSettings, seconds: Option<f64>) -> anyhow::Result<()> {
    let output = OutputDevice::select(settings.preferred_output_device.as_deref())?;
    let config = settings.session_config(output.sample_rate);
    let session = AudioSession::new(
        config,
        SineEngine::new(settings.frequency, settings.amplitude),
    );

    let consumer = session.start()?;
    let running = Arc::new(AtomicBool::new(true));
    let audio = match AudioOutput::open(output, consumer, Arc::clone(&running)) {
        Ok(audio) => audio,
        Err(e) => {
            let _ = session.stop();
            return Err(e.into());
        }
    };
    if let Err(e) = session.ready(READY_TIMEOUT).await {
        audio.stop();
        let _ = session.stop();
        return Err(e.into());
    }

    info!(
        frequency = settings.frequency,
        sample_rate = audio.sample_rate,
        channels = audio.channels,
        "playing, press Ctrl+C to stop"
    );

    match seconds {
        Some(seconds) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = tokio::time::sleep(Duration::from_secs_f64(seconds.max(0.0))) => {}
            }
        }
        None => tokio::signal::ctrl_c().await?,
    }

    audio.stop();
    session.stop()?;

    let snap = session.diagnostics_snapshot();
    if snap.underruns > 0 {
        warn!(underruns = snap.underruns, "playback had underruns");
    }
    info!(
        frames_played = snap.frames_played,
        underruns = snap.underruns,
        requests_sent = snap.requests_sent,
        batches_generated = snap.batches_generated,
        "playback stopped"
    );
    Ok(())
}

pub fn devices() {
    let devices = list_output_devices();
    if devices.is_empty() {
        println!("No output devices found.");
        return;
    }

    println!("Output Devices:");
    for (idx, device) in devices.iter().enumerate() {
        let default = if device.is_default { " (default)" } else { "" };
        println!("  [{}] {}{}", idx, device.name, default);
    }
}
