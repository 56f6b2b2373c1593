//! Persistent application settings (JSON file in app data directory).

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use wavefeed_core::{
    buffering::DEFAULT_CAPACITY,
    flow::{DEFAULT_BATCH_MAX, DEFAULT_HIGH_WATER_FRACTION, DEFAULT_LOW_WATER_QUANTA},
    ipc::messages::DEFAULT_QUANTUM,
    FlowPolicy, SessionConfig, SineEngine,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    pub preferred_output_device: Option<String>,
    pub frequency: f64,
    pub amplitude: f64,
    /// Ring capacity in frames.
    pub capacity: usize,
    pub quantum: usize,
    /// `low_water` or `fill_to_target`.
    pub flow_policy: String,
    pub low_water_quanta: usize,
    pub batch_max: usize,
    /// High-water-mark as a fraction of capacity (fill_to_target only).
    pub high_water_fraction: f64,
    pub prime: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            preferred_output_device: None,
            frequency: SineEngine::DEFAULT_FREQUENCY,
            amplitude: SineEngine::DEFAULT_AMPLITUDE,
            capacity: DEFAULT_CAPACITY,
            quantum: DEFAULT_QUANTUM,
            flow_policy: "low_water".into(),
            low_water_quanta: DEFAULT_LOW_WATER_QUANTA,
            batch_max: DEFAULT_BATCH_MAX,
            high_water_fraction: DEFAULT_HIGH_WATER_FRACTION,
            prime: true,
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.flow_policy = normalize_flow_policy(&self.flow_policy);
        self.frequency = self.frequency.clamp(20.0, 20_000.0);
        self.amplitude = self.amplitude.clamp(0.0, 1.0);
        self.capacity = self.capacity.clamp(256, 1 << 20);
        self.quantum = self.quantum.clamp(16, self.capacity / 4);
        self.low_water_quanta = self.low_water_quanta.clamp(1, 64);
        self.batch_max = self.batch_max.clamp(self.quantum, self.capacity - 1);
        self.high_water_fraction = self.high_water_fraction.clamp(0.1, 0.95);
        self.preferred_output_device = self
            .preferred_output_device
            .as_ref()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
    }

    pub fn flow(&self) -> FlowPolicy {
        match self.flow_policy.as_str() {
            "fill_to_target" => {
                let high_water_mark = (self.capacity as f64 * self.high_water_fraction) as usize;
                FlowPolicy::FillToTarget {
                    high_water_mark: high_water_mark.clamp(self.quantum, self.capacity - 1),
                }
            }
            _ => FlowPolicy::LowWater {
                quanta: self.low_water_quanta,
                batch_max: self.batch_max,
            },
        }
    }

    /// Session configuration for a device running at `sample_rate`.
    ///
    /// The consumer copies the largest callback a host is likely to ask for
    /// in one pass; anything larger is split.
    pub fn session_config(&self, sample_rate: u32) -> SessionConfig {
        SessionConfig {
            sample_rate,
            capacity: self.capacity,
            quantum: self.quantum,
            max_quantum: (self.capacity / 2).max(self.quantum),
            policy: self.flow(),
            prime: self.prime,
        }
    }
}

pub fn normalize_flow_policy(raw: &str) -> String {
    match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
        "fill_to_target" | "fill" | "high_water" | "target" => "fill_to_target".into(),
        _ => "low_water".into(),
    }
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Lattice Labs")
            .join("Wavefeed")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".config")
            })
            .join("wavefeed")
            .join("settings.json")
    }
}

pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<AppSettings>(&raw).ok())
        .unwrap_or_default();
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_survive_normalization() {
        let mut settings = AppSettings::default();
        settings.normalize();
        assert_eq!(settings, AppSettings::default());
        assert_eq!(
            settings.session_config(44_100).policy,
            FlowPolicy::default()
        );
    }

    #[test]
    fn normalize_clamps_out_of_range_values() {
        let mut settings = AppSettings {
            amplitude: 3.0,
            capacity: 16,
            quantum: 0,
            batch_max: 0,
            flow_policy: " Fill-To-Target ".into(),
            preferred_output_device: Some("   ".into()),
            ..AppSettings::default()
        };
        settings.normalize();
        assert_eq!(settings.amplitude, 1.0);
        assert_eq!(settings.capacity, 256);
        assert_eq!(settings.quantum, 16);
        assert_eq!(settings.batch_max, 16);
        assert_eq!(settings.flow_policy, "fill_to_target");
        assert!(settings.preferred_output_device.is_none());
    }

    #[test]
    fn fill_to_target_resolves_against_capacity() {
        let settings = AppSettings {
            flow_policy: "fill_to_target".into(),
            capacity: 4096,
            high_water_fraction: 0.75,
            ..AppSettings::default()
        };
        assert_eq!(
            settings.flow(),
            FlowPolicy::FillToTarget {
                high_water_mark: 3072
            }
        );
        let config = settings.session_config(48_000);
        assert!(config.stream_params().validate().is_ok());
    }

    #[test]
    fn load_falls_back_to_defaults_and_save_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("settings.json");
        assert_eq!(load_settings(&path), AppSettings::default());

        let settings = AppSettings {
            frequency: 220.0,
            flow_policy: "fill_to_target".into(),
            ..AppSettings::default()
        };
        save_settings(&path, &settings).expect("save");
        assert_eq!(load_settings(&path), settings);

        fs::write(&path, "{not json").expect("corrupt");
        assert_eq!(load_settings(&path), AppSettings::default());
    }
}
