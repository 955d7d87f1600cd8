use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Theme {
    #[default]
    ViceCity,
    SanAndreas,
}

impl Theme {
    pub fn next(self) -> Self {
        match self {
            Self::ViceCity => Self::SanAndreas,
            Self::SanAndreas => Self::ViceCity,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::ViceCity => "Vice City",
            Self::SanAndreas => "San Andreas",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Track {
    pub path: PathBuf,
}

impl Track {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name with its final extension removed.
    pub fn file_label(&self) -> String {
        self.path
            .file_stem()
            .or_else(|| self.path.file_name())
            .and_then(OsStr::to_str)
            .unwrap_or("unknown")
            .to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchTuning {
    #[serde(default = "default_max_stations")]
    pub max_stations: usize,
    #[serde(default = "default_dramatic_pause_ms")]
    pub dramatic_pause_ms: u64,
    #[serde(default = "default_stage_timeout_ms")]
    pub load_timeout_ms: u64,
    #[serde(default = "default_stage_timeout_ms")]
    pub buffer_timeout_ms: u64,
    #[serde(default = "default_stage_timeout_ms")]
    pub duration_timeout_ms: u64,
    #[serde(default = "default_probe_volume")]
    pub probe_volume: u8,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl SwitchTuning {
    pub fn dramatic_pause(&self) -> Duration {
        Duration::from_millis(self.dramatic_pause_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Tuning for headless runs and tests: no dramatic pause, no sleeping between polls.
    pub fn immediate() -> Self {
        Self {
            dramatic_pause_ms: 0,
            poll_interval_ms: 0,
            load_timeout_ms: 200,
            buffer_timeout_ms: 200,
            duration_timeout_ms: 200,
            ..Self::default()
        }
    }
}

impl Default for SwitchTuning {
    fn default() -> Self {
        Self {
            max_stations: default_max_stations(),
            dramatic_pause_ms: default_dramatic_pause_ms(),
            load_timeout_ms: default_stage_timeout_ms(),
            buffer_timeout_ms: default_stage_timeout_ms(),
            duration_timeout_ms: default_stage_timeout_ms(),
            probe_volume: default_probe_volume(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

fn default_max_stations() -> usize {
    20
}

fn default_dramatic_pause_ms() -> u64 {
    300
}

fn default_stage_timeout_ms() -> u64 {
    5_000
}

fn default_probe_volume() -> u8 {
    1
}

fn default_poll_interval_ms() -> u64 {
    10
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_volume")]
    pub volume: u8,
    #[serde(default = "default_scan_directory")]
    pub scan_directory: PathBuf,
    #[serde(default)]
    pub always_on_top: bool,
    #[serde(default)]
    pub broadcast_epoch_ms: i64,
    #[serde(default)]
    pub current_station: usize,
    #[serde(default)]
    pub theme: Theme,
    #[serde(default)]
    pub tuning: SwitchTuning,
}

fn default_volume() -> u8 {
    50
}

fn default_scan_directory() -> PathBuf {
    PathBuf::from(".")
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            volume: default_volume(),
            scan_directory: default_scan_directory(),
            always_on_top: false,
            broadcast_epoch_ms: 0,
            current_station: 0,
            theme: Theme::default(),
            tuning: SwitchTuning::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_label_strips_only_last_extension() {
        assert_eq!(Track::new("/music/flash.fm.mp3").file_label(), "flash.fm");
        assert_eq!(Track::new("/music/kchat").file_label(), "kchat");
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let settings: Settings = serde_json::from_str(r#"{"volume": 80}"#).expect("parse");
        assert_eq!(settings.volume, 80);
        assert_eq!(settings.tuning.max_stations, 20);
        assert_eq!(settings.tuning.dramatic_pause_ms, 300);
        assert_eq!(settings.theme, Theme::ViceCity);
    }
}
