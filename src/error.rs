use std::path::PathBuf;
use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

/// Stage of slot priming a wait can time out in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStage {
    Load,
    Buffer,
    Duration,
}

impl WaitStage {
    pub fn label(self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::Buffer => "buffer",
            Self::Duration => "duration probe",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Reached maximum number of stations ({limit})")]
    CatalogCapacityExceeded { limit: usize },

    #[error("Station {index} out of range ({count} stations)")]
    IndexOutOfRange { index: usize, count: usize },

    #[error("Failed to load {}: {reason}", path.display())]
    EngineLoad { path: PathBuf, reason: String },

    #[error("Playback engine did not start playing")]
    EngineNotPlaying,

    #[error("No tracks found")]
    NoStationsAvailable,

    #[error("Playback engine stalled during {} after {waited:?}", stage.label())]
    EngineTimeout { stage: WaitStage, waited: Duration },

    #[error("Station switch superseded by a newer request")]
    SwitchCancelled,

    #[error("Settings error: {0:#}")]
    Settings(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Error {
    pub fn severity(&self) -> Severity {
        match self {
            Self::CatalogCapacityExceeded { .. }
            | Self::EngineNotPlaying
            | Self::NoStationsAvailable => Severity::Warning,
            Self::SwitchCancelled => Severity::Info,
            _ => Severity::Error,
        }
    }

    pub fn engine_load(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::EngineLoad {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
