mod null;
mod output;

pub use null::{NullEngine, NullEngineHandle, NullEngineLog};
pub use output::{AudioOutput, RodioEngine};

use anyhow::Result;
use std::path::Path;
use std::time::Duration;

pub const MAX_VOLUME: u8 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayState {
    Stopped,
    Playing,
    Paused,
}

/// Asynchronous notifications, drained by `PlaybackEngine::poll_events`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Loaded,
    LoadFailed(String),
    Buffered,
    DurationChanged(Duration),
    PositionChanged(Duration),
    StateChanged(PlayState),
}

/// One playback engine instance. Loading, buffering and duration discovery are
/// reported through events rather than return values; duration is only
/// reported once the engine has actually started playing.
pub trait PlaybackEngine {
    fn load(&mut self, path: &Path) -> Result<()>;
    fn play(&mut self);
    fn pause(&mut self);
    fn set_position(&mut self, position: Duration) -> Result<()>;
    fn set_volume(&mut self, level: u8);
    fn set_muted(&mut self, muted: bool);
    fn state(&self) -> PlayState;
    fn metadata_title(&self) -> Option<String>;
    fn poll_events(&mut self) -> Vec<EngineEvent>;
    fn name(&self) -> &'static str;
}
