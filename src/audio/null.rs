use super::{EngineEvent, MAX_VOLUME, PlayState, PlaybackEngine};
use crate::error::WaitStage;
use anyhow::Result;
use rodio::{Decoder, Source};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

const POSITION_REPORT_INTERVAL: Duration = Duration::from_millis(250);

/// Calls observed by a `NullEngine`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NullEngineLog {
    pub loads: Vec<PathBuf>,
    pub seeks: Vec<Duration>,
    pub plays: usize,
    pub pauses: usize,
    pub volumes: Vec<u8>,
    pub muted: bool,
}

#[derive(Debug, Default)]
struct Script {
    durations: HashMap<PathBuf, Duration>,
    titles: HashMap<PathBuf, String>,
    default_duration: Option<Duration>,
    failing: HashSet<PathBuf>,
    stall: Option<WaitStage>,
    refuse_play: bool,
    log: NullEngineLog,
}

/// Shared view into a `NullEngine`, usable after the engine has been boxed.
#[derive(Debug, Clone, Default)]
pub struct NullEngineHandle {
    script: Arc<Mutex<Script>>,
}

impl NullEngineHandle {
    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn log(&self) -> NullEngineLog {
        self.lock().log.clone()
    }

    pub fn clear_log(&self) {
        self.lock().log = NullEngineLog::default();
    }

    pub fn set_duration(&self, path: impl Into<PathBuf>, duration: Duration) {
        self.lock().durations.insert(path.into(), duration);
    }

    pub fn set_title(&self, path: impl Into<PathBuf>, title: impl Into<String>) {
        self.lock().titles.insert(path.into(), title.into());
    }

    pub fn fail_on(&self, path: impl Into<PathBuf>) {
        self.lock().failing.insert(path.into());
    }

    pub fn stall_at(&self, stage: Option<WaitStage>) {
        self.lock().stall = stage;
    }

    pub fn refuse_play(&self, refuse: bool) {
        self.lock().refuse_play = refuse;
    }
}

/// Silent engine driven by the wall clock. Used when no output device opens,
/// for headless runs, and in tests.
pub struct NullEngine {
    handle: NullEngineHandle,
    current: Option<PathBuf>,
    track_duration: Option<Duration>,
    duration_reported: bool,
    state: PlayState,
    started_at: Option<Instant>,
    position_offset: Duration,
    events: Vec<EngineEvent>,
    last_position_report: Option<Instant>,
}

impl NullEngine {
    pub fn new() -> Self {
        Self::with_handle(NullEngineHandle::default())
    }

    pub fn with_handle(handle: NullEngineHandle) -> Self {
        Self {
            handle,
            current: None,
            track_duration: None,
            duration_reported: false,
            state: PlayState::Stopped,
            started_at: None,
            position_offset: Duration::ZERO,
            events: Vec::new(),
            last_position_report: None,
        }
    }

    pub fn with_default_duration(self, duration: Duration) -> Self {
        self.handle.lock().default_duration = Some(duration);
        self
    }

    pub fn handle(&self) -> NullEngineHandle {
        self.handle.clone()
    }

    fn estimate_duration(path: &Path) -> Option<Duration> {
        let file = File::open(path).ok()?;
        let source = Decoder::try_from(file).ok()?;
        source
            .total_duration()
            .filter(|duration| !duration.is_zero())
    }

    fn current_position(&self) -> Duration {
        let mut position = self.position_offset;
        if self.state == PlayState::Playing
            && let Some(started_at) = self.started_at
        {
            position = position.saturating_add(started_at.elapsed());
        }
        match self.track_duration {
            Some(duration) if !duration.is_zero() => position.min(duration),
            _ => position,
        }
    }

    fn reached_end(&self) -> bool {
        let Some(duration) = self.track_duration.filter(|d| !d.is_zero()) else {
            return false;
        };
        self.state == PlayState::Playing && self.current_position() >= duration
    }
}

impl Default for NullEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackEngine for NullEngine {
    fn load(&mut self, path: &Path) -> Result<()> {
        let (failing, stall, scripted, default_duration) = {
            let mut script = self.handle.lock();
            script.log.loads.push(path.to_path_buf());
            (
                script.failing.contains(path),
                script.stall,
                script.durations.get(path).copied(),
                script.default_duration,
            )
        };

        self.current = None;
        self.state = PlayState::Stopped;
        self.started_at = None;
        self.position_offset = Duration::ZERO;
        self.duration_reported = false;

        if failing {
            self.events.push(EngineEvent::LoadFailed(format!(
                "unsupported media: {}",
                path.display()
            )));
            return Ok(());
        }

        self.current = Some(path.to_path_buf());
        self.track_duration = scripted
            .or_else(|| Self::estimate_duration(path))
            .or(default_duration);

        match stall {
            Some(WaitStage::Load) => {}
            Some(WaitStage::Buffer) => self.events.push(EngineEvent::Loaded),
            _ => {
                self.events.push(EngineEvent::Loaded);
                self.events.push(EngineEvent::Buffered);
            }
        }
        Ok(())
    }

    fn play(&mut self) {
        let (refuse, stall) = {
            let mut script = self.handle.lock();
            script.log.plays += 1;
            (script.refuse_play, script.stall)
        };
        if refuse || self.current.is_none() {
            return;
        }

        let drained = self
            .track_duration
            .is_some_and(|duration| !duration.is_zero() && self.position_offset >= duration);
        if self.state == PlayState::Stopped && drained {
            self.position_offset = Duration::ZERO;
        }
        self.state = PlayState::Playing;
        self.started_at = Some(Instant::now());
        self.events.push(EngineEvent::StateChanged(PlayState::Playing));

        if !self.duration_reported && stall != Some(WaitStage::Duration) {
            self.duration_reported = true;
            self.events.push(EngineEvent::DurationChanged(
                self.track_duration.unwrap_or_default(),
            ));
        }
    }

    fn pause(&mut self) {
        self.handle.lock().log.pauses += 1;
        if self.current.is_none() || self.state == PlayState::Paused {
            return;
        }
        self.position_offset = self.current_position();
        self.started_at = None;
        self.state = PlayState::Paused;
        self.events.push(EngineEvent::StateChanged(PlayState::Paused));
    }

    fn set_position(&mut self, position: Duration) -> Result<()> {
        if self.current.is_none() {
            return Err(anyhow::anyhow!("no track loaded"));
        }
        self.handle.lock().log.seeks.push(position);
        self.position_offset = match self.track_duration {
            Some(duration) if !duration.is_zero() => position.min(duration),
            _ => position,
        };
        if self.state == PlayState::Playing {
            self.started_at = Some(Instant::now());
        }
        Ok(())
    }

    fn set_volume(&mut self, level: u8) {
        self.handle.lock().log.volumes.push(level.min(MAX_VOLUME));
    }

    fn set_muted(&mut self, muted: bool) {
        self.handle.lock().log.muted = muted;
    }

    fn state(&self) -> PlayState {
        self.state
    }

    fn metadata_title(&self) -> Option<String> {
        let path = self.current.as_ref()?;
        self.handle.lock().titles.get(path).cloned()
    }

    fn poll_events(&mut self) -> Vec<EngineEvent> {
        if self.reached_end() {
            self.position_offset = self.current_position();
            self.started_at = None;
            self.state = PlayState::Stopped;
            self.events.push(EngineEvent::StateChanged(PlayState::Stopped));
        } else if self.state == PlayState::Playing
            && self
                .last_position_report
                .is_none_or(|at| at.elapsed() >= POSITION_REPORT_INTERVAL)
        {
            self.last_position_report = Some(Instant::now());
            self.events
                .push(EngineEvent::PositionChanged(self.current_position()));
        }
        std::mem::take(&mut self.events)
    }

    fn name(&self) -> &'static str {
        "null"
    }
}
