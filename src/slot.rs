use crate::audio::{EngineEvent, PlayState, PlaybackEngine};
use crate::error::{Error, Result, WaitStage};
use crate::model::{SwitchTuning, Track};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    Loading,
    Loaded,
    Buffering,
    Buffered,
    DurationPending,
    Ready,
}

/// Cooperative cancellation flag checked between polls.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// What an active slot reports upward after draining its engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotUpdate {
    Position {
        position: Duration,
        duration: Option<Duration>,
    },
    Ended,
}

/// One reusable playback engine plus the readiness state machine around it.
pub struct Slot {
    id: usize,
    engine: Box<dyn PlaybackEngine>,
    state: SlotState,
    active: bool,
    track: Option<Track>,
    loaded: bool,
    buffered: bool,
    duration_known: bool,
    last_known_duration: Option<Duration>,
    load_error: Option<String>,
    volume: u8,
    muted: bool,
}

impl Slot {
    pub fn new(id: usize, mut engine: Box<dyn PlaybackEngine>, volume: u8) -> Self {
        engine.set_volume(volume);
        Self {
            id,
            engine,
            state: SlotState::Idle,
            active: false,
            track: None,
            loaded: false,
            buffered: false,
            duration_known: false,
            last_known_duration: None,
            load_error: None,
            volume,
            muted: false,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> SlotState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn track(&self) -> Option<&Track> {
        self.track.as_ref()
    }

    pub fn last_known_duration(&self) -> Option<Duration> {
        self.last_known_duration
    }

    pub fn is_playing(&self) -> bool {
        self.engine.state() == PlayState::Playing
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    /// Loads `track` and drives the engine until its duration is known.
    /// `yield_now` runs between polls so the caller can keep other work moving.
    pub fn prepare(
        &mut self,
        track: &Track,
        tuning: &SwitchTuning,
        cancel: &CancelToken,
        yield_now: &mut dyn FnMut(),
    ) -> Result<()> {
        self.active = false;
        self.loaded = false;
        self.buffered = false;
        self.duration_known = false;
        self.last_known_duration = None;
        self.load_error = None;
        self.track = Some(track.clone());
        self.state = SlotState::Loading;
        self.engine.poll_events();

        tracing::debug!(slot = self.id, track = %track.path.display(), "preparing slot");
        if let Err(err) = self.engine.load(track.path()) {
            self.state = SlotState::Idle;
            return Err(Error::engine_load(track.path(), format!("{err:#}")));
        }

        let primed = self.prime(tuning, cancel, yield_now);
        if let Err(err) = &primed {
            tracing::warn!(slot = self.id, %err, "slot priming aborted");
            self.engine.pause();
            self.restore_levels();
            self.state = SlotState::Idle;
        }
        primed
    }

    fn prime(
        &mut self,
        tuning: &SwitchTuning,
        cancel: &CancelToken,
        yield_now: &mut dyn FnMut(),
    ) -> Result<()> {
        self.wait_until(
            WaitStage::Load,
            Duration::from_millis(tuning.load_timeout_ms),
            tuning.poll_interval(),
            cancel,
            yield_now,
        )?;
        self.state = SlotState::Loaded;
        self.engine.pause();

        self.state = SlotState::Buffering;
        self.wait_until(
            WaitStage::Buffer,
            Duration::from_millis(tuning.buffer_timeout_ms),
            tuning.poll_interval(),
            cancel,
            yield_now,
        )?;
        self.state = SlotState::Buffered;

        if !self.duration_known {
            // Duration is only populated while actually playing and unmuted.
            self.state = SlotState::DurationPending;
            self.engine.set_muted(false);
            self.engine.set_volume(tuning.probe_volume);
            self.engine.play();
            let probed = self.wait_until(
                WaitStage::Duration,
                Duration::from_millis(tuning.duration_timeout_ms),
                tuning.poll_interval(),
                cancel,
                yield_now,
            );
            self.engine.pause();
            self.restore_levels();
            probed?;
        }

        self.state = SlotState::Ready;
        tracing::debug!(
            slot = self.id,
            duration = ?self.last_known_duration,
            "slot ready"
        );
        Ok(())
    }

    fn wait_until(
        &mut self,
        stage: WaitStage,
        timeout: Duration,
        poll_interval: Duration,
        cancel: &CancelToken,
        yield_now: &mut dyn FnMut(),
    ) -> Result<()> {
        let started = Instant::now();
        loop {
            for event in self.engine.poll_events() {
                self.apply_event(event);
            }
            if let Some(reason) = self.load_error.take() {
                let path = self
                    .track
                    .as_ref()
                    .map(|t| t.path.clone())
                    .unwrap_or_default();
                return Err(Error::engine_load(path, reason));
            }

            let reached = match stage {
                WaitStage::Load => self.loaded,
                WaitStage::Buffer => self.buffered,
                WaitStage::Duration => self.duration_known,
            };
            if reached {
                return Ok(());
            }
            if cancel.is_cancelled() {
                return Err(Error::SwitchCancelled);
            }
            if started.elapsed() >= timeout {
                return Err(Error::EngineTimeout {
                    stage,
                    waited: started.elapsed(),
                });
            }

            yield_now();
            if !poll_interval.is_zero() {
                thread::sleep(poll_interval);
            }
        }
    }

    fn apply_event(&mut self, event: EngineEvent) -> Option<SlotUpdate> {
        match event {
            EngineEvent::Loaded => self.loaded = true,
            EngineEvent::LoadFailed(reason) => self.load_error = Some(reason),
            EngineEvent::Buffered => self.buffered = true,
            EngineEvent::DurationChanged(duration) => {
                self.duration_known = true;
                self.last_known_duration = Some(duration);
            }
            EngineEvent::PositionChanged(position) if self.active => {
                return Some(SlotUpdate::Position {
                    position,
                    duration: self.last_known_duration,
                });
            }
            EngineEvent::StateChanged(PlayState::Stopped) if self.active => {
                return Some(SlotUpdate::Ended);
            }
            EngineEvent::PositionChanged(_) | EngineEvent::StateChanged(_) => {}
        }
        None
    }

    fn restore_levels(&mut self) {
        self.engine.set_volume(self.volume);
        self.engine.set_muted(self.muted);
    }

    /// Drains engine notifications. Only an active slot reports updates.
    pub fn pump(&mut self) -> Vec<SlotUpdate> {
        let events = self.engine.poll_events();
        events
            .into_iter()
            .filter_map(|event| self.apply_event(event))
            .collect()
    }

    /// Broadcast-relative position within this track, or `None` when the
    /// duration is unknown or zero.
    pub fn seek_offset(&self, broadcast_offset: Duration) -> Option<Duration> {
        let duration = self.last_known_duration.filter(|d| !d.is_zero())?;
        let millis = broadcast_offset.as_millis() % duration.as_millis();
        Some(Duration::from_millis(u64::try_from(millis).unwrap_or(0)))
    }

    pub fn activate(&mut self, resume: bool, broadcast_offset: Duration) -> Result<()> {
        self.active = true;
        self.resync(broadcast_offset);
        if resume {
            return self.play();
        }
        Ok(())
    }

    pub fn deactivate(&mut self) {
        self.active = false;
        if self.is_playing() {
            self.engine.pause();
        }
    }

    pub fn resync(&mut self, broadcast_offset: Duration) {
        let Some(position) = self.seek_offset(broadcast_offset) else {
            return;
        };
        tracing::debug!(slot = self.id, ?position, "seeking to broadcast position");
        if let Err(err) = self.engine.set_position(position) {
            tracing::warn!(slot = self.id, error = %format!("{err:#}"), "seek failed");
        }
    }

    pub fn play(&mut self) -> Result<()> {
        self.engine.play();
        if !self.is_playing() {
            return Err(Error::EngineNotPlaying);
        }
        Ok(())
    }

    pub fn pause(&mut self) {
        self.engine.pause();
    }

    pub fn set_volume(&mut self, level: u8) {
        self.volume = level;
        self.engine.set_volume(level);
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
        self.engine.set_muted(muted);
    }

    /// Embedded title if the engine has one, else the file name without extension.
    pub fn display_name(&self) -> Option<String> {
        let track = self.track.as_ref()?;
        Some(
            self.engine
                .metadata_title()
                .filter(|title| !title.trim().is_empty())
                .unwrap_or_else(|| track.file_label()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{NullEngine, NullEngineHandle};

    fn slot_with(duration: Duration) -> (Slot, NullEngineHandle) {
        let engine = NullEngine::new().with_default_duration(duration);
        let handle = engine.handle();
        (Slot::new(1, Box::new(engine), 70), handle)
    }

    fn prepare(slot: &mut Slot, path: &str) -> Result<()> {
        slot.prepare(
            &Track::new(path),
            &SwitchTuning::immediate(),
            &CancelToken::default(),
            &mut || {},
        )
    }

    #[test]
    fn prepare_reaches_ready_silently_and_paused() {
        let (mut slot, handle) = slot_with(Duration::from_secs(200));
        prepare(&mut slot, "/radio/flash.mp3").expect("prepare");

        assert_eq!(slot.state(), SlotState::Ready);
        assert!(!slot.is_active());
        assert!(!slot.is_playing());
        assert_eq!(slot.last_known_duration(), Some(Duration::from_secs(200)));
        let log = handle.log();
        assert_eq!(log.volumes, vec![70, 1, 70]);
        assert_eq!(log.plays, 1);
    }

    #[test]
    fn load_failure_surfaces_and_returns_to_idle() {
        let (mut slot, handle) = slot_with(Duration::from_secs(200));
        handle.fail_on("/radio/broken.mp3");
        let err = prepare(&mut slot, "/radio/broken.mp3").expect_err("should fail");
        assert!(matches!(err, Error::EngineLoad { .. }));
        assert_eq!(slot.state(), SlotState::Idle);
    }

    #[test]
    fn stalled_duration_probe_times_out_and_restores_volume() {
        let (mut slot, handle) = slot_with(Duration::from_secs(200));
        handle.stall_at(Some(WaitStage::Duration));
        let err = prepare(&mut slot, "/radio/vrock.mp3").expect_err("should time out");
        assert!(matches!(
            err,
            Error::EngineTimeout {
                stage: WaitStage::Duration,
                ..
            }
        ));
        assert!(!slot.is_playing());
        assert_eq!(handle.log().volumes.last(), Some(&70));
        assert_eq!(slot.state(), SlotState::Idle);
    }

    #[test]
    fn stalled_buffering_times_out_in_buffer_stage() {
        let (mut slot, handle) = slot_with(Duration::from_secs(200));
        handle.stall_at(Some(WaitStage::Buffer));
        let err = prepare(&mut slot, "/radio/vrock.mp3").expect_err("should time out");
        assert!(matches!(
            err,
            Error::EngineTimeout {
                stage: WaitStage::Buffer,
                ..
            }
        ));
    }

    #[test]
    fn cancellation_aborts_prepare() {
        let (mut slot, handle) = slot_with(Duration::from_secs(200));
        handle.stall_at(Some(WaitStage::Load));
        let cancel = CancelToken::default();
        let trigger = cancel.clone();
        let err = slot
            .prepare(
                &Track::new("/radio/kchat.mp3"),
                &SwitchTuning::immediate(),
                &cancel,
                &mut || trigger.cancel(),
            )
            .expect_err("should be cancelled");
        assert!(matches!(err, Error::SwitchCancelled));
    }

    #[test]
    fn seek_offset_wraps_by_track_length() {
        let (mut slot, _) = slot_with(Duration::from_secs(200));
        prepare(&mut slot, "/radio/b.mp3").expect("prepare");
        assert_eq!(
            slot.seek_offset(Duration::from_millis(185_000)),
            Some(Duration::from_millis(185_000))
        );
        assert_eq!(
            slot.seek_offset(Duration::from_millis(405_000)),
            Some(Duration::from_millis(5_000))
        );
    }

    #[test]
    fn zero_length_track_never_seeks() {
        let (mut slot, handle) = slot_with(Duration::ZERO);
        prepare(&mut slot, "/radio/silence.mp3").expect("prepare");
        assert_eq!(slot.seek_offset(Duration::from_secs(99)), None);
        slot.activate(false, Duration::from_secs(99)).expect("activate");
        assert!(handle.log().seeks.is_empty());
    }

    #[test]
    fn activate_seeks_and_resumes() {
        let (mut slot, handle) = slot_with(Duration::from_secs(90));
        prepare(&mut slot, "/radio/c.mp3").expect("prepare");
        slot.activate(true, Duration::from_secs(100)).expect("activate");
        assert!(slot.is_active());
        assert!(slot.is_playing());
        assert_eq!(handle.log().seeks, vec![Duration::from_secs(10)]);
    }

    #[test]
    fn activate_reports_engine_not_playing() {
        let (mut slot, handle) = slot_with(Duration::from_secs(90));
        prepare(&mut slot, "/radio/c.mp3").expect("prepare");
        handle.refuse_play(true);
        let err = slot
            .activate(true, Duration::ZERO)
            .expect_err("engine refuses");
        assert!(matches!(err, Error::EngineNotPlaying));
        assert!(slot.is_active());
    }

    #[test]
    fn deactivate_pauses_playing_engine() {
        let (mut slot, _) = slot_with(Duration::from_secs(90));
        prepare(&mut slot, "/radio/c.mp3").expect("prepare");
        slot.activate(true, Duration::ZERO).expect("activate");
        slot.deactivate();
        assert!(!slot.is_active());
        assert!(!slot.is_playing());
    }

    #[test]
    fn display_name_prefers_metadata_title() {
        let (mut slot, handle) = slot_with(Duration::from_secs(90));
        handle.set_title("/radio/wctr.mp3", "West Coast Talk Radio");
        prepare(&mut slot, "/radio/wctr.mp3").expect("prepare");
        assert_eq!(slot.display_name().as_deref(), Some("West Coast Talk Radio"));

        prepare(&mut slot, "/radio/fever.105.mp3").expect("prepare");
        assert_eq!(slot.display_name().as_deref(), Some("fever.105"));
    }

    proptest::proptest! {
        #[test]
        fn seek_offset_is_within_track(duration_ms in 1u64..10_000_000, offset_ms in 0u64..u64::from(u32::MAX)) {
            let (mut slot, _) = slot_with(Duration::from_millis(duration_ms));
            prepare(&mut slot, "/radio/any.mp3").expect("prepare");
            let position = slot
                .seek_offset(Duration::from_millis(offset_ms))
                .expect("known duration");
            proptest::prop_assert!(position < Duration::from_millis(duration_ms));
        }
    }
}
