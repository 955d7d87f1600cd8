use crate::audio::PlaybackEngine;
use crate::clock::EpochTracker;
use crate::config::Preferences;
use crate::display::{DisplaySink, RETUNING_LABEL, format_position};
use crate::error::{Error, Result};
use crate::library::Catalog;
use crate::model::SwitchTuning;
use crate::slot::{CancelToken, Slot, SlotUpdate};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Station requests that may arrive from outside the switching thread.
/// A request made while a switch is in flight supersedes its target.
#[derive(Debug, Clone, Default)]
pub struct SwitchRequests {
    pending: Arc<Mutex<Option<usize>>>,
    in_flight: Arc<AtomicBool>,
    cancel: CancelToken,
}

impl SwitchRequests {
    pub fn request(&self, index: usize) {
        if let Ok(mut pending) = self.pending.lock() {
            *pending = Some(index);
        }
        if self.in_flight.load(Ordering::SeqCst) {
            self.cancel.cancel();
        }
    }

    pub fn take(&self) -> Option<usize> {
        self.pending.lock().ok().and_then(|mut pending| pending.take())
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn begin(&self) {
        self.cancel.reset();
        self.in_flight.store(true, Ordering::SeqCst);
    }

    fn finish(&self) {
        self.in_flight.store(false, Ordering::SeqCst);
        self.cancel.reset();
    }
}

pub struct SwitchContext<'a> {
    pub catalog: &'a Catalog,
    pub epoch: &'a EpochTracker,
    pub prefs: &'a mut Preferences,
    pub display: &'a mut dyn DisplaySink,
}

#[derive(Debug)]
pub struct SwitchOutcome {
    pub station: usize,
    pub name: String,
    pub warning: Option<Error>,
}

/// Owns both slots and hands the active role between them.
pub struct SwitchCoordinator {
    slots: [Slot; 2],
    current: usize,
    station: Option<usize>,
    tuning: SwitchTuning,
    requests: SwitchRequests,
    frozen_playing: Option<bool>,
    restart_pending: bool,
}

impl SwitchCoordinator {
    pub fn new(engines: [Box<dyn PlaybackEngine>; 2], volume: u8, tuning: SwitchTuning) -> Self {
        let [first, second] = engines;
        tracing::debug!(
            engines = ?[first.name(), second.name()],
            "creating playback slots"
        );
        Self {
            slots: [Slot::new(1, first, volume), Slot::new(2, second, volume)],
            current: 0,
            station: None,
            tuning,
            requests: SwitchRequests::default(),
            frozen_playing: None,
            restart_pending: false,
        }
    }

    pub fn requests(&self) -> SwitchRequests {
        self.requests.clone()
    }

    pub fn station(&self) -> Option<usize> {
        self.station
    }

    pub fn slots(&self) -> &[Slot; 2] {
        &self.slots
    }

    pub fn active_slot(&self) -> Option<&Slot> {
        let slot = &self.slots[self.current];
        slot.is_active().then_some(slot)
    }

    fn active_slot_mut(&mut self) -> Option<&mut Slot> {
        let slot = &mut self.slots[self.current];
        slot.is_active().then_some(slot)
    }

    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_active()).count()
    }

    /// Playing state of the active slot, frozen for the length of a switch.
    pub fn is_playing(&self) -> bool {
        self.frozen_playing
            .unwrap_or_else(|| self.active_slot().is_some_and(Slot::is_playing))
    }

    pub fn is_muted(&self) -> bool {
        self.slots[self.current].is_muted()
    }

    pub fn station_name(&self) -> Option<String> {
        self.active_slot().and_then(Slot::display_name)
    }

    pub fn switch_to(&mut self, index: usize, ctx: &mut SwitchContext<'_>) -> Result<SwitchOutcome> {
        let started = Instant::now();
        let was_playing = self.is_playing();
        self.frozen_playing = Some(was_playing);
        self.requests.begin();

        let result = self.run_switch(index, was_playing, started, ctx);

        self.requests.finish();
        self.frozen_playing = None;
        result
    }

    fn run_switch(
        &mut self,
        index: usize,
        was_playing: bool,
        started: Instant,
        ctx: &mut SwitchContext<'_>,
    ) -> Result<SwitchOutcome> {
        let tuning = self.tuning;
        let keep_playing = was_playing && !ctx.epoch.is_paused();
        let mut target = index;

        loop {
            let track = match ctx.catalog.get(target) {
                Ok(track) => track.clone(),
                Err(err) => return Err(self.abort(err, keep_playing, ctx)),
            };
            if let Err(err) = ctx.prefs.update(|s| s.current_station = target) {
                return Err(self.abort(err.into(), keep_playing, ctx));
            }
            ctx.display.show_station(RETUNING_LABEL);
            tracing::info!(station = target, track = %track.path.display(), "switching station");

            let cancel = self.requests.cancel.clone();
            let (current, standby) = self.roles_mut();
            let display = &mut *ctx.display;
            let mut current_ended = false;
            let prepared = standby.prepare(&track, &tuning, &cancel, &mut || {
                for update in current.pump() {
                    match update {
                        SlotUpdate::Position { position, duration } => {
                            display.show_position(&format_position(position, duration));
                        }
                        SlotUpdate::Ended => current_ended = true,
                    }
                }
            });
            if current_ended {
                self.restart_pending = true;
            }

            match prepared {
                Ok(()) => break,
                Err(Error::SwitchCancelled) => {
                    self.requests.cancel.reset();
                    match self.requests.take() {
                        Some(next) => {
                            tracing::info!(from = target, to = next, "switch retargeted");
                            target = next;
                        }
                        None => return Err(self.abort(Error::SwitchCancelled, keep_playing, ctx)),
                    }
                }
                Err(err) => return Err(self.abort(err, keep_playing, ctx)),
            }
        }

        self.restart_pending = false;
        let (current, _) = self.roles_mut();
        current.deactivate();

        let deadline = started + tuning.dramatic_pause();
        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            for slot in &mut self.slots {
                slot.pump();
            }
            let step = if tuning.poll_interval().is_zero() {
                deadline - now
            } else {
                tuning.poll_interval().min(deadline - now)
            };
            thread::sleep(step);
        }

        self.current = 1 - self.current;

        let incoming = &mut self.slots[self.current];
        let warning = incoming
            .activate(was_playing, ctx.epoch.broadcast_offset())
            .err();
        let name = incoming.display_name().unwrap_or_default();
        tracing::info!(station = target, name = %name, slot = incoming.id(), "station switched");
        ctx.display.show_station(&name);
        self.station = Some(target);

        Ok(SwitchOutcome {
            station: target,
            name,
            warning,
        })
    }

    fn roles_mut(&mut self) -> (&mut Slot, &mut Slot) {
        let [first, second] = &mut self.slots;
        if self.current == 0 {
            (first, second)
        } else {
            (second, first)
        }
    }

    /// Leaves the current station as it was before the switch began,
    /// restarting it if its track finished while the standby was loading.
    fn abort(&mut self, err: Error, keep_playing: bool, ctx: &mut SwitchContext<'_>) -> Error {
        if std::mem::take(&mut self.restart_pending)
            && keep_playing
            && let Some(slot) = self.active_slot_mut()
        {
            tracing::debug!(slot = slot.id(), "track ended during aborted switch, restarting");
            slot.resync(ctx.epoch.broadcast_offset());
            if let Err(restart) = slot.play() {
                ctx.display.notify((&restart).into());
            }
        }
        if let Some(name) = self.station_name() {
            ctx.display.show_station(&name);
        }
        err
    }

    /// Drains both engines. A finished track restarts at its broadcast
    /// position when `keep_playing` is set.
    pub fn pump(&mut self, epoch: &EpochTracker, keep_playing: bool, display: &mut dyn DisplaySink) {
        for index in 0..self.slots.len() {
            let updates = self.slots[index].pump();
            for update in updates {
                match update {
                    SlotUpdate::Position { position, duration } => {
                        display.show_position(&format_position(position, duration));
                    }
                    SlotUpdate::Ended if keep_playing => {
                        let slot = &mut self.slots[index];
                        tracing::debug!(slot = slot.id(), "track ended, restarting station");
                        slot.resync(epoch.broadcast_offset());
                        if let Err(err) = slot.play() {
                            display.notify((&err).into());
                        }
                    }
                    SlotUpdate::Ended => {}
                }
            }
        }
    }

    pub fn play(&mut self) -> Result<()> {
        self.active_slot_mut()
            .ok_or(Error::NoStationsAvailable)?
            .play()
    }

    pub fn pause(&mut self) {
        if let Some(slot) = self.active_slot_mut() {
            slot.pause();
        }
    }

    pub fn resync(&mut self, broadcast_offset: Duration) {
        if let Some(slot) = self.active_slot_mut() {
            slot.resync(broadcast_offset);
        }
    }

    pub fn set_volume(&mut self, level: u8) {
        for slot in &mut self.slots {
            slot.set_volume(level);
        }
    }

    pub fn set_muted(&mut self, muted: bool) {
        for slot in &mut self.slots {
            slot.set_muted(muted);
        }
    }

    /// Stops output and drops the active role; used when no stations remain.
    pub fn park(&mut self) {
        for slot in &mut self.slots {
            slot.deactivate();
        }
        self.station = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{NullEngine, NullEngineHandle};
    use crate::clock::ManualClock;
    use crate::config::{MemoryStore, SettingsStore};
    use crate::display::SharedScreen;
    use crate::error::WaitStage;
    use crate::model::{Settings, Track};
    use std::path::PathBuf;

    struct Rig {
        coordinator: SwitchCoordinator,
        handles: [NullEngineHandle; 2],
        catalog: Catalog,
        epoch: EpochTracker,
        prefs: Preferences,
        store: MemoryStore,
        screen: SharedScreen,
    }

    impl Rig {
        fn new(durations: &[(&str, u64)]) -> Self {
            let engines = [NullEngine::new(), NullEngine::new()];
            let handles = [engines[0].handle(), engines[1].handle()];
            for handle in &handles {
                for (path, secs) in durations {
                    handle.set_duration(*path, Duration::from_secs(*secs));
                }
            }
            let [a, b] = engines;
            let coordinator =
                SwitchCoordinator::new([Box::new(a), Box::new(b)], 50, SwitchTuning::immediate());

            let store = MemoryStore::new(Settings::default());
            let mut prefs = Preferences::load(Box::new(store.clone())).expect("prefs");
            let clock = ManualClock::new(1_000_000);
            let epoch = EpochTracker::initialize(Box::new(clock), &mut prefs, true, Some(815_000))
                .expect("epoch");
            let catalog = Catalog::from_tracks(
                durations.iter().map(|(path, _)| Track::new(*path)).collect(),
            );
            Self {
                coordinator,
                handles,
                catalog,
                epoch,
                prefs,
                store,
                screen: SharedScreen::default(),
            }
        }

        fn switch(&mut self, index: usize) -> Result<SwitchOutcome> {
            let mut ctx = SwitchContext {
                catalog: &self.catalog,
                epoch: &self.epoch,
                prefs: &mut self.prefs,
                display: &mut self.screen,
            };
            self.coordinator.switch_to(index, &mut ctx)
        }

        fn seeks(&self) -> Vec<Duration> {
            self.handles.iter().flat_map(|h| h.log().seeks).collect()
        }

        fn clear_logs(&self) {
            for handle in &self.handles {
                handle.clear_log();
            }
        }
    }

    /// Rejects any save that tunes to the given station.
    struct RejectStation(usize);

    impl SettingsStore for RejectStation {
        fn load(&self) -> anyhow::Result<Settings> {
            Ok(Settings::default())
        }

        fn save(&mut self, settings: &Settings) -> anyhow::Result<()> {
            if settings.current_station == self.0 {
                anyhow::bail!("disk full");
            }
            Ok(())
        }
    }

    /// Station "a" is 30 ms long and has already run off its end, unpolled.
    fn rig_with_finished_station() -> Rig {
        let mut rig = Rig::new(&[("/r/a.mp3", 180), ("/r/b.mp3", 200)]);
        for handle in &rig.handles {
            handle.set_duration("/r/a.mp3", Duration::from_millis(30));
        }
        rig.switch(0).expect("first");
        rig.coordinator.play().expect("play");
        thread::sleep(Duration::from_millis(60));
        rig.clear_logs();
        rig
    }

    fn wait_for_load(handles: &[NullEngineHandle; 2], path: &str) {
        let path = PathBuf::from(path);
        while !handles.iter().any(|h| h.log().loads.contains(&path)) {
            thread::yield_now();
        }
    }

    #[test]
    fn switch_activates_exactly_one_slot_at_broadcast_offset() {
        let mut rig = Rig::new(&[("/r/a.mp3", 180), ("/r/b.mp3", 200), ("/r/c.mp3", 90)]);
        let outcome = rig.switch(1).expect("switch");

        assert_eq!(outcome.station, 1);
        assert_eq!(outcome.name, "b");
        assert_eq!(rig.coordinator.active_count(), 1);
        assert_eq!(rig.coordinator.station(), Some(1));
        assert_eq!(rig.store.snapshot().current_station, 1);
        assert_eq!(rig.screen.snapshot().station, "b");
        let seeks: Vec<Duration> = rig
            .handles
            .iter()
            .flat_map(|h| h.log().seeks)
            .collect();
        assert_eq!(seeks, vec![Duration::from_millis(185_000)]);
    }

    #[test]
    fn roles_alternate_between_slots() {
        let mut rig = Rig::new(&[("/r/a.mp3", 180), ("/r/b.mp3", 200)]);
        rig.switch(0).expect("first");
        let first_id = rig.coordinator.active_slot().expect("active").id();
        rig.switch(1).expect("second");
        let second_id = rig.coordinator.active_slot().expect("active").id();
        assert_ne!(first_id, second_id);
        assert_eq!(rig.coordinator.active_count(), 1);
    }

    #[test]
    fn failed_prepare_keeps_previous_station_active() {
        let mut rig = Rig::new(&[("/r/a.mp3", 180), ("/r/b.mp3", 200)]);
        rig.switch(0).expect("first");
        rig.coordinator.play().expect("play");
        for handle in &rig.handles {
            handle.fail_on("/r/b.mp3");
        }

        let err = rig.switch(1).expect_err("load fails");
        assert!(matches!(err, Error::EngineLoad { .. }));
        assert_eq!(rig.coordinator.station(), Some(0));
        assert_eq!(rig.coordinator.active_count(), 1);
        assert!(rig.coordinator.is_playing());
        assert_eq!(rig.screen.snapshot().station, "a");
    }

    #[test]
    fn stalled_engine_aborts_switch_without_flipping() {
        let mut rig = Rig::new(&[("/r/a.mp3", 180), ("/r/b.mp3", 200)]);
        rig.switch(0).expect("first");
        let before = rig.coordinator.active_slot().expect("active").id();
        for handle in &rig.handles {
            handle.stall_at(Some(WaitStage::Duration));
        }
        let err = rig.switch(1).expect_err("stall");
        assert!(matches!(err, Error::EngineTimeout { .. }));
        assert_eq!(rig.coordinator.active_slot().expect("active").id(), before);
    }

    #[test]
    fn out_of_range_switch_changes_nothing() {
        let mut rig = Rig::new(&[("/r/a.mp3", 180)]);
        let err = rig.switch(3).expect_err("out of range");
        assert!(matches!(err, Error::IndexOutOfRange { index: 3, count: 1 }));
        assert_eq!(rig.coordinator.active_count(), 0);
        assert_eq!(rig.store.snapshot().current_station, 0);
    }

    #[test]
    fn playing_state_carries_across_switch() {
        let mut rig = Rig::new(&[("/r/a.mp3", 180), ("/r/b.mp3", 200)]);
        rig.switch(0).expect("first");
        rig.coordinator.play().expect("play");
        rig.switch(1).expect("second");
        assert!(rig.coordinator.is_playing());

        rig.coordinator.pause();
        rig.switch(0).expect("third");
        assert!(!rig.coordinator.is_playing());
    }

    #[test]
    fn request_during_switch_retargets_it() {
        let mut rig = Rig::new(&[("/r/a.mp3", 180), ("/r/b.mp3", 200), ("/r/c.mp3", 90)]);
        rig.switch(0).expect("first");
        for handle in &rig.handles {
            handle.stall_at(Some(WaitStage::Load));
        }

        let requests = rig.coordinator.requests();
        let handles = rig.handles.clone();
        let helper = thread::spawn(move || {
            wait_for_load(&handles, "/r/b.mp3");
            assert!(requests.is_in_flight());
            for handle in &handles {
                handle.stall_at(None);
            }
            requests.request(2);
        });

        let outcome = rig.switch(1).expect("retargeted switch");
        helper.join().expect("helper thread");
        assert_eq!(outcome.station, 2);
        assert_eq!(rig.store.snapshot().current_station, 2);
        assert_eq!(rig.coordinator.active_count(), 1);
    }

    #[test]
    fn track_ending_during_failed_switch_restarts_old_station() {
        let mut rig = rig_with_finished_station();
        for handle in &rig.handles {
            handle.stall_at(Some(WaitStage::Load));
        }

        let err = rig.switch(1).expect_err("stalled load");
        assert!(matches!(err, Error::EngineTimeout { .. }));
        assert_eq!(rig.coordinator.station(), Some(0));
        assert!(rig.coordinator.is_playing());
        assert_eq!(rig.seeks(), vec![Duration::from_millis(20)]);
        assert_eq!(rig.screen.snapshot().station, "a");
    }

    #[test]
    fn pump_restarts_finished_track_at_broadcast_position() {
        let mut rig = rig_with_finished_station();
        rig.coordinator.pump(&rig.epoch, true, &mut rig.screen);

        assert!(rig.coordinator.is_playing());
        assert_eq!(rig.seeks(), vec![Duration::from_millis(20)]);
    }

    #[test]
    fn pump_leaves_finished_track_stopped_when_not_playing() {
        let mut rig = rig_with_finished_station();
        rig.coordinator.pump(&rig.epoch, false, &mut rig.screen);

        assert!(!rig.coordinator.is_playing());
        assert!(rig.seeks().is_empty());
    }

    #[test]
    fn request_cancels_only_an_in_flight_switch() {
        let requests = SwitchRequests::default();
        requests.request(1);
        assert!(!requests.cancel.is_cancelled());

        requests.begin();
        assert!(requests.is_in_flight());
        assert!(!requests.cancel.is_cancelled());
        requests.request(2);
        assert!(requests.cancel.is_cancelled());
        assert_eq!(requests.take(), Some(2));

        requests.finish();
        assert!(!requests.is_in_flight());
        assert!(!requests.cancel.is_cancelled());
    }

    #[test]
    fn settings_failure_on_retarget_restores_station_label() {
        let mut rig = Rig::new(&[("/r/a.mp3", 180), ("/r/b.mp3", 200), ("/r/c.mp3", 90)]);
        rig.switch(0).expect("first");
        rig.prefs = Preferences::load(Box::new(RejectStation(2))).expect("prefs");
        for handle in &rig.handles {
            handle.stall_at(Some(WaitStage::Load));
        }

        let requests = rig.coordinator.requests();
        let handles = rig.handles.clone();
        let helper = thread::spawn(move || {
            wait_for_load(&handles, "/r/b.mp3");
            requests.request(2);
        });

        let err = rig.switch(1).expect_err("retarget cannot be saved");
        helper.join().expect("helper thread");
        assert!(matches!(err, Error::Settings(_)));
        assert_eq!(rig.coordinator.station(), Some(0));
        assert_eq!(rig.coordinator.active_count(), 1);
        assert_eq!(rig.screen.snapshot().station, "a");
    }
}
