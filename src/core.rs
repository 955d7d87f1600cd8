use crate::audio::PlaybackEngine;
use crate::clock::{Clock, EpochTracker};
use crate::config::{self, Preferences, SettingsStore};
use crate::display::{DisplaySink, NO_TRACKS_LABEL, Notice};
use crate::error::{Error, Result, Severity};
use crate::library::Catalog;
use crate::model::{Settings, Theme, Track};
use crate::switcher::{SwitchContext, SwitchCoordinator, SwitchRequests};
use std::path::{Path, PathBuf};

/// Collaborators the radio is assembled from.
pub struct RadioParts {
    pub engines: [Box<dyn PlaybackEngine>; 2],
    pub store: Box<dyn SettingsStore>,
    pub clock: Box<dyn Clock>,
    pub display: Box<dyn DisplaySink>,
}

#[derive(Debug, Clone, Default)]
pub struct StartupOptions {
    pub directory: Option<PathBuf>,
    pub reset_clock: bool,
    pub epoch_ms: Option<i64>,
}

/// Transport controls. Every operation settles before returning; failures
/// are reported to the display and leave the last good state in place.
pub struct RadioCore {
    prefs: Preferences,
    epoch: EpochTracker,
    catalog: Catalog,
    switcher: SwitchCoordinator,
    display: Box<dyn DisplaySink>,
    controls_enabled: bool,
}

impl RadioCore {
    pub fn new(parts: RadioParts, options: &StartupOptions) -> Result<Self> {
        let RadioParts {
            engines,
            store,
            clock,
            display,
        } = parts;

        let mut prefs = Preferences::load(store)?;
        let mut epoch = EpochTracker::initialize(
            clock,
            &mut prefs,
            options.reset_clock || options.epoch_ms.is_some(),
            options.epoch_ms,
        )?;
        // Nothing plays until the first `play`, which resumes the clock.
        epoch.on_pause();
        let settings = prefs.get();
        let switcher = SwitchCoordinator::new(engines, settings.volume.min(100), settings.tuning);

        Ok(Self {
            prefs,
            epoch,
            catalog: Catalog::default(),
            switcher,
            display,
            controls_enabled: false,
        })
    }

    /// Scans the configured directory, tunes to the persisted station and plays.
    pub fn start(&mut self, options: &StartupOptions) {
        let directory = options
            .directory
            .clone()
            .unwrap_or_else(|| self.prefs.get().scan_directory.clone());
        let station = self.prefs.get().current_station;
        self.update_directory(&directory, station);
        self.play();
    }

    pub fn settings(&self) -> &Settings {
        self.prefs.get()
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn switcher(&self) -> &SwitchCoordinator {
        &self.switcher
    }

    pub fn epoch(&self) -> &EpochTracker {
        &self.epoch
    }

    pub fn requests(&self) -> SwitchRequests {
        self.switcher.requests()
    }

    pub fn station(&self) -> Option<usize> {
        self.switcher.station()
    }

    pub fn controls_enabled(&self) -> bool {
        self.controls_enabled
    }

    pub fn is_playing(&self) -> bool {
        self.controls_enabled && self.switcher.is_playing()
    }

    pub fn is_muted(&self) -> bool {
        self.switcher.is_muted()
    }

    pub fn volume(&self) -> u8 {
        self.prefs.get().volume
    }

    pub fn play_pause(&mut self) {
        if !self.controls_enabled {
            return;
        }
        if self.is_playing() {
            self.pause();
        } else {
            self.play();
        }
    }

    pub fn play(&mut self) {
        if !self.controls_enabled || self.is_playing() {
            return;
        }
        if let Err(err) = self.epoch.on_resume(&mut self.prefs) {
            self.report(err);
        }
        if let Err(err) = self.switcher.play() {
            self.epoch.on_pause();
            self.report(err);
        }
    }

    pub fn pause(&mut self) {
        self.epoch.on_pause();
        self.switcher.pause();
    }

    pub fn next(&mut self) {
        if !self.controls_enabled {
            return;
        }
        let current = self.switcher.station().unwrap_or(0);
        if let Some(index) = self.catalog.next_index(current) {
            self.select_station(index);
        }
    }

    pub fn previous(&mut self) {
        if !self.controls_enabled {
            return;
        }
        let current = self.switcher.station().unwrap_or(0);
        if let Some(index) = self.catalog.previous_index(current) {
            self.select_station(index);
        }
    }

    pub fn select_station(&mut self, index: usize) {
        if self.catalog.is_empty() {
            self.report(Error::NoStationsAvailable);
            return;
        }

        self.display.controls_enabled(false);
        let mut ctx = SwitchContext {
            catalog: &self.catalog,
            epoch: &self.epoch,
            prefs: &mut self.prefs,
            display: self.display.as_mut(),
        };
        match self.switcher.switch_to(index, &mut ctx) {
            Ok(outcome) => {
                if let Some(warning) = outcome.warning {
                    self.report(warning);
                }
            }
            Err(err) => self.report(err),
        }
        self.display.controls_enabled(self.controls_enabled);
    }

    pub fn set_volume(&mut self, level: u8) {
        let level = level.min(100);
        self.switcher.set_volume(level);
        if let Err(err) = self.prefs.update(|s| s.volume = level) {
            self.report(err.into());
        }
    }

    pub fn toggle_mute(&mut self) {
        let muted = !self.switcher.is_muted();
        self.switcher.set_muted(muted);
    }

    pub fn change_directory(&mut self, path: &Path) {
        self.update_directory(path, 0);
    }

    /// Replaces the catalog with an explicit track list instead of scanning.
    pub fn load_tracks(&mut self, mut tracks: Vec<Track>) {
        let limit = self.prefs.get().tuning.max_stations;
        if tracks.len() > limit {
            tracks.truncate(limit);
            self.report(Error::CatalogCapacityExceeded { limit });
        }
        self.catalog = Catalog::from_tracks(tracks);
        self.tune_catalog(0);
    }

    pub fn reset_broadcast_clock(&mut self) {
        if let Err(err) = self.epoch.reset(&mut self.prefs, None) {
            self.report(err);
        }
        if !self.controls_enabled {
            return;
        }
        self.switcher.resync(self.epoch.broadcast_offset());
    }

    pub fn set_always_on_top(&mut self, enabled: bool) {
        if let Err(err) = self.prefs.update(|s| s.always_on_top = enabled) {
            self.report(err.into());
            return;
        }
        self.display.notify(Notice::info(
            "Application must be restarted for changes to take effect.",
        ));
    }

    pub fn set_theme(&mut self, theme: Theme) {
        if let Err(err) = self.prefs.update(|s| s.theme = theme) {
            self.report(err.into());
        }
    }

    /// Applies queued station requests and drains engine notifications.
    pub fn pump(&mut self) {
        if let Some(index) = self.switcher.requests().take() {
            self.select_station(index);
        }
        let keep_playing = self.controls_enabled && !self.epoch.is_paused();
        self.switcher
            .pump(&self.epoch, keep_playing, self.display.as_mut());
    }

    fn update_directory(&mut self, directory: &Path, station: usize) {
        let normalized = config::normalize_path(directory);
        if let Err(err) = self
            .prefs
            .update(|s| s.scan_directory = normalized.clone())
        {
            self.report(err.into());
        }

        let limit = self.prefs.get().tuning.max_stations;
        let outcome = self.catalog.rescan(&normalized, limit);
        if outcome.truncated {
            self.report(Error::CatalogCapacityExceeded { limit });
        }
        self.tune_catalog(station);
    }

    fn tune_catalog(&mut self, station: usize) {
        if self.catalog.is_empty() {
            self.disable_player();
            return;
        }

        let station = if station >= self.catalog.len() {
            tracing::warn!(
                requested = station,
                available = self.catalog.len(),
                "persisted station unavailable, tuning to 0"
            );
            0
        } else {
            station
        };

        self.controls_enabled = true;
        self.display.controls_enabled(true);
        self.select_station(station);
    }

    fn disable_player(&mut self) {
        self.display.show_station(NO_TRACKS_LABEL);
        self.pause();
        self.switcher.park();
        self.controls_enabled = false;
        self.display.controls_enabled(false);
    }

    fn report(&mut self, err: Error) {
        match err.severity() {
            Severity::Error => tracing::error!(%err, "operation failed"),
            Severity::Warning => tracing::warn!(%err, "operation warning"),
            Severity::Info => tracing::info!(%err, "operation notice"),
        }
        if matches!(err, Error::SwitchCancelled) {
            return;
        }
        self.display.notify((&err).into());
    }
}
