use crate::config::Preferences;
use crate::error::Result;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use time::OffsetDateTime;

/// Wall-clock source in milliseconds since the Unix epoch.
pub trait Clock {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        i64::try_from(OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000)
            .unwrap_or(i64::MAX)
    }
}

/// Hand-driven clock. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(now_ms: i64) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(now_ms)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let delta = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
        self.now.fetch_add(delta, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Owns the broadcast epoch and the pause compensation applied to it.
pub struct EpochTracker {
    clock: Box<dyn Clock>,
    epoch_ms: i64,
    paused_at: Option<i64>,
}

impl EpochTracker {
    pub fn initialize(
        clock: Box<dyn Clock>,
        prefs: &mut Preferences,
        force_reset: bool,
        explicit_ms: Option<i64>,
    ) -> Result<Self> {
        let mut tracker = Self {
            epoch_ms: prefs.get().broadcast_epoch_ms,
            clock,
            paused_at: None,
        };
        tracing::debug!(epoch_ms = tracker.epoch_ms, "loaded broadcast epoch");

        if tracker.epoch_ms == 0 || force_reset {
            tracker.store(prefs, explicit_ms)?;
        }
        Ok(tracker)
    }

    pub fn epoch_ms(&self) -> i64 {
        self.epoch_ms
    }

    pub fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    /// Elapsed broadcast time. Frozen while paused, never negative.
    pub fn broadcast_offset(&self) -> Duration {
        let reference = self.paused_at.unwrap_or_else(|| self.clock.now_ms());
        let elapsed = reference.saturating_sub(self.epoch_ms);
        if elapsed <= 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(elapsed.unsigned_abs())
    }

    pub fn on_pause(&mut self) {
        if self.paused_at.is_none() {
            self.paused_at = Some(self.clock.now_ms());
        }
    }

    pub fn on_resume(&mut self, prefs: &mut Preferences) -> Result<()> {
        let Some(paused_at) = self.paused_at.take() else {
            return Ok(());
        };

        let paused_for = self.clock.now_ms().saturating_sub(paused_at);
        if paused_for <= 0 {
            return Ok(());
        }

        self.epoch_ms = self.epoch_ms.saturating_add(paused_for);
        tracing::debug!(paused_for, epoch_ms = self.epoch_ms, "shifted epoch after pause");
        let epoch_ms = self.epoch_ms;
        prefs.update(|s| s.broadcast_epoch_ms = epoch_ms)?;
        Ok(())
    }

    pub fn reset(&mut self, prefs: &mut Preferences, explicit_ms: Option<i64>) -> Result<()> {
        self.store(prefs, explicit_ms)?;
        if self.paused_at.is_some() {
            self.paused_at = Some(self.epoch_ms.max(self.clock.now_ms()));
        }
        Ok(())
    }

    fn store(&mut self, prefs: &mut Preferences, explicit_ms: Option<i64>) -> Result<()> {
        let now = self.clock.now_ms();
        self.epoch_ms = explicit_ms.filter(|ms| *ms != 0).unwrap_or(now);
        tracing::info!(epoch_ms = self.epoch_ms, "broadcast epoch reset");
        let epoch_ms = self.epoch_ms;
        prefs.update(|s| s.broadcast_epoch_ms = epoch_ms)?;
        Ok(())
    }
}
