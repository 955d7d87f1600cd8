use crate::error::{Error, Severity};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

pub const RETUNING_LABEL: &str = "Re-tuning...";
pub const NO_TRACKS_LABEL: &str = "No tracks found...";
const MAX_NOTICES: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub severity: Severity,
    pub message: String,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Info,
            message: message.into(),
        }
    }
}

impl From<&Error> for Notice {
    fn from(err: &Error) -> Self {
        Self {
            severity: err.severity(),
            message: err.to_string(),
        }
    }
}

/// Where the player sends what the user should see.
pub trait DisplaySink {
    fn show_station(&mut self, text: &str);
    fn show_position(&mut self, text: &str);
    fn notify(&mut self, notice: Notice);
    fn controls_enabled(&mut self, enabled: bool);
}

/// Sink that only logs. Used when nothing is drawing.
#[derive(Debug, Default)]
pub struct LogSink;

impl DisplaySink for LogSink {
    fn show_station(&mut self, text: &str) {
        tracing::info!(station = text, "now playing");
    }

    fn show_position(&mut self, text: &str) {
        tracing::trace!(position = text, "position");
    }

    fn notify(&mut self, notice: Notice) {
        match notice.severity {
            Severity::Info => tracing::info!("{}", notice.message),
            Severity::Warning => tracing::warn!("{}", notice.message),
            Severity::Error => tracing::error!("{}", notice.message),
        }
    }

    fn controls_enabled(&mut self, enabled: bool) {
        tracing::debug!(enabled, "controls toggled");
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Screen {
    pub station: String,
    pub position: String,
    pub notices: Vec<Notice>,
    pub controls_enabled: bool,
    pub dirty: bool,
}

impl Default for Screen {
    fn default() -> Self {
        Self {
            station: String::new(),
            position: format_position(Duration::ZERO, None),
            notices: Vec::new(),
            controls_enabled: true,
            dirty: true,
        }
    }
}

impl Screen {
    pub fn latest_notice(&self) -> Option<&Notice> {
        self.notices.last()
    }
}

/// Screen state shared between the player and whatever draws it.
#[derive(Debug, Clone, Default)]
pub struct SharedScreen(Rc<RefCell<Screen>>);

impl SharedScreen {
    pub fn snapshot(&self) -> Screen {
        self.0.borrow().clone()
    }

    pub fn take_dirty(&self) -> bool {
        std::mem::take(&mut self.0.borrow_mut().dirty)
    }

    pub fn dismiss_notice(&self) {
        let mut screen = self.0.borrow_mut();
        screen.notices.pop();
        screen.dirty = true;
    }
}

impl DisplaySink for SharedScreen {
    fn show_station(&mut self, text: &str) {
        let mut screen = self.0.borrow_mut();
        screen.station = text.to_string();
        screen.dirty = true;
    }

    fn show_position(&mut self, text: &str) {
        let mut screen = self.0.borrow_mut();
        if screen.position != text {
            screen.position = text.to_string();
            screen.dirty = true;
        }
    }

    fn notify(&mut self, notice: Notice) {
        LogSink.notify(notice.clone());
        let mut screen = self.0.borrow_mut();
        if screen.notices.len() == MAX_NOTICES {
            screen.notices.remove(0);
        }
        screen.notices.push(notice);
        screen.dirty = true;
    }

    fn controls_enabled(&mut self, enabled: bool) {
        let mut screen = self.0.borrow_mut();
        screen.controls_enabled = enabled;
        screen.dirty = true;
    }
}

/// `H:MM:SS / H:MM:SS`, or all zeros while the duration is under a second.
pub fn format_position(position: Duration, duration: Option<Duration>) -> String {
    let Some(duration) = duration.filter(|d| d.as_millis() >= 1_000) else {
        return String::from("0:00:00 / 0:00:00");
    };
    format!(
        "{} / {}",
        clock_face(position.as_secs()),
        clock_face(duration.as_secs())
    )
}

fn clock_face(total_secs: u64) -> String {
    let hours = total_secs / 3_600;
    let minutes = (total_secs / 60) % 60;
    let seconds = total_secs % 60;
    format!("{hours}:{minutes:02}:{seconds:02}")
}
