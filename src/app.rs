use crate::audio::{AudioOutput, NullEngine, PlaybackEngine, RodioEngine};
use crate::clock::SystemClock;
use crate::config::JsonFileStore;
use crate::core::{RadioCore, RadioParts, StartupOptions};
use crate::display::{DisplaySink, Notice, RETUNING_LABEL, SharedScreen};
use crate::ui::{self, CommandLine};
use anyhow::Result;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use std::io::{Stdout, stdout};
use std::path::PathBuf;
use std::rc::Rc;
use std::time::{Duration, Instant};

const VOLUME_STEP: u8 = 5;
const HELP_TEXT: &str = "Commands: dir <path> | station <n> | volume <0-100> | theme | ontop <on|off> | reset-clock | help";

type Term = Terminal<CrosstermBackend<Stdout>>;

#[derive(Debug, Clone, Default)]
pub struct AppStartupOptions {
    pub startup: StartupOptions,
    pub null_audio: bool,
    pub device: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyAction {
    Continue,
    Retune,
    EnterCommand,
    Quit,
}

pub fn run(options: AppStartupOptions) -> Result<()> {
    let store = JsonFileStore::open_default()?;
    tracing::info!(settings = %store.path().display(), "starting");
    let screen = SharedScreen::default();
    let mut core = RadioCore::new(
        RadioParts {
            engines: open_engines(options.null_audio, options.device.as_deref()),
            store: Box::new(store),
            clock: Box::new(SystemClock),
            display: Box::new(screen.clone()),
        },
        &options.startup,
    )?;

    enable_raw_mode()?;
    let mut out = stdout();
    execute!(out, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(out);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;

    draw_retuning(&mut terminal, &core, &screen)?;
    core.start(&options.startup);

    let mut command_mode = false;
    let mut command_buffer = String::new();
    let mut last_tick = Instant::now();
    let mut needs_redraw = true;

    let result: Result<()> = loop {
        core.pump();

        let dirty = screen.take_dirty();
        if needs_redraw || dirty || last_tick.elapsed() > Duration::from_millis(250) {
            let snapshot = screen.snapshot();
            let command = command_mode.then_some(CommandLine {
                buffer: &command_buffer,
            });
            terminal.draw(|frame| ui::draw(frame, &core, &snapshot, command))?;
            last_tick = Instant::now();
            needs_redraw = false;
        }

        if !event::poll(Duration::from_millis(33))? {
            continue;
        }

        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }

        if command_mode {
            match key.code {
                KeyCode::Esc => {
                    command_mode = false;
                    command_buffer.clear();
                }
                KeyCode::Enter => {
                    command_mode = false;
                    if command_changes_station(&command_buffer) {
                        draw_retuning(&mut terminal, &core, &screen)?;
                    }
                    let mut display = screen.clone();
                    run_command(&mut core, &mut display, &command_buffer);
                    command_buffer.clear();
                }
                KeyCode::Backspace => {
                    command_buffer.pop();
                }
                KeyCode::Char(ch) => command_buffer.push(ch),
                _ => {}
            }
            needs_redraw = true;
            continue;
        }

        match classify_key(&core, key) {
            KeyAction::Quit => break Ok(()),
            KeyAction::EnterCommand => {
                command_mode = true;
                needs_redraw = true;
            }
            KeyAction::Retune => {
                draw_retuning(&mut terminal, &core, &screen)?;
                handle_key(&mut core, &screen, key);
            }
            KeyAction::Continue => handle_key(&mut core, &screen, key),
        }
    };

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    tracing::info!("stopped");
    result
}

fn open_engines(null_audio: bool, device: Option<&str>) -> [Box<dyn PlaybackEngine>; 2] {
    if !null_audio {
        match AudioOutput::open(device) {
            Ok(output) => {
                tracing::info!(device = output.device_name(), "using rodio playback");
                return [
                    Box::new(RodioEngine::new(Rc::clone(&output))),
                    Box::new(RodioEngine::new(output)),
                ];
            }
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), "audio output unavailable, playing silently");
            }
        }
    }
    [Box::new(NullEngine::new()), Box::new(NullEngine::new())]
}

/// Switches block until the new station is live, so the label is drawn first.
fn draw_retuning(terminal: &mut Term, core: &RadioCore, screen: &SharedScreen) -> Result<()> {
    let mut snapshot = screen.snapshot();
    snapshot.station = RETUNING_LABEL.to_string();
    terminal.draw(|frame| ui::draw(frame, core, &snapshot, None))?;
    Ok(())
}

fn classify_key(core: &RadioCore, key: KeyEvent) -> KeyAction {
    match key.code {
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => KeyAction::Quit,
        KeyCode::Char('q') => KeyAction::Quit,
        KeyCode::Char(':') => KeyAction::EnterCommand,
        KeyCode::Char('n') | KeyCode::Char('p') | KeyCode::Right | KeyCode::Left
            if core.controls_enabled() =>
        {
            KeyAction::Retune
        }
        KeyCode::Char(ch) if core.controls_enabled() && station_for_key(ch).is_some() => {
            KeyAction::Retune
        }
        _ => KeyAction::Continue,
    }
}

fn handle_key(core: &mut RadioCore, screen: &SharedScreen, key: KeyEvent) {
    match key.code {
        KeyCode::Char(' ') => core.play_pause(),
        KeyCode::Char('n') | KeyCode::Right => core.next(),
        KeyCode::Char('p') | KeyCode::Left => core.previous(),
        KeyCode::Char('+') | KeyCode::Char('=') | KeyCode::Up => {
            core.set_volume(core.volume().saturating_add(VOLUME_STEP));
        }
        KeyCode::Char('-') | KeyCode::Down => {
            core.set_volume(core.volume().saturating_sub(VOLUME_STEP));
        }
        KeyCode::Char('m') => core.toggle_mute(),
        KeyCode::Char('r') => core.reset_broadcast_clock(),
        KeyCode::Char('t') => core.set_theme(core.settings().theme.next()),
        KeyCode::Char('a') => core.set_always_on_top(!core.settings().always_on_top),
        KeyCode::Esc => screen.dismiss_notice(),
        KeyCode::Char(ch) => {
            if let Some(index) = station_for_key(ch)
                && index < core.catalog().len()
            {
                core.select_station(index);
            }
        }
        _ => {}
    }
}

fn station_for_key(ch: char) -> Option<usize> {
    match ch {
        '1'..='9' => ch.to_digit(10).and_then(|d| usize::try_from(d - 1).ok()),
        '0' => Some(9),
        _ => None,
    }
}

fn command_changes_station(raw: &str) -> bool {
    let command = raw.split_whitespace().next().unwrap_or_default();
    matches!(command, "dir" | "station")
}

fn run_command(core: &mut RadioCore, display: &mut dyn DisplaySink, raw: &str) {
    let input = raw.trim();
    if input.is_empty() {
        display.notify(Notice::info("No command"));
        return;
    }

    let mut command_split = input.splitn(2, char::is_whitespace);
    let command = command_split.next().unwrap_or_default();
    let rest = command_split.next().unwrap_or("").trim();

    match command {
        "help" => display.notify(Notice::info(HELP_TEXT)),
        "dir" => {
            if rest.is_empty() {
                display.notify(Notice::info("Usage: dir <path>"));
            } else {
                core.change_directory(&PathBuf::from(rest));
            }
        }
        "station" => match rest.parse::<usize>() {
            Ok(number) if number >= 1 && number <= core.catalog().len() => {
                core.select_station(number - 1);
            }
            _ => display.notify(Notice::info(format!(
                "Usage: station <1-{}>",
                core.catalog().len()
            ))),
        },
        "volume" => match rest.parse::<u8>() {
            Ok(level) => core.set_volume(level),
            Err(_) => display.notify(Notice::info("Usage: volume <0-100>")),
        },
        "theme" => core.set_theme(core.settings().theme.next()),
        "ontop" => match rest {
            "on" => core.set_always_on_top(true),
            "off" => core.set_always_on_top(false),
            _ => display.notify(Notice::info("Usage: ontop <on|off>")),
        },
        "reset-clock" => core.reset_broadcast_clock(),
        _ => display.notify(Notice::info("Unknown command. Use :help")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::MemoryStore;
    use crate::model::{Settings, SwitchTuning, Theme};
    use std::fs;
    use tempfile::tempdir;

    fn radio(screen: &SharedScreen) -> RadioCore {
        RadioCore::new(
            RadioParts {
                engines: [Box::new(NullEngine::new()), Box::new(NullEngine::new())],
                store: Box::new(MemoryStore::new(Settings {
                    tuning: SwitchTuning::immediate(),
                    ..Settings::default()
                })),
                clock: Box::new(ManualClock::new(5_000)),
                display: Box::new(screen.clone()),
            },
            &StartupOptions::default(),
        )
        .expect("radio")
    }

    #[test]
    fn unknown_command_is_reported() {
        let screen = SharedScreen::default();
        let mut core = radio(&screen);
        let mut display = screen.clone();
        run_command(&mut core, &mut display, "wat");
        let notice = screen.snapshot().latest_notice().cloned().expect("notice");
        assert!(notice.message.contains("Unknown command"));
    }

    #[test]
    fn dir_command_accepts_paths_with_spaces() {
        let root = tempdir().expect("tempdir");
        let library = root.path().join("Radio Stations");
        fs::create_dir_all(&library).expect("mkdir");
        fs::write(library.join("flash.mp3"), b"x").expect("fixture");

        let screen = SharedScreen::default();
        let mut core = radio(&screen);
        let mut display = screen.clone();
        run_command(&mut core, &mut display, &format!("dir {}", library.display()));

        assert_eq!(core.catalog().len(), 1);
        assert_eq!(core.station(), Some(0));
        assert_eq!(screen.snapshot().station, "flash");
    }

    #[test]
    fn station_command_is_one_based() {
        let root = tempdir().expect("tempdir");
        for name in ["a.mp3", "b.mp3", "c.mp3"] {
            fs::write(root.path().join(name), b"x").expect("fixture");
        }
        let screen = SharedScreen::default();
        let mut core = radio(&screen);
        core.change_directory(root.path());

        let mut display = screen.clone();
        run_command(&mut core, &mut display, "station 3");
        assert_eq!(core.station(), Some(2));

        run_command(&mut core, &mut display, "station 9");
        assert_eq!(core.station(), Some(2));
        let notice = screen.snapshot().latest_notice().cloned().expect("notice");
        assert_eq!(notice.message, "Usage: station <1-3>");
    }

    #[test]
    fn theme_key_cycles_theme() {
        let screen = SharedScreen::default();
        let mut core = radio(&screen);
        handle_key(
            &mut core,
            &screen,
            KeyEvent::new(KeyCode::Char('t'), KeyModifiers::NONE),
        );
        assert_eq!(core.settings().theme, Theme::SanAndreas);
    }

    #[test]
    fn number_keys_map_to_stations() {
        assert_eq!(station_for_key('1'), Some(0));
        assert_eq!(station_for_key('9'), Some(8));
        assert_eq!(station_for_key('0'), Some(9));
        assert_eq!(station_for_key('x'), None);
    }

    #[test]
    fn tuning_keys_are_ignored_without_stations() {
        let screen = SharedScreen::default();
        let core = radio(&screen);
        let key = KeyEvent::new(KeyCode::Char('n'), KeyModifiers::NONE);
        assert_eq!(classify_key(&core, key), KeyAction::Continue);
        let quit = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert_eq!(classify_key(&core, quit), KeyAction::Quit);
    }
}
