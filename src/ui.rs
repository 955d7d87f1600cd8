use crate::core::RadioCore;
use crate::display::Screen;
use crate::error::Severity;
use crate::model::Theme;
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap};

const APP_TITLE: &str = "retune  ";

#[derive(Clone, Copy)]
struct ThemePalette {
    bg: Color,
    panel_bg: Color,
    border: Color,
    text: Color,
    muted: Color,
    accent: Color,
    alert: Color,
    selected_bg: Color,
}

fn palette(theme: Theme) -> ThemePalette {
    match theme {
        Theme::ViceCity => ThemePalette {
            bg: Color::Rgb(0, 0, 18),
            panel_bg: Color::Rgb(0, 0, 18),
            border: Color::Rgb(29, 38, 155),
            text: Color::Rgb(255, 77, 240),
            muted: Color::Rgb(157, 77, 255),
            accent: Color::Rgb(112, 255, 223),
            alert: Color::Rgb(255, 171, 83),
            selected_bg: Color::Rgb(29, 38, 155),
        },
        Theme::SanAndreas => ThemePalette {
            bg: Color::Rgb(0, 0, 0),
            panel_bg: Color::Rgb(0, 0, 0),
            border: Color::Rgb(32, 214, 51),
            text: Color::Rgb(238, 238, 238),
            muted: Color::Rgb(150, 150, 150),
            accent: Color::Rgb(32, 214, 51),
            alert: Color::Rgb(235, 176, 97),
            selected_bg: Color::Rgb(18, 60, 22),
        },
    }
}

/// Text typed after `:`; `None` outside command mode.
pub struct CommandLine<'a> {
    pub buffer: &'a str,
}

pub fn draw(frame: &mut Frame, core: &RadioCore, screen: &Screen, command: Option<CommandLine<'_>>) {
    let settings = core.settings();
    let colors = palette(settings.theme);
    frame.render_widget(
        Block::default().style(Style::default().bg(colors.bg)),
        frame.area(),
    );

    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(6),
            Constraint::Length(4),
            Constraint::Length(3),
        ])
        .split(frame.area());

    let station_count = core.catalog().len();
    let dial = core
        .station()
        .map(|index| format!("Station {}/{station_count}", index + 1))
        .unwrap_or_else(|| format!("Station -/{station_count}"));
    let header = Paragraph::new(Line::from(vec![
        Span::styled(
            APP_TITLE,
            Style::default()
                .fg(colors.accent)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(dial, Style::default().fg(colors.text)),
        Span::styled("  |  ", Style::default().fg(colors.muted)),
        Span::styled(
            format!("Theme {}", settings.theme.label()),
            Style::default().fg(colors.muted),
        ),
        Span::styled("  |  ", Style::default().fg(colors.muted)),
        Span::styled(
            settings.scan_directory.display().to_string(),
            Style::default().fg(colors.muted),
        ),
    ]))
    .block(panel_block("Radio", colors.panel_bg, colors.text, colors.border));
    frame.render_widget(header, vertical[0]);

    let items: Vec<ListItem> = core
        .catalog()
        .tracks()
        .iter()
        .enumerate()
        .map(|(index, track)| {
            let marker = if core.station() == Some(index) {
                "  > "
            } else {
                "    "
            };
            let key = dial_key(index)
                .map(|key| format!("[{key}] "))
                .unwrap_or_else(|| String::from("    "));
            ListItem::new(Line::from(vec![
                Span::styled(marker, Style::default().fg(colors.muted)),
                Span::styled(key, Style::default().fg(colors.accent)),
                Span::styled(track.file_label(), Style::default().fg(colors.text)),
            ]))
        })
        .collect();

    let mut state = ListState::default();
    state.select(core.station());
    let list = List::new(items)
        .block(panel_block(
            "Stations",
            colors.panel_bg,
            colors.text,
            colors.border,
        ))
        .highlight_style(
            Style::default()
                .bg(colors.selected_bg)
                .add_modifier(Modifier::BOLD),
        );
    frame.render_stateful_widget(list, vertical[1], &mut state);

    let transport = if !screen.controls_enabled {
        "--"
    } else if core.is_playing() {
        "Playing"
    } else {
        "Paused"
    };
    let volume = if core.is_muted() {
        String::from("Muted")
    } else {
        format!("Vol {:>3}%", core.volume())
    };
    let now_playing = Paragraph::new(vec![
        Line::from(Span::styled(
            screen.station.as_str(),
            Style::default()
                .fg(colors.text)
                .add_modifier(Modifier::BOLD),
        )),
        Line::from(vec![
            Span::styled(screen.position.as_str(), Style::default().fg(colors.accent)),
            Span::styled("  |  ", Style::default().fg(colors.muted)),
            Span::styled(transport, Style::default().fg(colors.text)),
            Span::styled("  |  ", Style::default().fg(colors.muted)),
            Span::styled(
                format!("{volume} {}", volume_bar(core.volume(), 14)),
                Style::default().fg(colors.muted),
            ),
        ]),
    ])
    .block(panel_block(
        "Now Playing",
        colors.panel_bg,
        colors.text,
        colors.border,
    ))
    .wrap(Wrap { trim: true });
    frame.render_widget(now_playing, vertical[2]);

    let footer = match command {
        Some(line) => Line::from(vec![
            Span::styled(":", Style::default().fg(colors.accent)),
            Span::styled(line.buffer, Style::default().fg(colors.text)),
        ]),
        None => {
            let mut spans = vec![Span::styled(
                "space play/pause, n/p tune, 1-0 station, +/- volume, m mute, : command, q quit",
                Style::default().fg(colors.muted),
            )];
            if let Some(notice) = screen.latest_notice() {
                let color = match notice.severity {
                    Severity::Info => colors.text,
                    Severity::Warning | Severity::Error => colors.alert,
                };
                spans.push(Span::styled("  |  ", Style::default().fg(colors.muted)));
                spans.push(Span::styled(notice.message.as_str(), Style::default().fg(color)));
            }
            Line::from(spans)
        }
    };
    frame.render_widget(
        Paragraph::new(footer).block(panel_block(
            "Message",
            colors.panel_bg,
            colors.text,
            colors.border,
        )),
        vertical[3],
    );
}

/// Number key bound to a station index; `0` selects the tenth.
pub fn dial_key(index: usize) -> Option<char> {
    match index {
        0..=8 => char::from_digit(u32::try_from(index + 1).ok()?, 10),
        9 => Some('0'),
        _ => None,
    }
}

fn panel_block(title: &str, bg: Color, text: Color, border: Color) -> Block<'_> {
    Block::default()
        .borders(Borders::ALL)
        .title(Span::styled(
            format!(" {title} "),
            Style::default().fg(text).add_modifier(Modifier::BOLD),
        ))
        .border_style(Style::default().fg(border))
        .style(Style::default().bg(bg))
}

fn volume_bar(level: u8, width: usize) -> String {
    let filled = usize::from(level.min(100)) * width / 100;
    let mut bar = String::with_capacity(width + 2);
    bar.push('[');
    bar.push_str(&"#".repeat(filled));
    bar.push_str(&"-".repeat(width.saturating_sub(filled)));
    bar.push(']');
    bar
}
