//! UI rendering helpers for the terminal user interface.
//!
//! This module contains functions to render the TUI using `ratatui`.

use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Direction, Layout},
    style::{Modifier, Style},
    widgets::{Block, Borders, Gauge, List, ListItem, ListState, Padding, Paragraph, Wrap},
};
use std::time::Duration;

use crate::app::App;
use crate::audio::{Progress, SessionState};
use crate::config::UiSettings;

const CONTROLS: [(&str, &str); 5] = [
    ("j/k", "up/down"),
    ("gg/G", "top/bottom"),
    ("enter", "play selected"),
    ("s", "stop"),
    ("q", "quit"),
];

/// Render the controls help text.
fn controls_text() -> String {
    CONTROLS
        .iter()
        .map(|(k, v)| format!("[{k}] {v}"))
        .collect::<Vec<String>>()
        .join(" | ")
}

/// Format a `Duration` as `MM:SS`. Minutes do not wrap at 60.
pub fn format_mmss(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

/// `MM:SS` elapsed and total; the total reads `--:--` when unknown.
fn progress_labels(p: &Progress) -> (String, String) {
    let total = if p.is_bounded() {
        format_mmss(p.total)
    } else {
        "--:--".to_string()
    };
    (format_mmss(p.elapsed), total)
}

fn state_text(state: SessionState) -> &'static str {
    match state {
        SessionState::Idle => "Stopped",
        SessionState::Initializing => "Loading",
        SessionState::Playing => "Playing",
        SessionState::Finished => "Finished",
        SessionState::Cancelled => "Stopped",
        SessionState::Failed => "Decode failed",
    }
}

/// Render the entire UI into the provided `frame`.
pub fn draw(frame: &mut Frame, app: &App, ui_settings: &UiSettings) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(4),
            Constraint::Length(3),
            Constraint::Min(1),
            Constraint::Length(3),
        ])
        .split(frame.area());

    // Header
    let header = Paragraph::new(ui_settings.header_text.as_str())
        .alignment(Alignment::Center)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(" ostinato ")
                .title_alignment(Alignment::Center),
        );
    frame.render_widget(header, chunks[0]);

    // Status box
    let status = {
        let mut parts: Vec<String> = Vec::new();
        let info = &app.playback;
        parts.push(state_text(info.state).to_string());
        if let Some(track) = &info.track {
            parts.push(format!("Song: {}", track.name));
        }
        if let Some(err) = &app.error {
            parts.push(format!("Error: {err}"));
        }
        if let Some(dir) = &app.current_dir {
            parts.push(format!("Dir: {dir}"));
        }
        parts.join(" • ")
    };
    let status_par = Paragraph::new(status)
        .block(
            Block::bordered()
                .padding(Padding {
                    left: 1,
                    right: 0,
                    top: 0,
                    bottom: 0,
                })
                .title(" status "),
        )
        .wrap(Wrap { trim: true });
    frame.render_widget(status_par, chunks[1]);

    // Progress bar, bounded by the probed total.
    let progress = app.playback.progress;
    let (elapsed, total) = progress_labels(&progress);
    let gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title(" progress "))
        .gauge_style(Style::default().add_modifier(Modifier::REVERSED))
        .ratio(progress.ratio().unwrap_or(0.0))
        .label(format!("{elapsed} / {total}"));
    frame.render_widget(gauge, chunks[2]);

    // Track list, keeping the selection centered when it can be.
    {
        let total = app.tracks.len();
        let list_height = chunks[3].height.saturating_sub(2) as usize;
        let sel = app.selected.min(total.saturating_sub(1));
        let (start, end) = if total <= list_height || list_height == 0 {
            (0, total)
        } else {
            let half = list_height / 2;
            let start = sel.saturating_sub(half).min(total - list_height);
            (start, start + list_height)
        };

        let playing = app.playback.track.as_ref().map(|t| &t.path);
        let items: Vec<ListItem> = app.tracks[start..end]
            .iter()
            .map(|t| {
                if Some(&t.path) == playing && !app.playback.state.is_terminal() {
                    ListItem::new(format!("♪ {}", t.name))
                } else {
                    ListItem::new(t.name.as_str())
                }
            })
            .collect();

        let list = List::new(items)
            .block(Block::default().borders(Borders::ALL).title(" tracks "))
            .highlight_style(Style::default().add_modifier(Modifier::REVERSED))
            .highlight_symbol("> ");
        let mut state = ListState::default();
        if total > 0 {
            state.select(Some(sel - start));
        }
        frame.render_stateful_widget(list, chunks[3], &mut state);
    }

    let footer = Paragraph::new(controls_text())
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(" controls ")
                .padding(Padding {
                    left: 1,
                    right: 0,
                    top: 0,
                    bottom: 0,
                }),
        )
        .wrap(Wrap { trim: true });
    frame.render_widget(footer, chunks[4]);
}
