use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::thread::JoinHandle;
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind};
use ratatui::{Terminal, backend::CrosstermBackend};
use tracing::{debug, warn};

use crate::app::App;
use crate::audio::{PlaybackController, PlaybackError, PlaybackInfo};
use crate::config;
use crate::ui;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// What a key press asks the runtime to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Play,
    Stop,
    Quit,
    Next,
    Prev,
    First,
    Last,
}

/// State tracked by the runtime event loop across iterations.
#[derive(Debug, Default)]
pub struct EventLoopState {
    /// Internal two-key prefix state used for `gg` handling.
    pub pending_gg: bool,
    /// Starts running in the background, with the track name for errors.
    pending_starts: Vec<(String, JoinHandle<Result<(), PlaybackError>>)>,
}

/// Map a key press to an `Action`, tracking the `gg` prefix.
pub fn action_for(key: KeyEvent, state: &mut EventLoopState) -> Option<Action> {
    if let KeyCode::Char('g') = key.code {
        if state.pending_gg {
            state.pending_gg = false;
            return Some(Action::First);
        }
        state.pending_gg = true;
        return None;
    }

    // g pending clears on any other key
    state.pending_gg = false;
    match key.code {
        KeyCode::Enter => Some(Action::Play),
        KeyCode::Char('s') => Some(Action::Stop),
        KeyCode::Char('q') => Some(Action::Quit),
        KeyCode::Char('j') | KeyCode::Down => Some(Action::Next),
        KeyCode::Char('k') | KeyCode::Up => Some(Action::Prev),
        KeyCode::Char('G') => Some(Action::Last),
        _ => None,
    }
}

/// Main terminal event loop: drains playback updates, draws and handles
/// input. Returns `Ok(())` when shutdown is requested.
pub fn run(
    terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>,
    settings: &config::Settings,
    app: &mut App,
    controller: &Arc<PlaybackController>,
    updates: &Receiver<PlaybackInfo>,
    state: &mut EventLoopState,
) -> Result<(), Box<dyn std::error::Error>> {
    loop {
        // Updates are produced on the tracker threads; they are applied
        // here so the model is only ever touched by the UI thread.
        while let Ok(info) = updates.try_recv() {
            app.apply_playback(info);
        }
        collect_starts(app, state);

        terminal.draw(|f| ui::draw(f, app, &settings.ui))?;

        if event::poll(POLL_INTERVAL)? {
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                if let Some(action) = action_for(key, state) {
                    if apply_action(action, app, controller, state) {
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}

/// Apply the outcome of background starts that have finished.
fn collect_starts(app: &mut App, state: &mut EventLoopState) {
    let (done, running): (Vec<_>, Vec<_>) = state
        .pending_starts
        .drain(..)
        .partition(|(_, h)| h.is_finished());
    state.pending_starts = running;

    for (name, handle) in done {
        match handle.join() {
            Ok(Ok(())) => app.clear_error(),
            Ok(Err(e)) => {
                warn!(track = %name, error = %e, "could not start playback");
                app.set_error(e.to_string());
            }
            Err(_) => app.set_error(format!("starting {name} panicked")),
        }
    }
}

/// Perform `action`. Returns true when the app should exit.
fn apply_action(
    action: Action,
    app: &mut App,
    controller: &Arc<PlaybackController>,
    state: &mut EventLoopState,
) -> bool {
    match action {
        Action::Play => {
            let Some(track) = app.selected_track().cloned() else {
                return false;
            };
            debug!(track = %track.name, "play requested");
            let name = track.name.clone();
            // Probing and launching happen off the UI thread.
            match controller.spawn_start(track) {
                Ok(handle) => state.pending_starts.push((name, handle)),
                Err(e) => app.set_error(format!("could not start playback: {e}")),
            }
        }
        Action::Stop => stop(app, controller),
        Action::Quit => {
            stop(app, controller);
            return true;
        }
        Action::Next => app.next(),
        Action::Prev => app.prev(),
        Action::First => app.select_first(),
        Action::Last => app.select_last(),
    }
    false
}

fn stop(app: &mut App, controller: &PlaybackController) {
    if let Err(e) = controller.stop() {
        warn!(error = %e, "stop failed");
        app.set_error(e.to_string());
    }
}
