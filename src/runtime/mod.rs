use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crossterm::execute;
use crossterm::terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode};
use ratatui::{Terminal, backend::CrosstermBackend};
use tracing::{info, warn};

use crate::app::App;
use crate::audio::{Ffmpeg, Ffprobe, PlaybackController, RodioOutput};
use crate::library::scan;

mod event_loop;
mod logging;
mod settings;

pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    let (settings, config_warning) = settings::load_settings();

    let log_path = logging::init(&settings.log)?;
    info!(log = %log_path.display(), "ostinato starting");
    if let Some(msg) = config_warning {
        warn!("{msg}");
    }

    let dir = env::args()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    let tracks = scan(&dir, &settings.library);
    let output = RodioOutput::open_default()?;
    let prober = Ffprobe::new(settings.decoder.ffprobe_path.clone())
        .with_timeout(Duration::from_millis(settings.decoder.probe_timeout_ms));
    let controller = Arc::new(PlaybackController::new(
        Arc::new(output),
        Arc::new(Ffmpeg::new(settings.decoder.ffmpeg_path.clone())),
        Arc::new(prober),
        &settings.decoder,
        &settings.playback,
    ));
    let updates = controller.subscribe();

    let mut app = App::new(tracks);
    app.set_current_dir(dir.display().to_string());

    enable_raw_mode()?;
    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut state = event_loop::EventLoopState::default();
    let run_result = event_loop::run(
        &mut terminal,
        &settings,
        &mut app,
        &controller,
        &updates,
        &mut state,
    );

    if let Err(e) = controller.stop() {
        warn!(error = %e, "stop on exit failed");
    }

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    info!("ostinato exiting");
    run_result
}
