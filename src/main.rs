use color_eyre::Result;
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;
use std::error::Error;
use std::io;
use std::path::Path;

use gpuboard::app::App;
use gpuboard::args::Args;
use gpuboard::event::{Event, EventHandler};
use gpuboard::handler::{handle_key_events, handle_mouse_events};
use gpuboard::tui::Tui;
use gpuboard::ui::UI;

fn main() -> Result<(), Box<dyn Error>> {
    let args: Args = argh::from_env();
    if args.version {
        println!("gpuboard v{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    // The guard must outlive the main loop or buffered logs are dropped
    let _log_guard = match &args.log_file {
        Some(path) => Some(init_logging(path)?),
        None => None,
    };

    let mut app = App::new(args)?;
    let mut ui = UI::new(&app);

    // Initialize the terminal user interface
    let backend = CrosstermBackend::new(io::stderr());
    let terminal = Terminal::new(backend)?;
    let events = EventHandler::new(100);
    let mut tui = Tui::new(terminal, events);
    tui.init()?;
    tui.draw(&mut ui)?;

    // Main loop
    while app.running {
        let redraw = match tui.events.next()? {
            Event::Tick => {
                if app.tick() {
                    ui.update(&app);
                    true
                } else {
                    false
                }
            }
            Event::Key(key_event) => handle_key_events(key_event, &mut app, &mut ui)?,
            Event::Mouse(mouse_event) => handle_mouse_events(mouse_event, &mut ui)?,
            Event::Resize(_, _) => true,
        };

        if redraw {
            tui.draw(&mut ui)?;
        }
    }

    tui.exit()?;
    Ok(())
}

/// Routes tracing output to a file; the TUI owns the terminal, so there
/// is nowhere else for diagnostics to go.
fn init_logging(path: &str) -> Result<tracing_appender::non_blocking::WorkerGuard, Box<dyn Error>> {
    let path = Path::new(path);
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let file_name = path.file_name().ok_or("--log-file must name a file")?;

    let appender = tracing_appender::rolling::never(directory, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(tracing::level_filters::LevelFilter::INFO.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();

    Ok(guard)
}
