use color_eyre::Result;

use crate::{app::App, ui::UI};
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseEvent, MouseEventKind};

/// Handles the key events and updates the state of [`App`].
pub fn handle_key_events(key_event: KeyEvent, app: &mut App, ui: &mut UI) -> Result<bool> {
    let mut processed = true;

    match key_event.code {
        // Exit application on `ESC` or `q`
        KeyCode::Esc | KeyCode::Char('q') | KeyCode::Char('Q') => {
            app.quit();
        }
        // Exit application on `Ctrl-C`
        KeyCode::Char('c') | KeyCode::Char('C') => {
            if key_event.modifiers == KeyModifiers::CONTROL {
                app.quit();
            } else {
                processed = false;
            }
        }
        // Request refresh of Slurm state; the engine answers on a later tick
        KeyCode::Char('r') | KeyCode::Char('R') => {
            app.refresh();
            processed = false;
        }
        // Page selection
        KeyCode::Char('1') => ui.select_page(0),
        KeyCode::Char('2') => ui.select_page(1),
        KeyCode::Char('3') => ui.select_page(2),
        KeyCode::Char('4') => ui.select_page(3),
        KeyCode::Tab => ui.next_page(),
        KeyCode::BackTab => ui.previous_page(),
        // Scrolling
        KeyCode::Home => ui.scroll(isize::MIN),
        KeyCode::PageUp => ui.scroll(-10),
        KeyCode::Up => ui.scroll(-1),
        KeyCode::Down => ui.scroll(1),
        KeyCode::PageDown => ui.scroll(10),
        KeyCode::End => ui.scroll(isize::MAX),
        _ => processed = false,
    }

    Ok(processed)
}

pub fn handle_mouse_events(event: MouseEvent, ui: &mut UI) -> Result<bool> {
    match event.kind {
        MouseEventKind::ScrollUp => ui.scroll(-1),
        MouseEventKind::ScrollDown => ui.scroll(1),
        _ => return Ok(false),
    }

    Ok(true)
}
