use std::error::Error;
use std::io;
use std::panic;

use color_eyre::{config::HookBuilder, eyre, Result};
use crossterm::event::{DisableMouseCapture, EnableMouseCapture};
use crossterm::terminal::{self, EnterAlternateScreen, LeaveAlternateScreen};
use ratatui::backend::Backend;
use ratatui::Terminal;

use crate::event::EventHandler;
use crate::ui::UI;

/// Terminal lifecycle: raw mode, alternate screen, and draw dispatch.
///
/// Panic and eyre hooks restore the terminal first so a crash never
/// leaves the shell in raw mode.
#[derive(Debug)]
pub struct Tui<B: Backend>
where
    <B as Backend>::Error: 'static,
{
    terminal: Terminal<B>,
    /// Terminal event handler.
    pub events: EventHandler,
}

impl<B: Backend> Tui<B>
where
    <B as Backend>::Error: 'static,
{
    pub fn new(terminal: Terminal<B>, events: EventHandler) -> Self {
        Self { terminal, events }
    }

    /// Puts the terminal into dashboard mode
    pub fn init(&mut self) -> Result<(), Box<dyn Error>> {
        Self::install_hooks()?;

        terminal::enable_raw_mode()?;
        crossterm::execute!(io::stderr(), EnterAlternateScreen, EnableMouseCapture)?;

        self.terminal.hide_cursor()?;
        self.terminal.clear()?;
        Ok(())
    }

    /// Renders the interface into the current frame
    pub fn draw(&mut self, ui: &mut UI) -> Result<(), Box<dyn Error>> {
        self.terminal
            .draw(|frame| ui.render(frame.area(), frame.buffer_mut()))?;

        Ok(())
    }

    /// Leaves dashboard mode and hands the terminal back to the shell
    pub fn exit(&mut self) -> Result<(), Box<dyn Error>> {
        Self::restore()?;
        self.terminal.show_cursor()?;
        Ok(())
    }

    /// Wraps the default panic and eyre hooks so the terminal is restored
    /// before any report is printed.
    fn install_hooks() -> Result<()> {
        let (panic_hook, eyre_hook) = HookBuilder::default().into_hooks();

        let panic_hook = panic_hook.into_panic_hook();
        panic::set_hook(Box::new(move |info| {
            Self::restore().expect("failed to restore the terminal");
            panic_hook(info);
        }));

        let eyre_hook = eyre_hook.into_eyre_hook();
        eyre::set_hook(Box::new(
            move |error: &(dyn std::error::Error + 'static)| {
                Self::restore().expect("failed to restore the terminal");
                eyre_hook(error)
            },
        ))?;

        Ok(())
    }

    fn restore() -> Result<()> {
        terminal::disable_raw_mode()?;
        crossterm::execute!(io::stderr(), LeaveAlternateScreen, DisableMouseCapture)?;
        Ok(())
    }
}
