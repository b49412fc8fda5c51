//! Full-screen error display for failures the user has to acknowledge.

use crossterm::{
    event::{self, Event, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    prelude::*,
    text::Span,
    widgets::{Paragraph, Wrap},
};
use std::io::{self, Stdout};
use std::time::Duration;

const ERROR_BG: Color = Color::Rgb(160, 20, 30);
const ERROR_FG: Color = Color::Rgb(255, 255, 255);

/// Error screen: a title and a wrapped message on a red background.
///
/// Stays up until any key is pressed.
pub struct ErrorScreen {
    terminal: Terminal<CrosstermBackend<Stdout>>,
    active: bool,
}

impl ErrorScreen {
    /// Enters raw mode and the alternate screen.
    ///
    /// # Errors
    /// - If the terminal cannot be initialized
    pub fn new() -> anyhow::Result<Self> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;

        let terminal = Terminal::new(CrosstermBackend::new(stdout))?;
        Ok(Self {
            terminal,
            active: true,
        })
    }

    /// Shows `title` and `message` and waits for a key press.
    ///
    /// # Errors
    /// - If terminal rendering or event polling fails
    pub fn show_error(&mut self, title: &str, message: &str) -> anyhow::Result<()> {
        loop {
            self.terminal.draw(|frame| {
                let area = frame.area();
                frame.buffer_mut().set_style(area, Style::default().bg(ERROR_BG));

                let style = Style::default().fg(ERROR_FG).bg(ERROR_BG);
                let mut lines = vec![
                    Line::from(Span::styled(title, style.add_modifier(Modifier::BOLD))),
                    Line::from(""),
                ];
                lines.extend(message.lines().map(|l| Line::from(Span::styled(l, style))));
                lines.push(Line::from(""));
                lines.push(Line::from(Span::styled(
                    "Press any key to close",
                    style.add_modifier(Modifier::DIM),
                )));

                let paragraph = Paragraph::new(lines)
                    .alignment(Alignment::Center)
                    .wrap(Wrap { trim: true });
                frame.render_widget(paragraph, message_area(area));
            })?;

            if event::poll(Duration::from_millis(100))? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    /// Leaves the alternate screen. Safe to call more than once.
    ///
    /// # Errors
    /// - If terminal mode cannot be restored
    pub fn cleanup(&mut self) -> anyhow::Result<()> {
        if !self.active {
            return Ok(());
        }
        self.active = false;
        disable_raw_mode()?;
        execute!(self.terminal.backend_mut(), LeaveAlternateScreen)?;
        self.terminal.show_cursor()?;
        Ok(())
    }
}

impl Drop for ErrorScreen {
    fn drop(&mut self) {
        let _ = self.cleanup();
    }
}

/// Shows an error screen and restores the terminal afterwards.
///
/// # Errors
/// - If the terminal cannot be driven
pub fn report_error(title: &str, message: &str) -> anyhow::Result<()> {
    let mut screen = ErrorScreen::new()?;
    screen.show_error(title, message)?;
    screen.cleanup()
}

/// Region for the message: 80% wide, starting a third of the way down.
fn message_area(area: Rect) -> Rect {
    let width = area.width * 4 / 5;
    Rect {
        x: area.x + (area.width - width) / 2,
        y: area.y + area.height / 3,
        width,
        height: area.height - area.height / 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_area_is_centered_and_inside() {
        let area = Rect::new(0, 0, 100, 30);
        let inner = message_area(area);
        assert_eq!(inner.width, 80);
        assert_eq!(inner.x, 10);
        assert_eq!(inner.y, 10);
        assert!(inner.bottom() <= area.bottom());

        let tiny = message_area(Rect::new(0, 0, 1, 1));
        assert!(tiny.right() <= 1 && tiny.bottom() <= 1);
    }
}
