//! Terminal user interface for live spectrogram capture.
//!
//! Shows the rolling spectrogram as a heat map with a one-line status footer and
//! turns key presses into start/stop/quit requests.

use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    prelude::*,
    style::{Color, Style},
    text::Span,
    widgets::Paragraph,
};
use std::io::{stdout, Stdout};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use super::heatmap::Heatmap;
use crate::spectrogram::{FrequencyMetadata, PipelineEvent, SessionStatus, SharedSpectrogram};

/// User input command during capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserCommand {
    /// No key pressed, or a key without a binding
    Continue,
    /// Begin a capture session ('s' or Enter)
    Start,
    /// End the capture session (Space or 'x')
    Stop,
    /// Leave the application (Escape, 'q' or Ctrl+C)
    Quit,
}

/// What the footer knows about the session, built from pipeline events.
#[derive(Debug, Default)]
pub struct SessionView {
    pub capturing: bool,
    pub rows: u64,
    pub metadata: Option<FrequencyMetadata>,
    pub started_at: Option<Instant>,
    pub last_recording: Option<PathBuf>,
    pub saved_recordings: Vec<PathBuf>,
    pub notice: Option<String>,
    pub failure: Option<String>,
}

impl SessionView {
    pub fn apply(&mut self, event: &PipelineEvent) {
        match event {
            PipelineEvent::Metadata(metadata) => self.metadata = Some(metadata.clone()),
            PipelineEvent::Row { index, .. } => self.rows = index + 1,
            PipelineEvent::Status(status) => self.apply_status(status),
        }
    }

    fn apply_status(&mut self, status: &SessionStatus) {
        match status {
            SessionStatus::Started => {
                self.capturing = true;
                self.rows = 0;
                self.started_at = Some(Instant::now());
                self.notice = None;
            }
            SessionStatus::Stopped { recording } => {
                self.capturing = false;
                self.started_at = None;
                if let Some(path) = recording {
                    self.last_recording = Some(path.clone());
                    self.saved_recordings.push(path.clone());
                }
            }
            SessionStatus::Ignored { .. } => {}
            SessionStatus::Failed { message } => {
                self.capturing = false;
                self.started_at = None;
                self.failure = Some(message.clone());
            }
            SessionStatus::RecordingNotSaved { message } => {
                self.notice = Some(format!("recording not saved: {message}"));
            }
        }
    }

    /// Capture time of the current session.
    pub fn elapsed(&self) -> Duration {
        self.started_at.map_or(Duration::ZERO, |start| start.elapsed())
    }

    /// Footer text without styling.
    pub fn footer_text(&self) -> String {
        let secs = self.elapsed().as_secs();
        let mut text = format!("{}:{:02} / {} rows", secs / 60, secs % 60, self.rows);

        if let Some(metadata) = &self.metadata {
            text.push_str(&format!(" / 0-{:.0} Hz", metadata.freq_max));
        }
        if let Some(notice) = &self.notice {
            text.push_str(&format!(" / {notice}"));
        } else if let Some(path) = &self.last_recording {
            text.push_str(&format!(" / saved {}", path.display()));
        }
        text
    }
}

/// Terminal UI for the live spectrogram.
pub struct SpectrogramTui {
    terminal: Terminal<CrosstermBackend<Stdout>>,
}

impl SpectrogramTui {
    /// Creates a new TUI instance and enters alternate screen mode.
    ///
    /// # Errors
    /// - If terminal cannot be initialized
    /// - If raw mode cannot be enabled
    /// - If alternate screen cannot be entered
    pub fn new() -> anyhow::Result<Self> {
        enable_raw_mode()?;
        let mut stdout = stdout();
        execute!(stdout, EnterAlternateScreen)?;

        let backend = CrosstermBackend::new(stdout);
        let terminal = Terminal::new(backend)?;

        Ok(Self { terminal })
    }

    /// Draws the heat map from `buffer` and the footer from `view`.
    ///
    /// # Errors
    /// - If terminal rendering fails
    pub fn render(&mut self, view: &SessionView, buffer: &SharedSpectrogram) -> anyhow::Result<()> {
        let footer_text = view.footer_text();
        let capturing = view.capturing;

        self.terminal.draw(|frame| {
            let area = frame.area();
            let footer_height = 1;

            let heatmap_area = Rect {
                height: area.height.saturating_sub(footer_height),
                ..area
            };
            let footer_area = Rect {
                y: area.y + area.height.saturating_sub(footer_height),
                height: footer_height.min(area.height),
                ..area
            };

            // Pool under the lock, draw outside it.
            let heatmap = buffer.with_buffer(|b| Heatmap::from_buffer(b, heatmap_area, None));
            frame.render_widget(heatmap, heatmap_area);

            let indicator = if capturing {
                Span::styled("● ", Style::default().fg(Color::Red))
            } else {
                Span::styled("■ ", Style::default().fg(Color::Yellow))
            };
            let footer = Paragraph::new(Line::from(vec![indicator, Span::raw(footer_text)]))
                .style(
                    Style::default()
                        .fg(Color::Rgb(185, 207, 212))
                        .bg(Color::Rgb(0, 0, 0)),
                );
            frame.render_widget(footer, footer_area);
        })?;

        Ok(())
    }

    /// Polls the keyboard for up to `timeout`.
    ///
    /// # Errors
    /// - If event polling fails
    pub fn handle_input(&mut self, timeout: Duration) -> anyhow::Result<UserCommand> {
        if !event::poll(timeout)? {
            return Ok(UserCommand::Continue);
        }
        let Event::Key(key) = event::read()? else {
            return Ok(UserCommand::Continue);
        };
        if key.kind != KeyEventKind::Press {
            return Ok(UserCommand::Continue);
        }

        Ok(match key.code {
            KeyCode::Char('s') | KeyCode::Enter => {
                tracing::debug!("Start requested from keyboard");
                UserCommand::Start
            }
            KeyCode::Char(' ') | KeyCode::Char('x') => {
                tracing::debug!("Stop requested from keyboard");
                UserCommand::Stop
            }
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                tracing::debug!("Ctrl+C pressed: quitting");
                UserCommand::Quit
            }
            KeyCode::Char('q') | KeyCode::Esc => {
                tracing::debug!("Escape or 'q' pressed: quitting");
                UserCommand::Quit
            }
            _ => UserCommand::Continue,
        })
    }

    /// Cleans up terminal state and exits alternate screen mode.
    ///
    /// # Errors
    /// - If terminal mode cannot be disabled
    /// - If cursor cannot be shown
    pub fn cleanup(&mut self) -> anyhow::Result<()> {
        disable_raw_mode()?;
        execute!(self.terminal.backend_mut(), LeaveAlternateScreen)?;
        self.terminal.show_cursor()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spectrogram::normalizer::NormalizedRow;

    #[test]
    fn test_view_tracks_session_lifecycle() {
        let mut view = SessionView::default();
        view.apply(&PipelineEvent::Metadata(FrequencyMetadata::new(
            8000, 256, -120.0, 0.0,
        )));
        view.apply(&PipelineEvent::Status(SessionStatus::Started));
        assert!(view.capturing);

        view.apply(&PipelineEvent::Row {
            index: 4,
            row: NormalizedRow::zeros(129),
            snapshot: None,
        });
        assert_eq!(view.rows, 5);
        assert!(view.footer_text().contains("5 rows"));
        assert!(view.footer_text().contains("0-4000 Hz"));

        view.apply(&PipelineEvent::Status(SessionStatus::Stopped {
            recording: Some(PathBuf::from("/tmp/a.wav")),
        }));
        assert!(!view.capturing);
        assert_eq!(view.saved_recordings, vec![PathBuf::from("/tmp/a.wav")]);
        assert!(view.footer_text().contains("saved /tmp/a.wav"));
    }

    #[test]
    fn test_view_records_failure() {
        let mut view = SessionView::default();
        view.apply(&PipelineEvent::Status(SessionStatus::Started));
        view.apply(&PipelineEvent::Status(SessionStatus::Failed {
            message: "device unplugged".to_string(),
        }));
        assert!(!view.capturing);
        assert_eq!(view.failure.as_deref(), Some("device unplugged"));
    }
}
