//! Live spectrogram capture in the terminal.
//!
//! Runs the pipeline on its own thread and redraws the heat map from the shared
//! buffer. SIGUSR1 toggles capture, so a window manager key binding can drive it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use super::pipeline::{spawn_pipeline, InputSelection};
use crate::config::SpectrecConfig;
use crate::spectrogram::analyzer::bin_count;
use crate::spectrogram::{EventSender, SharedSpectrogram};
use crate::ui::{report_error, SessionView, SpectrogramTui, UserCommand};

/// Time spent waiting for a key between redraws.
const INPUT_POLL: Duration = Duration::from_millis(30);

/// Runs the interactive capture screen until the user quits.
///
/// Capture starts immediately. Saved recordings are listed on stdout after the
/// screen closes.
///
/// # Errors
/// - If the configuration is invalid
/// - If the pipeline or terminal cannot be set up
/// - If the capture device fails
pub async fn handle_record(tone: Option<f32>) -> anyhow::Result<()> {
    tracing::info!("=== spectrec capture started ===");

    let config = match SpectrecConfig::load() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!("Failed to load configuration: {err:#}");
            report_error(
                "Configuration Error",
                &format!("{err:#}\n\nCheck ~/.config/spectrec/spectrec.toml and try again."),
            )?;
            return Err(err.context("Configuration error"));
        }
    };

    let buffer = SharedSpectrogram::new(
        config.spectrogram.history_depth,
        bin_count(config.audio.frame_size),
    );
    let (tx, events) = mpsc::channel();
    let worker = spawn_pipeline(
        &config,
        InputSelection::from_args(&config, tone),
        EventSender::new(tx),
        buffer.clone(),
    )?;
    worker.start();

    let toggle = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGUSR1, toggle.clone())
        .map_err(|e| anyhow::anyhow!("Failed to register signal handler: {e}"))?;

    let mut tui = SpectrogramTui::new()?;
    let mut view = SessionView::default();

    let outcome = loop {
        for event in events.try_iter() {
            view.apply(&event);
        }
        if view.failure.is_some() {
            break Ok(());
        }

        if toggle.swap(false, Ordering::Relaxed) {
            tracing::info!("Received SIGUSR1: toggling capture");
            if view.capturing {
                worker.stop();
            } else {
                worker.start();
            }
        }

        if let Err(e) = tui.render(&view, &buffer) {
            break Err(e.context("Render failed"));
        }

        match tui.handle_input(INPUT_POLL) {
            Ok(UserCommand::Continue) => {}
            Ok(UserCommand::Start) => worker.start(),
            Ok(UserCommand::Stop) => worker.stop(),
            Ok(UserCommand::Quit) => break Ok(()),
            Err(e) => break Err(e.context("Input handling error")),
        }
    };

    // Stops any session, which flushes the recording and sends the last events.
    worker.shutdown();
    for event in events.try_iter() {
        view.apply(&event);
    }
    tui.cleanup()?;
    outcome?;

    if let Some(message) = view.failure {
        tracing::error!("Capture failed: {message}");
        report_error(
            "Capture Error",
            &format!("{message}\n\nCheck the input device with 'spectrec list-devices'."),
        )?;
        anyhow::bail!("Capture failed: {message}");
    }

    for path in &view.saved_recordings {
        println!("{}", path.display());
    }

    tracing::info!("=== spectrec capture exited ===");
    Ok(())
}
