//! Dedicated pipeline thread driven by start/stop commands.
//!
//! Commands are only looked at between ticks, so a stop lets the pass in flight
//! finish and takes effect before the next one is scheduled.

use anyhow::{anyhow, Result};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::buffer::SharedSpectrogram;
use super::cadence::{Cadence, FixedCadence};
use super::driver::{CaptureState, PipelineDriver, PipelineSettings};
use super::events::SpectrogramSink;
use super::recording::RecordingSink;
use super::source::FrameSource;

/// Control messages for the pipeline thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    Shutdown,
}

/// Handle to the pipeline thread. Dropping it shuts the thread down.
pub struct PipelineWorker {
    commands: Sender<Command>,
    handle: Option<JoinHandle<()>>,
}

impl PipelineWorker {
    /// Spawns the pipeline thread.
    ///
    /// The source is built on the new thread by `make_source`, so device handles
    /// never cross threads.
    ///
    /// # Errors
    /// - If the OS refuses to spawn the thread
    pub fn spawn<F, S, K>(
        make_source: F,
        sink: K,
        settings: PipelineSettings,
        buffer: SharedSpectrogram,
        recorder: Option<Box<dyn RecordingSink + Send>>,
        tick_interval: Duration,
    ) -> Result<Self>
    where
        F: FnOnce() -> S + Send + 'static,
        S: FrameSource + 'static,
        K: SpectrogramSink + Send + 'static,
    {
        let (commands, inbox) = mpsc::channel();

        let handle = thread::Builder::new()
            .name("spectrogram-pipeline".to_string())
            .spawn(move || {
                let mut driver = PipelineDriver::new(make_source(), sink, settings, buffer);
                if let Some(recorder) = recorder {
                    driver = driver.with_recorder(recorder);
                }
                run_loop(&mut driver, &inbox, FixedCadence::new(tick_interval));
                tracing::debug!("Pipeline thread exiting");
            })
            .map_err(|e| anyhow!("Failed to spawn pipeline thread: {e}"))?;

        Ok(Self {
            commands,
            handle: Some(handle),
        })
    }

    pub fn start(&self) {
        self.send(Command::Start);
    }

    pub fn stop(&self) {
        self.send(Command::Stop);
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::warn!("Pipeline thread is gone, dropping {:?}", command);
        }
    }

    /// Stops any session and waits for the thread to exit.
    pub fn shutdown(mut self) {
        self.join();
    }

    fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.commands.send(Command::Shutdown);
            if handle.join().is_err() {
                tracing::error!("Pipeline thread panicked");
            }
        }
    }
}

impl Drop for PipelineWorker {
    fn drop(&mut self) {
        self.join();
    }
}

/// Next command to act on: blocks while idle, polls while capturing.
fn next_command(inbox: &Receiver<Command>, state: CaptureState) -> Option<Command> {
    match state {
        CaptureState::Idle => Some(inbox.recv().unwrap_or(Command::Shutdown)),
        CaptureState::Capturing => match inbox.try_recv() {
            Ok(command) => Some(command),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Command::Shutdown),
        },
    }
}

fn run_loop<S, K, C>(driver: &mut PipelineDriver<S, K>, inbox: &Receiver<Command>, mut cadence: C)
where
    S: FrameSource,
    K: SpectrogramSink,
    C: Cadence,
{
    loop {
        match next_command(inbox, driver.state()) {
            Some(Command::Start) => {
                if driver.start().is_ok() {
                    cadence.reset();
                }
                continue;
            }
            Some(Command::Stop) => {
                driver.stop();
                continue;
            }
            Some(Command::Shutdown) => {
                if driver.state() == CaptureState::Capturing {
                    driver.stop();
                }
                return;
            }
            None => {}
        }

        cadence.wait_for_tick();
        if let Err(err) = driver.tick() {
            tracing::warn!("Capture session ended: {}", err);
        }
    }
}
