//! Capture session state machine.
//!
//! The driver owns one frame source and runs one pipeline pass per `tick`:
//! read a frame, analyze it, normalize it, push it into the rolling buffer and
//! hand the row to the sink. Scheduling lives outside (see `worker`), which keeps
//! every pass testable with synthetic frames.

use std::path::PathBuf;

use super::analyzer::SpectralAnalyzer;
use super::buffer::SharedSpectrogram;
use super::error::CaptureError;
use super::events::{ControlStatus, FrequencyMetadata, SessionStatus, SpectrogramSink};
use super::normalizer::{LevelNormalizer, NormalizationPolicy};
use super::recording::{RecordedAudio, RecordingSink};
use super::source::FrameSource;

/// Pipeline tuning that stays fixed for the driver's lifetime.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub history_depth: usize,
    pub normalization: NormalizationPolicy,
    pub db_min: f32,
    pub db_max: f32,
    pub floor_epsilon: f32,
    /// Send the full buffer along with every row.
    pub include_snapshot: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            history_depth: 100,
            normalization: NormalizationPolicy::Absolute,
            db_min: -120.0,
            db_max: 0.0,
            floor_epsilon: 1e-10,
            include_snapshot: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Capturing,
}

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Not capturing; nothing was read.
    Idle,
    /// A frame was lost to overflow or was malformed; no row emitted.
    Skipped,
    /// A new row was pushed and delivered.
    Row,
}

pub struct PipelineDriver<S: FrameSource, K: SpectrogramSink> {
    source: S,
    sink: K,
    settings: PipelineSettings,
    normalizer: LevelNormalizer,
    analyzer: Option<SpectralAnalyzer>,
    buffer: SharedSpectrogram,
    recorder: Option<Box<dyn RecordingSink + Send>>,
    recorded: RecordedAudio,
    state: CaptureState,
    rows: u64,
    skipped: u64,
}

impl<S: FrameSource, K: SpectrogramSink> PipelineDriver<S, K> {
    pub fn new(source: S, sink: K, settings: PipelineSettings, buffer: SharedSpectrogram) -> Self {
        let normalizer = LevelNormalizer::new(
            settings.normalization,
            settings.db_min,
            settings.db_max,
            settings.floor_epsilon,
        );

        Self {
            source,
            sink,
            settings,
            normalizer,
            analyzer: None,
            buffer,
            recorder: None,
            recorded: RecordedAudio::default(),
            state: CaptureState::Idle,
            rows: 0,
            skipped: 0,
        }
    }

    /// Keeps raw audio during each session and hands it to `recorder` on stop.
    pub fn with_recorder(mut self, recorder: Box<dyn RecordingSink + Send>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    /// Opens the source and begins a session.
    ///
    /// # Errors
    /// - `DeviceUnavailable` if the source cannot be opened; the driver stays idle
    pub fn start(&mut self) -> Result<ControlStatus, CaptureError> {
        if self.state == CaptureState::Capturing {
            tracing::debug!("Start requested while already capturing");
            self.sink.on_status(&SessionStatus::Ignored {
                reason: ControlStatus::AlreadyCapturing,
            });
            return Ok(ControlStatus::AlreadyCapturing);
        }

        if let Err(err) = self.source.open() {
            tracing::error!("Failed to start capture: {}", err);
            self.source.close();
            self.sink.on_status(&SessionStatus::Failed {
                message: err.to_string(),
            });
            return Err(err);
        }

        let frame_size = self.source.frame_size();
        let sample_rate = self.source.sample_rate();
        if self.analyzer.as_ref().map(SpectralAnalyzer::frame_size) != Some(frame_size) {
            self.analyzer = Some(SpectralAnalyzer::new(frame_size));
        }

        let metadata =
            FrequencyMetadata::new(sample_rate, frame_size, self.settings.db_min, self.settings.db_max);
        self.buffer
            .resize(self.settings.history_depth, metadata.bin_count);
        self.recorded = RecordedAudio {
            sample_rate,
            samples: Vec::new(),
        };
        self.rows = 0;
        self.skipped = 0;
        self.state = CaptureState::Capturing;

        tracing::info!(
            "Capture started: {}Hz, frame size {}, {} bins, {} normalization",
            sample_rate,
            frame_size,
            metadata.bin_count,
            self.normalizer.policy()
        );

        self.sink.on_metadata(&metadata);
        self.sink.on_status(&SessionStatus::Started);
        Ok(ControlStatus::Started)
    }

    /// Runs one pipeline pass.
    ///
    /// # Errors
    /// - `DeviceFailed` when the source dies; the session is already torn down
    ///   and a `Failed` status has been sent when this returns
    pub fn tick(&mut self) -> Result<TickOutcome, CaptureError> {
        if self.state != CaptureState::Capturing {
            return Ok(TickOutcome::Idle);
        }

        let frame = match self.source.read_frame() {
            Ok(frame) => frame,
            Err(err) if err.is_fatal() => {
                tracing::error!("Capture failed: {}", err);
                self.end_session(SessionStatus::Failed {
                    message: err.to_string(),
                });
                return Err(err);
            }
            Err(err) => {
                tracing::debug!("Skipping tick: {}", err);
                self.skipped += 1;
                return Ok(TickOutcome::Skipped);
            }
        };

        let Some(analyzer) = self.analyzer.as_mut() else {
            return Ok(TickOutcome::Idle);
        };

        if frame.len() != analyzer.frame_size() {
            let err = CaptureError::InvalidFrame {
                expected: analyzer.frame_size(),
                actual: frame.len(),
            };
            tracing::warn!("Skipping tick: {}", err);
            self.skipped += 1;
            return Ok(TickOutcome::Skipped);
        }

        if self.recorder.is_some() {
            let before = self.recorded.samples.len();
            self.recorded.samples.extend_from_slice(frame.samples());
            if let Some(minutes) = recording_notice(
                before,
                self.recorded.samples.len(),
                self.recorded.sample_rate,
            ) {
                tracing::warn!(
                    "Holding {} minutes of raw audio in memory ({:.0} MB) until capture stops",
                    minutes,
                    self.recorded.memory_bytes() as f64 / (1024.0 * 1024.0)
                );
            }
        }

        let spectrum = analyzer.analyze(&frame);
        let row = self.normalizer.normalize(&spectrum);
        self.buffer.push(&row);

        let snapshot = self
            .settings
            .include_snapshot
            .then(|| self.buffer.snapshot());
        self.sink.on_row(self.rows, &row, snapshot.as_deref());
        self.rows += 1;

        Ok(TickOutcome::Row)
    }

    /// Ends the session.
    ///
    /// Stopping while idle is a no-op reported as `AlreadyIdle`.
    pub fn stop(&mut self) -> ControlStatus {
        if self.state != CaptureState::Capturing {
            tracing::debug!("Stop requested while idle");
            self.sink.on_status(&SessionStatus::Ignored {
                reason: ControlStatus::AlreadyIdle,
            });
            return ControlStatus::AlreadyIdle;
        }

        tracing::info!(
            "Capture stopped after {} rows ({} skipped)",
            self.rows,
            self.skipped
        );
        let recording = self.release();
        self.sink.on_status(&SessionStatus::Stopped { recording });
        ControlStatus::Stopped
    }

    fn end_session(&mut self, status: SessionStatus) {
        self.release();
        self.sink.on_status(&status);
    }

    /// Closes the device, flushes recorded audio and clears session state.
    fn release(&mut self) -> Option<PathBuf> {
        self.source.close();
        let recording = self.flush_recording();
        self.buffer.reset();
        self.state = CaptureState::Idle;
        recording
    }

    fn flush_recording(&mut self) -> Option<PathBuf> {
        let recorded = std::mem::take(&mut self.recorded);
        let recorder = self.recorder.as_mut()?;

        match recorder.persist(&recorded) {
            Ok(path) => path,
            Err(err) => {
                tracing::error!("Failed to save recording: {:#}", err);
                self.sink.on_status(&SessionStatus::RecordingNotSaved {
                    message: format!("{err:#}"),
                });
                None
            }
        }
    }
}

#[cfg(test)]
impl<S: FrameSource, K: SpectrogramSink> PipelineDriver<S, K> {
    pub fn buffer(&self) -> &SharedSpectrogram {
        &self.buffer
    }

    /// Rows delivered in the current (or last) session.
    pub fn rows_emitted(&self) -> u64 {
        self.rows
    }

    pub fn ticks_skipped(&self) -> u64 {
        self.skipped
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }
}

/// Raw audio kept for the recording sink is reported every this many minutes.
const RECORDING_NOTICE_MINUTES: u64 = 10;

/// Minutes of held audio, if growing from `before` to `after` samples
/// crossed a notice mark.
fn recording_notice(before: usize, after: usize, sample_rate: u32) -> Option<u64> {
    let mark = u64::from(sample_rate) * 60 * RECORDING_NOTICE_MINUTES;
    if mark == 0 {
        return None;
    }
    let reached = after as u64 / mark;
    (reached > before as u64 / mark).then_some(reached * RECORDING_NOTICE_MINUTES)
}

impl<S: FrameSource, K: SpectrogramSink> Drop for PipelineDriver<S, K> {
    fn drop(&mut self) {
        if self.state == CaptureState::Capturing {
            self.stop();
        }
    }
}
