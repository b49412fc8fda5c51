//! Shared setup for the commands that run the capture pipeline.

use crate::config::SpectrecConfig;
use crate::spectrogram::{
    CpalFrameSource, FrameSource, PipelineWorker, RecordingSink, SharedSpectrogram,
    SpectrogramSink, ToneSource, WavArchive,
};

/// Where the pipeline reads audio from.
#[derive(Debug, Clone, PartialEq)]
pub enum InputSelection {
    /// The configured capture device
    Device(String),
    /// Synthetic sine tone at the given frequency in Hz
    Tone(f32),
}

impl InputSelection {
    pub fn from_args(config: &SpectrecConfig, tone: Option<f32>) -> Self {
        match tone {
            Some(frequency) => Self::Tone(frequency),
            None => Self::Device(config.audio.device.clone()),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Device(name) => format!("device '{name}'"),
            Self::Tone(frequency) => format!("{frequency} Hz test tone"),
        }
    }
}

/// Spawns a pipeline worker for `config`, feeding `sink`.
///
/// The worker starts idle. Audio is archived on stop when the config asks for it.
///
/// # Errors
/// - If the tone frequency is out of range
/// - If the recording directory cannot be determined
/// - If the pipeline thread cannot be spawned
pub fn spawn_pipeline<K>(
    config: &SpectrecConfig,
    input: InputSelection,
    sink: K,
    buffer: SharedSpectrogram,
) -> anyhow::Result<PipelineWorker>
where
    K: SpectrogramSink + Send + 'static,
{
    let sample_rate = config.audio.sample_rate;
    let frame_size = config.audio.frame_size;

    if let InputSelection::Tone(frequency) = input {
        let nyquist = sample_rate as f32 / 2.0;
        if !(frequency.is_finite() && frequency > 0.0 && frequency < nyquist) {
            anyhow::bail!("Tone frequency must be between 0 and {nyquist} Hz, got {frequency}");
        }
    }

    let recorder: Option<Box<dyn RecordingSink + Send>> = if config.recording.save_on_stop {
        let output_dir = config.recording.resolved_output_dir()?;
        tracing::debug!("Recordings will be saved to {}", output_dir.display());
        Some(Box::new(WavArchive::new(output_dir)))
    } else {
        None
    };

    tracing::info!(
        "Spawning pipeline: input={}, sample_rate={}Hz, frame_size={}, depth={}, policy={}",
        input.describe(),
        sample_rate,
        frame_size,
        config.spectrogram.history_depth,
        config.spectrogram.normalization
    );

    let make_source = move || -> Box<dyn FrameSource> {
        match input {
            InputSelection::Device(name) => {
                Box::new(CpalFrameSource::new(name, sample_rate, frame_size))
            }
            InputSelection::Tone(frequency) => {
                Box::new(ToneSource::new(frequency, sample_rate, frame_size))
            }
        }
    };

    PipelineWorker::spawn(
        make_source,
        sink,
        config.pipeline_settings(),
        buffer,
        recorder,
        config.tick_interval(),
    )
}
