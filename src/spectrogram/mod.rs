//! Real-time audio-to-spectrogram pipeline.
//!
//! Frame source → spectral analyzer → level normalizer → rolling buffer, driven
//! one tick at a time by the pipeline driver and hosted on its own thread by the
//! worker.

pub mod analyzer;
pub mod buffer;
pub mod cadence;
pub mod device;
pub mod driver;
pub mod error;
pub mod events;
pub mod normalizer;
pub mod recording;
pub mod source;
pub mod worker;

pub use buffer::SharedSpectrogram;
pub use device::{list_input_devices, CpalFrameSource};
pub use driver::PipelineSettings;
pub use events::{EventSender, FrequencyMetadata, PipelineEvent, SessionStatus, SpectrogramSink};
pub use normalizer::NormalizationPolicy;
pub use recording::{RecordingSink, WavArchive};
pub use source::{FrameSource, ToneSource};
pub use worker::PipelineWorker;
