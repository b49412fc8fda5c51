//! What the pipeline tells its consumers: session metadata, rows, and status.

use serde::Serialize;
use std::path::PathBuf;
use std::sync::mpsc;

use super::analyzer::{bin_count, bin_frequency};
use super::normalizer::NormalizedRow;

/// Frequency layout of a session, sent once when capture starts.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrequencyMetadata {
    pub freq_min: f32,
    pub freq_max: f32,
    pub bin_count: usize,
    pub sample_rate: u32,
    pub frame_size: usize,
    pub db_min: f32,
    pub db_max: f32,
    pub bin_freqs: Vec<f32>,
}

impl FrequencyMetadata {
    pub fn new(sample_rate: u32, frame_size: usize, db_min: f32, db_max: f32) -> Self {
        let bins = bin_count(frame_size);
        let bin_freqs: Vec<f32> = (0..bins)
            .map(|bin| bin_frequency(bin, sample_rate, frame_size))
            .collect();

        Self {
            freq_min: 0.0,
            freq_max: sample_rate as f32 / 2.0,
            bin_count: bins,
            sample_rate,
            frame_size,
            db_min,
            db_max,
            bin_freqs,
        }
    }
}

/// Result of a start or stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlStatus {
    Started,
    Stopped,
    /// `start` while already capturing; nothing changed.
    AlreadyCapturing,
    /// `stop` while idle; nothing changed.
    AlreadyIdle,
}

/// Lifecycle notification for consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionStatus {
    Started,
    /// Capture ended normally. `recording` is the saved audio file, if any.
    Stopped { recording: Option<PathBuf> },
    /// A start/stop request that did not apply to the current state.
    Ignored { reason: ControlStatus },
    /// The session ended because of a device error.
    Failed { message: String },
    /// Audio was captured but could not be saved.
    RecordingNotSaved { message: String },
}

/// Consumer of pipeline output: a renderer, a network sender, or a test collector.
pub trait SpectrogramSink {
    fn on_metadata(&mut self, metadata: &FrequencyMetadata);

    /// Called once per tick. `index` counts rows since the session started;
    /// `snapshot` is the whole buffer (newest first) when snapshots are enabled.
    fn on_row(&mut self, index: u64, row: &NormalizedRow, snapshot: Option<&[Vec<f32>]>);

    fn on_status(&mut self, status: &SessionStatus);
}

/// Owned form of the sink callbacks, for crossing threads.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    Metadata(FrequencyMetadata),
    Row {
        index: u64,
        row: NormalizedRow,
        snapshot: Option<Vec<Vec<f32>>>,
    },
    Status(SessionStatus),
}

/// Sink that forwards everything over a channel.
///
/// A disconnected receiver is not an error: the pipeline keeps running and
/// events are dropped.
pub struct EventSender {
    tx: mpsc::Sender<PipelineEvent>,
}

impl EventSender {
    pub fn new(tx: mpsc::Sender<PipelineEvent>) -> Self {
        Self { tx }
    }

    fn send(&self, event: PipelineEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("Event receiver gone, dropping event");
        }
    }
}

impl SpectrogramSink for EventSender {
    fn on_metadata(&mut self, metadata: &FrequencyMetadata) {
        self.send(PipelineEvent::Metadata(metadata.clone()));
    }

    fn on_row(&mut self, index: u64, row: &NormalizedRow, snapshot: Option<&[Vec<f32>]>) {
        self.send(PipelineEvent::Row {
            index,
            row: row.clone(),
            snapshot: snapshot.map(<[Vec<f32>]>::to_vec),
        });
    }

    fn on_status(&mut self, status: &SessionStatus) {
        self.send(PipelineEvent::Status(status.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_for_4096_at_44100() {
        let metadata = FrequencyMetadata::new(44100, 4096, -120.0, 0.0);
        assert_eq!(metadata.bin_count, 2049);
        assert_eq!(metadata.bin_freqs.len(), 2049);
        assert_eq!(metadata.bin_freqs[0], 0.0);
        assert_eq!(metadata.bin_freqs[2048], 22050.0);
        assert_eq!(metadata.freq_max, 22050.0);
    }

    #[test]
    fn test_metadata_serializes_camel_case() {
        let metadata = FrequencyMetadata::new(8000, 8, -90.0, 0.0);
        let json = serde_json::to_value(&metadata).unwrap();
        assert_eq!(json["freqMin"], 0.0);
        assert_eq!(json["freqMax"], 4000.0);
        assert_eq!(json["binCount"], 5);
        assert_eq!(json["dbMin"], -90.0);
        assert_eq!(json["binFreqs"].as_array().unwrap().len(), 5);
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_value(SessionStatus::Ignored {
            reason: ControlStatus::AlreadyIdle,
        })
        .unwrap();
        assert_eq!(json["status"], "ignored");
        assert_eq!(json["reason"], "already_idle");
    }

    #[test]
    fn test_event_sender_survives_dropped_receiver() {
        let (tx, rx) = mpsc::channel();
        let mut sender = EventSender::new(tx);
        sender.on_status(&SessionStatus::Started);
        assert_eq!(rx.recv().unwrap(), PipelineEvent::Status(SessionStatus::Started));

        drop(rx);
        sender.on_row(0, &NormalizedRow::zeros(3), None);
    }
}
