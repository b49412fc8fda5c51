//! Headless capture that writes the spectrogram to stdout as NDJSON.
//!
//! One JSON object per line, discriminated by `type`:
//! `metadata` once per session, `row` per tick, and `status` on lifecycle changes.

use serde::Serialize;
use std::io::{self, BufWriter, Write};
use std::sync::mpsc::Receiver;
use std::time::Duration;

use super::pipeline::{spawn_pipeline, InputSelection};
use crate::config::SpectrecConfig;
use crate::spectrogram::analyzer::bin_count;
use crate::spectrogram::{
    EventSender, FrequencyMetadata, PipelineEvent, SessionStatus, SharedSpectrogram,
};

#[derive(Serialize)]
#[serde(untagged)]
enum RowValues<'a> {
    Levels(&'a [f32]),
    Quantized(Vec<u8>),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamLine<'a> {
    Metadata(&'a FrequencyMetadata),
    Row {
        index: u64,
        values: RowValues<'a>,
        #[serde(skip_serializing_if = "Option::is_none")]
        snapshot: Option<&'a [Vec<f32>]>,
    },
    Status(&'a SessionStatus),
}

/// Writes `event` as one NDJSON line.
///
/// # Errors
/// - If serialization or the write fails
fn write_event<W: Write>(out: &mut W, event: &PipelineEvent, quantize: bool) -> anyhow::Result<()> {
    let line = match event {
        PipelineEvent::Metadata(metadata) => StreamLine::Metadata(metadata),
        PipelineEvent::Row {
            index,
            row,
            snapshot,
        } => StreamLine::Row {
            index: *index,
            values: if quantize {
                RowValues::Quantized(row.quantized())
            } else {
                RowValues::Levels(row.values())
            },
            snapshot: snapshot.as_deref(),
        },
        PipelineEvent::Status(status) => StreamLine::Status(status),
    };
    serde_json::to_writer(&mut *out, &line)?;
    out.write_all(b"\n")?;
    Ok(())
}

/// Copies events to `out` until the channel closes or the session fails.
///
/// Returns the failure message, if any.
fn forward_events<W: Write>(
    events: Receiver<PipelineEvent>,
    out: &mut W,
    quantize: bool,
) -> anyhow::Result<Option<String>> {
    for event in events {
        write_event(out, &event, quantize)?;
        match &event {
            PipelineEvent::Status(SessionStatus::Failed { message }) => {
                out.flush()?;
                return Ok(Some(message.clone()));
            }
            PipelineEvent::Row { .. } => {}
            _ => out.flush()?,
        }
    }
    out.flush()?;
    Ok(None)
}

/// Streams spectrogram rows to stdout until Ctrl+C, `duration` elapses, or the
/// device fails.
///
/// # Errors
/// - If the configuration is invalid
/// - If the pipeline cannot be set up
/// - If stdout is closed
/// - If the capture device fails
pub async fn handle_stream(
    duration: Option<u64>,
    quantize: bool,
    tone: Option<f32>,
) -> anyhow::Result<()> {
    let config = SpectrecConfig::load()?;

    let buffer = SharedSpectrogram::new(
        config.spectrogram.history_depth,
        bin_count(config.audio.frame_size),
    );
    let (tx, events) = std::sync::mpsc::channel();
    let worker = spawn_pipeline(
        &config,
        InputSelection::from_args(&config, tone),
        EventSender::new(tx),
        buffer,
    )?;

    let mut forwarder = tokio::task::spawn_blocking(move || {
        let mut out = BufWriter::new(io::stdout().lock());
        forward_events(events, &mut out, quantize)
    });

    worker.start();

    let deadline = async {
        match duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };

    let finished_early = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, stopping stream");
            None
        }
        _ = deadline => {
            tracing::info!("Stream duration elapsed");
            None
        }
        result = &mut forwarder => Some(result),
    };

    // Joining the pipeline thread drops its sender, which ends the forwarder.
    tokio::task::spawn_blocking(move || worker.shutdown()).await?;

    let result = match finished_early {
        Some(result) => result,
        None => forwarder.await,
    };

    match result?? {
        Some(message) => anyhow::bail!("Capture failed: {message}"),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spectrogram::normalizer::NormalizedRow;
    use serde_json::Value;
    use std::path::PathBuf;
    use std::sync::mpsc;

    fn lines(bytes: &[u8]) -> Vec<Value> {
        std::str::from_utf8(bytes)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn test_metadata_line_shape() {
        let mut out = Vec::new();
        let metadata = FrequencyMetadata::new(8000, 256, -120.0, 0.0);
        write_event(&mut out, &PipelineEvent::Metadata(metadata), false).unwrap();

        let parsed = lines(&out);
        assert_eq!(parsed[0]["type"], "metadata");
        assert_eq!(parsed[0]["binCount"], 129);
        assert_eq!(parsed[0]["freqMax"], 4000.0);
        assert_eq!(parsed[0]["binFreqs"].as_array().unwrap().len(), 129);
    }

    #[test]
    fn test_row_line_levels_and_quantized() {
        let event = PipelineEvent::Row {
            index: 7,
            row: NormalizedRow::from(vec![0.0, 0.5, 1.0]),
            snapshot: None,
        };

        let mut out = Vec::new();
        write_event(&mut out, &event, false).unwrap();
        write_event(&mut out, &event, true).unwrap();

        let parsed = lines(&out);
        assert_eq!(parsed[0]["type"], "row");
        assert_eq!(parsed[0]["index"], 7);
        assert_eq!(parsed[0]["values"][2], 1.0);
        assert!(parsed[0].get("snapshot").is_none());
        assert_eq!(parsed[1]["values"][0], 0);
        assert_eq!(parsed[1]["values"][2], 255);
    }

    #[test]
    fn test_status_lines() {
        let mut out = Vec::new();
        write_event(
            &mut out,
            &PipelineEvent::Status(SessionStatus::Stopped {
                recording: Some(PathBuf::from("/tmp/r.wav")),
            }),
            false,
        )
        .unwrap();
        write_event(&mut out, &PipelineEvent::Status(SessionStatus::Started), false).unwrap();

        let parsed = lines(&out);
        assert_eq!(parsed[0]["type"], "status");
        assert_eq!(parsed[0]["status"], "stopped");
        assert_eq!(parsed[0]["recording"], "/tmp/r.wav");
        assert_eq!(parsed[1]["status"], "started");
    }

    #[test]
    fn test_forward_stops_on_failure() {
        let (tx, rx) = mpsc::channel();
        tx.send(PipelineEvent::Status(SessionStatus::Started)).unwrap();
        tx.send(PipelineEvent::Status(SessionStatus::Failed {
            message: "gone".to_string(),
        }))
        .unwrap();
        tx.send(PipelineEvent::Status(SessionStatus::Started)).unwrap();

        let mut out = Vec::new();
        let failure = forward_events(rx, &mut out, false).unwrap();
        assert_eq!(failure.as_deref(), Some("gone"));
        assert_eq!(lines(&out).len(), 2);
    }

    #[test]
    fn test_forward_ends_when_channel_closes() {
        let (tx, rx) = mpsc::channel();
        tx.send(PipelineEvent::Status(SessionStatus::Started)).unwrap();
        drop(tx);

        let mut out = Vec::new();
        assert_eq!(forward_events(rx, &mut out, false).unwrap(), None);
        assert_eq!(lines(&out).len(), 1);
    }
}
