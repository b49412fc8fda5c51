//! Raw audio kept during a session and handed off when it stops.

use anyhow::{Context, Result};
use chrono::Local;
use hound::WavWriter;
use std::path::{Path, PathBuf};

/// Concatenated raw frames of one capture session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordedAudio {
    pub sample_rate: u32,
    pub samples: Vec<f32>,
}

impl RecordedAudio {
    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Heap held by the samples.
    pub fn memory_bytes(&self) -> usize {
        self.samples.len() * std::mem::size_of::<f32>()
    }
}

/// Receives the session's audio when capture stops.
pub trait RecordingSink {
    /// Persists `recording`, returning where it went, or `None` if nothing was written.
    fn persist(&mut self, recording: &RecordedAudio) -> Result<Option<PathBuf>>;
}

/// Writes each session as a mono 32-bit float WAV file named after the stop time.
pub struct WavArchive {
    output_dir: PathBuf,
}

impl WavArchive {
    pub fn new(output_dir: PathBuf) -> Self {
        Self { output_dir }
    }

    #[cfg(test)]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Picks `recording_YYYYmmdd_HHMMSS.wav`, adding a counter if that name is taken.
    fn next_path(&self) -> PathBuf {
        let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
        let mut path = self.output_dir.join(format!("recording_{stamp}.wav"));
        let mut counter = 1;
        while path.exists() {
            path = self
                .output_dir
                .join(format!("recording_{stamp}_{counter}.wav"));
            counter += 1;
        }
        path
    }
}

/// Writes `samples` as a mono 32-bit float WAV file.
pub fn write_wav(path: &Path, sample_rate: u32, samples: &[f32]) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };

    let mut writer = WavWriter::create(path, spec)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(())
}

impl RecordingSink for WavArchive {
    fn persist(&mut self, recording: &RecordedAudio) -> Result<Option<PathBuf>> {
        if recording.is_empty() {
            tracing::warn!("Capture stopped with no samples recorded");
            return Ok(None);
        }

        std::fs::create_dir_all(&self.output_dir).with_context(|| {
            format!(
                "Failed to create recordings directory {}",
                self.output_dir.display()
            )
        })?;

        let path = self.next_path();
        write_wav(&path, recording.sample_rate, &recording.samples)?;

        tracing::info!(
            "Recording saved: {} ({:.2}s, {} samples at {}Hz)",
            path.display(),
            recording.duration_secs(),
            recording.samples.len(),
            recording.sample_rate
        );
        Ok(Some(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_archive_writes_float_mono_wav() {
        let dir = tempfile::tempdir().unwrap();
        let mut archive = WavArchive::new(dir.path().join("recordings"));
        let recording = RecordedAudio {
            sample_rate: 44100,
            samples: vec![0.0, 0.5, -0.25, 1.0],
        };

        let path = archive.persist(&recording).unwrap().unwrap();
        assert!(path.starts_with(archive.output_dir()));
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("recording_"));

        let mut reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, 44100);
        assert_eq!(spec.bits_per_sample, 32);
        assert_eq!(spec.sample_format, hound::SampleFormat::Float);
        let samples: Vec<f32> = reader.samples::<f32>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, recording.samples);
    }

    #[test]
    fn test_archive_skips_empty_recordings() {
        let dir = tempfile::tempdir().unwrap();
        let mut archive = WavArchive::new(dir.path().to_path_buf());
        assert_eq!(archive.persist(&RecordedAudio::default()).unwrap(), None);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_archive_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let mut archive = WavArchive::new(dir.path().to_path_buf());
        let recording = RecordedAudio {
            sample_rate: 8000,
            samples: vec![0.1; 16],
        };
        let first = archive.persist(&recording).unwrap().unwrap();
        let second = archive.persist(&recording).unwrap().unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_duration() {
        let recording = RecordedAudio {
            sample_rate: 100,
            samples: vec![0.0; 250],
        };
        assert!((recording.duration_secs() - 2.5).abs() < 1e-6);
    }
}
