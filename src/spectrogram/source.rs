//! Frame sources: fixed-size blocks of mono samples at a fixed rate.

use std::f64::consts::PI;
use std::time::{Duration, Instant};

use super::error::CaptureError;

/// One block of consecutively captured mono samples.
///
/// Non-finite samples are replaced by silence on construction, so downstream
/// stages only ever see finite input.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    samples: Box<[f32]>,
}

impl Frame {
    pub fn new(mut samples: Vec<f32>) -> Self {
        for sample in samples.iter_mut().filter(|s| !s.is_finite()) {
            *sample = 0.0;
        }
        Self {
            samples: samples.into_boxed_slice(),
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }
}

/// Supplier of fixed-size audio frames.
///
/// `read_frame` blocks until a full frame is available. Implementations recover
/// from transient overflow on their own; a returned `DeviceOverflow` is treated
/// by the driver as one skipped tick.
pub trait FrameSource {
    /// Acquires the underlying device.
    fn open(&mut self) -> Result<(), CaptureError>;

    /// Blocks until exactly `frame_size()` samples are available.
    fn read_frame(&mut self) -> Result<Frame, CaptureError>;

    /// Releases the device. Safe to call when not open.
    fn close(&mut self);

    fn is_open(&self) -> bool;

    /// Sample rate in Hz. Reflects the device's actual rate once open.
    fn sample_rate(&self) -> u32;

    fn frame_size(&self) -> usize;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn open(&mut self) -> Result<(), CaptureError> {
        (**self).open()
    }

    fn read_frame(&mut self) -> Result<Frame, CaptureError> {
        (**self).read_frame()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn sample_rate(&self) -> u32 {
        (**self).sample_rate()
    }

    fn frame_size(&self) -> usize {
        (**self).frame_size()
    }
}

/// Synthetic sine generator, used when no microphone is wanted (`--tone`).
///
/// Paced sources sleep so frames arrive at the rate a real device would
/// deliver them.
pub struct ToneSource {
    frequency: f32,
    amplitude: f32,
    sample_rate: u32,
    frame_size: usize,
    position: u64,
    paced: bool,
    next_frame_at: Option<Instant>,
    open: bool,
}

impl ToneSource {
    pub fn new(frequency: f32, sample_rate: u32, frame_size: usize) -> Self {
        Self {
            frequency,
            amplitude: 0.5,
            sample_rate,
            frame_size,
            position: 0,
            paced: true,
            next_frame_at: None,
            open: false,
        }
    }

    /// Produces frames immediately instead of in real time.
    pub fn unpaced(mut self) -> Self {
        self.paced = false;
        self
    }

    pub fn with_amplitude(mut self, amplitude: f32) -> Self {
        self.amplitude = amplitude;
        self
    }

    fn frame_duration(&self) -> Duration {
        Duration::from_secs_f64(self.frame_size as f64 / self.sample_rate as f64)
    }
}

impl FrameSource for ToneSource {
    fn open(&mut self) -> Result<(), CaptureError> {
        if self.sample_rate == 0 || self.frame_size == 0 {
            return Err(CaptureError::DeviceUnavailable(
                "tone generator needs a non-zero sample rate and frame size".to_string(),
            ));
        }
        self.position = 0;
        self.next_frame_at = None;
        self.open = true;
        tracing::info!(
            "Tone source opened: {}Hz at {}Hz sample rate",
            self.frequency,
            self.sample_rate
        );
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Frame, CaptureError> {
        if !self.open {
            return Err(CaptureError::DeviceFailed("tone source is not open".to_string()));
        }

        if self.paced {
            let now = Instant::now();
            let due = self.next_frame_at.unwrap_or(now);
            if due > now {
                std::thread::sleep(due - now);
            }
            self.next_frame_at = Some(due.max(now) + self.frame_duration());
        }

        let step = 2.0 * PI * self.frequency as f64 / self.sample_rate as f64;
        let start = self.position;
        let samples = (0..self.frame_size as u64)
            .map(|i| self.amplitude * ((start + i) as f64 * step).sin() as f32)
            .collect();
        self.position += self.frame_size as u64;

        Ok(Frame::new(samples))
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn frame_size(&self) -> usize {
        self.frame_size
    }
}
