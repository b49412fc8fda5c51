//! Windowed FFT magnitude spectrum of one frame.

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

use super::source::Frame;

/// Magnitudes of the non-redundant half of a real FFT: `frame_size / 2 + 1` bins.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    magnitudes: Vec<f32>,
}

impl Spectrum {
    pub fn magnitudes(&self) -> &[f32] {
        &self.magnitudes
    }

    pub fn len(&self) -> usize {
        self.magnitudes.len()
    }

    /// Index of the loudest bin, `None` for an empty spectrum.
    pub fn peak_bin(&self) -> Option<usize> {
        self.magnitudes
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(index, _)| index)
    }

    /// Largest magnitude, 0.0 for an empty spectrum.
    pub fn peak(&self) -> f32 {
        self.peak_bin().map_or(0.0, |bin| self.magnitudes[bin])
    }
}

/// Number of spectrum bins produced for a frame size.
pub fn bin_count(frame_size: usize) -> usize {
    frame_size / 2 + 1
}

/// Centre frequency of bin `k` in Hz.
pub fn bin_frequency(bin: usize, sample_rate: u32, frame_size: usize) -> f32 {
    (bin as f64 * sample_rate as f64 / frame_size as f64) as f32
}

/// Hann window of length `len`: `0.5 - 0.5 * cos(2*pi*i / (len - 1))`.
pub fn hann_window(len: usize) -> Vec<f32> {
    if len < 2 {
        return vec![1.0; len];
    }
    let denom = (len - 1) as f64;
    (0..len)
        .map(|i| (0.5 - 0.5 * (2.0 * std::f64::consts::PI * i as f64 / denom).cos()) as f32)
        .collect()
}

/// Spectral analyzer for one fixed frame size.
///
/// The FFT plan, window and work buffers are created once and reused for every
/// frame.
pub struct SpectralAnalyzer {
    frame_size: usize,
    window: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
    buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl SpectralAnalyzer {
    pub fn new(frame_size: usize) -> Self {
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(frame_size);
        let scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];

        Self {
            frame_size,
            window: hann_window(frame_size),
            fft,
            buffer: vec![Complex::new(0.0, 0.0); frame_size],
            scratch,
        }
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn bin_count(&self) -> usize {
        bin_count(self.frame_size)
    }

    /// Windows the frame, transforms it and returns bin magnitudes.
    ///
    /// Frames shorter than the analyzer's size are zero-padded; longer frames are
    /// truncated. The driver rejects mismatched frames before they get here.
    pub fn analyze(&mut self, frame: &Frame) -> Spectrum {
        let samples = frame.samples();
        for (i, slot) in self.buffer.iter_mut().enumerate() {
            let sample = samples.get(i).copied().unwrap_or(0.0);
            *slot = Complex::new(sample * self.window[i], 0.0);
        }

        self.fft.process_with_scratch(&mut self.buffer, &mut self.scratch);

        let magnitudes = self.buffer[..self.bin_count()]
            .iter()
            .map(|c| {
                let magnitude = c.norm();
                if magnitude.is_finite() {
                    magnitude
                } else {
                    0.0
                }
            })
            .collect();

        Spectrum { magnitudes }
    }
}

#[cfg(test)]
impl Spectrum {
    pub(crate) fn from_magnitudes(magnitudes: Vec<f32>) -> Self {
        Self { magnitudes }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spectrogram::source::{FrameSource, ToneSource};

    #[test]
    fn test_bin_count_for_power_of_two_sizes() {
        for exponent in 4..=13 {
            let frame_size = 1usize << exponent;
            let mut analyzer = SpectralAnalyzer::new(frame_size);
            let frame = Frame::new(
                (0..frame_size)
                    .map(|i| ((i * 7919) % 200) as f32 / 100.0 - 1.0)
                    .collect(),
            );
            let spectrum = analyzer.analyze(&frame);

            assert_eq!(spectrum.len(), frame_size / 2 + 1);
            assert!(spectrum.magnitudes().iter().all(|m| m.is_finite() && *m >= 0.0));
        }
    }

    #[test]
    fn test_silence_gives_zero_magnitudes() {
        let mut analyzer = SpectralAnalyzer::new(1024);
        let spectrum = analyzer.analyze(&Frame::new(vec![0.0; 1024]));
        assert!(spectrum.magnitudes().iter().all(|&m| m == 0.0));
    }

    #[test]
    fn test_hann_window_shape() {
        let window = hann_window(8);
        assert!(window[0].abs() < 1e-7);
        assert!(window[7].abs() < 1e-7);
        assert!(window.iter().all(|w| (0.0..=1.0).contains(w)));
        assert_eq!(hann_window(1), vec![1.0]);
    }

    #[test]
    fn test_bin_frequencies_span_to_nyquist() {
        assert_eq!(bin_count(4096), 2049);
        assert_eq!(bin_frequency(0, 44100, 4096), 0.0);
        assert_eq!(bin_frequency(2048, 44100, 4096), 22050.0);
    }

    #[test]
    fn test_sine_tone_peaks_at_its_frequency() {
        let sample_rate = 44100;
        let frame_size = 4096;
        let mut source = ToneSource::new(1000.0, sample_rate, frame_size).unpaced();
        source.open().unwrap();
        let frame = source.read_frame().unwrap();

        let mut analyzer = SpectralAnalyzer::new(frame_size);
        let spectrum = analyzer.analyze(&frame);
        let peak = spectrum.peak_bin().unwrap();

        let bin_width = sample_rate as f32 / frame_size as f32;
        let peak_hz = bin_frequency(peak, sample_rate, frame_size);
        assert!((peak_hz - 1000.0).abs() <= bin_width, "peak at {peak_hz}Hz");
    }

    #[test]
    fn test_analyzer_reuse_is_deterministic() {
        let mut analyzer = SpectralAnalyzer::new(512);
        let frame = Frame::new((0..512).map(|i| (i as f32 * 0.1).sin()).collect());
        let first = analyzer.analyze(&frame);
        let second = analyzer.analyze(&frame);
        assert_eq!(first, second);
    }
}
