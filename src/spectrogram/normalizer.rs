//! Logarithmic level scaling of magnitude spectra into [0, 1].

use serde::{Deserialize, Serialize};

use super::analyzer::Spectrum;

/// Reference used for 0 dB.
///
/// Fixed per deployment through configuration, never switched between frames.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum NormalizationPolicy {
    /// 0 dB is a magnitude of 1.0.
    #[default]
    Absolute,
    /// 0 dB is the loudest bin of the current spectrum.
    Relative,
}

impl std::fmt::Display for NormalizationPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Absolute => write!(f, "absolute"),
            Self::Relative => write!(f, "relative"),
        }
    }
}

/// One spectrum scaled to display levels in [0, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRow {
    values: Vec<f32>,
}

impl NormalizedRow {
    pub fn zeros(width: usize) -> Self {
        Self {
            values: vec![0.0; width],
        }
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Values scaled to 0..=255, for compact streaming.
    pub fn quantized(&self) -> Vec<u8> {
        self.values
            .iter()
            .map(|v| (v * 255.0).round().clamp(0.0, 255.0) as u8)
            .collect()
    }
}

impl From<Vec<f32>> for NormalizedRow {
    /// Wraps raw values, clamping each into [0, 1].
    fn from(mut values: Vec<f32>) -> Self {
        for value in values.iter_mut() {
            *value = clamp_unit(*value);
        }
        Self { values }
    }
}

fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Converts magnitudes to dB and rescales `[db_min, db_max]` onto `[0, 1]`.
#[derive(Debug, Clone)]
pub struct LevelNormalizer {
    policy: NormalizationPolicy,
    db_min: f32,
    db_max: f32,
    floor: f32,
}

impl LevelNormalizer {
    /// `floor` is the magnitude substituted for anything smaller before the
    /// logarithm. Callers validate `db_min < db_max` and `floor > 0`.
    pub fn new(policy: NormalizationPolicy, db_min: f32, db_max: f32, floor: f32) -> Self {
        Self {
            policy,
            db_min,
            db_max,
            floor,
        }
    }

    pub fn policy(&self) -> NormalizationPolicy {
        self.policy
    }

    pub fn normalize(&self, spectrum: &Spectrum) -> NormalizedRow {
        let reference = match self.policy {
            NormalizationPolicy::Absolute => 1.0,
            // Nothing above the floor: there is no peak to scale against.
            NormalizationPolicy::Relative if spectrum.peak() <= self.floor => {
                return NormalizedRow::zeros(spectrum.len());
            }
            NormalizationPolicy::Relative => spectrum.peak(),
        };
        let span = self.db_max - self.db_min;

        let values = spectrum
            .magnitudes()
            .iter()
            .map(|&magnitude| {
                let db = 20.0 * (magnitude.max(self.floor) / reference).log10();
                let db = db.clamp(self.db_min, self.db_max);
                clamp_unit((db - self.db_min) / span)
            })
            .collect();

        NormalizedRow { values }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn absolute() -> LevelNormalizer {
        LevelNormalizer::new(NormalizationPolicy::Absolute, -120.0, 0.0, 1e-10)
    }

    #[test]
    fn test_absolute_silence_maps_to_zero() {
        let row = absolute().normalize(&Spectrum::from_magnitudes(vec![0.0; 2049]));
        assert_eq!(row.values().len(), 2049);
        assert!(row.values().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_output_clamped_at_both_ends() {
        let spectrum = Spectrum::from_magnitudes(vec![0.0, 1e-30, 1e-6, 0.5, 1.0, 1e12, f32::MAX]);
        for policy in [NormalizationPolicy::Absolute, NormalizationPolicy::Relative] {
            let row = LevelNormalizer::new(policy, -120.0, 0.0, 1e-10).normalize(&spectrum);
            assert!(row.values().iter().all(|v| (0.0..=1.0).contains(v)), "{policy}: {row:?}");
        }
    }

    #[test]
    fn test_absolute_scale_is_linear_in_db() {
        let row = absolute().normalize(&Spectrum::from_magnitudes(vec![1.0, 1e-3, 1e-6]));
        assert!((row.values()[0] - 1.0).abs() < 1e-6);
        assert!((row.values()[1] - 0.5).abs() < 1e-4);
        assert!(row.values()[2].abs() < 1e-4);
    }

    #[test]
    fn test_relative_peak_is_full_scale() {
        let normalizer = LevelNormalizer::new(NormalizationPolicy::Relative, -60.0, 0.0, 1e-10);
        let row = normalizer.normalize(&Spectrum::from_magnitudes(vec![0.002, 0.02, 0.00002]));
        assert!((row.values()[1] - 1.0).abs() < 1e-6);
        assert!((row.values()[0] - (40.0 / 60.0)).abs() < 1e-4);
        assert!(row.values()[2].abs() < 1e-4);
    }

    #[test]
    fn test_relative_silence_maps_to_zero() {
        let normalizer = LevelNormalizer::new(NormalizationPolicy::Relative, -120.0, 0.0, 1e-10);
        let row = normalizer.normalize(&Spectrum::from_magnitudes(vec![0.0; 16]));
        assert_eq!(row, NormalizedRow::zeros(16));
    }

    #[test]
    fn test_relative_below_floor_maps_to_zero() {
        let normalizer = LevelNormalizer::new(NormalizationPolicy::Relative, -120.0, 0.0, 1e-10);
        let row = normalizer.normalize(&Spectrum::from_magnitudes(vec![0.0, 0.0, 5e-11, 0.0]));
        assert_eq!(row, NormalizedRow::zeros(4));
    }

    #[test]
    fn test_relative_quiet_bins_stay_dark() {
        let normalizer = LevelNormalizer::new(NormalizationPolicy::Relative, -120.0, 0.0, 1e-10);
        let row = normalizer.normalize(&Spectrum::from_magnitudes(vec![0.0, 1e-3, 0.0]));
        assert_eq!(row.values()[0], 0.0);
        assert_eq!(row.values()[1], 1.0);
        assert_eq!(row.values()[2], 0.0);
    }

    #[test]
    fn test_quantized_row() {
        let row = NormalizedRow::from(vec![0.0, 0.5, 1.0, 2.0, -1.0]);
        assert_eq!(row.quantized(), vec![0, 128, 255, 255, 0]);
    }
}
