//! Simulated absorbance spectrometer.
//!
//! Models a lamp, a dark current and a sample with a few absorption bands.
//! Absorbance is computed the way the real instrument firmware does:
//! `1000 * log10(reference / (raw - dark))`, zero wherever either side is
//! non-positive. Until a reference is captured every pixel reads zero.

use crate::common::{ErrorConfig, MockRng};
use anyhow::Result;
use chrom_core::Spectrometer;
use parking_lot::Mutex;

/// Dark current in counts.
const DARK_COUNTS: f64 = 500.0;

/// One Gaussian absorption band, in milli-absorbance units at unit concentration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Band {
    pub center_nm: f64,
    pub width_nm: f64,
    pub height: f64,
}

#[derive(Debug, Default)]
struct Calibration {
    dark: Option<Vec<f64>>,
    reference: Option<Vec<f64>>,
    reference_captures: u32,
    background_captures: u32,
}

pub struct MockSpectrometer {
    name: &'static str,
    wavelengths: Vec<f64>,
    lamp: Vec<f64>,
    bands: Vec<Band>,
    /// Sample concentration scaling every band.
    concentration: Mutex<f64>,
    /// Detector noise, counts (1σ).
    noise: f64,
    calibration: Mutex<Calibration>,
    rng: MockRng,
    errors: ErrorConfig,
}

impl MockSpectrometer {
    pub fn new(name: &'static str, start_nm: f64, end_nm: f64, pixels: usize, bands: Vec<Band>) -> Self {
        let pixels = pixels.max(2);
        let step = (end_nm - start_nm) / (pixels - 1) as f64;
        let wavelengths: Vec<f64> = (0..pixels).map(|i| start_nm + step * i as f64).collect();
        let center = (start_nm + end_nm) / 2.0;
        let width = (end_nm - start_nm).abs().max(f64::EPSILON);
        let lamp = wavelengths
            .iter()
            .map(|w| 5_000.0 + 40_000.0 * (-((w - center) / width).powi(2)).exp())
            .collect();
        Self {
            name,
            wavelengths,
            lamp,
            bands,
            concentration: Mutex::new(1.0),
            noise: 0.0,
            calibration: Mutex::new(Calibration::default()),
            rng: MockRng::new(Some(0)),
            errors: ErrorConfig::none(),
        }
    }

    /// 200–400 nm, 128 pixels, bands at 254 and 280 nm.
    pub fn uv() -> Self {
        Self::new(
            "mock_uv",
            200.0,
            400.0,
            128,
            vec![
                Band {
                    center_nm: 254.0,
                    width_nm: 12.0,
                    height: 350.0,
                },
                Band {
                    center_nm: 280.0,
                    width_nm: 15.0,
                    height: 500.0,
                },
            ],
        )
    }

    /// 900–1700 nm, 128 pixels, water band at 1450 nm.
    pub fn nir() -> Self {
        Self::new(
            "mock_nir",
            900.0,
            1700.0,
            128,
            vec![Band {
                center_nm: 1450.0,
                width_nm: 60.0,
                height: 800.0,
            }],
        )
    }

    pub fn with_noise(mut self, counts: f64) -> Self {
        self.noise = counts.max(0.0);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = MockRng::new(Some(seed));
        self
    }

    pub fn with_errors(mut self, errors: ErrorConfig) -> Self {
        self.errors = errors;
        self
    }

    pub fn errors(&self) -> &ErrorConfig {
        &self.errors
    }

    pub fn set_concentration(&self, value: f64) {
        *self.concentration.lock() = value;
    }

    pub fn reference_captures(&self) -> u32 {
        self.calibration.lock().reference_captures
    }

    pub fn background_captures(&self) -> u32 {
        self.calibration.lock().background_captures
    }

    fn sample_absorbance(&self, wavelength: f64) -> f64 {
        let concentration = *self.concentration.lock();
        self.bands
            .iter()
            .map(|b| b.height * (-((wavelength - b.center_nm) / b.width_nm).powi(2)).exp())
            .sum::<f64>()
            * concentration
    }

    /// Raw detector counts with the lamp on (or off).
    fn collect(&self, lamp_on: bool) -> Vec<f64> {
        self.wavelengths
            .iter()
            .zip(&self.lamp)
            .map(|(w, lamp)| {
                let light = if lamp_on {
                    lamp * 10f64.powf(-self.sample_absorbance(*w) / 1000.0)
                } else {
                    0.0
                };
                DARK_COUNTS + light + self.rng.gaussian(self.noise)
            })
            .collect()
    }
}

impl Spectrometer for MockSpectrometer {
    fn wavelengths(&self) -> Vec<f64> {
        self.wavelengths.clone()
    }

    fn read_absorbance(&self) -> Result<Vec<f64>> {
        self.errors.check_operation(self.name, "read_absorbance")?;
        let raw = self.collect(true);
        let calibration = self.calibration.lock();
        let Some(reference) = calibration.reference.as_ref() else {
            return Ok(vec![0.0; raw.len()]);
        };
        let dark = calibration.dark.as_deref();
        Ok(raw
            .iter()
            .enumerate()
            .map(|(i, counts)| {
                let signal = counts - dark.map_or(0.0, |d| d[i]);
                let reference = reference[i];
                if signal > 0.0 && reference > 0.0 {
                    1000.0 * (reference / signal).log10()
                } else {
                    0.0
                }
            })
            .collect())
    }

    fn set_reference(&self) -> Result<()> {
        self.errors.check_operation(self.name, "set_reference")?;
        let raw = self.collect(true);
        let mut calibration = self.calibration.lock();
        let reference = match calibration.dark.as_deref() {
            Some(dark) => raw.iter().zip(dark).map(|(r, d)| r - d).collect(),
            None => raw,
        };
        calibration.reference = Some(reference);
        calibration.reference_captures += 1;
        tracing::debug!(spectrometer = self.name, "Reference captured");
        Ok(())
    }

    fn set_background(&self) -> Result<()> {
        self.errors.check_operation(self.name, "set_background")?;
        let dark = self.collect(false);
        let mut calibration = self.calibration.lock();
        calibration.dark = Some(dark);
        calibration.background_captures += 1;
        tracing::debug!(spectrometer = self.name, "Background captured");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_before_reference() {
        let uv = MockSpectrometer::uv();
        let absorbance = uv.read_absorbance().unwrap();
        assert_eq!(absorbance.len(), uv.wavelengths().len());
        assert!(absorbance.iter().all(|a| *a == 0.0));
    }

    #[test]
    fn test_absorbance_tracks_concentration() {
        let uv = MockSpectrometer::uv();
        uv.set_background().unwrap();
        uv.set_reference().unwrap();
        let baseline = uv.read_absorbance().unwrap();
        assert!(baseline.iter().all(|a| a.abs() < 1e-9));

        uv.set_concentration(2.0);
        let absorbance = uv.read_absorbance().unwrap();
        let peak = absorbance.iter().cloned().fold(f64::MIN, f64::max);
        assert!(peak > 100.0, "peak {peak}");
        assert_eq!(uv.reference_captures(), 1);
        assert_eq!(uv.background_captures(), 1);
    }

    #[test]
    fn test_wavelength_grid() {
        let nir = MockSpectrometer::nir();
        let wl = nir.wavelengths();
        assert_eq!(wl.len(), 128);
        assert_eq!(wl[0], 900.0);
        assert!((wl[127] - 1700.0).abs() < 1e-9);
    }
}
