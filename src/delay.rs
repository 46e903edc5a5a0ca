//! Time delay estimation with GCC-PHAT.
//!
//! For every active channel other than the reference, the cross spectrum
//! `X_ref · conj(X_other)` is reduced to pure phase, transformed back to a
//! cross-correlation, and searched for its peak. The search never leaves
//! `[-Δ, Δ]` lags, where `Δ` is the largest delay the two microphones can
//! physically observe: their distance divided by the speed of sound.
//!
//! A positive `tau` means the sound reached the other microphone first, so
//! `tau · c / fs` is the reference's range minus the other microphone's.

use crate::config::LocatorConfig;
use crate::selector::Dataset;
use crate::spectral::{ChannelSpectrum, SpectralAnalyzer, Spectrum};
use crate::Point3;

use log::trace;
use rustfft::{num_complex::Complex, FftPlanner};
use std::collections::BTreeMap;
use std::f64::consts::PI;

/// Bins in the half spectrum the static band-pass filter is designed for.
/// Spectra of any other length are used unfiltered.
pub const FILTER_BINS: usize = 1024;

/// A `(reference, other)` channel pair.
pub type PairKey = (usize, usize);

/// All delay observations of one period, ordered by pair.
pub type Observations = BTreeMap<PairKey, DelayObservation>;

/// The delay measured between the reference microphone and one other.
#[derive(Debug, Clone, PartialEq)]
pub struct DelayObservation {
    /// Reference channel id
    pub reference: usize,
    /// Other channel id
    pub other: usize,
    /// Delay in samples, within `-max_delay..=max_delay`
    pub tau: i32,
    /// Largest delay the pair can physically observe, in samples
    pub max_delay: i32,
    /// Position of the other microphone, in centimeters
    pub position: Point3,
    /// Distance between the two microphones, in centimeters
    pub distance: f64,
    /// `tau` converted to a range difference, in meters
    pub range_difference: f64,
}

/// GCC-PHAT over a dataset of channels. Owns its FFT plans, filter, and
/// per-period spectrum storage so repeated calls do not reallocate.
pub struct DelayEstimator {
    analyzer: SpectralAnalyzer,
    filter: Spectrum,
    sample_rate: f64,
    speed_of_sound: f64,
    spectra: BTreeMap<usize, ChannelSpectrum>,
}

/// Frequency response of a Hamming-windowed sinc band-pass FIR filter,
/// sampled on the first `FILTER_BINS` bins of a `2 * FILTER_BINS` point FFT.
pub fn band_pass_response(low_hz: f64, high_hz: f64, taps: usize, sample_rate: f64) -> Spectrum {
    let fft_len = 2 * FILTER_BINS;
    let taps = taps.clamp(1, fft_len);
    let center = (taps - 1) as f64 / 2.0;
    let low = low_hz / sample_rate;
    let high = high_hz / sample_rate;

    let sinc = |x: f64| {
        if x == 0.0 {
            1.0
        } else {
            (PI * x).sin() / (PI * x)
        }
    };

    let mut buffer = vec![Complex::new(0.0, 0.0); fft_len];
    for (n, tap) in buffer.iter_mut().take(taps).enumerate() {
        let t = n as f64 - center;
        let ideal = 2.0 * high * sinc(2.0 * high * t) - 2.0 * low * sinc(2.0 * low * t);
        let window = if taps > 1 {
            0.54 - 0.46 * (2.0 * PI * n as f64 / (taps - 1) as f64).cos()
        } else {
            1.0
        };
        *tap = Complex::new(ideal * window, 0.0);
    }

    FftPlanner::new()
        .plan_fft_forward(fft_len)
        .process(&mut buffer);
    buffer.truncate(FILTER_BINS);
    buffer
}

/// Reorder a circular cross-correlation so that zero lag sits in the middle:
/// index `i` of the result holds lag `i - len / 2`.
fn center_lags(correlation: &[f64]) -> Vec<f64> {
    let len = correlation.len();
    let half = len / 2;
    (0..len).map(|i| correlation[(i + half) % len]).collect()
}

impl DelayEstimator {
    /// Build an estimator for the configured sample rate, speed of sound and
    /// band-pass filter.
    pub fn new(config: &LocatorConfig) -> Self {
        let sample_rate = config.sample_rate as f64;
        let bp = &config.band_pass;
        Self {
            analyzer: SpectralAnalyzer::new(),
            filter: band_pass_response(bp.low_hz, bp.high_hz, bp.taps, sample_rate),
            sample_rate,
            speed_of_sound: config.speed_of_sound,
            spectra: BTreeMap::new(),
        }
    }

    /// The largest delay, in samples, that two microphones `distance`
    /// centimeters apart can observe.
    pub fn max_delay(&self, distance: f64) -> i32 {
        (distance / 100.0 * self.sample_rate / self.speed_of_sound).ceil() as i32
    }

    /// Meters travelled by sound during one sample.
    pub fn meters_per_sample(&self) -> f64 {
        self.speed_of_sound / self.sample_rate
    }

    /// Measure the delay between `reference` and every other active channel
    /// of the dataset. Pairs without usable data are left out; a missing
    /// reference yields no observations at all.
    pub fn estimate(&mut self, dataset: &Dataset, reference: usize) -> Observations {
        let mut observations = Observations::new();
        self.spectra.clear();

        let Some(reference_frame) = dataset.get(&reference).filter(|f| f.active) else {
            trace!("reference channel {} not in dataset", reference);
            return observations;
        };

        for (&channel, frame) in dataset.iter().filter(|(_, f)| f.active) {
            let mut spectrum = self.analyzer.forward_transform(&frame.samples, true);
            if spectrum.len() == self.filter.len() {
                for (bin, h) in spectrum.iter_mut().zip(&self.filter) {
                    *bin *= *h;
                }
            }
            self.spectra.insert(
                channel,
                ChannelSpectrum {
                    channel,
                    bins: spectrum,
                },
            );
        }

        let Some(reference_spectrum) = self.spectra.get(&reference).map(|s| &s.bins) else {
            return observations;
        };

        for (&other, frame) in dataset.iter().filter(|(_, f)| f.active) {
            if other == reference {
                continue;
            }
            let Some(other_spectrum) = self.spectra.get(&other).map(|s| &s.bins) else {
                continue;
            };
            if other_spectrum.len() != reference_spectrum.len() || other_spectrum.is_empty() {
                trace!("pair ({}, {}) has mismatched spectra", reference, other);
                continue;
            }

            let mut usable = false;
            let weighted: Spectrum = reference_spectrum
                .iter()
                .zip(other_spectrum)
                .map(|(r, o)| {
                    let cross = r * o.conj();
                    let magnitude = cross.norm();
                    if magnitude > 0.0 {
                        usable = true;
                        cross / magnitude
                    } else {
                        Complex::new(0.0, 0.0)
                    }
                })
                .collect();
            if !usable {
                trace!(
                    "pair ({}, {}) has an empty cross spectrum",
                    reference, other
                );
                continue;
            }

            let correlation: Vec<f64> = self
                .analyzer
                .inverse_transform(&weighted, true)
                .iter()
                .map(|c| c.re)
                .collect();
            let lags = center_lags(&correlation);
            let center = lags.len() / 2;

            let distance = reference_frame.position.distance(&frame.position);
            let max_delay = self.max_delay(distance);
            let window = (max_delay.max(0) as usize).min(center);
            let first = center - window;
            let last = (center + window).min(lags.len() - 1);

            let mut peak = first;
            for i in first..=last {
                if lags[i] > lags[peak] {
                    peak = i;
                }
            }
            let tau = peak as i32 - center as i32;

            observations.insert(
                (reference, other),
                DelayObservation {
                    reference,
                    other,
                    tau,
                    max_delay,
                    position: frame.position,
                    distance,
                    range_difference: tau as f64 * self.meters_per_sample(),
                },
            );
        }

        observations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::ChannelFrame;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    const LEAD: usize = 64;

    fn white_noise(len: usize, seed: u64) -> Vec<f32> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..len).map(|_| rng.gen_range(-1.0..1.0)).collect()
    }

    /// `source` delayed by `delay` samples, `frame_size` long.
    fn delayed(source: &[f32], delay: i32, frame_size: usize) -> Vec<f32> {
        let start = (LEAD as i32 - delay) as usize;
        source[start..start + frame_size].to_vec()
    }

    fn frame(channel: usize, samples: Vec<f32>, position: Point3) -> ChannelFrame {
        ChannelFrame {
            channel,
            samples,
            position,
            active: true,
        }
    }

    #[test]
    fn finds_integer_shift() {
        let config = LocatorConfig::default();
        let mut estimator = DelayEstimator::new(&config);
        let source = white_noise(2048 + 2 * LEAD, 11);

        let mut dataset = Dataset::new();
        dataset.insert(
            0,
            frame(0, delayed(&source, 0, 2048), Point3::new(0.0, 0.0, 0.0)),
        );
        dataset.insert(
            1,
            frame(1, delayed(&source, 12, 2048), Point3::new(100.0, 0.0, 0.0)),
        );
        dataset.insert(
            2,
            frame(2, delayed(&source, -7, 2048), Point3::new(0.0, 80.0, 0.0)),
        );

        let observations = estimator.estimate(&dataset, 0);
        assert_eq!(observations.len(), 2);
        // Arriving later at the other microphone gives a negative tau.
        assert_eq!(observations[&(0, 1)].tau, -12);
        assert_eq!(observations[&(0, 2)].tau, 7);
        assert_eq!(observations[&(0, 1)].max_delay, 140);
        assert_eq!(observations[&(0, 1)].distance, 100.0);
        assert!((observations[&(0, 2)].range_difference - 7.0 * 343.0 / 48_000.0).abs() < 1e-12);
    }

    #[test]
    fn search_stays_inside_physical_window() {
        let config = LocatorConfig::default();
        let mut estimator = DelayEstimator::new(&config);
        let source = white_noise(2048 + 2 * LEAD, 5);

        // Two centimeters apart, yet the signal is shifted by 20 samples.
        let mut dataset = Dataset::new();
        dataset.insert(3, frame(3, delayed(&source, 0, 2048), Point3::new(0.0, 0.0, 0.0)));
        dataset.insert(4, frame(4, delayed(&source, 20, 2048), Point3::new(2.0, 0.0, 0.0)));

        let observations = estimator.estimate(&dataset, 3);
        let observation = &observations[&(3, 4)];
        assert_eq!(observation.max_delay, 3);
        assert!(observation.tau.abs() <= observation.max_delay);
    }

    #[test]
    fn unfiltered_frame_sizes_still_work() {
        let config = LocatorConfig {
            frame_size: 1000,
            ..LocatorConfig::default()
        };
        let mut estimator = DelayEstimator::new(&config);
        let source = white_noise(1000 + 2 * LEAD, 8);

        let mut dataset = Dataset::new();
        dataset.insert(0, frame(0, delayed(&source, 0, 1000), Point3::new(0.0, 0.0, 0.0)));
        dataset.insert(1, frame(1, delayed(&source, 4, 1000), Point3::new(50.0, 0.0, 0.0)));

        let observations = estimator.estimate(&dataset, 0);
        assert_eq!(observations[&(0, 1)].tau, -4);
    }

    #[test]
    fn missing_reference_yields_nothing() {
        let config = LocatorConfig::default();
        let mut estimator = DelayEstimator::new(&config);
        let source = white_noise(2048 + 2 * LEAD, 2);

        let mut dataset = Dataset::new();
        dataset.insert(1, frame(1, delayed(&source, 0, 2048), Point3::new(0.0, 0.0, 0.0)));
        dataset.insert(2, frame(2, delayed(&source, 3, 2048), Point3::new(30.0, 0.0, 0.0)));

        assert!(estimator.estimate(&dataset, 0).is_empty());
    }

    #[test]
    fn silent_channel_is_skipped() {
        let config = LocatorConfig::default();
        let mut estimator = DelayEstimator::new(&config);
        let source = white_noise(2048 + 2 * LEAD, 9);

        let mut dataset = Dataset::new();
        dataset.insert(
            0,
            frame(0, delayed(&source, 0, 2048), Point3::new(0.0, 0.0, 0.0)),
        );
        dataset.insert(1, frame(1, vec![0.0; 2048], Point3::new(40.0, 0.0, 0.0)));
        dataset.insert(2, frame(2, delayed(&source, 2, 2048), Point3::new(0.0, 40.0, 0.0)));

        let observations = estimator.estimate(&dataset, 0);
        assert!(!observations.contains_key(&(0, 1)));
        assert_eq!(observations[&(0, 2)].tau, -2);
    }

    #[test]
    fn filter_passes_the_band() {
        let response = band_pass_response(300.0, 8000.0, 129, 48_000.0);
        assert_eq!(response.len(), FILTER_BINS);
        let bin = |hz: f64| (hz / 48_000.0 * 2048.0).round() as usize;
        assert!(response[bin(2000.0)].norm() > 0.9);
        assert!(response[bin(16_000.0)].norm() < 0.05);
    }

    #[test]
    fn lag_axis_is_centered() {
        let correlation = [0.0, 1.0, 2.0, 3.0, -4.0, -3.0, -2.0, -1.0];
        assert_eq!(
            center_lags(&correlation),
            vec![-4.0, -3.0, -2.0, -1.0, 0.0, 1.0, 2.0, 3.0]
        );
    }
}
