//! Equal-loudness calibration of the array.
//!
//! Every period the capture side hands the calibrator the mean-square level
//! of each channel. Once enough periods have been seen, each channel's gain
//! is the array's median RMS divided by the channel's own RMS, so a quiet
//! microphone is boosted and a hot one is attenuated.

use crate::error::LocatorError;

/// Accumulates per-channel mean-square levels until calibration completes.
#[derive(Debug, Clone)]
pub struct ChannelCalibrator {
    accumulated: Vec<f64>,
    periods: usize,
    required: usize,
}

/// Mean-square power of a block of samples.
pub fn mean_square(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum / samples.len() as f64) as f32
}

/// Multiply a block of samples by a gain, in place.
pub fn apply_gain(samples: &mut [f32], gain: f32) {
    for s in samples {
        *s *= gain;
    }
}

impl ChannelCalibrator {
    /// A calibrator for `channel_count` channels that needs `required_periods`
    /// calls to [`ChannelCalibrator::accumulate`] before it can produce gains.
    pub fn new(channel_count: usize, required_periods: usize) -> Self {
        Self {
            accumulated: vec![0.0; channel_count],
            periods: 0,
            required: required_periods,
        }
    }

    /// Add one period of mean-square levels, one per channel.
    pub fn accumulate(&mut self, levels: &[f32]) -> Result<(), LocatorError> {
        if levels.len() != self.accumulated.len() {
            return Err(LocatorError::FrameShape {
                expected: self.accumulated.len(),
                got: levels.len(),
            });
        }
        for (acc, &level) in self.accumulated.iter_mut().zip(levels) {
            *acc += level as f64;
        }
        self.periods += 1;
        Ok(())
    }

    /// `true` once the configured number of periods has been accumulated.
    pub fn is_calibrated(&self) -> bool {
        self.periods >= self.required
    }

    /// Periods accumulated since construction or the last reset.
    pub fn periods(&self) -> usize {
        self.periods
    }

    /// Forget everything accumulated so far and start a new calibration.
    pub fn reset(&mut self) {
        self.accumulated.fill(0.0);
        self.periods = 0;
    }

    /// Long-run RMS level of every channel.
    pub fn rms_levels(&self) -> Vec<f64> {
        let periods = self.periods.max(1) as f64;
        self.accumulated
            .iter()
            .map(|acc| (acc / periods).sqrt())
            .collect()
    }

    /// A snapshot of the gain for every channel. Channels that never carried
    /// any signal keep a gain of 1.
    pub fn gains(&self) -> Result<Vec<f32>, LocatorError> {
        if !self.is_calibrated() {
            return Err(LocatorError::NotCalibrated {
                periods: self.periods,
                required: self.required,
            });
        }

        let rms = self.rms_levels();
        let Some(target) = median(rms.iter().copied().filter(|&r| r > 0.0).collect()) else {
            return Ok(vec![1.0; rms.len()]);
        };

        Ok(rms
            .iter()
            .map(|&r| if r > 0.0 { (target / r) as f32 } else { 1.0 })
            .collect())
    }
}

fn median(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_calibrated_before_threshold() {
        let mut calibrator = ChannelCalibrator::new(4, 100);
        for _ in 0..99 {
            calibrator.accumulate(&[0.1; 4]).unwrap();
        }
        assert!(!calibrator.is_calibrated());
        assert!(matches!(
            calibrator.gains(),
            Err(LocatorError::NotCalibrated {
                periods: 99,
                required: 100
            })
        ));

        calibrator.accumulate(&[0.1; 4]).unwrap();
        assert!(calibrator.is_calibrated());
        assert!(calibrator.gains().is_ok());
    }

    #[test]
    fn balanced_array_keeps_unit_gain() {
        let mut calibrator = ChannelCalibrator::new(8, 100);
        for _ in 0..150 {
            calibrator.accumulate(&[0.37; 8]).unwrap();
        }
        assert_eq!(calibrator.gains().unwrap(), vec![1.0; 8]);
    }

    #[test]
    fn quiet_channel_is_boosted() {
        let mut calibrator = ChannelCalibrator::new(5, 100);
        for _ in 0..120 {
            calibrator
                .accumulate(&[0.04, 0.04, 0.01, 0.04, 0.04])
                .unwrap();
        }
        let gains = calibrator.gains().unwrap();
        assert!(gains[2] > 1.0);
        // A quarter of the power is half of the amplitude.
        assert!((gains[2] - 2.0).abs() < 1e-5);
        for i in [0, 1, 3, 4] {
            assert!((gains[i] - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn dead_channel_keeps_unit_gain() {
        let mut calibrator = ChannelCalibrator::new(3, 1);
        calibrator.accumulate(&[0.0, 0.5, 0.5]).unwrap();
        assert_eq!(calibrator.gains().unwrap()[0], 1.0);
    }

    #[test]
    fn reset_starts_over() {
        let mut calibrator = ChannelCalibrator::new(2, 2);
        calibrator.accumulate(&[1.0, 1.0]).unwrap();
        calibrator.accumulate(&[1.0, 1.0]).unwrap();
        assert!(calibrator.is_calibrated());
        calibrator.reset();
        assert_eq!(calibrator.periods(), 0);
        assert!(calibrator.gains().is_err());
    }

    #[test]
    fn wrong_channel_count() {
        let mut calibrator = ChannelCalibrator::new(2, 2);
        assert!(calibrator.accumulate(&[1.0]).is_err());
        assert_eq!(calibrator.periods(), 0);
    }

    #[test]
    fn level_helpers() {
        assert_eq!(mean_square(&[]), 0.0);
        assert_eq!(mean_square(&[1.0, -1.0, 1.0, -1.0]), 1.0);
        let mut samples = [0.5, -0.25];
        apply_gain(&mut samples, 2.0);
        assert_eq!(samples, [1.0, -0.5]);
    }
}
