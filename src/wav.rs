//! Multi-channel WAV files, read as capture periods and written by the
//! simulator's recorder.

use crate::config::LocatorConfig;
use crate::error::LocatorError;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use log::{debug, warn};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// Read a WAV file as interleaved periods of `frame_size × channel_count`
/// samples in `[-1, 1]`. A trailing partial period is left out.
pub fn read_periods(
    path: impl AsRef<Path>,
    config: &LocatorConfig,
) -> Result<Vec<Vec<f32>>, LocatorError> {
    let mut reader = WavReader::open(path.as_ref())?;
    let spec = reader.spec();

    if spec.channels as usize != config.channel_count {
        return Err(LocatorError::Config(format!(
            "{} has {} channels, the array has {}",
            path.as_ref().display(),
            spec.channels,
            config.channel_count
        )));
    }
    if spec.sample_rate != config.sample_rate {
        warn!(
            "{} is sampled at {} Hz, processing as {} Hz",
            path.as_ref().display(),
            spec.sample_rate,
            config.sample_rate
        );
    }

    let samples: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        SampleFormat::Int => {
            let full_scale = (1_i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|s| s as f32 / full_scale))
                .collect::<Result<_, _>>()?
        }
    };

    let period_len = config.period_len();
    let leftover = samples.len() % period_len;
    if leftover != 0 {
        debug!("ignoring {} samples of a partial period", leftover);
    }

    Ok(samples
        .chunks_exact(period_len)
        .map(<[f32]>::to_vec)
        .collect())
}

/// Writes interleaved periods to a 32-bit float WAV file.
pub struct WavRecorder {
    writer: WavWriter<BufWriter<File>>,
    channels: usize,
}

impl WavRecorder {
    /// Create (or truncate) a recording for the configured array.
    pub fn create(path: impl AsRef<Path>, config: &LocatorConfig) -> Result<Self, LocatorError> {
        let spec = WavSpec {
            channels: config.channel_count as u16,
            sample_rate: config.sample_rate,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        Ok(Self {
            writer: WavWriter::create(path, spec)?,
            channels: config.channel_count,
        })
    }

    /// Append one interleaved period.
    pub fn write_period(&mut self, interleaved: &[f32]) -> Result<(), LocatorError> {
        if interleaved.len() % self.channels != 0 {
            return Err(LocatorError::FrameShape {
                expected: interleaved.len() - interleaved.len() % self.channels,
                got: interleaved.len(),
            });
        }
        for &sample in interleaved {
            self.writer.write_sample(sample)?;
        }
        Ok(())
    }

    /// Flush and close the file, writing the final header.
    pub fn finalize(self) -> Result<(), LocatorError> {
        Ok(self.writer.finalize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn tiny_config() -> LocatorConfig {
        let mut config = LocatorConfig {
            channel_count: 4,
            frame_size: 8,
            sample_rate: 16_000,
            ..LocatorConfig::default()
        };
        config.wall.reference_channel = 2;
        config
    }

    #[test]
    fn record_then_replay() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("capture.wav");
        let config = tiny_config();

        let first: Vec<f32> = (0..32).map(|i| i as f32 / 64.0).collect();
        let second: Vec<f32> = (0..32).map(|i| -(i as f32) / 64.0).collect();

        let mut recorder = WavRecorder::create(&path, &config).unwrap();
        recorder.write_period(&first).unwrap();
        recorder.write_period(&second).unwrap();
        // Half a period, dropped on replay
        recorder.write_period(&[0.5; 16]).unwrap();
        recorder.finalize().unwrap();

        let periods = read_periods(&path, &config).unwrap();
        assert_eq!(periods, vec![first, second]);
    }

    #[test]
    fn integer_samples_are_normalized() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("int.wav");
        let config = tiny_config();

        let spec = WavSpec {
            channels: 4,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(&path, spec).unwrap();
        for i in 0..32 {
            let value: i16 = if i % 2 == 0 { 16_384 } else { -32_768 };
            writer.write_sample(value).unwrap();
        }
        writer.finalize().unwrap();

        let periods = read_periods(&path, &config).unwrap();
        assert_eq!(periods.len(), 1);
        assert_eq!(periods[0][0], 0.5);
        assert_eq!(periods[0][1], -1.0);
    }

    #[test]
    fn channel_count_must_match() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        let config = tiny_config();

        let two_channels = LocatorConfig {
            channel_count: 2,
            ..tiny_config()
        };
        let mut recorder = WavRecorder::create(&path, &two_channels).unwrap();
        recorder.write_period(&[0.0; 16]).unwrap();
        recorder.finalize().unwrap();

        assert!(matches!(
            read_periods(&path, &config),
            Err(LocatorError::Config(_))
        ));
    }

    #[test]
    fn ragged_period_is_rejected() {
        let dir = tempdir().unwrap();
        let mut recorder = WavRecorder::create(dir.path().join("r.wav"), &tiny_config()).unwrap();
        assert!(recorder.write_period(&[0.0; 5]).is_err());
    }
}
