//! Configuration of the microphone array, the room, and the pipeline.
//!
//! Configurations are stored with [serde] and [ron]. Every field has a
//! default, so a file only needs to list what differs, for example the
//! microphones known to be faulty:
//!
//! ```text
//! (
//!     sample_rate: 48000,
//!     ceiling: (reference_channel: 0, faulty_channels: [7, 19]),
//!     wall: (reference_channel: 32, faulty_channels: [45]),
//! )
//! ```

use crate::error::LocatorError;
use crate::SubArray;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, str::FromStr, time::Duration};

/// Everything the locator needs to know about the array, the room, and the
/// processing pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorConfig {
    /// Samples per second delivered by the capture device
    pub sample_rate: u32,
    /// Samples per channel per period
    pub frame_size: usize,
    /// Total number of microphones, split evenly between the sub-arrays
    pub channel_count: usize,
    /// Speed of sound in meters per second
    pub speed_of_sound: f64,
    /// Periods of level data accumulated before gains are derived
    pub calibration_periods: usize,
    /// The static band-pass filter applied before delay estimation
    pub band_pass: BandPass,
    /// Settings for the ceiling sub-array
    pub ceiling: SubArrayConfig,
    /// Settings for the wall sub-array
    pub wall: SubArrayConfig,
    /// The physically valid room volume
    pub room: RoomBounds,
    /// Solutions further than this from the origin are discarded, in meters
    pub max_solution_distance: f64,
    /// Frames that may wait between capture and processing
    pub queue_capacity: usize,
    /// Estimates that may wait for a consumer
    pub output_capacity: usize,
}

/// Cutoffs of the windowed-sinc FIR band-pass filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BandPass {
    /// Lower cutoff in Hz
    pub low_hz: f64,
    /// Upper cutoff in Hz
    pub high_hz: f64,
    /// Number of FIR taps
    pub taps: usize,
}

/// Per sub-array settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubArrayConfig {
    /// Preferred reference microphone (global channel id)
    pub reference_channel: usize,
    /// Microphones excluded from the default activation mask (global ids)
    pub faulty_channels: Vec<usize>,
}

/// Room envelope, in centimeters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomBounds {
    /// Positions are limited to `-max_x..=max_x`
    pub max_x: f64,
    /// Positions are limited to `-max_y..=max_y`
    pub max_y: f64,
    /// Height of the ceiling above the floor
    pub height: f64,
    /// Depth at which the ceiling array is mounted
    pub ceiling_depth: f64,
    /// Height of the floor
    pub floor_level: f64,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            frame_size: 2048,
            channel_count: 64,
            speed_of_sound: 343.0,
            calibration_periods: 100,
            band_pass: BandPass::default(),
            ceiling: SubArrayConfig {
                reference_channel: 0,
                faulty_channels: Vec::new(),
            },
            wall: SubArrayConfig {
                reference_channel: 32,
                faulty_channels: Vec::new(),
            },
            room: RoomBounds::default(),
            max_solution_distance: 100.0,
            queue_capacity: 8,
            output_capacity: 64,
        }
    }
}

impl Default for BandPass {
    fn default() -> Self {
        Self {
            low_hz: 300.0,
            high_hz: 8000.0,
            taps: 129,
        }
    }
}

impl Default for SubArrayConfig {
    fn default() -> Self {
        Self {
            reference_channel: 0,
            faulty_channels: Vec::new(),
        }
    }
}

impl Default for RoomBounds {
    fn default() -> Self {
        Self {
            max_x: 300.0,
            max_y: 250.0,
            height: 280.0,
            ceiling_depth: 0.0,
            floor_level: 0.0,
        }
    }
}

impl LocatorConfig {
    /// Read a configuration from a RON file and validate it.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, LocatorError> {
        fs::read_to_string(path)?.parse()
    }

    /// Write the configuration out as pretty-printed RON.
    pub fn to_path(&self, path: impl AsRef<Path>) -> Result<(), LocatorError> {
        fs::write(path, self.to_ron()?)?;
        Ok(())
    }

    /// Serialize the configuration to pretty-printed RON.
    pub fn to_ron(&self) -> Result<String, LocatorError> {
        Ok(ron::ser::to_string_pretty(
            self,
            ron::ser::PrettyConfig::default(),
        )?)
    }

    /// The settings of one sub-array.
    pub fn sub_array(&self, sub: SubArray) -> &SubArrayConfig {
        match sub {
            SubArray::Ceiling => &self.ceiling,
            SubArray::Wall => &self.wall,
        }
    }

    /// Channels in each sub-array.
    pub fn channels_per_sub_array(&self) -> usize {
        self.channel_count / 2
    }

    /// Number of interleaved values in one period of capture.
    pub fn period_len(&self) -> usize {
        self.frame_size * self.channel_count
    }

    /// Wall-clock length of one period.
    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(self.frame_size as f64 / self.sample_rate as f64)
    }

    /// Checks the invariants the rest of the locator relies on.
    pub fn validate(&self) -> Result<(), LocatorError> {
        let fail = |reason: String| Err(LocatorError::Config(reason));

        if self.sample_rate == 0 {
            return fail("sample rate must be positive".to_owned());
        }
        if self.frame_size == 0 {
            return fail("frame size must be positive".to_owned());
        }
        if self.channel_count == 0 || self.channel_count % 2 != 0 {
            return fail(format!(
                "channel count must be a positive even number, got {}",
                self.channel_count
            ));
        }
        if !(self.speed_of_sound.is_finite() && self.speed_of_sound > 0.0) {
            return fail(format!("speed of sound {} is not usable", self.speed_of_sound));
        }
        if self.calibration_periods == 0 {
            return fail("calibration needs at least one period".to_owned());
        }

        let nyquist = self.sample_rate as f64 / 2.0;
        let bp = &self.band_pass;
        if !(0.0 <= bp.low_hz && bp.low_hz < bp.high_hz && bp.high_hz <= nyquist) {
            return fail(format!(
                "band-pass {}..{} Hz does not fit below {} Hz",
                bp.low_hz, bp.high_hz, nyquist
            ));
        }
        if bp.taps == 0 {
            return fail("band-pass filter needs at least one tap".to_owned());
        }

        for sub in SubArray::ALL {
            let range = sub.channels(self.channel_count);
            let settings = self.sub_array(sub);
            if !range.contains(&settings.reference_channel) {
                return fail(format!(
                    "{} reference channel {} is outside {:?}",
                    sub, settings.reference_channel, range
                ));
            }
            if let Some(bad) = settings
                .faulty_channels
                .iter()
                .find(|c| !range.contains(c))
            {
                return fail(format!(
                    "{} faulty channel {} is outside {:?}",
                    sub, bad, range
                ));
            }
        }

        let room = &self.room;
        let extents = [room.max_x, room.max_y, room.height];
        if extents.iter().any(|v| !(v.is_finite() && *v >= 0.0))
            || !room.ceiling_depth.is_finite()
            || !room.floor_level.is_finite()
        {
            return fail(format!("room bounds {:?} are not usable", room));
        }

        if !(self.max_solution_distance > 0.0) {
            return fail("maximum solution distance must be positive".to_owned());
        }
        if self.queue_capacity == 0 || self.output_capacity == 0 {
            return fail("queues need room for at least one entry".to_owned());
        }

        Ok(())
    }
}

impl FromStr for LocatorConfig {
    type Err = LocatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: LocatorConfig = ron::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        let config = LocatorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.channels_per_sub_array(), 32);
        assert_eq!(config.period_len(), 2048 * 64);
    }

    #[test]
    fn partial_file_uses_defaults() {
        let text = "(sample_rate: 16000, wall: (reference_channel: 40, faulty_channels: [45, 50]))";
        let config: LocatorConfig = text.parse().unwrap();
        assert_eq!(config.sample_rate, 16_000);
        assert_eq!(config.wall.reference_channel, 40);
        assert_eq!(config.wall.faulty_channels, vec![45, 50]);
        assert_eq!(config.ceiling, LocatorConfig::default().ceiling);
    }

    #[test]
    fn write_and_read_path() {
        let tempfile = tempfile::NamedTempFile::new().unwrap();
        let mut config = LocatorConfig::default();
        config.ceiling.faulty_channels = vec![3, 17];
        config.room.height = 310.0;

        config.to_path(tempfile.path()).unwrap();
        let read_config = LocatorConfig::from_path(tempfile.path()).unwrap();
        assert_eq!(config, read_config);
    }

    #[test]
    fn reference_outside_sub_array() {
        let text = "(ceiling: (reference_channel: 40))";
        assert!(matches!(
            text.parse::<LocatorConfig>(),
            Err(LocatorError::Config(_))
        ));
    }

    #[test]
    fn odd_channel_count() {
        let config = LocatorConfig {
            channel_count: 63,
            ..LocatorConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn band_above_nyquist() {
        let mut config = LocatorConfig::default();
        config.band_pass.high_hz = 30_000.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn shipped_room_file_is_the_default() {
        let config: LocatorConfig = include_str!("../config/room.ron").parse().unwrap();
        assert_eq!(config, LocatorConfig::default());
    }

    #[test]
    fn shipped_faulty_channel_example() {
        // Swap each empty list for the commented entry below it.
        let text = include_str!("../config/room.ron")
            .replace("faulty_channels: [],\n", "")
            .replace("// faulty_channels:", "faulty_channels:");
        let config: LocatorConfig = text.parse().unwrap();
        config.validate().unwrap();
        assert_eq!(config.ceiling.faulty_channels, vec![7, 19]);
        assert_eq!(config.wall.faulty_channels, vec![45]);

        let selector = crate::selector::ChannelSelector::new(&config);
        assert_eq!(selector.active_count(SubArray::Ceiling), 30);
        assert!(!selector.activation_mask(SubArray::Wall)[45 - 32]);
    }

    #[test]
    fn garbage_is_a_ron_error() {
        assert!(matches!(
            "(sample_rate: ".parse::<LocatorConfig>(),
            Err(LocatorError::RonSpannedError(_))
        ));
    }
}
