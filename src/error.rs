//! The error type shared by every part of the locator.

use std::{borrow::Cow, fmt};

/// Everything that can go wrong while configuring or feeding the locator.
/// Skippable conditions inside a period (a missing pair, too few delays, a
/// singular system) are not errors; they are counted by the pipeline instead.
#[derive(Debug)]
pub enum LocatorError {
    /// Calibration gains were requested before enough periods were accumulated.
    NotCalibrated {
        /// Periods accumulated so far
        periods: usize,
        /// Periods needed before gains exist
        required: usize,
    },

    /// A sub-array id other than 0 (ceiling) or 1 (wall).
    InvalidSubArray(usize),

    /// An activation mask whose length does not match the sub-array size.
    MaskLength {
        /// Channels in the sub-array
        expected: usize,
        /// Length of the mask provided
        got: usize,
    },

    /// A channel id outside of the configured array.
    ChannelOutOfRange {
        /// Offending channel id
        channel: usize,
        /// Channels in the array
        channels: usize,
    },

    /// An input buffer whose size does not match `frame_size * channel_count`.
    FrameShape {
        /// Expected number of values
        expected: usize,
        /// Number of values received
        got: usize,
    },

    /// The configuration is internally inconsistent.
    Config(String),

    /// A line of a microphone table could not be parsed.
    Geometry {
        /// One-based line number
        line: usize,
        /// The offending text
        input: String,
    },

    /// The worker side of the pipeline has gone away.
    Disconnected,

    /// Returned when io fails when reading or writing files.
    IoError(std::io::Error),

    /// Returned when serialization of the configuration fails.
    RonError(ron::Error),

    /// Returned when deserialization of the configuration fails.
    RonSpannedError(ron::de::SpannedError),

    /// Returned when reading or writing a WAV file fails.
    WavError(hound::Error),
}

impl fmt::Display for LocatorError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use LocatorError as LE;
        let msg = match self {
            LE::NotCalibrated { periods, required } => Cow::from(format!(
                "not calibrated: {} of {} periods accumulated",
                periods, required
            )),
            LE::InvalidSubArray(id) => Cow::from(format!("invalid sub-array id {}", id)),
            LE::MaskLength { expected, got } => Cow::from(format!(
                "activation mask has {} entries, sub-array has {} channels",
                got, expected
            )),
            LE::ChannelOutOfRange { channel, channels } => Cow::from(format!(
                "channel {} out of range for a {} channel array",
                channel, channels
            )),
            LE::FrameShape { expected, got } => Cow::from(format!(
                "frame holds {} samples, expected {}",
                got, expected
            )),
            LE::Config(reason) => Cow::from(format!("invalid configuration: {}", reason)),
            LE::Geometry { line, input } => Cow::from(format!(
                "cannot parse microphone table line {}: {:?}",
                line, input
            )),
            LE::Disconnected => Cow::from("processing worker disconnected"),
            LE::IoError(error) => Cow::from(format!("io error: {}", error)),
            LE::RonError(error) => Cow::from(format!("ron error: {}", error)),
            LE::RonSpannedError(error) => Cow::from(format!("ron spanning error: {}", error)),
            LE::WavError(error) => Cow::from(format!("wav error: {}", error)),
        };

        write!(f, "{}", msg)
    }
}

impl std::error::Error for LocatorError {}

impl From<std::io::Error> for LocatorError {
    fn from(value: std::io::Error) -> Self {
        Self::IoError(value)
    }
}

impl From<ron::Error> for LocatorError {
    fn from(value: ron::Error) -> Self {
        Self::RonError(value)
    }
}

impl From<ron::de::SpannedError> for LocatorError {
    fn from(value: ron::de::SpannedError) -> Self {
        Self::RonSpannedError(value)
    }
}

impl From<hound::Error> for LocatorError {
    fn from(value: hound::Error) -> Self {
        Self::WavError(value)
    }
}
