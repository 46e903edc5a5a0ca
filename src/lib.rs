//! SoundScout locates an active sound source inside an instrumented room. A
//! 64-element microphone array is split into two 32-microphone sub-arrays,
//! one hanging from the ceiling and one mounted on the back wall. Every audio
//! period, each sub-array measures the time delays between a reference
//! microphone and its other microphones using GCC-PHAT, then solves a
//! closed-form multilateration problem for the source position.
//!
//! The processing chain, leaf first:
//!
//! - [`spectral`]: windowed, zero-padded, unitary FFTs
//! - [`calibration`]: per-channel level accumulation and gain correction
//! - [`selector`]: activation masks and per-period dataset assembly
//! - [`delay`]: GCC-PHAT delay estimation bounded by microphone geometry
//! - [`localizer`]: two-pass weighted least-squares position solve
//! - [`plausibility`]: clamps estimates into the room envelope
//! - [`tracker`]: de-duplicates accepted positions
//!
//! [`pipeline`] glues these together behind a real-time safe capture front
//! end and a worker thread, see [`pipeline::Pipeline`].

#![warn(missing_docs)]
pub mod args;
pub mod calibration;
pub mod component;
pub mod config;
pub mod delay;
pub mod device;
pub mod error;
pub mod geometry;
pub mod localizer;
pub mod pipeline;
pub mod plausibility;
pub mod selector;
pub mod spectral;
pub mod tracker;
pub mod wav;

use error::LocatorError;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::ops::Range;

/// A position in room coordinates. Microphone and source positions are kept
/// in centimeters unless stated otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point3 {
    /// Lateral axis
    pub x: f64,
    /// Depth axis
    pub y: f64,
    /// Height above the floor
    pub z: f64,
}

impl Point3 {
    /// Builds a point from its three coordinates.
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Euclidean distance between two points.
    pub fn distance(&self, other: &Self) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2) + (self.z - other.z).powi(2))
            .sqrt()
    }

    /// Distance from the origin.
    pub fn norm(&self) -> f64 {
        self.distance(&Point3::default())
    }

    /// Squared distance from the origin.
    pub fn norm_squared(&self) -> f64 {
        self.x * self.x + self.y * self.y + self.z * self.z
    }

    /// Multiplies every coordinate by `factor`.
    pub fn scale(self, factor: f64) -> Self {
        Self::new(self.x * factor, self.y * factor, self.z * factor)
    }

    /// `true` if no coordinate is NaN or infinite.
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl Display for Point3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.3}, {:.3}, {:.3})", self.x, self.y, self.z)
    }
}

/// A 2D projection of a position, as recorded by the [`tracker`].
#[derive(Debug, PartialEq, Clone, Copy)]
pub struct Point {
    /// First projected coordinate
    pub x: f64,
    /// Second projected coordinate
    pub y: f64,
}

impl Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.3}, {:.3})", self.x, self.y)
    }
}

/// One of the two physically distinct halves of the microphone array. The
/// first half of the channels belongs to the ceiling array, the second half
/// to the wall array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubArray {
    /// Microphones hanging from the ceiling
    Ceiling,
    /// Microphones mounted on the back wall
    Wall,
}

impl SubArray {
    /// Both sub-arrays, in channel order.
    pub const ALL: [SubArray; 2] = [SubArray::Ceiling, SubArray::Wall];

    /// Numeric id of the sub-array, also its index into per-sub-array tables.
    pub fn index(self) -> usize {
        match self {
            SubArray::Ceiling => 0,
            SubArray::Wall => 1,
        }
    }

    /// The global channel ids owned by this sub-array.
    pub fn channels(self, channel_count: usize) -> Range<usize> {
        let half = channel_count / 2;
        match self {
            SubArray::Ceiling => 0..half,
            SubArray::Wall => half..channel_count,
        }
    }
}

impl TryFrom<usize> for SubArray {
    type Error = LocatorError;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(SubArray::Ceiling),
            1 => Ok(SubArray::Wall),
            other => Err(LocatorError::InvalidSubArray(other)),
        }
    }
}

impl Display for SubArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubArray::Ceiling => write!(f, "ceiling"),
            SubArray::Wall => write!(f, "wall"),
        }
    }
}

/// An iterator that transposes the order of iteration based on
/// [this StackOverflow answer](https://stackoverflow.com/a/75477884/17443903).
/// Used to turn interleaved audio periods into per-channel buffers.
pub struct TransposeIter<I, T>
where
    I: IntoIterator<Item = T>,
{
    iterators: Vec<I::IntoIter>,
}

#[allow(missing_docs)]
pub trait TransposableIter<I, T>
where
    Self: Sized,
    Self: IntoIterator<Item = I>,
    I: IntoIterator<Item = T>,
{
    fn transpose(self) -> TransposeIter<I, T> {
        let iterators: Vec<_> = self.into_iter().map(|i| i.into_iter()).collect();
        TransposeIter { iterators }
    }
}

impl<I, T> Iterator for TransposeIter<I, T>
where
    I: IntoIterator<Item = T>,
{
    type Item = Vec<T>;
    fn next(&mut self) -> Option<Self::Item> {
        // Without inner iterators every row would be an empty Vec, forever.
        if self.iterators.is_empty() {
            return None;
        }
        self.iterators.iter_mut().map(|iter| iter.next()).collect()
    }
}

impl<I, T, Any> TransposableIter<I, T> for Any
where
    Any: IntoIterator<Item = I>,
    I: IntoIterator<Item = T>,
{
}
