//! Microphone positions, as supplied by the room-geometry provider.
//!
//! A layout file holds one microphone per line, indexed identically to the
//! audio channels, in centimeters:
//!
//! ```text
//! # id: x, y, z
//! 0: -270.0, -60.0, 275.0
//! 1: -192.9, -60.0, 250.0
//! ```
//!
//! Blank lines and lines starting with `#` are ignored. Ids must cover
//! `0..n` exactly once.

use crate::config::{LocatorConfig, RoomBounds};
use crate::error::LocatorError;
use crate::{Point3, SubArray};

use nom::{
    character::complete::{char, space0, u32},
    combinator::{all_consuming, map},
    number::complete::double,
    sequence::{delimited, terminated, tuple},
    Finish, IResult,
};
use std::{collections::BTreeMap, fmt::Write, fs, path::Path, str::FromStr};

/// Positions of every microphone in the array, indexed by channel id.
#[derive(Debug, Clone, PartialEq)]
pub struct MicrophoneLayout {
    positions: Vec<Point3>,
}

fn colon(s: &str) -> IResult<&str, char> {
    delimited(space0, char(':'), space0)(s)
}

fn comma(s: &str) -> IResult<&str, char> {
    delimited(space0, char(','), space0)(s)
}

fn parse_entry(s: &str) -> IResult<&str, (usize, Point3)> {
    map(
        tuple((
            delimited(space0, u32, colon),
            terminated(double, comma),
            terminated(double, comma),
            terminated(double, space0),
        )),
        |(id, x, y, z)| (id as usize, Point3::new(x, y, z)),
    )(s)
}

impl MicrophoneLayout {
    /// Wrap a list of positions, the index of each being its channel id.
    pub fn from_positions(positions: Vec<Point3>) -> Self {
        Self { positions }
    }

    /// Read a layout from a microphone table file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, LocatorError> {
        fs::read_to_string(path)?.parse()
    }

    /// A plausible layout for the configured room, used by the simulator when
    /// no table is supplied. Each sub-array is a four by eight grid whose
    /// microphones alternate between two mounting offsets, so neither array
    /// is perfectly planar.
    pub fn simulated(config: &LocatorConfig) -> Self {
        let per_sub = config.channels_per_sub_array();
        let room = &config.room;
        let positions = SubArray::ALL
            .iter()
            .flat_map(|&sub| (0..per_sub).map(move |i| grid_position(sub, i, per_sub, room)))
            .collect();
        Self { positions }
    }

    /// Number of microphones.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// `true` if the layout holds no microphones.
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Position of one microphone.
    pub fn position(&self, channel: usize) -> Option<Point3> {
        self.positions.get(channel).copied()
    }

    /// All positions, indexed by channel id.
    pub fn positions(&self) -> &[Point3] {
        &self.positions
    }

    /// Render the layout in the table format read by [`FromStr`].
    pub fn to_table(&self) -> String {
        let mut out = String::from("# id: x, y, z (cm)\n");
        for (id, p) in self.positions.iter().enumerate() {
            // Writing into a String cannot fail.
            let _ = writeln!(out, "{}: {:.1}, {:.1}, {:.1}", id, p.x, p.y, p.z);
        }
        out
    }
}

fn grid_position(sub: SubArray, i: usize, per_sub: usize, room: &RoomBounds) -> Point3 {
    const ROWS: usize = 4;
    let cols = per_sub.div_ceil(ROWS).max(1);
    let (row, col) = (i / cols, i % cols);
    let stagger = ((row + col) % 2) as f64 * 25.0;
    let x = if cols > 1 {
        -0.9 * room.max_x + col as f64 * (1.8 * room.max_x / (cols - 1) as f64)
    } else {
        0.0
    };

    match sub {
        SubArray::Ceiling => Point3::new(
            x,
            room.ceiling_depth + (row as f64 - 1.5) * 40.0,
            room.height - 5.0 - stagger,
        ),
        SubArray::Wall => Point3::new(
            x,
            room.max_y - 5.0 - stagger,
            room.floor_level + 40.0 + row as f64 * 60.0,
        ),
    }
}

impl FromStr for MicrophoneLayout {
    type Err = LocatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut entries = BTreeMap::new();

        for (idx, line) in s.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let geometry_error = || LocatorError::Geometry {
                line: idx + 1,
                input: line.to_owned(),
            };

            let (_, (id, position)) = all_consuming(parse_entry)(trimmed)
                .finish()
                .map_err(|_: nom::error::Error<&str>| geometry_error())?;

            if entries.insert(id, position).is_some() {
                return Err(geometry_error());
            }
        }

        // BTreeMap keys are sorted, so ids cover 0..n iff the last one is n - 1.
        if let Some((&last, _)) = entries.last_key_value() {
            if last + 1 != entries.len() {
                let missing = (0..entries.len())
                    .find(|id| !entries.contains_key(id))
                    .unwrap_or(entries.len());
                return Err(LocatorError::Config(format!(
                    "microphone table has no entry for channel {}",
                    missing
                )));
            }
        }

        Ok(Self {
            positions: entries.into_values().collect(),
        })
    }
}
