//! Remembers every distinct position accepted for each sub-array.
//!
//! Positions are recorded as 2D projections onto the plane the sub-array can
//! actually resolve: the ceiling array on `(x, z)`, the wall array on
//! `(x, y)`. Equality is exact, and the set only shrinks on [`Tracker::reset`].

use crate::localizer::LocalizationEstimate;
use crate::{Point, Point3, SubArray};

use std::collections::HashSet;

/// An insertion-ordered set of projected points.
#[derive(Debug, Clone, Default)]
pub struct TrackedPointSet {
    seen: HashSet<(u64, u64)>,
    points: Vec<Point>,
}

impl TrackedPointSet {
    /// Insert a point, returning `false` if it is already present or not
    /// finite.
    pub fn insert(&mut self, point: Point) -> bool {
        if !(point.x.is_finite() && point.y.is_finite()) {
            return false;
        }
        // Adding 0.0 folds -0.0 into 0.0 so both hash alike.
        let key = ((point.x + 0.0).to_bits(), (point.y + 0.0).to_bits());
        if !self.seen.insert(key) {
            return false;
        }
        self.points.push(point);
        true
    }

    /// Points in insertion order.
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// Number of distinct points.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// `true` if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Forget every point.
    pub fn clear(&mut self) {
        self.seen.clear();
        self.points.clear();
    }
}

/// One [`TrackedPointSet`] per sub-array.
#[derive(Debug, Clone, Default)]
pub struct Tracker {
    sets: [TrackedPointSet; 2],
}

/// The projection a sub-array's positions are tracked in.
pub fn project(position: Point3, sub: SubArray) -> Point {
    match sub {
        SubArray::Ceiling => Point {
            x: position.x,
            y: position.z,
        },
        SubArray::Wall => Point {
            x: position.x,
            y: position.y,
        },
    }
}

impl Tracker {
    /// An empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an estimate under its own sub-array. Returns `true` if the
    /// projected point was not already known.
    pub fn add_point(&mut self, estimate: &LocalizationEstimate) -> bool {
        let sub = estimate.sub_array;
        self.sets[sub.index()].insert(project(estimate.position, sub))
    }

    /// Points recorded for a sub-array, in insertion order.
    pub fn points(&self, sub: SubArray) -> &[Point] {
        self.sets[sub.index()].points()
    }

    /// Number of points recorded for a sub-array.
    pub fn len(&self, sub: SubArray) -> usize {
        self.sets[sub.index()].len()
    }

    /// `true` if no sub-array has any points.
    pub fn is_empty(&self) -> bool {
        self.sets.iter().all(TrackedPointSet::is_empty)
    }

    /// Forget the points of one sub-array.
    pub fn reset(&mut self, sub: SubArray) {
        self.sets[sub.index()].clear();
    }
}
