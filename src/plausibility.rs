//! Projects estimates into the physically valid room volume.

use crate::config::{LocatorConfig, RoomBounds};
use crate::localizer::LocalizationEstimate;
use crate::{Point3, SubArray};

/// A stateless clamp of positions to the room envelope. Nothing is ever
/// rejected or smoothed.
#[derive(Debug, Clone, Copy)]
pub struct PlausibilityChecker {
    room: RoomBounds,
}

impl PlausibilityChecker {
    /// A checker for the configured room.
    pub fn new(config: &LocatorConfig) -> Self {
        Self { room: config.room }
    }

    /// The ceiling array cannot resolve depth: x and height are clamped, and
    /// y is pinned to the array's mounting depth.
    pub fn clamp_ceiling(&self, position: Point3) -> Point3 {
        Point3::new(
            position.x.clamp(-self.room.max_x, self.room.max_x),
            self.room.ceiling_depth,
            position.z.clamp(0.0, self.room.height),
        )
    }

    /// The wall array cannot resolve height: x and y are clamped, and z is
    /// pinned to floor level.
    pub fn clamp_wall(&self, position: Point3) -> Point3 {
        Point3::new(
            position.x.clamp(-self.room.max_x, self.room.max_x),
            position.y.clamp(-self.room.max_y, self.room.max_y),
            self.room.floor_level,
        )
    }

    /// Clamp an estimate according to the sub-array that produced it.
    pub fn clamp(&self, estimate: &LocalizationEstimate) -> LocalizationEstimate {
        let position = match estimate.sub_array {
            SubArray::Ceiling => self.clamp_ceiling(estimate.position),
            SubArray::Wall => self.clamp_wall(estimate.position),
        };
        LocalizationEstimate {
            position,
            ..*estimate
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn random_points(count: usize) -> Vec<Point3> {
        let mut rng = StdRng::seed_from_u64(42);
        (0..count)
            .map(|_| {
                Point3::new(
                    rng.gen_range(-1000.0..1000.0),
                    rng.gen_range(-1000.0..1000.0),
                    rng.gen_range(-1000.0..1000.0),
                )
            })
            .collect()
    }

    #[test]
    fn clamps_are_idempotent() {
        let checker = PlausibilityChecker::new(&LocatorConfig::default());
        for p in random_points(500) {
            let once = checker.clamp_ceiling(p);
            assert_eq!(checker.clamp_ceiling(once), once);
            let once = checker.clamp_wall(p);
            assert_eq!(checker.clamp_wall(once), once);
        }
    }

    #[test]
    fn clamped_points_are_in_the_room() {
        let config = LocatorConfig::default();
        let room = config.room;
        let checker = PlausibilityChecker::new(&config);
        for p in random_points(500) {
            let c = checker.clamp_ceiling(p);
            assert!(c.x.abs() <= room.max_x);
            assert!((0.0..=room.height).contains(&c.z));
            assert_eq!(c.y, room.ceiling_depth);

            let w = checker.clamp_wall(p);
            assert!(w.x.abs() <= room.max_x);
            assert!(w.y.abs() <= room.max_y);
            assert_eq!(w.z, room.floor_level);
        }
    }

    #[test]
    fn inside_points_are_kept() {
        let checker = PlausibilityChecker::new(&LocatorConfig::default());
        let p = Point3::new(-120.0, 0.0, 150.0);
        assert_eq!(checker.clamp_ceiling(p), p);
        let p = Point3::new(35.0, -200.0, 0.0);
        assert_eq!(checker.clamp_wall(p), p);
    }

    #[test]
    fn clamp_follows_sub_array() {
        let checker = PlausibilityChecker::new(&LocatorConfig::default());
        let estimate = LocalizationEstimate {
            position: Point3::new(400.0, 90.0, 500.0),
            range: 12.0,
            sub_array: SubArray::Wall,
            period: 7,
            observations: 31,
        };
        let clamped = checker.clamp(&estimate);
        assert_eq!(clamped.position, Point3::new(300.0, 90.0, 0.0));
        assert_eq!(clamped.period, 7);
        assert_eq!(clamped.observations, 31);

        let ceiling = checker.clamp(&LocalizationEstimate {
            sub_array: SubArray::Ceiling,
            ..estimate
        });
        assert_eq!(ceiling.position, Point3::new(300.0, 0.0, 280.0));
    }
}
