//! Closed-form TDOA multilateration.
//!
//! With the reference microphone at `p0`, microphone `i` at `m_i` and the
//! range difference `r_i = R_0 - R_i`, every observation gives one linear
//! equation in the unknowns `[x, y, z, R_0]`:
//!
//! ```text
//! (p0 - m_i) · s + r_i R_0 = ½ (r_i² + |p0|² - |m_i|²)
//! ```
//!
//! The system is solved twice with weighted least squares. The first pass
//! weights by the a-priori covariance `Q` alone; the second scales `Q` by the
//! first pass's ranges to every microphone, a one-step linearized correction
//! for the quadratic terms the linear model ignores.

use crate::config::LocatorConfig;
use crate::delay::Observations;
use crate::{Point3, SubArray};

use log::{debug, trace};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

/// Fewest delay observations that can determine the four unknowns.
pub const MIN_OBSERVATIONS: usize = 4;

/// Relative determinant below which the normal matrix is treated as singular.
const SINGULAR_EPSILON: f64 = 1e-12;

/// A located source for one sub-array and one period.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocalizationEstimate {
    /// Source position, in centimeters
    pub position: Point3,
    /// Distance from the reference microphone to the source, in centimeters
    pub range: f64,
    /// Sub-array that produced the estimate
    pub sub_array: SubArray,
    /// Capture period the estimate was computed from
    pub period: u64,
    /// Number of delay observations used
    pub observations: usize,
}

impl Display for LocalizationEstimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {}: {} cm ({} delays)",
            self.period, self.sub_array, self.position, self.observations
        )
    }
}

/// Solves for the source position from one period's delay observations.
#[derive(Debug, Clone)]
pub struct Localizer {
    meters_per_sample: f64,
    max_solution_distance: f64,
}

impl Localizer {
    /// A localizer for the configured sample rate and speed of sound.
    pub fn new(config: &LocatorConfig) -> Self {
        Self {
            meters_per_sample: config.speed_of_sound / config.sample_rate as f64,
            max_solution_distance: config.max_solution_distance,
        }
    }

    /// Locate the source heard by `observations`, all measured against the
    /// microphone `reference_id` at `reference_position` (cm). Returns `None`
    /// when the period cannot produce a trustworthy position.
    pub fn solve(
        &self,
        reference_position: Point3,
        reference_id: usize,
        observations: &Observations,
        sub: SubArray,
    ) -> Option<LocalizationEstimate> {
        let usable: Vec<_> = observations
            .values()
            .filter(|o| o.reference == reference_id && o.other != reference_id)
            .collect();
        let n = usable.len();
        if n < MIN_OBSERVATIONS {
            trace!("{}: only {} delays, need {}", sub, n, MIN_OBSERVATIONS);
            return None;
        }

        let p0 = reference_position.scale(0.01);
        let ranges: Vec<f64> = usable
            .iter()
            .map(|o| o.tau as f64 * self.meters_per_sample)
            .collect();

        let mut g = DMatrix::zeros(n, 4);
        let mut b = DVector::zeros(n);
        for (row, (obs, &r)) in usable.iter().zip(&ranges).enumerate() {
            let m = obs.position.scale(0.01);
            g[(row, 0)] = p0.x - m.x;
            g[(row, 1)] = p0.y - m.y;
            g[(row, 2)] = p0.z - m.z;
            g[(row, 3)] = r;
            b[row] = 0.5 * (r * r + p0.norm_squared() - m.norm_squared());
        }

        let q = DMatrix::from_fn(n, n, |i, j| if i == j { 1.0 } else { 0.5 });

        let Some(weights) = q.clone().try_inverse() else {
            debug!("{}: covariance is not invertible", sub);
            return None;
        };
        let first = weighted_least_squares(&g, &b, &weights)?;

        // Range from the first estimate to every other microphone.
        let rs1 = first[3];
        let errors = DMatrix::from_diagonal(&DVector::from_iterator(
            n,
            ranges.iter().map(|r| rs1 - r),
        ));
        let Some(weights) = (&errors * &q * &errors).try_inverse() else {
            debug!("{}: refined weights are not invertible", sub);
            return None;
        };
        let second = weighted_least_squares(&g, &b, &weights)?;

        let position = Point3::new(second[0], second[1], second[2]);
        if !position.is_finite() || !second[3].is_finite() {
            debug!("{}: solution is not finite", sub);
            return None;
        }
        if position.norm() > self.max_solution_distance {
            debug!("{}: solution {} m is out of range", sub, position);
            return None;
        }

        Some(LocalizationEstimate {
            position: position.scale(100.0),
            range: second[3] * 100.0,
            sub_array: sub,
            period: 0,
            observations: n,
        })
    }
}

/// `(GᵀWG)⁻¹ GᵀW b`, or `None` when the normal matrix is singular.
fn weighted_least_squares(
    g: &DMatrix<f64>,
    b: &DVector<f64>,
    weights: &DMatrix<f64>,
) -> Option<DVector<f64>> {
    let gtw = g.transpose() * weights;
    let normal = &gtw * g;

    let scale = normal.amax();
    if !(scale.is_finite() && scale > 0.0) {
        return None;
    }
    if (&normal / scale).determinant().abs() < SINGULAR_EPSILON {
        trace!("normal matrix is singular");
        return None;
    }

    let inverse = normal.try_inverse()?;
    Some(inverse * (gtw * b))
}
