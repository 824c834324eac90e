//! Global settings read by the constraint solving core.

use crate::fph;
use nalgebra::Vector3;

/// Configuration parameters for contact caching.
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
#[derive(Clone, Debug)]
pub struct ContactConfig {
    /// Maximum squared distance between the body-local positions of a new
    /// contact point and a cached one for the cached accumulated impulses to
    /// be carried over as the warm-start guess.
    pub point_preserve_lambda_max_dist_sq: fph,
}

/// Configuration parameters for the constraint solver.
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
#[derive(Clone, Debug)]
pub struct SolverConfig {
    /// The default number of sequential impulse iterations for solving the
    /// velocity constraints. Joints may override this upwards.
    pub num_velocity_steps: u32,
    /// The default number of iterations for positional correction after the
    /// velocity constraints have been solved.
    pub num_position_steps: u32,
    /// The fraction of the current positional error corrected per position
    /// iteration.
    pub baumgarte: fph,
    /// Penetration depth below which no positional correction is applied.
    /// Keeping a small overlap makes contacts persist between frames.
    pub penetration_slop: fph,
    /// Upper bound on the penetration depth used when computing a single
    /// positional correction.
    pub max_penetration_distance: fph,
    /// Relative approach speed below which restitution is ignored.
    pub min_velocity_for_restitution: fph,
    /// Scaling applied to the accumulated impulses from the previous step
    /// before they are used as the warm-start guess. This is the ratio of
    /// the new to the previous step duration, normally one.
    pub warm_start_ratio: fph,
}

/// Global world settings read by the constraint solving core.
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
#[derive(Clone, Debug)]
pub struct WorldSettings {
    /// The gravitational acceleration applied to dynamic bodies.
    pub gravity: Vector3<fph>,
    pub contact: ContactConfig,
    pub solver: SolverConfig,
}

impl Default for ContactConfig {
    fn default() -> Self {
        Self {
            point_preserve_lambda_max_dist_sq: 1e-3,
        }
    }
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            num_velocity_steps: 10,
            num_position_steps: 2,
            baumgarte: 0.2,
            penetration_slop: 0.02,
            max_penetration_distance: 0.2,
            min_velocity_for_restitution: 1.0,
            warm_start_ratio: 1.0,
        }
    }
}

impl Default for WorldSettings {
    fn default() -> Self {
        Self {
            gravity: Vector3::new(0.0, -9.81, 0.0),
            contact: ContactConfig::default(),
            solver: SolverConfig::default(),
        }
    }
}
