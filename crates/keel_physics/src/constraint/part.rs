//! Mathematical building blocks shared by contact and joint constraints.
//!
//! Each part implements a small number of degrees of freedom of a constraint
//! between two bodies: it caches its jacobian terms and effective mass at
//! setup, accumulates a Lagrange multiplier (an impulse) across velocity
//! iterations, and can apply Baumgarte-stabilized positional corrections.
//! Accumulated impulses persist across frames for warm starting unless the
//! part is deactivated.
//!
//! Sign convention used throughout: the constraint velocity is measured as
//! `jv = J·(velocities of A) − J·(velocities of B)` and applying a positive
//! impulse subtracts from body A and adds to body B. A degenerate effective
//! mass deactivates the part for the step and clears its accumulated
//! impulse.

pub mod angle;
pub mod axis;
pub mod hinge_rotation;
pub mod point;
pub mod rotation_euler;
pub mod spring;
pub mod swing_twist;

use crate::fph;
use nalgebra::{Vector3, vector};

/// Returns a unit vector perpendicular to the given unit vector, chosen
/// based on the dominant component so the construction stays well
/// conditioned.
pub(crate) fn normalized_perpendicular(unit_vector: &Vector3<fph>) -> Vector3<fph> {
    const INV_SQRT_THREE: fph = 0.57735;

    let perpendicular = if unit_vector.x.abs() < INV_SQRT_THREE {
        // The vector is relatively close to the yz-plane, so projecting it
        // onto that plane and rotating the projection 90 degrees within the
        // plane gives a vector sufficiently different from the original to
        // avoid numerical issues.
        vector![0.0, unit_vector.z, -unit_vector.y]
    } else {
        vector![unit_vector.y, -unit_vector.x, 0.0]
    };
    perpendicular.normalize()
}
