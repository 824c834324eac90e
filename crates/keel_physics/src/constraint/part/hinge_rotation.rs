//! Two degree of freedom angular constraint keeping two hinge axes aligned.

use super::normalized_perpendicular;
use crate::{constraint::SolverBody, fph, quantities};
use nalgebra::{Matrix2, Matrix3, Vector2, Vector3};

const MIN_DETERMINANT: fph = 1e-10;

/// A 2-DOF constraint removing the two rotational degrees of freedom
/// perpendicular to a hinge axis, so that the hinge axis fixed on body A
/// stays aligned with the one fixed on body B.
///
/// With `a1` the hinge axis on A and `b2`, `c2` two directions
/// perpendicular to the hinge axis on B, the constraint is
/// `C = [a1·b2, a1·c2] = 0`.
#[derive(Copy, Clone, Debug, Default)]
pub struct HingeRotationPart {
    a1: Vector3<fph>,
    b2: Vector3<fph>,
    c2: Vector3<fph>,
    b2_cross_a1: Vector3<fph>,
    c2_cross_a1: Vector3<fph>,
    inv_inertia_a: Matrix3<fph>,
    inv_inertia_b: Matrix3<fph>,
    /// Inverse of the symmetric 2×2 `J M⁻¹ Jᵀ` matrix.
    effective_mass: Matrix2<fph>,
    total_lambda: Vector2<fph>,
    active: bool,
}

impl HingeRotationPart {
    /// Prepares the part from the world space hinge axes on each body (both
    /// unit length). Deactivates the part if the effective mass matrix is
    /// near singular.
    pub fn setup(
        &mut self,
        body_a: &SolverBody,
        body_b: &SolverBody,
        hinge_axis_a: &Vector3<fph>,
        hinge_axis_b: &Vector3<fph>,
    ) -> bool {
        self.a1 = *hinge_axis_a;

        let dot = hinge_axis_a.dot(hinge_axis_b);
        let a2 = if dot <= 1.0e-3 {
            // The axes have drifted more than 90 degrees apart; pick a
            // stand-in within the plane of the two axes, blended slightly
            // toward a1, so the constraint rows stay well conditioned until
            // the violation has been corrected.
            let mut perpendicular = hinge_axis_b - dot * hinge_axis_a;
            if perpendicular.norm_squared() < 1.0e-6 {
                perpendicular = normalized_perpendicular(hinge_axis_a);
            }
            (0.99 * perpendicular.normalize() + 0.01 * hinge_axis_a).normalize()
        } else {
            *hinge_axis_b
        };

        self.b2 = normalized_perpendicular(&a2);
        self.c2 = a2.cross(&self.b2);
        self.b2_cross_a1 = self.b2.cross(&self.a1);
        self.c2_cross_a1 = self.c2.cross(&self.a1);

        self.inv_inertia_a = body_a.inverse_world_inertia();
        self.inv_inertia_b = body_b.inverse_world_inertia();
        let inv_inertia_sum = self.inv_inertia_a + self.inv_inertia_b;

        let i_b2 = inv_inertia_sum * self.b2_cross_a1;
        let i_c2 = inv_inertia_sum * self.c2_cross_a1;
        let k00 = self.b2_cross_a1.dot(&i_b2);
        let k01 = self.b2_cross_a1.dot(&i_c2);
        let k11 = self.c2_cross_a1.dot(&i_c2);

        let det = k00 * k11 - k01 * k01;
        if det.abs() < MIN_DETERMINANT {
            self.deactivate();
            return false;
        }
        let inv_det = det.recip();
        self.effective_mass = Matrix2::new(
            k11 * inv_det,
            -k01 * inv_det,
            -k01 * inv_det,
            k00 * inv_det,
        );
        self.active = true;
        true
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Deactivates the part for this step and clears its accumulated
    /// impulse.
    pub fn deactivate(&mut self) {
        self.active = false;
        self.total_lambda = Vector2::zeros();
    }

    pub fn total_lambda(&self) -> &Vector2<fph> {
        &self.total_lambda
    }

    /// Applies the accumulated impulse from the previous step, scaled by the
    /// given ratio.
    pub fn warm_start(
        &mut self,
        body_a: &mut SolverBody,
        body_b: &mut SolverBody,
        warm_start_ratio: fph,
    ) {
        if !self.active {
            return;
        }
        self.total_lambda *= warm_start_ratio;
        let total_lambda = self.total_lambda;
        self.apply_impulse(body_a, body_b, &total_lambda);
    }

    /// Performs one velocity iteration, cancelling the relative angular
    /// velocity perpendicular to the hinge axis. Returns whether a non-zero
    /// impulse was applied.
    pub fn solve_velocity(&mut self, body_a: &mut SolverBody, body_b: &mut SolverBody) -> bool {
        if !self.active {
            return false;
        }

        let relative_angular_velocity = body_a.angular_velocity - body_b.angular_velocity;
        let jv = Vector2::new(
            self.b2_cross_a1.dot(&relative_angular_velocity),
            self.c2_cross_a1.dot(&relative_angular_velocity),
        );
        let delta_lambda = self.effective_mass * jv;
        self.total_lambda += delta_lambda;

        self.apply_impulse(body_a, body_b, &delta_lambda)
    }

    /// Applies a Baumgarte-stabilized angular correction for the current
    /// axis misalignment `C = [a1·b2, a1·c2]`. Must be preceded by a fresh
    /// [`Self::setup`] so the cached axes match the current orientations.
    pub fn solve_position(
        &mut self,
        body_a: &mut SolverBody,
        body_b: &mut SolverBody,
        baumgarte: fph,
    ) -> bool {
        if !self.active {
            return false;
        }

        let c = Vector2::new(self.a1.dot(&self.b2), self.a1.dot(&self.c2));
        if c == Vector2::zeros() {
            return false;
        }

        let lambda = -(self.effective_mass * (baumgarte * c));
        let angular_impulse = self.b2_cross_a1 * lambda.x + self.c2_cross_a1 * lambda.y;

        quantities::pseudo_advance_orientation(
            &mut body_a.orientation,
            &(-(self.inv_inertia_a * angular_impulse)),
        );
        quantities::pseudo_advance_orientation(
            &mut body_b.orientation,
            &(self.inv_inertia_b * angular_impulse),
        );
        true
    }

    fn apply_impulse(
        &self,
        body_a: &mut SolverBody,
        body_b: &mut SolverBody,
        lambda: &Vector2<fph>,
    ) -> bool {
        if *lambda == Vector2::zeros() {
            return false;
        }
        let angular_impulse = self.b2_cross_a1 * lambda.x + self.c2_cross_a1 * lambda.y;
        body_a.angular_velocity -= self.inv_inertia_a * angular_impulse;
        body_b.angular_velocity += self.inv_inertia_b * angular_impulse;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        quantities::{Orientation, Position},
        rigid_body::RigidBody,
    };
    use approx::assert_abs_diff_eq;
    use nalgebra::vector;

    fn body_with_orientation(orientation: Orientation) -> SolverBody {
        SolverBody::from_rigid_body(
            &RigidBody::dynamic(
                Position::origin(),
                orientation,
                1.0,
                vector![1.0, 1.0, 1.0],
            ),
            &Vector3::zeros(),
        )
    }

    #[test]
    fn should_allow_spin_about_hinge_axis() {
        let mut body_a = body_with_orientation(Orientation::identity());
        let mut body_b = body_with_orientation(Orientation::identity());
        body_b.angular_velocity = vector![0.0, 3.0, 0.0];

        let mut part = HingeRotationPart::default();
        assert!(part.setup(&body_a, &body_b, &Vector3::y(), &Vector3::y()));
        let applied = part.solve_velocity(&mut body_a, &mut body_b);

        assert!(!applied);
        assert_abs_diff_eq!(body_b.angular_velocity, vector![0.0, 3.0, 0.0]);
    }

    #[test]
    fn should_cancel_relative_spin_perpendicular_to_hinge_axis() {
        let mut body_a = body_with_orientation(Orientation::identity());
        let mut body_b = body_with_orientation(Orientation::identity());
        body_b.angular_velocity = vector![2.0, 1.0, -0.5];

        let mut part = HingeRotationPart::default();
        assert!(part.setup(&body_a, &body_b, &Vector3::y(), &Vector3::y()));
        part.solve_velocity(&mut body_a, &mut body_b);

        let relative = body_a.angular_velocity - body_b.angular_velocity;
        assert_abs_diff_eq!(relative.x, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(relative.z, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn should_reduce_axis_misalignment_in_position_solve() {
        let mut body_a = body_with_orientation(Orientation::identity());
        let tilt = Orientation::from_axis_angle(&Vector3::x_axis(), 0.05);
        let mut body_b = body_with_orientation(tilt);

        let axis_b = tilt.transform_vector(&Vector3::y());
        let mut part = HingeRotationPart::default();
        assert!(part.setup(&body_a, &body_b, &Vector3::y(), &axis_b));

        let misalignment_before = Vector3::y().dot(&axis_b).clamp(-1.0, 1.0).acos();
        part.solve_position(&mut body_a, &mut body_b, 1.0);

        // The hinge axis is the local y axis on both bodies.
        let new_axis_a = body_a.orientation.transform_vector(&Vector3::y());
        let new_axis_b = body_b.orientation.transform_vector(&Vector3::y());
        let misalignment_after = new_axis_a.dot(&new_axis_b).clamp(-1.0, 1.0).acos();
        assert!(misalignment_after < misalignment_before);
    }

    #[test]
    fn should_survive_near_opposite_axes() {
        let body_a = body_with_orientation(Orientation::identity());
        let body_b = body_with_orientation(Orientation::identity());
        let mut part = HingeRotationPart::default();
        assert!(part.setup(&body_a, &body_b, &Vector3::y(), &(-Vector3::y())));
        assert!(part.is_active());
    }
}
