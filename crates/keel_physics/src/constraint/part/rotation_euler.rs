//! Three degree of freedom angular equality constraint (weld).

use crate::{constraint::SolverBody, fph, quantities::{self, Orientation}};
use nalgebra::{Matrix3, Vector3};

/// A 3-DOF constraint locking the relative rotation of two bodies to a
/// fixed initial rotation. Used by fixed/weld-style joints and for the
/// position correction of swing-twist limits.
#[derive(Copy, Clone, Debug, Default)]
pub struct RotationEulerPart {
    inv_inertia_a: Matrix3<fph>,
    inv_inertia_b: Matrix3<fph>,
    /// Inverse of `I1⁻¹ + I2⁻¹`.
    effective_mass: Matrix3<fph>,
    total_lambda: Vector3<fph>,
    active: bool,
}

/// Computes the small-angle rotation error vector between the two body
/// orientations, given the inverse of the initial relative orientation.
///
/// The error is twice the imaginary part of `q2 · q_init⁻¹ · q1⁻¹`, which
/// for small violations equals the rotation vector taking the constrained
/// frame of body A to that of body B.
pub fn rotation_error(
    orientation_a: &Orientation,
    orientation_b: &Orientation,
    inv_initial_orientation: &Orientation,
) -> Vector3<fph> {
    let mut diff = (*orientation_b).into_inner()
        * (*inv_initial_orientation).into_inner()
        * orientation_a.inverse().into_inner();
    // Both q and -q represent the same rotation; pick the short way around.
    if diff.w < 0.0 {
        diff = -diff;
    }
    2.0 * diff.imag()
}

impl RotationEulerPart {
    /// Prepares the part from the bodies' current inverse inertia tensors.
    /// Deactivates the part if neither body has rotational inertia.
    pub fn setup(&mut self, body_a: &SolverBody, body_b: &SolverBody) -> bool {
        self.inv_inertia_a = body_a.inverse_world_inertia();
        self.inv_inertia_b = body_b.inverse_world_inertia();

        let inv_k = self.inv_inertia_a + self.inv_inertia_b;
        match inv_k.try_inverse() {
            Some(effective_mass) => {
                self.effective_mass = effective_mass;
                self.active = true;
                true
            }
            None => {
                self.deactivate();
                false
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Deactivates the part for this step and clears its accumulated
    /// impulse.
    pub fn deactivate(&mut self) {
        self.active = false;
        self.total_lambda = Vector3::zeros();
    }

    pub fn total_lambda(&self) -> &Vector3<fph> {
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

    /// Performs one velocity iteration, driving the relative angular
    /// velocity to zero. Returns whether a non-zero impulse was applied.
    pub fn solve_velocity(&mut self, body_a: &mut SolverBody, body_b: &mut SolverBody) -> bool {
        if !self.active {
            return false;
        }

        let jv = body_a.angular_velocity - body_b.angular_velocity;
        let delta_lambda = self.effective_mass * jv;
        self.total_lambda += delta_lambda;

        self.apply_impulse(body_a, body_b, &delta_lambda)
    }

    /// Applies a Baumgarte-stabilized angular correction for the given
    /// rotation error (as produced by [`rotation_error`]).
    pub fn solve_position(
        &mut self,
        body_a: &mut SolverBody,
        body_b: &mut SolverBody,
        c: &Vector3<fph>,
        baumgarte: fph,
    ) -> bool {
        if !self.active || *c == Vector3::zeros() {
            return false;
        }

        let lambda = -(self.effective_mass * (baumgarte * c));

        quantities::pseudo_advance_orientation(
            &mut body_a.orientation,
            &(-(self.inv_inertia_a * lambda)),
        );
        quantities::pseudo_advance_orientation(
            &mut body_b.orientation,
            &(self.inv_inertia_b * lambda),
        );
        true
    }

    fn apply_impulse(
        &self,
        body_a: &mut SolverBody,
        body_b: &mut SolverBody,
        impulse: &Vector3<fph>,
    ) -> bool {
        if *impulse == Vector3::zeros() {
            return false;
        }
        body_a.angular_velocity -= self.inv_inertia_a * impulse;
        body_b.angular_velocity += self.inv_inertia_b * impulse;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        quantities::Position,
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
    fn should_report_zero_error_for_initial_relative_rotation() {
        let orientation_a = Orientation::from_euler_angles(0.3, 0.1, -0.2);
        let orientation_b = Orientation::from_euler_angles(-0.1, 0.5, 0.4);
        let initial = orientation_b * orientation_a.inverse();
        let error = rotation_error(&orientation_a, &orientation_b, &initial.inverse());
        assert_abs_diff_eq!(error.norm(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn should_report_rotation_vector_for_small_violation() {
        let orientation_a = Orientation::identity();
        let angle = 0.01;
        let orientation_b = Orientation::from_axis_angle(&Vector3::y_axis(), angle);
        let error = rotation_error(&orientation_a, &orientation_b, &Orientation::identity());
        assert_abs_diff_eq!(error.y, angle, epsilon = 1e-6);
        assert_abs_diff_eq!(error.x, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn should_cancel_relative_angular_velocity() {
        let mut body_a = body_with_orientation(Orientation::identity());
        let mut body_b = body_with_orientation(Orientation::identity());
        body_a.angular_velocity = vector![1.0, -2.0, 0.5];

        let mut part = RotationEulerPart::default();
        assert!(part.setup(&body_a, &body_b));
        part.solve_velocity(&mut body_a, &mut body_b);

        assert_abs_diff_eq!(
            body_a.angular_velocity,
            body_b.angular_velocity,
            epsilon = 1e-12
        );
    }

    #[test]
    fn should_shrink_rotation_error_in_position_solve() {
        let mut body_a = body_with_orientation(Orientation::identity());
        let mut body_b =
            body_with_orientation(Orientation::from_axis_angle(&Vector3::y_axis(), 0.02));

        let mut part = RotationEulerPart::default();
        assert!(part.setup(&body_a, &body_b));

        let error = rotation_error(
            &body_a.orientation,
            &body_b.orientation,
            &Orientation::identity(),
        );
        part.solve_position(&mut body_a, &mut body_b, &error, 1.0);

        let new_error = rotation_error(
            &body_a.orientation,
            &body_b.orientation,
            &Orientation::identity(),
        );
        assert!(new_error.norm() < 1e-5);
    }
}
