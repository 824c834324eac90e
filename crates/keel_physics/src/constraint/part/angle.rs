//! One degree of freedom angular constraint around an arbitrary world space
//! axis.

use super::spring::{SpringPart, SpringSettings};
use crate::{constraint::SolverBody, fph, quantities};
use nalgebra::{Matrix3, Vector3};

/// A 1-DOF constraint restricting the relative rotation of two bodies
/// around a world space axis. Used for hinge limits and motors, the
/// swing-twist limit axes and the rotational motors of the 6-DOF joint.
///
/// The jacobian is `[0, −axis, 0, axis]`, so the constraint velocity is
/// `jv = axis·(ωA − ωB)` and impulses are purely angular.
#[derive(Copy, Clone, Debug, Default)]
pub struct AngleConstraintPart {
    inv_i1_axis: Vector3<fph>,
    inv_i2_axis: Vector3<fph>,
    effective_mass: fph,
    spring: SpringPart,
    total_lambda: fph,
}

impl AngleConstraintPart {
    /// Prepares the part as a hard constraint with the given velocity bias.
    /// Deactivates the part if the effective mass is degenerate (both bodies
    /// non-dynamic or the axis carries no inertia).
    pub fn setup(
        &mut self,
        inv_inertia_a: &Matrix3<fph>,
        inv_inertia_b: &Matrix3<fph>,
        axis: &Vector3<fph>,
        bias: fph,
    ) -> bool {
        let Some(inv_k) = self.cache_jacobian(inv_inertia_a, inv_inertia_b, axis) else {
            return false;
        };
        self.effective_mass = self.spring.setup_hard(inv_k, bias);
        true
    }

    /// Prepares the part as a (possibly) soft constraint with the given
    /// current constraint error.
    pub fn setup_with_spring(
        &mut self,
        inv_inertia_a: &Matrix3<fph>,
        inv_inertia_b: &Matrix3<fph>,
        axis: &Vector3<fph>,
        bias: fph,
        spring_settings: &SpringSettings,
        constraint_error: fph,
        dt: fph,
    ) -> bool {
        let Some(inv_k) = self.cache_jacobian(inv_inertia_a, inv_inertia_b, axis) else {
            return false;
        };
        self.effective_mass = self
            .spring
            .setup(spring_settings, inv_k, constraint_error, bias, dt);
        true
    }

    fn cache_jacobian(
        &mut self,
        inv_inertia_a: &Matrix3<fph>,
        inv_inertia_b: &Matrix3<fph>,
        axis: &Vector3<fph>,
    ) -> Option<fph> {
        self.inv_i1_axis = inv_inertia_a * axis;
        self.inv_i2_axis = inv_inertia_b * axis;

        let inv_effective_mass = axis.dot(&(self.inv_i1_axis + self.inv_i2_axis));
        if inv_effective_mass <= 0.0 {
            self.deactivate();
            return None;
        }
        Some(inv_effective_mass)
    }

    pub fn is_active(&self) -> bool {
        self.effective_mass != 0.0
    }

    /// Deactivates the part for this step and clears its accumulated
    /// impulse.
    pub fn deactivate(&mut self) {
        self.effective_mass = 0.0;
        self.total_lambda = 0.0;
    }

    pub fn total_lambda(&self) -> fph {
        self.total_lambda
    }

    pub fn set_total_lambda(&mut self, total_lambda: fph) {
        self.total_lambda = total_lambda;
    }

    /// Applies the accumulated impulse from the previous step, scaled by the
    /// given ratio.
    pub fn warm_start(
        &mut self,
        body_a: &mut SolverBody,
        body_b: &mut SolverBody,
        warm_start_ratio: fph,
    ) {
        if !self.is_active() {
            return;
        }
        self.total_lambda *= warm_start_ratio;
        self.apply_impulse(body_a, body_b, self.total_lambda);
    }

    /// Performs one velocity iteration around the axis the part was set up
    /// with, clamping the accumulated impulse to `[min_lambda, max_lambda]`.
    /// Returns whether a non-zero impulse was applied.
    pub fn solve_velocity(
        &mut self,
        body_a: &mut SolverBody,
        body_b: &mut SolverBody,
        axis: &Vector3<fph>,
        min_lambda: fph,
        max_lambda: fph,
    ) -> bool {
        if !self.is_active() {
            return false;
        }

        let jv = axis.dot(&(body_a.angular_velocity - body_b.angular_velocity));

        let delta_lambda = self.effective_mass * (jv - self.spring.total_bias(self.total_lambda));
        let new_lambda = (self.total_lambda + delta_lambda).clamp(min_lambda, max_lambda);
        let applied_lambda = new_lambda - self.total_lambda;
        self.total_lambda = new_lambda;

        self.apply_impulse(body_a, body_b, applied_lambda)
    }

    /// Applies a Baumgarte-stabilized angular correction for the given
    /// rotation error `c` (positive when the relative rotation must shrink
    /// along the axis). Orientations are rotated directly; velocities are
    /// untouched. Only valid for hard constraints.
    pub fn solve_position(
        &mut self,
        body_a: &mut SolverBody,
        body_b: &mut SolverBody,
        c: fph,
        baumgarte: fph,
    ) -> bool {
        if !self.is_active() || self.spring.has_softness() || c == 0.0 {
            return false;
        }

        let lambda = -self.effective_mass * baumgarte * c;

        quantities::pseudo_advance_orientation(
            &mut body_a.orientation,
            &(-lambda * self.inv_i1_axis),
        );
        quantities::pseudo_advance_orientation(
            &mut body_b.orientation,
            &(lambda * self.inv_i2_axis),
        );
        true
    }

    fn apply_impulse(&self, body_a: &mut SolverBody, body_b: &mut SolverBody, lambda: fph) -> bool {
        if lambda == 0.0 {
            return false;
        }
        body_a.angular_velocity -= lambda * self.inv_i1_axis;
        body_b.angular_velocity += lambda * self.inv_i2_axis;
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

    fn spinning_body(angular_velocity: Vector3<fph>) -> SolverBody {
        let mut body = RigidBody::dynamic(
            Position::origin(),
            Orientation::identity(),
            1.0,
            vector![1.0, 1.0, 1.0],
        );
        body.set_angular_velocity(angular_velocity);
        SolverBody::from_rigid_body(&body, &Vector3::zeros())
    }

    #[test]
    fn should_cancel_relative_spin_about_axis() {
        let mut part = AngleConstraintPart::default();
        let mut body_a = spinning_body(vector![0.0, 1.0, 0.0]);
        let mut body_b = spinning_body(vector![0.0, -1.0, 0.0]);
        assert!(part.setup(
            &body_a.inverse_world_inertia(),
            &body_b.inverse_world_inertia(),
            &Vector3::y(),
            0.0,
        ));

        part.solve_velocity(
            &mut body_a,
            &mut body_b,
            &Vector3::y(),
            fph::NEG_INFINITY,
            fph::INFINITY,
        );

        assert_abs_diff_eq!(
            body_a.angular_velocity.y - body_b.angular_velocity.y,
            0.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn should_leave_perpendicular_spin_untouched() {
        let mut part = AngleConstraintPart::default();
        let mut body_a = spinning_body(vector![1.0, 1.0, 0.0]);
        let mut body_b = spinning_body(Vector3::zeros());
        assert!(part.setup(
            &body_a.inverse_world_inertia(),
            &body_b.inverse_world_inertia(),
            &Vector3::y(),
            0.0,
        ));

        part.solve_velocity(
            &mut body_a,
            &mut body_b,
            &Vector3::y(),
            fph::NEG_INFINITY,
            fph::INFINITY,
        );

        assert_abs_diff_eq!(body_a.angular_velocity.x, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(body_a.angular_velocity.y, 0.5, epsilon = 1e-12);
    }

    #[test]
    fn should_clamp_to_friction_torque_range() {
        let mut part = AngleConstraintPart::default();
        let mut body_a = spinning_body(vector![0.0, 10.0, 0.0]);
        let mut body_b = spinning_body(Vector3::zeros());
        assert!(part.setup(
            &body_a.inverse_world_inertia(),
            &body_b.inverse_world_inertia(),
            &Vector3::y(),
            0.0,
        ));

        part.solve_velocity(&mut body_a, &mut body_b, &Vector3::y(), -0.5, 0.5);

        assert_abs_diff_eq!(part.total_lambda(), 0.5);
        assert_abs_diff_eq!(body_a.angular_velocity.y, 9.5, epsilon = 1e-12);
        assert_abs_diff_eq!(body_b.angular_velocity.y, 0.5, epsilon = 1e-12);
    }

    #[test]
    fn should_deactivate_without_rotational_inertia() {
        let mut part = AngleConstraintPart::default();
        let zeros = Matrix3::zeros();
        assert!(!part.setup(&zeros, &zeros, &Vector3::y(), 0.0));
        assert!(!part.is_active());
    }
}
