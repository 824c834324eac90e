//! One degree of freedom translational constraint along an arbitrary world
//! space axis.

use super::spring::{SpringPart, SpringSettings};
use crate::{constraint::SolverBody, fph, quantities};
use nalgebra::{Matrix3, Vector3};

/// A 1-DOF constraint restricting the relative motion of two bodies along a
/// world space axis. Used for contact normals, friction directions, distance
/// joints and the translational axes of the 6-DOF joint.
///
/// The constraint velocity is
/// `jv = axis·(vA − vB) + (r1×axis)·ωA − (r2×axis)·ωB`, where `r1` and `r2`
/// are the moment arms from each body's center of mass to the constraint
/// point. The accumulated impulse persists across frames for warm starting.
#[derive(Copy, Clone, Debug, Default)]
pub struct AxisConstraintPart {
    inv_mass_a: fph,
    inv_mass_b: fph,
    r1_cross_axis: Vector3<fph>,
    r2_cross_axis: Vector3<fph>,
    inv_i1_r1_cross_axis: Vector3<fph>,
    inv_i2_r2_cross_axis: Vector3<fph>,
    effective_mass: fph,
    spring: SpringPart,
    total_lambda: fph,
}

impl AxisConstraintPart {
    /// Prepares the part as a hard constraint with the given velocity bias.
    ///
    /// The inverse masses and world space inverse inertia tensors are passed
    /// explicitly so that callers can apply per-body scaling (contacts with
    /// listener-supplied mass overrides). Non-dynamic bodies must be passed
    /// zero inverse mass and inertia. Deactivates the part if the resulting
    /// effective mass is degenerate.
    pub fn setup(
        &mut self,
        inv_mass_a: fph,
        inv_mass_b: fph,
        inv_inertia_a: &Matrix3<fph>,
        inv_inertia_b: &Matrix3<fph>,
        r1: &Vector3<fph>,
        r2: &Vector3<fph>,
        axis: &Vector3<fph>,
        bias: fph,
    ) -> bool {
        let Some(inv_k) = self.cache_jacobian(
            inv_mass_a,
            inv_mass_b,
            inv_inertia_a,
            inv_inertia_b,
            r1,
            r2,
            axis,
        ) else {
            return false;
        };
        self.effective_mass = self.spring.setup_hard(inv_k, bias);
        true
    }

    /// Prepares the part as a (possibly) soft constraint with the given
    /// current constraint error. Degenerates to a hard constraint when the
    /// settings carry no stiffness.
    pub fn setup_with_spring(
        &mut self,
        inv_mass_a: fph,
        inv_mass_b: fph,
        inv_inertia_a: &Matrix3<fph>,
        inv_inertia_b: &Matrix3<fph>,
        r1: &Vector3<fph>,
        r2: &Vector3<fph>,
        axis: &Vector3<fph>,
        bias: fph,
        spring_settings: &SpringSettings,
        constraint_error: fph,
        dt: fph,
    ) -> bool {
        let Some(inv_k) = self.cache_jacobian(
            inv_mass_a,
            inv_mass_b,
            inv_inertia_a,
            inv_inertia_b,
            r1,
            r2,
            axis,
        ) else {
            return false;
        };
        self.effective_mass = self
            .spring
            .setup(spring_settings, inv_k, constraint_error, bias, dt);
        true
    }

    fn cache_jacobian(
        &mut self,
        inv_mass_a: fph,
        inv_mass_b: fph,
        inv_inertia_a: &Matrix3<fph>,
        inv_inertia_b: &Matrix3<fph>,
        r1: &Vector3<fph>,
        r2: &Vector3<fph>,
        axis: &Vector3<fph>,
    ) -> Option<fph> {
        self.inv_mass_a = inv_mass_a;
        self.inv_mass_b = inv_mass_b;
        self.r1_cross_axis = r1.cross(axis);
        self.r2_cross_axis = r2.cross(axis);
        self.inv_i1_r1_cross_axis = inv_inertia_a * self.r1_cross_axis;
        self.inv_i2_r2_cross_axis = inv_inertia_b * self.r2_cross_axis;

        let inv_effective_mass = inv_mass_a
            + inv_mass_b
            + self.r1_cross_axis.dot(&self.inv_i1_r1_cross_axis)
            + self.r2_cross_axis.dot(&self.inv_i2_r2_cross_axis);

        if inv_effective_mass <= 0.0 {
            self.deactivate();
            return None;
        }
        Some(inv_effective_mass)
    }

    /// Whether the part takes part in solving.
    pub fn is_active(&self) -> bool {
        self.effective_mass != 0.0
    }

    /// Deactivates the part for this step and clears its accumulated
    /// impulse.
    pub fn deactivate(&mut self) {
        self.effective_mass = 0.0;
        self.total_lambda = 0.0;
    }

    /// The accumulated impulse.
    pub fn total_lambda(&self) -> fph {
        self.total_lambda
    }

    /// Seeds the accumulated impulse, normally from a contact cache.
    pub fn set_total_lambda(&mut self, total_lambda: fph) {
        self.total_lambda = total_lambda;
    }

    /// Applies the accumulated impulse from the previous step, scaled by the
    /// given ratio, to kick start convergence.
    pub fn warm_start(
        &mut self,
        body_a: &mut SolverBody,
        body_b: &mut SolverBody,
        axis: &Vector3<fph>,
        warm_start_ratio: fph,
    ) {
        if !self.is_active() {
            return;
        }
        self.total_lambda *= warm_start_ratio;
        self.apply_impulse(body_a, body_b, axis, self.total_lambda);
    }

    /// Performs one velocity iteration, clamping the accumulated impulse to
    /// `[min_lambda, max_lambda]`. Returns whether a non-zero impulse was
    /// applied.
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
        let new_lambda = self
            .unclamped_total_lambda(body_a, body_b, axis)
            .clamp(min_lambda, max_lambda);
        self.commit_total_lambda(body_a, body_b, axis, new_lambda)
    }

    /// Computes what the accumulated impulse would become after one
    /// unclamped velocity iteration, without applying anything. Together
    /// with [`Self::commit_total_lambda`] this lets callers apply clamping
    /// rules that couple multiple parts, such as the two-dimensional
    /// friction cone.
    pub fn unclamped_total_lambda(
        &self,
        body_a: &SolverBody,
        body_b: &SolverBody,
        axis: &Vector3<fph>,
    ) -> fph {
        let jv = axis.dot(&(body_a.linear_velocity - body_b.linear_velocity))
            + self.r1_cross_axis.dot(&body_a.angular_velocity)
            - self.r2_cross_axis.dot(&body_b.angular_velocity);

        self.total_lambda
            + self.effective_mass * (jv - self.spring.total_bias(self.total_lambda))
    }

    /// Replaces the accumulated impulse with the given (externally clamped)
    /// value and applies the difference to the bodies. Returns whether a
    /// non-zero impulse was applied.
    pub fn commit_total_lambda(
        &mut self,
        body_a: &mut SolverBody,
        body_b: &mut SolverBody,
        axis: &Vector3<fph>,
        new_lambda: fph,
    ) -> bool {
        let applied_lambda = new_lambda - self.total_lambda;
        self.total_lambda = new_lambda;
        self.apply_impulse(body_a, body_b, axis, applied_lambda)
    }

    /// Applies a Baumgarte-stabilized positional correction for the given
    /// constraint error `c` (for contacts: the signed separation, negative
    /// when penetrating). The correction mutates positions and orientations
    /// directly without touching velocities, so the energy injected by the
    /// correction never appears as motion. Only valid for hard constraints.
    pub fn solve_position(
        &mut self,
        body_a: &mut SolverBody,
        body_b: &mut SolverBody,
        axis: &Vector3<fph>,
        c: fph,
        baumgarte: fph,
    ) -> bool {
        if !self.is_active() || self.spring.has_softness() || c == 0.0 {
            return false;
        }

        let lambda = -self.effective_mass * baumgarte * c;

        body_a.position -= (self.inv_mass_a * lambda) * axis;
        quantities::pseudo_advance_orientation(
            &mut body_a.orientation,
            &(-lambda * self.inv_i1_r1_cross_axis),
        );
        body_b.position += (self.inv_mass_b * lambda) * axis;
        quantities::pseudo_advance_orientation(
            &mut body_b.orientation,
            &(lambda * self.inv_i2_r2_cross_axis),
        );
        true
    }

    fn apply_impulse(
        &self,
        body_a: &mut SolverBody,
        body_b: &mut SolverBody,
        axis: &Vector3<fph>,
        lambda: fph,
    ) -> bool {
        if lambda == 0.0 {
            return false;
        }
        body_a.linear_velocity -= (self.inv_mass_a * lambda) * axis;
        body_a.angular_velocity -= lambda * self.inv_i1_r1_cross_axis;
        body_b.linear_velocity += (self.inv_mass_b * lambda) * axis;
        body_b.angular_velocity += lambda * self.inv_i2_r2_cross_axis;
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

    fn dynamic_body(velocity: Vector3<fph>) -> SolverBody {
        let mut body = RigidBody::dynamic(
            Position::origin(),
            Orientation::identity(),
            1.0,
            vector![1.0, 1.0, 1.0],
        );
        body.set_linear_velocity(velocity);
        SolverBody::from_rigid_body(&body, &Vector3::zeros())
    }

    fn static_body() -> SolverBody {
        SolverBody::from_rigid_body(
            &RigidBody::fixed(Position::origin(), Orientation::identity()),
            &Vector3::zeros(),
        )
    }

    fn setup_part(part: &mut AxisConstraintPart, body_a: &SolverBody, body_b: &SolverBody) -> bool {
        part.setup(
            body_a.inv_mass,
            body_b.inv_mass,
            &body_a.inverse_world_inertia(),
            &body_b.inverse_world_inertia(),
            &Vector3::zeros(),
            &Vector3::zeros(),
            &Vector3::x(),
            0.0,
        )
    }

    #[test]
    fn should_deactivate_for_two_non_dynamic_bodies() {
        let mut part = AxisConstraintPart::default();
        let body_a = static_body();
        let body_b = static_body();
        assert!(!setup_part(&mut part, &body_a, &body_b));
        assert!(!part.is_active());
        assert_eq!(part.total_lambda(), 0.0);
    }

    #[test]
    fn should_cancel_relative_velocity_along_axis() {
        let mut part = AxisConstraintPart::default();
        let mut body_a = dynamic_body(vector![1.0, 0.0, 0.0]);
        let mut body_b = dynamic_body(vector![-1.0, 0.0, 0.0]);
        assert!(setup_part(&mut part, &body_a, &body_b));

        part.solve_velocity(
            &mut body_a,
            &mut body_b,
            &Vector3::x(),
            fph::NEG_INFINITY,
            fph::INFINITY,
        );

        assert_abs_diff_eq!(
            body_a.linear_velocity.x - body_b.linear_velocity.x,
            0.0,
            epsilon = 1e-12
        );
        // Momentum is conserved for an equal-mass pair.
        assert_abs_diff_eq!(
            body_a.linear_velocity.x + body_b.linear_velocity.x,
            0.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn should_respect_push_only_clamp() {
        let mut part = AxisConstraintPart::default();
        // Bodies already separating along the axis: a push-only constraint
        // must not pull them back together.
        let mut body_a = dynamic_body(vector![-1.0, 0.0, 0.0]);
        let mut body_b = dynamic_body(vector![1.0, 0.0, 0.0]);
        assert!(setup_part(&mut part, &body_a, &body_b));

        let applied = part.solve_velocity(
            &mut body_a,
            &mut body_b,
            &Vector3::x(),
            0.0,
            fph::INFINITY,
        );

        assert!(!applied);
        assert_eq!(part.total_lambda(), 0.0);
        assert_abs_diff_eq!(body_a.linear_velocity, vector![-1.0, 0.0, 0.0]);
    }

    #[test]
    fn should_apply_warm_start_impulse_scaled_by_ratio() {
        let mut part = AxisConstraintPart::default();
        let mut body_a = dynamic_body(Vector3::zeros());
        let mut body_b = dynamic_body(Vector3::zeros());
        assert!(setup_part(&mut part, &body_a, &body_b));
        part.set_total_lambda(2.0);

        part.warm_start(&mut body_a, &mut body_b, &Vector3::x(), 0.5);

        assert_abs_diff_eq!(part.total_lambda(), 1.0);
        assert_abs_diff_eq!(body_a.linear_velocity, vector![-1.0, 0.0, 0.0]);
        assert_abs_diff_eq!(body_b.linear_velocity, vector![1.0, 0.0, 0.0]);
    }

    #[test]
    fn should_correct_position_without_touching_velocity() {
        let mut part = AxisConstraintPart::default();
        let mut body_a = dynamic_body(Vector3::zeros());
        let mut body_b = dynamic_body(Vector3::zeros());
        assert!(setup_part(&mut part, &body_a, &body_b));

        // Negative separation: bodies penetrate by 0.1 along x.
        part.solve_position(&mut body_a, &mut body_b, &Vector3::x(), -0.1, 1.0);

        assert!(body_a.position.x < 0.0);
        assert!(body_b.position.x > 0.0);
        assert_abs_diff_eq!(body_b.position.x - body_a.position.x, 0.1, epsilon = 1e-12);
        assert_abs_diff_eq!(body_a.linear_velocity, Vector3::zeros());
        assert_abs_diff_eq!(body_b.linear_velocity, Vector3::zeros());
    }

    #[test]
    fn should_leave_kinematic_side_unmoved() {
        let mut part = AxisConstraintPart::default();
        let mut body_a = dynamic_body(vector![1.0, 0.0, 0.0]);
        let mut body_b = SolverBody::from_rigid_body(
            &RigidBody::kinematic(Position::origin(), Orientation::identity()),
            &Vector3::zeros(),
        );
        assert!(setup_part(&mut part, &body_a, &body_b));

        part.solve_velocity(
            &mut body_a,
            &mut body_b,
            &Vector3::x(),
            fph::NEG_INFINITY,
            fph::INFINITY,
        );

        // The kinematic body soaks up the impulse without responding.
        assert_abs_diff_eq!(body_a.linear_velocity.x, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(body_b.linear_velocity, Vector3::zeros());
    }
}
