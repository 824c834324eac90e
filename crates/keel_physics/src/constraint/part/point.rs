//! Three degree of freedom translational equality constraint at a pivot.

use crate::{constraint::SolverBody, fph, quantities};
use nalgebra::{Matrix3, Vector3};

/// A 3-DOF constraint keeping a pivot point fixed on both bodies (a ball
/// joint). The building block removing all relative translation in the
/// hinge, swing-twist and 6-DOF joints.
#[derive(Copy, Clone, Debug, Default)]
pub struct PointConstraintPart {
    r1: Vector3<fph>,
    r2: Vector3<fph>,
    inv_mass_a: fph,
    inv_mass_b: fph,
    inv_inertia_a: Matrix3<fph>,
    inv_inertia_b: Matrix3<fph>,
    /// Inverse of the 3×3 `J M⁻¹ Jᵀ` matrix.
    effective_mass: Matrix3<fph>,
    total_lambda: Vector3<fph>,
    active: bool,
}

impl PointConstraintPart {
    /// Prepares the part with the given moment arms from each body's center
    /// of mass to the pivot. Deactivates the part if the effective mass
    /// matrix is singular.
    pub fn setup(
        &mut self,
        body_a: &SolverBody,
        body_b: &SolverBody,
        r1: &Vector3<fph>,
        r2: &Vector3<fph>,
    ) -> bool {
        self.r1 = *r1;
        self.r2 = *r2;
        self.inv_mass_a = body_a.inv_mass;
        self.inv_mass_b = body_b.inv_mass;
        self.inv_inertia_a = body_a.inverse_world_inertia();
        self.inv_inertia_b = body_b.inverse_world_inertia();

        let r1_cross = r1.cross_matrix();
        let r2_cross = r2.cross_matrix();
        let inv_k = Matrix3::from_diagonal_element(self.inv_mass_a + self.inv_mass_b)
            - r1_cross * self.inv_inertia_a * r1_cross
            - r2_cross * self.inv_inertia_b * r2_cross;

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

    /// Performs one velocity iteration, driving the relative pivot velocity
    /// to zero. Returns whether a non-zero impulse was applied.
    pub fn solve_velocity(&mut self, body_a: &mut SolverBody, body_b: &mut SolverBody) -> bool {
        if !self.active {
            return false;
        }

        let jv = body_a.point_velocity(&self.r1) - body_b.point_velocity(&self.r2);
        let delta_lambda = self.effective_mass * jv;
        self.total_lambda += delta_lambda;

        self.apply_impulse(body_a, body_b, &delta_lambda)
    }

    /// Applies a Baumgarte-stabilized positional correction for the given
    /// pivot separation `c = pivotA − pivotB`. Only positions and
    /// orientations are mutated.
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

        let lambda = self.effective_mass * (baumgarte * c);

        body_a.position -= self.inv_mass_a * lambda;
        quantities::pseudo_advance_orientation(
            &mut body_a.orientation,
            &(-(self.inv_inertia_a * self.r1.cross(&lambda))),
        );
        body_b.position += self.inv_mass_b * lambda;
        quantities::pseudo_advance_orientation(
            &mut body_b.orientation,
            &(self.inv_inertia_b * self.r2.cross(&lambda)),
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
        body_a.linear_velocity -= self.inv_mass_a * impulse;
        body_a.angular_velocity -= self.inv_inertia_a * self.r1.cross(impulse);
        body_b.linear_velocity += self.inv_mass_b * impulse;
        body_b.angular_velocity += self.inv_inertia_b * self.r2.cross(impulse);
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
    use nalgebra::{point, vector};

    fn body_at(position: Position, velocity: Vector3<fph>) -> SolverBody {
        let mut body = RigidBody::dynamic(
            position,
            Orientation::identity(),
            1.0,
            vector![0.4, 0.4, 0.4],
        );
        body.set_linear_velocity(velocity);
        SolverBody::from_rigid_body(&body, &Vector3::zeros())
    }

    #[test]
    fn should_cancel_relative_pivot_velocity() {
        let mut body_a = body_at(point![-1.0, 0.0, 0.0], vector![0.0, 1.0, 0.0]);
        let mut body_b = body_at(point![1.0, 0.0, 0.0], vector![0.0, -1.0, 0.0]);
        let mut part = PointConstraintPart::default();
        // Pivot at the origin, between the bodies.
        assert!(part.setup(
            &body_a,
            &body_b,
            &vector![1.0, 0.0, 0.0],
            &vector![-1.0, 0.0, 0.0],
        ));

        for _ in 0..10 {
            part.solve_velocity(&mut body_a, &mut body_b);
        }

        let pivot_velocity_a = body_a.point_velocity(&vector![1.0, 0.0, 0.0]);
        let pivot_velocity_b = body_b.point_velocity(&vector![-1.0, 0.0, 0.0]);
        assert_abs_diff_eq!(pivot_velocity_a, pivot_velocity_b, epsilon = 1e-9);
    }

    #[test]
    fn should_pull_separated_pivots_together_in_position_solve() {
        let mut body_a = body_at(point![-1.0, 0.0, 0.0], Vector3::zeros());
        let mut body_b = body_at(point![1.2, 0.0, 0.0], Vector3::zeros());
        let mut part = PointConstraintPart::default();
        let r1 = vector![1.0, 0.0, 0.0];
        let r2 = vector![-1.0, 0.0, 0.0];
        assert!(part.setup(&body_a, &body_b, &r1, &r2));

        // Pivot of A is at the origin, pivot of B at x = 0.2.
        let c = (body_a.position + r1) - (body_b.position + r2);
        part.solve_position(&mut body_a, &mut body_b, &c, 1.0);

        let new_c = (body_a.position + r1) - (body_b.position + r2);
        assert_abs_diff_eq!(new_c.norm(), 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(body_a.linear_velocity, Vector3::zeros());
    }

    #[test]
    fn should_deactivate_for_two_static_bodies() {
        let body_a = SolverBody::from_rigid_body(
            &RigidBody::fixed(Position::origin(), Orientation::identity()),
            &Vector3::zeros(),
        );
        let body_b = body_a.clone();
        let mut part = PointConstraintPart::default();
        assert!(!part.setup(&body_a, &body_b, &Vector3::zeros(), &Vector3::zeros()));
        assert!(!part.is_active());
    }
}
