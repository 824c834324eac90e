//! Distance joints.

use super::JointHeader;
use crate::{
    constraint::{
        SolverBodies,
        part::{axis::AxisConstraintPart, spring::SpringSettings},
    },
    fph,
    rigid_body::{RigidBodyIndex, RigidBodyPool},
};
use nalgebra::Vector3;

/// Configuration of a [`DistanceJoint`].
#[derive(Clone, Debug)]
pub struct DistanceJointSettings {
    pub body_a: RigidBodyIndex,
    pub body_b: RigidBodyIndex,
    /// Attachment point in body A's local frame, relative to its center of
    /// mass.
    pub local_point_a: Vector3<fph>,
    /// Attachment point in body B's local frame, relative to its center of
    /// mass.
    pub local_point_b: Vector3<fph>,
    pub min_distance: fph,
    pub max_distance: fph,
    /// Optional spring; without stiffness the limits are hard.
    pub spring: SpringSettings,
}

/// Constrains the distance between two attachment points to lie within
/// `[min_distance, max_distance]`, removing one translational degree of
/// freedom (along the line between the points) when a limit is hit.
#[derive(Clone, Debug)]
pub struct DistanceJoint {
    header: JointHeader,
    local_point_a: Vector3<fph>,
    local_point_b: Vector3<fph>,
    min_distance: fph,
    max_distance: fph,
    spring: SpringSettings,
    local_body_a: usize,
    local_body_b: usize,
    /// World space constraint axis, pointing from the attachment point on A
    /// toward the one on B. Kept from the previous step when the points
    /// coincide.
    world_axis: Vector3<fph>,
    min_lambda: fph,
    max_lambda: fph,
    axis_part: AxisConstraintPart,
}

impl DistanceJoint {
    pub(crate) fn new(settings: DistanceJointSettings) -> Self {
        Self {
            header: JointHeader::new(settings.body_a, settings.body_b),
            local_point_a: settings.local_point_a,
            local_point_b: settings.local_point_b,
            min_distance: settings.min_distance.max(0.0),
            max_distance: settings.max_distance,
            spring: settings.spring,
            local_body_a: 0,
            local_body_b: 0,
            world_axis: Vector3::x(),
            min_lambda: 0.0,
            max_lambda: 0.0,
            axis_part: AxisConstraintPart::default(),
        }
    }

    pub fn header(&self) -> &JointHeader {
        &self.header
    }

    pub(crate) fn header_mut(&mut self) -> &mut JointHeader {
        &mut self.header
    }

    pub fn set_limits(&mut self, min_distance: fph, max_distance: fph) {
        self.min_distance = min_distance.max(0.0);
        self.max_distance = max_distance;
    }

    pub fn set_spring(&mut self, spring: SpringSettings) {
        self.spring = spring;
    }

    /// The accumulated impulse along the constraint axis.
    pub fn total_lambda(&self) -> fph {
        self.axis_part.total_lambda()
    }

    pub(crate) fn setup_velocity(
        &mut self,
        pool: &RigidBodyPool,
        bodies: &mut SolverBodies,
        gravity: &Vector3<fph>,
        dt: fph,
    ) {
        self.local_body_a = bodies.gather(pool, gravity, self.header.body_a);
        self.local_body_b = bodies.gather(pool, gravity, self.header.body_b);

        let body_a = bodies.get(self.local_body_a);
        let body_b = bodies.get(self.local_body_b);

        let r1 = body_a.orientation.transform_vector(&self.local_point_a);
        let r2 = body_b.orientation.transform_vector(&self.local_point_b);
        let world_point_a = body_a.position + r1;
        let world_point_b = body_b.position + r2;

        let delta = world_point_b - world_point_a;
        let distance = delta.norm();
        if distance > 0.0 {
            self.world_axis = delta / distance;
        }

        // A positive impulse along the axis pushes the points apart, so the
        // constraint mode picks the allowed impulse sign.
        let (active, constraint_error, min_lambda, max_lambda) =
            if self.min_distance == self.max_distance {
                (
                    true,
                    distance - self.min_distance,
                    fph::NEG_INFINITY,
                    fph::INFINITY,
                )
            } else if distance <= self.min_distance {
                (true, distance - self.min_distance, 0.0, fph::INFINITY)
            } else if distance >= self.max_distance {
                (true, distance - self.max_distance, fph::NEG_INFINITY, 0.0)
            } else {
                (false, 0.0, 0.0, 0.0)
            };

        if !active {
            self.axis_part.deactivate();
            return;
        }
        self.min_lambda = min_lambda;
        self.max_lambda = max_lambda;

        // Both jacobian halves reference the attachment point on body B so
        // the constraint stays consistent when the points are separated.
        let r1_plus_u = world_point_b - body_a.position;
        self.axis_part.setup_with_spring(
            body_a.inv_mass,
            body_b.inv_mass,
            &body_a.inverse_world_inertia(),
            &body_b.inverse_world_inertia(),
            &r1_plus_u,
            &r2,
            &self.world_axis,
            0.0,
            &self.spring,
            constraint_error,
            dt,
        );
    }

    pub(crate) fn warm_start_velocity(&mut self, bodies: &mut SolverBodies, warm_start_ratio: fph) {
        let (body_a, body_b) = bodies.pair_mut(self.local_body_a, self.local_body_b);
        let world_axis = self.world_axis;
        self.axis_part
            .warm_start(body_a, body_b, &world_axis, warm_start_ratio);
    }

    pub(crate) fn solve_velocity(&mut self, bodies: &mut SolverBodies, _dt: fph) -> bool {
        if !self.axis_part.is_active() {
            return false;
        }
        let (body_a, body_b) = bodies.pair_mut(self.local_body_a, self.local_body_b);
        let world_axis = self.world_axis;
        self.axis_part.solve_velocity(
            body_a,
            body_b,
            &world_axis,
            self.min_lambda,
            self.max_lambda,
        )
    }

    pub(crate) fn solve_position(
        &mut self,
        bodies: &mut SolverBodies,
        _dt: fph,
        baumgarte: fph,
    ) -> bool {
        // Springs handle their error in the velocity solve.
        if self.spring.has_stiffness() {
            return false;
        }

        let (body_a, body_b) = bodies.pair_mut(self.local_body_a, self.local_body_b);

        let r1 = body_a.orientation.transform_vector(&self.local_point_a);
        let r2 = body_b.orientation.transform_vector(&self.local_point_b);
        let world_point_a = body_a.position + r1;
        let world_point_b = body_b.position + r2;

        let delta = world_point_b - world_point_a;
        let distance = delta.norm();
        let axis = if distance > 0.0 {
            delta / distance
        } else {
            self.world_axis
        };

        let constraint_error = if self.min_distance == self.max_distance {
            distance - self.min_distance
        } else if distance < self.min_distance {
            distance - self.min_distance
        } else if distance > self.max_distance {
            distance - self.max_distance
        } else {
            return false;
        };

        let r1_plus_u = world_point_b - body_a.position;
        if !self.axis_part.setup(
            body_a.inv_mass,
            body_b.inv_mass,
            &body_a.inverse_world_inertia(),
            &body_b.inverse_world_inertia(),
            &r1_plus_u,
            &r2,
            &axis,
            0.0,
        ) {
            return false;
        }
        self.axis_part
            .solve_position(body_a, body_b, &axis, constraint_error, baumgarte)
    }

    /// Clears all accumulated impulses so the next solve starts cold.
    pub fn reset_warm_start(&mut self) {
        self.axis_part.set_total_lambda(0.0);
    }
}
