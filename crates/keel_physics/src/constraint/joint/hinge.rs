//! Hinge (revolute) joints.

use super::{JointHeader, MotorSettings, MotorState, centered_angle};
use crate::{
    constraint::{
        SolverBodies,
        part::{
            angle::AngleConstraintPart, hinge_rotation::HingeRotationPart,
            point::PointConstraintPart, spring::SpringSettings,
        },
    },
    fph,
    quantities::Orientation,
    rigid_body::{RigidBodyIndex, RigidBodyPool},
};
use nalgebra::Vector3;
use std::f64::consts::PI;

/// Configuration of a [`HingeJoint`].
#[derive(Clone, Debug)]
pub struct HingeJointSettings {
    pub body_a: RigidBodyIndex,
    pub body_b: RigidBodyIndex,
    /// Pivot in body A's local frame, relative to its center of mass.
    pub local_pivot_a: Vector3<fph>,
    /// Pivot in body B's local frame, relative to its center of mass.
    pub local_pivot_b: Vector3<fph>,
    /// Hinge axis in each body's local frame (unit length).
    pub local_hinge_axis_a: Vector3<fph>,
    pub local_hinge_axis_b: Vector3<fph>,
    /// Rotation limits in radians; `(−π, π)` leaves the hinge unlimited.
    pub limits_min: fph,
    pub limits_max: fph,
    /// Spring used for the limits; without stiffness they are hard.
    pub limits_spring: SpringSettings,
    /// Maximum friction torque applied when the motor is off.
    pub max_friction_torque: fph,
    pub motor_state: MotorState,
    pub motor: MotorSettings,
    pub target_angular_velocity: fph,
    pub target_angle: fph,
}

impl HingeJointSettings {
    pub fn new(body_a: RigidBodyIndex, body_b: RigidBodyIndex) -> Self {
        Self {
            body_a,
            body_b,
            local_pivot_a: Vector3::zeros(),
            local_pivot_b: Vector3::zeros(),
            local_hinge_axis_a: Vector3::y(),
            local_hinge_axis_b: Vector3::y(),
            limits_min: -PI,
            limits_max: PI,
            limits_spring: SpringSettings::default(),
            max_friction_torque: 0.0,
            motor_state: MotorState::Off,
            motor: MotorSettings::default(),
            target_angular_velocity: 0.0,
            target_angle: 0.0,
        }
    }
}

/// Removes five degrees of freedom, leaving only rotation about a shared
/// hinge axis: a 3-DOF point constraint at the pivot, a 2-DOF rotation
/// constraint keeping the hinge axes aligned, an optional angle limit and
/// an optional motor.
#[derive(Clone, Debug)]
pub struct HingeJoint {
    header: JointHeader,
    local_pivot_a: Vector3<fph>,
    local_pivot_b: Vector3<fph>,
    local_hinge_axis_a: Vector3<fph>,
    local_hinge_axis_b: Vector3<fph>,
    limits_min: fph,
    limits_max: fph,
    limits_spring: SpringSettings,
    max_friction_torque: fph,
    motor_state: MotorState,
    motor: MotorSettings,
    target_angular_velocity: fph,
    target_angle: fph,
    /// Inverse of the initial relative orientation, fixing the zero point
    /// of the hinge angle.
    inv_initial_orientation: Orientation,
    local_body_a: usize,
    local_body_b: usize,
    world_hinge_axis_a: Vector3<fph>,
    current_angle: fph,
    limit_min_lambda: fph,
    limit_max_lambda: fph,
    motor_min_lambda: fph,
    motor_max_lambda: fph,
    point_part: PointConstraintPart,
    rotation_part: HingeRotationPart,
    limit_part: AngleConstraintPart,
    motor_part: AngleConstraintPart,
}

impl HingeJoint {
    pub(crate) fn new(pool: &RigidBodyPool, settings: HingeJointSettings) -> Self {
        let orientation_a = pool
            .get(settings.body_a)
            .map_or_else(Orientation::identity, |body| *body.orientation());
        let orientation_b = pool
            .get(settings.body_b)
            .map_or_else(Orientation::identity, |body| *body.orientation());

        Self {
            header: JointHeader::new(settings.body_a, settings.body_b),
            local_pivot_a: settings.local_pivot_a,
            local_pivot_b: settings.local_pivot_b,
            local_hinge_axis_a: settings.local_hinge_axis_a,
            local_hinge_axis_b: settings.local_hinge_axis_b,
            limits_min: settings.limits_min,
            limits_max: settings.limits_max,
            limits_spring: settings.limits_spring,
            max_friction_torque: settings.max_friction_torque,
            motor_state: settings.motor_state,
            motor: settings.motor,
            target_angular_velocity: settings.target_angular_velocity,
            target_angle: settings.target_angle,
            inv_initial_orientation: orientation_b.inverse() * orientation_a,
            local_body_a: 0,
            local_body_b: 0,
            world_hinge_axis_a: Vector3::y(),
            current_angle: 0.0,
            limit_min_lambda: 0.0,
            limit_max_lambda: 0.0,
            motor_min_lambda: 0.0,
            motor_max_lambda: 0.0,
            point_part: PointConstraintPart::default(),
            rotation_part: HingeRotationPart::default(),
            limit_part: AngleConstraintPart::default(),
            motor_part: AngleConstraintPart::default(),
        }
    }

    pub fn header(&self) -> &JointHeader {
        &self.header
    }

    pub(crate) fn header_mut(&mut self) -> &mut JointHeader {
        &mut self.header
    }

    pub fn set_limits(&mut self, limits_min: fph, limits_max: fph) {
        self.limits_min = limits_min;
        self.limits_max = limits_max;
    }

    pub fn set_motor_state(&mut self, motor_state: MotorState) {
        self.motor_state = motor_state;
    }

    pub fn set_target_angular_velocity(&mut self, target_angular_velocity: fph) {
        self.target_angular_velocity = target_angular_velocity;
    }

    pub fn set_target_angle(&mut self, target_angle: fph) {
        self.target_angle = centered_angle(target_angle);
    }

    pub fn set_max_friction_torque(&mut self, max_friction_torque: fph) {
        self.max_friction_torque = max_friction_torque;
    }

    /// The hinge angle computed during the last setup.
    pub fn current_angle(&self) -> fph {
        self.current_angle
    }

    fn has_limits(&self) -> bool {
        self.limits_min > -PI || self.limits_max < PI
    }

    /// The current rotation angle about the hinge axis, in `(−π, π]`.
    ///
    /// Derived from `q_rel = q2 · q_init⁻¹ · q1⁻¹` as
    /// `2·atan(axis·imag(q_rel) / real(q_rel))`. The single-argument `atan`
    /// keeps the result in the principal range with the sign carried by the
    /// quotient; a vanishing real part corresponds to ±π.
    fn compute_angle(
        &self,
        orientation_a: &Orientation,
        orientation_b: &Orientation,
        world_axis: &Vector3<fph>,
    ) -> fph {
        let q_rel = (*orientation_b).into_inner()
            * self.inv_initial_orientation.into_inner()
            * orientation_a.inverse().into_inner();
        if q_rel.w == 0.0 {
            return PI;
        }
        2.0 * (world_axis.dot(&q_rel.imag()) / q_rel.w).atan()
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

        let body_a = bodies.get(self.local_body_a).clone();
        let body_b = bodies.get(self.local_body_b).clone();

        let r1 = body_a.orientation.transform_vector(&self.local_pivot_a);
        let r2 = body_b.orientation.transform_vector(&self.local_pivot_b);
        self.point_part.setup(&body_a, &body_b, &r1, &r2);

        let axis_a = body_a
            .orientation
            .transform_vector(&self.local_hinge_axis_a);
        let axis_b = body_b
            .orientation
            .transform_vector(&self.local_hinge_axis_b);
        self.rotation_part.setup(&body_a, &body_b, &axis_a, &axis_b);
        self.world_hinge_axis_a = axis_a;

        self.current_angle =
            self.compute_angle(&body_a.orientation, &body_b.orientation, &axis_a);

        let inv_inertia_a = body_a.inverse_world_inertia();
        let inv_inertia_b = body_b.inverse_world_inertia();

        // Angle limit: active only at (or beyond) a limit, with the allowed
        // impulse sign pushing the angle back inside.
        let limit_state = if self.has_limits() {
            if self.limits_min == self.limits_max {
                Some((self.current_angle - self.limits_min, fph::NEG_INFINITY, fph::INFINITY))
            } else if self.current_angle <= self.limits_min {
                Some((self.current_angle - self.limits_min, 0.0, fph::INFINITY))
            } else if self.current_angle >= self.limits_max {
                Some((self.current_angle - self.limits_max, fph::NEG_INFINITY, 0.0))
            } else {
                None
            }
        } else {
            None
        };

        match limit_state {
            Some((error, min_lambda, max_lambda)) => {
                self.limit_min_lambda = min_lambda;
                self.limit_max_lambda = max_lambda;
                self.limit_part.setup_with_spring(
                    &inv_inertia_a,
                    &inv_inertia_b,
                    &axis_a,
                    0.0,
                    &self.limits_spring,
                    error,
                    dt,
                );
            }
            None => self.limit_part.deactivate(),
        }

        match self.motor_state {
            MotorState::Off => {
                if self.max_friction_torque > 0.0 {
                    self.motor_min_lambda = -self.max_friction_torque * dt;
                    self.motor_max_lambda = self.max_friction_torque * dt;
                    self.motor_part
                        .setup(&inv_inertia_a, &inv_inertia_b, &axis_a, 0.0);
                } else {
                    self.motor_part.deactivate();
                }
            }
            MotorState::Velocity => {
                let (min_lambda, max_lambda) = self.motor.lambda_bounds(dt);
                self.motor_min_lambda = min_lambda;
                self.motor_max_lambda = max_lambda;
                // The constraint velocity is the negated hinge angle rate, so
                // driving toward the target rate needs a negated bias.
                self.motor_part.setup(
                    &inv_inertia_a,
                    &inv_inertia_b,
                    &axis_a,
                    -self.target_angular_velocity,
                );
            }
            MotorState::Position => {
                let (min_lambda, max_lambda) = self.motor.lambda_bounds(dt);
                self.motor_min_lambda = min_lambda;
                self.motor_max_lambda = max_lambda;
                let error = centered_angle(self.current_angle - self.target_angle);
                self.motor_part.setup_with_spring(
                    &inv_inertia_a,
                    &inv_inertia_b,
                    &axis_a,
                    0.0,
                    &self.motor.spring,
                    error,
                    dt,
                );
            }
        }
    }

    pub(crate) fn warm_start_velocity(&mut self, bodies: &mut SolverBodies, warm_start_ratio: fph) {
        let (body_a, body_b) = bodies.pair_mut(self.local_body_a, self.local_body_b);
        self.motor_part.warm_start(body_a, body_b, warm_start_ratio);
        self.point_part.warm_start(body_a, body_b, warm_start_ratio);
        self.rotation_part
            .warm_start(body_a, body_b, warm_start_ratio);
        self.limit_part.warm_start(body_a, body_b, warm_start_ratio);
    }

    pub(crate) fn solve_velocity(&mut self, bodies: &mut SolverBodies, _dt: fph) -> bool {
        let (body_a, body_b) = bodies.pair_mut(self.local_body_a, self.local_body_b);
        let axis = self.world_hinge_axis_a;

        let mut applied = false;
        applied |= self.motor_part.solve_velocity(
            body_a,
            body_b,
            &axis,
            self.motor_min_lambda,
            self.motor_max_lambda,
        );
        applied |= self.point_part.solve_velocity(body_a, body_b);
        applied |= self.rotation_part.solve_velocity(body_a, body_b);
        applied |= self.limit_part.solve_velocity(
            body_a,
            body_b,
            &axis,
            self.limit_min_lambda,
            self.limit_max_lambda,
        );
        applied
    }

    pub(crate) fn solve_position(
        &mut self,
        bodies: &mut SolverBodies,
        _dt: fph,
        baumgarte: fph,
    ) -> bool {
        let (body_a, body_b) = bodies.pair_mut(self.local_body_a, self.local_body_b);
        let mut applied = false;

        // Pivot alignment, from the current configurations.
        let r1 = body_a.orientation.transform_vector(&self.local_pivot_a);
        let r2 = body_b.orientation.transform_vector(&self.local_pivot_b);
        if self.point_part.setup(body_a, body_b, &r1, &r2) {
            let error = (body_a.position + r1) - (body_b.position + r2);
            applied |= self
                .point_part
                .solve_position(body_a, body_b, &error, baumgarte);
        }

        // Hinge axis alignment.
        let axis_a = body_a
            .orientation
            .transform_vector(&self.local_hinge_axis_a);
        let axis_b = body_b
            .orientation
            .transform_vector(&self.local_hinge_axis_b);
        if self.rotation_part.setup(body_a, body_b, &axis_a, &axis_b) {
            applied |= self.rotation_part.solve_position(body_a, body_b, baumgarte);
        }

        // Angle limits participate only when hard.
        if self.has_limits() && !self.limits_spring.has_stiffness() {
            let angle = self.compute_angle(&body_a.orientation, &body_b.orientation, &axis_a);
            let error = if self.limits_min == self.limits_max {
                Some(centered_angle(angle - self.limits_min))
            } else if angle < self.limits_min {
                Some(angle - self.limits_min)
            } else if angle > self.limits_max {
                Some(angle - self.limits_max)
            } else {
                None
            };
            if let Some(error) = error {
                let inv_inertia_a = body_a.inverse_world_inertia();
                let inv_inertia_b = body_b.inverse_world_inertia();
                if self
                    .limit_part
                    .setup(&inv_inertia_a, &inv_inertia_b, &axis_a, 0.0)
                {
                    applied |= self
                        .limit_part
                        .solve_position(body_a, body_b, error, baumgarte);
                }
            }
        }

        applied
    }

    /// Clears all accumulated impulses so the next solve starts cold.
    pub fn reset_warm_start(&mut self) {
        self.point_part.deactivate();
        self.rotation_part.deactivate();
        self.limit_part.set_total_lambda(0.0);
        self.motor_part.set_total_lambda(0.0);
    }
}
