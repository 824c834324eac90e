//! Swing-twist (ragdoll) joints.

use super::{JointHeader, MotorSettings, MotorState};
use crate::{
    constraint::{
        SolverBodies,
        part::{
            angle::AngleConstraintPart,
            point::PointConstraintPart,
            swing_twist::{SwingType, SwingTwistPart, decompose_swing_twist},
        },
    },
    fph,
    quantities::Orientation,
    rigid_body::{RigidBodyIndex, RigidBodyPool},
};
use nalgebra::{Matrix3, Quaternion, Rotation3, UnitQuaternion, Vector3};

/// Configuration of a [`SwingTwistJoint`].
///
/// The constraint space has its x axis along the twist axis and its y axis
/// along the plane axis; the normal axis completing the right-handed basis
/// is `twist × plane`.
#[derive(Clone, Debug)]
pub struct SwingTwistJointSettings {
    pub body_a: RigidBodyIndex,
    pub body_b: RigidBodyIndex,
    /// Pivot in each body's local frame, relative to its center of mass.
    pub local_pivot_a: Vector3<fph>,
    pub local_pivot_b: Vector3<fph>,
    /// Twist axis in each body's local frame (unit length).
    pub local_twist_axis_a: Vector3<fph>,
    pub local_twist_axis_b: Vector3<fph>,
    /// Plane axis in each body's local frame (unit length, perpendicular to
    /// the twist axis).
    pub local_plane_axis_a: Vector3<fph>,
    pub local_plane_axis_b: Vector3<fph>,
    pub swing_type: SwingType,
    /// Half of the swing cone opening toward the normal axis (rotation
    /// about the plane axis).
    pub normal_half_cone_angle: fph,
    /// Half of the swing cone opening toward the plane axis (rotation about
    /// the normal axis).
    pub plane_half_cone_angle: fph,
    pub twist_min: fph,
    pub twist_max: fph,
    /// Maximum friction torque applied on motor axes whose motor is off.
    pub max_friction_torque: fph,
    pub swing_motor_state: MotorState,
    pub twist_motor_state: MotorState,
    pub swing_motor: MotorSettings,
    pub twist_motor: MotorSettings,
    /// Target angular velocity of body B relative to body A, in constraint
    /// space (x = twist rate, y/z = swing rates).
    pub target_angular_velocity: Vector3<fph>,
}

impl SwingTwistJointSettings {
    pub fn new(body_a: RigidBodyIndex, body_b: RigidBodyIndex) -> Self {
        Self {
            body_a,
            body_b,
            local_pivot_a: Vector3::zeros(),
            local_pivot_b: Vector3::zeros(),
            local_twist_axis_a: Vector3::x(),
            local_twist_axis_b: Vector3::x(),
            local_plane_axis_a: Vector3::y(),
            local_plane_axis_b: Vector3::y(),
            swing_type: SwingType::Cone,
            normal_half_cone_angle: 0.0,
            plane_half_cone_angle: 0.0,
            twist_min: 0.0,
            twist_max: 0.0,
            max_friction_torque: 0.0,
            swing_motor_state: MotorState::Off,
            twist_motor_state: MotorState::Off,
            swing_motor: MotorSettings::default(),
            twist_motor: MotorSettings::default(),
            target_angular_velocity: Vector3::zeros(),
        }
    }
}

/// A ragdoll joint: a 3-DOF point constraint plus swing and twist rotation
/// limits, with optional motors about the twist and the two swing axes.
#[derive(Clone, Debug)]
pub struct SwingTwistJoint {
    header: JointHeader,
    local_pivot_a: Vector3<fph>,
    local_pivot_b: Vector3<fph>,
    constraint_to_body_a: Orientation,
    constraint_to_body_b: Orientation,
    max_friction_torque: fph,
    swing_motor_state: MotorState,
    twist_motor_state: MotorState,
    swing_motor: MotorSettings,
    twist_motor: MotorSettings,
    target_angular_velocity: Vector3<fph>,
    /// Target relative orientation in constraint space, pre-clamped against
    /// the limits.
    target_orientation: Quaternion<fph>,
    local_body_a: usize,
    local_body_b: usize,
    constraint_to_world_a: Orientation,
    motor_axes: [Vector3<fph>; 3],
    motor_bounds: [(fph, fph); 3],
    swing_twist_part: SwingTwistPart,
    point_part: PointConstraintPart,
    motor_parts: [AngleConstraintPart; 3],
}

/// Builds the rotation from constraint space to body space from the twist
/// (x) and plane (y) axes.
fn constraint_to_body(twist_axis: &Vector3<fph>, plane_axis: &Vector3<fph>) -> Orientation {
    let normal_axis = twist_axis.cross(plane_axis);
    UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(
        Matrix3::from_columns(&[*twist_axis, *plane_axis, normal_axis]),
    ))
}

impl SwingTwistJoint {
    pub(crate) fn new(settings: SwingTwistJointSettings) -> Self {
        let mut swing_twist_part = SwingTwistPart::new(settings.swing_type);
        swing_twist_part.set_limits(
            settings.twist_min,
            settings.twist_max,
            -settings.normal_half_cone_angle,
            settings.normal_half_cone_angle,
            -settings.plane_half_cone_angle,
            settings.plane_half_cone_angle,
        );

        Self {
            header: JointHeader::new(settings.body_a, settings.body_b),
            local_pivot_a: settings.local_pivot_a,
            local_pivot_b: settings.local_pivot_b,
            constraint_to_body_a: constraint_to_body(
                &settings.local_twist_axis_a,
                &settings.local_plane_axis_a,
            ),
            constraint_to_body_b: constraint_to_body(
                &settings.local_twist_axis_b,
                &settings.local_plane_axis_b,
            ),
            max_friction_torque: settings.max_friction_torque,
            swing_motor_state: settings.swing_motor_state,
            twist_motor_state: settings.twist_motor_state,
            swing_motor: settings.swing_motor,
            twist_motor: settings.twist_motor,
            target_angular_velocity: settings.target_angular_velocity,
            target_orientation: Quaternion::identity(),
            local_body_a: 0,
            local_body_b: 0,
            constraint_to_world_a: Orientation::identity(),
            motor_axes: [Vector3::x(), Vector3::y(), Vector3::z()],
            motor_bounds: [(0.0, 0.0); 3],
            swing_twist_part,
            point_part: PointConstraintPart::default(),
            motor_parts: [AngleConstraintPart::default(); 3],
        }
    }

    pub fn header(&self) -> &JointHeader {
        &self.header
    }

    pub(crate) fn header_mut(&mut self) -> &mut JointHeader {
        &mut self.header
    }

    pub fn set_swing_motor_state(&mut self, state: MotorState) {
        self.swing_motor_state = state;
    }

    pub fn set_twist_motor_state(&mut self, state: MotorState) {
        self.twist_motor_state = state;
    }

    pub fn set_target_angular_velocity(&mut self, target: Vector3<fph>) {
        self.target_angular_velocity = target;
    }

    /// Sets the motor target orientation, given in constraint space. The
    /// target is clamped against the swing and twist limits so the motor
    /// never drives into them.
    pub fn set_target_orientation_in_constraint_space(&mut self, target: Quaternion<fph>) {
        self.target_orientation = self.swing_twist_part.clamped_rotation(&target);
    }

    /// Sets the motor target orientation, given as the desired rotation of
    /// body B relative to body A in body space.
    pub fn set_target_orientation_in_body_space(&mut self, target: Orientation) {
        let constraint_space_target = self.constraint_to_body_a.inverse()
            * target
            * self.constraint_to_body_b;
        self.set_target_orientation_in_constraint_space(constraint_space_target.into_inner());
    }

    pub fn target_orientation(&self) -> &Quaternion<fph> {
        &self.target_orientation
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

        let constraint_to_world_a = body_a.orientation * self.constraint_to_body_a;
        let constraint_to_world_b = body_b.orientation * self.constraint_to_body_b;
        self.constraint_to_world_a = constraint_to_world_a;

        let relative_rotation =
            (constraint_to_world_a.inverse() * constraint_to_world_b).into_inner();
        self.swing_twist_part.setup(
            &body_a,
            &body_b,
            &relative_rotation,
            &constraint_to_world_a,
        );

        self.setup_motors(&body_a, &body_b, &relative_rotation, dt);
    }

    fn setup_motors(
        &mut self,
        body_a: &crate::constraint::SolverBody,
        body_b: &crate::constraint::SolverBody,
        relative_rotation: &Quaternion<fph>,
        dt: fph,
    ) {
        let inv_inertia_a = body_a.inverse_world_inertia();
        let inv_inertia_b = body_b.inverse_world_inertia();

        // Rotation error relative to the (pre-clamped) motor target, used
        // by position motors. Twist error about x, swing errors about y/z.
        let error_rotation = *relative_rotation * self.target_orientation.conjugate();
        let error_rotation = if error_rotation.w < 0.0 {
            -error_rotation
        } else {
            error_rotation
        };
        let (swing_error, twist_error) = decompose_swing_twist(&error_rotation);
        let position_errors = [
            2.0 * (twist_error.i / twist_error.w).atan(),
            2.0 * swing_error.j.atan2(swing_error.w),
            2.0 * swing_error.k.atan2(swing_error.w),
        ];

        for axis_index in 0..3 {
            let world_axis = self
                .constraint_to_world_a
                .transform_vector(&constraint_axis(axis_index));
            self.motor_axes[axis_index] = world_axis;

            let (state, motor) = if axis_index == 0 {
                (self.twist_motor_state, &self.twist_motor)
            } else {
                (self.swing_motor_state, &self.swing_motor)
            };

            match state {
                MotorState::Off => {
                    if self.max_friction_torque > 0.0 {
                        self.motor_bounds[axis_index] = (
                            -self.max_friction_torque * dt,
                            self.max_friction_torque * dt,
                        );
                        self.motor_parts[axis_index].setup(
                            &inv_inertia_a,
                            &inv_inertia_b,
                            &world_axis,
                            0.0,
                        );
                    } else {
                        self.motor_parts[axis_index].deactivate();
                    }
                }
                MotorState::Velocity => {
                    self.motor_bounds[axis_index] = motor.lambda_bounds(dt);
                    self.motor_parts[axis_index].setup(
                        &inv_inertia_a,
                        &inv_inertia_b,
                        &world_axis,
                        -self.target_angular_velocity[axis_index],
                    );
                }
                MotorState::Position => {
                    self.motor_bounds[axis_index] = motor.lambda_bounds(dt);
                    self.motor_parts[axis_index].setup_with_spring(
                        &inv_inertia_a,
                        &inv_inertia_b,
                        &world_axis,
                        0.0,
                        &motor.spring,
                        position_errors[axis_index],
                        dt,
                    );
                }
            }
        }
    }

    pub(crate) fn warm_start_velocity(&mut self, bodies: &mut SolverBodies, warm_start_ratio: fph) {
        let (body_a, body_b) = bodies.pair_mut(self.local_body_a, self.local_body_b);
        for part in &mut self.motor_parts {
            part.warm_start(body_a, body_b, warm_start_ratio);
        }
        self.point_part.warm_start(body_a, body_b, warm_start_ratio);
        self.swing_twist_part
            .warm_start(body_a, body_b, warm_start_ratio);
    }

    pub(crate) fn solve_velocity(&mut self, bodies: &mut SolverBodies, _dt: fph) -> bool {
        let (body_a, body_b) = bodies.pair_mut(self.local_body_a, self.local_body_b);

        let mut applied = false;
        for (axis_index, part) in self.motor_parts.iter_mut().enumerate() {
            let (min_lambda, max_lambda) = self.motor_bounds[axis_index];
            applied |= part.solve_velocity(
                body_a,
                body_b,
                &self.motor_axes[axis_index],
                min_lambda,
                max_lambda,
            );
        }
        applied |= self.point_part.solve_velocity(body_a, body_b);
        applied |= self.swing_twist_part.solve_velocity(body_a, body_b);
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

        let r1 = body_a.orientation.transform_vector(&self.local_pivot_a);
        let r2 = body_b.orientation.transform_vector(&self.local_pivot_b);
        if self.point_part.setup(body_a, body_b, &r1, &r2) {
            let error = (body_a.position + r1) - (body_b.position + r2);
            applied |= self
                .point_part
                .solve_position(body_a, body_b, &error, baumgarte);
        }

        let constraint_to_world_a = body_a.orientation * self.constraint_to_body_a;
        let constraint_to_world_b = body_b.orientation * self.constraint_to_body_b;
        let relative_rotation =
            (constraint_to_world_a.inverse() * constraint_to_world_b).into_inner();
        applied |= self.swing_twist_part.solve_position(
            body_a,
            body_b,
            &relative_rotation,
            &constraint_to_world_a,
            baumgarte,
        );

        applied
    }

    /// Clears all accumulated impulses so the next solve starts cold.
    pub fn reset_warm_start(&mut self) {
        self.point_part.deactivate();
        self.swing_twist_part.reset_warm_start();
        for part in &mut self.motor_parts {
            part.set_total_lambda(0.0);
        }
    }
}

fn constraint_axis(axis_index: usize) -> Vector3<fph> {
    match axis_index {
        0 => Vector3::x(),
        1 => Vector3::y(),
        _ => Vector3::z(),
    }
}
