//! Six degree of freedom joints.

use super::{JointHeader, MotorSettings, MotorState};
use crate::{
    constraint::{
        SolverBodies, SolverBody,
        part::{
            angle::AngleConstraintPart,
            axis::AxisConstraintPart,
            point::PointConstraintPart,
            rotation_euler::{self, RotationEulerPart},
            spring::SpringSettings,
            swing_twist::{SwingType, SwingTwistPart},
        },
    },
    fph,
    quantities::Orientation,
    rigid_body::{RigidBodyIndex, RigidBodyPool},
};
use bitflags::bitflags;
use nalgebra::{Matrix3, Quaternion, Rotation3, UnitQuaternion, Vector3};
use std::f64::consts::PI;

bitflags! {
    /// The six constraint-space axes of a [`SixDofJoint`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SixDofAxes: u8 {
        const TRANSLATION_X = 1 << 0;
        const TRANSLATION_Y = 1 << 1;
        const TRANSLATION_Z = 1 << 2;
        const ROTATION_X = 1 << 3;
        const ROTATION_Y = 1 << 4;
        const ROTATION_Z = 1 << 5;
    }
}

/// The status of one degree of freedom.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum AxisState {
    /// The degree of freedom is unconstrained.
    Free,
    /// The degree of freedom is removed.
    Fixed,
    /// The degree of freedom is constrained to `[min, max]` (meters for
    /// translation, radians for rotation).
    Limited { min: fph, max: fph },
}

/// Configuration of a [`SixDofJoint`].
///
/// The constraint space has its x axis along the twist axis and its y axis
/// along the plane axis, as for the swing-twist joint. Indices 0..3 of the
/// motor arrays are the translation axes, 3..6 the rotation axes.
#[derive(Clone, Debug)]
pub struct SixDofJointSettings {
    pub body_a: RigidBodyIndex,
    pub body_b: RigidBodyIndex,
    pub local_pivot_a: Vector3<fph>,
    pub local_pivot_b: Vector3<fph>,
    pub local_twist_axis_a: Vector3<fph>,
    pub local_twist_axis_b: Vector3<fph>,
    pub local_plane_axis_a: Vector3<fph>,
    pub local_plane_axis_b: Vector3<fph>,
    pub translation: [AxisState; 3],
    pub rotation: [AxisState; 3],
    /// Springs for the translation limits; an axis with stiffness gets a
    /// soft limit.
    pub limit_springs: [SpringSettings; 3],
    pub swing_type: SwingType,
    pub motor_states: [MotorState; 6],
    pub motors: [MotorSettings; 6],
    /// Dry friction per axis (force for translation, torque for rotation),
    /// applied when the axis motor is off.
    pub friction: [fph; 6],
    /// Motor targets in constraint space.
    pub target_velocity: Vector3<fph>,
    pub target_angular_velocity: Vector3<fph>,
    pub target_position: Vector3<fph>,
    pub target_orientation: Quaternion<fph>,
}

impl SixDofJointSettings {
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
            translation: [AxisState::Fixed; 3],
            rotation: [AxisState::Fixed; 3],
            limit_springs: [SpringSettings::default(); 3],
            swing_type: SwingType::Cone,
            motor_states: [MotorState::Off; 6],
            motors: [MotorSettings::default(); 6],
            friction: [0.0; 6],
            target_velocity: Vector3::zeros(),
            target_angular_velocity: Vector3::zeros(),
            target_position: Vector3::zeros(),
            target_orientation: Quaternion::identity(),
        }
    }
}

/// The most general joint: each of the six relative degrees of freedom (three
/// translations and three rotations in a constraint frame) can independently
/// be free, fixed or limited, with optional per-axis springs, motors and dry
/// friction.
///
/// Fully fixed translations collapse into a point constraint and fully fixed
/// rotations into a rotation-euler constraint; otherwise per-axis parts and
/// the swing-twist part are used.
#[derive(Clone, Debug)]
pub struct SixDofJoint {
    header: JointHeader,
    local_pivot_a: Vector3<fph>,
    local_pivot_b: Vector3<fph>,
    constraint_to_body_a: Orientation,
    constraint_to_body_b: Orientation,
    translation: [AxisState; 3],
    limit_springs: [SpringSettings; 3],
    motor_states: [MotorState; 6],
    motors: [MotorSettings; 6],
    friction: [fph; 6],
    target_velocity: Vector3<fph>,
    target_angular_velocity: Vector3<fph>,
    target_position: Vector3<fph>,
    target_orientation: Quaternion<fph>,
    free_axes: SixDofAxes,
    fixed_axes: SixDofAxes,
    use_point_constraint: bool,
    use_rotation_euler: bool,
    translation_motor_active: bool,
    rotation_motor_active: bool,
    rotation_position_motor_axes: SixDofAxes,
    inv_initial_orientation: Orientation,
    local_body_a: usize,
    local_body_b: usize,
    constraint_to_world_a: Orientation,
    world_axes: [Vector3<fph>; 3],
    rotation_motor_axes: [Vector3<fph>; 3],
    translation_ranges: [(fph, fph); 3],
    translation_motor_bounds: [(fph, fph); 3],
    rotation_motor_bounds: [(fph, fph); 3],
    point_part: PointConstraintPart,
    translation_parts: [AxisConstraintPart; 3],
    rotation_euler_part: RotationEulerPart,
    swing_twist_part: SwingTwistPart,
    translation_motor_parts: [AxisConstraintPart; 3],
    rotation_motor_parts: [AngleConstraintPart; 3],
}

fn constraint_to_body(twist_axis: &Vector3<fph>, plane_axis: &Vector3<fph>) -> Orientation {
    let normal_axis = twist_axis.cross(plane_axis);
    UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(
        Matrix3::from_columns(&[*twist_axis, *plane_axis, normal_axis]),
    ))
}

fn constraint_axis(axis_index: usize) -> Vector3<fph> {
    match axis_index {
        0 => Vector3::x(),
        1 => Vector3::y(),
        _ => Vector3::z(),
    }
}

impl SixDofJoint {
    pub(crate) fn new(pool: &RigidBodyPool, settings: SixDofJointSettings) -> Self {
        let mut free_axes = SixDofAxes::empty();
        let mut fixed_axes = SixDofAxes::empty();
        for (axis_index, state) in settings.translation.iter().enumerate() {
            let bit = SixDofAxes::from_bits_truncate(1 << axis_index);
            match state {
                AxisState::Free => free_axes |= bit,
                AxisState::Fixed => fixed_axes |= bit,
                AxisState::Limited { .. } => {}
            }
        }
        for (axis_index, state) in settings.rotation.iter().enumerate() {
            let bit = SixDofAxes::from_bits_truncate(1 << (3 + axis_index));
            match state {
                AxisState::Free => free_axes |= bit,
                AxisState::Fixed => fixed_axes |= bit,
                AxisState::Limited { .. } => {}
            }
        }

        let hard_translation_springs = settings
            .limit_springs
            .iter()
            .all(|spring| !spring.has_stiffness());
        let use_point_constraint = fixed_axes.contains(
            SixDofAxes::TRANSLATION_X | SixDofAxes::TRANSLATION_Y | SixDofAxes::TRANSLATION_Z,
        ) && hard_translation_springs;
        let use_rotation_euler = fixed_axes
            .contains(SixDofAxes::ROTATION_X | SixDofAxes::ROTATION_Y | SixDofAxes::ROTATION_Z);

        let translation_motor_active = (0..3).any(|axis_index| {
            settings.motor_states[axis_index] != MotorState::Off
                || settings.friction[axis_index] > 0.0
        });
        let rotation_motor_active = (3..6).any(|axis_index| {
            settings.motor_states[axis_index] != MotorState::Off
                || settings.friction[axis_index] > 0.0
        });
        let mut rotation_position_motor_axes = SixDofAxes::empty();
        for axis_index in 0..3 {
            if settings.motor_states[3 + axis_index] == MotorState::Position {
                rotation_position_motor_axes |=
                    SixDofAxes::from_bits_truncate(1 << (3 + axis_index));
            }
        }

        let mut swing_twist_part = SwingTwistPart::new(settings.swing_type);
        let rotation_limit = |state: &AxisState| match state {
            AxisState::Free => (-PI, PI),
            AxisState::Fixed => (0.0, 0.0),
            AxisState::Limited { min, max } => (*min, *max),
        };
        let (twist_min, twist_max) = rotation_limit(&settings.rotation[0]);
        let (swing_y_min, swing_y_max) = rotation_limit(&settings.rotation[1]);
        let (swing_z_min, swing_z_max) = rotation_limit(&settings.rotation[2]);
        swing_twist_part.set_limits(
            twist_min,
            twist_max,
            swing_y_min,
            swing_y_max,
            swing_z_min,
            swing_z_max,
        );

        let constraint_to_body_a =
            constraint_to_body(&settings.local_twist_axis_a, &settings.local_plane_axis_a);
        let constraint_to_body_b =
            constraint_to_body(&settings.local_twist_axis_b, &settings.local_plane_axis_b);

        let orientation_a = pool
            .get(settings.body_a)
            .map_or_else(Orientation::identity, |body| *body.orientation());
        let orientation_b = pool
            .get(settings.body_b)
            .map_or_else(Orientation::identity, |body| *body.orientation());
        let initial_orientation = (orientation_a * constraint_to_body_a).inverse()
            * (orientation_b * constraint_to_body_b);

        Self {
            header: JointHeader::new(settings.body_a, settings.body_b),
            local_pivot_a: settings.local_pivot_a,
            local_pivot_b: settings.local_pivot_b,
            constraint_to_body_a,
            constraint_to_body_b,
            translation: settings.translation,
            limit_springs: settings.limit_springs,
            motor_states: settings.motor_states,
            motors: settings.motors,
            friction: settings.friction,
            target_velocity: settings.target_velocity,
            target_angular_velocity: settings.target_angular_velocity,
            target_position: settings.target_position,
            target_orientation: settings.target_orientation,
            free_axes,
            fixed_axes,
            use_point_constraint,
            use_rotation_euler,
            translation_motor_active,
            rotation_motor_active,
            rotation_position_motor_axes,
            inv_initial_orientation: initial_orientation.inverse(),
            local_body_a: 0,
            local_body_b: 0,
            constraint_to_world_a: Orientation::identity(),
            world_axes: [Vector3::x(), Vector3::y(), Vector3::z()],
            rotation_motor_axes: [Vector3::x(), Vector3::y(), Vector3::z()],
            translation_ranges: [(0.0, 0.0); 3],
            translation_motor_bounds: [(0.0, 0.0); 3],
            rotation_motor_bounds: [(0.0, 0.0); 3],
            point_part: PointConstraintPart::default(),
            translation_parts: [AxisConstraintPart::default(); 3],
            rotation_euler_part: RotationEulerPart::default(),
            swing_twist_part,
            translation_motor_parts: [AxisConstraintPart::default(); 3],
            rotation_motor_parts: [AngleConstraintPart::default(); 3],
        }
    }

    pub fn header(&self) -> &JointHeader {
        &self.header
    }

    pub(crate) fn header_mut(&mut self) -> &mut JointHeader {
        &mut self.header
    }

    /// The axes that are completely unconstrained.
    pub fn free_axes(&self) -> SixDofAxes {
        self.free_axes
    }

    /// The axes whose degree of freedom is removed.
    pub fn fixed_axes(&self) -> SixDofAxes {
        self.fixed_axes
    }

    pub fn set_motor_state(&mut self, axis_index: usize, state: MotorState) {
        self.motor_states[axis_index] = state;
        self.translation_motor_active = (0..3).any(|axis_index| {
            self.motor_states[axis_index] != MotorState::Off || self.friction[axis_index] > 0.0
        });
        self.rotation_motor_active = (3..6).any(|axis_index| {
            self.motor_states[axis_index] != MotorState::Off || self.friction[axis_index] > 0.0
        });
        self.rotation_position_motor_axes = SixDofAxes::empty();
        for axis_index in 0..3 {
            if self.motor_states[3 + axis_index] == MotorState::Position {
                self.rotation_position_motor_axes |=
                    SixDofAxes::from_bits_truncate(1 << (3 + axis_index));
            }
        }
    }

    pub fn set_target_velocity(&mut self, target: Vector3<fph>) {
        self.target_velocity = target;
    }

    pub fn set_target_angular_velocity(&mut self, target: Vector3<fph>) {
        self.target_angular_velocity = target;
    }

    pub fn set_target_position(&mut self, target: Vector3<fph>) {
        self.target_position = target;
    }

    /// Sets the rotation motor target, clamped against the rotation limits.
    pub fn set_target_orientation(&mut self, target: Quaternion<fph>) {
        self.target_orientation = self.swing_twist_part.clamped_rotation(&target);
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
        let world_pivot_a = body_a.position + r1;
        let world_pivot_b = body_b.position + r2;
        let r1_plus_u = world_pivot_b - body_a.position;

        let constraint_to_world_a = body_a.orientation * self.constraint_to_body_a;
        let constraint_to_world_b = body_b.orientation * self.constraint_to_body_b;
        self.constraint_to_world_a = constraint_to_world_a;
        let translation_cs =
            constraint_to_world_a.inverse_transform_vector(&(world_pivot_b - world_pivot_a));

        let inv_inertia_a = body_a.inverse_world_inertia();
        let inv_inertia_b = body_b.inverse_world_inertia();

        for axis_index in 0..3 {
            self.world_axes[axis_index] =
                constraint_to_world_a.transform_vector(&constraint_axis(axis_index));
        }

        // Translation.
        if self.use_point_constraint {
            self.point_part.setup(&body_a, &body_b, &r1, &r2);
        } else {
            for axis_index in 0..3 {
                let axis = self.world_axes[axis_index];
                let offset = translation_cs[axis_index];
                let state = match self.translation[axis_index] {
                    AxisState::Free => None,
                    AxisState::Fixed => {
                        Some((offset, fph::NEG_INFINITY, fph::INFINITY))
                    }
                    AxisState::Limited { min, max } => {
                        if min == max {
                            Some((offset - min, fph::NEG_INFINITY, fph::INFINITY))
                        } else if offset <= min {
                            Some((offset - min, 0.0, fph::INFINITY))
                        } else if offset >= max {
                            Some((offset - max, fph::NEG_INFINITY, 0.0))
                        } else {
                            None
                        }
                    }
                };
                match state {
                    Some((error, min_lambda, max_lambda)) => {
                        self.translation_ranges[axis_index] = (min_lambda, max_lambda);
                        self.translation_parts[axis_index].setup_with_spring(
                            body_a.inv_mass,
                            body_b.inv_mass,
                            &inv_inertia_a,
                            &inv_inertia_b,
                            &r1_plus_u,
                            &r2,
                            &axis,
                            0.0,
                            &self.limit_springs[axis_index],
                            error,
                            dt,
                        );
                    }
                    None => self.translation_parts[axis_index].deactivate(),
                }
            }
        }

        // Rotation.
        let relative_rotation =
            (constraint_to_world_a.inverse() * constraint_to_world_b).into_inner();
        if self.use_rotation_euler {
            self.rotation_euler_part.setup(&body_a, &body_b);
        } else {
            self.swing_twist_part.setup(
                &body_a,
                &body_b,
                &relative_rotation,
                &constraint_to_world_a,
            );
        }

        // Motors.
        if self.translation_motor_active {
            self.setup_translation_motors(
                &body_a,
                &body_b,
                &r1_plus_u,
                &r2,
                &translation_cs,
                dt,
            );
        } else {
            for part in &mut self.translation_motor_parts {
                part.deactivate();
            }
        }
        if self.rotation_motor_active {
            self.setup_rotation_motors(
                &inv_inertia_a,
                &inv_inertia_b,
                &relative_rotation,
                dt,
            );
        } else {
            for part in &mut self.rotation_motor_parts {
                part.deactivate();
            }
        }
    }

    fn setup_translation_motors(
        &mut self,
        body_a: &SolverBody,
        body_b: &SolverBody,
        r1_plus_u: &Vector3<fph>,
        r2: &Vector3<fph>,
        translation_cs: &Vector3<fph>,
        dt: fph,
    ) {
        let inv_inertia_a = body_a.inverse_world_inertia();
        let inv_inertia_b = body_b.inverse_world_inertia();

        for axis_index in 0..3 {
            let axis = self.world_axes[axis_index];
            let part = &mut self.translation_motor_parts[axis_index];
            match self.motor_states[axis_index] {
                MotorState::Off => {
                    if self.friction[axis_index] > 0.0 {
                        self.translation_motor_bounds[axis_index] = (
                            -self.friction[axis_index] * dt,
                            self.friction[axis_index] * dt,
                        );
                        part.setup(
                            body_a.inv_mass,
                            body_b.inv_mass,
                            &inv_inertia_a,
                            &inv_inertia_b,
                            r1_plus_u,
                            r2,
                            &axis,
                            0.0,
                        );
                    } else {
                        part.deactivate();
                    }
                }
                MotorState::Velocity => {
                    self.translation_motor_bounds[axis_index] =
                        self.motors[axis_index].lambda_bounds(dt);
                    part.setup(
                        body_a.inv_mass,
                        body_b.inv_mass,
                        &inv_inertia_a,
                        &inv_inertia_b,
                        r1_plus_u,
                        r2,
                        &axis,
                        -self.target_velocity[axis_index],
                    );
                }
                MotorState::Position => {
                    self.translation_motor_bounds[axis_index] =
                        self.motors[axis_index].lambda_bounds(dt);
                    let error = translation_cs[axis_index] - self.target_position[axis_index];
                    part.setup_with_spring(
                        body_a.inv_mass,
                        body_b.inv_mass,
                        &inv_inertia_a,
                        &inv_inertia_b,
                        r1_plus_u,
                        r2,
                        &axis,
                        0.0,
                        &self.motors[axis_index].spring,
                        error,
                        dt,
                    );
                }
            }
        }
    }

    fn setup_rotation_motors(
        &mut self,
        inv_inertia_a: &Matrix3<fph>,
        inv_inertia_b: &Matrix3<fph>,
        relative_rotation: &Quaternion<fph>,
        dt: fph,
    ) {
        let position_errors = self.rotation_position_motor_errors(relative_rotation);

        for axis_index in 0..3 {
            let axis = self
                .constraint_to_world_a
                .transform_vector(&constraint_axis(axis_index));
            self.rotation_motor_axes[axis_index] = axis;
            let motor_index = 3 + axis_index;
            let part = &mut self.rotation_motor_parts[axis_index];
            match self.motor_states[motor_index] {
                MotorState::Off => {
                    if self.friction[motor_index] > 0.0 {
                        self.rotation_motor_bounds[axis_index] = (
                            -self.friction[motor_index] * dt,
                            self.friction[motor_index] * dt,
                        );
                        part.setup(inv_inertia_a, inv_inertia_b, &axis, 0.0);
                    } else {
                        part.deactivate();
                    }
                }
                MotorState::Velocity => {
                    self.rotation_motor_bounds[axis_index] =
                        self.motors[motor_index].lambda_bounds(dt);
                    part.setup(
                        inv_inertia_a,
                        inv_inertia_b,
                        &axis,
                        -self.target_angular_velocity[axis_index],
                    );
                }
                MotorState::Position => {
                    self.rotation_motor_bounds[axis_index] =
                        self.motors[motor_index].lambda_bounds(dt);
                    part.setup_with_spring(
                        inv_inertia_a,
                        inv_inertia_b,
                        &axis,
                        0.0,
                        &self.motors[motor_index].spring,
                        position_errors[axis_index],
                        dt,
                    );
                }
            }
        }
    }

    /// Decomposes the rotation error relative to the motor target into
    /// per-axis angles, projecting onto just the axes that have an active
    /// position motor: a single axis extracts the twist around that axis;
    /// for two axes the remaining axis's twist is conjugated out first; all
    /// three use the small-angle rotation vector.
    fn rotation_position_motor_errors(
        &self,
        relative_rotation: &Quaternion<fph>,
    ) -> [fph; 3] {
        let mut diff = *relative_rotation * self.target_orientation.conjugate();
        if diff.w < 0.0 {
            diff = -diff;
        }

        let active: Vec<usize> = (0..3)
            .filter(|axis_index| {
                self.rotation_position_motor_axes
                    .contains(SixDofAxes::from_bits_truncate(1 << (3 + axis_index)))
            })
            .collect();

        let mut errors = [0.0; 3];
        match active.len() {
            0 => {}
            1 => {
                let axis_index = active[0];
                errors[axis_index] = twist_angle_around(&diff, axis_index);
            }
            2 => {
                let remaining = (0..3)
                    .find(|axis_index| !active.contains(axis_index))
                    .unwrap();
                let without_remaining = diff * twist_around(&diff, remaining).conjugate();
                for &axis_index in &active {
                    errors[axis_index] = twist_angle_around(&without_remaining, axis_index);
                }
            }
            _ => {
                let imag = diff.imag();
                errors = [2.0 * imag.x, 2.0 * imag.y, 2.0 * imag.z];
            }
        }
        errors
    }

    pub(crate) fn warm_start_velocity(&mut self, bodies: &mut SolverBodies, warm_start_ratio: fph) {
        let (body_a, body_b) = bodies.pair_mut(self.local_body_a, self.local_body_b);

        for axis_index in 0..3 {
            let axis = self.world_axes[axis_index];
            self.translation_motor_parts[axis_index].warm_start(
                body_a,
                body_b,
                &axis,
                warm_start_ratio,
            );
            self.rotation_motor_parts[axis_index].warm_start(body_a, body_b, warm_start_ratio);
        }

        if self.use_point_constraint {
            self.point_part.warm_start(body_a, body_b, warm_start_ratio);
        } else {
            for axis_index in 0..3 {
                let axis = self.world_axes[axis_index];
                self.translation_parts[axis_index].warm_start(
                    body_a,
                    body_b,
                    &axis,
                    warm_start_ratio,
                );
            }
        }

        if self.use_rotation_euler {
            self.rotation_euler_part
                .warm_start(body_a, body_b, warm_start_ratio);
        } else {
            self.swing_twist_part
                .warm_start(body_a, body_b, warm_start_ratio);
        }
    }

    pub(crate) fn solve_velocity(&mut self, bodies: &mut SolverBodies, _dt: fph) -> bool {
        let (body_a, body_b) = bodies.pair_mut(self.local_body_a, self.local_body_b);
        let mut applied = false;

        for axis_index in 0..3 {
            let axis = self.world_axes[axis_index];
            let (min_lambda, max_lambda) = self.translation_motor_bounds[axis_index];
            applied |= self.translation_motor_parts[axis_index].solve_velocity(
                body_a, body_b, &axis, min_lambda, max_lambda,
            );
            let (min_lambda, max_lambda) = self.rotation_motor_bounds[axis_index];
            applied |= self.rotation_motor_parts[axis_index].solve_velocity(
                body_a,
                body_b,
                &self.rotation_motor_axes[axis_index],
                min_lambda,
                max_lambda,
            );
        }

        if self.use_point_constraint {
            applied |= self.point_part.solve_velocity(body_a, body_b);
        } else {
            for axis_index in 0..3 {
                let axis = self.world_axes[axis_index];
                let (min_lambda, max_lambda) = self.translation_ranges[axis_index];
                applied |= self.translation_parts[axis_index].solve_velocity(
                    body_a, body_b, &axis, min_lambda, max_lambda,
                );
            }
        }

        if self.use_rotation_euler {
            applied |= self.rotation_euler_part.solve_velocity(body_a, body_b);
        } else {
            applied |= self.swing_twist_part.solve_velocity(body_a, body_b);
        }

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
        let world_pivot_a = body_a.position + r1;
        let world_pivot_b = body_b.position + r2;
        let constraint_to_world_a = body_a.orientation * self.constraint_to_body_a;
        let constraint_to_world_b = body_b.orientation * self.constraint_to_body_b;

        if self.use_point_constraint {
            if self.point_part.setup(body_a, body_b, &r1, &r2) {
                let error = world_pivot_a - world_pivot_b;
                applied |= self
                    .point_part
                    .solve_position(body_a, body_b, &error, baumgarte);
            }
        } else {
            let translation_cs = constraint_to_world_a
                .inverse_transform_vector(&(world_pivot_b - world_pivot_a));
            let r1_plus_u = world_pivot_b - body_a.position;
            let inv_inertia_a = body_a.inverse_world_inertia();
            let inv_inertia_b = body_b.inverse_world_inertia();

            for axis_index in 0..3 {
                if self.limit_springs[axis_index].has_stiffness() {
                    continue;
                }
                let offset = translation_cs[axis_index];
                let error = match self.translation[axis_index] {
                    AxisState::Free => None,
                    AxisState::Fixed => Some(offset),
                    AxisState::Limited { min, max } => {
                        if min == max {
                            Some(offset - min)
                        } else if offset < min {
                            Some(offset - min)
                        } else if offset > max {
                            Some(offset - max)
                        } else {
                            None
                        }
                    }
                };
                let Some(error) = error else { continue };
                let axis = constraint_to_world_a.transform_vector(&constraint_axis(axis_index));
                if self.translation_parts[axis_index].setup(
                    body_a.inv_mass,
                    body_b.inv_mass,
                    &inv_inertia_a,
                    &inv_inertia_b,
                    &r1_plus_u,
                    &r2,
                    &axis,
                    0.0,
                ) {
                    applied |= self.translation_parts[axis_index].solve_position(
                        body_a, body_b, &axis, error, baumgarte,
                    );
                }
            }
        }

        if self.use_rotation_euler {
            if self.rotation_euler_part.setup(body_a, body_b) {
                let error = rotation_euler::rotation_error(
                    &constraint_to_world_a,
                    &constraint_to_world_b,
                    &self.inv_initial_orientation,
                );
                applied |= self
                    .rotation_euler_part
                    .solve_position(body_a, body_b, &error, baumgarte);
            }
        } else {
            let relative_rotation =
                (constraint_to_world_a.inverse() * constraint_to_world_b).into_inner();
            applied |= self.swing_twist_part.solve_position(
                body_a,
                body_b,
                &relative_rotation,
                &constraint_to_world_a,
                baumgarte,
            );
        }

        applied
    }

    /// Clears all accumulated impulses so the next solve starts cold.
    pub fn reset_warm_start(&mut self) {
        self.point_part.deactivate();
        self.rotation_euler_part.deactivate();
        self.swing_twist_part.reset_warm_start();
        for part in &mut self.translation_parts {
            part.set_total_lambda(0.0);
        }
        for part in &mut self.translation_motor_parts {
            part.set_total_lambda(0.0);
        }
        for part in &mut self.rotation_motor_parts {
            part.set_total_lambda(0.0);
        }
    }
}

/// The twist component of the quaternion around the given constraint axis.
fn twist_around(q: &Quaternion<fph>, axis_index: usize) -> Quaternion<fph> {
    let component = q.imag()[axis_index];
    let norm = (q.w * q.w + component * component).sqrt();
    if norm == 0.0 {
        return Quaternion::identity();
    }
    let mut imag = Vector3::zeros();
    imag[axis_index] = component / norm;
    Quaternion::from_parts(q.w / norm, imag)
}

/// The rotation angle of the twist component around the given constraint
/// axis.
fn twist_angle_around(q: &Quaternion<fph>, axis_index: usize) -> fph {
    let twist = twist_around(q, axis_index);
    if twist.w == 0.0 {
        return PI;
    }
    2.0 * (twist.imag()[axis_index] / twist.w).atan()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::FRAC_PI_3;

    #[test]
    fn twist_extraction_should_recover_single_axis_angle() {
        let q = *UnitQuaternion::from_axis_angle(&Vector3::y_axis(), FRAC_PI_3).quaternion();
        assert_abs_diff_eq!(twist_angle_around(&q, 1), FRAC_PI_3, epsilon = 1e-12);
        assert_abs_diff_eq!(twist_angle_around(&q, 0), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn fixed_axis_masks_should_reflect_settings() {
        let pool = RigidBodyPool::new();
        let mut settings = SixDofJointSettings::new(0, 1);
        settings.translation = [
            AxisState::Fixed,
            AxisState::Free,
            AxisState::Limited { min: -1.0, max: 1.0 },
        ];
        settings.rotation = [AxisState::Free; 3];
        let joint = SixDofJoint::new(&pool, settings);
        assert!(joint.fixed_axes().contains(SixDofAxes::TRANSLATION_X));
        assert!(joint.free_axes().contains(SixDofAxes::TRANSLATION_Y));
        assert!(!joint.fixed_axes().contains(SixDofAxes::TRANSLATION_Z));
        assert!(!joint.use_point_constraint);
        assert!(!joint.use_rotation_euler);
    }
}
