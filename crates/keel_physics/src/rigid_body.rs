//! Rigid bodies and their indexed storage.

use crate::{
    constraint::joint::JointId,
    fph,
    material::ContactMaterial,
    quantities::{
        self, AngularVelocity, Direction, Force, Orientation, Position, Velocity,
    },
};
use nalgebra::{Matrix3, Vector3};

/// Index of a [`RigidBody`] in a [`RigidBodyPool`].
pub type RigidBodyIndex = usize;

/// How the motion of a rigid body is governed.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MotionType {
    /// The body never moves.
    Static,
    /// The body moves only when its velocity is explicitly modified. It is
    /// treated as having infinite mass by the constraint solver.
    Kinematic,
    /// The body's motion is governed by forces and impulses acting on its
    /// inertial properties.
    Dynamic,
}

/// The state determining how a non-static rigid body responds to forces and
/// impulses.
#[derive(Copy, Clone, Debug)]
pub struct MotionProperties {
    /// Inverse of the body's mass. Zero means effectively infinite mass.
    pub inv_mass: fph,
    /// Inverse of the diagonal of the body's inertia tensor in the body's
    /// local (principal) frame.
    pub inv_inertia_diagonal: Vector3<fph>,
    /// Linear velocity of the body's center of mass (world space).
    pub linear_velocity: Velocity,
    /// Angular velocity about the body's center of mass (world space).
    pub angular_velocity: AngularVelocity,
    /// Accumulated force for the current step (world space).
    pub force: Force,
    /// Scaling of the global gravity applied to this body.
    pub gravity_factor: fph,
}

/// A rigid body as seen by the constraint solving core.
#[derive(Clone, Debug)]
pub struct RigidBody {
    motion_type: MotionType,
    position: Position,
    orientation: Orientation,
    /// Offset from the body origin to the center of mass, in the body's
    /// local frame.
    center_of_mass_offset: Vector3<fph>,
    motion: Option<MotionProperties>,
    material: ContactMaterial,
    sensor: bool,
    /// Weak back-references to the joints attached to this body, traversed
    /// by the external island builder.
    constraint_ids: Vec<JointId>,
}

/// Compactly stored rigid bodies addressed by index.
#[derive(Clone, Debug, Default)]
pub struct RigidBodyPool {
    bodies: Vec<RigidBody>,
}

impl MotionProperties {
    pub fn new(inv_mass: fph, inv_inertia_diagonal: Vector3<fph>) -> Self {
        Self {
            inv_mass,
            inv_inertia_diagonal,
            linear_velocity: Velocity::zeros(),
            angular_velocity: AngularVelocity::zeros(),
            force: Force::zeros(),
            gravity_factor: 1.0,
        }
    }
}

impl RigidBody {
    /// Creates a dynamic rigid body with the given configuration, mass and
    /// principal moments of inertia (in the body's local frame).
    pub fn dynamic(
        position: Position,
        orientation: Orientation,
        mass: fph,
        inertia_diagonal: Vector3<fph>,
    ) -> Self {
        let inv_inertia_diagonal = inertia_diagonal.map(|moment| {
            if moment > 0.0 { moment.recip() } else { 0.0 }
        });
        Self {
            motion_type: MotionType::Dynamic,
            position,
            orientation,
            center_of_mass_offset: Vector3::zeros(),
            motion: Some(MotionProperties::new(
                if mass > 0.0 { mass.recip() } else { 0.0 },
                inv_inertia_diagonal,
            )),
            material: ContactMaterial::default(),
            sensor: false,
            constraint_ids: Vec::new(),
        }
    }

    /// Creates a kinematic rigid body with the given configuration.
    pub fn kinematic(position: Position, orientation: Orientation) -> Self {
        Self {
            motion_type: MotionType::Kinematic,
            position,
            orientation,
            center_of_mass_offset: Vector3::zeros(),
            motion: Some(MotionProperties::new(0.0, Vector3::zeros())),
            material: ContactMaterial::default(),
            sensor: false,
            constraint_ids: Vec::new(),
        }
    }

    /// Creates a static rigid body with the given configuration.
    pub fn fixed(position: Position, orientation: Orientation) -> Self {
        Self {
            motion_type: MotionType::Static,
            position,
            orientation,
            center_of_mass_offset: Vector3::zeros(),
            motion: None,
            material: ContactMaterial::default(),
            sensor: false,
            constraint_ids: Vec::new(),
        }
    }

    pub fn with_material(mut self, material: ContactMaterial) -> Self {
        self.material = material;
        self
    }

    pub fn with_sensor(mut self, sensor: bool) -> Self {
        self.sensor = sensor;
        self
    }

    pub fn with_center_of_mass_offset(mut self, offset: Vector3<fph>) -> Self {
        self.center_of_mass_offset = offset;
        self
    }

    pub fn motion_type(&self) -> MotionType {
        self.motion_type
    }

    pub fn is_dynamic(&self) -> bool {
        self.motion_type == MotionType::Dynamic
    }

    pub fn is_sensor(&self) -> bool {
        self.sensor
    }

    pub fn material(&self) -> &ContactMaterial {
        &self.material
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    pub fn orientation(&self) -> &Orientation {
        &self.orientation
    }

    pub fn set_position(&mut self, position: Position) {
        self.position = position;
    }

    pub fn set_orientation(&mut self, orientation: Orientation) {
        self.orientation = orientation;
    }

    pub fn motion_properties(&self) -> Option<&MotionProperties> {
        self.motion.as_ref()
    }

    pub fn motion_properties_mut(&mut self) -> Option<&mut MotionProperties> {
        self.motion.as_mut()
    }

    /// The world space position of the body's center of mass.
    pub fn center_of_mass_position(&self) -> Position {
        self.position + self.orientation.transform_vector(&self.center_of_mass_offset)
    }

    /// The body's inverse mass. Zero unless the body is dynamic.
    pub fn inv_mass(&self) -> fph {
        match (&self.motion, self.motion_type) {
            (Some(motion), MotionType::Dynamic) => motion.inv_mass,
            _ => 0.0,
        }
    }

    /// The body's inverse inertia tensor in world space. Zero unless the
    /// body is dynamic.
    pub fn inverse_world_inertia(&self) -> Matrix3<fph> {
        match (&self.motion, self.motion_type) {
            (Some(motion), MotionType::Dynamic) => {
                let rotation = self.orientation.to_rotation_matrix();
                rotation.matrix()
                    * Matrix3::from_diagonal(&motion.inv_inertia_diagonal)
                    * rotation.matrix().transpose()
            }
            _ => Matrix3::zeros(),
        }
    }

    /// The body's linear velocity. Zero for static bodies.
    pub fn linear_velocity(&self) -> Velocity {
        self.motion
            .as_ref()
            .map_or_else(Velocity::zeros, |motion| motion.linear_velocity)
    }

    /// The body's angular velocity. Zero for static bodies.
    pub fn angular_velocity(&self) -> AngularVelocity {
        self.motion
            .as_ref()
            .map_or_else(AngularVelocity::zeros, |motion| motion.angular_velocity)
    }

    pub fn set_linear_velocity(&mut self, velocity: Velocity) {
        if let Some(motion) = self.motion.as_mut() {
            motion.linear_velocity = velocity;
        }
    }

    pub fn set_angular_velocity(&mut self, angular_velocity: AngularVelocity) {
        if let Some(motion) = self.motion.as_mut() {
            motion.angular_velocity = angular_velocity;
        }
    }

    /// The world space velocity of a point rigidly attached to the body, with
    /// `moment_arm` the displacement from the center of mass to the point.
    pub fn point_velocity(&self, moment_arm: &Vector3<fph>) -> Velocity {
        self.linear_velocity() + self.angular_velocity().cross(moment_arm)
    }

    /// The acceleration the body experiences this step from gravity and its
    /// accumulated force. Zero unless the body is dynamic.
    pub fn force_acceleration(&self, gravity: &Vector3<fph>) -> Vector3<fph> {
        match (&self.motion, self.motion_type) {
            (Some(motion), MotionType::Dynamic) => {
                gravity * motion.gravity_factor + motion.force * motion.inv_mass
            }
            _ => Vector3::zeros(),
        }
    }

    /// Registers a joint as attached to this body.
    pub fn add_constraint_id(&mut self, id: JointId) {
        if !self.constraint_ids.contains(&id) {
            self.constraint_ids.push(id);
        }
    }

    /// Unregisters a joint from this body.
    pub fn remove_constraint_id(&mut self, id: JointId) {
        self.constraint_ids.retain(|&existing| existing != id);
    }

    /// The joints attached to this body.
    pub fn constraint_ids(&self) -> &[JointId] {
        &self.constraint_ids
    }

    /// Displaces the body's position directly, bypassing its velocity. Used
    /// by positional correction.
    pub fn apply_position_step(&mut self, delta: &Vector3<fph>) {
        if self.is_dynamic() {
            self.position += delta;
        }
    }

    /// Rotates the body's orientation directly by a small rotation vector,
    /// bypassing its angular velocity. Used by positional correction.
    pub fn apply_rotation_step(&mut self, rotation: &Vector3<fph>) {
        if self.is_dynamic() {
            quantities::pseudo_advance_orientation(&mut self.orientation, rotation);
        }
    }
}

impl RigidBodyPool {
    pub fn new() -> Self {
        Self { bodies: Vec::new() }
    }

    /// Adds the given body to the pool and returns its index.
    pub fn add(&mut self, body: RigidBody) -> RigidBodyIndex {
        let index = self.bodies.len();
        self.bodies.push(body);
        index
    }

    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }

    pub fn get(&self, index: RigidBodyIndex) -> Option<&RigidBody> {
        self.bodies.get(index)
    }

    pub fn get_mut(&mut self, index: RigidBodyIndex) -> Option<&mut RigidBody> {
        self.bodies.get_mut(index)
    }

    /// Returns a reference to the body at the given index.
    ///
    /// # Panics
    /// If no body exists at the index.
    pub fn body(&self, index: RigidBodyIndex) -> &RigidBody {
        &self.bodies[index]
    }

    /// Returns a mutable reference to the body at the given index.
    ///
    /// # Panics
    /// If no body exists at the index.
    pub fn body_mut(&mut self, index: RigidBodyIndex) -> &mut RigidBody {
        &mut self.bodies[index]
    }

    /// Returns mutable references to the two bodies at the given indices.
    ///
    /// # Panics
    /// If the two indices are equal or either is out of bounds.
    pub fn get_pair_mut(
        &mut self,
        index_a: RigidBodyIndex,
        index_b: RigidBodyIndex,
    ) -> (&mut RigidBody, &mut RigidBody) {
        assert_ne!(index_a, index_b);

        if index_b > index_a {
            let (left, right) = self.bodies.split_at_mut(index_b);
            (&mut left[index_a], &mut right[0])
        } else {
            let (left, right) = self.bodies.split_at_mut(index_a);
            (&mut right[0], &mut left[index_b])
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &RigidBody> {
        self.bodies.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut RigidBody> {
        self.bodies.iter_mut()
    }
}

/// Constructs a [`Direction`] from the given vector.
///
/// # Panics
/// If the vector has (close to) zero length.
pub fn direction(vector: Vector3<fph>) -> Direction {
    Direction::new_normalize(vector)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use nalgebra::{point, vector};

    fn unit_cube_body() -> RigidBody {
        // Solid unit cube of mass 1: principal moments 1/6.
        RigidBody::dynamic(
            Position::origin(),
            Orientation::identity(),
            1.0,
            vector![1.0 / 6.0, 1.0 / 6.0, 1.0 / 6.0],
        )
    }

    #[test]
    fn should_give_static_body_infinite_mass() {
        let body = RigidBody::fixed(Position::origin(), Orientation::identity());
        assert_eq!(body.inv_mass(), 0.0);
        assert_eq!(body.inverse_world_inertia(), Matrix3::zeros());
        assert_eq!(body.linear_velocity(), Velocity::zeros());
    }

    #[test]
    fn should_give_kinematic_body_infinite_mass_but_keep_velocity() {
        let mut body = RigidBody::kinematic(Position::origin(), Orientation::identity());
        body.set_linear_velocity(vector![1.0, 0.0, 0.0]);
        assert_eq!(body.inv_mass(), 0.0);
        assert_eq!(body.linear_velocity(), vector![1.0, 0.0, 0.0]);
    }

    #[test]
    fn should_rotate_inverse_inertia_into_world_space() {
        let mut body = RigidBody::dynamic(
            Position::origin(),
            Orientation::identity(),
            1.0,
            vector![1.0, 2.0, 4.0],
        );
        body.set_orientation(Orientation::from_axis_angle(
            &Vector3::z_axis(),
            std::f64::consts::FRAC_PI_2,
        ));
        let inv_inertia = body.inverse_world_inertia();
        // A quarter turn about z swaps the x and y principal moments.
        assert_abs_diff_eq!(inv_inertia[(0, 0)], 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(inv_inertia[(1, 1)], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(inv_inertia[(2, 2)], 0.25, epsilon = 1e-12);
    }

    #[test]
    fn should_compute_point_velocity_from_linear_and_angular_motion() {
        let mut body = unit_cube_body();
        body.set_linear_velocity(vector![1.0, 0.0, 0.0]);
        body.set_angular_velocity(vector![0.0, 0.0, 2.0]);
        let velocity = body.point_velocity(&vector![0.0, 1.0, 0.0]);
        assert_abs_diff_eq!(velocity, vector![-1.0, 0.0, 0.0], epsilon = 1e-12);
    }

    #[test]
    fn should_derive_center_of_mass_from_offset_and_orientation() {
        let body = RigidBody::dynamic(
            point![1.0, 0.0, 0.0],
            Orientation::from_axis_angle(&Vector3::z_axis(), std::f64::consts::FRAC_PI_2),
            1.0,
            vector![1.0, 1.0, 1.0],
        )
        .with_center_of_mass_offset(vector![1.0, 0.0, 0.0]);
        assert_abs_diff_eq!(
            body.center_of_mass_position(),
            point![1.0, 1.0, 0.0],
            epsilon = 1e-12
        );
    }

    #[test]
    fn should_borrow_disjoint_body_pair_mutably() {
        let mut pool = RigidBodyPool::new();
        let a = pool.add(unit_cube_body());
        let b = pool.add(unit_cube_body());
        let (body_a, body_b) = pool.get_pair_mut(b, a);
        body_a.set_linear_velocity(vector![1.0, 0.0, 0.0]);
        body_b.set_linear_velocity(vector![2.0, 0.0, 0.0]);
        assert_eq!(pool.body(b).linear_velocity(), vector![1.0, 0.0, 0.0]);
        assert_eq!(pool.body(a).linear_velocity(), vector![2.0, 0.0, 0.0]);
    }
}
