//! Constraints on rigid bodies.

pub mod contact;
pub mod joint;
pub mod part;
pub mod solver;

use crate::{
    fph,
    quantities::{AngularVelocity, Orientation, Position, Velocity},
    rigid_body::{MotionType, RigidBody, RigidBodyIndex, RigidBodyPool},
};
use keel_containers::KeyIndexMapper;
use nalgebra::{Matrix3, Vector3};

/// The relevant properties and state of a rigid body required for constraint
/// solving. The state is updated iteratively as constraints are being solved
/// and applied back to the rigid body afterwards.
#[derive(Clone, Debug)]
pub struct SolverBody {
    motion_type: MotionType,
    /// Inverse of the body's mass (zero for non-dynamic bodies).
    pub inv_mass: fph,
    /// Inverse of the diagonal of the body's inertia tensor in the body's
    /// local frame (zero for non-dynamic bodies).
    pub inv_inertia_diagonal: Vector3<fph>,
    /// Position of the body's center of mass (world space).
    pub position: Position,
    /// Orientation of the body's reference frame (world space).
    pub orientation: Orientation,
    /// Linear velocity of the body's center of mass (world space).
    pub linear_velocity: Velocity,
    /// Angular velocity of the body about its center of mass (world space).
    pub angular_velocity: AngularVelocity,
    /// Acceleration contributed by gravity and accumulated forces this step,
    /// used when compensating restitution for force-induced approach speed.
    pub force_acceleration: Vector3<fph>,
}

/// The solver-side state of the rigid bodies involved in one island,
/// gathered from the body pool before solving and applied back afterwards.
///
/// Islands are disjoint, so each island's `SolverBodies` can be worked on
/// independently of every other island's.
#[derive(Clone, Debug)]
pub struct SolverBodies {
    bodies: Vec<SolverBody>,
    index_map: KeyIndexMapper<RigidBodyIndex>,
}

impl SolverBody {
    /// Gathers the solver-relevant state from the given rigid body.
    pub fn from_rigid_body(body: &RigidBody, gravity: &Vector3<fph>) -> Self {
        let (inv_mass, inv_inertia_diagonal) = match (body.motion_properties(), body.motion_type())
        {
            (Some(motion), MotionType::Dynamic) => (motion.inv_mass, motion.inv_inertia_diagonal),
            _ => (0.0, Vector3::zeros()),
        };
        Self {
            motion_type: body.motion_type(),
            inv_mass,
            inv_inertia_diagonal,
            position: body.center_of_mass_position(),
            orientation: *body.orientation(),
            linear_velocity: body.linear_velocity(),
            angular_velocity: body.angular_velocity(),
            force_acceleration: body.force_acceleration(gravity),
        }
    }

    pub fn motion_type(&self) -> MotionType {
        self.motion_type
    }

    pub fn is_dynamic(&self) -> bool {
        self.motion_type == MotionType::Dynamic
    }

    /// The body's inverse inertia tensor in world space, derived from the
    /// current orientation.
    pub fn inverse_world_inertia(&self) -> Matrix3<fph> {
        if !self.is_dynamic() {
            return Matrix3::zeros();
        }
        let rotation = self.orientation.to_rotation_matrix();
        rotation.matrix()
            * Matrix3::from_diagonal(&self.inv_inertia_diagonal)
            * rotation.matrix().transpose()
    }

    /// The world space velocity of a point rigidly attached to the body, with
    /// `moment_arm` the displacement from the center of mass to the point.
    pub fn point_velocity(&self, moment_arm: &Vector3<fph>) -> Velocity {
        self.linear_velocity + self.angular_velocity.cross(moment_arm)
    }
}

impl SolverBodies {
    pub fn new() -> Self {
        Self {
            bodies: Vec::new(),
            index_map: KeyIndexMapper::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }

    /// Gathers the state of the body at the given pool index unless it has
    /// already been gathered, and returns its local index.
    pub fn gather(
        &mut self,
        pool: &RigidBodyPool,
        gravity: &Vector3<fph>,
        body_index: RigidBodyIndex,
    ) -> usize {
        if let Some(local_idx) = self.index_map.get(body_index) {
            return local_idx;
        }
        let local_idx = self.bodies.len();
        self.bodies
            .push(SolverBody::from_rigid_body(pool.body(body_index), gravity));
        self.index_map.push_key(body_index);
        local_idx
    }

    /// Returns the local index of a previously gathered body.
    pub fn local_index(&self, body_index: RigidBodyIndex) -> Option<usize> {
        self.index_map.get(body_index)
    }

    pub fn get(&self, local_idx: usize) -> &SolverBody {
        &self.bodies[local_idx]
    }

    pub fn get_mut(&mut self, local_idx: usize) -> &mut SolverBody {
        &mut self.bodies[local_idx]
    }

    /// Returns mutable references to the two bodies at the given local
    /// indices.
    ///
    /// # Panics
    /// If the indices are equal or out of bounds.
    pub fn pair_mut(&mut self, idx_a: usize, idx_b: usize) -> (&mut SolverBody, &mut SolverBody) {
        two_mutable_elements(&mut self.bodies, idx_a, idx_b)
    }

    /// Writes the solved velocities and configurations back to the rigid
    /// bodies they were gathered from. Kinematic and static bodies are left
    /// untouched.
    pub fn apply_to_pool(&self, pool: &mut RigidBodyPool) {
        for (body_index, solver_body) in self.index_map.key_at_each_idx().zip(&self.bodies) {
            if !solver_body.is_dynamic() {
                continue;
            }
            let body = pool.body_mut(body_index);
            // Update the orientation first so that the origin position can be
            // derived from the solved center of mass under the new rotation.
            body.set_orientation(solver_body.orientation);
            let com_delta = solver_body.position - body.center_of_mass_position();
            let new_position = *body.position() + com_delta;
            body.set_position(new_position);
            body.set_linear_velocity(solver_body.linear_velocity);
            body.set_angular_velocity(solver_body.angular_velocity);
        }
    }

    pub fn clear(&mut self) {
        self.bodies.clear();
        self.index_map.clear();
    }
}

impl Default for SolverBodies {
    fn default() -> Self {
        Self::new()
    }
}

fn two_mutable_elements<T>(values: &mut [T], idx_a: usize, idx_b: usize) -> (&mut T, &mut T) {
    assert_ne!(idx_a, idx_b);

    if idx_b > idx_a {
        let (left, right) = values.split_at_mut(idx_b);
        (&mut left[idx_a], &mut right[0])
    } else {
        let (left, right) = values.split_at_mut(idx_a);
        (&mut right[0], &mut left[idx_b])
    }
}
