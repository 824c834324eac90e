//! Joint constraints between rigid bodies.
//!
//! Joints are stored in one pool per joint type. A pool is a contiguous
//! vector of slots with a free-index stack; each slot carries a monotonic
//! sequence counter so that handles to removed joints are rejected instead
//! of aliasing a reused slot.

pub mod distance;
pub mod hinge;
pub mod six_dof;
pub mod swing_twist;

use crate::{
    constraint::{SolverBodies, part::spring::SpringSettings},
    fph,
    rigid_body::{RigidBodyIndex, RigidBodyPool},
};
use bytemuck::{Pod, Zeroable};
use distance::{DistanceJoint, DistanceJointSettings};
use hinge::{HingeJoint, HingeJointSettings};
use nalgebra::Vector3;
use six_dof::{SixDofJoint, SixDofJointSettings};
use swing_twist::{SwingTwistJoint, SwingTwistJointSettings};

/// The type of a joint constraint.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum JointType {
    Distance,
    Hinge,
    SwingTwist,
    SixDof,
}

/// Handle to a joint: the joint type, the slot index in the type's pool and
/// the slot's sequence number at creation, packed into 64 bits. A lookup
/// with a stale sequence returns "not found" rather than the joint that
/// reused the slot.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Zeroable, Pod)]
pub struct JointId(u64);

impl JointId {
    fn new(joint_type: JointType, index: u32, sequence: u16) -> Self {
        let tag = match joint_type {
            JointType::Distance => 0u64,
            JointType::Hinge => 1,
            JointType::SwingTwist => 2,
            JointType::SixDof => 3,
        };
        Self((tag << 48) | (u64::from(index) << 16) | u64::from(sequence))
    }

    pub fn joint_type(&self) -> JointType {
        match self.0 >> 48 {
            0 => JointType::Distance,
            1 => JointType::Hinge,
            2 => JointType::SwingTwist,
            _ => JointType::SixDof,
        }
    }

    pub fn index(&self) -> u32 {
        ((self.0 >> 16) & 0xFFFF_FFFF) as u32
    }

    pub fn sequence(&self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }

    /// A handle that never resolves to a joint.
    pub fn invalid() -> Self {
        Self(u64::MAX)
    }
}

/// State shared by all joint types.
#[derive(Clone, Debug)]
pub struct JointHeader {
    pub id: JointId,
    pub body_a: RigidBodyIndex,
    pub body_b: RigidBodyIndex,
    /// Joints with higher priority are solved earlier within an island.
    pub priority: u32,
    /// Overrides the world's velocity iteration count when non-zero.
    pub num_velocity_steps_override: u32,
    /// Overrides the world's position iteration count when non-zero.
    pub num_position_steps_override: u32,
    pub enabled: bool,
}

impl JointHeader {
    fn new(body_a: RigidBodyIndex, body_b: RigidBodyIndex) -> Self {
        Self {
            id: JointId::invalid(),
            body_a,
            body_b,
            priority: 0,
            num_velocity_steps_override: 0,
            num_position_steps_override: 0,
            enabled: true,
        }
    }
}

/// How a joint motor operates.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum MotorState {
    /// The motor is off; if a friction limit is configured it resists
    /// relative motion along its axis.
    #[default]
    Off,
    /// The motor drives toward a target velocity.
    Velocity,
    /// The motor drives toward a target position or angle through a spring.
    Position,
}

/// Configuration of a joint motor: the spring used in position mode and the
/// force (or torque) range the motor may exert.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct MotorSettings {
    pub spring: SpringSettings,
    pub min_force: fph,
    pub max_force: fph,
}

impl MotorSettings {
    /// The impulse range corresponding to the force range over one step.
    pub(crate) fn lambda_bounds(&self, dt: fph) -> (fph, fph) {
        (self.min_force * dt, self.max_force * dt)
    }
}

impl Default for MotorSettings {
    fn default() -> Self {
        Self {
            spring: SpringSettings::FrequencyAndDamping {
                frequency: 20.0,
                damping: 1.0,
            },
            min_force: fph::NEG_INFINITY,
            max_force: fph::INFINITY,
        }
    }
}

struct JointSlot<T> {
    record: Option<T>,
    sequence: u16,
}

/// Pool of joints of one type: contiguous slots plus a free-index stack.
struct JointPool<T> {
    slots: Vec<JointSlot<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> JointPool<T> {
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    fn len(&self) -> usize {
        self.len
    }

    fn insert(&mut self, record: T) -> (u32, u16) {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.record = Some(record);
            (index, slot.sequence)
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(JointSlot {
                record: Some(record),
                sequence: 0,
            });
            (index, 0)
        }
    }

    fn get(&self, index: u32, sequence: u16) -> Option<&T> {
        let slot = self.slots.get(index as usize)?;
        if slot.sequence != sequence {
            return None;
        }
        slot.record.as_ref()
    }

    fn get_mut(&mut self, index: u32, sequence: u16) -> Option<&mut T> {
        let slot = self.slots.get_mut(index as usize)?;
        if slot.sequence != sequence {
            return None;
        }
        slot.record.as_mut()
    }

    /// Removes the record, bumps the slot's sequence so stale handles miss,
    /// and recycles the slot.
    fn remove(&mut self, index: u32, sequence: u16) -> Option<T> {
        let slot = self.slots.get_mut(index as usize)?;
        if slot.sequence != sequence || slot.record.is_none() {
            return None;
        }
        let record = slot.record.take();
        slot.sequence = slot.sequence.wrapping_add(1);
        self.free.push(index);
        self.len -= 1;
        record
    }
}

/// A joint record of any type, used when an island's joints are extracted
/// for solving and written back afterwards. Dispatch is a plain `match`;
/// there are no trait objects and no per-call allocation.
#[derive(Clone, Debug)]
pub enum AnyJoint {
    Distance(DistanceJoint),
    Hinge(HingeJoint),
    SwingTwist(SwingTwistJoint),
    SixDof(SixDofJoint),
}

impl AnyJoint {
    pub fn header(&self) -> &JointHeader {
        match self {
            Self::Distance(joint) => joint.header(),
            Self::Hinge(joint) => joint.header(),
            Self::SwingTwist(joint) => joint.header(),
            Self::SixDof(joint) => joint.header(),
        }
    }

    /// Gathers the joint's bodies and precomputes the step's constraint
    /// state.
    pub fn setup_velocity(
        &mut self,
        pool: &RigidBodyPool,
        bodies: &mut SolverBodies,
        gravity: &Vector3<fph>,
        dt: fph,
    ) {
        match self {
            Self::Distance(joint) => joint.setup_velocity(pool, bodies, gravity, dt),
            Self::Hinge(joint) => joint.setup_velocity(pool, bodies, gravity, dt),
            Self::SwingTwist(joint) => joint.setup_velocity(pool, bodies, gravity, dt),
            Self::SixDof(joint) => joint.setup_velocity(pool, bodies, gravity, dt),
        }
    }

    /// Applies the accumulated impulses from the previous step.
    pub fn warm_start_velocity(&mut self, bodies: &mut SolverBodies, warm_start_ratio: fph) {
        match self {
            Self::Distance(joint) => joint.warm_start_velocity(bodies, warm_start_ratio),
            Self::Hinge(joint) => joint.warm_start_velocity(bodies, warm_start_ratio),
            Self::SwingTwist(joint) => joint.warm_start_velocity(bodies, warm_start_ratio),
            Self::SixDof(joint) => joint.warm_start_velocity(bodies, warm_start_ratio),
        }
    }

    /// Performs one velocity iteration. Returns whether any impulse was
    /// applied.
    pub fn solve_velocity(&mut self, bodies: &mut SolverBodies, dt: fph) -> bool {
        match self {
            Self::Distance(joint) => joint.solve_velocity(bodies, dt),
            Self::Hinge(joint) => joint.solve_velocity(bodies, dt),
            Self::SwingTwist(joint) => joint.solve_velocity(bodies, dt),
            Self::SixDof(joint) => joint.solve_velocity(bodies, dt),
        }
    }

    /// Performs one positional correction iteration. Returns whether any
    /// correction was applied.
    pub fn solve_position(&mut self, bodies: &mut SolverBodies, dt: fph, baumgarte: fph) -> bool {
        match self {
            Self::Distance(joint) => joint.solve_position(bodies, dt, baumgarte),
            Self::Hinge(joint) => joint.solve_position(bodies, dt, baumgarte),
            Self::SwingTwist(joint) => joint.solve_position(bodies, dt, baumgarte),
            Self::SixDof(joint) => joint.solve_position(bodies, dt, baumgarte),
        }
    }

    /// Clears all accumulated impulses.
    pub fn reset_warm_start(&mut self) {
        match self {
            Self::Distance(joint) => joint.reset_warm_start(),
            Self::Hinge(joint) => joint.reset_warm_start(),
            Self::SwingTwist(joint) => joint.reset_warm_start(),
            Self::SixDof(joint) => joint.reset_warm_start(),
        }
    }
}

/// Owns all joints in the simulation, one pool per joint type.
pub struct JointSet {
    distance: JointPool<DistanceJoint>,
    hinge: JointPool<HingeJoint>,
    swing_twist: JointPool<SwingTwistJoint>,
    six_dof: JointPool<SixDofJoint>,
}

impl JointSet {
    pub fn new() -> Self {
        Self {
            distance: JointPool::new(),
            hinge: JointPool::new(),
            swing_twist: JointPool::new(),
            six_dof: JointPool::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.distance.len() + self.hinge.len() + self.swing_twist.len() + self.six_dof.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Creates a distance joint and registers it on both bodies.
    pub fn create_distance(
        &mut self,
        pool: &mut RigidBodyPool,
        settings: DistanceJointSettings,
    ) -> JointId {
        let joint = DistanceJoint::new(settings);
        let (body_a, body_b) = (joint.header().body_a, joint.header().body_b);
        let (index, sequence) = self.distance.insert(joint);
        let id = JointId::new(JointType::Distance, index, sequence);
        self.distance.get_mut(index, sequence).unwrap().header_mut().id = id;
        register_joint(pool, body_a, body_b, id);
        id
    }

    /// Creates a hinge joint and registers it on both bodies.
    pub fn create_hinge(
        &mut self,
        pool: &mut RigidBodyPool,
        settings: HingeJointSettings,
    ) -> JointId {
        let joint = HingeJoint::new(pool, settings);
        let (body_a, body_b) = (joint.header().body_a, joint.header().body_b);
        let (index, sequence) = self.hinge.insert(joint);
        let id = JointId::new(JointType::Hinge, index, sequence);
        self.hinge.get_mut(index, sequence).unwrap().header_mut().id = id;
        register_joint(pool, body_a, body_b, id);
        id
    }

    /// Creates a swing-twist joint and registers it on both bodies.
    pub fn create_swing_twist(
        &mut self,
        pool: &mut RigidBodyPool,
        settings: SwingTwistJointSettings,
    ) -> JointId {
        let joint = SwingTwistJoint::new(settings);
        let (body_a, body_b) = (joint.header().body_a, joint.header().body_b);
        let (index, sequence) = self.swing_twist.insert(joint);
        let id = JointId::new(JointType::SwingTwist, index, sequence);
        self.swing_twist
            .get_mut(index, sequence)
            .unwrap()
            .header_mut()
            .id = id;
        register_joint(pool, body_a, body_b, id);
        id
    }

    /// Creates a 6-DOF joint and registers it on both bodies.
    pub fn create_six_dof(
        &mut self,
        pool: &mut RigidBodyPool,
        settings: SixDofJointSettings,
    ) -> JointId {
        let joint = SixDofJoint::new(pool, settings);
        let (body_a, body_b) = (joint.header().body_a, joint.header().body_b);
        let (index, sequence) = self.six_dof.insert(joint);
        let id = JointId::new(JointType::SixDof, index, sequence);
        self.six_dof.get_mut(index, sequence).unwrap().header_mut().id = id;
        register_joint(pool, body_a, body_b, id);
        id
    }

    pub fn get_distance(&self, id: JointId) -> Option<&DistanceJoint> {
        (id.joint_type() == JointType::Distance)
            .then(|| self.distance.get(id.index(), id.sequence()))
            .flatten()
    }

    pub fn get_distance_mut(&mut self, id: JointId) -> Option<&mut DistanceJoint> {
        (id.joint_type() == JointType::Distance)
            .then(|| self.distance.get_mut(id.index(), id.sequence()))
            .flatten()
    }

    pub fn get_hinge(&self, id: JointId) -> Option<&HingeJoint> {
        (id.joint_type() == JointType::Hinge)
            .then(|| self.hinge.get(id.index(), id.sequence()))
            .flatten()
    }

    pub fn get_hinge_mut(&mut self, id: JointId) -> Option<&mut HingeJoint> {
        (id.joint_type() == JointType::Hinge)
            .then(|| self.hinge.get_mut(id.index(), id.sequence()))
            .flatten()
    }

    pub fn get_swing_twist(&self, id: JointId) -> Option<&SwingTwistJoint> {
        (id.joint_type() == JointType::SwingTwist)
            .then(|| self.swing_twist.get(id.index(), id.sequence()))
            .flatten()
    }

    pub fn get_swing_twist_mut(&mut self, id: JointId) -> Option<&mut SwingTwistJoint> {
        (id.joint_type() == JointType::SwingTwist)
            .then(|| self.swing_twist.get_mut(id.index(), id.sequence()))
            .flatten()
    }

    pub fn get_six_dof(&self, id: JointId) -> Option<&SixDofJoint> {
        (id.joint_type() == JointType::SixDof)
            .then(|| self.six_dof.get(id.index(), id.sequence()))
            .flatten()
    }

    pub fn get_six_dof_mut(&mut self, id: JointId) -> Option<&mut SixDofJoint> {
        (id.joint_type() == JointType::SixDof)
            .then(|| self.six_dof.get_mut(id.index(), id.sequence()))
            .flatten()
    }

    /// Whether the given handle refers to a live joint.
    pub fn contains(&self, id: JointId) -> bool {
        match id.joint_type() {
            JointType::Distance => self.distance.get(id.index(), id.sequence()).is_some(),
            JointType::Hinge => self.hinge.get(id.index(), id.sequence()).is_some(),
            JointType::SwingTwist => self.swing_twist.get(id.index(), id.sequence()).is_some(),
            JointType::SixDof => self.six_dof.get(id.index(), id.sequence()).is_some(),
        }
    }

    /// Clears the accumulated impulses of the joint with the given handle so
    /// its next solve starts cold. Stale handles are ignored.
    pub fn reset_warm_start(&mut self, id: JointId) {
        match id.joint_type() {
            JointType::Distance => {
                if let Some(joint) = self.distance.get_mut(id.index(), id.sequence()) {
                    joint.reset_warm_start();
                }
            }
            JointType::Hinge => {
                if let Some(joint) = self.hinge.get_mut(id.index(), id.sequence()) {
                    joint.reset_warm_start();
                }
            }
            JointType::SwingTwist => {
                if let Some(joint) = self.swing_twist.get_mut(id.index(), id.sequence()) {
                    joint.reset_warm_start();
                }
            }
            JointType::SixDof => {
                if let Some(joint) = self.six_dof.get_mut(id.index(), id.sequence()) {
                    joint.reset_warm_start();
                }
            }
        }
    }

    /// Removes the joint with the given handle, clearing the bodies' back
    /// references and recycling the slot. Returns whether a joint was
    /// removed; stale handles are rejected.
    pub fn remove(&mut self, pool: &mut RigidBodyPool, id: JointId) -> bool {
        let header = match id.joint_type() {
            JointType::Distance => self
                .distance
                .remove(id.index(), id.sequence())
                .map(|joint| joint.header().clone()),
            JointType::Hinge => self
                .hinge
                .remove(id.index(), id.sequence())
                .map(|joint| joint.header().clone()),
            JointType::SwingTwist => self
                .swing_twist
                .remove(id.index(), id.sequence())
                .map(|joint| joint.header().clone()),
            JointType::SixDof => self
                .six_dof
                .remove(id.index(), id.sequence())
                .map(|joint| joint.header().clone()),
        };
        match header {
            Some(header) => {
                if let Some(body) = pool.get_mut(header.body_a) {
                    body.remove_constraint_id(id);
                }
                if let Some(body) = pool.get_mut(header.body_b) {
                    body.remove_constraint_id(id);
                }
                true
            }
            None => false,
        }
    }

    /// Clones the joint record behind the handle for island-local solving.
    pub(crate) fn extract(&self, id: JointId) -> Option<AnyJoint> {
        match id.joint_type() {
            JointType::Distance => self
                .distance
                .get(id.index(), id.sequence())
                .cloned()
                .map(AnyJoint::Distance),
            JointType::Hinge => self
                .hinge
                .get(id.index(), id.sequence())
                .cloned()
                .map(AnyJoint::Hinge),
            JointType::SwingTwist => self
                .swing_twist
                .get(id.index(), id.sequence())
                .cloned()
                .map(AnyJoint::SwingTwist),
            JointType::SixDof => self
                .six_dof
                .get(id.index(), id.sequence())
                .cloned()
                .map(AnyJoint::SixDof),
        }
    }

    /// Writes a solved joint record back into its pool slot. Records whose
    /// joint was removed mid-step are dropped.
    pub(crate) fn store(&mut self, id: JointId, joint: AnyJoint) {
        match joint {
            AnyJoint::Distance(joint) => {
                if let Some(slot) = self.distance.get_mut(id.index(), id.sequence()) {
                    *slot = joint;
                }
            }
            AnyJoint::Hinge(joint) => {
                if let Some(slot) = self.hinge.get_mut(id.index(), id.sequence()) {
                    *slot = joint;
                }
            }
            AnyJoint::SwingTwist(joint) => {
                if let Some(slot) = self.swing_twist.get_mut(id.index(), id.sequence()) {
                    *slot = joint;
                }
            }
            AnyJoint::SixDof(joint) => {
                if let Some(slot) = self.six_dof.get_mut(id.index(), id.sequence()) {
                    *slot = joint;
                }
            }
        }
    }
}

impl Default for JointSet {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for JointSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JointSet")
            .field("distance", &self.distance.len())
            .field("hinge", &self.hinge.len())
            .field("swing_twist", &self.swing_twist.len())
            .field("six_dof", &self.six_dof.len())
            .finish()
    }
}

fn register_joint(
    pool: &mut RigidBodyPool,
    body_a: RigidBodyIndex,
    body_b: RigidBodyIndex,
    id: JointId,
) {
    if let Some(body) = pool.get_mut(body_a) {
        body.add_constraint_id(id);
    }
    if let Some(body) = pool.get_mut(body_b) {
        body.add_constraint_id(id);
    }
}

/// Wraps an angle difference into `(−π, π]`.
pub(crate) fn centered_angle(angle: fph) -> fph {
    use std::f64::consts::{PI, TAU};
    let wrapped = angle.rem_euclid(TAU);
    if wrapped > PI { wrapped - TAU } else { wrapped }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joint_id_should_round_trip_its_fields() {
        let id = JointId::new(JointType::SwingTwist, 123_456, 789);
        assert_eq!(id.joint_type(), JointType::SwingTwist);
        assert_eq!(id.index(), 123_456);
        assert_eq!(id.sequence(), 789);
    }

    #[test]
    fn pool_should_reject_stale_handles_after_removal() {
        let mut pool = JointPool::new();
        let (index, sequence) = pool.insert("first");
        assert_eq!(pool.get(index, sequence), Some(&"first"));

        assert_eq!(pool.remove(index, sequence), Some("first"));
        assert_eq!(pool.get(index, sequence), None);

        // The slot is reused with a bumped sequence: the old handle still
        // misses while the new one resolves.
        let (new_index, new_sequence) = pool.insert("second");
        assert_eq!(new_index, index);
        assert_ne!(new_sequence, sequence);
        assert_eq!(pool.get(index, sequence), None);
        assert_eq!(pool.get(new_index, new_sequence), Some(&"second"));
    }

    #[test]
    fn pool_should_reject_double_removal() {
        let mut pool = JointPool::new();
        let (index, sequence) = pool.insert(1);
        assert_eq!(pool.remove(index, sequence), Some(1));
        assert_eq!(pool.remove(index, sequence), None);
        assert_eq!(pool.len(), 0);
    }

    #[test]
    fn centered_angle_should_wrap_into_half_open_interval() {
        use std::f64::consts::PI;
        approx::assert_abs_diff_eq!(centered_angle(3.0 * PI), PI, epsilon = 1e-12);
        approx::assert_abs_diff_eq!(centered_angle(-0.5 * PI), -0.5 * PI, epsilon = 1e-12);
        approx::assert_abs_diff_eq!(centered_angle(2.5 * PI), 0.5 * PI, epsilon = 1e-12);
    }
}
