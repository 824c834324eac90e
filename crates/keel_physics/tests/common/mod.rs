//! Shared scaffolding for the constraint tests: a minimal step loop and
//! analytic contact generation for the shapes the scenarios need, standing
//! in for the engine's (out of scope) integrator and narrow phase.

use keel_physics::{
    constraint::{
        contact::{ContactCache, ContactListener, ContactManifold},
        joint::{JointId, JointSet},
        solver::{ConstraintSolver, Island},
    },
    fph,
    quantities::{self, Position},
    rigid_body::{MotionType, RigidBody, RigidBodyIndex, RigidBodyPool},
    settings::WorldSettings,
};
use nalgebra::{UnitVector3, Vector3, point};

/// Distance below which contact manifolds are generated. Generous enough
/// that speculative contacts catch fast approaches in the scenarios.
const COLLISION_MARGIN: fph = 0.15;

/// The shapes the test scenarios are built from.
#[derive(Clone, Debug)]
pub enum TestShape {
    /// The infinite plane `y = 0` with normal `+y`, ignoring the body's
    /// configuration. Only sensible on static bodies at the origin.
    Plane,
    Sphere {
        radius: fph,
    },
    /// An axis-aligned box given by its half extents, rotated by the body's
    /// orientation.
    Cuboid {
        half_extents: Vector3<fph>,
    },
}

pub struct TestWorld {
    pub bodies: RigidBodyPool,
    pub shapes: Vec<TestShape>,
    pub joints: JointSet,
    pub joint_ids: Vec<JointId>,
    pub cache: ContactCache,
    pub solver: ConstraintSolver,
    pub settings: WorldSettings,
}

impl TestWorld {
    pub fn new() -> Self {
        Self {
            bodies: RigidBodyPool::new(),
            shapes: Vec::new(),
            joints: JointSet::new(),
            joint_ids: Vec::new(),
            cache: ContactCache::new(),
            solver: ConstraintSolver::new(),
            settings: WorldSettings::default(),
        }
    }

    pub fn add_body(&mut self, body: RigidBody, shape: TestShape) -> RigidBodyIndex {
        self.shapes.push(shape);
        self.bodies.add(body)
    }

    pub fn step(&mut self, dt: fph) {
        self.step_with_listener(dt, None);
    }

    pub fn step_with_listener(&mut self, dt: fph, listener: Option<&dyn ContactListener>) {
        // Advance velocities with gravity and accumulated forces.
        let gravity = self.settings.gravity;
        for body in self.bodies.iter_mut() {
            if body.motion_type() == MotionType::Dynamic {
                let acceleration = body.force_acceleration(&gravity);
                let velocity = body.linear_velocity() + acceleration * dt;
                body.set_linear_velocity(velocity);
            }
        }

        let manifolds = self.generate_manifolds();
        let islands = [Island::of(
            0..manifolds.len(),
            self.joint_ids.iter().copied(),
        )];

        self.solver.solve_islands(
            &mut self.bodies,
            &mut self.joints,
            &mut self.cache,
            &manifolds,
            &islands,
            listener,
            &self.settings,
            dt,
        );

        // Advance configurations with the solved velocities.
        for body in self.bodies.iter_mut() {
            if body.motion_type() == MotionType::Static {
                continue;
            }
            let new_position = *body.position() + body.linear_velocity() * dt;
            body.set_position(new_position);
            let new_orientation =
                quantities::advance_orientation(body.orientation(), &body.angular_velocity(), dt);
            body.set_orientation(new_orientation);
        }

        self.cache.prune_stale();
    }

    fn generate_manifolds(&self) -> Vec<ContactManifold> {
        let mut manifolds = Vec::new();
        for index_a in 0..self.bodies.len() {
            for index_b in (index_a + 1)..self.bodies.len() {
                let body_a = self.bodies.body(index_a);
                let body_b = self.bodies.body(index_b);
                if body_a.motion_type() != MotionType::Dynamic
                    && body_b.motion_type() != MotionType::Dynamic
                {
                    continue;
                }
                if let Some(manifold) = collide(
                    index_a,
                    body_a,
                    &self.shapes[index_a],
                    index_b,
                    body_b,
                    &self.shapes[index_b],
                ) {
                    manifolds.push(manifold);
                }
            }
        }
        manifolds
    }
}

fn collide(
    index_a: RigidBodyIndex,
    body_a: &RigidBody,
    shape_a: &TestShape,
    index_b: RigidBodyIndex,
    body_b: &RigidBody,
    shape_b: &TestShape,
) -> Option<ContactManifold> {
    match (shape_a, shape_b) {
        (TestShape::Plane, TestShape::Sphere { radius }) => {
            collide_plane_sphere(index_a, index_b, body_b, *radius)
        }
        (TestShape::Sphere { radius }, TestShape::Plane) => {
            collide_plane_sphere(index_b, index_a, body_a, *radius)
        }
        (TestShape::Plane, TestShape::Cuboid { half_extents }) => {
            collide_plane_cuboid(index_a, index_b, body_b, half_extents)
        }
        (TestShape::Cuboid { half_extents }, TestShape::Plane) => {
            collide_plane_cuboid(index_b, index_a, body_a, half_extents)
        }
        (TestShape::Sphere { radius: radius_a }, TestShape::Sphere { radius: radius_b }) => {
            collide_spheres(index_a, body_a, *radius_a, index_b, body_b, *radius_b)
        }
        _ => None,
    }
}

fn collide_plane_sphere(
    plane_index: RigidBodyIndex,
    sphere_index: RigidBodyIndex,
    sphere_body: &RigidBody,
    radius: fph,
) -> Option<ContactManifold> {
    let center = sphere_body.center_of_mass_position();
    let separation = center.y - radius;
    if separation > COLLISION_MARGIN {
        return None;
    }
    let point_on_sphere = point![center.x, center.y - radius, center.z];
    let point_on_plane = point![center.x, 0.0, center.z];

    let mut manifold = ContactManifold::new(
        plane_index,
        sphere_index,
        UnitVector3::new_unchecked(Vector3::y()),
        point_on_plane,
    );
    manifold.push_point(point_on_plane, point_on_sphere);
    Some(manifold)
}

fn collide_plane_cuboid(
    plane_index: RigidBodyIndex,
    cuboid_index: RigidBodyIndex,
    cuboid_body: &RigidBody,
    half_extents: &Vector3<fph>,
) -> Option<ContactManifold> {
    let center = cuboid_body.center_of_mass_position();
    let orientation = cuboid_body.orientation();

    let mut corners: Vec<Position> = Vec::with_capacity(8);
    for sx in [-1.0, 1.0] {
        for sy in [-1.0, 1.0] {
            for sz in [-1.0, 1.0] {
                let local = Vector3::new(
                    sx * half_extents.x,
                    sy * half_extents.y,
                    sz * half_extents.z,
                );
                corners.push(center + orientation.transform_vector(&local));
            }
        }
    }
    corners.sort_by(|a, b| a.y.total_cmp(&b.y));

    let mut manifold = ContactManifold::new(
        plane_index,
        cuboid_index,
        UnitVector3::new_unchecked(Vector3::y()),
        point![center.x, 0.0, center.z],
    );
    for corner in corners.iter().take(4) {
        if corner.y > COLLISION_MARGIN {
            continue;
        }
        manifold.push_point(point![corner.x, 0.0, corner.z], *corner);
    }
    if manifold.points.is_empty() {
        return None;
    }
    Some(manifold)
}

fn collide_spheres(
    index_a: RigidBodyIndex,
    body_a: &RigidBody,
    radius_a: fph,
    index_b: RigidBodyIndex,
    body_b: &RigidBody,
    radius_b: fph,
) -> Option<ContactManifold> {
    let center_a = body_a.center_of_mass_position();
    let center_b = body_b.center_of_mass_position();
    let delta = center_b - center_a;
    let distance = delta.norm();
    if distance == 0.0 || distance - radius_a - radius_b > COLLISION_MARGIN {
        return None;
    }
    let normal = UnitVector3::new_normalize(delta);
    let point_on_a = center_a + normal.into_inner() * radius_a;
    let point_on_b = center_b - normal.into_inner() * radius_b;

    let mut manifold = ContactManifold::new(index_a, index_b, normal, point_on_a);
    manifold.push_point(point_on_a, point_on_b);
    Some(manifold)
}
