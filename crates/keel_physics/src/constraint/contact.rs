//! Contact (collision) constraints.
//!
//! Converts the contact manifolds produced by narrow phase collision
//! detection into solver constraints: one push-only part along the contact
//! normal and two friction parts along the surface tangents per contact
//! point. Accumulated impulses are cached per body pair and sub-shape pair
//! across frames and used to warm start the solver.

use super::{SolverBodies, part::axis::AxisConstraintPart};
use crate::{
    fph,
    quantities::Position,
    rigid_body::{RigidBody, RigidBodyIndex, RigidBodyPool},
    settings::{SolverConfig, WorldSettings},
};
use bitflags::bitflags;
use keel_containers::KeyIndexMapper;
use nalgebra::{UnitVector3, Vector3, vector};
use tinyvec::TinyVec;

/// Identifier of a sub-shape within a body's (compound) shape.
pub type SubShapeId = u32;

/// A pair of contact points between two bodies, one on the surface of each
/// body, expressed relative to the manifold's base offset.
#[derive(Copy, Clone, Debug)]
pub struct ManifoldPoint {
    pub relative_position_a: Vector3<fph>,
    pub relative_position_b: Vector3<fph>,
}

/// A set of up to four contact points representing the region where two
/// bodies touch, as produced by narrow phase collision detection.
#[derive(Clone, Debug)]
pub struct ContactManifold {
    pub body_a: RigidBodyIndex,
    pub body_b: RigidBodyIndex,
    pub sub_shape_id_a: SubShapeId,
    pub sub_shape_id_b: SubShapeId,
    /// World space contact normal, pointing from body A toward body B.
    pub world_space_normal: UnitVector3<fph>,
    /// Common world space offset of the contact points, kept separate so
    /// the relative positions stay small.
    pub base_offset: Position,
    pub points: TinyVec<[ManifoldPoint; 4]>,
}

/// Per-contact parameters derived from the body materials, adjustable by a
/// [`ContactListener`] before the solver constraint is built.
#[derive(Clone, Debug)]
pub struct ContactSettings {
    pub combined_friction: fph,
    pub combined_restitution: fph,
    /// When set, no solver constraint is created for the contact; the
    /// contact is still cached so enter/persist callbacks keep firing.
    pub is_sensor: bool,
    pub inv_mass_scale_a: fph,
    pub inv_inertia_scale_a: fph,
    pub inv_mass_scale_b: fph,
    pub inv_inertia_scale_b: fph,
    /// Velocity of body A's surface relative to body B's surface at the
    /// contact, for conveyor-belt-like effects.
    pub relative_linear_surface_velocity: Vector3<fph>,
    /// Angular velocity of body A's surface relative to body B's surface.
    pub relative_angular_surface_velocity: Vector3<fph>,
}

/// Callbacks fired while contact constraints are being built, before the
/// constraint is constructed, so that mutations of the passed
/// [`ContactSettings`] take effect for the current step.
pub trait ContactListener {
    /// A contact between a new body pair / sub-shape pair was detected.
    fn on_contact_added(
        &self,
        _body_a: &RigidBody,
        _body_b: &RigidBody,
        _manifold: &ContactManifold,
        _settings: &mut ContactSettings,
    ) {
    }

    /// A contact known from a previous step is still present.
    fn on_contact_persisted(
        &self,
        _body_a: &RigidBody,
        _body_b: &RigidBody,
        _manifold: &ContactManifold,
        _settings: &mut ContactSettings,
    ) {
    }
}

/// Key identifying a cached contact: the canonicalized body pair plus the
/// sub-shape pair.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ContactPairKey {
    pub body_a: RigidBodyIndex,
    pub body_b: RigidBodyIndex,
    pub sub_shape_id_a: SubShapeId,
    pub sub_shape_id_b: SubShapeId,
}

/// A contact point surviving in the cache between steps: the body-local
/// positions used for matching plus the accumulated impulses of the last
/// solve.
#[derive(Copy, Clone, Debug)]
pub struct CachedContactPoint {
    pub local_position_a: Vector3<fph>,
    pub local_position_b: Vector3<fph>,
    pub normal_lambda: fph,
    pub tangent_lambda: fph,
    pub bitangent_lambda: fph,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct CachedContactFlags: u8 {
        /// Whether this contact was seen in the current step.
        const MARKED = 1 << 0;
    }
}

/// The cached state of the contact between one body pair / sub-shape pair.
#[derive(Clone, Debug)]
pub struct CachedContact {
    points: TinyVec<[CachedContactPoint; 4]>,
    flags: CachedContactFlags,
}

/// Persistent store of [`CachedContact`]s, keyed by body pair and sub-shape
/// pair. Entries are marked when touched during constraint building;
/// [`ContactCache::prune_stale`] removes the ones that were not.
#[derive(Clone, Debug)]
pub struct ContactCache {
    contacts: Vec<CachedContact>,
    contact_index_map: KeyIndexMapper<ContactPairKey>,
}

/// One solver-ready contact point: world and body-local positions plus the
/// normal and friction constraint parts.
#[derive(Clone, Debug)]
pub struct ContactPoint {
    local_position_a: Vector3<fph>,
    local_position_b: Vector3<fph>,
    normal_part: AxisConstraintPart,
    tangent_part: AxisConstraintPart,
    bitangent_part: AxisConstraintPart,
}

/// A solver constraint for the contact between two bodies, with up to four
/// contact points sharing one normal and tangent basis.
#[derive(Clone, Debug)]
pub struct ContactConstraint {
    body_a: RigidBodyIndex,
    body_b: RigidBodyIndex,
    local_body_a: usize,
    local_body_b: usize,
    cache_key: ContactPairKey,
    sort_key: u64,
    normal: Vector3<fph>,
    tangent: Vector3<fph>,
    bitangent: Vector3<fph>,
    friction: fph,
    inv_mass_a: fph,
    inv_mass_b: fph,
    inv_inertia_scale_a: fph,
    inv_inertia_scale_b: fph,
    points: TinyVec<[ContactPoint; 4]>,
}

/// The contact constraints of one island, rebuilt from the manifolds every
/// step. The backing storage is reused across steps.
#[derive(Clone, Debug, Default)]
pub struct ContactConstraintSet {
    constraints: Vec<ContactConstraint>,
}

impl Default for ManifoldPoint {
    fn default() -> Self {
        Self {
            relative_position_a: Vector3::zeros(),
            relative_position_b: Vector3::zeros(),
        }
    }
}

impl ContactManifold {
    pub fn new(
        body_a: RigidBodyIndex,
        body_b: RigidBodyIndex,
        world_space_normal: UnitVector3<fph>,
        base_offset: Position,
    ) -> Self {
        Self {
            body_a,
            body_b,
            sub_shape_id_a: 0,
            sub_shape_id_b: 0,
            world_space_normal,
            base_offset,
            points: TinyVec::new(),
        }
    }

    pub fn with_sub_shapes(mut self, sub_shape_id_a: SubShapeId, sub_shape_id_b: SubShapeId) -> Self {
        self.sub_shape_id_a = sub_shape_id_a;
        self.sub_shape_id_b = sub_shape_id_b;
        self
    }

    /// Adds a contact point given by the world space positions of the
    /// touching points on each body's surface.
    pub fn push_point(&mut self, position_on_a: Position, position_on_b: Position) {
        self.points.push(ManifoldPoint {
            relative_position_a: position_on_a - self.base_offset,
            relative_position_b: position_on_b - self.base_offset,
        });
    }

    /// Returns the manifold with the roles of body A and B exchanged: ids
    /// and points swapped and the normal flipped.
    fn swapped(&self) -> Self {
        Self {
            body_a: self.body_b,
            body_b: self.body_a,
            sub_shape_id_a: self.sub_shape_id_b,
            sub_shape_id_b: self.sub_shape_id_a,
            world_space_normal: UnitVector3::new_unchecked(-self.world_space_normal.into_inner()),
            base_offset: self.base_offset,
            points: self
                .points
                .iter()
                .map(|point| ManifoldPoint {
                    relative_position_a: point.relative_position_b,
                    relative_position_b: point.relative_position_a,
                })
                .collect(),
        }
    }
}

impl ContactSettings {
    fn for_bodies(body_a: &RigidBody, body_b: &RigidBody) -> Self {
        Self {
            combined_friction: body_a.material().combined_friction(body_b.material()),
            combined_restitution: body_a.material().combined_restitution(body_b.material()),
            is_sensor: body_a.is_sensor() || body_b.is_sensor(),
            inv_mass_scale_a: 1.0,
            inv_inertia_scale_a: 1.0,
            inv_mass_scale_b: 1.0,
            inv_inertia_scale_b: 1.0,
            relative_linear_surface_velocity: Vector3::zeros(),
            relative_angular_surface_velocity: Vector3::zeros(),
        }
    }
}

impl Default for CachedContactPoint {
    fn default() -> Self {
        Self {
            local_position_a: Vector3::zeros(),
            local_position_b: Vector3::zeros(),
            normal_lambda: 0.0,
            tangent_lambda: 0.0,
            bitangent_lambda: 0.0,
        }
    }
}

impl CachedContact {
    fn new() -> Self {
        Self {
            points: TinyVec::new(),
            flags: CachedContactFlags::MARKED,
        }
    }

    pub fn points(&self) -> &[CachedContactPoint] {
        self.points.as_slice()
    }

    /// Finds the cached impulses for a point whose body-local positions on
    /// both bodies lie within the given squared distance of the cached
    /// ones.
    fn matching_lambdas(
        &self,
        local_position_a: &Vector3<fph>,
        local_position_b: &Vector3<fph>,
        max_dist_sq: fph,
    ) -> Option<(fph, fph, fph)> {
        self.points
            .iter()
            .find(|point| {
                (point.local_position_a - local_position_a).norm_squared() <= max_dist_sq
                    && (point.local_position_b - local_position_b).norm_squared() <= max_dist_sq
            })
            .map(|point| {
                (
                    point.normal_lambda,
                    point.tangent_lambda,
                    point.bitangent_lambda,
                )
            })
    }
}

impl ContactCache {
    pub fn new() -> Self {
        Self {
            contacts: Vec::new(),
            contact_index_map: KeyIndexMapper::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    pub fn get(&self, key: ContactPairKey) -> Option<&CachedContact> {
        let idx = self.contact_index_map.get(key)?;
        Some(&self.contacts[idx])
    }

    /// Returns the cached contact for the given key, creating an empty one
    /// if the pair is new, and marks it as seen this step. The boolean is
    /// `true` when the contact already existed.
    fn get_or_insert_marked(&mut self, key: ContactPairKey) -> (&mut CachedContact, bool) {
        if let Some(idx) = self.contact_index_map.get(key) {
            let contact = &mut self.contacts[idx];
            contact.flags.insert(CachedContactFlags::MARKED);
            (contact, true)
        } else {
            self.contact_index_map.push_key(key);
            self.contacts.push(CachedContact::new());
            (self.contacts.last_mut().unwrap(), false)
        }
    }

    /// Removes all cached contacts that were not marked since the previous
    /// pruning and clears the marks. Call once per step after solving.
    pub fn prune_stale(&mut self) {
        let mut idx = 0;
        let mut len = self.contacts.len();
        while idx < len {
            let contact = &mut self.contacts[idx];
            if contact.flags.contains(CachedContactFlags::MARKED) {
                contact.flags.remove(CachedContactFlags::MARKED);
                idx += 1;
            } else {
                self.contacts.swap_remove(idx);
                self.contact_index_map.swap_remove_key_at_idx(idx);
                len -= 1;
            }
        }
    }

    pub fn clear(&mut self) {
        self.contacts.clear();
        self.contact_index_map.clear();
    }
}

impl Default for ContactCache {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for ContactPoint {
    fn default() -> Self {
        Self {
            local_position_a: Vector3::zeros(),
            local_position_b: Vector3::zeros(),
            normal_part: AxisConstraintPart::default(),
            tangent_part: AxisConstraintPart::default(),
            bitangent_part: AxisConstraintPart::default(),
        }
    }
}

impl ContactConstraint {
    pub fn body_a(&self) -> RigidBodyIndex {
        self.body_a
    }

    pub fn body_b(&self) -> RigidBodyIndex {
        self.body_b
    }

    pub fn sort_key(&self) -> u64 {
        self.sort_key
    }

    /// The accumulated normal impulses of the contact points.
    pub fn normal_lambdas(&self) -> impl Iterator<Item = fph> + '_ {
        self.points.iter().map(|point| point.normal_part.total_lambda())
    }

    /// The accumulated friction impulses of the contact points as
    /// (tangent, bitangent) pairs.
    pub fn friction_lambdas(&self) -> impl Iterator<Item = (fph, fph)> + '_ {
        self.points.iter().map(|point| {
            (
                point.tangent_part.total_lambda(),
                point.bitangent_part.total_lambda(),
            )
        })
    }

    pub fn friction(&self) -> fph {
        self.friction
    }
}

impl ContactConstraintSet {
    pub fn new() -> Self {
        Self {
            constraints: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    pub fn constraints(&self) -> &[ContactConstraint] {
        &self.constraints
    }

    /// Discards the constraints of the previous step, keeping the backing
    /// storage.
    pub fn clear(&mut self) {
        self.constraints.clear();
    }

    /// Builds a solver constraint from the given manifold.
    ///
    /// The states of the involved bodies are gathered into `bodies` if not
    /// already present. The persistent cache entry for the pair is created
    /// or updated and the listener callbacks are fired. Returns `true` when
    /// a solver constraint was created; sensors and pairs without dynamic
    /// mass only update the cache and return `false`.
    pub fn add_constraint(
        &mut self,
        pool: &RigidBodyPool,
        bodies: &mut SolverBodies,
        cache: &mut ContactCache,
        manifold: &ContactManifold,
        listener: Option<&dyn ContactListener>,
        settings: &WorldSettings,
        dt: fph,
    ) -> bool {
        // Canonicalize the body order on a copy so the caller's manifold is
        // left untouched.
        let manifold = if manifold.body_b < manifold.body_a {
            manifold.swapped()
        } else {
            manifold.clone()
        };

        let body_a = pool.body(manifold.body_a);
        let body_b = pool.body(manifold.body_b);

        let key = ContactPairKey {
            body_a: manifold.body_a,
            body_b: manifold.body_b,
            sub_shape_id_a: manifold.sub_shape_id_a,
            sub_shape_id_b: manifold.sub_shape_id_b,
        };
        let existed = {
            let (_, existed) = cache.get_or_insert_marked(key);
            existed
        };

        let mut contact_settings = ContactSettings::for_bodies(body_a, body_b);
        if let Some(listener) = listener {
            if existed {
                listener.on_contact_persisted(body_a, body_b, &manifold, &mut contact_settings);
            } else {
                listener.on_contact_added(body_a, body_b, &manifold, &mut contact_settings);
            }
        }

        let com_a = body_a.center_of_mass_position();
        let com_b = body_b.center_of_mass_position();
        let orientation_a = *body_a.orientation();
        let orientation_b = *body_b.orientation();

        let has_dynamic_mass = |body: &RigidBody| {
            body.is_dynamic()
                && body.motion_properties().is_some_and(|motion| {
                    motion.inv_mass > 0.0 || motion.inv_inertia_diagonal != Vector3::zeros()
                })
        };

        if contact_settings.is_sensor || !(has_dynamic_mass(body_a) || has_dynamic_mass(body_b)) {
            // No solver constraint, but the contact points are still cached
            // (with zero impulses) so that enter/persist detection keeps
            // working while the pair stays in contact.
            let (cached, _) = cache.get_or_insert_marked(key);
            cached.points.clear();
            for point in &manifold.points {
                let world_a = manifold.base_offset + point.relative_position_a;
                let world_b = manifold.base_offset + point.relative_position_b;
                cached.points.push(CachedContactPoint {
                    local_position_a: orientation_a.inverse_transform_vector(&(world_a - com_a)),
                    local_position_b: orientation_b.inverse_transform_vector(&(world_b - com_b)),
                    normal_lambda: 0.0,
                    tangent_lambda: 0.0,
                    bitangent_lambda: 0.0,
                });
            }
            return false;
        }

        let local_a = bodies.gather(pool, &settings.gravity, manifold.body_a);
        let local_b = bodies.gather(pool, &settings.gravity, manifold.body_b);

        let normal = manifold.world_space_normal.into_inner();
        let (tangent, bitangent) = construct_tangent_vectors(&normal);

        let inv_mass_a = body_a.inv_mass() * contact_settings.inv_mass_scale_a;
        let inv_mass_b = body_b.inv_mass() * contact_settings.inv_mass_scale_b;
        let inv_inertia_a = body_a.inverse_world_inertia() * contact_settings.inv_inertia_scale_a;
        let inv_inertia_b = body_b.inverse_world_inertia() * contact_settings.inv_inertia_scale_b;

        let mut constraint = ContactConstraint {
            body_a: manifold.body_a,
            body_b: manifold.body_b,
            local_body_a: local_a,
            local_body_b: local_b,
            cache_key: key,
            sort_key: contact_sort_key(&key),
            normal,
            tangent,
            bitangent,
            friction: contact_settings.combined_friction,
            inv_mass_a,
            inv_mass_b,
            inv_inertia_scale_a: contact_settings.inv_inertia_scale_a,
            inv_inertia_scale_b: contact_settings.inv_inertia_scale_b,
            points: TinyVec::new(),
        };

        let restitution = contact_settings.combined_restitution;
        let min_velocity_for_restitution = settings.solver.min_velocity_for_restitution;
        let max_dist_sq = settings.contact.point_preserve_lambda_max_dist_sq;

        let solver_body_a = bodies.get(local_a).clone();
        let solver_body_b = bodies.get(local_b).clone();

        let (cached, _) = cache.get_or_insert_marked(key);
        let mut new_cached_points: TinyVec<[CachedContactPoint; 4]> = TinyVec::new();

        for manifold_point in &manifold.points {
            let world_a = manifold.base_offset + manifold_point.relative_position_a;
            let world_b = manifold.base_offset + manifold_point.relative_position_b;

            let local_position_a = orientation_a.inverse_transform_vector(&(world_a - com_a));
            let local_position_b = orientation_b.inverse_transform_vector(&(world_b - com_b));

            let mut point = ContactPoint {
                local_position_a,
                local_position_b,
                ..ContactPoint::default()
            };

            // Carry over the impulses from the previous step when the point
            // matches a cached one, so they can warm start the solver.
            if let Some((normal_lambda, tangent_lambda, bitangent_lambda)) =
                cached.matching_lambdas(&local_position_a, &local_position_b, max_dist_sq)
            {
                point.normal_part.set_total_lambda(normal_lambda);
                point.tangent_part.set_total_lambda(tangent_lambda);
                point.bitangent_part.set_total_lambda(bitangent_lambda);
            }

            let midpoint = Position::from(0.5 * (world_a.coords + world_b.coords));
            let r_a = midpoint - com_a;
            let r_b = midpoint - com_b;

            let normal_bias = compute_normal_velocity_bias(
                &solver_body_a,
                &solver_body_b,
                &r_a,
                &r_b,
                &normal,
                (world_a - world_b).dot(&normal),
                restitution,
                min_velocity_for_restitution,
                dt,
            );

            point.normal_part.setup(
                inv_mass_a,
                inv_mass_b,
                &inv_inertia_a,
                &inv_inertia_b,
                &r_a,
                &r_b,
                &normal,
                normal_bias,
            );

            if contact_settings.combined_friction > 0.0 {
                // Friction drives the slip between the surface materials to
                // zero, so a surface velocity on body A shifts the target
                // relative velocity accordingly (conveyor belts).
                let surface_velocity = contact_settings.relative_linear_surface_velocity
                    + contact_settings
                        .relative_angular_surface_velocity
                        .cross(&r_a);
                point.tangent_part.setup(
                    inv_mass_a,
                    inv_mass_b,
                    &inv_inertia_a,
                    &inv_inertia_b,
                    &r_a,
                    &r_b,
                    &tangent,
                    -surface_velocity.dot(&tangent),
                );
                point.bitangent_part.setup(
                    inv_mass_a,
                    inv_mass_b,
                    &inv_inertia_a,
                    &inv_inertia_b,
                    &r_a,
                    &r_b,
                    &bitangent,
                    -surface_velocity.dot(&bitangent),
                );
            } else {
                point.tangent_part.deactivate();
                point.bitangent_part.deactivate();
            }

            new_cached_points.push(CachedContactPoint {
                local_position_a,
                local_position_b,
                normal_lambda: point.normal_part.total_lambda(),
                tangent_lambda: point.tangent_part.total_lambda(),
                bitangent_lambda: point.bitangent_part.total_lambda(),
            });

            constraint.points.push(point);
        }

        cached.points = new_cached_points;
        self.constraints.push(constraint);
        true
    }

    /// Applies the cached impulses from the previous step, scaled by the
    /// given ratio, to kick start convergence.
    pub fn warm_start(&mut self, bodies: &mut SolverBodies, warm_start_ratio: fph) {
        for constraint in &mut self.constraints {
            let (body_a, body_b) = bodies.pair_mut(constraint.local_body_a, constraint.local_body_b);
            for point in &mut constraint.points {
                point
                    .normal_part
                    .warm_start(body_a, body_b, &constraint.normal, warm_start_ratio);
                point
                    .tangent_part
                    .warm_start(body_a, body_b, &constraint.tangent, warm_start_ratio);
                point.bitangent_part.warm_start(
                    body_a,
                    body_b,
                    &constraint.bitangent,
                    warm_start_ratio,
                );
            }
        }
    }

    /// Performs one velocity iteration over the constraints selected by
    /// `indices`. Friction is solved before the normal direction: the
    /// normal constraint has priority, and the Gauss-Seidel sweep converges
    /// on whatever is solved last. Returns whether any impulse was applied.
    pub fn solve_velocity(&mut self, bodies: &mut SolverBodies, indices: &[usize]) -> bool {
        let mut applied = false;

        for &idx in indices {
            let constraint = &mut self.constraints[idx];
            let (body_a, body_b) = bodies.pair_mut(constraint.local_body_a, constraint.local_body_b);

            // Friction, coupled over both tangent directions through the
            // Coulomb cone |λ_t| ≤ μ·λ_n with the normal impulse of the
            // previous iteration.
            for point in &mut constraint.points {
                if !point.tangent_part.is_active() && !point.bitangent_part.is_active() {
                    continue;
                }
                let max_friction_lambda = constraint.friction * point.normal_part.total_lambda();

                let mut tangent_lambda = if point.tangent_part.is_active() {
                    point
                        .tangent_part
                        .unclamped_total_lambda(body_a, body_b, &constraint.tangent)
                } else {
                    0.0
                };
                let mut bitangent_lambda = if point.bitangent_part.is_active() {
                    point
                        .bitangent_part
                        .unclamped_total_lambda(body_a, body_b, &constraint.bitangent)
                } else {
                    0.0
                };

                let total_sq = tangent_lambda * tangent_lambda + bitangent_lambda * bitangent_lambda;
                if total_sq > max_friction_lambda * max_friction_lambda {
                    let scale = if total_sq > 0.0 {
                        max_friction_lambda / total_sq.sqrt()
                    } else {
                        0.0
                    };
                    tangent_lambda *= scale;
                    bitangent_lambda *= scale;
                }

                if point.tangent_part.is_active() {
                    applied |= point.tangent_part.commit_total_lambda(
                        body_a,
                        body_b,
                        &constraint.tangent,
                        tangent_lambda,
                    );
                }
                if point.bitangent_part.is_active() {
                    applied |= point.bitangent_part.commit_total_lambda(
                        body_a,
                        body_b,
                        &constraint.bitangent,
                        bitangent_lambda,
                    );
                }
            }

            // Non-penetration along the normal, push-only.
            for point in &mut constraint.points {
                applied |= point.normal_part.solve_velocity(
                    body_a,
                    body_b,
                    &constraint.normal,
                    0.0,
                    fph::INFINITY,
                );
            }
        }

        applied
    }

    /// Performs one positional correction iteration over the constraints
    /// selected by `indices`. World contact positions, penetration depths
    /// and effective masses are recomputed from the current configurations
    /// since earlier corrections may have moved the bodies. Returns whether
    /// any correction was applied.
    pub fn solve_position(
        &mut self,
        bodies: &mut SolverBodies,
        indices: &[usize],
        solver: &SolverConfig,
    ) -> bool {
        let mut applied = false;

        for &idx in indices {
            let constraint = &mut self.constraints[idx];
            let (body_a, body_b) = bodies.pair_mut(constraint.local_body_a, constraint.local_body_b);

            for point in &mut constraint.points {
                let world_a =
                    body_a.position + body_a.orientation.transform_vector(&point.local_position_a);
                let world_b =
                    body_b.position + body_b.orientation.transform_vector(&point.local_position_b);

                let mut separation =
                    (world_b - world_a).dot(&constraint.normal) + solver.penetration_slop;
                separation = separation.max(-solver.max_penetration_distance);
                if separation >= 0.0 {
                    continue;
                }

                let midpoint = Position::from(0.5 * (world_a.coords + world_b.coords));
                let r_a = midpoint - body_a.position;
                let r_b = midpoint - body_b.position;

                let inv_inertia_a =
                    body_a.inverse_world_inertia() * constraint.inv_inertia_scale_a;
                let inv_inertia_b =
                    body_b.inverse_world_inertia() * constraint.inv_inertia_scale_b;

                if !point.normal_part.setup(
                    constraint.inv_mass_a,
                    constraint.inv_mass_b,
                    &inv_inertia_a,
                    &inv_inertia_b,
                    &r_a,
                    &r_b,
                    &constraint.normal,
                    0.0,
                ) {
                    continue;
                }
                applied |= point.normal_part.solve_position(
                    body_a,
                    body_b,
                    &constraint.normal,
                    separation,
                    solver.baumgarte,
                );
            }
        }

        applied
    }

    /// Copies the solved impulses of every contact point back into the
    /// cache for warm starting the next step.
    pub fn store_applied_impulses(&self, cache: &mut ContactCache) {
        for constraint in &self.constraints {
            let (cached, _) = cache.get_or_insert_marked(constraint.cache_key);
            for (cached_point, point) in cached.points.iter_mut().zip(&constraint.points) {
                cached_point.normal_lambda = point.normal_part.total_lambda();
                cached_point.tangent_lambda = point.tangent_part.total_lambda();
                cached_point.bitangent_lambda = point.bitangent_part.total_lambda();
            }
        }
    }

    /// Sorts the given constraint indices into the deterministic solve
    /// order: by sort key, then body indices.
    pub fn sort_constraint_indices(&self, indices: &mut [usize]) {
        indices.sort_by_key(|&idx| {
            let constraint = &self.constraints[idx];
            (constraint.sort_key, constraint.body_a, constraint.body_b)
        });
    }
}

/// Hash of the body pair and sub-shape pair used as the deterministic
/// ordering key for contact constraints.
fn contact_sort_key(key: &ContactPairKey) -> u64 {
    let mut hash: u64 = 0;
    for value in [
        key.body_a as u64,
        key.body_b as u64,
        u64::from(key.sub_shape_id_a),
        u64::from(key.sub_shape_id_b),
    ] {
        hash = hash.wrapping_mul(31).wrapping_add(value);
    }
    hash
}

/// The velocity bias for a contact normal, combining speculative contact
/// handling with restitution.
///
/// The approach speed is `s = n·(vA − vB)` at the contact point (positive
/// when the bodies move toward each other). A separated pair may close its
/// gap within the step, so the constraint allows approaching at up to
/// `gap / dt`. A pair colliding faster than the restitution threshold
/// instead gets a negative bias requesting a separating velocity of
/// `restitution` times the approach speed, with the portion of the approach
/// speed contributed by this step's gravity and forces removed to avoid
/// amplifying it on every bounce.
fn compute_normal_velocity_bias(
    body_a: &super::SolverBody,
    body_b: &super::SolverBody,
    r_a: &Vector3<fph>,
    r_b: &Vector3<fph>,
    normal: &Vector3<fph>,
    penetration: fph,
    restitution: fph,
    min_velocity_for_restitution: fph,
    dt: fph,
) -> fph {
    let approach_speed =
        normal.dot(&(body_a.point_velocity(r_a) - body_b.point_velocity(r_b)));

    let speculative_bias = (-penetration).max(0.0) / dt;

    if restitution > 0.0 && approach_speed > min_velocity_for_restitution {
        if approach_speed > speculative_bias {
            // The bodies really collide this step. Remove the approach speed
            // gained from forces during this step before applying
            // restitution, since it was not part of the impact speed.
            let force_contribution = dt
                * normal
                    .dot(&(body_a.force_acceleration - body_b.force_acceleration))
                    .max(0.0);
            let impact_speed = (approach_speed - force_contribution).max(0.0);
            -restitution * impact_speed
        } else {
            speculative_bias
        }
    } else {
        speculative_bias
    }
}

/// Constructs two unit vectors forming a right-handed orthonormal basis
/// with the given surface normal.
fn construct_tangent_vectors(
    surface_normal: &Vector3<fph>,
) -> (Vector3<fph>, Vector3<fph>) {
    const INV_SQRT_THREE: fph = 0.57735;

    let tangent = if surface_normal.x.abs() < INV_SQRT_THREE {
        // Since the normal is relatively close to lying in the yz-plane, we
        // project it onto the yz plane, rotate it 90 degrees within the
        // plane and use that as the (unnormalized) first tangent. This
        // vector will be sufficiently different from the normal to avoid
        // numerical issues.
        vector![0.0, surface_normal.z, -surface_normal.y]
    } else {
        vector![surface_normal.y, -surface_normal.x, 0.0]
    }
    .normalize();

    let bitangent = surface_normal.cross(&tangent);

    (tangent, bitangent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantities::Orientation;
    use approx::assert_abs_diff_eq;
    use nalgebra::point;
    use proptest::prelude::*;

    fn simple_key(body_a: RigidBodyIndex, body_b: RigidBodyIndex) -> ContactPairKey {
        ContactPairKey {
            body_a,
            body_b,
            sub_shape_id_a: 0,
            sub_shape_id_b: 0,
        }
    }

    #[test]
    fn cache_should_track_new_and_existing_pairs() {
        let mut cache = ContactCache::new();
        let key = simple_key(0, 1);
        let (_, existed) = cache.get_or_insert_marked(key);
        assert!(!existed);
        let (_, existed) = cache.get_or_insert_marked(key);
        assert!(existed);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn cache_should_prune_unmarked_contacts() {
        let mut cache = ContactCache::new();
        cache.get_or_insert_marked(simple_key(0, 1));
        cache.get_or_insert_marked(simple_key(0, 2));
        // First prune clears the marks, second prune removes everything that
        // was not re-marked in between.
        cache.prune_stale();
        assert_eq!(cache.len(), 2);
        cache.get_or_insert_marked(simple_key(0, 2));
        cache.prune_stale();
        assert_eq!(cache.len(), 1);
        assert!(cache.get(simple_key(0, 2)).is_some());
        assert!(cache.get(simple_key(0, 1)).is_none());
    }

    #[test]
    fn swapped_manifold_should_flip_normal_and_sides() {
        let mut manifold = ContactManifold::new(
            3,
            1,
            Vector3::y_axis(),
            point![0.0, 1.0, 0.0],
        );
        manifold.push_point(point![0.5, 1.0, 0.0], point![0.5, 0.9, 0.0]);

        let swapped = manifold.swapped();
        assert_eq!(swapped.body_a, 1);
        assert_eq!(swapped.body_b, 3);
        assert_abs_diff_eq!(
            swapped.world_space_normal.into_inner(),
            -Vector3::y_axis().into_inner()
        );
        assert_abs_diff_eq!(
            swapped.points[0].relative_position_a,
            manifold.points[0].relative_position_b
        );
    }

    #[test]
    fn sort_key_should_be_deterministic_and_discriminating() {
        let key_a = simple_key(0, 1);
        let key_b = simple_key(0, 2);
        assert_eq!(contact_sort_key(&key_a), contact_sort_key(&key_a));
        assert_ne!(contact_sort_key(&key_a), contact_sort_key(&key_b));
    }

    proptest! {
        #[test]
        fn tangent_vectors_should_form_orthonormal_basis(
            x in -1.0..1.0f64,
            y in -1.0..1.0f64,
            z in -1.0..1.0f64,
        ) {
            let vector = vector![x, y, z];
            prop_assume!(vector.norm_squared() > 1e-4);
            let normal = vector.normalize();
            let (tangent, bitangent) = construct_tangent_vectors(&normal);
            prop_assert!((tangent.norm() - 1.0).abs() < 1e-10);
            prop_assert!((bitangent.norm() - 1.0).abs() < 1e-10);
            prop_assert!(tangent.dot(&normal).abs() < 1e-10);
            prop_assert!(bitangent.dot(&normal).abs() < 1e-10);
            prop_assert!(tangent.dot(&bitangent).abs() < 1e-10);
            // Right handed: normal × tangent = bitangent.
            prop_assert!((normal.cross(&tangent) - bitangent).norm() < 1e-10);
        }
    }

    #[test]
    fn speculative_bias_should_allow_closing_the_gap() {
        let body = crate::constraint::SolverBody::from_rigid_body(
            &crate::rigid_body::RigidBody::dynamic(
                Position::origin(),
                Orientation::identity(),
                1.0,
                vector![1.0, 1.0, 1.0],
            ),
            &Vector3::zeros(),
        );
        let dt = 1.0 / 60.0;
        // Separated by 0.1 (negative penetration): the bias lets the bodies
        // approach at up to gap / dt.
        let bias = compute_normal_velocity_bias(
            &body,
            &body.clone(),
            &Vector3::zeros(),
            &Vector3::zeros(),
            &Vector3::y(),
            -0.1,
            0.0,
            1.0,
            dt,
        );
        assert_abs_diff_eq!(bias, 0.1 / dt, epsilon = 1e-12);
    }

    #[test]
    fn restitution_bias_should_request_separating_velocity() {
        let mut body_a = crate::rigid_body::RigidBody::dynamic(
            Position::origin(),
            Orientation::identity(),
            1.0,
            vector![1.0, 1.0, 1.0],
        );
        // Body A moving at 5 toward body B along the normal.
        body_a.set_linear_velocity(vector![0.0, 5.0, 0.0]);
        let solver_a =
            crate::constraint::SolverBody::from_rigid_body(&body_a, &Vector3::zeros());
        let body_b = crate::rigid_body::RigidBody::fixed(
            Position::origin(),
            Orientation::identity(),
        );
        let solver_b = crate::constraint::SolverBody::from_rigid_body(&body_b, &Vector3::zeros());

        let bias = compute_normal_velocity_bias(
            &solver_a,
            &solver_b,
            &Vector3::zeros(),
            &Vector3::zeros(),
            &Vector3::y(),
            0.0,
            1.0,
            1.0,
            1.0 / 60.0,
        );
        assert_abs_diff_eq!(bias, -5.0, epsilon = 1e-12);
    }
}
