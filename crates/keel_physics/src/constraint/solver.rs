//! Per-island orchestration of the constraint solve.
//!
//! Islands are disjoint sets of bodies coupled by contacts and joints, so
//! they can be solved independently. Each island gathers the solver-side
//! state of its bodies, builds its contact constraints, sets up its joints,
//! warm starts, runs the velocity and position iterations in a fixed
//! deterministic order, and finally applies the results back to the body
//! pool and the contact cache.

use super::{
    SolverBodies,
    contact::{ContactCache, ContactConstraintSet, ContactListener, ContactManifold},
    joint::{AnyJoint, JointId, JointSet},
};
use crate::{fph, rigid_body::RigidBodyPool, settings::WorldSettings};
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use std::cmp::Reverse;

/// A connected component in the graph whose nodes are dynamic bodies and
/// whose edges are contacts and joints, as produced by the external island
/// builder. Contacts are referenced by their index in the step's manifold
/// list.
#[derive(Clone, Debug, Default)]
pub struct Island {
    pub manifold_indices: Vec<usize>,
    pub joint_ids: Vec<JointId>,
}

impl Island {
    /// An island containing all given manifolds and joints. Convenient when
    /// the whole scene is one island.
    pub fn of(manifold_indices: impl IntoIterator<Item = usize>, joint_ids: impl IntoIterator<Item = JointId>) -> Self {
        Self {
            manifold_indices: manifold_indices.into_iter().collect(),
            joint_ids: joint_ids.into_iter().collect(),
        }
    }
}

/// The island-local state for one solve: gathered bodies, built contact
/// constraints and extracted joint records. Contexts are owned by the
/// solver and reused across steps.
#[derive(Debug, Default)]
struct IslandContext {
    bodies: SolverBodies,
    contacts: ContactConstraintSet,
    contact_order: Vec<usize>,
    joints: Vec<(JointId, AnyJoint)>,
}

/// Orchestrates constraint solving across islands.
///
/// Within an island all work is serial and ordered (contacts by sort key
/// then body indices, joints by descending priority then pool index), which
/// makes the solve bit-reproducible for identical inputs. Across islands no
/// state is shared, so with the `parallel` feature the per-island work runs
/// fork-join on the rayon thread pool with results applied back serially in
/// island order.
#[derive(Debug, Default)]
pub struct ConstraintSolver {
    contexts: Vec<IslandContext>,
}

impl ConstraintSolver {
    pub fn new() -> Self {
        Self {
            contexts: Vec::new(),
        }
    }

    /// Advances the constraint solve for one step: builds and solves every
    /// island's constraints and writes the results back to the body pool,
    /// the joint set (accumulated impulses) and the contact cache (warm
    /// start data for the next step).
    pub fn solve_islands(
        &mut self,
        pool: &mut RigidBodyPool,
        joints: &mut JointSet,
        cache: &mut ContactCache,
        manifolds: &[ContactManifold],
        islands: &[Island],
        listener: Option<&dyn ContactListener>,
        settings: &WorldSettings,
        dt: fph,
    ) {
        debug_assert!(dt > 0.0, "the step duration must be positive");

        self.contexts
            .resize_with(islands.len(), IslandContext::default);

        // Constraint building is serial: it reads the body pool and mutates
        // the shared contact cache, and the listener callbacks fire here.
        for (context, island) in self.contexts.iter_mut().zip(islands) {
            context.bodies.clear();
            context.contacts.clear();

            for &manifold_index in &island.manifold_indices {
                context.contacts.add_constraint(
                    pool,
                    &mut context.bodies,
                    cache,
                    &manifolds[manifold_index],
                    listener,
                    settings,
                    dt,
                );
            }

            context.joints.clear();
            context.joints.extend(
                island
                    .joint_ids
                    .iter()
                    .filter_map(|&id| joints.extract(id).map(|joint| (id, joint)))
                    .filter(|(_, joint)| joint.header().enabled),
            );
            context
                .joints
                .sort_by_key(|(id, joint)| (Reverse(joint.header().priority), id.index()));

            context.contact_order.clear();
            context.contact_order.extend(0..context.contacts.len());
            context
                .contacts
                .sort_constraint_indices(&mut context.contact_order);
        }

        // The solve itself touches only island-local state (plus the body
        // pool read-only), so the islands can run fork-join.
        {
            let pool_ref: &RigidBodyPool = pool;
            #[cfg(feature = "parallel")]
            self.contexts
                .par_iter_mut()
                .for_each(|context| solve_island(context, pool_ref, settings, dt));
            #[cfg(not(feature = "parallel"))]
            for context in &mut self.contexts {
                solve_island(context, pool_ref, settings, dt);
            }
        }

        // Apply the results in island order to keep the outcome independent
        // of scheduling.
        let mut solved_contacts = 0;
        let mut solved_joints = 0;
        for context in &mut self.contexts {
            context.bodies.apply_to_pool(pool);
            context.contacts.store_applied_impulses(cache);
            solved_contacts += context.contacts.len();
            solved_joints += context.joints.len();
            for (id, joint) in context.joints.drain(..) {
                joints.store(id, joint);
            }
        }

        log::debug!(
            "Solved {} islands with {} contact constraints and {} joints",
            islands.len(),
            solved_contacts,
            solved_joints,
        );
    }
}

fn solve_island(
    context: &mut IslandContext,
    pool: &RigidBodyPool,
    settings: &WorldSettings,
    dt: fph,
) {
    for (_, joint) in &mut context.joints {
        joint.setup_velocity(pool, &mut context.bodies, &settings.gravity, dt);
    }

    if context.contacts.is_empty() && context.joints.is_empty() {
        return;
    }

    let warm_start_ratio = settings.solver.warm_start_ratio;
    context
        .contacts
        .warm_start(&mut context.bodies, warm_start_ratio);
    for (_, joint) in &mut context.joints {
        joint.warm_start_velocity(&mut context.bodies, warm_start_ratio);
    }

    // Per-joint overrides can only raise the iteration counts.
    let num_velocity_steps = context
        .joints
        .iter()
        .map(|(_, joint)| joint.header().num_velocity_steps_override)
        .fold(settings.solver.num_velocity_steps, u32::max);
    let num_position_steps = context
        .joints
        .iter()
        .map(|(_, joint)| joint.header().num_position_steps_override)
        .fold(settings.solver.num_position_steps, u32::max);

    for iteration in 0..num_velocity_steps {
        let mut applied = context
            .contacts
            .solve_velocity(&mut context.bodies, &context.contact_order);
        for (_, joint) in &mut context.joints {
            applied |= joint.solve_velocity(&mut context.bodies, dt);
        }
        if !applied {
            log::trace!(
                "Velocity solve converged after {} of {} iterations",
                iteration,
                num_velocity_steps,
            );
            break;
        }
    }

    for iteration in 0..num_position_steps {
        let mut applied = context.contacts.solve_position(
            &mut context.bodies,
            &context.contact_order,
            &settings.solver,
        );
        for (_, joint) in &mut context.joints {
            applied |= joint.solve_position(&mut context.bodies, dt, settings.solver.baumgarte);
        }
        if !applied {
            log::trace!(
                "Position solve converged after {} of {} iterations",
                iteration,
                num_position_steps,
            );
            break;
        }
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
    use nalgebra::{Vector3, point, vector};

    fn falling_sphere_scene() -> (RigidBodyPool, ContactManifold) {
        let mut pool = RigidBodyPool::new();
        let ground = pool.add(RigidBody::fixed(Position::origin(), Orientation::identity()));
        let mut sphere = RigidBody::dynamic(
            point![0.0, 1.0, 0.0],
            Orientation::identity(),
            1.0,
            vector![0.4, 0.4, 0.4],
        );
        sphere.set_linear_velocity(vector![0.0, -1.0, 0.0]);
        let sphere = pool.add(sphere);

        let mut manifold =
            ContactManifold::new(ground, sphere, Vector3::y_axis(), Position::origin());
        manifold.push_point(point![0.0, 0.0, 0.0], point![0.0, 0.0, 0.0]);
        (pool, manifold)
    }

    #[test]
    fn should_stop_approaching_bodies_at_contact() {
        let (mut pool, manifold) = falling_sphere_scene();
        let mut joints = JointSet::new();
        let mut cache = ContactCache::new();
        let mut solver = ConstraintSolver::new();
        let settings = WorldSettings::default();
        let islands = [Island::of([0], [])];

        solver.solve_islands(
            &mut pool,
            &mut joints,
            &mut cache,
            &[manifold],
            &islands,
            None,
            &settings,
            1.0 / 60.0,
        );

        let sphere_velocity = pool.body(1).linear_velocity();
        assert_abs_diff_eq!(sphere_velocity.y, 0.0, epsilon = 1e-9);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn should_be_deterministic_for_identical_inputs() {
        let run = || {
            let (mut pool, manifold) = falling_sphere_scene();
            let mut joints = JointSet::new();
            let mut cache = ContactCache::new();
            let mut solver = ConstraintSolver::new();
            let settings = WorldSettings::default();
            let islands = [Island::of([0], [])];
            for _ in 0..10 {
                solver.solve_islands(
                    &mut pool,
                    &mut joints,
                    &mut cache,
                    &[manifold.clone()],
                    &islands,
                    None,
                    &settings,
                    1.0 / 60.0,
                );
                cache.prune_stale();
            }
            (
                *pool.body(1).position(),
                pool.body(1).linear_velocity(),
                pool.body(1).angular_velocity(),
            )
        };

        let first = run();
        let second = run();
        assert_eq!(first.0, second.0);
        assert_eq!(first.1, second.1);
        assert_eq!(first.2, second.2);
    }

    #[test]
    fn should_skip_stale_joint_handles() {
        let mut pool = RigidBodyPool::new();
        let body_a = pool.add(RigidBody::dynamic(
            Position::origin(),
            Orientation::identity(),
            1.0,
            vector![1.0, 1.0, 1.0],
        ));
        let body_b = pool.add(RigidBody::dynamic(
            point![2.0, 0.0, 0.0],
            Orientation::identity(),
            1.0,
            vector![1.0, 1.0, 1.0],
        ));

        let mut joints = JointSet::new();
        let id = joints.create_distance(
            &mut pool,
            crate::constraint::joint::distance::DistanceJointSettings {
                body_a,
                body_b,
                local_point_a: Vector3::zeros(),
                local_point_b: Vector3::zeros(),
                min_distance: 2.0,
                max_distance: 2.0,
                spring: Default::default(),
            },
        );
        joints.remove(&mut pool, id);

        let mut cache = ContactCache::new();
        let mut solver = ConstraintSolver::new();
        let settings = WorldSettings::default();
        let islands = [Island::of([], [id])];

        // A stale handle in an island must be skipped, not panic.
        solver.solve_islands(
            &mut pool,
            &mut joints,
            &mut cache,
            &[],
            &islands,
            None,
            &settings,
            1.0 / 60.0,
        );
        assert_eq!(pool.body(body_a).linear_velocity(), Vector3::zeros());
    }
}
