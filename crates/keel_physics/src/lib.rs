//! Rigid-body physics simulation.
//!
//! This crate implements the constraint solving core of the engine: the
//! per-part mathematical primitives (axis, angle, point, hinge rotation,
//! rotation euler, swing-twist, spring softening), the contact constraint
//! pipeline (manifold to constraint, warm starting, sequential impulse
//! velocity solve, positional correction, impulse writeback) and the joint
//! constraints (distance, hinge, swing-twist, six degree of freedom) built
//! from those parts, orchestrated per island by [`constraint::solver`].
//!
//! Collision detection, island discovery, sleeping and the top-level step
//! loop are external collaborators; the core consumes their outputs (an
//! indexed body pool, contact manifolds, islands) through the types in
//! [`rigid_body`] and [`constraint`].

pub mod constraint;
pub mod material;
pub mod quantities;
pub mod rigid_body;
pub mod settings;

/// Floating point type used for physics simulation.
#[allow(non_camel_case_types)]
pub type fph = f64;
