//! Swing-twist decomposition and limits for ragdoll-style rotational
//! constraints.

use super::{
    angle::AngleConstraintPart,
    rotation_euler::RotationEulerPart,
};
use crate::{constraint::SolverBody, fph, quantities::Orientation};
use nalgebra::{Quaternion, Vector3};

/// Rotations smaller than this (0.5 degrees) on both limit bounds make an
/// axis locked.
const LOCKED_ANGLE: fph = 0.008726646259971648;

/// Limit bounds beyond this (179.5 degrees) on both sides leave an axis
/// free.
const FREE_ANGLE: fph = 3.132836052813424;

/// Angular error below which a limit is not considered violated.
const CLAMP_EPSILON: fph = 1e-10;

const ELLIPSE_MAX_ITERATIONS: usize = 100;
const ELLIPSE_TOLERANCE: fph = 1e-6;

/// Shape of the swing limit.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum SwingType {
    /// The swing limit is an elliptical cone with the per-axis half angles
    /// as semi-axes.
    #[default]
    Cone,
    /// The swing limit clamps the rotation angles around the two swing axes
    /// independently.
    Pyramid,
}

/// Classification of a rotational axis based on its limit bounds.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
enum AxisFreedom {
    /// The axis allows no rotation; it is constrained as an equality.
    Locked,
    /// The axis allows rotation within its limit bounds.
    Limited,
    /// The axis is unconstrained.
    #[default]
    Free,
}

/// Splits the given rotation into a swing rotation (zero x component) and a
/// twist rotation about the x axis (zero y and z components) such that
/// `q = swing · twist`.
///
/// The degenerate 180-degree case (where the twist is ill defined) falls
/// back to an identity twist.
pub fn decompose_swing_twist(q: &Quaternion<fph>) -> (Quaternion<fph>, Quaternion<fph>) {
    let s = (q.w * q.w + q.i * q.i).sqrt();
    if s == 0.0 {
        return (*q, Quaternion::identity());
    }
    let twist = Quaternion::new(q.w / s, q.i / s, 0.0, 0.0);
    let swing = q * twist.conjugate();
    (swing, twist)
}

/// Computes the point on the axis-aligned ellipse with semi-axes `a` and
/// `b` closest to the point `(py, pz)`, which must lie outside the ellipse.
///
/// Solves the Lagrange multiplier equation
/// `g(t) = (a·py/(t+a²))² + (b·pz/(t+b²))² − 1 = 0` with Newton-Raphson
/// starting from `t = 0`. A degenerate semi-axis reduces the problem to the
/// closest point on a line segment.
fn closest_point_on_ellipse(a: fph, b: fph, py: fph, pz: fph) -> (fph, fph) {
    if a <= 0.0 {
        return (0.0, pz.clamp(-b.max(0.0), b.max(0.0)));
    }
    if b <= 0.0 {
        return (py.clamp(-a, a), 0.0);
    }

    let mut t: fph = 0.0;
    for _ in 0..ELLIPSE_MAX_ITERATIONS {
        let denom_y = t + a * a;
        let denom_z = t + b * b;
        let gy = a * py / denom_y;
        let gz = b * pz / denom_z;
        let g = gy * gy + gz * gz - 1.0;
        if g.abs() < ELLIPSE_TOLERANCE {
            break;
        }
        let dg = -2.0 * (gy * gy / denom_y + gz * gz / denom_z);
        if dg == 0.0 {
            break;
        }
        t -= g / dg;
    }

    (a * a * py / (t + a * a), b * b * pz / (t + b * b))
}

/// Swing and twist limits for the relative rotation of two bodies,
/// decomposed about the x (twist), y and z (swing) axes of a constraint
/// space.
///
/// The part owns one [`AngleConstraintPart`] per axis; at setup each
/// sub-part is activated only if its axis is locked or its limit is
/// currently violated, with the constraint axis oriented so that the limit
/// impulse pushes the rotation back inside. Position corrections rebuild
/// the clamped target rotation and delegate to a [`RotationEulerPart`].
#[derive(Copy, Clone, Debug, Default)]
pub struct SwingTwistPart {
    swing_type: SwingType,
    twist_min: fph,
    twist_max: fph,
    swing_y_min: fph,
    swing_y_max: fph,
    swing_z_min: fph,
    swing_z_max: fph,
    sin_half_twist_min: fph,
    cos_half_twist_min: fph,
    sin_half_twist_max: fph,
    cos_half_twist_max: fph,
    sin_half_swing_y_max: fph,
    sin_half_swing_z_max: fph,
    twist_freedom: AxisFreedom,
    swing_y_freedom: AxisFreedom,
    swing_z_freedom: AxisFreedom,
    world_twist_axis: Vector3<fph>,
    world_swing_y_axis: Vector3<fph>,
    world_swing_z_axis: Vector3<fph>,
    twist_equality: bool,
    swing_y_equality: bool,
    swing_z_equality: bool,
    twist_part: AngleConstraintPart,
    swing_y_part: AngleConstraintPart,
    swing_z_part: AngleConstraintPart,
    rotation_euler: RotationEulerPart,
}

impl SwingTwistPart {
    pub fn new(swing_type: SwingType) -> Self {
        Self {
            swing_type,
            ..Self::default()
        }
    }

    /// Configures the limit bounds (radians). Bounds within half a degree of
    /// zero lock the axis; bounds beyond 179.5 degrees on both sides leave
    /// it free. The cone swing limit uses the upper bounds as half cone
    /// angles.
    pub fn set_limits(
        &mut self,
        twist_min: fph,
        twist_max: fph,
        swing_y_min: fph,
        swing_y_max: fph,
        swing_z_min: fph,
        swing_z_max: fph,
    ) {
        self.twist_min = twist_min;
        self.twist_max = twist_max;
        self.swing_y_min = swing_y_min;
        self.swing_y_max = swing_y_max;
        self.swing_z_min = swing_z_min;
        self.swing_z_max = swing_z_max;

        self.twist_freedom = classify_axis(twist_min, twist_max);
        self.swing_y_freedom = classify_axis(swing_y_min, swing_y_max);
        self.swing_z_freedom = classify_axis(swing_z_min, swing_z_max);

        let (sin_min, cos_min) = (0.5 * twist_min).sin_cos();
        let (sin_max, cos_max) = (0.5 * twist_max).sin_cos();
        self.sin_half_twist_min = sin_min;
        self.cos_half_twist_min = cos_min;
        self.sin_half_twist_max = sin_max;
        self.cos_half_twist_max = cos_max;
        self.sin_half_swing_y_max = (0.5 * swing_y_max).sin();
        self.sin_half_swing_z_max = (0.5 * swing_z_max).sin();
    }

    pub fn swing_type(&self) -> SwingType {
        self.swing_type
    }

    /// Clears the accumulated impulses of all sub-parts.
    pub fn reset_warm_start(&mut self) {
        self.twist_part.set_total_lambda(0.0);
        self.swing_y_part.set_total_lambda(0.0);
        self.swing_z_part.set_total_lambda(0.0);
        self.rotation_euler.deactivate();
    }

    /// Whether any sub-part was activated by the last setup.
    pub fn is_active(&self) -> bool {
        self.twist_part.is_active()
            || self.swing_y_part.is_active()
            || self.swing_z_part.is_active()
    }

    /// Clamps the given relative rotation (in constraint space) against the
    /// configured limits. Used both during setup and for clamping motor
    /// targets.
    pub fn clamped_rotation(&self, q: &Quaternion<fph>) -> Quaternion<fph> {
        let q = canonical(q);
        let (swing, twist) = decompose_swing_twist(&q);
        let (twist_clamped, _) = self.clamp_twist(&twist);
        let (swing_clamped, _, _) = self.clamp_swing(&swing);
        swing_clamped * twist_clamped
    }

    /// Prepares the sub-parts for velocity solving given the current
    /// relative rotation `q` in constraint space and the rotation taking
    /// constraint space to world space.
    pub fn setup(
        &mut self,
        body_a: &SolverBody,
        body_b: &SolverBody,
        q: &Quaternion<fph>,
        constraint_to_world: &Orientation,
    ) {
        let q = canonical(q);
        let (swing, twist) = decompose_swing_twist(&q);
        let (twist_clamped, twist_violated) = self.clamp_twist(&twist);
        let (swing_clamped, swing_y_violated, swing_z_violated) = self.clamp_swing(&swing);

        let inv_inertia_a = body_a.inverse_world_inertia();
        let inv_inertia_b = body_b.inverse_world_inertia();

        // The twist axis follows the swing so that twisting is measured
        // about the rotated x axis.
        let twist_axis_constraint = rotate_unit_x(&swing);
        let twist_error = twist_angle(&twist) - twist_angle(&twist_clamped);
        let swing_error = rotation_error_vector(&swing, &swing_clamped);

        self.setup_sub_part(
            SubAxis::Twist,
            twist_violated,
            twist_error,
            &constraint_to_world.transform_vector(&twist_axis_constraint),
            &inv_inertia_a,
            &inv_inertia_b,
        );
        self.setup_sub_part(
            SubAxis::SwingY,
            swing_y_violated,
            swing_error.y,
            &constraint_to_world.transform_vector(&Vector3::y()),
            &inv_inertia_a,
            &inv_inertia_b,
        );
        self.setup_sub_part(
            SubAxis::SwingZ,
            swing_z_violated,
            swing_error.z,
            &constraint_to_world.transform_vector(&Vector3::z()),
            &inv_inertia_a,
            &inv_inertia_b,
        );
    }

    /// Applies the accumulated impulses from the previous step to the active
    /// sub-parts.
    pub fn warm_start(
        &mut self,
        body_a: &mut SolverBody,
        body_b: &mut SolverBody,
        warm_start_ratio: fph,
    ) {
        self.twist_part.warm_start(body_a, body_b, warm_start_ratio);
        self.swing_y_part
            .warm_start(body_a, body_b, warm_start_ratio);
        self.swing_z_part
            .warm_start(body_a, body_b, warm_start_ratio);
    }

    /// Performs one velocity iteration over the active sub-parts. Limits are
    /// single sided (`λ ≤ 0` about the violation axis); locked axes are
    /// equalities. Returns whether any impulse was applied.
    pub fn solve_velocity(&mut self, body_a: &mut SolverBody, body_b: &mut SolverBody) -> bool {
        let mut applied = false;
        applied |= solve_sub_part_velocity(
            &mut self.twist_part,
            body_a,
            body_b,
            &self.world_twist_axis,
            self.twist_equality,
        );
        applied |= solve_sub_part_velocity(
            &mut self.swing_y_part,
            body_a,
            body_b,
            &self.world_swing_y_axis,
            self.swing_y_equality,
        );
        applied |= solve_sub_part_velocity(
            &mut self.swing_z_part,
            body_a,
            body_b,
            &self.world_swing_z_axis,
            self.swing_z_equality,
        );
        applied
    }

    /// Corrects the orientations so the relative rotation moves back inside
    /// the limits, by solving a 3-DOF rotational correction toward the
    /// clamped target rotation. Returns whether a correction was applied.
    pub fn solve_position(
        &mut self,
        body_a: &mut SolverBody,
        body_b: &mut SolverBody,
        q: &Quaternion<fph>,
        constraint_to_world: &Orientation,
        baumgarte: fph,
    ) -> bool {
        let q = canonical(q);
        let (swing, twist) = decompose_swing_twist(&q);
        let (twist_clamped, twist_violated) = self.clamp_twist(&twist);
        let (swing_clamped, swing_y_violated, swing_z_violated) = self.clamp_swing(&swing);

        if !(twist_violated || swing_y_violated || swing_z_violated) {
            return false;
        }

        let target = swing_clamped * twist_clamped;
        let error_constraint = rotation_error_vector(&q, &target);
        let error_world = constraint_to_world.transform_vector(&error_constraint);

        if !self.rotation_euler.setup(body_a, body_b) {
            return false;
        }
        self.rotation_euler
            .solve_position(body_a, body_b, &error_world, baumgarte)
    }

    fn setup_sub_part(
        &mut self,
        sub_axis: SubAxis,
        violated: bool,
        error: fph,
        world_axis: &Vector3<fph>,
        inv_inertia_a: &nalgebra::Matrix3<fph>,
        inv_inertia_b: &nalgebra::Matrix3<fph>,
    ) {
        let (freedom, equal_bounds) = match sub_axis {
            SubAxis::Twist => (self.twist_freedom, self.twist_min == self.twist_max),
            SubAxis::SwingY => (self.swing_y_freedom, self.swing_y_min == self.swing_y_max),
            SubAxis::SwingZ => (self.swing_z_freedom, self.swing_z_min == self.swing_z_max),
        };

        let (active, equality, axis) = match freedom {
            AxisFreedom::Free => (false, false, *world_axis),
            AxisFreedom::Locked => (true, true, *world_axis),
            AxisFreedom::Limited => {
                if violated {
                    // Orient the axis along the violation so that the
                    // single-sided impulse range pushes the rotation back
                    // inside the limit.
                    let axis = if error >= 0.0 { *world_axis } else { -world_axis };
                    (true, equal_bounds, axis)
                } else {
                    (false, false, *world_axis)
                }
            }
        };

        let part = match sub_axis {
            SubAxis::Twist => &mut self.twist_part,
            SubAxis::SwingY => &mut self.swing_y_part,
            SubAxis::SwingZ => &mut self.swing_z_part,
        };

        if active {
            part.setup(inv_inertia_a, inv_inertia_b, &axis, 0.0);
        } else {
            part.deactivate();
        }

        match sub_axis {
            SubAxis::Twist => {
                self.world_twist_axis = axis;
                self.twist_equality = equality;
            }
            SubAxis::SwingY => {
                self.world_swing_y_axis = axis;
                self.swing_y_equality = equality;
            }
            SubAxis::SwingZ => {
                self.world_swing_z_axis = axis;
                self.swing_z_equality = equality;
            }
        }
    }

    fn clamp_twist(&self, twist: &Quaternion<fph>) -> (Quaternion<fph>, bool) {
        let twist = canonical(twist);
        match self.twist_freedom {
            AxisFreedom::Free => (twist, false),
            AxisFreedom::Locked => {
                let violated = twist.i.abs() > CLAMP_EPSILON;
                (Quaternion::identity(), violated)
            }
            AxisFreedom::Limited => {
                let angle = twist_angle(&twist);
                if angle < self.twist_min {
                    (
                        Quaternion::new(self.cos_half_twist_min, self.sin_half_twist_min, 0.0, 0.0),
                        true,
                    )
                } else if angle > self.twist_max {
                    (
                        Quaternion::new(self.cos_half_twist_max, self.sin_half_twist_max, 0.0, 0.0),
                        true,
                    )
                } else {
                    (twist, false)
                }
            }
        }
    }

    fn clamp_swing(&self, swing: &Quaternion<fph>) -> (Quaternion<fph>, bool, bool) {
        let swing = canonical(swing);
        let mut y = swing.j;
        let mut z = swing.k;

        if self.swing_y_freedom == AxisFreedom::Locked {
            y = 0.0;
        }
        if self.swing_z_freedom == AxisFreedom::Locked {
            z = 0.0;
        }

        let y_limited = self.swing_y_freedom == AxisFreedom::Limited;
        let z_limited = self.swing_z_freedom == AxisFreedom::Limited;

        match self.swing_type {
            SwingType::Cone if y_limited && z_limited => {
                let a = self.sin_half_swing_y_max;
                let b = self.sin_half_swing_z_max;
                let outside = if a <= 0.0 || b <= 0.0 {
                    true
                } else {
                    (y / a).powi(2) + (z / b).powi(2) > 1.0
                };
                if outside {
                    let (clamped_y, clamped_z) = closest_point_on_ellipse(a, b, y, z);
                    y = clamped_y;
                    z = clamped_z;
                }
            }
            _ => {
                if y_limited {
                    y = self.clamp_pyramid_component(y, swing.w, self.swing_y_min, self.swing_y_max);
                }
                if z_limited {
                    z = self.clamp_pyramid_component(z, swing.w, self.swing_z_min, self.swing_z_max);
                }
            }
        }

        let w = (1.0 - y * y - z * z).max(0.0).sqrt();
        let clamped = Quaternion::new(w, 0.0, y, z);
        let y_violated = (y - swing.j).abs() > CLAMP_EPSILON
            || (self.swing_y_freedom == AxisFreedom::Locked && swing.j.abs() > CLAMP_EPSILON);
        let z_violated = (z - swing.k).abs() > CLAMP_EPSILON
            || (self.swing_z_freedom == AxisFreedom::Locked && swing.k.abs() > CLAMP_EPSILON);
        (clamped, y_violated, z_violated)
    }

    fn clamp_pyramid_component(&self, component: fph, w: fph, min: fph, max: fph) -> fph {
        let angle = 2.0 * component.atan2(w);
        let clamped_angle = angle.clamp(min, max);
        if clamped_angle == angle {
            component
        } else {
            (0.5 * clamped_angle).sin()
        }
    }
}

#[derive(Copy, Clone)]
enum SubAxis {
    Twist,
    SwingY,
    SwingZ,
}

fn classify_axis(min: fph, max: fph) -> AxisFreedom {
    if min.abs() < LOCKED_ANGLE && max.abs() < LOCKED_ANGLE {
        AxisFreedom::Locked
    } else if min.abs() > FREE_ANGLE && max.abs() > FREE_ANGLE {
        AxisFreedom::Free
    } else {
        AxisFreedom::Limited
    }
}

/// Flips the quaternion sign so the real part is non-negative. Both signs
/// represent the same rotation; the canonical form keeps the half angles in
/// `(−π, π]`.
fn canonical(q: &Quaternion<fph>) -> Quaternion<fph> {
    if q.w < 0.0 { -*q } else { *q }
}

fn twist_angle(twist: &Quaternion<fph>) -> fph {
    2.0 * (twist.i / twist.w).atan()
}

/// The x axis rotated by the given (swing) quaternion.
fn rotate_unit_x(q: &Quaternion<fph>) -> Vector3<fph> {
    let rotated = q * Quaternion::from_imag(Vector3::x()) * q.conjugate();
    let axis = rotated.imag();
    let norm = axis.norm();
    if norm > 0.0 { axis / norm } else { Vector3::x() }
}

/// Small-angle rotation vector taking the target rotation to the actual
/// rotation.
fn rotation_error_vector(q: &Quaternion<fph>, target: &Quaternion<fph>) -> Vector3<fph> {
    let diff = canonical(&(q * target.conjugate()));
    2.0 * diff.imag()
}

fn solve_sub_part_velocity(
    part: &mut AngleConstraintPart,
    body_a: &mut SolverBody,
    body_b: &mut SolverBody,
    axis: &Vector3<fph>,
    equality: bool,
) -> bool {
    if !part.is_active() {
        return false;
    }
    let (min_lambda, max_lambda) = if equality {
        (fph::NEG_INFINITY, fph::INFINITY)
    } else {
        (fph::NEG_INFINITY, 0.0)
    };
    part.solve_velocity(body_a, body_b, axis, min_lambda, max_lambda)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use nalgebra::UnitQuaternion;
    use proptest::prelude::*;
    use std::f64::consts::{FRAC_PI_4, FRAC_PI_6, PI};

    fn quaternion_from_euler(roll: fph, pitch: fph, yaw: fph) -> Quaternion<fph> {
        *UnitQuaternion::from_euler_angles(roll, pitch, yaw).quaternion()
    }

    #[test]
    fn should_recompose_swing_and_twist_to_original_rotation() {
        let q = quaternion_from_euler(0.4, -0.7, 1.2);
        let (swing, twist) = decompose_swing_twist(&q);
        let recomposed = swing * twist;
        assert_abs_diff_eq!(recomposed, q, epsilon = 1e-12);
    }

    #[test]
    fn should_put_all_x_rotation_in_twist() {
        let q = quaternion_from_euler(0.8, -0.3, 0.5);
        let (swing, twist) = decompose_swing_twist(&q);
        assert_abs_diff_eq!(swing.i, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(twist.j, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(twist.k, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn should_fall_back_to_identity_twist_for_degenerate_rotation() {
        // A 180 degree rotation about y has zero w and x components.
        let q = *UnitQuaternion::from_axis_angle(&Vector3::y_axis(), PI).quaternion();
        let (swing, twist) = decompose_swing_twist(&q);
        assert_abs_diff_eq!(twist, Quaternion::identity());
        assert_abs_diff_eq!(swing, q);
    }

    proptest! {
        #[test]
        fn should_always_recompose_and_separate_components(
            roll in -3.0..3.0f64,
            pitch in -1.5..1.5f64,
            yaw in -3.0..3.0f64,
        ) {
            let q = quaternion_from_euler(roll, pitch, yaw);
            let (swing, twist) = decompose_swing_twist(&q);
            prop_assert!((swing * twist - q).norm() < 1e-10);
            prop_assert!(swing.i.abs() < 1e-10);
            prop_assert!(twist.j.abs() < 1e-10);
            prop_assert!(twist.k.abs() < 1e-10);
        }
    }

    #[test]
    fn should_project_outside_point_onto_ellipse_boundary() {
        let (a, b) = (0.5, 0.25);
        let (y, z) = closest_point_on_ellipse(a, b, 0.8, 0.6);
        let on_boundary = (y / a).powi(2) + (z / b).powi(2);
        assert_abs_diff_eq!(on_boundary, 1.0, epsilon = 1e-4);
    }

    proptest! {
        #[test]
        fn should_project_onto_boundary_for_arbitrary_outside_points(
            py in 0.3..2.0f64,
            pz in 0.3..2.0f64,
        ) {
            let (a, b) = (0.3, 0.2);
            prop_assume!((py / a).powi(2) + (pz / b).powi(2) > 1.0);
            let (y, z) = closest_point_on_ellipse(a, b, py, pz);
            let on_boundary = (y / a).powi(2) + (z / b).powi(2);
            prop_assert!((on_boundary - 1.0).abs() < 1e-3);
        }
    }

    #[test]
    fn should_clamp_degenerate_semi_axis_analytically() {
        let (y, z) = closest_point_on_ellipse(0.0, 0.25, 0.8, 0.6);
        assert_abs_diff_eq!(y, 0.0);
        assert_abs_diff_eq!(z, 0.25);
    }

    fn cone_part(half_angle_y: fph, half_angle_z: fph, twist: fph) -> SwingTwistPart {
        let mut part = SwingTwistPart::new(SwingType::Cone);
        part.set_limits(
            -twist,
            twist,
            -half_angle_y,
            half_angle_y,
            -half_angle_z,
            half_angle_z,
        );
        part
    }

    #[test]
    fn should_leave_rotation_inside_cone_unclamped() {
        let part = cone_part(FRAC_PI_4, FRAC_PI_4, FRAC_PI_4);
        let q = *UnitQuaternion::from_axis_angle(&Vector3::y_axis(), FRAC_PI_6).quaternion();
        let clamped = part.clamped_rotation(&q);
        assert_abs_diff_eq!(clamped, q, epsilon = 1e-12);
    }

    #[test]
    fn should_clamp_swing_outside_cone_to_half_angle() {
        let part = cone_part(FRAC_PI_6, FRAC_PI_6, 0.0);
        let q = *UnitQuaternion::from_axis_angle(&Vector3::y_axis(), FRAC_PI_4).quaternion();
        let clamped = part.clamped_rotation(&q);
        let clamped_angle = 2.0 * clamped.j.atan2(clamped.w);
        assert_abs_diff_eq!(clamped_angle, FRAC_PI_6, epsilon = 1e-4);
    }

    #[test]
    fn should_clamp_twist_to_limits() {
        let mut part = SwingTwistPart::new(SwingType::Cone);
        part.set_limits(-0.2, 0.3, -PI, PI, -PI, PI);
        let q = *UnitQuaternion::from_axis_angle(&Vector3::x_axis(), 1.0).quaternion();
        let clamped = part.clamped_rotation(&q);
        let (_, twist) = decompose_swing_twist(&clamped);
        assert_abs_diff_eq!(twist_angle(&twist), 0.3, epsilon = 1e-9);
    }

    #[test]
    fn should_lock_axes_with_tiny_limits() {
        let mut part = SwingTwistPart::new(SwingType::Cone);
        part.set_limits(0.0, 0.0, 0.0, 0.0, 0.0, 0.0);
        let q = quaternion_from_euler(0.3, 0.2, -0.4);
        let clamped = part.clamped_rotation(&q);
        assert_abs_diff_eq!(clamped, Quaternion::identity(), epsilon = 1e-12);
    }

    #[test]
    fn should_clamp_pyramid_axes_independently() {
        let mut part = SwingTwistPart::new(SwingType::Pyramid);
        part.set_limits(0.0, 0.0, -FRAC_PI_6, FRAC_PI_6, -FRAC_PI_4, FRAC_PI_4);
        let q = *UnitQuaternion::from_axis_angle(&Vector3::y_axis(), FRAC_PI_4).quaternion();
        let clamped = part.clamped_rotation(&q);
        let clamped_angle = 2.0 * clamped.j.atan2(clamped.w);
        assert_abs_diff_eq!(clamped_angle, FRAC_PI_6, epsilon = 1e-9);
    }
}
