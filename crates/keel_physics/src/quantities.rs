//! Physical quantities.

use crate::fph;
use nalgebra::{Point3, Quaternion, Unit, UnitQuaternion, Vector3};

/// A unit vector in 3D space.
pub type Direction = Unit<Vector3<fph>>;

/// A position in 3D space.
pub type Position = Point3<fph>;

/// A velocity in 3D space.
pub type Velocity = Vector3<fph>;

/// An angular velocity vector (axis times angular speed) in 3D space.
pub type AngularVelocity = Vector3<fph>;

/// An orientation in 3D space.
pub type Orientation = UnitQuaternion<fph>;

/// A 3D force.
pub type Force = Vector3<fph>;

/// A 3D torque.
pub type Torque = Vector3<fph>;

/// Computes the quaternion representing the instantaneous time derivative of
/// the given [`Orientation`] for a body with the given angular velocity.
pub fn compute_orientation_derivative(
    orientation: &Orientation,
    angular_velocity: &AngularVelocity,
) -> Quaternion<fph> {
    Quaternion::from_imag(0.5 * angular_velocity) * orientation.as_ref()
}

/// Evolves the given [`Orientation`] with the given [`AngularVelocity`] for
/// the given duration.
pub fn advance_orientation(
    orientation: &Orientation,
    angular_velocity: &AngularVelocity,
    duration: fph,
) -> Orientation {
    let rotation_vector = angular_velocity * duration;
    let angle = rotation_vector.norm();
    if angle < fph::EPSILON {
        return *orientation;
    }
    let (sin_half_angle, cos_half_angle) = (0.5 * angle).sin_cos();
    let rotation = Quaternion::from_parts(
        cos_half_angle,
        rotation_vector * (sin_half_angle / angle),
    );
    UnitQuaternion::new_normalize(rotation * orientation.as_ref())
}

/// Applies the given small rotation vector to the orientation using the
/// first-order quaternion derivative. Used by positional correction, where
/// the rotation per application is small enough for the linearization to
/// hold.
pub fn pseudo_advance_orientation(
    orientation: &mut Orientation,
    pseudo_angular_velocity: &Vector3<fph>,
) {
    *orientation = UnitQuaternion::new_normalize(
        orientation.as_ref() + compute_orientation_derivative(orientation, pseudo_angular_velocity),
    );
}
