//! # Coordinate Transform
//!
//! Robots report their locations in their own frame, the manager reasons in the fleet frame. The
//! transform between the two is a 2D similarity transform (uniform scale, rotation and
//! translation), configured per fleet.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use nalgebra::{Rotation2, Vector2};
use serde::Deserialize;

// Internal
use fleet_if::msgs::Location;
use util::maths::wrap_to_pi;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Bidirectional transform between the fleet frame and a robot frame.
///
/// The forward direction maps fleet-frame points into the robot frame following
/// `p' = scale * R(rotation) * p + t`. The inverse direction undoes it exactly (within floating
/// point tolerance).
#[derive(Debug, Clone)]
pub struct CoordinateTransform {
    scale: f64,
    rotation_rad: f64,
    translation: Vector2<f64>
}

/// Parameters from which a [`CoordinateTransform`] is built.
#[derive(Debug, Clone, Deserialize)]
pub struct TransformParams {
    /// Uniform scale factor, must be positive
    pub scale: f64,

    /// Rotation between the frames in radians
    pub rotation_rad: f64,

    /// X component of the translation in meters
    pub translation_x_m: f64,

    /// Y component of the translation in meters
    pub translation_y_m: f64
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Errors raised when building a transform.
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("The transform scale must be positive, got {0}")]
    NonPositiveScale(f64)
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl CoordinateTransform {

    /// Build a new transform, checking that the scale is usable.
    pub fn new(params: &TransformParams) -> Result<Self, TransformError> {
        if params.scale <= 0.0 {
            return Err(TransformError::NonPositiveScale(params.scale))
        }

        Ok(Self {
            scale: params.scale,
            rotation_rad: params.rotation_rad,
            translation: Vector2::new(params.translation_x_m, params.translation_y_m)
        })
    }

    /// The identity transform, which leaves locations untouched.
    pub fn identity() -> Self {
        Self {
            scale: 1.0,
            rotation_rad: 0.0,
            translation: Vector2::zeros()
        }
    }

    /// Transform a point from the fleet frame into the robot frame.
    pub fn forward_point(&self, point: &Vector2<f64>) -> Vector2<f64> {
        self.scale * (Rotation2::new(self.rotation_rad) * point) + self.translation
    }

    /// Transform a point from the robot frame into the fleet frame.
    pub fn inverse_point(&self, point: &Vector2<f64>) -> Vector2<f64> {
        Rotation2::new(-self.rotation_rad) * ((point - self.translation) / self.scale)
    }

    /// Transform a location from the fleet frame into the robot frame.
    ///
    /// The yaw is rotated along with the position and wrapped back into [-pi, pi]. The level name
    /// passes through untouched.
    pub fn forward(&self, location: &Location) -> Location {
        let p = self.forward_point(&Vector2::new(location.x, location.y));
        Location {
            level_name: location.level_name.clone(),
            x: p[0],
            y: p[1],
            yaw_rad: wrap_to_pi(location.yaw_rad + self.rotation_rad)
        }
    }

    /// Transform a location from the robot frame into the fleet frame.
    pub fn inverse(&self, location: &Location) -> Location {
        let p = self.inverse_point(&Vector2::new(location.x, location.y));
        Location {
            level_name: location.level_name.clone(),
            x: p[0],
            y: p[1],
            yaw_rad: wrap_to_pi(location.yaw_rad - self.rotation_rad)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const PI: f64 = std::f64::consts::PI;

    fn params(scale: f64, rotation_rad: f64, tx: f64, ty: f64) -> TransformParams {
        TransformParams {
            scale,
            rotation_rad,
            translation_x_m: tx,
            translation_y_m: ty
        }
    }

    #[test]
    fn test_rejects_non_positive_scale() {
        assert!(CoordinateTransform::new(&params(0.0, 0.0, 0.0, 0.0)).is_err());
        assert!(CoordinateTransform::new(&params(-2.0, 0.0, 0.0, 0.0)).is_err());
        assert!(CoordinateTransform::new(&params(0.5, 0.0, 0.0, 0.0)).is_ok());
    }

    #[test]
    fn test_identity_passes_through() {
        let transform = CoordinateTransform::identity();
        let location = Location::new("ground", 3.2, -1.5, 0.7);

        assert_eq!(transform.forward(&location), location);
        assert_eq!(transform.inverse(&location), location);
    }

    #[test]
    fn test_known_quarter_turn() {
        // Scale 2, quarter turn, translation (1, 0): (1, 0) -> 2 * (0, 1) + (1, 0) = (1, 2)
        let transform =
            CoordinateTransform::new(&params(2.0, PI / 2.0, 1.0, 0.0)).unwrap();

        let p = transform.forward_point(&Vector2::new(1.0, 0.0));
        assert!((p[0] - 1.0).abs() < 1e-9);
        assert!((p[1] - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_round_trip() {
        let transform =
            CoordinateTransform::new(&params(1.7, 0.4, -4.2, 9.1)).unwrap();

        let points = [
            Vector2::new(0.0, 0.0),
            Vector2::new(12.3, -45.6),
            Vector2::new(-0.001, 1e6)
        ];

        for p in points.iter() {
            let round_tripped = transform.inverse_point(&transform.forward_point(p));
            assert!((round_tripped - p).norm() <= 1e-9);
        }
    }

    #[test]
    fn test_round_trip_location_yaw() {
        let transform =
            CoordinateTransform::new(&params(1.0, 2.9, 3.0, -2.0)).unwrap();

        let location = Location::new("upper", 5.0, 6.0, -2.8);
        let round_tripped = transform.inverse(&transform.forward(&location));

        assert!((round_tripped.x - location.x).abs() <= 1e-9);
        assert!((round_tripped.y - location.y).abs() <= 1e-9);
        assert!((round_tripped.yaw_rad - location.yaw_rad).abs() <= 1e-9);
        assert_eq!(round_tripped.level_name, location.level_name);
    }
}
