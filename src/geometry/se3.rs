//! Rigid body transform used for keyframe poses and map frames.

use nalgebra::{Isometry3, Matrix4, Translation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// Rigid transform: rotation followed by translation.
///
/// Keyframe poses are stored camera to world (T_wc):
/// `p_world = pose.transform_point(&p_cam)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SE3 {
    pub rotation: UnitQuaternion<f64>,
    pub translation: Vector3<f64>,
}

impl SE3 {
    pub fn new(rotation: UnitQuaternion<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    pub fn identity() -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
            translation: Vector3::zeros(),
        }
    }

    pub fn from_translation(translation: Vector3<f64>) -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
            translation,
        }
    }

    /// Inverse transform.
    pub fn inverse(&self) -> Self {
        let rotation = self.rotation.inverse();
        Self {
            rotation,
            translation: -(rotation * self.translation),
        }
    }

    /// Composition `self * other`: apply `other` first, then `self`.
    pub fn compose(&self, other: &SE3) -> Self {
        Self {
            rotation: self.rotation * other.rotation,
            translation: self.rotation * other.translation + self.translation,
        }
    }

    pub fn transform_point(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * p + self.translation
    }

    pub fn to_isometry(&self) -> Isometry3<f64> {
        Isometry3::from_parts(Translation3::from(self.translation), self.rotation)
    }

    pub fn to_matrix(&self) -> Matrix4<f64> {
        self.to_isometry().to_homogeneous()
    }
}

impl Default for SE3 {
    fn default() -> Self {
        Self::identity()
    }
}

impl std::ops::Mul for SE3 {
    type Output = SE3;

    fn mul(self, rhs: SE3) -> SE3 {
        self.compose(&rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_inverse_roundtrip() {
        let pose = SE3::new(
            UnitQuaternion::from_euler_angles(0.1, -0.4, 1.2),
            Vector3::new(1.0, 2.0, -3.0),
        );
        let p = Vector3::new(0.5, -0.25, 4.0);

        let back = pose.inverse().transform_point(&pose.transform_point(&p));
        assert_relative_eq!(back, p, epsilon = 1e-12);

        let ident = pose.compose(&pose.inverse());
        assert_relative_eq!(ident.translation, Vector3::zeros(), epsilon = 1e-12);
    }

    #[test]
    fn test_compose_matches_matrix_product() {
        let a = SE3::new(
            UnitQuaternion::from_euler_angles(0.3, 0.0, 0.0),
            Vector3::new(1.0, 0.0, 0.0),
        );
        let b = SE3::new(
            UnitQuaternion::from_euler_angles(0.0, 0.2, 0.7),
            Vector3::new(0.0, 1.0, 2.0),
        );
        assert_relative_eq!((a * b).to_matrix(), a.to_matrix() * b.to_matrix(), epsilon = 1e-12);
    }
}
