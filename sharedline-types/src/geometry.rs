//! Geometry primitives in anchor-local space.

use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Mul, Sub};

/// A 3D position or direction.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Point3 {
    pub const ZERO: Point3 = Point3 { x: 0.0, y: 0.0, z: 0.0 };

    #[must_use]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    #[must_use]
    pub fn dot(&self, other: &Point3) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    #[must_use]
    pub fn cross(&self, other: &Point3) -> Point3 {
        Point3 {
            x: self.y * other.z - self.z * other.y,
            y: self.z * other.x - self.x * other.z,
            z: self.x * other.y - self.y * other.x,
        }
    }

    #[must_use]
    pub fn length(&self) -> f32 {
        self.dot(self).sqrt()
    }

    /// Euclidean distance to another point.
    #[must_use]
    pub fn distance(&self, other: &Point3) -> f32 {
        (*self - *other).length()
    }

    /// Unsigned angle in radians between two direction vectors,
    /// `|atan2(|a x b|, a . b)|`. Zero-length inputs yield 0.
    #[must_use]
    pub fn angle_to(&self, other: &Point3) -> f32 {
        let cross = self.cross(other).length();
        cross.atan2(self.dot(other)).abs()
    }
}

impl Add for Point3 {
    type Output = Point3;

    fn add(self, rhs: Point3) -> Point3 {
        Point3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl AddAssign for Point3 {
    fn add_assign(&mut self, rhs: Point3) {
        *self = *self + rhs;
    }
}

impl Sub for Point3 {
    type Output = Point3;

    fn sub(self, rhs: Point3) -> Point3 {
        Point3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f32> for Point3 {
    type Output = Point3;

    fn mul(self, factor: f32) -> Point3 {
        Point3::new(self.x * factor, self.y * factor, self.z * factor)
    }
}

/// A rigid transform as a column-major 4x4 matrix.
///
/// The anchor-resolution service hands these back for resolved anchors;
/// stroke records only ever use the translation column.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnchorTransform {
    pub columns: [[f32; 4]; 4],
}

impl AnchorTransform {
    pub const IDENTITY: AnchorTransform = AnchorTransform {
        columns: [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ],
    };

    #[must_use]
    pub fn from_translation(t: Point3) -> Self {
        let mut transform = Self::IDENTITY;
        transform.columns[3] = [t.x, t.y, t.z, 1.0];
        transform
    }

    #[must_use]
    pub fn translation(&self) -> Point3 {
        let c = self.columns[3];
        Point3::new(c[0], c[1], c[2])
    }
}

impl Default for AnchorTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}
