//! Vector/matrix primitives and triangle-AABB intersection shared by every
//! other `navoctree` crate.

mod aabb;
mod matrix3;
mod vector3;

pub use aabb::{triangle_intersects_aabb, Aabb};
pub use matrix3::Matrix3;
pub use vector3::{cross, dot, Vector3};
