//! Vector type alias for 3D positions and directions.

use nalgebra::Vector3;

/// 3D vector type for positions, normals, and velocity gradients.
///
/// This is a simple alias for `nalgebra::Vector3<f64>`, used throughout
/// the simulation for free-surface point positions and unit normals.
pub type Vec3 = Vector3<f64>;
