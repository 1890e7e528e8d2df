//! Core types and utilities

pub mod grid;
pub mod vec3;
pub mod wave;

pub use grid::SurfaceGrid;
pub use vec3::Vec3;
pub use wave::{WaveComponent, WaveMode, WaveState, STANDARD_GRAVITY};
