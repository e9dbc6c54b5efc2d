//! Core traits for the DDNS bridge
//!
//! - [`ControlPlane`]: Update a variable and trigger a run on the remote platform

pub mod control_plane;

pub use control_plane::ControlPlane;
