//! Backend abstraction layer
//!
//! Provides common traits and types that the dummy and wgpu backends implement.

pub mod dummy;
pub mod traits;
pub mod types;

#[cfg(feature = "wgpu-backend")]
pub mod wgpu_backend;

pub use dummy::{Command, DrawRecord, DummyBackend};
pub use traits::*;
pub use types::*;

#[cfg(feature = "wgpu-backend")]
pub use wgpu_backend::WgpuBackend;
