//! Source images consumed by the environment generator

mod hdr;

pub use hdr::*;
