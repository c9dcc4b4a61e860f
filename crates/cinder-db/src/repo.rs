//! Repository traits and implementations.

pub mod build;
pub mod memory;

pub use build::{BuildRecord, BuildRepo, NewBuild, PgBuildRepo};
pub use memory::MemoryBuildRepo;
