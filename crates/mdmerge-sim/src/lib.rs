//! Deterministic generators for mdmerge workspaces and merge scenarios.
//!
//! # Conventions
//!
//! - **Errors**: `anyhow::Result` for return types.
//! - **Logging**: `tracing` macros.

pub mod rng;
pub mod strategies;
pub mod workload;

pub use rng::DeterministicRng;
pub use workload::{Distribution, Scenario, WorkspaceRecipe};
