//! Merging of multi-dimensional event workspaces backed by box trees.
//!
//! # Conventions
//!
//! - **Errors**: library functions return [`error::MergeError`]; `anyhow` is
//!   used only where configuration files are read.
//! - **Logging**: `tracing` macros; the embedding binary installs the
//!   subscriber.

pub mod collect;
pub mod config;
pub mod error;
pub mod event;
pub mod merge;
pub mod morton;
pub mod timing;
pub mod tree;
pub mod workspace;

pub use config::{MergeConfig, MergeType};
pub use error::{ErrorCode, MergeError};
pub use event::{Event, EventBuffer, EventKind, RunTag};
pub use merge::{
    MergeFailure, MergeOutcome, MergeReport, MergedWorkspace, ProgressSink, merge_all,
    merge_named, merge_workspaces,
};
pub use tree::{BoxController, BoxTree, Extent};
pub use workspace::{Dimension, EventWorkspace, ExperimentInfo, WorkspaceRepository, WorkspaceStore};

/// Fewest dimensions a mergeable workspace may have.
pub const MIN_DIMS: usize = 2;

/// Most dimensions the merge kernels handle; wider inputs are skipped.
pub const MAX_DIMS: usize = 9;

/// Number of distinct run indices a full event can address.
pub const RUN_INDEX_LIMIT: usize = u16::MAX as usize + 1;
