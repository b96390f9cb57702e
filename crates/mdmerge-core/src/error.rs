use std::fmt;

use crate::event::EventKind;

/// Machine-readable error codes for scripted callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    EmptyInput,
    TooFewDimensions,
    DimensionMismatch,
    EventKindMismatch,
    InvalidController,
    InvalidExtents,
    UnknownWorkspace,
    DuplicateInput,
    TooManyExperimentInfos,
    MortonOverflow,
    ShapeMismatch,
    CorruptTree,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::EmptyInput => "E1001",
            Self::TooFewDimensions => "E1002",
            Self::DimensionMismatch => "E1003",
            Self::EventKindMismatch => "E1004",
            Self::InvalidController => "E1005",
            Self::InvalidExtents => "E1006",
            Self::UnknownWorkspace => "E2001",
            Self::DuplicateInput => "E2002",
            Self::TooManyExperimentInfos => "E2003",
            Self::MortonOverflow => "E3001",
            Self::ShapeMismatch => "E9001",
            Self::CorruptTree => "E9002",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::EmptyInput => "No input workspaces",
            Self::TooFewDimensions => "Too few dimensions",
            Self::DimensionMismatch => "Input dimensions disagree",
            Self::EventKindMismatch => "Event representation mismatch",
            Self::InvalidController => "Invalid box controller",
            Self::InvalidExtents => "Invalid dimension extents",
            Self::UnknownWorkspace => "Workspace not found",
            Self::DuplicateInput => "Workspace listed twice",
            Self::TooManyExperimentInfos => "Run index space exhausted",
            Self::MortonOverflow => "Morton index overflow",
            Self::ShapeMismatch => "Tree shape mismatch",
            Self::CorruptTree => "Corrupt box tree",
        }
    }

    /// Optional remediation hint that can be surfaced to operators.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::EmptyInput => Some("Pass at least one input workspace."),
            Self::TooFewDimensions => Some("Only workspaces with 2 or more dimensions can be merged."),
            Self::DimensionMismatch => {
                Some("All inputs must have the same number, names and order of dimensions.")
            }
            Self::EventKindMismatch => {
                Some("Merge full-event and lean-event workspaces separately.")
            }
            Self::InvalidController => {
                Some("split_into needs one factor >= 1 per dimension and a non-trivial grid.")
            }
            Self::InvalidExtents => Some("Each dimension needs finite bounds with min < max."),
            Self::UnknownWorkspace => None,
            Self::DuplicateInput => Some("List each workspace (or group member) once."),
            Self::TooManyExperimentInfos => {
                Some("Merge in smaller batches; run indices are limited to 65536 entries.")
            }
            Self::MortonOverflow => Some("Reduce the dimensionality or the bits per dimension."),
            Self::ShapeMismatch | Self::CorruptTree => {
                Some("This is a bug in the caller or the engine; report it with logs.")
            }
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Every failure the merge engine can report.
///
/// Configuration errors are returned before any tree is touched. Shape and
/// corruption errors abort the merge as soon as they are detected.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MergeError {
    #[error("no input workspaces to merge")]
    EmptyInput,

    #[error("cannot merge workspaces with fewer than 2 dimensions (got {n_dims})")]
    TooFewDimensions { n_dims: usize },

    #[error("workspace {workspace} has {actual} dimensions, expected {expected}")]
    DimensionCountMismatch {
        workspace: String,
        expected: usize,
        actual: usize,
    },

    #[error("workspace {workspace} dimension {index} is named {actual:?}, expected {expected:?}")]
    DimensionNameMismatch {
        workspace: String,
        index: usize,
        expected: String,
        actual: String,
    },

    #[error("workspace {workspace} holds {actual:?} events, expected {expected:?}")]
    EventKindMismatch {
        workspace: String,
        expected: EventKind,
        actual: EventKind,
    },

    #[error("invalid box controller: {0}")]
    InvalidController(String),

    #[error("invalid extents for dimension {dim}: [{min}, {max}]")]
    InvalidExtents { dim: usize, min: f32, max: f32 },

    #[error("workspace not found: {0}")]
    UnknownWorkspace(String),

    #[error("workspace listed more than once: {0}")]
    DuplicateInput(String),

    #[error("inputs carry {total} experiment infos; run indices hold at most {limit}")]
    TooManyExperimentInfos { total: usize, limit: usize },

    #[error("morton index needs {needed} bits, only {available} available")]
    MortonOverflow { needed: u32, available: u32 },

    #[error("tree shape mismatch: expected {expected}-dimensional data, found {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("corrupt box tree: {0}")]
    CorruptTree(String),
}

impl MergeError {
    /// Machine-readable code associated with this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::EmptyInput => ErrorCode::EmptyInput,
            Self::TooFewDimensions { .. } => ErrorCode::TooFewDimensions,
            Self::DimensionCountMismatch { .. } | Self::DimensionNameMismatch { .. } => {
                ErrorCode::DimensionMismatch
            }
            Self::EventKindMismatch { .. } => ErrorCode::EventKindMismatch,
            Self::InvalidController(_) => ErrorCode::InvalidController,
            Self::InvalidExtents { .. } => ErrorCode::InvalidExtents,
            Self::UnknownWorkspace(_) => ErrorCode::UnknownWorkspace,
            Self::DuplicateInput(_) => ErrorCode::DuplicateInput,
            Self::TooManyExperimentInfos { .. } => ErrorCode::TooManyExperimentInfos,
            Self::MortonOverflow { .. } => ErrorCode::MortonOverflow,
            Self::ShapeMismatch { .. } => ErrorCode::ShapeMismatch,
            Self::CorruptTree(_) => ErrorCode::CorruptTree,
        }
    }

    /// Optional remediation hint for operators.
    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }

    /// True for errors raised while validating inputs, before any merge work.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        !matches!(
            self,
            Self::ShapeMismatch { .. } | Self::CorruptTree(_) | Self::MortonOverflow { .. }
        )
    }
}
