//! Error handling for the install pipeline
//!
//! Every stage returns `Result<T, InstallError>`. The orchestrator treats all
//! variants as fatal to the current run: the first one aborts the pipeline and
//! its `Display` text becomes the terminal failure message, unchanged.
//!
//! Best-effort steps never construct these errors; they log a note instead.

use crate::install_state::InstallTransitionError;
use std::path::PathBuf;
use strum::Display;
use thiserror::Error;

/// Upper bound on the command output carried inside a `CommandFailure`.
pub const FAILURE_OUTPUT_LIMIT: usize = 700;

/// Main error type for the installer core
#[derive(Error, Debug)]
pub enum InstallError {
    /// The requested partitioning mode is not one of wipe/freespace/dualboot
    #[error("Unknown install mode: {0}")]
    UnknownMode(String),

    /// FreeSpace and DualBoot both reuse an existing EFI System Partition
    #[error("No EFI partition found. Cannot install in {mode} mode without one.")]
    MissingEfiPartition { mode: String },

    /// DualBoot needs the existing Windows partition to shrink
    #[error("No Windows partition found for dualboot.")]
    MissingWindowsPartition,

    /// The partition tool reported no free regions at all
    #[error("Could not find any free space on disk.")]
    NoFreeSpaceFound,

    /// Free regions exist but none is large enough
    #[error("No free region large enough (need {required_mb} MB).")]
    InsufficientFreeSpace { required_mb: u64 },

    /// Shrinking the existing OS would leave it below the policy floor
    #[error("Shrinking Windows to {shrink_to_gb:.1} GB is too small. Please allocate less space for Arch.")]
    ShrinkTooSmall { shrink_to_gb: f64 },

    /// No partition number could be extracted from a device path
    #[error("Could not parse partition number from {0}")]
    UnparseablePartitionPath(String),

    /// A planned device path does not exist as a block device
    #[error("Expected block device {} does not exist", .0.display())]
    MissingBlockDevice(PathBuf),

    /// The partition read back after `mkpart` is not the one just created
    #[error("{} does not start at {expected_mb} MiB; refusing to format it", device.display())]
    UnexpectedNewPartition { device: PathBuf, expected_mb: u64 },

    /// An external command exited non-zero or terminated abnormally
    #[error("Command failed (exit {exit_code}):\n  {command}\n{output}")]
    CommandFailure {
        exit_code: i32,
        command: String,
        output: String,
    },

    /// A tool whose output is required produced nothing usable
    #[error("{0} produced empty output.")]
    EmptyToolOutput(String),

    /// A file in the target root (or the live system) could not be written
    #[error("Could not write {}: {source}", path.display())]
    FileWriteFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The install request failed validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// The pipeline tried to run a stage out of order
    #[error("Invalid stage transition: {0}")]
    InvalidTransition(#[from] InstallTransitionError),
}

/// Fieldless classification of `InstallError`, for callers that branch on
/// the kind of failure rather than its message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum ErrorKind {
    UnknownMode,
    MissingEfiPartition,
    MissingWindowsPartition,
    NoFreeSpaceFound,
    InsufficientFreeSpace,
    ShrinkTooSmall,
    UnparseablePartitionPath,
    MissingBlockDevice,
    UnexpectedNewPartition,
    CommandFailure,
    EmptyToolOutput,
    FileWriteFailure,
    Validation,
    InvalidTransition,
}

/// Result type alias for installer operations
pub type Result<T> = std::result::Result<T, InstallError>;

impl InstallError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownMode(_) => ErrorKind::UnknownMode,
            Self::MissingEfiPartition { .. } => ErrorKind::MissingEfiPartition,
            Self::MissingWindowsPartition => ErrorKind::MissingWindowsPartition,
            Self::NoFreeSpaceFound => ErrorKind::NoFreeSpaceFound,
            Self::InsufficientFreeSpace { .. } => ErrorKind::InsufficientFreeSpace,
            Self::ShrinkTooSmall { .. } => ErrorKind::ShrinkTooSmall,
            Self::UnparseablePartitionPath(_) => ErrorKind::UnparseablePartitionPath,
            Self::MissingBlockDevice(_) => ErrorKind::MissingBlockDevice,
            Self::UnexpectedNewPartition { .. } => ErrorKind::UnexpectedNewPartition,
            Self::CommandFailure { .. } => ErrorKind::CommandFailure,
            Self::EmptyToolOutput(_) => ErrorKind::EmptyToolOutput,
            Self::FileWriteFailure { .. } => ErrorKind::FileWriteFailure,
            Self::Validation(_) => ErrorKind::Validation,
            Self::InvalidTransition(_) => ErrorKind::InvalidTransition,
        }
    }

    /// Build a `CommandFailure`, keeping only the tail of the output.
    pub fn command_failure(exit_code: i32, command: impl Into<String>, output: &str) -> Self {
        Self::CommandFailure {
            exit_code,
            command: command.into(),
            output: output_tail(output, FAILURE_OUTPUT_LIMIT).to_string(),
        }
    }

    /// Create a file write error
    pub fn file_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileWriteFailure {
            path: path.into(),
            source,
        }
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

/// Return at most the last `limit` bytes of `text`, never splitting a char.
pub fn output_tail(text: &str, limit: usize) -> &str {
    if text.len() <= limit {
        return text;
    }
    let mut start = text.len() - limit;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}
