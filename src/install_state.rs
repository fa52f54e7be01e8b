//! Install State Machine
//!
//! Authoritative source of truth for where the pipeline is. It enforces
//! valid stage transitions, so a stage can never run out of order and the
//! reported percentage can never go backwards.
//!
//! # Stage Flow
//!
//! ```text
//! NotStarted
//!     ↓
//! Partitioning          5%   (destructive, needs confirmation)
//!     ↓
//! Formatting           15%
//!     ↓
//! Mounting             20%
//!     ↓
//! Bootstrapping        25%
//!     ↓
//! WritingFstab         60%
//!     ↓
//! Configuring          65%
//!     ↓
//! InstallingBootloader 85%
//!     ↓
//! InstallingDesktop    88%   (skipped when no desktop was selected)
//!     ↓
//! CleaningUp           97%
//!     ↓
//! Succeeded           100%
//!
//! (Any non-terminal stage can transition to Failed)
//! ```

use std::fmt;
use thiserror::Error;

/// Pipeline stages in sequential order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum InstallStage {
    NotStarted = 0,
    /// Destructive: rewrites the partition table
    Partitioning = 1,
    Formatting = 2,
    Mounting = 3,
    Bootstrapping = 4,
    WritingFstab = 5,
    Configuring = 6,
    InstallingBootloader = 7,
    /// Optional: only runs when a desktop with packages was selected
    InstallingDesktop = 8,
    CleaningUp = 9,
    /// Terminal
    Succeeded = 10,
    /// Terminal
    Failed = 255,
}

impl InstallStage {
    /// Returns the numeric order of this stage (255 for Failed)
    #[inline]
    pub const fn order(self) -> u8 {
        self as u8
    }

    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    #[inline]
    pub const fn is_destructive(self) -> bool {
        matches!(self, Self::Partitioning)
    }

    /// Stages the pipeline may skip over
    #[inline]
    pub const fn is_optional(self) -> bool {
        matches!(self, Self::InstallingDesktop)
    }

    /// Returns the next stage in the sequence, or None at a terminal state
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::NotStarted => Some(Self::Partitioning),
            Self::Partitioning => Some(Self::Formatting),
            Self::Formatting => Some(Self::Mounting),
            Self::Mounting => Some(Self::Bootstrapping),
            Self::Bootstrapping => Some(Self::WritingFstab),
            Self::WritingFstab => Some(Self::Configuring),
            Self::Configuring => Some(Self::InstallingBootloader),
            Self::InstallingBootloader => Some(Self::InstallingDesktop),
            Self::InstallingDesktop => Some(Self::CleaningUp),
            Self::CleaningUp => Some(Self::Succeeded),
            Self::Succeeded | Self::Failed => None,
        }
    }

    /// Progress message shown when the stage begins
    pub const fn message(self) -> &'static str {
        match self {
            Self::NotStarted => "Not started",
            Self::Partitioning => "Partitioning disk...",
            Self::Formatting => "Formatting partitions...",
            Self::Mounting => "Mounting partitions...",
            Self::Bootstrapping => "Installing base system (this may take a while)...",
            Self::WritingFstab => "Generating fstab...",
            Self::Configuring => "Configuring system...",
            Self::InstallingBootloader => "Installing bootloader...",
            Self::InstallingDesktop => "Installing desktop environment...",
            Self::CleaningUp => "Cleaning up...",
            Self::Succeeded => "Installation complete!",
            Self::Failed => "Installation failed",
        }
    }

    /// Fixed progress checkpoint reported when the stage begins
    pub const fn progress_percent(self) -> u8 {
        match self {
            Self::NotStarted => 0,
            Self::Partitioning => 5,
            Self::Formatting => 15,
            Self::Mounting => 20,
            Self::Bootstrapping => 25,
            Self::WritingFstab => 60,
            Self::Configuring => 65,
            Self::InstallingBootloader => 85,
            Self::InstallingDesktop => 88,
            Self::CleaningUp => 97,
            Self::Succeeded => 100,
            Self::Failed => 0,
        }
    }

    /// Returns all stages in order (excluding Failed)
    pub const fn all_stages() -> &'static [Self] {
        &[
            Self::NotStarted,
            Self::Partitioning,
            Self::Formatting,
            Self::Mounting,
            Self::Bootstrapping,
            Self::WritingFstab,
            Self::Configuring,
            Self::InstallingBootloader,
            Self::InstallingDesktop,
            Self::CleaningUp,
            Self::Succeeded,
        ]
    }
}

impl fmt::Display for InstallStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message().trim_end_matches('.'))
    }
}

/// Errors that can occur during state transitions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InstallTransitionError {
    /// Attempted to skip a mandatory stage
    #[error("Cannot skip from {from} to {to} (must transition through intermediate stages)")]
    SkippedStage {
        from: InstallStage,
        to: InstallStage,
    },

    #[error("Cannot go backwards from {from} to {to} (installation is forward-only)")]
    BackwardTransition {
        from: InstallStage,
        to: InstallStage,
    },

    #[error("Cannot transition from terminal state {from}")]
    FromTerminalState { from: InstallStage },

    /// Attempted a transition that requires confirmation without providing it
    #[error("Stage {stage} requires explicit confirmation (destructive operation)")]
    MissingConfirmation { stage: InstallStage },

    #[error("Already at stage {stage}")]
    AlreadyAtStage { stage: InstallStage },
}

/// Context for tracking pipeline state.
///
/// Owns the current stage and only allows forward transitions; the only
/// stage that may be jumped over is the optional desktop stage.
///
/// # Example
///
/// ```
/// use archey::install_state::{InstallerContext, InstallStage};
///
/// let mut ctx = InstallerContext::new();
/// ctx.confirm_destructive_operations();
/// ctx.transition_to(InstallStage::Partitioning).unwrap();
///
/// // Cannot skip mandatory stages
/// assert!(ctx.transition_to(InstallStage::Mounting).is_err());
/// ```
#[derive(Debug, Clone)]
pub struct InstallerContext {
    current: InstallStage,

    /// Stage at which failure occurred (if any)
    failed_at: Option<InstallStage>,

    /// (stage, unix timestamp) for every transition taken
    stage_history: Vec<(InstallStage, u64)>,

    destructive_confirmed: bool,
}

impl Default for InstallerContext {
    fn default() -> Self {
        Self::new()
    }
}

impl InstallerContext {
    pub fn new() -> Self {
        Self {
            current: InstallStage::NotStarted,
            failed_at: None,
            stage_history: Vec::with_capacity(InstallStage::all_stages().len()),
            destructive_confirmed: false,
        }
    }

    #[inline]
    pub fn current_stage(&self) -> InstallStage {
        self.current
    }

    #[inline]
    pub fn failed_at(&self) -> Option<InstallStage> {
        self.failed_at
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.current == InstallStage::Succeeded
    }

    #[inline]
    pub fn is_failed(&self) -> bool {
        self.current == InstallStage::Failed
    }

    /// Percentage of the most recent non-failed stage
    pub fn progress_percent(&self) -> u8 {
        match self.current {
            InstallStage::Failed => self.failed_at.map_or(0, InstallStage::progress_percent),
            stage => stage.progress_percent(),
        }
    }

    pub fn stage_history(&self) -> &[(InstallStage, u64)] {
        &self.stage_history
    }

    /// Stages entered so far, e.g. `Partitioning disk -> Failed`
    pub fn stage_trail(&self) -> String {
        self.stage_history
            .iter()
            .map(|(stage, _)| stage.to_string())
            .collect::<Vec<_>>()
            .join(" -> ")
    }

    /// Seconds between the first and the latest recorded transition
    pub fn elapsed_secs(&self) -> u64 {
        match (self.stage_history.first(), self.stage_history.last()) {
            (Some((_, first)), Some((_, last))) => last.saturating_sub(*first),
            _ => 0,
        }
    }

    /// Authorize the destructive stage. One-way.
    pub fn confirm_destructive_operations(&mut self) {
        self.destructive_confirmed = true;
    }

    /// Transition to `target`, which must be the next stage, or the one
    /// after it when the next stage is optional.
    ///
    /// # Errors
    ///
    /// - `FromTerminalState` if current is a terminal state
    /// - `AlreadyAtStage` if target is the current stage
    /// - `BackwardTransition` if target is before current
    /// - `SkippedStage` if a mandatory stage would be skipped
    /// - `MissingConfirmation` if entering a destructive stage unconfirmed
    pub fn transition_to(
        &mut self,
        target: InstallStage,
    ) -> Result<InstallStage, InstallTransitionError> {
        if self.current.is_terminal() {
            return Err(InstallTransitionError::FromTerminalState { from: self.current });
        }

        if target == self.current {
            return Err(InstallTransitionError::AlreadyAtStage { stage: target });
        }

        // Failed is reached through fail()
        if target == InstallStage::Failed {
            return Err(InstallTransitionError::SkippedStage {
                from: self.current,
                to: target,
            });
        }

        if target.order() < self.current.order() {
            return Err(InstallTransitionError::BackwardTransition {
                from: self.current,
                to: target,
            });
        }

        let next = self.current.next();
        let allowed = next == Some(target)
            || next.is_some_and(|n| n.is_optional() && n.next() == Some(target));
        if !allowed {
            return Err(InstallTransitionError::SkippedStage {
                from: self.current,
                to: target,
            });
        }

        if target.is_destructive() && !self.destructive_confirmed {
            return Err(InstallTransitionError::MissingConfirmation { stage: target });
        }

        self.record_stage_transition(target);
        self.current = target;

        Ok(target)
    }

    /// Mark the run as failed, remembering where.
    ///
    /// # Errors
    ///
    /// - `FromTerminalState` if already at Succeeded or Failed
    pub fn fail(&mut self) -> Result<(), InstallTransitionError> {
        if self.current.is_terminal() {
            return Err(InstallTransitionError::FromTerminalState { from: self.current });
        }

        self.failed_at = Some(self.current);
        self.record_stage_transition(InstallStage::Failed);
        self.current = InstallStage::Failed;

        Ok(())
    }

    fn record_stage_transition(&mut self, stage: InstallStage) {
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        self.stage_history.push((stage, timestamp));
    }
}
