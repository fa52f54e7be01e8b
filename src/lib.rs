//! Archey Library
//!
//! Turns a validated install request into a bootable Arch Linux system:
//! partition planning, package resolution, setup script rendering and the
//! staged pipeline that drives the external tools.

pub mod cli;
pub mod command_executor;
pub mod engine;
pub mod error;
pub mod events;
pub mod hardware;
pub mod install_state;
pub mod installer;
pub mod logic;
pub mod process_guard;
pub mod profiles;
pub mod request;
pub mod runner;
pub mod sanity;
pub mod types;

// Re-export main types for convenience
pub use command_executor::{CommandExecutor, CommandSpec, RawOutput, SystemExecutor};
pub use error::{ErrorKind, InstallError};
pub use events::{EventSink, InstallEvent, LogLine, PipelineOutcome, ProgressEvent};
pub use install_state::{InstallStage, InstallTransitionError, InstallerContext};
pub use installer::{InstallHandle, InstallOptions, Installer, spawn_installer};
pub use process_guard::{CommandProcessGroup, InstallLock, PipelineActiveGuard};
pub use request::{DesktopSelection, InstallRequest, PackageSelections, PartitionRef};
pub use runner::{CommandOutput, ProcessRunner};
pub use types::{CpuVendor, GpuDriver, InstallMode, Kernel};

// Hardware detection
pub use hardware::{FirmwareMode, HardwareInfo};

// Partition planning
pub use engine::partition::{PartitionPlan, partition_disk};
pub use engine::storage::{FreeRegion, ShrinkPlan};

// Package resolution
pub use logic::resolver::{bootstrap_packages, resolve_packages};
