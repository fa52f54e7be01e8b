//! Pre-bootstrap preparation of the live system
//!
//! Handles steps that must complete *before* `pacstrap`:
//! - Enabling the `[multilib]` repository on the running installer, so that
//!   `lib32-*` driver packages resolve
//!
//! # Failure Policy
//!
//! Everything here is **non-fatal**. A live system without multilib can
//! still bootstrap a base install; the worst case is that pacstrap later
//! fails on a `lib32-*` package, and that failure is reported there.

use crate::command_executor::{CommandExecutor, CommandSpec};
use crate::error::Result;
use crate::runner::ProcessRunner;
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

const MULTILIB_DISABLED: &str = "#[multilib]\n#Include";
const MULTILIB_ENABLED: &str = "[multilib]\nInclude";

// ============================================================================
// Multilib Result
// ============================================================================

/// Outcome of the multilib step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MultilibResult {
    /// The section was uncommented and the databases refreshed.
    Enabled,
    /// Nothing to do: no commented-out section in the file.
    Unchanged,
    /// The step failed; installation continues.
    Failed(String),
}

impl fmt::Display for MultilibResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Enabled => write!(f, "Multilib enabled on live system"),
            Self::Unchanged => write!(f, "Multilib left as configured"),
            Self::Failed(err) => write!(f, "Multilib not enabled: {}", err),
        }
    }
}

/// Uncomment the `[multilib]` section, or `None` if there is nothing to do.
pub fn enable_multilib_text(conf: &str) -> Option<String> {
    if !conf.contains(MULTILIB_DISABLED) {
        return None;
    }
    Some(conf.replace(MULTILIB_DISABLED, MULTILIB_ENABLED))
}

/// Enable multilib in the live `pacman.conf` and refresh the databases.
pub fn enable_multilib<E: CommandExecutor>(
    runner: &mut ProcessRunner<E>,
    pacman_conf: &Path,
) -> Result<MultilibResult> {
    let result = match fs::read_to_string(pacman_conf) {
        Err(e) => MultilibResult::Failed(format!("cannot read {}: {}", pacman_conf.display(), e)),
        Ok(conf) => match enable_multilib_text(&conf) {
            None => MultilibResult::Unchanged,
            Some(updated) => match fs::write(pacman_conf, updated) {
                Err(e) => MultilibResult::Failed(format!(
                    "cannot write {}: {}",
                    pacman_conf.display(),
                    e
                )),
                Ok(()) => {
                    let sync = runner.run(
                        &CommandSpec::new("pacman")
                            .args(["-Sy", "--noconfirm"])
                            .best_effort(),
                    )?;
                    if sync.exit_code == 0 {
                        MultilibResult::Enabled
                    } else {
                        MultilibResult::Failed("pacman -Sy failed".to_string())
                    }
                }
            },
        },
    };

    match &result {
        MultilibResult::Failed(reason) => {
            warn!("{}", result);
            runner.note(format!("Note: multilib not enabled ({})", reason));
        }
        MultilibResult::Enabled => runner.note(result.to_string()),
        MultilibResult::Unchanged => info!("{}", result),
    }
    Ok(result)
}
