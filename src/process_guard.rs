//! Process lifecycle guards for a destructive, non-cancellable install
//!
//! # Problem Solved
//! Once `wipefs`/`sgdisk` have touched the disk there is no safe point to
//! stop. A stray Ctrl+C, or a second installer instance pointed at the same
//! disk, turns a recoverable situation into a corrupted one.
//!
//! # Solution
//! - Every child runs in its own process group, so a timed-out tool can be
//!   killed together with everything it spawned
//! - SIGINT/SIGTERM/SIGHUP exit normally before the pipeline starts and are
//!   refused (logged, ignored) while it runs
//! - An exclusive `flock` on a well-known lock file keeps a second instance
//!   from starting

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// Default location of the single-instance lock
pub const DEFAULT_LOCK_PATH: &str = "/run/archey.lock";

/// Set while a pipeline is between its first and its terminal event
static PIPELINE_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Returns true while an install pipeline is running in this process.
pub fn pipeline_active() -> bool {
    PIPELINE_ACTIVE.load(Ordering::SeqCst)
}

/// RAII marker for a running pipeline.
///
/// Interrupt signals are refused for as long as one of these is alive.
pub struct PipelineActiveGuard {
    _private: (),
}

impl PipelineActiveGuard {
    pub fn enter() -> Self {
        PIPELINE_ACTIVE.store(true, Ordering::SeqCst);
        Self { _private: () }
    }
}

impl Drop for PipelineActiveGuard {
    fn drop(&mut self) {
        PIPELINE_ACTIVE.store(false, Ordering::SeqCst);
    }
}

/// Install handlers for SIGINT (Ctrl+C), SIGTERM and SIGHUP.
/// Call this once at program start.
pub fn init_signal_handlers() -> Result<(), std::io::Error> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;
    use std::thread;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;

    thread::Builder::new()
        .name("archey-signals".to_string())
        .spawn(move || {
            for sig in signals.forever() {
                let signal_name = match sig {
                    SIGINT => "SIGINT",
                    SIGTERM => "SIGTERM",
                    SIGHUP => "SIGHUP",
                    _ => "UNKNOWN",
                };

                if pipeline_active() {
                    tracing::warn!(
                        "Received {}, but the installation cannot be interrupted once the disk has been touched",
                        signal_name
                    );
                    continue;
                }

                tracing::info!("Received {} signal, exiting", signal_name);
                std::process::exit(128 + sig);
            }
        })?;

    Ok(())
}

/// Extension trait for std::process::Command to set up process groups
pub trait CommandProcessGroup {
    /// Run the command as the leader of a new process group (PGID = child PID)
    fn in_new_process_group(&mut self) -> &mut Self;
}

impl CommandProcessGroup for std::process::Command {
    fn in_new_process_group(&mut self) -> &mut Self {
        use std::os::unix::process::CommandExt;
        self.process_group(0)
    }
}

/// SIGKILL an entire process group led by `pgid`.
pub fn kill_process_group(pgid: u32) -> Result<(), Errno> {
    let raw = i32::try_from(pgid).map_err(|_| Errno::ESRCH)?;
    signal::killpg(Pid::from_raw(raw), Signal::SIGKILL)
}

/// Exclusive single-instance lock; released when dropped.
pub struct InstallLock {
    _lock: Flock<File>,
    path: PathBuf,
}

impl InstallLock {
    /// Try to take the lock without blocking.
    pub fn acquire(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|e| anyhow::anyhow!("Failed to open lock file {:?}: {}", path, e))?;

        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => {
                tracing::debug!("Acquired install lock {:?}", path);
                Ok(Self {
                    _lock: lock,
                    path: path.to_path_buf(),
                })
            }
            Err((_, errno)) if errno == Errno::EWOULDBLOCK => anyhow::bail!(
                "Another installer instance holds {:?}; refusing to share the target disk",
                path
            ),
            Err((_, errno)) => anyhow::bail!("Failed to lock {:?}: {}", path, errno),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
