//! Pipeline Orchestrator
//!
//! Drives one install request through every stage, strictly in sequence,
//! on a dedicated worker thread:
//!
//! partition → format → mount → bootstrap → fstab → configure →
//! bootloader → desktop (optional) → cleanup
//!
//! The first hard failure stops the run. Nothing is rolled back, and the
//! cleanup stage only runs after a successful bootloader/desktop stage. A
//! failure after partitioning may leave the disk unbootable.
//!
//! Every run ends with exactly one `InstallEvent::Finished`.

use crate::command_executor::{CommandExecutor, CommandSpec, SystemExecutor};
use crate::engine::partition::{self, PartitionPlan, PartitionSettings};
use crate::error::{InstallError, Result};
use crate::events::{EventSink, InstallEvent, PipelineOutcome};
use crate::install_state::{InstallStage, InstallerContext};
use crate::logic::bootloader::{self, BootloaderSettings};
use crate::logic::preinstall;
use crate::logic::resolver;
use crate::logic::setup_script::SetupScript;
use crate::process_guard::PipelineActiveGuard;
use crate::request::InstallRequest;
use crate::runner::ProcessRunner;
use crate::types::InstallMode;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{error, info};

/// Environment variable overriding the GRUB theme source directory
pub const THEME_DIR_ENV: &str = "ARCHEY_THEME_DIR";

pub const DEFAULT_MOUNT_ROOT: &str = "/mnt";
pub const DEFAULT_PACMAN_CONF: &str = "/etc/pacman.conf";
pub const DEFAULT_THEME_SOURCE: &str = "/usr/local/share/archey-grub";
pub const DEFAULT_BOOTLOADER_ID: &str = "Archey";

const GENFSTAB_TIMEOUT: Duration = Duration::from_secs(10);

/// Setup script location, relative to the new root
const SETUP_SCRIPT: &str = "root/archey_setup.sh";

/// Environment-dependent settings of a run.
#[derive(Debug, Clone)]
pub struct InstallOptions {
    /// Where the new root is mounted
    pub mount_root: PathBuf,
    /// Live system's pacman.conf (multilib is enabled here)
    pub pacman_conf: PathBuf,
    pub theme_source: PathBuf,
    pub bootloader_id: String,
    /// Pause before each partition-table re-read
    pub settle_delay: Duration,
    /// Check that planned devices exist before formatting
    pub verify_block_devices: bool,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self {
            mount_root: PathBuf::from(DEFAULT_MOUNT_ROOT),
            pacman_conf: PathBuf::from(DEFAULT_PACMAN_CONF),
            theme_source: PathBuf::from(DEFAULT_THEME_SOURCE),
            bootloader_id: DEFAULT_BOOTLOADER_ID.to_string(),
            settle_delay: Duration::from_secs(1),
            verify_block_devices: true,
        }
    }
}

impl InstallOptions {
    /// Defaults, with the theme source taken from `ARCHEY_THEME_DIR` if set.
    pub fn from_env() -> Self {
        let mut options = Self::default();
        if let Some(dir) = std::env::var_os(THEME_DIR_ENV).filter(|v| !v.is_empty()) {
            options.theme_source = PathBuf::from(dir);
        }
        options
    }
}

/// Runs the pipeline for one request.
pub struct Installer<E: CommandExecutor> {
    request: InstallRequest,
    options: InstallOptions,
    runner: ProcessRunner<E>,
    context: InstallerContext,
}

impl<E: CommandExecutor> Installer<E> {
    pub fn new(request: InstallRequest, options: InstallOptions, executor: E, events: EventSink) -> Self {
        Self {
            request,
            options,
            runner: ProcessRunner::new(executor, events),
            context: InstallerContext::new(),
        }
    }

    /// Run every stage and report the terminal outcome.
    ///
    /// Constructing an `Installer` is the caller's confirmation that the
    /// target disk may be destroyed.
    pub fn run(mut self) -> PipelineOutcome {
        let _active = PipelineActiveGuard::enter();
        self.context.confirm_destructive_operations();

        info!(
            "Starting installation on {} ({} mode)",
            self.request.disk, self.request.mode
        );

        let outcome = match self.execute() {
            Ok(()) => {
                info!("Installation finished in {}s", self.context.elapsed_secs());
                PipelineOutcome::Succeeded
            }
            Err(e) => {
                // Already terminal only if the failure came from a transition
                let _ = self.context.fail();
                let stage = self
                    .context
                    .failed_at()
                    .unwrap_or_else(|| self.context.current_stage());
                error!("Installation failed during '{}': {}", stage, e);
                self.runner.note(format!(
                    "Stopped during '{}' after {}s ({})",
                    stage,
                    self.context.elapsed_secs(),
                    self.context.stage_trail()
                ));
                PipelineOutcome::Failed(e.to_string())
            }
        };

        self.runner.events().finish(outcome.clone());
        outcome
    }

    fn execute(&mut self) -> Result<()> {
        self.enter(InstallStage::Partitioning)?;
        let plan = partition::partition_disk(
            &mut self.runner,
            &self.request,
            PartitionSettings {
                settle_delay: self.options.settle_delay,
            },
        )?;
        self.runner.note(format!(
            "EFI: {}  Root: {}",
            plan.efi.display(),
            plan.root.display()
        ));
        if self.options.verify_block_devices {
            plan.verify_block_devices()?;
        }

        self.enter(InstallStage::Formatting)?;
        self.format(&plan)?;

        self.enter(InstallStage::Mounting)?;
        self.mount(&plan)?;

        self.enter(InstallStage::Bootstrapping)?;
        self.bootstrap()?;

        self.enter(InstallStage::WritingFstab)?;
        self.write_fstab()?;

        self.enter(InstallStage::Configuring)?;
        self.configure()?;

        self.enter(InstallStage::InstallingBootloader)?;
        bootloader::install_bootloader(
            &mut self.runner,
            &BootloaderSettings {
                mount_root: self.options.mount_root.clone(),
                theme_source: self.options.theme_source.clone(),
                bootloader_id: self.options.bootloader_id.clone(),
                probe_other_os: self.request.mode == InstallMode::DualBoot,
            },
        )?;

        if self.request.desktop.is_installable() {
            self.enter(InstallStage::InstallingDesktop)?;
            self.install_desktop()?;
        }

        self.enter(InstallStage::CleaningUp)?;
        self.cleanup()?;

        self.enter(InstallStage::Succeeded)?;
        Ok(())
    }

    /// Transition and announce the stage's progress checkpoint.
    fn enter(&mut self, stage: InstallStage) -> Result<()> {
        self.context.transition_to(stage)?;

        let message = stage.message();
        let percent = stage.progress_percent();
        info!("[{}%] {}", percent, message);

        let events = self.runner.events();
        events.progress(message, percent);
        events.log(format!("[{}%] {}", percent, message));
        Ok(())
    }

    fn root_str(&self) -> String {
        self.options.mount_root.display().to_string()
    }

    fn format(&mut self, plan: &PartitionPlan) -> Result<()> {
        let root = plan.root.display().to_string();
        self.runner.note(format!("Formatting root {} as ext4", root));
        self.runner.run(&CommandSpec::new("mkfs.ext4").args(["-F", root.as_str()]))?;

        let efi = plan.efi.display().to_string();
        if self.request.mode.formats_efi() {
            self.runner.note(format!("Formatting EFI {} as FAT32", efi));
            self.runner.run(&CommandSpec::new("mkfs.fat").args(["-F32", efi.as_str()]))?;
        } else {
            self.runner.note(format!("Keeping existing EFI filesystem on {}", efi));
        }
        Ok(())
    }

    fn mount(&mut self, plan: &PartitionPlan) -> Result<()> {
        let root_dir = self.options.mount_root.clone();
        let efi_dir = root_dir.join("boot/efi");

        create_dir(&root_dir)?;
        self.runner.run(&CommandSpec::new("mount").args([
            plan.root.display().to_string(),
            root_dir.display().to_string(),
        ]))?;

        create_dir(&efi_dir)?;
        self.runner.run(&CommandSpec::new("mount").args([
            plan.efi.display().to_string(),
            efi_dir.display().to_string(),
        ]))?;
        Ok(())
    }

    fn bootstrap(&mut self) -> Result<()> {
        let packages = resolver::bootstrap_packages(&self.request);

        preinstall::enable_multilib(&mut self.runner, &self.options.pacman_conf)?;

        let root = self.root_str();
        self.runner
            .note(format!("Running pacstrap with {} packages", packages.len()));
        self.runner.run(
            &CommandSpec::new("pacstrap")
                .arg(root)
                .args(packages),
        )?;
        Ok(())
    }

    fn write_fstab(&mut self) -> Result<()> {
        let root = self.root_str();
        let generated = self.runner.run(
            &CommandSpec::new("genfstab")
                .args(["-U".to_string(), root])
                .timeout(GENFSTAB_TIMEOUT)
                .stdout_only(),
        )?;

        let fstab = generated.output.trim();
        if fstab.is_empty() {
            return Err(InstallError::EmptyToolOutput("genfstab".to_string()));
        }

        let path = self.options.mount_root.join("etc/fstab");
        if let Some(parent) = path.parent() {
            create_dir(parent)?;
        }
        fs::write(&path, format!("{}\n", fstab)).map_err(|e| InstallError::file_write(&path, e))?;
        self.runner.note("fstab generated");
        Ok(())
    }

    fn configure(&mut self) -> Result<()> {
        let script = SetupScript::from_request(&self.request).render();
        let host_path = self.options.mount_root.join(SETUP_SCRIPT);

        write_executable(&host_path, &script).map_err(|e| InstallError::file_write(&host_path, e))?;

        let root = self.root_str();
        self.runner.note("Running chroot configuration script");
        let result = self.runner.run(
            &CommandSpec::new("arch-chroot")
                .arg(root)
                .arg(format!("/{}", SETUP_SCRIPT)),
        );

        // The script holds the user's password: remove it whatever happened
        if let Err(e) = fs::remove_file(&host_path) {
            self.runner.note(format!(
                "Warning: could not remove {}: {}",
                host_path.display(),
                e
            ));
        }

        result.map(|_| ())
    }

    fn install_desktop(&mut self) -> Result<()> {
        let desktop = self.request.desktop.clone();
        let root = self.root_str();
        self.runner.note(format!("Installing {}", desktop.name));

        self.runner.run(
            &CommandSpec::new("arch-chroot")
                .arg(root.as_str())
                .args(["pacman", "-S", "--noconfirm"])
                .args(desktop.packages.iter().cloned()),
        )?;

        if let Some(dm) = desktop.display_manager.as_deref().filter(|dm| !dm.is_empty()) {
            self.runner.note(format!("Enabling display manager: {}", dm));
            let enabled = self.runner.run(
                &CommandSpec::new("arch-chroot")
                    .arg(root.as_str())
                    .args(["systemctl", "enable", dm])
                    .best_effort(),
            )?;
            if enabled.exit_code != 0 {
                self.runner.note(format!(
                    "Warning: could not enable {}, it may need to be enabled manually",
                    dm
                ));
            }
        }
        Ok(())
    }

    fn cleanup(&mut self) -> Result<()> {
        let root = self.root_str();
        self.runner.note("Unmounting partitions");
        self.runner.run(&CommandSpec::new("sync").best_effort())?;
        self.runner.run(
            &CommandSpec::new("umount")
                .args(["-R".to_string(), root])
                .best_effort(),
        )?;
        Ok(())
    }
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|e| InstallError::file_write(path, e))
}

/// Write `contents` to a fresh owner-only executable file.
fn write_executable(path: &Path, contents: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o700)
        .open(path)?;
    file.write_all(contents.as_bytes())?;
    file.sync_all()
}

// ============================================================================
// Worker thread
// ============================================================================

const WORKER_PANICKED: &str = "installer thread panicked";

/// A pipeline running on its worker thread.
pub struct InstallHandle {
    /// Progress, log and terminal events, in emission order
    pub events: Receiver<InstallEvent>,
    worker: JoinHandle<PipelineOutcome>,
}

impl InstallHandle {
    /// Wait for the worker to finish.
    pub fn join(self) -> PipelineOutcome {
        self.worker
            .join()
            .unwrap_or_else(|_| PipelineOutcome::Failed(WORKER_PANICKED.to_string()))
    }
}

/// Start the pipeline on a dedicated thread.
///
/// The caller only ever talks to the worker through the returned event
/// receiver.
pub fn spawn_installer<E>(
    request: InstallRequest,
    options: InstallOptions,
    executor: E,
) -> io::Result<InstallHandle>
where
    E: CommandExecutor + 'static,
{
    let (sink, events) = EventSink::channel();
    let worker = thread::Builder::new()
        .name("archey-install".to_string())
        .spawn(move || {
            let terminal = sink.clone();
            let run = panic::catch_unwind(AssertUnwindSafe(|| {
                Installer::new(request, options, executor, sink).run()
            }));
            run.unwrap_or_else(|_| {
                error!("Installer thread panicked");
                let outcome = PipelineOutcome::Failed(WORKER_PANICKED.to_string());
                terminal.finish(outcome.clone());
                outcome
            })
        })?;
    Ok(InstallHandle { events, worker })
}

/// Start the pipeline against the real system.
pub fn spawn_system_installer(
    request: InstallRequest,
    options: InstallOptions,
) -> io::Result<InstallHandle> {
    spawn_installer(request, options, SystemExecutor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = InstallOptions::default();
        assert_eq!(options.mount_root, PathBuf::from("/mnt"));
        assert_eq!(options.pacman_conf, PathBuf::from("/etc/pacman.conf"));
        assert_eq!(options.theme_source, PathBuf::from("/usr/local/share/archey-grub"));
        assert_eq!(options.bootloader_id, "Archey");
        assert_eq!(options.settle_delay, Duration::from_secs(1));
        assert!(options.verify_block_devices);
    }

    #[test]
    fn test_write_executable_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir"); // test: tmp writable
        let path = dir.path().join("root/archey_setup.sh");
        write_executable(&path, "#!/bin/bash\n").expect("write"); // test: tmp writable

        let mode = fs::metadata(&path).expect("metadata").permissions().mode(); // test: just written
        assert_eq!(mode & 0o777, 0o700);
        assert_eq!(fs::read_to_string(&path).expect("read"), "#!/bin/bash\n"); // test: just written
    }
}
