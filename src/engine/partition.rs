//! Partition Planner: executes one of the three partitioning strategies.
//!
//! | Mode      | EFI partition            | Root partition                     |
//! |-----------|--------------------------|------------------------------------|
//! | Wipe      | created as partition 1   | partition 2, rest of the disk      |
//! | FreeSpace | reused from the request  | new, in the largest fitting region |
//! | DualBoot  | reused from the request  | new, right after the shrunk OS     |
//!
//! The sizing decisions come from `engine::storage`; this module only issues
//! the commands and reads back what the kernel ended up creating.

use crate::command_executor::{CommandExecutor, CommandSpec};
use crate::engine::storage::{
    self, EFI_PARTITION_SIZE, EFI_TYPE_CODE, LINUX_TYPE_CODE, Placement,
};
use crate::error::{InstallError, Result};
use crate::request::{InstallRequest, PartitionRef};
use crate::runner::ProcessRunner;
use crate::types::InstallMode;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

const PARTED_TIMEOUT: Duration = Duration::from_secs(10);
const LSBLK_TIMEOUT: Duration = Duration::from_secs(5);

/// Resolved devices for the format and mount stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionPlan {
    pub efi: PathBuf,
    pub root: PathBuf,
}

impl PartitionPlan {
    /// Both devices must exist as block devices before anything is formatted.
    pub fn verify_block_devices(&self) -> Result<()> {
        for device in [&self.efi, &self.root] {
            let is_block = std::fs::metadata(device)
                .map(|m| m.file_type().is_block_device())
                .unwrap_or(false);
            if !is_block {
                return Err(InstallError::MissingBlockDevice(device.clone()));
            }
        }
        Ok(())
    }
}

/// Knobs that differ between a live run and a test run.
#[derive(Debug, Clone, Copy)]
pub struct PartitionSettings {
    /// Pause before asking the kernel to re-read the partition table
    pub settle_delay: Duration,
}

/// Partition `request.disk` according to `request.mode`.
pub fn partition_disk<E: CommandExecutor>(
    runner: &mut ProcessRunner<E>,
    request: &InstallRequest,
    settings: PartitionSettings,
) -> Result<PartitionPlan> {
    let disk = request.disk_path();
    match request.mode {
        InstallMode::Wipe => wipe(runner, &disk, settings),
        InstallMode::FreeSpace => {
            let efi = require_efi(request)?;
            use_free_space(runner, &disk, efi, request.target_size_gb, settings)
        }
        InstallMode::DualBoot => {
            let efi = require_efi(request)?;
            let windows = request
                .windows_partition
                .as_ref()
                .ok_or(InstallError::MissingWindowsPartition)?;
            dual_boot(runner, &disk, efi, windows, request.target_size_gb, settings)
        }
    }
}

fn require_efi(request: &InstallRequest) -> Result<&PartitionRef> {
    request
        .efi_partition
        .as_ref()
        .ok_or_else(|| InstallError::MissingEfiPartition {
            mode: request.mode.to_string(),
        })
}

fn wipe<E: CommandExecutor>(
    runner: &mut ProcessRunner<E>,
    disk: &Path,
    settings: PartitionSettings,
) -> Result<PartitionPlan> {
    let disk_str = disk.display().to_string();
    runner.note(format!("Wiping {} and creating a fresh GPT layout", disk_str));

    runner.run(&CommandSpec::new("wipefs").args(["-a", &disk_str]))?;
    runner.run(&CommandSpec::new("sgdisk").args(["--zap-all", &disk_str]))?;
    runner.run(&CommandSpec::new("sgdisk").args([
        "-n".to_string(),
        format!("1:0:{}", EFI_PARTITION_SIZE),
        "-t".to_string(),
        format!("1:{}", EFI_TYPE_CODE),
        "-c".to_string(),
        "1:EFI".to_string(),
        "-n".to_string(),
        "2:0:0".to_string(),
        "-t".to_string(),
        format!("2:{}", LINUX_TYPE_CODE),
        "-c".to_string(),
        "2:root".to_string(),
        disk_str.clone(),
    ]))?;
    reread_partition_table(runner, disk, settings)?;

    Ok(PartitionPlan {
        efi: storage::partition_path(disk, 1),
        root: storage::partition_path(disk, 2),
    })
}

fn use_free_space<E: CommandExecutor>(
    runner: &mut ProcessRunner<E>,
    disk: &Path,
    efi: &PartitionRef,
    target_gb: f64,
    settings: PartitionSettings,
) -> Result<PartitionPlan> {
    let disk_str = disk.display().to_string();
    runner.note(format!(
        "Reusing existing EFI partition {} (it will not be reformatted)",
        efi.device_path().display()
    ));

    let printed = runner.run(
        &CommandSpec::new("parted")
            .args(["-s", &disk_str, "unit", "MiB", "print", "free"])
            .timeout(PARTED_TIMEOUT)
            .stdout_only(),
    )?;
    let regions = storage::parse_free_regions(&printed.output);
    let placement = storage::plan_free_space(&regions, target_gb)?;
    runner.note(format!(
        "Creating root partition at {}MiB-{}MiB",
        placement.start_mb, placement.end_mb
    ));

    make_partition(runner, &disk_str, placement)?;
    reread_partition_table(runner, disk, settings)?;

    Ok(PartitionPlan {
        efi: efi.device_path(),
        root: created_partition(runner, disk, placement)?,
    })
}

fn dual_boot<E: CommandExecutor>(
    runner: &mut ProcessRunner<E>,
    disk: &Path,
    efi: &PartitionRef,
    windows: &PartitionRef,
    target_gb: f64,
    settings: PartitionSettings,
) -> Result<PartitionPlan> {
    let disk_str = disk.display().to_string();
    let windows_dev = windows.device_path();
    runner.note(format!(
        "Reusing existing EFI partition {} (it will not be reformatted)",
        efi.device_path().display()
    ));

    let plan = storage::plan_shrink(windows.size_bytes, target_gb)?;
    let number = storage::partition_number(&windows.name)?;
    runner.note(format!(
        "Shrinking {} to {:.1} GB",
        windows_dev.display(),
        plan.shrink_to_gb
    ));

    let start_mb = partition_start(runner, &disk_str, number)?.ok_or_else(|| {
        InstallError::EmptyToolOutput(format!("parted print (partition {})", number))
    })?;
    let layout = plan.layout(start_mb);

    runner.run(&CommandSpec::new("ntfsresize").args([
        "--force".to_string(),
        "--size".to_string(),
        plan.shrink_to_bytes().to_string(),
        windows_dev.display().to_string(),
    ]))?;

    runner.run(&CommandSpec::new("parted").args([
        "-s".to_string(),
        disk_str.clone(),
        "resizepart".to_string(),
        number.to_string(),
        format!("{}MiB", layout.resize_end_mb),
    ]))?;
    reread_partition_table(runner, disk, settings)?;

    make_partition(runner, &disk_str, layout.new_partition)?;
    reread_partition_table(runner, disk, settings)?;

    Ok(PartitionPlan {
        efi: efi.device_path(),
        root: created_partition(runner, disk, layout.new_partition)?,
    })
}

fn make_partition<E: CommandExecutor>(
    runner: &mut ProcessRunner<E>,
    disk: &str,
    placement: Placement,
) -> Result<()> {
    runner.run(&CommandSpec::new("parted").args([
        "-s".to_string(),
        disk.to_string(),
        "mkpart".to_string(),
        "primary".to_string(),
        "ext4".to_string(),
        format!("{}MiB", placement.start_mb),
        format!("{}MiB", placement.end_mb),
    ]))?;
    Ok(())
}

fn reread_partition_table<E: CommandExecutor>(
    runner: &mut ProcessRunner<E>,
    disk: &Path,
    settings: PartitionSettings,
) -> Result<()> {
    if !settings.settle_delay.is_zero() {
        thread::sleep(settings.settle_delay);
    }
    runner.run(&CommandSpec::new("partprobe").arg(disk.display().to_string()))?;
    Ok(())
}

/// Start of partition `number` in MiB, from `parted -m` output.
fn partition_start<E: CommandExecutor>(
    runner: &mut ProcessRunner<E>,
    disk: &str,
    number: u32,
) -> Result<Option<u64>> {
    let printed = runner.run(
        &CommandSpec::new("parted")
            .args(["-s", "-m", disk, "unit", "MiB", "print"])
            .timeout(PARTED_TIMEOUT)
            .stdout_only(),
    )?;
    Ok(storage::parse_partition_start(&printed.output, number))
}

/// The newest lsblk entry, checked against where `mkpart` put the partition.
///
/// A partition filling a gap can get a lower number than an existing one, in
/// which case the last lsblk line is an older partition.
fn created_partition<E: CommandExecutor>(
    runner: &mut ProcessRunner<E>,
    disk: &Path,
    placement: Placement,
) -> Result<PathBuf> {
    let device = newest_partition(runner, disk)?;
    let number = storage::partition_number(&device.display().to_string())?;
    let start = partition_start(runner, &disk.display().to_string(), number)?;

    // parted rounds the printed start; allow one MiB either way
    match start {
        Some(start) if start.abs_diff(placement.start_mb) <= 1 => Ok(device),
        _ => Err(InstallError::UnexpectedNewPartition {
            device,
            expected_mb: placement.start_mb,
        }),
    }
}

fn newest_partition<E: CommandExecutor>(
    runner: &mut ProcessRunner<E>,
    disk: &Path,
) -> Result<PathBuf> {
    let listing = runner.run(
        &CommandSpec::new("lsblk")
            .args(["-ln", "-o", "NAME"])
            .arg(disk.display().to_string())
            .timeout(LSBLK_TIMEOUT)
            .stdout_only(),
    )?;
    storage::last_partition_from_lsblk(&listing.output, disk)
        .ok_or_else(|| InstallError::EmptyToolOutput("lsblk".to_string()))
}
