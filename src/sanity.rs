//! Pre-flight sanity checks for the runtime environment
//!
//! Verified before the pipeline is allowed to touch a disk:
//! - Required runtime binaries are present
//! - Running with root privileges (EUID 0)
//! - Booted in UEFI mode
//!
//! `ntfsresize` is only required when the request shrinks an existing OS.

use crate::hardware::{self, FirmwareMode};
use crate::process_guard::CommandProcessGroup;
use crate::types::InstallMode;
use std::process::{Command, Stdio};
use tracing::{debug, info};

/// Result of environment verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanityCheckResult {
    pub missing_binaries: Vec<String>,
    pub is_root: bool,
    pub firmware: FirmwareMode,
}

impl SanityCheckResult {
    /// Returns true if all checks passed
    pub fn is_ok(&self) -> bool {
        self.problems().is_empty()
    }

    /// One human-readable line per failed check.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if !self.is_root {
            problems.push(
                "Root privileges required to partition disks and install packages".to_string(),
            );
        }
        if !self.firmware.is_uefi() {
            problems.push("System was not booted in UEFI mode".to_string());
        }
        for binary in &self.missing_binaries {
            problems.push(format!(
                "Missing binary '{}' (install: pacman -S {})",
                binary,
                package_for_binary(binary)
            ));
        }
        problems
    }
}

/// Required runtime binaries for every install
const REQUIRED_BINARIES: &[&str] = &[
    "wipefs",      // Signature removal before a fresh layout
    "sgdisk",      // GPT layout for Wipe
    "parted",      // Partition table edits
    "partprobe",   // Partition table re-read
    "lsblk",       // Block device listing
    "mkfs.ext4",   // Root filesystem
    "mkfs.fat",    // EFI filesystem
    "mount",
    "umount",
    "pacstrap",    // Base system bootstrap
    "genfstab",    // fstab generation
    "arch-chroot", // Isolated-root execution
];

/// Needed only for DualBoot
const DUALBOOT_BINARIES: &[&str] = &["ntfsresize"];

/// Check if a binary is available in PATH
fn binary_exists(name: &str) -> bool {
    Command::new("which")
        .arg(name)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .in_new_process_group()
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

fn is_running_as_root() -> bool {
    nix::unistd::geteuid().is_root()
}

/// Binaries an install in `mode` will call
pub fn required_binaries(mode: InstallMode) -> Vec<&'static str> {
    let mut binaries = REQUIRED_BINARIES.to_vec();
    if mode == InstallMode::DualBoot {
        binaries.extend_from_slice(DUALBOOT_BINARIES);
    }
    binaries
}

/// Perform all sanity checks for an install in `mode`.
pub fn verify_environment(mode: InstallMode) -> SanityCheckResult {
    debug!("Running pre-flight sanity checks for {} mode", mode);

    let missing_binaries = required_binaries(mode)
        .into_iter()
        .filter(|binary| !binary_exists(binary))
        .map(str::to_string)
        .collect();

    SanityCheckResult {
        missing_binaries,
        is_root: is_running_as_root(),
        firmware: hardware::detect_firmware_mode(),
    }
}

/// Run the checks and fail with every problem listed.
pub fn run_preflight_checks(mode: InstallMode) -> anyhow::Result<()> {
    let result = verify_environment(mode);
    let problems = result.problems();
    if !problems.is_empty() {
        anyhow::bail!("Pre-flight checks failed:\n  - {}", problems.join("\n  - "));
    }

    info!("Pre-flight checks passed");
    Ok(())
}

/// Map binary names to their Arch Linux package names
fn package_for_binary(binary: &str) -> &'static str {
    match binary {
        "parted" | "partprobe" => "parted",
        "sgdisk" => "gptfdisk",
        "wipefs" | "lsblk" | "mount" | "umount" => "util-linux",
        "mkfs.ext4" => "e2fsprogs",
        "mkfs.fat" => "dosfstools",
        "pacstrap" | "genfstab" | "arch-chroot" => "arch-install-scripts",
        "ntfsresize" => "ntfs-3g",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_exists_sh() {
        assert!(binary_exists("sh"), "sh should be available");
    }

    #[test]
    fn test_binary_exists_nonexistent() {
        assert!(!binary_exists("this_binary_definitely_does_not_exist_12345"));
    }

    #[test]
    fn test_dualboot_needs_ntfsresize() {
        assert!(!required_binaries(InstallMode::Wipe).contains(&"ntfsresize"));
        assert!(!required_binaries(InstallMode::FreeSpace).contains(&"ntfsresize"));
        assert!(required_binaries(InstallMode::DualBoot).contains(&"ntfsresize"));
    }

    #[test]
    fn test_package_mapping() {
        assert_eq!(package_for_binary("arch-chroot"), "arch-install-scripts");
        assert_eq!(package_for_binary("mkfs.fat"), "dosfstools");
        assert_eq!(package_for_binary("ntfsresize"), "ntfs-3g");
        for binary in required_binaries(InstallMode::DualBoot) {
            assert_ne!(package_for_binary(binary), "unknown", "{} unmapped", binary);
        }
    }

    #[test]
    fn test_sanity_result_problems() {
        let ok = SanityCheckResult {
            missing_binaries: vec![],
            is_root: true,
            firmware: FirmwareMode::Uefi,
        };
        assert!(ok.is_ok());

        let broken = SanityCheckResult {
            missing_binaries: vec!["pacstrap".to_string()],
            is_root: false,
            firmware: FirmwareMode::Bios,
        };
        let problems = broken.problems();
        assert_eq!(problems.len(), 3);
        assert!(problems[2].contains("arch-install-scripts"));
        assert!(!broken.is_ok());
    }
}
