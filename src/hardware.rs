//! Hardware environment detection
//!
//! Detects firmware mode (UEFI vs BIOS) and the CPU vendor by reading sysfs
//! and procfs directly. No shelling out.
//!
//! # Design
//!
//! - **Safe defaults**: anything ambiguous logs a warning and falls back to
//!   `Bios` / `CpuVendor::Unknown`
//! - **No `unwrap()`**: detection never panics
//!
//! The installer only produces UEFI systems, so preflight refuses to run on
//! a BIOS boot. The CPU vendor picks the microcode package written into
//! request templates.

use crate::types::CpuVendor;
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

const EFI_SYSFS: &str = "/sys/firmware/efi";
const CPUINFO: &str = "/proc/cpuinfo";

/// Detected firmware mode of the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FirmwareMode {
    /// UEFI firmware: GPT, EFI system partition, GRUB x86_64-efi
    Uefi,
    /// Legacy BIOS firmware, not supported by the pipeline
    Bios,
}

impl FirmwareMode {
    pub fn is_uefi(self) -> bool {
        matches!(self, Self::Uefi)
    }
}

impl fmt::Display for FirmwareMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uefi => write!(f, "UEFI"),
            Self::Bios => write!(f, "BIOS"),
        }
    }
}

/// Aggregated detection results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HardwareInfo {
    pub firmware: FirmwareMode,
    pub cpu: CpuVendor,
}

impl HardwareInfo {
    pub fn detect() -> Self {
        let firmware = detect_firmware_mode();
        let cpu = detect_cpu_vendor();
        info!("Hardware detection: firmware={}, cpu={}", firmware, cpu);
        Self { firmware, cpu }
    }
}

impl fmt::Display for HardwareInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Firmware: {}, CPU: {}", self.firmware, self.cpu)
    }
}

// ============================================================================
// Detection Functions
// ============================================================================

/// The kernel exposes `/sys/firmware/efi` only when booted in UEFI mode.
pub fn detect_firmware_mode() -> FirmwareMode {
    firmware_mode_at(Path::new(EFI_SYSFS))
}

fn firmware_mode_at(efi_path: &Path) -> FirmwareMode {
    if efi_path.is_dir() {
        info!("UEFI firmware detected ({} exists)", efi_path.display());
        FirmwareMode::Uefi
    } else {
        info!("BIOS firmware detected ({} not found)", efi_path.display());
        FirmwareMode::Bios
    }
}

/// Read the CPU vendor from `/proc/cpuinfo`.
pub fn detect_cpu_vendor() -> CpuVendor {
    match fs::read_to_string(CPUINFO) {
        Ok(cpuinfo) => parse_cpu_vendor(&cpuinfo),
        Err(e) => {
            warn!("Cannot read {}: {}", CPUINFO, e);
            CpuVendor::Unknown
        }
    }
}

/// Vendor from the first `vendor_id` line of cpuinfo text.
pub fn parse_cpu_vendor(cpuinfo: &str) -> CpuVendor {
    let vendor = cpuinfo.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        (key.trim() == "vendor_id").then(|| value.trim())
    });

    match vendor {
        Some("GenuineIntel") => CpuVendor::Intel,
        Some("AuthenticAMD") => CpuVendor::Amd,
        other => {
            warn!("Unrecognised CPU vendor: {:?}", other);
            CpuVendor::Unknown
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
