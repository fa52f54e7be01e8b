//! Type-safe configuration types for the installer
//!
//! Enumerations that appear in the install request. Each serializes to the
//! same lowercase token it parses from, so request files stay readable.

use crate::error::InstallError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use strum::{Display, EnumIter, EnumString};

/// Partitioning strategy for the target disk
///
/// Parsing goes through `InstallMode::parse` so an unrecognised token in a
/// request file surfaces as `UnknownMode` rather than a generic serde error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(try_from = "String", into = "String")]
#[strum(serialize_all = "lowercase")]
pub enum InstallMode {
    /// Destroy everything and lay down a fresh GPT with EFI + root
    #[default]
    Wipe,
    /// Create root in unallocated space, reuse the existing EFI partition
    #[strum(serialize = "freespace")]
    FreeSpace,
    /// Shrink an existing Windows partition and install next to it
    #[strum(serialize = "dualboot")]
    DualBoot,
}

impl InstallMode {
    /// Parse a mode token (`wipe`, `freespace`, `dualboot`).
    pub fn parse(token: &str) -> Result<Self, InstallError> {
        Self::from_str(token.trim()).map_err(|_| InstallError::UnknownMode(token.to_string()))
    }

    /// Only Wipe creates (and therefore formats) its own EFI partition.
    pub fn formats_efi(self) -> bool {
        matches!(self, Self::Wipe)
    }
}

impl TryFrom<String> for InstallMode {
    type Error = InstallError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<InstallMode> for String {
    fn from(mode: InstallMode) -> Self {
        mode.to_string()
    }
}

/// Kernel flavour installed alongside the base system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
pub enum Kernel {
    #[default]
    #[serde(rename = "linux")]
    #[strum(serialize = "linux")]
    Linux,
    #[serde(rename = "linux-lts")]
    #[strum(serialize = "linux-lts")]
    LinuxLts,
    #[serde(rename = "linux-zen")]
    #[strum(serialize = "linux-zen")]
    LinuxZen,
    #[serde(rename = "linux-hardened")]
    #[strum(serialize = "linux-hardened")]
    LinuxHardened,
}

/// Graphics driver preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum GpuDriver {
    Nvidia,
    Amd,
    Intel,
    /// VESA + mesa, for virtual machines and unknown hardware
    #[default]
    Generic,
    None,
}

/// CPU vendor, used to pick microcode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum CpuVendor {
    Intel,
    Amd,
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use strum::IntoEnumIterator;

    #[test]
    fn test_install_mode_tokens() {
        assert_eq!(InstallMode::Wipe.to_string(), "wipe");
        assert_eq!(InstallMode::FreeSpace.to_string(), "freespace");
        assert_eq!(InstallMode::DualBoot.to_string(), "dualboot");
        assert_eq!(InstallMode::from_str("dualboot").ok(), Some(InstallMode::DualBoot));
        assert!(InstallMode::from_str("resize").is_err());
    }

    #[test]
    fn test_install_mode_serde_matches_display() {
        for mode in InstallMode::iter() {
            let json = serde_json::to_string(&mode).expect("serialize"); // test: plain enum
            assert_eq!(json, format!("\"{}\"", mode));
        }
    }

    #[test]
    fn test_unknown_mode_is_reported_by_kind() {
        let err = InstallMode::parse("resize").expect_err("unknown token"); // test: expected error
        assert_eq!(err.kind(), ErrorKind::UnknownMode);
        assert_eq!(err.to_string(), "Unknown install mode: resize");

        let parsed: Result<InstallMode, _> = serde_json::from_str("\"resize\"");
        let msg = parsed.expect_err("unknown token").to_string(); // test: expected error
        assert!(msg.contains("Unknown install mode: resize"));
    }

    #[test]
    fn test_kernel_serde_matches_display() {
        for kernel in Kernel::iter() {
            let json = serde_json::to_string(&kernel).expect("serialize"); // test: plain enum
            assert_eq!(json, format!("\"{}\"", kernel));
        }
    }

    #[test]
    fn test_only_wipe_formats_efi() {
        assert!(InstallMode::Wipe.formats_efi());
        assert!(!InstallMode::FreeSpace.formats_efi());
        assert!(!InstallMode::DualBoot.formats_efi());
    }
}
