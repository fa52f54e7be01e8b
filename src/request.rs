//! The install request: the single immutable input to the pipeline.
//!
//! A request is assembled once (by a wizard, a template, or by hand), saved
//! as JSON, validated, and then handed to the installer by reference. No
//! stage mutates it.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::InstallError;
use crate::types::{InstallMode, Kernel};

/// An existing partition picked upstream (EFI System Partition or the
/// Windows partition to shrink).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionRef {
    /// Kernel name (`sda1`, `nvme0n1p3`) or full path (`/dev/sda1`)
    pub name: String,
    /// Partition size in bytes, as reported by `lsblk -b`
    #[serde(default)]
    pub size_bytes: u64,
}

impl PartitionRef {
    pub fn new(name: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            name: name.into(),
            size_bytes,
        }
    }

    /// Device node for this partition
    pub fn device_path(&self) -> PathBuf {
        if self.name.starts_with("/dev/") {
            PathBuf::from(&self.name)
        } else {
            PathBuf::from(format!("/dev/{}", self.name))
        }
    }
}

/// Desktop environment chosen for the new system.
///
/// Its packages are installed by a dedicated stage after the bootloader, so
/// the base bootstrap must not install them a second time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesktopSelection {
    pub name: String,
    /// Display manager service to enable (best-effort)
    #[serde(default)]
    pub display_manager: Option<String>,
    #[serde(default)]
    pub packages: Vec<String>,
}

impl DesktopSelection {
    /// The desktop stage runs only when there is something to install.
    pub fn is_installable(&self) -> bool {
        !self.packages.is_empty()
    }
}

/// Package selections gathered upstream
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSelections {
    /// CPU microcode
    #[serde(default)]
    pub cpu: Vec<String>,
    /// GPU driver stack
    #[serde(default)]
    pub gpu: Vec<String>,
    /// Packages the user searched for and picked
    #[serde(default)]
    pub user: Vec<String>,
    /// Packages backing the selected system services
    #[serde(default)]
    pub system: Vec<String>,
}

/// Everything the pipeline needs to turn a disk into an installed system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallRequest {
    // Locale & Time
    pub locale: String,
    pub timezone: String,
    pub keymap: String,

    // Disk
    /// Target disk device path, e.g. `/dev/nvme0n1`
    pub disk: String,
    pub mode: InstallMode,
    #[serde(default)]
    pub efi_partition: Option<PartitionRef>,
    #[serde(default)]
    pub windows_partition: Option<PartitionRef>,
    /// Size of the new root partition in GiB (FreeSpace/DualBoot)
    pub target_size_gb: f64,

    // Identity
    pub hostname: String,
    pub username: String,
    pub password: String,
    #[serde(default = "default_shell")]
    pub shell: String,

    // Software
    #[serde(default)]
    pub kernel: Kernel,
    #[serde(default)]
    pub desktop: DesktopSelection,
    #[serde(default)]
    pub packages: PackageSelections,
    /// Extra systemd units to enable inside the new root
    #[serde(default)]
    pub services: Vec<String>,
}

fn default_shell() -> String {
    "/bin/bash".to_string()
}

impl Default for InstallRequest {
    fn default() -> Self {
        Self {
            locale: "en_US.UTF-8".to_string(),
            timezone: "UTC".to_string(),
            keymap: "us".to_string(),
            disk: String::new(),
            mode: InstallMode::Wipe,
            efi_partition: None,
            windows_partition: None,
            target_size_gb: 40.0,
            hostname: String::new(),
            username: String::new(),
            password: String::new(),
            shell: default_shell(),
            kernel: Kernel::Linux,
            desktop: DesktopSelection::default(),
            packages: PackageSelections::default(),
            services: Vec::new(),
        }
    }
}

impl InstallRequest {
    /// Save request to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .context("Failed to serialize install request to JSON")?;

        fs::write(&path, json)
            .with_context(|| format!("Failed to write install request to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Load request from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read install request from {:?}", path.as_ref()))?;

        let request: Self =
            serde_json::from_str(&content).context("Failed to parse install request JSON")?;

        Ok(request)
    }

    /// Target disk as a path
    pub fn disk_path(&self) -> PathBuf {
        PathBuf::from(&self.disk)
    }

    /// Validate field formats.
    ///
    /// Partition requirements of each mode are checked by the planner at run
    /// time; this only rejects values that would break the generated script
    /// or the command lines.
    pub fn validate(&self) -> Result<(), InstallError> {
        let disk = self.disk.trim();
        if disk.is_empty() {
            return Err(InstallError::validation("Install disk must be specified"));
        }
        if !disk.starts_with("/dev/") {
            return Err(InstallError::validation(format!(
                "Invalid disk path '{}': must start with /dev/",
                disk
            )));
        }

        validate_hostname(&self.hostname)?;
        validate_username(&self.username)?;

        if self.password.is_empty() {
            return Err(InstallError::validation("User password must be specified"));
        }
        if self.password.contains(['\n', '\r']) {
            return Err(InstallError::validation("User password cannot contain newlines"));
        }

        for (field, value) in [
            ("Locale", &self.locale),
            ("Timezone", &self.timezone),
            ("Keymap", &self.keymap),
            ("Shell", &self.shell),
        ] {
            validate_token(field, value)?;
        }

        if !self.target_size_gb.is_finite() || self.target_size_gb <= 0.0 {
            return Err(InstallError::validation(
                "Target size must be a positive number of GiB",
            ));
        }

        let named_lists = [
            ("Service", &self.services),
            ("Package", &self.packages.cpu),
            ("Package", &self.packages.gpu),
            ("Package", &self.packages.user),
            ("Package", &self.packages.system),
            ("Desktop package", &self.desktop.packages),
        ];
        for (field, list) in named_lists {
            for value in list {
                validate_token(field, value)?;
            }
        }
        if let Some(dm) = &self.desktop.display_manager {
            validate_token("Display manager", dm)?;
        }

        Ok(())
    }
}

/// Hostname: 1-63 chars, letters/digits/hyphens, no leading or trailing hyphen
fn validate_hostname(hostname: &str) -> Result<(), InstallError> {
    if hostname.is_empty() {
        return Err(InstallError::validation("Hostname must be specified"));
    }
    if hostname.len() > 63 {
        return Err(InstallError::validation("Hostname must be at most 63 characters long"));
    }
    if hostname.starts_with('-') || hostname.ends_with('-') {
        return Err(InstallError::validation(
            "Hostname cannot start or end with a hyphen",
        ));
    }
    if !hostname.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(InstallError::validation(
            "Hostname can only contain letters, numbers, and hyphens",
        ));
    }
    Ok(())
}

/// Username: 1-32 chars, `[a-z_][a-z0-9_-]*`
fn validate_username(username: &str) -> Result<(), InstallError> {
    if username.is_empty() {
        return Err(InstallError::validation("Username must be specified"));
    }
    if username.len() > 32 {
        return Err(InstallError::validation("Username must be at most 32 characters long"));
    }
    if let Some(first_char) = username.chars().next() {
        if !(first_char.is_ascii_lowercase() || first_char == '_') {
            return Err(InstallError::validation(
                "Username must start with a lowercase letter or underscore",
            ));
        }
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
    {
        return Err(InstallError::validation(
            "Username can only contain lowercase letters, numbers, underscores, and hyphens",
        ));
    }
    Ok(())
}

/// Non-empty, no whitespace, no shell quoting characters
fn validate_token(field: &str, value: &str) -> Result<(), InstallError> {
    if value.is_empty() {
        return Err(InstallError::validation(format!("{} must be specified", field)));
    }
    if value
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, '"' | '\'' | '`' | '$' | '\\' | ';'))
    {
        return Err(InstallError::validation(format!(
            "{} '{}' contains whitespace or shell metacharacters",
            field, value
        )));
    }
    Ok(())
}
