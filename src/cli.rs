use crate::installer::{DEFAULT_MOUNT_ROOT, InstallOptions};
use crate::process_guard::DEFAULT_LOCK_PATH;
use crate::profiles::{self, DesktopProfile};
use crate::request::InstallRequest;
use crate::types::{CpuVendor, GpuDriver, InstallMode};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Archey - provision a disk into a bootable Arch Linux system
#[derive(Parser, Debug)]
#[command(name = "archey")]
#[command(about = "Partition, bootstrap and configure an Arch Linux installation")]
#[command(version)]
pub struct Cli {
    /// Where the new root is mounted during installation
    #[arg(long, global = true, default_value = DEFAULT_MOUNT_ROOT)]
    pub mount_root: PathBuf,

    /// GRUB theme directory on the installer medium (overrides ARCHEY_THEME_DIR)
    #[arg(long, global = true)]
    pub theme_dir: Option<PathBuf>,

    /// Single-instance lock file
    #[arg(long, global = true, default_value = DEFAULT_LOCK_PATH, hide = true)]
    pub lock_file: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Install Arch Linux as described by a request file (destroys data)
    Install {
        /// Path to the install request (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Confirm that the target disk may be modified
        #[arg(long)]
        confirm: bool,
    },
    /// Validate a request file
    Validate {
        /// Path to the install request to validate
        config: PathBuf,
    },
    /// Print the package set that would be bootstrapped
    Packages {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Print the chroot setup script (password masked)
    Script {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Write a starter request file
    Template {
        /// Where to write the request
        #[arg(short, long)]
        output: PathBuf,

        /// Target disk, e.g. /dev/nvme0n1
        #[arg(long, default_value = "/dev/sda")]
        disk: String,

        /// Partitioning mode: wipe, freespace, dualboot
        #[arg(long, default_value = "wipe")]
        mode: InstallMode,

        /// Desktop preset: gnome, kde, xfce, cinnamon, mate, i3, none
        #[arg(long, default_value = "none")]
        desktop: DesktopProfile,

        /// GPU driver preset: nvidia, amd, intel, generic, none
        #[arg(long, default_value = "generic")]
        gpu: GpuDriver,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        <Self as clap::Parser>::parse()
    }

    /// Environment defaults with the command-line overrides applied.
    pub fn install_options(&self) -> InstallOptions {
        let mut options = InstallOptions::from_env();
        options.mount_root = self.mount_root.clone();
        if let Some(dir) = &self.theme_dir {
            options.theme_source = dir.clone();
        }
        options
    }
}

/// Starter request for `archey template`.
///
/// Identity fields are left empty on purpose: the file does not validate
/// until the user fills them in.
pub fn template_request(
    disk: &str,
    mode: InstallMode,
    desktop: DesktopProfile,
    gpu: GpuDriver,
    cpu: CpuVendor,
) -> InstallRequest {
    let mut request = InstallRequest {
        disk: disk.to_string(),
        mode,
        desktop: desktop.to_selection(),
        ..InstallRequest::default()
    };
    request.packages.cpu = profiles::cpu_packages(cpu).iter().map(|p| p.to_string()).collect();
    request.packages.gpu = profiles::gpu_packages(gpu).iter().map(|p| p.to_string()).collect();
    request
}
