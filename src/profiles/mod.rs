//! Package presets: the fixed base set, kernels, drivers and desktops.
//!
//! Package lists live here as Rust constants so that typos show up in tests
//! and every consumer (resolver, request templates, CLI) reads the same
//! source.
//!
//! # Supported Desktops
//!
//! | Profile   | Display Manager |
//! |-----------|-----------------|
//! | Gnome     | gdm             |
//! | Kde       | sddm            |
//! | Xfce      | lightdm         |
//! | Cinnamon  | lightdm         |
//! | Mate      | lightdm         |
//! | I3        | lightdm         |
//! | None      | -               |

use crate::request::DesktopSelection;
use crate::types::{CpuVendor, GpuDriver, Kernel};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Always bootstrapped: core system, bootloader, editors, networking tools.
///
/// The kernel image is not listed here; it comes from [`kernel_packages`].
pub const BASE_PACKAGES: &[&str] = &[
    "base",
    "base-devel",
    "linux-firmware",
    "mkinitcpio",
    "networkmanager",
    "iwd",
    "sudo",
    "nano",
    "vim",
    "git",
    "curl",
    "wget",
    "grub",
    "efibootmgr",
    "os-prober",
    "bash-completion",
    "man-db",
    "man-pages",
];

/// Kernel image and matching headers
pub fn kernel_packages(kernel: Kernel) -> &'static [&'static str] {
    match kernel {
        Kernel::Linux => &["linux", "linux-headers"],
        Kernel::LinuxLts => &["linux-lts", "linux-lts-headers"],
        Kernel::LinuxZen => &["linux-zen", "linux-zen-headers"],
        Kernel::LinuxHardened => &["linux-hardened", "linux-hardened-headers"],
    }
}

/// Microcode for the detected CPU vendor
pub fn cpu_packages(vendor: CpuVendor) -> &'static [&'static str] {
    match vendor {
        CpuVendor::Intel => &["intel-ucode"],
        CpuVendor::Amd => &["amd-ucode"],
        CpuVendor::Unknown => &[],
    }
}

/// Driver stack per GPU preset. `lib32-*` entries need multilib, which the
/// bootstrap stage enables on the live system.
pub fn gpu_packages(driver: GpuDriver) -> &'static [&'static str] {
    match driver {
        GpuDriver::Nvidia => &["nvidia", "nvidia-utils", "nvidia-settings", "lib32-nvidia-utils"],
        GpuDriver::Amd => &[
            "xf86-video-amdgpu",
            "mesa",
            "vulkan-radeon",
            "lib32-mesa",
            "lib32-vulkan-radeon",
        ],
        GpuDriver::Intel => &["xf86-video-intel", "mesa", "vulkan-intel", "lib32-mesa"],
        GpuDriver::Generic => &["xf86-video-vesa", "mesa"],
        GpuDriver::None => &[],
    }
}

/// Desktop presets offered by the request template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DesktopProfile {
    Gnome,
    Kde,
    Xfce,
    Cinnamon,
    Mate,
    I3,
    /// No graphical environment; the desktop stage is skipped
    #[default]
    None,
}

impl DesktopProfile {
    /// Human-readable name shown in the install log
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Gnome => "GNOME",
            Self::Kde => "KDE Plasma",
            Self::Xfce => "XFCE",
            Self::Cinnamon => "Cinnamon",
            Self::Mate => "MATE",
            Self::I3 => "i3 (Tiling WM)",
            Self::None => "No Desktop",
        }
    }

    /// Display manager service enabled after the desktop packages land
    pub fn display_manager(self) -> Option<&'static str> {
        match self {
            Self::Gnome => Some("gdm"),
            Self::Kde => Some("sddm"),
            Self::Xfce | Self::Cinnamon | Self::Mate | Self::I3 => Some("lightdm"),
            Self::None => None,
        }
    }

    /// Packages installed inside the new root by the desktop stage
    pub fn packages(self) -> &'static [&'static str] {
        match self {
            Self::Gnome => &["gnome", "gnome-extra", "gdm"],
            Self::Kde => &["plasma", "kde-applications", "sddm"],
            Self::Xfce => &["xfce4", "xfce4-goodies", "lightdm", "lightdm-gtk-greeter"],
            Self::Cinnamon => &["cinnamon", "lightdm", "lightdm-gtk-greeter"],
            Self::Mate => &["mate", "mate-extra", "lightdm", "lightdm-gtk-greeter"],
            Self::I3 => &[
                "i3-wm",
                "i3status",
                "dmenu",
                "xterm",
                "lightdm",
                "lightdm-gtk-greeter",
            ],
            Self::None => &[],
        }
    }

    /// Expand this preset into the selection carried by an install request.
    pub fn to_selection(self) -> DesktopSelection {
        DesktopSelection {
            name: self.display_name().to_string(),
            display_manager: self.display_manager().map(str::to_string),
            packages: self.packages().iter().map(|p| p.to_string()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_base_packages_have_bootloader_and_network() {
        for pkg in ["base", "grub", "efibootmgr", "networkmanager", "sudo"] {
            assert!(BASE_PACKAGES.contains(&pkg), "missing {pkg}");
        }
    }

    #[test]
    fn test_base_packages_are_unique() {
        let mut sorted = BASE_PACKAGES.to_vec();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), BASE_PACKAGES.len());
    }

    #[test]
    fn test_kernel_packages_include_headers() {
        for kernel in Kernel::iter() {
            let pkgs = kernel_packages(kernel);
            assert_eq!(pkgs.len(), 2);
            assert_eq!(pkgs[1], format!("{}-headers", pkgs[0]));
        }
    }

    #[test]
    fn test_cpu_packages() {
        assert_eq!(cpu_packages(CpuVendor::Intel), &["intel-ucode"]);
        assert_eq!(cpu_packages(CpuVendor::Amd), &["amd-ucode"]);
        assert!(cpu_packages(CpuVendor::Unknown).is_empty());
    }

    #[test]
    fn test_desktop_profiles_ship_their_display_manager() {
        for profile in DesktopProfile::iter() {
            match profile.display_manager() {
                Some(dm) => assert!(
                    profile.packages().contains(&dm),
                    "{profile} does not install {dm}"
                ),
                None => assert!(profile.packages().is_empty()),
            }
        }
    }

    #[test]
    fn test_none_profile_selection_is_empty() {
        let selection = DesktopProfile::None.to_selection();
        assert!(selection.packages.is_empty());
        assert!(selection.display_manager.is_none());
        assert!(!selection.is_installable());
    }

    #[test]
    fn test_kde_selection() {
        let selection = DesktopProfile::Kde.to_selection();
        assert_eq!(selection.name, "KDE Plasma");
        assert_eq!(selection.display_manager.as_deref(), Some("sddm"));
        assert!(selection.packages.contains(&"plasma".to_string()));
        assert!(selection.is_installable());
    }
}
