//! Bootloader stage: GRUB on UEFI, with the bundled theme.
//!
//! Order matters: the theme and `/etc/default/grub` must be in place before
//! `grub-mkconfig` runs, and the UEFI boot order is only touched once the
//! menu exists.
//!
//! Everything after `grub-install` except the defaults rewrite and the final
//! `grub-mkconfig` is best-effort: a missing theme or font only costs looks.

use crate::command_executor::{CommandExecutor, CommandSpec};
use crate::error::{InstallError, Result};
use crate::runner::ProcessRunner;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

/// Theme directory name under `/boot/grub/themes`
pub const THEME_NAME: &str = "archey";

/// Keys owned by the installer in `/etc/default/grub`
pub const MANAGED_GRUB_KEYS: [&str; 4] = [
    "GRUB_THEME=",
    "GRUB_GFXMODE=",
    "GRUB_GFXPAYLOAD_LINUX=",
    "GRUB_DISABLE_OS_PROBER=",
];

/// Files in the theme source that must not be copied
const THEME_SKIP: &[&str] = &["install_theme.sh"];

/// Font family located with `fc-match` for the theme's PF2 fonts
const FONT_FAMILY: &str = "DejaVu Sans Mono";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FontWeight {
    Regular,
    Bold,
}

/// (size, weight, GRUB font name, output file)
const THEME_FONTS: &[(u32, FontWeight, &str, &str)] = &[
    (11, FontWeight::Regular, "Archey 11", "archey-11.pf2"),
    (12, FontWeight::Regular, "Archey 12", "archey-12.pf2"),
    (13, FontWeight::Regular, "Archey 13", "archey-13.pf2"),
    (14, FontWeight::Regular, "Archey 14", "archey-14.pf2"),
    (16, FontWeight::Regular, "Archey Regular 16", "archey-reg-16.pf2"),
    (16, FontWeight::Bold, "Archey Bold 16", "archey-bold-16.pf2"),
    (24, FontWeight::Bold, "Archey Bold 24", "archey-bold-24.pf2"),
];

/// Inputs of the bootloader stage.
#[derive(Debug, Clone)]
pub struct BootloaderSettings {
    /// Where the new root is mounted
    pub mount_root: PathBuf,
    /// Theme directory on the installer medium
    pub theme_source: PathBuf,
    /// `--bootloader-id` for grub-install
    pub bootloader_id: String,
    /// Run os-prober before generating the menu (dual boot)
    pub probe_other_os: bool,
}

/// Install and configure GRUB inside the mounted root.
pub fn install_bootloader<E: CommandExecutor>(
    runner: &mut ProcessRunner<E>,
    settings: &BootloaderSettings,
) -> Result<()> {
    let root = settings.mount_root.display().to_string();

    runner.run(&CommandSpec::new("arch-chroot").args([
        root.clone(),
        "grub-install".to_string(),
        "--target=x86_64-efi".to_string(),
        "--efi-directory=/boot/efi".to_string(),
        format!("--bootloader-id={}", settings.bootloader_id),
        "--recheck".to_string(),
        "--removable".to_string(),
    ]))?;

    let theme_dest = settings
        .mount_root
        .join("boot/grub/themes")
        .join(THEME_NAME);
    if settings.theme_source.is_dir() {
        install_theme(runner, &settings.theme_source, &theme_dest)?;
    } else {
        runner.note(format!(
            "Warning: theme source not found at {}, using the default GRUB look",
            settings.theme_source.display()
        ));
    }

    update_grub_defaults(runner, &settings.mount_root.join("etc/default/grub"))?;

    if settings.probe_other_os {
        runner.run(
            &CommandSpec::new("arch-chroot")
                .args([root.as_str(), "os-prober"])
                .best_effort(),
        )?;
    }

    runner.run(&CommandSpec::new("arch-chroot").args([
        root.as_str(),
        "grub-mkconfig",
        "-o",
        "/boot/grub/grub.cfg",
    ]))?;

    prioritize_boot_entry(runner, &root)?;
    runner.note("GRUB installed");
    Ok(())
}

// ============================================================================
// Theme
// ============================================================================

/// The directory that actually holds `theme.txt`.
///
/// Theme archives often unpack into one extra directory level; when the
/// source has no `theme.txt` but exactly one subdirectory, use that.
pub fn resolve_theme_root(source: &Path) -> io::Result<PathBuf> {
    if source.join("theme.txt").exists() {
        return Ok(source.to_path_buf());
    }

    let mut subdirs = Vec::new();
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            subdirs.push(entry.path());
        }
    }

    match subdirs.as_slice() {
        [only] => Ok(only.clone()),
        _ => Ok(source.to_path_buf()),
    }
}

/// Copy a theme tree into `dest`, replacing whatever was there.
///
/// Returns the number of files copied.
pub fn copy_theme(source: &Path, dest: &Path) -> io::Result<usize> {
    if dest.exists() {
        fs::remove_dir_all(dest)?;
    }
    fs::create_dir_all(dest)?;

    let mut copied = 0;
    let walker = WalkDir::new(source).min_depth(1).into_iter().filter_entry(|e| {
        !(e.depth() == 1
            && e.file_name()
                .to_str()
                .is_some_and(|name| THEME_SKIP.contains(&name)))
    });

    for entry in walker {
        let entry = entry.map_err(io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(io::Error::other)?;
        let target = dest.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }

    Ok(copied)
}

fn install_theme<E: CommandExecutor>(
    runner: &mut ProcessRunner<E>,
    source: &Path,
    dest: &Path,
) -> Result<()> {
    runner.note("Copying GRUB theme...");

    let copied = resolve_theme_root(source).and_then(|actual| {
        if actual != source {
            runner.note(format!("Detected nested theme folder, using {}", actual.display()));
        }
        copy_theme(&actual, dest)
    });

    match copied {
        Ok(count) => runner.note(format!("Copied {} theme files", count)),
        Err(e) => {
            warn!("Theme copy failed: {}", e);
            runner.note(format!("Warning: could not copy GRUB theme ({}), continuing", e));
            return Ok(());
        }
    }

    generate_fonts(runner, dest)
}

/// Render the theme's PF2 fonts from the live system's DejaVu files.
fn generate_fonts<E: CommandExecutor>(runner: &mut ProcessRunner<E>, dest: &Path) -> Result<()> {
    runner.note("Generating GRUB PF2 fonts...");

    let regular = locate_font(runner, "Book")?;
    let Some(regular) = regular else {
        runner.note("Warning: could not find font file, skipping PF2 generation");
        return Ok(());
    };
    let bold = locate_font(runner, "Bold")?.unwrap_or_else(|| regular.clone());

    for (size, weight, name, file) in THEME_FONTS {
        let source = match weight {
            FontWeight::Regular => &regular,
            FontWeight::Bold => &bold,
        };
        runner.run(
            &CommandSpec::new("grub-mkfont")
                .args(["-s".to_string(), size.to_string(), "-n".to_string(), name.to_string()])
                .args(["-o".to_string(), dest.join(file).display().to_string()])
                .arg(source.display().to_string())
                .best_effort(),
        )?;
    }

    runner.note("Fonts generated");
    Ok(())
}

fn locate_font<E: CommandExecutor>(
    runner: &mut ProcessRunner<E>,
    style: &str,
) -> Result<Option<PathBuf>> {
    let found = runner.run(
        &CommandSpec::new("fc-match")
            .arg(format!("{}:style={}", FONT_FAMILY, style))
            .arg("--format=%{file}")
            .stdout_only()
            .best_effort(),
    )?;
    let path = found.output.trim();
    if found.exit_code != 0 || path.is_empty() || !Path::new(path).exists() {
        return Ok(None);
    }
    Ok(Some(PathBuf::from(path)))
}

// ============================================================================
// /etc/default/grub
// ============================================================================

/// Drop the managed keys and append the installer's values.
///
/// Every other line is kept verbatim and in order.
pub fn rewrite_grub_defaults(current: &str) -> String {
    let mut lines: Vec<String> = current
        .lines()
        .filter(|line| !MANAGED_GRUB_KEYS.iter().any(|key| line.starts_with(key)))
        .map(str::to_string)
        .collect();

    lines.push(String::new());
    lines.push(format!("GRUB_THEME=\"/boot/grub/themes/{}/theme.txt\"", THEME_NAME));
    lines.push("GRUB_GFXMODE=\"auto\"".to_string());
    lines.push("GRUB_GFXPAYLOAD_LINUX=\"keep\"".to_string());
    lines.push("GRUB_DISABLE_OS_PROBER=false".to_string());

    let mut text = lines.join("\n");
    text.push('\n');
    text
}

fn update_grub_defaults<E: CommandExecutor>(
    runner: &mut ProcessRunner<E>,
    path: &Path,
) -> Result<()> {
    let current = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            warn!("Cannot read {}: {}", path.display(), e);
            runner.note(format!(
                "Warning: {} not readable ({}), GRUB defaults left untouched",
                path.display(),
                e
            ));
            return Ok(());
        }
    };

    fs::write(path, rewrite_grub_defaults(&current))
        .map_err(|e| InstallError::file_write(path, e))?;
    runner.note("GRUB config updated");
    Ok(())
}

// ============================================================================
// UEFI boot order
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootEntry {
    /// Four hex digits, upper case
    pub id: String,
    /// Label, lower case
    pub label: String,
}

/// `BootOrder:` entries from `efibootmgr` output, upper-cased.
pub fn parse_boot_order(output: &str) -> Option<Vec<String>> {
    output.lines().find_map(|line| {
        let order = line.trim().strip_prefix("BootOrder:")?;
        Some(
            order
                .split(',')
                .map(|id| id.trim().to_uppercase())
                .filter(|id| !id.is_empty())
                .collect(),
        )
    })
}

/// `BootXXXX* Label` lines from `efibootmgr` output.
pub fn parse_boot_entries(output: &str) -> Vec<BootEntry> {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let rest = line.strip_prefix("Boot")?;
            let (head, label) = rest.split_once('*')?;
            if head.len() != 4 || !head.chars().all(|c| c.is_ascii_hexdigit()) {
                return None;
            }
            // Newer efibootmgr appends the device path after a tab
            let label = label.split('\t').next().unwrap_or_default();
            Some(BootEntry {
                id: head.to_uppercase(),
                label: label.trim().to_lowercase(),
            })
        })
        .collect()
}

/// The entry this installer should boot first, if any.
pub fn preferred_entry(entries: &[BootEntry]) -> Option<&BootEntry> {
    entries.iter().find(|e| {
        e.label.contains(THEME_NAME) || e.label.contains("arch linux") || e.label == "arch"
    })
}

/// New boot order with the preferred entry first, or `None` when there is
/// nothing to change.
pub fn prioritized_order(output: &str) -> Option<Vec<String>> {
    let order = parse_boot_order(output).filter(|o| !o.is_empty())?;
    let entries = parse_boot_entries(output);
    let preferred = preferred_entry(&entries)?;

    let mut new_order = vec![preferred.id.clone()];
    new_order.extend(order.into_iter().filter(|id| *id != preferred.id));
    Some(new_order)
}

fn prioritize_boot_entry<E: CommandExecutor>(
    runner: &mut ProcessRunner<E>,
    root: &str,
) -> Result<()> {
    let listing = runner.run(
        &CommandSpec::new("arch-chroot")
            .args([root, "efibootmgr"])
            .stdout_only()
            .best_effort(),
    )?;
    if listing.exit_code != 0 {
        runner.note("Warning: could not read EFI boot entries");
        return Ok(());
    }

    let Some(order) = prioritized_order(&listing.output) else {
        runner.note("Warning: no Archey/Arch EFI entry to prioritize");
        return Ok(());
    };

    let order_str = order.join(",");
    let result = runner.run(
        &CommandSpec::new("arch-chroot")
            .args([root, "efibootmgr", "-o", order_str.as_str()])
            .best_effort(),
    )?;
    if result.exit_code == 0 {
        runner.note(format!("Set EFI BootOrder with {} first: {}", order[0], order_str));
    } else {
        runner.note("Warning: failed to update EFI BootOrder (continuing)");
    }
    Ok(())
}
