//! Storage arithmetic and tool-output parsing
//!
//! Everything the Partition Planner decides before touching the disk lives
//! here as pure functions: device naming, free-region discovery, region
//! selection and shrink sizing. `engine::partition` feeds these with real
//! tool output and turns the answers into commands.
//!
//! # Units
//!
//! | Quantity           | Unit                                  |
//! |--------------------|---------------------------------------|
//! | Requested size     | GiB (`f64`, from the request)         |
//! | Region offsets     | MiB, truncated to integers            |
//! | Filesystem shrink  | bytes, always a whole number of MiB   |
//!
//! The partition tool is always driven with explicit `MiB` suffixes, so a
//! "megabyte" here is 1024 × 1024 bytes on both sides of the conversation.

use crate::error::{InstallError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

// ============================================================================
// Constants
// ============================================================================

/// Size handed to sgdisk for the EFI System Partition in Wipe mode
pub const EFI_PARTITION_SIZE: &str = "+512M";

/// GPT type code: EFI System
pub const EFI_TYPE_CODE: &str = "ef00";

/// GPT type code: Linux filesystem
pub const LINUX_TYPE_CODE: &str = "8300";

/// The existing OS must keep at least this much after shrinking
pub const MIN_REMAINING_GB: f64 = 20.0;

const MIB: u64 = 1024 * 1024;

/// `<start> <end> <size> Free Space` as printed by `parted print free`
static FREE_SPACE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*([0-9.]+)(?:MiB|MB)\s+([0-9.]+)(?:MiB|MB)\s+([0-9.]+)(?:MiB|MB)\s+Free Space\s*$",
    )
    .expect("valid regex")
});

static TRAILING_P_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"p(\d+)$").expect("valid regex"));

static TRAILING_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)$").expect("valid regex"));

// ============================================================================
// Device naming
// ============================================================================

/// Generate a partition device path from a disk path and partition number.
///
/// Disks whose name ends in a digit (`nvme0n1`, `mmcblk0`, `loop0`) take a
/// `p` separator: `/dev/nvme0n1` → `/dev/nvme0n1p1`, `/dev/sda` → `/dev/sda1`.
pub fn partition_path(disk: &Path, partition_num: u32) -> PathBuf {
    let disk_str = disk.display().to_string();

    if disk_str.ends_with(|c: char| c.is_ascii_digit()) {
        PathBuf::from(format!("{}p{}", disk_str, partition_num))
    } else {
        PathBuf::from(format!("{}{}", disk_str, partition_num))
    }
}

/// Extract the partition index from a device name or path.
///
/// A trailing `p<digits>` wins over plain trailing digits.
pub fn partition_number(device: &str) -> Result<u32> {
    let captured = TRAILING_P_NUMBER
        .captures(device)
        .or_else(|| TRAILING_NUMBER.captures(device))
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u32>().ok());

    captured.ok_or_else(|| InstallError::UnparseablePartitionPath(device.to_string()))
}

/// The newest partition in `lsblk -ln -o NAME <disk>` output.
///
/// lsblk lists the disk itself first; the last remaining line is the
/// partition just created.
pub fn last_partition_from_lsblk(output: &str, disk: &Path) -> Option<PathBuf> {
    let disk_name = disk
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    output
        .lines()
        .map(str::trim)
        .filter(|name| !name.is_empty() && *name != disk_name)
        .last()
        .map(|name| PathBuf::from(format!("/dev/{}", name)))
}

// ============================================================================
// Free space
// ============================================================================

/// An unallocated span of the partition table, in whole MiB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeRegion {
    pub start_mb: u64,
    pub end_mb: u64,
    pub size_mb: u64,
}

impl FreeRegion {
    pub fn new(start_mb: u64, end_mb: u64, size_mb: u64) -> Self {
        Self {
            start_mb,
            end_mb,
            size_mb,
        }
    }
}

/// Where the new root partition goes inside a free region: `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub start_mb: u64,
    pub end_mb: u64,
}

/// Requested GiB converted to whole MiB, truncating.
pub fn required_mb(target_gb: f64) -> u64 {
    (target_gb * 1024.0) as u64
}

/// Parse every `Free Space` line of `parted unit MiB print free`.
pub fn parse_free_regions(output: &str) -> Vec<FreeRegion> {
    output
        .lines()
        .filter_map(|line| {
            let caps = FREE_SPACE_LINE.captures(line)?;
            let field = |i: usize| -> Option<u64> {
                caps.get(i)?.as_str().parse::<f64>().ok().map(|v| v as u64)
            };
            Some(FreeRegion::new(field(1)?, field(2)?, field(3)?))
        })
        .collect()
}

/// Pick the largest region that can hold `required_mb`.
pub fn select_free_region(regions: &[FreeRegion], required_mb: u64) -> Result<FreeRegion> {
    if regions.is_empty() {
        return Err(InstallError::NoFreeSpaceFound);
    }

    regions
        .iter()
        .filter(|r| r.size_mb >= required_mb)
        .max_by_key(|r| r.size_mb)
        .copied()
        .ok_or(InstallError::InsufficientFreeSpace { required_mb })
}

/// Select a region and place a `target_gb` partition at its start.
pub fn plan_free_space(regions: &[FreeRegion], target_gb: f64) -> Result<Placement> {
    let required = required_mb(target_gb);
    let region = select_free_region(regions, required)?;
    Ok(Placement {
        start_mb: region.start_mb,
        end_mb: region.start_mb + required,
    })
}

// ============================================================================
// Shrinking the existing OS
// ============================================================================

/// How far to shrink the existing partition and how big the new one is.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShrinkPlan {
    /// `existing - requested`, in GiB
    pub shrink_to_gb: f64,
    /// New filesystem size in whole MiB
    pub shrink_to_mb: u64,
    /// Size of the partition created after the shrunk one
    pub new_partition_mb: u64,
}

impl ShrinkPlan {
    /// Filesystem size for the resize tool. A whole number of MiB so the
    /// partition boundary (also in MiB) never cuts into it.
    pub fn shrink_to_bytes(&self) -> u64 {
        self.shrink_to_mb * MIB
    }

    /// Partition table layout given where the existing partition starts.
    pub fn layout(&self, partition_start_mb: u64) -> ShrinkLayout {
        let resize_end_mb = partition_start_mb + self.shrink_to_mb;
        ShrinkLayout {
            resize_end_mb,
            new_partition: Placement {
                start_mb: resize_end_mb,
                end_mb: resize_end_mb + self.new_partition_mb,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShrinkLayout {
    /// New end of the existing partition
    pub resize_end_mb: u64,
    pub new_partition: Placement,
}

/// Decide the shrink for an existing partition of `existing_bytes`.
pub fn plan_shrink(existing_bytes: u64, target_gb: f64) -> Result<ShrinkPlan> {
    let existing_gb = existing_bytes as f64 / (1024.0 * 1024.0 * 1024.0);
    let shrink_to_gb = existing_gb - target_gb;

    if shrink_to_gb < MIN_REMAINING_GB {
        return Err(InstallError::ShrinkTooSmall { shrink_to_gb });
    }

    Ok(ShrinkPlan {
        shrink_to_gb,
        shrink_to_mb: required_mb(shrink_to_gb),
        new_partition_mb: required_mb(target_gb),
    })
}

/// Start offset (MiB, rounded up) of partition `number` in
/// `parted -m unit MiB print` output.
///
/// Machine-readable lines look like `3:16.0MiB:102400MiB:102384MiB:ntfs:...;`.
/// Rounding up keeps the resized partition end at or beyond the shrunk
/// filesystem.
pub fn parse_partition_start(output: &str, number: u32) -> Option<u64> {
    output.lines().find_map(|line| {
        let mut fields = line.trim().split(':');
        let index = fields.next()?.parse::<u32>().ok()?;
        if index != number {
            return None;
        }
        let start = fields.next()?;
        let start = start.trim_end_matches("MiB").trim_end_matches("MB");
        start.parse::<f64>().ok().map(|v| v.ceil() as u64)
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const GIB: u64 = 1024 * 1024 * 1024;

    #[test]
    fn test_partition_path_sda() {
        assert_eq!(partition_path(Path::new("/dev/sda"), 1), PathBuf::from("/dev/sda1"));
        assert_eq!(partition_path(Path::new("/dev/sda"), 2), PathBuf::from("/dev/sda2"));
    }

    #[test]
    fn test_partition_path_nvme_and_mmc() {
        assert_eq!(
            partition_path(Path::new("/dev/nvme0n1"), 1),
            PathBuf::from("/dev/nvme0n1p1")
        );
        assert_eq!(
            partition_path(Path::new("/dev/nvme0n1"), 2),
            PathBuf::from("/dev/nvme0n1p2")
        );
        assert_eq!(
            partition_path(Path::new("/dev/mmcblk0"), 2),
            PathBuf::from("/dev/mmcblk0p2")
        );
    }

    #[test]
    fn test_partition_number_patterns() {
        assert_eq!(partition_number("/dev/nvme0n1p3").ok(), Some(3));
        assert_eq!(partition_number("sda4").ok(), Some(4));
        assert_eq!(partition_number("/dev/mmcblk0p12").ok(), Some(12));

        let err = partition_number("/dev/sdx").expect_err("no digits"); // test: expected error
        assert_eq!(err.kind(), ErrorKind::UnparseablePartitionPath);
    }

    #[test]
    fn test_last_partition_skips_disk_line() {
        let output = "sda\nsda1\nsda2\nsda3\n";
        assert_eq!(
            last_partition_from_lsblk(output, Path::new("/dev/sda")),
            Some(PathBuf::from("/dev/sda3"))
        );
        assert_eq!(last_partition_from_lsblk("nvme0n1\n", Path::new("/dev/nvme0n1")), None);
        assert_eq!(last_partition_from_lsblk("", Path::new("/dev/sda")), None);
    }

    #[test]
    fn test_parse_free_regions_from_parted() {
        let output = "\
Model: ATA Samsung SSD (scsi)
Disk /dev/sda: 476940MiB
Partition Table: gpt

Number  Start      End        Size       File system  Name  Flags
        0.02MiB    1.00MiB    0.98MiB    Free Space
 1      1.00MiB    513MiB     512MiB     fat32        EFI   boot, esp
 2      513MiB     200513MiB  200000MiB  ntfs
        200513MiB  476940MiB  276427MiB  Free Space
";
        let regions = parse_free_regions(output);
        assert_eq!(
            regions,
            vec![
                FreeRegion::new(0, 1, 0),
                FreeRegion::new(200513, 476940, 276427),
            ]
        );
    }

    #[test]
    fn test_parse_free_regions_accepts_mb_suffix() {
        let regions = parse_free_regions("  1000MB  61000MB  60000MB  Free Space\n");
        assert_eq!(regions, vec![FreeRegion::new(1000, 61000, 60000)]);
    }

    #[test]
    fn test_no_regions_is_no_free_space() {
        let err = select_free_region(&[], 1).expect_err("empty"); // test: expected error
        assert_eq!(err.kind(), ErrorKind::NoFreeSpaceFound);
    }

    #[test]
    fn test_small_regions_are_rejected() {
        let regions = [FreeRegion::new(0, 100, 100), FreeRegion::new(200, 1000, 800)];
        let err = plan_free_space(&regions, 40.0).expect_err("too small"); // test: expected error
        match err {
            InstallError::InsufficientFreeSpace { required_mb } => assert_eq!(required_mb, 40960),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_large_region_is_selected() {
        let regions = [FreeRegion::new(0, 100, 100), FreeRegion::new(1000, 51000, 50000)];
        let placement = plan_free_space(&regions, 40.0).expect("fits"); // test: 50000 >= 40960
        assert_eq!(placement.start_mb, 1000);
        assert_eq!(placement.end_mb, 1000 + 40960);
    }

    #[test]
    fn test_largest_qualifying_region_wins() {
        let regions = [
            FreeRegion::new(0, 45000, 45000),
            FreeRegion::new(50000, 150000, 100000),
            FreeRegion::new(200000, 260000, 60000),
        ];
        let region = select_free_region(&regions, 40960).expect("fits"); // test: all qualify
        assert_eq!(region.start_mb, 50000);
    }

    #[test]
    fn test_required_mb_truncates() {
        assert_eq!(required_mb(40.0), 40960);
        assert_eq!(required_mb(0.5), 512);
        assert_eq!(required_mb(0.0009), 0);
    }

    #[test]
    fn test_shrink_below_floor_fails() {
        let err = plan_shrink(100 * GIB, 85.0).expect_err("15 < 20"); // test: expected error
        match err {
            InstallError::ShrinkTooSmall { shrink_to_gb } => assert_eq!(shrink_to_gb, 15.0),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_shrink_to_forty() {
        let plan = plan_shrink(100 * GIB, 60.0).expect("40 >= 20"); // test: above floor
        assert_eq!(plan.shrink_to_gb, 40.0);
        assert_eq!(plan.shrink_to_mb, 40960);
        assert_eq!(plan.shrink_to_bytes(), 40 * GIB);
        assert_eq!(plan.new_partition_mb, 61440);
    }

    #[test]
    fn test_shrink_layout_follows_partition_start() {
        let plan = plan_shrink(100 * GIB, 60.0).expect("40 >= 20"); // test: above floor
        let layout = plan.layout(514);
        assert_eq!(layout.resize_end_mb, 514 + 40960);
        assert_eq!(layout.new_partition.start_mb, layout.resize_end_mb);
        assert_eq!(layout.new_partition.end_mb, layout.resize_end_mb + 61440);
    }

    #[test]
    fn test_parse_partition_start_machine_output() {
        let output = "\
BYT;
/dev/sda:476940MiB:scsi:512:512:gpt:ATA Samsung SSD:;
1:1.00MiB:513MiB:512MiB:fat32:EFI:boot, esp;
2:513MiB:529MiB:16.0MiB::Microsoft reserved partition:msftres;
3:528.5MiB:200513MiB:199984MiB:ntfs:Basic data partition:msftdata;
";
        assert_eq!(parse_partition_start(output, 1), Some(1));
        assert_eq!(parse_partition_start(output, 3), Some(529));
        assert_eq!(parse_partition_start(output, 4), None);
    }
}
