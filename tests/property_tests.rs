//! Property-Based Tests for Archey
//!
//! These tests verify:
//! - Package resolution keeps first-seen order and never repeats a name
//! - Partition device naming for every disk naming scheme
//! - Free-region selection and shrink arithmetic invariants

use archey::engine::storage::{self, FreeRegion};
use archey::error::ErrorKind;
use archey::logic::resolver::resolve_packages;
use proptest::prelude::*;
use std::collections::HashSet;
use std::path::Path;

// =============================================================================
// Package Set Resolver
// =============================================================================

/// Small alphabet so that lists overlap often
fn package_list() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[a-f]{1,2}", 0..12)
}

proptest! {
    /// No package appears twice in the resolved list
    #[test]
    fn resolved_packages_are_unique(
        base in package_list(),
        cpu in package_list(),
        gpu in package_list(),
        user in package_list(),
        system in package_list(),
        desktop in package_list(),
    ) {
        let resolved = resolve_packages(&base, &cpu, &gpu, &user, &system, &desktop);
        let unique: HashSet<&String> = resolved.iter().collect();
        prop_assert_eq!(unique.len(), resolved.len());

        let again = resolve_packages(&base, &cpu, &gpu, &user, &system, &desktop);
        prop_assert_eq!(again, resolved);
    }

    /// Base packages come first, in their original order
    #[test]
    fn base_order_is_preserved(
        base in package_list(),
        extra in package_list(),
        desktop in package_list(),
    ) {
        let resolved = resolve_packages(&base, &extra, &[], &extra, &[], &desktop);

        let mut seen = HashSet::new();
        let deduped_base: Vec<&String> = base.iter().filter(|p| seen.insert(*p)).collect();
        let prefix: Vec<&String> = resolved.iter().take(deduped_base.len()).collect();
        prop_assert_eq!(prefix, deduped_base);
    }

    /// User and system selections never duplicate desktop packages, unless a
    /// hardware or base source already pulled them in
    #[test]
    fn desktop_packages_are_left_to_the_desktop_stage(
        user in package_list(),
        system in package_list(),
        desktop in package_list(),
    ) {
        let resolved = resolve_packages(&[], &[], &[], &user, &system, &desktop);
        for pkg in &resolved {
            prop_assert!(!desktop.contains(pkg), "{} leaked from desktop", pkg);
        }
    }

    /// Every input package outside the desktop list makes it through
    #[test]
    fn nothing_is_lost(
        base in package_list(),
        cpu in package_list(),
        user in package_list(),
        desktop in package_list(),
    ) {
        let resolved = resolve_packages(&base, &cpu, &[], &user, &[], &desktop);
        for pkg in base.iter().chain(&cpu) {
            prop_assert!(resolved.contains(pkg));
        }
        for pkg in user.iter().filter(|p| !desktop.contains(p)) {
            prop_assert!(resolved.contains(pkg));
        }
    }
}

// =============================================================================
// Partition naming
// =============================================================================

proptest! {
    /// Disks ending in a letter take the number directly
    #[test]
    fn sd_style_partition_path(letter in "[a-z]", n in 1u32..128) {
        let disk = format!("/dev/sd{}", letter);
        let path = storage::partition_path(Path::new(&disk), n);
        prop_assert_eq!(path.display().to_string(), format!("{}{}", disk, n));
    }

    /// Disks ending in a digit take a `p` separator
    #[test]
    fn nvme_style_partition_path(ctrl in 0u32..8, ns in 1u32..8, n in 1u32..128) {
        let disk = format!("/dev/nvme{}n{}", ctrl, ns);
        let path = storage::partition_path(Path::new(&disk), n);
        prop_assert_eq!(path.display().to_string(), format!("{}p{}", disk, n));
    }

    /// The number read back from a generated path is the one put in
    #[test]
    fn partition_number_reads_back(
        disk in prop_oneof![
            Just("/dev/sda"),
            Just("/dev/vdb"),
            Just("/dev/nvme0n1"),
            Just("/dev/mmcblk0"),
        ],
        n in 1u32..128,
    ) {
        let path = storage::partition_path(Path::new(disk), n);
        let parsed = storage::partition_number(&path.display().to_string());
        prop_assert_eq!(parsed.ok(), Some(n));
    }
}

// =============================================================================
// Free space and shrinking
// =============================================================================

fn regions() -> impl Strategy<Value = Vec<FreeRegion>> {
    prop::collection::vec(
        (0u64..1_000_000, 1u64..500_000).prop_map(|(start, size)| {
            FreeRegion::new(start, start + size, size)
        }),
        0..6,
    )
}

proptest! {
    /// The chosen region fits and no fitting region is larger
    #[test]
    fn selected_region_is_largest_fit(regions in regions(), required in 1u64..400_000) {
        match storage::select_free_region(&regions, required) {
            Ok(chosen) => {
                prop_assert!(chosen.size_mb >= required);
                prop_assert!(regions.iter().all(|r| r.size_mb <= chosen.size_mb));
            }
            Err(e) if regions.is_empty() => {
                prop_assert_eq!(e.kind(), ErrorKind::NoFreeSpaceFound);
            }
            Err(e) => {
                prop_assert_eq!(e.kind(), ErrorKind::InsufficientFreeSpace);
                prop_assert!(regions.iter().all(|r| r.size_mb < required));
            }
        }
    }

    /// A placement stays inside the region it came from
    #[test]
    fn placement_fits_region(regions in regions(), target_gb in 1.0f64..300.0) {
        if let Ok(placement) = storage::plan_free_space(&regions, target_gb) {
            let host = regions
                .iter()
                .find(|r| r.start_mb == placement.start_mb && r.size_mb >= storage::required_mb(target_gb));
            prop_assert!(host.is_some());
            let host = host.expect("checked above"); // test: asserted is_some
            prop_assert!(placement.end_mb <= host.end_mb);
        }
    }

    /// Shrinking keeps at least the minimum, and the new layout never
    /// overlaps the shrunk partition
    #[test]
    fn shrink_layout_is_consistent(
        existing_gb in 1u64..4096,
        target_gb in 1.0f64..2048.0,
        start_mb in 1u64..1_000_000,
    ) {
        let bytes = existing_gb * 1024 * 1024 * 1024;
        match storage::plan_shrink(bytes, target_gb) {
            Ok(plan) => {
                prop_assert!(plan.shrink_to_gb >= storage::MIN_REMAINING_GB);
                prop_assert_eq!(plan.shrink_to_bytes() % (1024 * 1024), 0);
                prop_assert!(plan.shrink_to_bytes() <= bytes);

                let layout = plan.layout(start_mb);
                prop_assert_eq!(layout.resize_end_mb, start_mb + plan.shrink_to_mb);
                prop_assert_eq!(layout.new_partition.start_mb, layout.resize_end_mb);
                prop_assert_eq!(
                    layout.new_partition.end_mb - layout.new_partition.start_mb,
                    storage::required_mb(target_gb)
                );
            }
            Err(e) => {
                prop_assert_eq!(e.kind(), ErrorKind::ShrinkTooSmall);
                prop_assert!((existing_gb as f64) - target_gb < storage::MIN_REMAINING_GB);
            }
        }
    }
}
