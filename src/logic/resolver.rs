//! Package Set Resolver
//!
//! Builds the package list handed to the base-system bootstrap.
//!
//! # Resolution Rules
//!
//! | Source          | Rule                                                 |
//! |-----------------|------------------------------------------------------|
//! | base + kernel   | always, in declaration order                         |
//! | CPU / GPU       | always (hardware support is not the desktop's job)   |
//! | user / system   | skipped if already collected or owned by the desktop |
//!
//! The desktop environment's own packages are installed by a later stage, so
//! they never end up in this list through the user or system selections.
//!
//! - **Pure logic**: no I/O; same inputs, same list
//! - **Order**: first appearance wins, nothing is sorted

use crate::profiles::{kernel_packages, BASE_PACKAGES};
use crate::request::InstallRequest;
use crate::types::Kernel;
use std::collections::HashSet;

/// Fixed base list plus the chosen kernel's image and headers.
pub fn base_packages(kernel: Kernel) -> Vec<String> {
    BASE_PACKAGES
        .iter()
        .chain(kernel_packages(kernel))
        .map(|p| p.to_string())
        .collect()
}

/// Merge the package sources into an ordered, duplicate-free list.
pub fn resolve_packages(
    base: &[String],
    cpu: &[String],
    gpu: &[String],
    user: &[String],
    system: &[String],
    desktop: &[String],
) -> Vec<String> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut resolved = Vec::new();

    for pkg in base.iter().chain(cpu).chain(gpu) {
        if seen.insert(pkg.as_str()) {
            resolved.push(pkg.clone());
        }
    }

    let desktop: HashSet<&str> = desktop.iter().map(String::as_str).collect();
    for pkg in user.iter().chain(system) {
        if desktop.contains(pkg.as_str()) {
            continue;
        }
        if seen.insert(pkg.as_str()) {
            resolved.push(pkg.clone());
        }
    }

    resolved
}

/// The bootstrap package set for a request.
pub fn bootstrap_packages(request: &InstallRequest) -> Vec<String> {
    let selections = &request.packages;
    resolve_packages(
        &base_packages(request.kernel),
        &selections.cpu,
        &selections.gpu,
        &selections.user,
        &selections.system,
        &request.desktop.packages,
    )
}
