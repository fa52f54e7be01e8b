//! Engine modules: turn an install request into partition-table changes.
//!
//! `storage` holds the pure sizing and parsing rules; `partition` issues the
//! commands for each mode and reports the resulting devices.

pub mod partition;
pub mod storage;
