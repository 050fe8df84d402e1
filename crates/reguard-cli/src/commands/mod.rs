//! CLI command implementations.
//!
//! Every command works on a raw module dump mapped into a
//! [`SnapshotMemory`](reguard_core::SnapshotMemory), so nothing here touches
//! a live process.

pub mod absolute;
pub mod behind;
pub mod hex_utils;
pub mod hexdump;
pub mod image;
pub mod plan;
pub mod scan;
