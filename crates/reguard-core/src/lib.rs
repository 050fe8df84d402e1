//! # reguard-core
//!
//! Core library for reguard, a runtime patcher that keeps engine integrity
//! checks from tripping while mods are loaded.
//!
//! This crate provides:
//! - Process memory access behind the [`ProcessMemory`] trait, with an
//!   in-memory [`SnapshotMemory`] for offline analysis and tests
//! - Byte pattern scanning and instruction-level address resolution
//! - Code patches with scoped protection changes and inline hooks
//! - The integrity bypass itself, one strategy table per game
//! - A guardian that keeps the memory protection syscall intact

pub mod bypass;
pub mod config;
pub mod error;
pub mod guard;
pub mod hook;
pub mod memory;
pub mod patch;
pub mod resolve;
pub mod runtime;
pub mod scan;

pub use bypass::{
    BypassReport, CheckSite, IntegrityBypass, Locator, MethodPatch, SiteAction, SiteReport,
    SiteStatus, TargetVariant, VariantProfile, disable_update_timers,
};
pub use config::{BypassSettings, CONFIG_FILE_NAME, Config};
pub use error::{Error, Result};
#[cfg(target_os = "windows")]
pub use guard::NtProtect;
pub use guard::{
    ProtectOutcome, ProtectSyscall, RepairOutcome, SyscallGuardian, SyscallResult, VehDecision,
    VehPolicy,
};
pub use hook::InlineHook;
#[cfg(target_os = "windows")]
pub use memory::LocalProcess;
pub use memory::{
    ModuleInfo, ModuleQuery, ProcessMemory, ProtectGuard, Protection, SnapshotMemory,
};
pub use patch::{Patch, jcc_to_jmp, nop_fill, write_code};
pub use resolve::{AddressResolver, ResolvedInstruction};
pub use runtime::{
    ApplicationEntries, Handle, MethodInfo, Runtime, SingletonLocator, TypeDatabase,
};
pub use scan::{Pattern, PatternSet, PatternSpec, Scanner, load_pattern_set, save_pattern_set};
