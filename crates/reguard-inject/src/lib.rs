//! # reguard
//!
//! The library injected into the game. On load it opens its log next to the
//! executable, reads `reguard_config.txt`, takes the pristine copy of the
//! protection syscall, hooks `VirtualProtect` (and exception handler
//! registration where the game needs it) and applies the startup patches.
//!
//! The host framework then drives it through a small C ABI:
//! - `reguard_register_runtime`: hand over the reflection function table
//! - `reguard_on_frame`: once per frame
//! - `reguard_allow_veh`: let exception handler registrations through
//! - `reguard_set_enabled`: switch the toggleable patches and persist it

pub mod host;
pub mod logging;
pub mod settings;

#[cfg(target_os = "windows")]
mod entry;
#[cfg(target_os = "windows")]
mod exports;
#[cfg(target_os = "windows")]
mod hooks;
#[cfg(target_os = "windows")]
mod state;

pub use host::{HostRuntime, RawMethod, RuntimeFunctions};
