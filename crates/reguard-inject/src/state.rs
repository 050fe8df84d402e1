//! Process-wide state. The detours are free functions, so everything they
//! need lives in one `OnceLock`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock};

use reguard_core::{
    BypassSettings, InlineHook, IntegrityBypass, LocalProcess, NtProtect, SyscallGuardian,
    VehPolicy,
};

use crate::host::HostRuntime;

pub struct Injected {
    /// Directory of the game executable; logs and settings live here.
    pub game_dir: PathBuf,
    pub guardian: SyscallGuardian<LocalProcess, NtProtect>,
    pub veh: VehPolicy,
    pub bypass: Mutex<IntegrityBypass>,
    pub runtime: OnceLock<HostRuntime>,
    pub virtual_protect_hook: OnceLock<InlineHook>,
    pub veh_hook: OnceLock<InlineHook>,
    initialized: AtomicBool,
}

static STATE: OnceLock<Injected> = OnceLock::new();

impl Injected {
    pub fn new(game_dir: PathBuf, own_module: u64, settings: &BypassSettings) -> Self {
        Self {
            game_dir,
            guardian: SyscallGuardian::new(LocalProcess::new(), NtProtect::new()),
            veh: VehPolicy::new(own_module),
            bypass: Mutex::new(IntegrityBypass::from_settings(settings)),
            runtime: OnceLock::new(),
            virtual_protect_hook: OnceLock::new(),
            veh_hook: OnceLock::new(),
            initialized: AtomicBool::new(false),
        }
    }

    pub fn bypass(&self) -> MutexGuard<'_, IntegrityBypass> {
        self.bypass.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// True exactly once, for the first caller after the runtime arrived.
    pub fn take_initialization(&self) -> bool {
        self.runtime.get().is_some()
            && self
                .initialized
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
    }
}

/// Install the state. Returns the installed one if it was already set.
pub fn install(state: Injected) -> &'static Injected {
    STATE.get_or_init(|| state)
}

pub fn get() -> Option<&'static Injected> {
    STATE.get()
}
