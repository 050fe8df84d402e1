//! C ABI called by the host framework.

use std::panic::{AssertUnwindSafe, catch_unwind};

use reguard_core::LocalProcess;
use tracing::{error, info, warn};

use crate::host::{HostRuntime, RuntimeFunctions};
use crate::{settings, state};

/// Hand over the runtime function table. Only the first registration counts.
///
/// # Safety
///
/// `functions` must point to a valid table whose functions meet the contract
/// of [`HostRuntime::new`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn reguard_register_runtime(functions: *const RuntimeFunctions) -> bool {
    let Some(state) = state::get() else {
        return false;
    };
    if functions.is_null() {
        return false;
    }

    // SAFETY: non-null and valid per the contract above.
    let runtime = unsafe { HostRuntime::new(*functions) };
    let registered = state.runtime.set(runtime).is_ok();
    if registered {
        info!("Runtime registered");
    } else {
        warn!("Runtime already registered");
    }
    registered
}

/// Per-frame tick. The first one after the runtime is registered also runs
/// the reflection-driven setup.
#[unsafe(no_mangle)]
pub extern "C" fn reguard_on_frame() {
    let result = catch_unwind(AssertUnwindSafe(|| {
        let Some(state) = state::get() else {
            return;
        };
        let Some(runtime) = state.runtime.get() else {
            return;
        };

        let memory = LocalProcess::new();
        let mut bypass = state.bypass();
        if state.take_initialization() {
            bypass.initialize(&memory, runtime);
        }
        bypass.tick(&memory, runtime);
    }));

    if result.is_err() {
        error!("Frame tick panicked");
    }
}

/// Let every later exception handler registration through.
#[unsafe(no_mangle)]
pub extern "C" fn reguard_allow_veh() {
    if let Some(state) = state::get() {
        state.veh.allow();
        info!("Exception handler registration allowed");
    }
}

/// Switch the toggleable patches on or off (applied on the next frame) and
/// write the choice to the settings file.
#[unsafe(no_mangle)]
pub extern "C" fn reguard_set_enabled(enabled: bool) {
    let Some(state) = state::get() else {
        return;
    };

    state.bypass().set_enabled(enabled);
    if let Err(e) = settings::persist_enabled(&state.game_dir, enabled) {
        warn!("Could not save settings: {}", e);
    }
}
