use std::ffi::c_void;
use std::path::PathBuf;

use anyhow::{Context, Result};
use reguard_core::{LocalProcess, NtProtect};
use tracing::{error, info, warn};

use crate::state::{self, Injected};
use crate::{hooks, logging, settings};

const DLL_PROCESS_ATTACH: u32 = 1;

#[unsafe(no_mangle)]
pub extern "system" fn DllMain(module: *mut c_void, reason: u32, _reserved: *mut c_void) -> i32 {
    if reason == DLL_PROCESS_ATTACH {
        let own_module = module as u64;
        // Nothing heavy may run under the loader lock.
        std::thread::spawn(move || {
            if let Err(e) = startup(own_module) {
                error!("Startup failed: {:#}", e);
            }
        });
    }
    1
}

fn game_dir() -> Result<PathBuf> {
    let exe = std::env::current_exe().context("Failed to locate the game executable")?;
    Ok(exe
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(".")))
}

fn startup(own_module: u64) -> Result<()> {
    let dir = game_dir()?;
    let log_path = logging::init(&dir)?;
    info!("Logging to {}", log_path.display());

    let settings = settings::load(&dir);
    let state = state::install(Injected::new(dir, own_module, &settings));

    match NtProtect::export().and_then(|export| state.guardian.setup(export)) {
        Ok(entry) => {
            info!("Protection syscall entry at {:#x}", entry);
            if let Err(e) = hooks::hook_virtual_protect(state) {
                error!("Could not hook VirtualProtect: {}", e);
            }
        }
        Err(e) => error!("Could not set up the protection syscall copy: {}", e),
    }

    let mut bypass = state.bypass();
    if bypass.profile().guard_exception_handlers {
        if let Err(e) = hooks::hook_exception_handler_registration(state) {
            warn!("Could not hook exception handler registration: {}", e);
        }
    }

    bypass.run_startup_patches(&LocalProcess::new());
    info!("Startup patches done, waiting for the runtime");
    Ok(())
}
