//! Detours for `VirtualProtect` and `AddVectoredExceptionHandler`.
//!
//! Both run on arbitrary game threads. Any panic inside a detour is caught
//! and the call is handed to the original function instead.

use std::ffi::c_void;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};

use reguard_core::{InlineHook, LocalProcess, Protection, RepairOutcome, Result, VehDecision};
use tracing::{error, info};
use windows::Win32::System::Diagnostics::Debug::RtlCaptureStackBackTrace;
use windows::Win32::System::LibraryLoader::{GetModuleHandleA, GetProcAddress};
use windows::core::{PCSTR, s};

use crate::state::{self, Injected};

type VirtualProtectFn = unsafe extern "system" fn(*const c_void, usize, u32, *mut u32) -> i32;
type AddVehFn = unsafe extern "system" fn(u32, *const c_void) -> *mut c_void;

static VIRTUAL_PROTECT_SEEN: AtomicBool = AtomicBool::new(false);

fn export(module: PCSTR, name: PCSTR) -> Option<u64> {
    // SAFETY: lookups only; both modules stay loaded for the life of the process.
    unsafe {
        let module = GetModuleHandleA(module).ok()?;
        GetProcAddress(module, name).map(|f| f as usize as u64)
    }
}

/// Route every `VirtualProtect` in the process through the guardian.
pub fn hook_virtual_protect(state: &Injected) -> Result<()> {
    let target = export(s!("kernelbase.dll"), s!("VirtualProtect"))
        .ok_or_else(|| reguard_core::Error::not_found("VirtualProtect"))?;
    let hook = InlineHook::install(&LocalProcess::new(), target, virtual_protect_detour as usize as u64)?;
    let _ = state.virtual_protect_hook.set(hook);
    info!("Hooked VirtualProtect");
    Ok(())
}

pub fn hook_exception_handler_registration(state: &Injected) -> Result<()> {
    let target = export(s!("kernel32.dll"), s!("AddVectoredExceptionHandler"))
        .ok_or_else(|| reguard_core::Error::not_found("AddVectoredExceptionHandler"))?;
    let hook = InlineHook::install(&LocalProcess::new(), target, add_veh_detour as usize as u64)?;
    let _ = state.veh_hook.set(hook);
    info!("Hooked AddVectoredExceptionHandler");
    Ok(())
}

fn guarded_virtual_protect(address: *const c_void, size: usize, protection: u32, old: *mut u32) -> Option<i32> {
    let state = state::get()?;

    if !VIRTUAL_PROTECT_SEEN.swap(true, Ordering::Relaxed) {
        info!("VirtualProtect called");
    }

    let outcome = state
        .guardian
        .hooked_call(address as u64, size, Protection(protection))
        .ok()?;
    if let RepairOutcome::Failed(e) = &outcome.repair {
        error!("Could not restore the protection syscall: {}", e);
    }

    if !old.is_null() && outcome.result.succeeded() {
        // SAFETY: the caller passed a writable out pointer, as VirtualProtect requires.
        unsafe { *old = outcome.result.old.raw() };
    }
    Some(outcome.result.succeeded() as i32)
}

#[inline(never)]
unsafe extern "system" fn virtual_protect_detour(
    address: *const c_void,
    size: usize,
    protection: u32,
    old: *mut u32,
) -> i32 {
    let result = catch_unwind(AssertUnwindSafe(|| {
        guarded_virtual_protect(address, size, protection, old)
    }));
    if let Ok(Some(result)) = result {
        return result;
    }

    error!("VirtualProtect hook failed, falling back to original");
    let Some(hook) = state::get().and_then(|s| s.virtual_protect_hook.get()) else {
        return 0;
    };
    // SAFETY: the trampoline behaves exactly like the original VirtualProtect.
    unsafe {
        let original = std::mem::transmute::<usize, VirtualProtectFn>(hook.trampoline() as usize);
        original(address, size, protection, old)
    }
}

/// Return address of the detour that called this.
#[inline(never)]
fn caller_address() -> u64 {
    let mut frames = [std::ptr::null_mut::<c_void>(); 1];
    // SAFETY: `frames` has room for the one frame requested. Two frames are
    // skipped: this function and the detour.
    let captured = unsafe { RtlCaptureStackBackTrace(2, 1, frames.as_mut_ptr(), None) };
    if captured == 0 { 0 } else { frames[0] as u64 }
}

#[inline(never)]
unsafe extern "system" fn add_veh_detour(first: u32, handler: *const c_void) -> *mut c_void {
    let caller = caller_address();
    let decision = catch_unwind(AssertUnwindSafe(|| {
        let state = state::get()?;
        Some(state.veh.decide(&LocalProcess::new(), caller))
    }));

    match decision {
        // A non-null value that is not a real registration.
        Ok(Some(VehDecision::Deny)) => handler as *mut c_void,
        _ => {
            let Some(hook) = state::get().and_then(|s| s.veh_hook.get()) else {
                return std::ptr::null_mut();
            };
            // SAFETY: the trampoline behaves exactly like the original function.
            unsafe {
                let original = std::mem::transmute::<usize, AddVehFn>(hook.trampoline() as usize);
                original(first, handler)
            }
        }
    }
}
