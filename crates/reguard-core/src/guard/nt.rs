use std::ffi::c_void;

use windows::Win32::Foundation::HANDLE;
use windows::Win32::System::LibraryLoader::{GetModuleHandleA, GetProcAddress};
use windows::Win32::System::Threading::GetCurrentProcess;
use windows::core::{PCSTR, s};

use super::{ProtectSyscall, SyscallResult};
use crate::error::{Error, Result};
use crate::memory::Protection;

type NtProtectVirtualMemoryFn =
    unsafe extern "system" fn(HANDLE, *mut *mut c_void, *mut usize, u32, *mut u32) -> i32;

type RtlFlushSecureMemoryCacheFn = unsafe extern "system" fn(*mut c_void, usize) -> u8;

fn ntdll_export(name: PCSTR) -> Option<usize> {
    // SAFETY: ntdll is mapped into every process; both calls only look it up.
    unsafe {
        let ntdll = GetModuleHandleA(s!("ntdll.dll")).ok()?;
        GetProcAddress(ntdll, name).map(|f| f as usize)
    }
}

/// `NtProtectVirtualMemory` on the current process.
#[derive(Debug, Default, Clone, Copy)]
pub struct NtProtect {
    flush: Option<RtlFlushSecureMemoryCacheFn>,
}

impl NtProtect {
    pub fn new() -> Self {
        let flush = ntdll_export(s!("RtlFlushSecureMemoryCache")).map(|address| {
            // SAFETY: the export has this signature on every Windows version that has it.
            unsafe { std::mem::transmute::<usize, RtlFlushSecureMemoryCacheFn>(address) }
        });
        Self { flush }
    }

    /// Address of the `NtProtectVirtualMemory` export.
    pub fn export() -> Result<u64> {
        ntdll_export(s!("NtProtectVirtualMemory"))
            .map(|address| address as u64)
            .ok_or_else(|| Error::not_found("NtProtectVirtualMemory"))
    }
}

impl ProtectSyscall for NtProtect {
    fn protect_virtual_memory(
        &self,
        entry: u64,
        address: u64,
        size: usize,
        protection: Protection,
    ) -> SyscallResult {
        // SAFETY: `entry` is the resolved syscall stub, which has this signature.
        let syscall = unsafe { std::mem::transmute::<usize, NtProtectVirtualMemoryFn>(entry as usize) };

        let mut base = address as *mut c_void;
        let mut region = size;
        let mut old = 0u32;
        // SAFETY: every pointer refers to a live local for the duration of the call.
        let status = unsafe {
            syscall(
                GetCurrentProcess(),
                &mut base,
                &mut region,
                protection.raw(),
                &mut old,
            )
        };

        SyscallResult {
            status: status as u32,
            old: Protection(old),
        }
    }

    fn flush_secure_memory_cache(&self, address: u64, size: usize) -> bool {
        match self.flush {
            // SAFETY: the cache flush accepts any range and reports failure.
            Some(flush) => unsafe { flush(address as *mut c_void, size) != 0 },
            None => false,
        }
    }
}
