//! The current process, accessed directly.

use std::ffi::{CString, c_void};
use std::ptr;

use windows::Win32::Foundation::HMODULE;
use windows::Win32::System::Diagnostics::Debug::FlushInstructionCache;
use windows::Win32::System::LibraryLoader::{
    GetModuleFileNameW, GetModuleHandleA, GetModuleHandleExW, GetModuleHandleW,
};
use windows::Win32::System::Memory::{
    MEM_COMMIT, MEM_RESERVE, MEMORY_BASIC_INFORMATION, PAGE_PROTECTION_FLAGS, VirtualAlloc,
    VirtualProtect, VirtualQuery,
};
use windows::Win32::System::ProcessStatus::{GetModuleInformation, MODULEINFO};
use windows::Win32::System::Threading::GetCurrentProcess;
use windows::core::{PCSTR, PCWSTR};

use super::{ModuleInfo, ModuleQuery, ProcessMemory, Protection};
use crate::error::{Error, Result};

const GET_MODULE_HANDLE_EX_FLAG_UNCHANGED_REFCOUNT: u32 = 0x2;
const GET_MODULE_HANDLE_EX_FLAG_FROM_ADDRESS: u32 = 0x4;

/// The process this library is loaded into.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalProcess;

impl LocalProcess {
    pub fn new() -> Self {
        Self
    }

    fn query(&self, address: u64) -> Option<MEMORY_BASIC_INFORMATION> {
        let mut info = MEMORY_BASIC_INFORMATION::default();
        // SAFETY: VirtualQuery only inspects the address space.
        let written = unsafe {
            VirtualQuery(
                Some(address as *const c_void),
                &mut info,
                size_of::<MEMORY_BASIC_INFORMATION>(),
            )
        };
        (written != 0).then_some(info)
    }

    /// Verify every region overlapping the range is committed and satisfies `check`.
    fn check_range(
        &self,
        address: u64,
        len: usize,
        check: impl Fn(Protection) -> bool,
    ) -> std::result::Result<(), String> {
        let end = address + len as u64;
        let mut cursor = address;

        while cursor < end {
            let info = self
                .query(cursor)
                .ok_or_else(|| "VirtualQuery failed".to_string())?;
            if info.State != MEM_COMMIT {
                return Err("memory not committed".to_string());
            }
            let protection = Protection(info.Protect.0);
            if !check(protection) {
                return Err(format!("region is {}", protection));
            }
            let region_end = info.BaseAddress as u64 + info.RegionSize as u64;
            if region_end <= cursor {
                return Err("VirtualQuery returned an empty region".to_string());
            }
            cursor = region_end;
        }

        Ok(())
    }

    fn module_info(&self, module: HMODULE) -> Option<ModuleInfo> {
        let mut info = MODULEINFO::default();
        // SAFETY: `module` is a loaded module handle and `info` is a valid out pointer.
        unsafe {
            GetModuleInformation(
                GetCurrentProcess(),
                module,
                &mut info,
                size_of::<MODULEINFO>() as u32,
            )
            .ok()?;
        }

        let mut buffer = vec![0u16; 1024];
        // SAFETY: the buffer is valid for its whole length.
        let len = unsafe { GetModuleFileNameW(module, &mut buffer) } as usize;
        let path = String::from_utf16_lossy(&buffer[..len.min(buffer.len())]);
        let name = path
            .rsplit(['\\', '/'])
            .next()
            .unwrap_or(path.as_str())
            .to_string();

        Some(ModuleInfo {
            name,
            path,
            base: info.lpBaseOfDll as u64,
            size: info.SizeOfImage as u64,
        })
    }
}

impl ProcessMemory for LocalProcess {
    fn read_bytes(&self, address: u64, len: usize) -> Result<Vec<u8>> {
        self.check_range(address, len, Protection::is_readable)
            .map_err(|message| Error::MemoryReadFailed { address, message })?;

        let mut out = vec![0u8; len];
        // SAFETY: the whole range was just verified to be committed and readable.
        unsafe { ptr::copy_nonoverlapping(address as *const u8, out.as_mut_ptr(), len) };
        Ok(out)
    }

    fn write_bytes(&self, address: u64, bytes: &[u8]) -> Result<()> {
        self.check_range(address, bytes.len(), Protection::is_writable)
            .map_err(|message| Error::MemoryWriteFailed { address, message })?;

        // SAFETY: the whole range was just verified to be committed and writable.
        unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), address as *mut u8, bytes.len()) };
        Ok(())
    }

    fn query_protection(&self, address: u64) -> Result<Protection> {
        self.query(address)
            .filter(|info| info.State == MEM_COMMIT)
            .map(|info| Protection(info.Protect.0))
            .ok_or_else(|| Error::MemoryReadFailed {
                address,
                message: "memory not committed".to_string(),
            })
    }

    fn protect(&self, address: u64, len: usize, protection: Protection) -> Result<Protection> {
        let mut old = PAGE_PROTECTION_FLAGS::default();
        // SAFETY: VirtualProtect validates the range itself and reports failure.
        unsafe {
            VirtualProtect(
                address as *const c_void,
                len,
                PAGE_PROTECTION_FLAGS(protection.raw()),
                &mut old,
            )
        }
        .map_err(|e| Error::ProtectionChangeFailed {
            address,
            len,
            message: e.to_string(),
        })?;

        Ok(Protection(old.0))
    }

    fn allocate(&self, len: usize, protection: Protection) -> Result<u64> {
        // SAFETY: a fresh allocation with no requested address.
        let base = unsafe {
            VirtualAlloc(
                None,
                len,
                MEM_COMMIT | MEM_RESERVE,
                PAGE_PROTECTION_FLAGS(protection.raw()),
            )
        };
        if base.is_null() {
            return Err(Error::AllocationFailed(len));
        }
        Ok(base as u64)
    }

    fn flush_instruction_cache(&self, address: u64, len: usize) {
        // SAFETY: flushing is advisory and tolerates any range.
        let _ = unsafe {
            FlushInstructionCache(GetCurrentProcess(), Some(address as *const c_void), len)
        };
    }
}

impl ModuleQuery for LocalProcess {
    fn main_module(&self) -> Option<ModuleInfo> {
        // SAFETY: a null name returns the executable's handle.
        let module = unsafe { GetModuleHandleW(PCWSTR::null()) }.ok()?;
        self.module_info(module)
    }

    fn module_by_name(&self, name: &str) -> Option<ModuleInfo> {
        let name = CString::new(name).ok()?;
        // SAFETY: `name` is a valid NUL-terminated string for the duration of the call.
        let module = unsafe { GetModuleHandleA(PCSTR(name.as_ptr() as *const u8)) }.ok()?;
        self.module_info(module)
    }

    fn module_by_handle(&self, handle: u64) -> Option<ModuleInfo> {
        if handle == 0 {
            return None;
        }
        self.module_info(HMODULE(handle as *mut c_void))
    }

    fn module_containing(&self, address: u64) -> Option<ModuleInfo> {
        let mut module = HMODULE::default();
        // SAFETY: with FROM_ADDRESS the name parameter is interpreted as an address.
        unsafe {
            GetModuleHandleExW(
                GET_MODULE_HANDLE_EX_FLAG_FROM_ADDRESS | GET_MODULE_HANDLE_EX_FLAG_UNCHANGED_REFCOUNT,
                PCWSTR(address as *const u16),
                &mut module,
            )
        }
        .ok()?;
        self.module_info(module)
    }
}
