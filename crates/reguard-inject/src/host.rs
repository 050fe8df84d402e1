//! The host framework's runtime services, received as a C function table.

use std::ffi::{CStr, CString, c_char, c_void};

use reguard_core::{
    ApplicationEntries, Handle, MethodInfo, SingletonLocator, TypeDatabase,
};

/// One method as the host describes it.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawMethod {
    /// NUL-terminated, owned by the host. May be null.
    pub name: *const c_char,
    pub hash: u64,
    /// Zero when the method has no native code.
    pub entry: u64,
}

impl Default for RawMethod {
    fn default() -> Self {
        Self {
            name: std::ptr::null(),
            hash: 0,
            entry: 0,
        }
    }
}

/// Function table passed to `reguard_register_runtime`. Every function gets
/// `context` as its first argument; handles are zero when absent. A null
/// function is treated as "nothing there".
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RuntimeFunctions {
    pub context: *mut c_void,
    pub find_type: Option<unsafe extern "C" fn(*mut c_void, u32) -> u64>,
    pub method_count: Option<unsafe extern "C" fn(*mut c_void, u64) -> usize>,
    pub method_at: Option<unsafe extern "C" fn(*mut c_void, u64, usize, *mut RawMethod) -> bool>,
    pub object_type: Option<unsafe extern "C" fn(*mut c_void, u64) -> u64>,
    pub find_field: Option<unsafe extern "C" fn(*mut c_void, u64, *const c_char) -> u64>,
    pub read_field:
        Option<unsafe extern "C" fn(*mut c_void, u64, u64, *mut u8, usize, bool) -> bool>,
    pub write_field:
        Option<unsafe extern "C" fn(*mut c_void, u64, u64, *const u8, usize, bool) -> bool>,
    pub managed_singleton: Option<unsafe extern "C" fn(*mut c_void, *const c_char) -> u64>,
    pub ignore_application_entry: Option<unsafe extern "C" fn(*mut c_void, u64)>,
}

/// [`reguard_core::Runtime`] backed by a [`RuntimeFunctions`] table.
#[derive(Debug)]
pub struct HostRuntime {
    functions: RuntimeFunctions,
}

// SAFETY: `HostRuntime::new` requires the table to be callable from any thread.
unsafe impl Send for HostRuntime {}
// SAFETY: as above; the table itself is never mutated.
unsafe impl Sync for HostRuntime {}

fn handle(raw: u64) -> Option<Handle> {
    (raw != 0).then_some(raw)
}

impl HostRuntime {
    /// # Safety
    ///
    /// Every non-null function must follow the documented contract, stay
    /// valid for the life of the process and be safe to call from any thread
    /// with `context`.
    pub unsafe fn new(functions: RuntimeFunctions) -> Self {
        Self { functions }
    }

    fn method_at(&self, ty: Handle, index: usize) -> Option<MethodInfo> {
        let method_at = self.functions.method_at?;
        let mut raw = RawMethod::default();
        // SAFETY: contract of `new`; `raw` is a valid out pointer.
        if !unsafe { method_at(self.functions.context, ty, index, &mut raw) } {
            return None;
        }

        let name = if raw.name.is_null() {
            String::new()
        } else {
            // SAFETY: non-null names are NUL-terminated strings owned by the host.
            unsafe { CStr::from_ptr(raw.name) }
                .to_string_lossy()
                .into_owned()
        };

        Some(MethodInfo {
            name,
            hash: raw.hash,
            entry: handle(raw.entry),
        })
    }
}

impl TypeDatabase for HostRuntime {
    fn find_type(&self, fqn_hash: u32) -> Option<Handle> {
        let find_type = self.functions.find_type?;
        // SAFETY: contract of `new`.
        handle(unsafe { find_type(self.functions.context, fqn_hash) })
    }

    fn methods(&self, ty: Handle) -> Vec<MethodInfo> {
        let Some(method_count) = self.functions.method_count else {
            return Vec::new();
        };
        // SAFETY: contract of `new`.
        let count = unsafe { method_count(self.functions.context, ty) };
        (0..count).filter_map(|i| self.method_at(ty, i)).collect()
    }

    fn object_type(&self, object: Handle) -> Option<Handle> {
        let object_type = self.functions.object_type?;
        // SAFETY: contract of `new`.
        handle(unsafe { object_type(self.functions.context, object) })
    }

    fn find_field(&self, ty: Handle, name: &str) -> Option<Handle> {
        let find_field = self.functions.find_field?;
        let name = CString::new(name).ok()?;
        // SAFETY: contract of `new`; `name` outlives the call.
        handle(unsafe { find_field(self.functions.context, ty, name.as_ptr()) })
    }

    fn read_field(&self, object: Handle, field: Handle, len: usize, bypass_accessor: bool) -> Option<Vec<u8>> {
        let read_field = self.functions.read_field?;
        let mut out = vec![0u8; len];
        // SAFETY: contract of `new`; `out` holds `len` bytes.
        let ok = unsafe {
            read_field(
                self.functions.context,
                object,
                field,
                out.as_mut_ptr(),
                len,
                bypass_accessor,
            )
        };
        ok.then_some(out)
    }

    fn write_field(&self, object: Handle, field: Handle, bytes: &[u8], bypass_accessor: bool) -> bool {
        let Some(write_field) = self.functions.write_field else {
            return false;
        };
        // SAFETY: contract of `new`; `bytes` outlives the call.
        unsafe {
            write_field(
                self.functions.context,
                object,
                field,
                bytes.as_ptr(),
                bytes.len(),
                bypass_accessor,
            )
        }
    }
}

impl SingletonLocator for HostRuntime {
    fn managed_singleton(&self, name: &str) -> Option<Handle> {
        let managed_singleton = self.functions.managed_singleton?;
        let name = CString::new(name).ok()?;
        // SAFETY: contract of `new`; `name` outlives the call.
        handle(unsafe { managed_singleton(self.functions.context, name.as_ptr()) })
    }
}

impl ApplicationEntries for HostRuntime {
    fn ignore_application_entry(&self, hash: u64) {
        if let Some(ignore) = self.functions.ignore_application_entry {
            // SAFETY: contract of `new`.
            unsafe { ignore(self.functions.context, hash) }
        }
    }
}
