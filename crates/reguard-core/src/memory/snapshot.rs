//! In-memory stand-in for process memory.
//!
//! Used by the offline CLI (a module dump mapped at its preferred base) and
//! by tests. Pages carry their own protection so scoped protection changes
//! can be observed, and failures can be injected.

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{ModuleInfo, ModuleQuery, PAGE_SIZE, ProcessMemory, Protection, page_floor};
use crate::error::{Error, Result};

const ALLOCATION_BASE: u64 = 0x7FF0_0000_0000;

struct Page {
    data: Box<[u8]>,
    protection: Protection,
}

struct State {
    pages: BTreeMap<u64, Page>,
    next_allocation: u64,
}

pub struct SnapshotMemory {
    state: Mutex<State>,
    modules: Vec<ModuleInfo>,
    deny_protection_changes: bool,
    failing_writes: Vec<Range<u64>>,
    protect_calls: AtomicUsize,
}

#[derive(Default)]
pub struct SnapshotMemoryBuilder {
    regions: Vec<(u64, Vec<u8>, Protection)>,
    modules: Vec<ModuleInfo>,
    deny_protection_changes: bool,
    failing_writes: Vec<Range<u64>>,
}

impl SnapshotMemoryBuilder {
    /// Map `bytes` at `base`. Pages are created as needed; the remainder of a
    /// partially covered page reads as zero.
    pub fn region(mut self, base: u64, bytes: Vec<u8>, protection: Protection) -> Self {
        self.regions.push((base, bytes, protection));
        self
    }

    /// Map a module image and register it for module queries. The first
    /// module registered is treated as the main executable.
    pub fn module(mut self, name: &str, base: u64, bytes: Vec<u8>, protection: Protection) -> Self {
        self.modules.push(ModuleInfo {
            name: name.to_string(),
            path: name.to_string(),
            base,
            size: bytes.len() as u64,
        });
        self.regions.push((base, bytes, protection));
        self
    }

    pub fn deny_protection_changes(mut self) -> Self {
        self.deny_protection_changes = true;
        self
    }

    /// Make every write touching `[start, start + len)` fail, regardless of
    /// protection.
    pub fn fail_writes(mut self, start: u64, len: u64) -> Self {
        self.failing_writes.push(start..start + len);
        self
    }

    pub fn build(self) -> SnapshotMemory {
        let mut pages: BTreeMap<u64, Page> = BTreeMap::new();

        for (base, bytes, protection) in self.regions {
            if bytes.is_empty() {
                continue;
            }
            let end = base + bytes.len() as u64;
            let mut page = page_floor(base);
            while page < end {
                let entry = pages.entry(page).or_insert_with(|| Page {
                    data: vec![0u8; PAGE_SIZE as usize].into_boxed_slice(),
                    protection,
                });
                entry.protection = protection;

                let copy_start = page.max(base);
                let copy_end = (page + PAGE_SIZE).min(end);
                let src = (copy_start - base) as usize..(copy_end - base) as usize;
                let dst = (copy_start - page) as usize..(copy_end - page) as usize;
                entry.data[dst].copy_from_slice(&bytes[src]);

                page += PAGE_SIZE;
            }
        }

        SnapshotMemory {
            state: Mutex::new(State {
                pages,
                next_allocation: ALLOCATION_BASE,
            }),
            modules: self.modules,
            deny_protection_changes: self.deny_protection_changes,
            failing_writes: self.failing_writes,
            protect_calls: AtomicUsize::new(0),
        }
    }
}

impl SnapshotMemory {
    pub fn builder() -> SnapshotMemoryBuilder {
        SnapshotMemoryBuilder::default()
    }

    /// Map a raw module dump as the main executable.
    pub fn from_image(name: &str, base: u64, image: Vec<u8>) -> Self {
        Self::builder()
            .module(name, base, image, Protection::EXECUTE_READ)
            .build()
    }

    /// Number of protection changes requested so far.
    pub fn protect_calls(&self) -> usize {
        self.protect_calls.load(Ordering::SeqCst)
    }

    /// Write ignoring protection, the way another agent in the process
    /// that already holds write access would.
    pub fn poke(&self, address: u64, bytes: &[u8]) -> Result<()> {
        let mut state = self.lock();
        Self::copy_in(&mut state, address, bytes, false)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn copy_in(state: &mut State, address: u64, bytes: &[u8], check: bool) -> Result<()> {
        let end = address + bytes.len() as u64;

        let mut page = page_floor(address);
        while page < end {
            match state.pages.get(&page) {
                Some(p) if check && !p.protection.is_writable() => {
                    return Err(Error::MemoryWriteFailed {
                        address: page.max(address),
                        message: format!("page is {}", p.protection),
                    });
                }
                Some(_) => {}
                None => {
                    return Err(Error::MemoryWriteFailed {
                        address: page.max(address),
                        message: "page not mapped".to_string(),
                    });
                }
            }
            page += PAGE_SIZE;
        }

        let mut cursor = address;
        let mut written = 0usize;
        while cursor < end {
            let page = page_floor(cursor);
            let offset = (cursor - page) as usize;
            let take = ((PAGE_SIZE as usize) - offset).min(bytes.len() - written);
            if let Some(p) = state.pages.get_mut(&page) {
                p.data[offset..offset + take].copy_from_slice(&bytes[written..written + take]);
            }
            written += take;
            cursor += take as u64;
        }

        Ok(())
    }
}

impl ProcessMemory for SnapshotMemory {
    fn read_bytes(&self, address: u64, len: usize) -> Result<Vec<u8>> {
        let state = self.lock();
        let mut out = Vec::with_capacity(len);
        let end = address
            .checked_add(len as u64)
            .ok_or_else(|| Error::MemoryReadFailed {
                address,
                message: "range overflows".to_string(),
            })?;

        let mut cursor = address;
        while cursor < end {
            let page = page_floor(cursor);
            let p = state
                .pages
                .get(&page)
                .filter(|p| p.protection.is_readable())
                .ok_or_else(|| Error::MemoryReadFailed {
                    address: cursor,
                    message: "page not readable".to_string(),
                })?;
            let offset = (cursor - page) as usize;
            let take = ((PAGE_SIZE as usize) - offset).min((end - cursor) as usize);
            out.extend_from_slice(&p.data[offset..offset + take]);
            cursor += take as u64;
        }

        Ok(out)
    }

    fn write_bytes(&self, address: u64, bytes: &[u8]) -> Result<()> {
        let end = address + bytes.len() as u64;
        if self
            .failing_writes
            .iter()
            .any(|range| address < range.end && range.start < end)
        {
            return Err(Error::MemoryWriteFailed {
                address,
                message: "write fault".to_string(),
            });
        }

        let mut state = self.lock();
        Self::copy_in(&mut state, address, bytes, true)
    }

    fn query_protection(&self, address: u64) -> Result<Protection> {
        let state = self.lock();
        state
            .pages
            .get(&page_floor(address))
            .map(|p| p.protection)
            .ok_or_else(|| Error::MemoryReadFailed {
                address,
                message: "page not mapped".to_string(),
            })
    }

    fn protect(&self, address: u64, len: usize, protection: Protection) -> Result<Protection> {
        self.protect_calls.fetch_add(1, Ordering::SeqCst);

        if self.deny_protection_changes {
            return Err(Error::ProtectionChangeFailed {
                address,
                len,
                message: "access denied".to_string(),
            });
        }

        let mut state = self.lock();
        let first = page_floor(address);
        let last = page_floor(address + len.max(1) as u64 - 1);

        let previous = state
            .pages
            .get(&first)
            .map(|p| p.protection)
            .ok_or_else(|| Error::ProtectionChangeFailed {
                address,
                len,
                message: "page not mapped".to_string(),
            })?;

        let mut page = first;
        while page <= last {
            if !state.pages.contains_key(&page) {
                return Err(Error::ProtectionChangeFailed {
                    address,
                    len,
                    message: format!("page {:#x} not mapped", page),
                });
            }
            page += PAGE_SIZE;
        }

        let mut page = first;
        while page <= last {
            if let Some(p) = state.pages.get_mut(&page) {
                p.protection = protection;
            }
            page += PAGE_SIZE;
        }

        Ok(previous)
    }

    fn allocate(&self, len: usize, protection: Protection) -> Result<u64> {
        if len == 0 {
            return Err(Error::AllocationFailed(len));
        }

        let mut state = self.lock();
        let base = state.next_allocation;
        let pages = (len as u64).div_ceil(PAGE_SIZE);
        for i in 0..pages {
            state.pages.insert(
                base + i * PAGE_SIZE,
                Page {
                    data: vec![0u8; PAGE_SIZE as usize].into_boxed_slice(),
                    protection,
                },
            );
        }
        state.next_allocation = base + (pages + 1) * PAGE_SIZE;
        Ok(base)
    }
}

impl ModuleQuery for SnapshotMemory {
    fn main_module(&self) -> Option<ModuleInfo> {
        self.modules.first().cloned()
    }

    fn module_by_name(&self, name: &str) -> Option<ModuleInfo> {
        self.modules
            .iter()
            .find(|m| m.name.eq_ignore_ascii_case(name))
            .cloned()
    }

    fn module_by_handle(&self, handle: u64) -> Option<ModuleInfo> {
        self.modules.iter().find(|m| m.base == handle).cloned()
    }

    fn module_containing(&self, address: u64) -> Option<ModuleInfo> {
        self.modules.iter().find(|m| m.contains(address)).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_across_pages() {
        let bytes: Vec<u8> = (0..0x2000u32).map(|i| i as u8).collect();
        let memory = SnapshotMemory::builder()
            .region(0x10000, bytes, Protection::READONLY)
            .build();

        let read = memory.read_bytes(0x10FFE, 4).unwrap();
        assert_eq!(read, vec![0xFE, 0xFF, 0x00, 0x01]);
    }

    #[test]
    fn test_write_respects_protection() {
        let memory = SnapshotMemory::builder()
            .region(0x10000, vec![0u8; 16], Protection::EXECUTE_READ)
            .build();

        assert!(memory.write_bytes(0x10000, &[0xC3]).is_err());
        memory.protect(0x10000, 1, Protection::EXECUTE_READWRITE).unwrap();
        memory.write_bytes(0x10000, &[0xC3]).unwrap();
        assert_eq!(memory.read_u8(0x10000).unwrap(), 0xC3);
    }

    #[test]
    fn test_guard_page_is_not_read() {
        let guarded = Protection(Protection::READWRITE.raw() | Protection::GUARD);
        let memory = SnapshotMemory::builder()
            .region(0x10000, vec![0u8; 0x1000], Protection::READONLY)
            .region(0x11000, vec![0u8; 0x1000], guarded)
            .build();

        assert!(memory.read_bytes(0x10FF0, 0x10).is_ok());
        assert!(memory.read_bytes(0x10FF0, 0x20).is_err());
        assert!(memory.write_bytes(0x11000, &[1]).is_err());
        assert_eq!(memory.query_protection(0x11000).unwrap(), guarded);
    }

    #[test]
    fn test_unmapped_access_fails() {
        let memory = SnapshotMemory::builder().build();
        assert!(memory.read_bytes(0x5000, 1).is_err());
        assert!(memory.query_protection(0x5000).is_err());
        assert!(memory.protect(0x5000, 1, Protection::READWRITE).is_err());
    }

    #[test]
    fn test_poke_ignores_protection() {
        let memory = SnapshotMemory::builder()
            .region(0x10000, vec![0u8; 16], Protection::EXECUTE_READ)
            .build();

        memory.poke(0x10002, &[0xE9, 0x01]).unwrap();
        assert_eq!(memory.read_bytes(0x10002, 2).unwrap(), vec![0xE9, 0x01]);
    }

    #[test]
    fn test_allocations_do_not_overlap() {
        let memory = SnapshotMemory::builder().build();
        let a = memory.allocate(0x100, Protection::EXECUTE_READWRITE).unwrap();
        let b = memory.allocate(0x1001, Protection::EXECUTE_READWRITE).unwrap();
        assert!(b >= a + PAGE_SIZE);
        memory.write_bytes(b + 0x1000, &[1]).unwrap();
    }

    #[test]
    fn test_module_queries() {
        let memory = SnapshotMemory::builder()
            .module("game.exe", 0x140000000, vec![0u8; 0x3000], Protection::EXECUTE_READ)
            .module("ntdll.dll", 0x7FF800000000, vec![0u8; 0x1000], Protection::EXECUTE_READ)
            .build();

        assert_eq!(memory.main_module().unwrap().name, "game.exe");
        assert_eq!(
            memory.module_containing(0x140002FFF).unwrap().base,
            0x140000000
        );
        assert!(memory.module_containing(0x140003000).is_none());
        assert_eq!(memory.module_by_name("NTDLL.DLL").unwrap().size, 0x1000);
        assert_eq!(
            memory.module_by_handle(0x7FF800000000).unwrap().name,
            "ntdll.dll"
        );
    }
}
