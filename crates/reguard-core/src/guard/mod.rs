//! Self-healing protection syscall.
//!
//! Something in the game rewrites the entry of the native protection syscall
//! so that later protection changes misbehave. The guardian keeps a pristine
//! copy of the entry taken at startup, and every protection change routed
//! through it first compares the live entry with that copy and repairs it.

#[cfg(target_os = "windows")]
mod nt;
mod veh;

#[cfg(target_os = "windows")]
pub use nt::NtProtect;
pub use veh::{VEH_DEBUGGER_MARKER, VehDecision, VehPolicy};

use std::sync::OnceLock;

use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::memory::{ProcessMemory, Protection};
use crate::patch::encode::NEAR_JMP;
use crate::resolve::AddressResolver;

pub const STATUS_SUCCESS: u32 = 0;
pub const STATUS_INVALID_PAGE_PROTECTION: u32 = 0xC000_0045;

/// Bytes of the syscall entry copied at setup.
pub const PRISTINE_COPY_LEN: usize = 256;

/// Bytes of the live entry compared with the copy on every call.
pub const COMPARE_LEN: usize = 32;

pub fn nt_success(status: u32) -> bool {
    (status as i32) >= 0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyscallResult {
    pub status: u32,
    pub old: Protection,
}

impl SyscallResult {
    pub fn succeeded(&self) -> bool {
        nt_success(self.status)
    }
}

/// The native protection syscall, called through a given entry point.
pub trait ProtectSyscall {
    fn protect_virtual_memory(
        &self,
        entry: u64,
        address: u64,
        size: usize,
        protection: Protection,
    ) -> SyscallResult;

    /// Returns whether the flush succeeded.
    fn flush_secure_memory_cache(&self, address: u64, size: usize) -> bool;
}

#[derive(Debug)]
pub enum RepairOutcome {
    /// The live entry matches the pristine copy.
    Intact,
    /// Rewritten in place without touching protection.
    RestoredDirect,
    /// Rewritten after making the entry writable through the syscall itself.
    RestoredWithProtection,
    Failed(Error),
}

#[derive(Debug)]
pub struct ProtectOutcome {
    pub result: SyscallResult,
    pub repair: RepairOutcome,
}

#[derive(Debug, Clone, Copy)]
struct PristineSyscall {
    entry: u64,
    copy: u64,
}

pub struct SyscallGuardian<M, S> {
    memory: M,
    syscall: S,
    pristine: OnceLock<PristineSyscall>,
}

impl<M: ProcessMemory, S: ProtectSyscall> SyscallGuardian<M, S> {
    pub fn new(memory: M, syscall: S) -> Self {
        Self {
            memory,
            syscall,
            pristine: OnceLock::new(),
        }
    }

    pub fn syscall(&self) -> &S {
        &self.syscall
    }

    /// Entry point of the real syscall, once set up.
    pub fn entry(&self) -> Option<u64> {
        self.pristine.get().map(|p| p.entry)
    }

    /// Address of the pristine copy, once set up.
    pub fn pristine_copy(&self) -> Option<u64> {
        self.pristine.get().map(|p| p.copy)
    }

    /// Resolve the real entry behind `export` and take the pristine copy.
    /// Calling it again after a successful setup does nothing.
    pub fn setup(&self, export: u64) -> Result<u64> {
        if let Some(pristine) = self.pristine.get() {
            info!("Protection syscall already set up");
            return Ok(pristine.entry);
        }

        info!("Found protection syscall export at {:#x}", export);
        let entry = if self.memory.read_u8(export)? == NEAR_JMP {
            let target = AddressResolver::new(&self.memory).calculate_absolute(export + 1)?;
            info!("Export starts with a jmp, following it to {:#x}", target);
            target
        } else {
            export
        };

        // Anything that later restores the entry's old protection restores
        // it to this.
        if let Err(e) = self
            .memory
            .protect(entry, PRISTINE_COPY_LEN, Protection::EXECUTE_READWRITE)
        {
            warn!("Could not widen protection of the syscall entry: {}", e);
        }

        let copy = self
            .memory
            .allocate(PRISTINE_COPY_LEN, Protection::EXECUTE_READWRITE)?;
        let bytes = self.memory.read_bytes(entry, PRISTINE_COPY_LEN)?;
        self.memory.write_bytes(copy, &bytes)?;

        let pristine = *self.pristine.get_or_init(|| PristineSyscall { entry, copy });
        info!("Copied protection syscall to {:#x}", pristine.copy);
        Ok(pristine.entry)
    }

    /// Compare the live entry with the pristine copy and put it back if it
    /// was modified.
    pub fn repair(&self) -> RepairOutcome {
        let Some(pristine) = self.pristine.get().copied() else {
            return RepairOutcome::Failed(Error::not_found("pristine syscall copy"));
        };

        let (live, reference) = match self.compare(pristine) {
            Ok(pair) => pair,
            Err(e) => {
                error!("Failed to verify protection syscall integrity: {}", e);
                return RepairOutcome::Failed(e);
            }
        };
        if live == reference {
            return RepairOutcome::Intact;
        }

        let mismatched = live.iter().zip(&reference).filter(|(a, b)| a != b).count();
        warn!(
            "Protection syscall at {:#x} has been modified ({} bytes differ), restoring",
            pristine.entry, mismatched
        );

        if self.memory.write_bytes(pristine.entry, &reference).is_ok()
            && self.verify(pristine, &reference)
        {
            info!("Restored protection syscall");
            return RepairOutcome::RestoredDirect;
        }
        error!("Could not restore protection syscall without changing protection");

        // The entry is made writable through the very syscall being
        // repaired, one byte either side of the compared range included.
        let start = pristine.entry - 1;
        let len = COMPARE_LEN + 1;
        let unlocked = self.call(pristine.entry, start, len, Protection::EXECUTE_READWRITE);
        if !unlocked.succeeded() {
            return RepairOutcome::Failed(Error::ProtectionChangeFailed {
                address: start,
                len,
                message: format!("status {:#x}", unlocked.status),
            });
        }

        let written = self.memory.write_bytes(pristine.entry, &reference);
        self.call(pristine.entry, start, len, unlocked.old);

        match written {
            Ok(()) if self.verify(pristine, &reference) => {
                info!("Restored protection syscall");
                RepairOutcome::RestoredWithProtection
            }
            Ok(()) => RepairOutcome::Failed(Error::TamperDetected {
                address: pristine.entry,
                mismatched,
                compared: COMPARE_LEN,
            }),
            Err(e) => RepairOutcome::Failed(e),
        }
    }

    /// A protection change routed through the guardian: repair, then call
    /// the real syscall. Fails only when setup never happened, in which case
    /// the caller should use the original function instead.
    pub fn hooked_call(&self, address: u64, size: usize, protection: Protection) -> Result<ProtectOutcome> {
        let entry = self
            .entry()
            .ok_or_else(|| Error::not_found("pristine syscall copy"))?;

        let repair = self.repair();
        let result = self.call(entry, address, size, protection);
        Ok(ProtectOutcome { result, repair })
    }

    /// Call the syscall, flushing the secure memory cache and retrying once
    /// on `STATUS_INVALID_PAGE_PROTECTION`.
    fn call(&self, entry: u64, address: u64, size: usize, protection: Protection) -> SyscallResult {
        let mut result = self
            .syscall
            .protect_virtual_memory(entry, address, size, protection);

        if result.status == STATUS_INVALID_PAGE_PROTECTION
            && self.syscall.flush_secure_memory_cache(address, size)
        {
            result = self
                .syscall
                .protect_virtual_memory(entry, address, size, protection);
        }

        if !result.succeeded() {
            error!(
                "Protection syscall ({:#x}, {:#x}, {}) failed with {:#x}",
                address, size, protection, result.status
            );
        }
        result
    }

    fn compare(&self, pristine: PristineSyscall) -> Result<(Vec<u8>, Vec<u8>)> {
        let live = self.memory.read_bytes(pristine.entry, COMPARE_LEN)?;
        let reference = self.memory.read_bytes(pristine.copy, COMPARE_LEN)?;
        Ok((live, reference))
    }

    fn verify(&self, pristine: PristineSyscall, reference: &[u8]) -> bool {
        self.memory
            .read_bytes(pristine.entry, COMPARE_LEN)
            .is_ok_and(|live| live == reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::SnapshotMemory;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const NTDLL: u64 = 0x7FF8_0000_0000;
    const ENTRY: u64 = NTDLL + 0x1000;

    /// Syscall that changes protection on a snapshot.
    struct FakeSyscall<'a> {
        memory: &'a SnapshotMemory,
        invalid_first: AtomicUsize,
        flushes: AtomicUsize,
        calls: AtomicUsize,
    }

    impl<'a> FakeSyscall<'a> {
        fn new(memory: &'a SnapshotMemory) -> Self {
            Self {
                memory,
                invalid_first: AtomicUsize::new(0),
                flushes: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl ProtectSyscall for FakeSyscall<'_> {
        fn protect_virtual_memory(&self, entry: u64, address: u64, size: usize, protection: Protection) -> SyscallResult {
            assert_eq!(entry, ENTRY);
            self.calls.fetch_add(1, Ordering::SeqCst);

            let pending = self.invalid_first.load(Ordering::SeqCst);
            if pending > 0 {
                self.invalid_first.store(pending - 1, Ordering::SeqCst);
                return SyscallResult {
                    status: STATUS_INVALID_PAGE_PROTECTION,
                    old: Protection::NOACCESS,
                };
            }

            match self.memory.protect(address, size, protection) {
                Ok(old) => SyscallResult {
                    status: STATUS_SUCCESS,
                    old,
                },
                Err(_) => SyscallResult {
                    status: 0xC000_0005,
                    old: Protection::NOACCESS,
                },
            }
        }

        fn flush_secure_memory_cache(&self, _address: u64, _size: usize) -> bool {
            self.flushes.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    fn syscall_stub() -> Vec<u8> {
        let mut stub = vec![
            0x4C, 0x8B, 0xD1, // mov r10, rcx
            0xB8, 0x50, 0x00, 0x00, 0x00, // mov eax, 50h
            0xF6, 0x04, 0x25, 0x08, 0x03, 0xFE, 0x7F, 0x01, // test byte ptr [7FFE0308h], 1
            0x75, 0x03, // jnz
            0x0F, 0x05, // syscall
            0xC3, // ret
            0xCD, 0x2E, // int 2Eh
            0xC3, // ret
        ];
        stub.resize(0x400, 0xCC);
        stub
    }

    fn ntdll() -> SnapshotMemory {
        SnapshotMemory::builder()
            .module("ntdll.dll", NTDLL, vec![0xCC; 0x1000], Protection::EXECUTE_READ)
            .region(ENTRY, syscall_stub(), Protection::EXECUTE_READ)
            .build()
    }

    #[test]
    fn test_setup_copies_entry_and_is_idempotent() {
        let memory = ntdll();
        let guardian = SyscallGuardian::new(&memory, FakeSyscall::new(&memory));

        assert_eq!(guardian.setup(ENTRY).unwrap(), ENTRY);
        let copy = guardian.pristine_copy().unwrap();
        assert_eq!(
            memory.read_bytes(copy, PRISTINE_COPY_LEN).unwrap(),
            syscall_stub()[..PRISTINE_COPY_LEN].to_vec()
        );
        assert_eq!(
            memory.query_protection(ENTRY).unwrap(),
            Protection::EXECUTE_READWRITE
        );

        assert_eq!(guardian.setup(ENTRY).unwrap(), ENTRY);
        assert_eq!(guardian.pristine_copy(), Some(copy));
    }

    #[test]
    fn test_setup_follows_leading_jump() {
        let memory = ntdll();
        let export = NTDLL + 0x100;
        let mut jump = vec![0xE9];
        jump.extend_from_slice(&((ENTRY - (export + 5)) as i32).to_le_bytes());
        memory.poke(export, &jump).unwrap();

        let guardian = SyscallGuardian::new(&memory, FakeSyscall::new(&memory));
        assert_eq!(guardian.setup(export).unwrap(), ENTRY);
    }

    #[test]
    fn test_intact_entry_is_left_alone() {
        let memory = ntdll();
        let guardian = SyscallGuardian::new(&memory, FakeSyscall::new(&memory));
        guardian.setup(ENTRY).unwrap();

        let outcome = guardian
            .hooked_call(NTDLL, 0x10, Protection::EXECUTE_READWRITE)
            .unwrap();
        assert!(matches!(outcome.repair, RepairOutcome::Intact));
        assert!(outcome.result.succeeded());
        assert_eq!(outcome.result.old, Protection::EXECUTE_READ);
    }

    #[test]
    fn test_tampered_entry_restored_before_call() {
        let memory = ntdll();
        let syscall = FakeSyscall::new(&memory);
        let guardian = SyscallGuardian::new(&memory, syscall);
        guardian.setup(ENTRY).unwrap();

        // Someone redirects the stub.
        memory.poke(ENTRY + 3, &[0xE9, 0x11, 0x22, 0x33, 0x44]).unwrap();

        let outcome = guardian
            .hooked_call(NTDLL, 0x10, Protection::READWRITE)
            .unwrap();
        assert!(matches!(outcome.repair, RepairOutcome::RestoredDirect));
        assert!(outcome.result.succeeded());
        assert_eq!(
            memory.read_bytes(ENTRY, COMPARE_LEN).unwrap(),
            syscall_stub()[..COMPARE_LEN].to_vec()
        );
    }

    #[test]
    fn test_tampered_read_only_entry_restored_with_protection() {
        let memory = ntdll();
        let guardian = SyscallGuardian::new(&memory, FakeSyscall::new(&memory));
        guardian.setup(ENTRY).unwrap();

        // The tamperer also put the original protection back.
        memory.protect(ENTRY, 1, Protection::EXECUTE_READ).unwrap();
        memory.poke(ENTRY, &[0xC3]).unwrap();

        assert!(matches!(
            guardian.repair(),
            RepairOutcome::RestoredWithProtection
        ));
        assert_eq!(memory.read_u8(ENTRY).unwrap(), 0x4C);
        assert_eq!(
            memory.query_protection(ENTRY).unwrap(),
            Protection::EXECUTE_READ
        );
    }

    #[test]
    fn test_repair_fails_when_protection_cannot_change() {
        let memory = SnapshotMemory::builder()
            .module("ntdll.dll", NTDLL, vec![0xCC; 0x1000], Protection::EXECUTE_READ)
            .region(ENTRY, syscall_stub(), Protection::EXECUTE_READ)
            .deny_protection_changes()
            .build();
        let guardian = SyscallGuardian::new(&memory, FakeSyscall::new(&memory));
        guardian.setup(ENTRY).unwrap();

        memory.poke(ENTRY, &[0xC3]).unwrap();
        assert!(matches!(guardian.repair(), RepairOutcome::Failed(_)));

        // The call itself still goes through (and fails on its own terms).
        let outcome = guardian.hooked_call(NTDLL, 1, Protection::READWRITE).unwrap();
        assert!(!outcome.result.succeeded());
    }

    #[test]
    fn test_invalid_page_protection_retried_once() {
        let memory = ntdll();
        let guardian = SyscallGuardian::new(&memory, FakeSyscall::new(&memory));
        guardian.setup(ENTRY).unwrap();

        guardian.syscall().invalid_first.store(1, Ordering::SeqCst);
        let outcome = guardian.hooked_call(NTDLL, 0x10, Protection::READWRITE).unwrap();
        assert!(outcome.result.succeeded());
        assert_eq!(guardian.syscall().flushes.load(Ordering::SeqCst), 1);
        assert_eq!(guardian.syscall().calls.load(Ordering::SeqCst), 2);

        guardian.syscall().invalid_first.store(2, Ordering::SeqCst);
        let outcome = guardian.hooked_call(NTDLL, 0x10, Protection::READWRITE).unwrap();
        assert_eq!(outcome.result.status, STATUS_INVALID_PAGE_PROTECTION);
        assert_eq!(guardian.syscall().flushes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_call_before_setup_is_an_error() {
        let memory = ntdll();
        let guardian = SyscallGuardian::new(&memory, FakeSyscall::new(&memory));
        assert!(guardian.hooked_call(NTDLL, 1, Protection::READWRITE).is_err());
        assert!(matches!(guardian.repair(), RepairOutcome::Failed(_)));
    }
}
