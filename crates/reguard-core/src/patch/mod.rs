//! Byte-level code patches.
//!
//! Every write goes through a [`ProtectGuard`], so the pages around a patch
//! are never left writable after a call returns, whether it succeeded or not.

pub mod encode;

pub use encode::{
    ABSOLUTE_JUMP_LEN, RETURN, RETURN_FALSE, SKIP, absolute_jump, jcc_to_jmp, nop_fill,
    relative_jump, to_patch_bytes,
};

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::memory::{ProcessMemory, ProtectGuard, Protection};

/// Write `bytes` at `address` under a scoped RWX protection change.
pub fn write_code<M: ProcessMemory + ?Sized>(memory: &M, address: u64, bytes: &[u8]) -> Result<()> {
    let _guard = ProtectGuard::new(memory, address, bytes.len(), Protection::EXECUTE_READWRITE)?;
    memory.write_bytes(address, bytes)?;
    memory.flush_instruction_cache(address, bytes.len());
    Ok(())
}

#[derive(Debug, Clone)]
pub struct Patch {
    address: u64,
    original: Vec<u8>,
    bytes: Vec<i16>,
    enabled: bool,
    immediate: bool,
}

impl Patch {
    /// Capture the original bytes at `address` under a scoped protection
    /// change and, for an immediate patch, apply right away. Other patches start disabled and wait for
    /// [`toggle`](Self::toggle).
    pub fn create<M: ProcessMemory + ?Sized>(
        memory: &M,
        address: u64,
        bytes: Vec<i16>,
        immediate: bool,
    ) -> Result<Self> {
        if bytes.is_empty() {
            return Err(Error::InvalidPattern("empty patch".to_string()));
        }
        if let Some(bad) = bytes.iter().find(|b| !(SKIP..=0xFF).contains(*b)) {
            return Err(Error::InvalidPattern(format!("patch byte {} out of range", bad)));
        }

        // The site must be writable now, not only when the patch is applied.
        let original = {
            let _guard =
                ProtectGuard::new(memory, address, bytes.len(), Protection::EXECUTE_READWRITE)?;
            memory.read_bytes(address, bytes.len())?
        };

        let mut patch = Self {
            address,
            original,
            bytes,
            enabled: false,
            immediate,
        };

        if immediate {
            patch.apply(memory)?;
        }

        Ok(patch)
    }

    /// [`create`](Self::create) with concrete bytes.
    pub fn create_bytes<M: ProcessMemory + ?Sized>(
        memory: &M,
        address: u64,
        bytes: &[u8],
        immediate: bool,
    ) -> Result<Self> {
        Self::create(memory, address, to_patch_bytes(bytes), immediate)
    }

    pub fn address(&self) -> u64 {
        self.address
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn original(&self) -> &[u8] {
        &self.original
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_immediate(&self) -> bool {
        self.immediate
    }

    /// Replacement as given, [`SKIP`] marking untouched bytes.
    pub fn bytes(&self) -> &[i16] {
        &self.bytes
    }

    /// Bytes that `apply` writes, with skipped positions filled from the
    /// original.
    pub fn replacement(&self) -> Vec<u8> {
        self.bytes
            .iter()
            .zip(&self.original)
            .map(|(&b, &orig)| if b == SKIP { orig } else { b as u8 })
            .collect()
    }

    pub fn apply<M: ProcessMemory + ?Sized>(&mut self, memory: &M) -> Result<()> {
        write_code(memory, self.address, &self.replacement())?;
        self.enabled = true;
        info!(
            "Patched {:#x} ({} bytes): {}",
            self.address,
            self.len(),
            format_bytes(&self.replacement())
        );
        Ok(())
    }

    pub fn revert<M: ProcessMemory + ?Sized>(&mut self, memory: &M) -> Result<()> {
        write_code(memory, self.address, &self.original)?;
        self.enabled = false;
        debug!("Reverted patch at {:#x}", self.address);
        Ok(())
    }

    /// Bring the patch to the requested state. Does nothing when it is
    /// already there, and immediate patches ignore being switched off.
    pub fn toggle<M: ProcessMemory + ?Sized>(&mut self, memory: &M, enabled: bool) -> Result<()> {
        if self.enabled == enabled || (self.immediate && !enabled) {
            return Ok(());
        }
        if enabled {
            self.apply(memory)
        } else {
            self.revert(memory)
        }
    }
}

pub(crate) fn format_bytes(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
