mod guard;
#[cfg(target_os = "windows")]
mod local;
mod module;
mod protection;
mod snapshot;

pub use guard::ProtectGuard;
#[cfg(target_os = "windows")]
pub use local::LocalProcess;
pub use module::{ModuleInfo, ModuleQuery};
pub use protection::Protection;
pub use snapshot::{SnapshotMemory, SnapshotMemoryBuilder};

use crate::error::{Error, Result};

/// Page granularity assumed for protection changes.
pub const PAGE_SIZE: u64 = 0x1000;

/// Access to the memory of the process we live in (or a stand-in for it).
///
/// Addresses are plain `u64` values: the memory belongs to the host process,
/// so nothing here hands out references into it.
pub trait ProcessMemory {
    fn read_bytes(&self, address: u64, len: usize) -> Result<Vec<u8>>;

    /// Write without touching protection. Fails instead of faulting when the
    /// range is not currently writable.
    fn write_bytes(&self, address: u64, bytes: &[u8]) -> Result<()>;

    fn query_protection(&self, address: u64) -> Result<Protection>;

    /// Change the protection of every page touched by `[address, address + len)`.
    /// Returns the previous protection of the first page.
    fn protect(&self, address: u64, len: usize, protection: Protection) -> Result<Protection>;

    /// Allocate fresh memory. Allocations are never freed.
    fn allocate(&self, len: usize, protection: Protection) -> Result<u64>;

    fn flush_instruction_cache(&self, _address: u64, _len: usize) {}

    fn read_u8(&self, address: u64) -> Result<u8> {
        let bytes = self.read_bytes(address, 1)?;
        Ok(bytes[0])
    }

    fn read_i32(&self, address: u64) -> Result<i32> {
        let bytes = self.read_bytes(address, 4)?;
        Ok(i32::from_le_bytes(to_array(&bytes, address)?))
    }

    fn read_u32(&self, address: u64) -> Result<u32> {
        let bytes = self.read_bytes(address, 4)?;
        Ok(u32::from_le_bytes(to_array(&bytes, address)?))
    }

    fn read_u64(&self, address: u64) -> Result<u64> {
        let bytes = self.read_bytes(address, 8)?;
        Ok(u64::from_le_bytes(to_array(&bytes, address)?))
    }
}

impl<T: ProcessMemory + ?Sized> ProcessMemory for &T {
    fn read_bytes(&self, address: u64, len: usize) -> Result<Vec<u8>> {
        (**self).read_bytes(address, len)
    }

    fn write_bytes(&self, address: u64, bytes: &[u8]) -> Result<()> {
        (**self).write_bytes(address, bytes)
    }

    fn query_protection(&self, address: u64) -> Result<Protection> {
        (**self).query_protection(address)
    }

    fn protect(&self, address: u64, len: usize, protection: Protection) -> Result<Protection> {
        (**self).protect(address, len, protection)
    }

    fn allocate(&self, len: usize, protection: Protection) -> Result<u64> {
        (**self).allocate(len, protection)
    }

    fn flush_instruction_cache(&self, address: u64, len: usize) {
        (**self).flush_instruction_cache(address, len)
    }
}

fn to_array<const N: usize>(bytes: &[u8], address: u64) -> Result<[u8; N]> {
    bytes
        .get(..N)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| Error::MemoryReadFailed {
            address,
            message: format!("short read: {} of {} bytes", bytes.len(), N),
        })
}

/// Round `address` down to its page.
pub fn page_floor(address: u64) -> u64 {
    address & !(PAGE_SIZE - 1)
}
