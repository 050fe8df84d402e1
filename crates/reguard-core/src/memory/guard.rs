use tracing::{debug, error};

use super::{PAGE_SIZE, ProcessMemory, Protection, page_floor};
use crate::error::Result;

/// Scoped protection change.
///
/// The previous protection of every touched page is recorded before the
/// change and put back when the guard is dropped, whichever way the scope
/// is left.
pub struct ProtectGuard<'m, M: ProcessMemory + ?Sized> {
    memory: &'m M,
    address: u64,
    len: usize,
    previous: Vec<(u64, Protection)>,
}

impl<'m, M: ProcessMemory + ?Sized> ProtectGuard<'m, M> {
    pub fn new(memory: &'m M, address: u64, len: usize, protection: Protection) -> Result<Self> {
        let len = len.max(1);
        let first = page_floor(address);
        let last = page_floor(address + len as u64 - 1);

        let mut previous = Vec::new();
        let mut page = first;
        while page <= last {
            previous.push((page, memory.query_protection(page)?));
            page += PAGE_SIZE;
        }

        memory.protect(address, len, protection)?;
        debug!(
            "Protection of {:#x}..{:#x} set to {} (was {})",
            address,
            address + len as u64,
            protection,
            previous[0].1
        );

        Ok(Self {
            memory,
            address,
            len,
            previous,
        })
    }

    /// Protection of the first page before the guard took effect.
    pub fn previous(&self) -> Protection {
        self.previous[0].1
    }
}

impl<M: ProcessMemory + ?Sized> Drop for ProtectGuard<'_, M> {
    fn drop(&mut self) {
        let uniform = self.previous.iter().all(|(_, p)| *p == self.previous[0].1);

        let restored = if uniform {
            self.memory
                .protect(self.address, self.len, self.previous[0].1)
                .map(|_| ())
        } else {
            self.previous.iter().try_for_each(|(page, protection)| {
                self.memory
                    .protect(*page, PAGE_SIZE as usize, *protection)
                    .map(|_| ())
            })
        };

        if let Err(e) = restored {
            error!(
                "Failed to restore protection of {:#x} ({} bytes): {}",
                self.address, self.len, e
            );
        }
    }
}
