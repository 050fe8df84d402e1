//! Byte-pattern search over process memory.

use tracing::debug;

use super::Pattern;
use crate::memory::{ModuleInfo, PAGE_SIZE, ProcessMemory, page_floor};

/// Bytes read per step when walking a region.
pub const SCAN_CHUNK_SIZE: usize = 1024 * 1024;

pub struct Scanner<'a, M: ProcessMemory + ?Sized> {
    memory: &'a M,
}

impl<'a, M: ProcessMemory + ?Sized> Scanner<'a, M> {
    pub fn new(memory: &'a M) -> Self {
        Self { memory }
    }

    /// First match of `pattern` fully inside `[start, start + size)`.
    pub fn scan(&self, start: u64, size: usize, pattern: &Pattern) -> Option<u64> {
        self.find_first(start, size, pattern.len(), |data| pattern.find_in(data))
    }

    pub fn scan_module(&self, module: &ModuleInfo, pattern: &Pattern) -> Option<u64> {
        self.scan(module.base, module.size as usize, pattern)
    }

    /// Nearest match starting at or before `anchor`, no further back than
    /// `window` bytes. Unreadable memory at the far end of the window is
    /// dropped a page at a time.
    pub fn scan_reverse(&self, anchor: u64, window: usize, pattern: &Pattern) -> Option<u64> {
        let mut start = anchor.saturating_sub(window as u64);

        let data = loop {
            let len = (anchor - start) as usize + pattern.len();
            match self.memory.read_bytes(start, len) {
                Ok(data) => break data,
                Err(e) => {
                    let next = page_floor(start) + PAGE_SIZE;
                    if next > anchor {
                        debug!("Reverse scan from {:#x} could not read memory: {}", anchor, e);
                        return None;
                    }
                    start = next;
                }
            }
        };

        pattern.rfind_in(&data).map(|pos| start + pos as u64)
    }

    /// Exact byte-sequence search.
    pub fn scan_data(&self, start: u64, size: usize, needle: &[u8]) -> Option<u64> {
        if needle.is_empty() {
            return None;
        }
        let finder = memchr::memmem::Finder::new(needle);
        self.find_first(start, size, needle.len(), |data| finder.find(data))
    }

    /// Every match of `pattern` in the region, found by re-scanning from one
    /// byte past the previous match. Overlapping matches are reported.
    pub fn scan_all<'p>(&self, start: u64, size: usize, pattern: &'p Pattern) -> Matches<'a, 'p, M> {
        Matches {
            scanner: Scanner {
                memory: self.memory,
            },
            pattern,
            cursor: start,
            end: start + size as u64,
        }
    }

    fn find_first<F>(&self, start: u64, size: usize, needle_len: usize, find: F) -> Option<u64>
    where
        F: Fn(&[u8]) -> Option<usize>,
    {
        if needle_len == 0 || size < needle_len {
            return None;
        }

        let mut offset: usize = 0;
        let mut tail: Vec<u8> = Vec::new();

        while offset < size {
            let read_size = (size - offset).min(SCAN_CHUNK_SIZE);
            let addr = start + offset as u64;

            let chunk = match self.memory.read_bytes(addr, read_size) {
                Ok(bytes) => bytes,
                Err(e) => {
                    debug!(
                        "Skipping unreadable chunk at {:#x} ({:#x} bytes): {}",
                        addr, read_size, e
                    );
                    tail.clear();
                    offset += read_size;
                    continue;
                }
            };

            let mut data = Vec::with_capacity(tail.len() + chunk.len());
            data.extend_from_slice(&tail);
            data.extend_from_slice(&chunk);

            let data_base = addr - tail.len() as u64;
            if let Some(pos) = find(&data) {
                return Some(data_base + pos as u64);
            }

            let keep = needle_len - 1;
            tail = data[data.len().saturating_sub(keep)..].to_vec();

            offset += read_size;
        }

        None
    }
}

/// Incremental re-scan, see [`Scanner::scan_all`].
pub struct Matches<'a, 'p, M: ProcessMemory + ?Sized> {
    scanner: Scanner<'a, M>,
    pattern: &'p Pattern,
    cursor: u64,
    end: u64,
}

impl<M: ProcessMemory + ?Sized> Iterator for Matches<'_, '_, M> {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        if self.cursor >= self.end {
            return None;
        }

        let size = (self.end - self.cursor) as usize;
        match self.scanner.scan(self.cursor, size, self.pattern) {
            Some(found) => {
                self.cursor = found + 1;
                Some(found)
            }
            None => {
                self.cursor = self.end;
                None
            }
        }
    }
}
