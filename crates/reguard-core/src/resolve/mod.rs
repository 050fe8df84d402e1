//! Address resolution on x86-64 code.
//!
//! Everything here is heuristic: the code being inspected is obfuscated and
//! interleaved with junk, so every lookup returns `Option` and callers are
//! expected to move on to their next candidate.

mod prologue;

use iced_x86::{Decoder, DecoderOptions, FlowControl, Formatter, Instruction, IntelFormatter, OpKind};
use tracing::debug;

use crate::error::{Error, Result};
use crate::memory::{PAGE_SIZE, ProcessMemory, page_floor};

/// Longest legal x86 instruction.
pub const MAX_INSTRUCTION_LEN: usize = 15;

/// How far back `find_function_start` looks for a prologue.
pub const FUNCTION_SEARCH_WINDOW: usize = 0x1000;

/// How far back `get_disassembly_behind` decodes.
pub const BEHIND_WINDOW: usize = 0x100;

const BITNESS: u32 = 64;

/// One decoded instruction. Produced on demand and never cached, since the
/// bytes underneath may be patched at any time.
#[derive(Debug, Clone)]
pub struct ResolvedInstruction {
    pub address: u64,
    pub len: usize,
    pub bytes: Vec<u8>,
    /// Jump or conditional jump (calls and returns are not branches here).
    pub is_branch: bool,
    pub is_conditional: bool,
    /// Encoded with a 32-bit displacement (`E9` / `0F 8x`) rather than 8-bit.
    pub is_far: bool,
    pub branch_target: Option<u64>,
    pub text: String,
}

impl ResolvedInstruction {
    fn from_decoded(instruction: &Instruction, bytes: &[u8]) -> Self {
        let flow = instruction.flow_control();
        let is_branch = matches!(
            flow,
            FlowControl::UnconditionalBranch
                | FlowControl::ConditionalBranch
                | FlowControl::IndirectBranch
        );
        let branch_target = match instruction.op0_kind() {
            OpKind::NearBranch16 | OpKind::NearBranch32 | OpKind::NearBranch64 => {
                Some(instruction.near_branch_target())
            }
            _ => None,
        };

        let mut text = String::new();
        IntelFormatter::new().format(instruction, &mut text);

        Self {
            address: instruction.ip(),
            len: instruction.len(),
            bytes: bytes[..instruction.len()].to_vec(),
            is_branch,
            is_conditional: flow == FlowControl::ConditionalBranch,
            is_far: instruction.is_jcc_near() || instruction.is_jmp_near(),
            branch_target,
            text,
        }
    }

    pub fn end(&self) -> u64 {
        self.address + self.len as u64
    }
}

/// Decode a single instruction from `bytes` as if it lived at `address`.
pub fn decode_at(bytes: &[u8], address: u64) -> Option<ResolvedInstruction> {
    if bytes.is_empty() {
        return None;
    }
    let mut decoder = Decoder::with_ip(BITNESS, bytes, address, DecoderOptions::NONE);
    let instruction = decoder.decode();
    if instruction.is_invalid() {
        return None;
    }
    Some(ResolvedInstruction::from_decoded(&instruction, bytes))
}

/// Decode `data` (which lives at `base`) from `start` up to `stop`, returning
/// the chain only if it lands exactly on `stop` without an invalid instruction.
fn decode_chain(data: &[u8], base: u64, start: usize, stop: usize) -> Option<Vec<Instruction>> {
    let mut decoder = Decoder::with_ip(
        BITNESS,
        &data[start..stop],
        base + start as u64,
        DecoderOptions::NONE,
    );
    let mut chain = Vec::new();
    let mut instruction = Instruction::default();

    while decoder.can_decode() {
        decoder.decode_out(&mut instruction);
        if instruction.is_invalid() {
            return None;
        }
        chain.push(instruction);
    }

    // A truncated final instruction decodes as invalid, so reaching here
    // means the stream ended exactly at `stop`.
    Some(chain)
}

pub struct AddressResolver<'a, M: ProcessMemory + ?Sized> {
    memory: &'a M,
}

impl<'a, M: ProcessMemory + ?Sized> AddressResolver<'a, M> {
    pub fn new(memory: &'a M) -> Self {
        Self { memory }
    }

    /// Read up to `len` bytes at `address`, shortening the read to the end of
    /// the page when the next page is not readable.
    fn read_forward(&self, address: u64, len: usize) -> Option<Vec<u8>> {
        if let Ok(bytes) = self.memory.read_bytes(address, len) {
            return Some(bytes);
        }
        let to_page_end = (page_floor(address) + PAGE_SIZE - address) as usize;
        self.memory
            .read_bytes(address, to_page_end.min(len))
            .ok()
    }

    /// Read the `window` bytes ending at `address`, shrinking the window to
    /// the current page when earlier memory is not readable.
    fn read_behind(&self, address: u64, window: usize) -> Option<(u64, Vec<u8>)> {
        let start = address.saturating_sub(window as u64);
        if let Ok(bytes) = self.memory.read_bytes(start, (address - start) as usize) {
            return Some((start, bytes));
        }
        let start = page_floor(address.saturating_sub(1)).max(start);
        let bytes = self
            .memory
            .read_bytes(start, (address - start) as usize)
            .ok()?;
        Some((start, bytes))
    }

    pub fn resolve_instruction(&self, address: u64) -> Option<ResolvedInstruction> {
        let bytes = self.read_forward(address, MAX_INSTRUCTION_LEN)?;
        decode_at(&bytes, address)
    }

    /// Instruction whose encoding covers `address` without starting there,
    /// e.g. one carrying an immediate found by a data scan.
    ///
    /// Start points are tried nearest first; a candidate further back that
    /// ends at the same place (an extra prefix byte) replaces the nearer one.
    pub fn resolve_instruction_containing(&self, address: u64) -> Option<ResolvedInstruction> {
        let mut best: Option<ResolvedInstruction> = None;

        for back in 1..=MAX_INSTRUCTION_LEN as u64 {
            let Some(start) = address.checked_sub(back) else {
                break;
            };
            let Some(candidate) = self.resolve_instruction(start) else {
                continue;
            };
            if candidate.end() <= address {
                continue;
            }
            match &best {
                Some(current) if current.end() != candidate.end() => {}
                _ => best = Some(candidate),
            }
        }

        best
    }

    /// Absolute address of a rel32 operand stored at `address`, for an
    /// instruction that ends right after the operand.
    pub fn calculate_absolute(&self, address: u64) -> Result<u64> {
        self.calculate_absolute_with(address, 4)
    }

    /// Like [`calculate_absolute`](Self::calculate_absolute) when the
    /// instruction continues `next_instruction` bytes past `address`.
    pub fn calculate_absolute_with(&self, address: u64, next_instruction: u64) -> Result<u64> {
        let displacement = self.memory.read_i32(address)?;
        Ok((address + next_instruction).wrapping_add_signed(displacement as i64))
    }

    /// Walk backward from `address` to the nearest recognizable prologue.
    pub fn find_function_start(&self, address: u64) -> Option<u64> {
        let (start, mut data) = self.read_behind(address, FUNCTION_SEARCH_WINDOW)?;

        // Include the bytes at `address` itself so a prologue right there counts.
        if let Some(ahead) = self.read_forward(address, MAX_INSTRUCTION_LEN) {
            data.extend_from_slice(&ahead);
        }

        let here = (address - start) as usize;
        let found = (0..=here)
            .rev()
            .find(|&pos| prologue::is_function_start(&data, pos, start + pos as u64))
            .map(|pos| start + pos as u64);

        if found.is_none() {
            debug!(
                "No function start within {:#x} bytes before {:#x}",
                here, address
            );
        }
        found
    }

    /// Instructions preceding `address`, nearest first.
    ///
    /// Candidate start points are tried one byte further back each time; a
    /// start is accepted only if decoding forward from it lands exactly on
    /// `address`. The longest such chain wins.
    pub fn get_disassembly_behind(&self, address: u64) -> Vec<ResolvedInstruction> {
        let Some((start, data)) = self.read_behind(address, BEHIND_WINDOW) else {
            return Vec::new();
        };
        let stop = data.len();

        let mut best: Vec<Instruction> = Vec::new();
        for back in 1..=stop {
            let from = stop - back;
            match decode_chain(&data, start, from, stop) {
                Some(chain) if chain.len() >= best.len() => best = chain,
                _ => {}
            }
        }

        best.iter()
            .rev()
            .map(|instruction| {
                let offset = (instruction.ip() - start) as usize;
                ResolvedInstruction::from_decoded(instruction, &data[offset..])
            })
            .collect()
    }

    /// Address of the first of the next `max_instructions` instructions whose
    /// first byte is `opcode`.
    pub fn scan_opcode(&self, address: u64, max_instructions: usize, opcode: u8) -> Option<u64> {
        let mut ip = address;
        for _ in 0..max_instructions {
            let instruction = self.resolve_instruction(ip)?;
            if instruction.bytes[0] == opcode {
                return Some(ip);
            }
            ip = instruction.end();
        }
        None
    }

    /// Resolve the instruction at `address`, failing with `DecodeFailure`.
    pub fn require_instruction(&self, address: u64) -> Result<ResolvedInstruction> {
        self.resolve_instruction(address)
            .ok_or(Error::DecodeFailure(address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Protection, SnapshotMemory};

    const BASE: u64 = 0x140001000;

    fn memory_with(bytes: Vec<u8>) -> SnapshotMemory {
        SnapshotMemory::builder()
            .region(BASE, bytes, Protection::EXECUTE_READ)
            .build()
    }

    #[test]
    fn test_calculate_absolute_call() {
        // call +0x100 at BASE+0x10
        let mut bytes = vec![0x90u8; 0x40];
        bytes[0x10] = 0xE8;
        bytes[0x11..0x15].copy_from_slice(&0x100i32.to_le_bytes());
        let memory = memory_with(bytes);
        let resolver = AddressResolver::new(&memory);

        let absolute = resolver.calculate_absolute(BASE + 0x11).unwrap();
        assert_eq!(absolute, BASE + 0x10 + 5 + 0x100);
    }

    #[test]
    fn test_calculate_absolute_negative_displacement() {
        // lea rcx, [rip-0x20] at BASE+0x30
        let mut bytes = vec![0x90u8; 0x40];
        bytes[0x30..0x33].copy_from_slice(&[0x48, 0x8D, 0x0D]);
        bytes[0x33..0x37].copy_from_slice(&(-0x20i32).to_le_bytes());
        let memory = memory_with(bytes);
        let resolver = AddressResolver::new(&memory);

        let absolute = resolver.calculate_absolute(BASE + 0x33).unwrap();
        assert_eq!(absolute, BASE + 0x37 - 0x20);
    }

    #[test]
    fn test_calculate_absolute_with_trailing_immediate() {
        // cmp byte ptr [rip+0x40], 0 : 80 3D disp32 00
        let mut bytes = vec![0x90u8; 0x20];
        bytes[0..2].copy_from_slice(&[0x80, 0x3D]);
        bytes[2..6].copy_from_slice(&0x40i32.to_le_bytes());
        let memory = memory_with(bytes);
        let resolver = AddressResolver::new(&memory);

        assert_eq!(
            resolver.calculate_absolute_with(BASE + 2, 5).unwrap(),
            BASE + 7 + 0x40
        );
    }

    #[test]
    fn test_resolve_near_jcc() {
        // ja rel32 at BASE
        let mut bytes = vec![0x0F, 0x87];
        bytes.extend_from_slice(&0x200i32.to_le_bytes());
        bytes.extend_from_slice(&[0x90; 10]);
        let memory = memory_with(bytes);

        let instruction = AddressResolver::new(&memory).resolve_instruction(BASE).unwrap();
        assert_eq!(instruction.len, 6);
        assert!(instruction.is_branch);
        assert!(instruction.is_conditional);
        assert!(instruction.is_far);
        assert_eq!(instruction.branch_target, Some(BASE + 6 + 0x200));
    }

    #[test]
    fn test_resolve_short_jmp() {
        let memory = memory_with(vec![0xEB, 0x10, 0x90, 0x90]);
        let instruction = AddressResolver::new(&memory).resolve_instruction(BASE).unwrap();
        assert_eq!(instruction.len, 2);
        assert!(instruction.is_branch);
        assert!(!instruction.is_conditional);
        assert!(!instruction.is_far);
        assert_eq!(instruction.branch_target, Some(BASE + 0x12));
    }

    #[test]
    fn test_resolve_invalid_returns_none() {
        // 0x06 (push es) is invalid in 64-bit mode
        let memory = memory_with(vec![0x06, 0x00, 0x00]);
        assert!(AddressResolver::new(&memory).resolve_instruction(BASE).is_none());
        assert!(AddressResolver::new(&memory).resolve_instruction(0x1000).is_none());
    }

    #[test]
    fn test_resolve_at_region_end() {
        // Only two bytes readable before an unmapped page.
        let memory = SnapshotMemory::builder()
            .region(BASE + 0xFFE, vec![0x90, 0xC3], Protection::EXECUTE_READ)
            .build();
        let instruction = AddressResolver::new(&memory)
            .resolve_instruction(BASE + 0xFFF)
            .unwrap();
        assert_eq!(instruction.bytes, vec![0xC3]);
    }

    #[test]
    fn test_find_function_start_from_body() {
        let mut bytes = vec![0xCCu8; 0x100];
        // prologue at 0x40: mov [rsp+8], rbx; sub rsp, 0x20
        bytes[0x40..0x49].copy_from_slice(&[0x48, 0x89, 0x5C, 0x24, 0x08, 0x48, 0x83, 0xEC, 0x20]);
        for b in &mut bytes[0x49..0xA0] {
            *b = 0x90;
        }
        let memory = memory_with(bytes);
        let resolver = AddressResolver::new(&memory);

        assert_eq!(resolver.find_function_start(BASE + 0x40 + 50), Some(BASE + 0x40));
        assert_eq!(resolver.find_function_start(BASE + 0x40), Some(BASE + 0x40));
    }

    #[test]
    fn test_find_function_start_after_tail_jump() {
        let mut bytes = vec![0u8; 0x1000];
        bytes[0xFB..0x100].copy_from_slice(&[0xE9, 0x10, 0x20, 0x30, 0x00]);
        bytes[0x100..0x105].copy_from_slice(&[0x48, 0x89, 0x5C, 0x24, 0x08]);
        let memory = memory_with(bytes);
        let resolver = AddressResolver::new(&memory);

        assert_eq!(resolver.find_function_start(BASE + 0x140), Some(BASE + 0x100));
    }

    #[test]
    fn test_find_function_start_none_without_prologue() {
        let memory = memory_with(vec![0u8; 0x2000]);
        let resolver = AddressResolver::new(&memory);
        assert_eq!(resolver.find_function_start(BASE + 0x1800), None);
    }

    #[test]
    fn test_disassembly_behind_lands_on_address() {
        // xor eax, eax; test eax, eax; jnz +2; mov eax, 1; <address>
        let code = [
            0x31, 0xC0, // xor eax, eax
            0x85, 0xC0, // test eax, eax
            0x75, 0x05, // jnz
            0xB8, 0x01, 0x00, 0x00, 0x00, // mov eax, 1
            0xC3, // ret
        ];
        let mut bytes = vec![0xCCu8; 0x20];
        bytes.extend_from_slice(&code);
        let memory = memory_with(bytes);
        let resolver = AddressResolver::new(&memory);

        let target = BASE + 0x20 + 11;
        let behind = resolver.get_disassembly_behind(target);
        assert!(behind.len() >= 4);

        // nearest first
        assert_eq!(behind[0].address, BASE + 0x20 + 6);
        assert_eq!(behind[0].end(), target);
        assert_eq!(behind[1].address, BASE + 0x20 + 4);
        assert!(behind[1].is_branch && behind[1].is_conditional);

        for pair in behind.windows(2) {
            assert_eq!(pair[1].end(), pair[0].address);
        }
    }

    #[test]
    fn test_instruction_containing_immediate() {
        // sub rax, 0x128E329
        let mut bytes = vec![0xCCu8; 0x10];
        bytes.extend_from_slice(&[0x48, 0x2D, 0x29, 0xE3, 0x28, 0x01]);
        bytes.extend_from_slice(&[0xCC; 0x10]);
        let memory = memory_with(bytes);

        let instruction = AddressResolver::new(&memory)
            .resolve_instruction_containing(BASE + 0x12)
            .unwrap();
        assert_eq!(instruction.address, BASE + 0x10);
        assert_eq!(instruction.len, 6);
    }

    #[test]
    fn test_scan_opcode() {
        // mov rcx, rbx; call rel32; ret
        let mut bytes = vec![0x48, 0x89, 0xD9, 0xE8];
        bytes.extend_from_slice(&0x10i32.to_le_bytes());
        bytes.push(0xC3);
        let memory = memory_with(bytes);
        let resolver = AddressResolver::new(&memory);

        assert_eq!(resolver.scan_opcode(BASE, 10, 0xE8), Some(BASE + 3));
        assert_eq!(resolver.scan_opcode(BASE, 1, 0xE8), None);
    }
}
