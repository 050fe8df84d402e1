//! Replacement byte sequences.

use crate::resolve::ResolvedInstruction;

/// Placeholder in patch bytes: keep whatever byte is already there.
pub const SKIP: i16 = -1;

pub const NOP: u8 = 0x90;
pub const SHORT_JMP: u8 = 0xEB;
pub const NEAR_JMP: u8 = 0xE9;

/// `ret`
pub const RETURN: &[u8] = &[0xC3];

/// `mov al, 0; ret`
pub const RETURN_FALSE: &[u8] = &[0xB0, 0x00, 0xC3];

/// Length of [`absolute_jump`].
pub const ABSOLUTE_JUMP_LEN: usize = 14;

pub fn to_patch_bytes(bytes: &[u8]) -> Vec<i16> {
    bytes.iter().map(|&b| b as i16).collect()
}

/// Pad `bytes` with `nop` up to `original_len`.
pub fn nop_fill(bytes: &[u8], original_len: usize) -> Vec<u8> {
    let mut out = bytes.to_vec();
    if out.len() < original_len {
        out.resize(original_len, NOP);
    }
    out
}

/// Rewrite a conditional jump into an unconditional one to the same target.
///
/// `7x rel8` becomes `EB rel8`. `0F 8x rel32` becomes `E9 (rel32 + 1) 90`:
/// the `jmp` is one byte shorter, so the displacement grows by one and a
/// `nop` fills the freed byte. Returns `None` for anything else.
pub fn jcc_to_jmp(instruction: &ResolvedInstruction) -> Option<Vec<u8>> {
    if !instruction.is_conditional {
        return None;
    }

    match instruction.bytes.as_slice() {
        [op, rel8] if (0x70..=0x7F).contains(op) => Some(vec![SHORT_JMP, *rel8]),
        [0x0F, op, d0, d1, d2, d3] if (0x80..=0x8F).contains(op) => {
            let rel32 = i32::from_le_bytes([*d0, *d1, *d2, *d3]);
            let adjusted = rel32.checked_add(1)?;

            let mut out = Vec::with_capacity(6);
            out.push(NEAR_JMP);
            out.extend_from_slice(&adjusted.to_le_bytes());
            out.push(NOP);
            Some(out)
        }
        _ => None,
    }
}

/// `jmp qword ptr [rip+0]` followed by the 8-byte target.
pub fn absolute_jump(target: u64) -> [u8; ABSOLUTE_JUMP_LEN] {
    let mut out = [0u8; ABSOLUTE_JUMP_LEN];
    out[..6].copy_from_slice(&[0xFF, 0x25, 0x00, 0x00, 0x00, 0x00]);
    out[6..].copy_from_slice(&target.to_le_bytes());
    out
}

/// `jmp rel32` from `from` to `to`, if the distance fits.
pub fn relative_jump(from: u64, to: u64) -> Option<[u8; 5]> {
    let distance = (to as i64).wrapping_sub(from as i64 + 5);
    let rel32 = i32::try_from(distance).ok()?;

    let mut out = [0u8; 5];
    out[0] = NEAR_JMP;
    out[1..].copy_from_slice(&rel32.to_le_bytes());
    Some(out)
}
