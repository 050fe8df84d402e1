//! Function prologue heuristics for MSVC-compiled x64 code.

/// Byte sequences that commonly open a function. `None` is a wildcard.
const PROLOGUES: &[&[Option<u8>]] = &[
    // mov [rsp+imm8], rbx / rcx / rdx / rbp / rsi / rdi
    &[Some(0x48), Some(0x89), Some(0x5C), Some(0x24), None],
    &[Some(0x48), Some(0x89), Some(0x4C), Some(0x24), None],
    &[Some(0x48), Some(0x89), Some(0x54), Some(0x24), None],
    &[Some(0x48), Some(0x89), Some(0x6C), Some(0x24), None],
    &[Some(0x48), Some(0x89), Some(0x74), Some(0x24), None],
    &[Some(0x48), Some(0x89), Some(0x7C), Some(0x24), None],
    // mov [rsp+imm8], r8 / r9
    &[Some(0x4C), Some(0x89), Some(0x44), Some(0x24), None],
    &[Some(0x4C), Some(0x89), Some(0x4C), Some(0x24), None],
    // mov rax, rsp / mov r11, rsp
    &[Some(0x48), Some(0x8B), Some(0xC4)],
    &[Some(0x4C), Some(0x8B), Some(0xDC)],
    // push rbp; mov rbp, rsp
    &[Some(0x55), Some(0x48), Some(0x8B), Some(0xEC)],
    &[Some(0x55), Some(0x48), Some(0x89), Some(0xE5)],
    // rex push rbx / rbp / rsi / rdi
    &[Some(0x40), Some(0x53)],
    &[Some(0x40), Some(0x55)],
    &[Some(0x40), Some(0x56)],
    &[Some(0x40), Some(0x57)],
    // push r12..r15
    &[Some(0x41), Some(0x54)],
    &[Some(0x41), Some(0x55)],
    &[Some(0x41), Some(0x56)],
    &[Some(0x41), Some(0x57)],
    // sub rsp, imm8 / imm32
    &[Some(0x48), Some(0x83), Some(0xEC), None],
    &[Some(0x48), Some(0x81), Some(0xEC), None, None, None, None],
];

/// Bytes that end the previous function or pad up to the next one.
const BOUNDARY_BYTES: [u8; 3] = [0xCC, 0x90, 0xC3];

pub(super) fn is_prologue(code: &[u8]) -> bool {
    PROLOGUES.iter().any(|prologue| {
        code.len() >= prologue.len()
            && prologue
                .iter()
                .zip(code)
                .all(|(expected, byte)| expected.is_none_or(|b| b == *byte))
    })
}

/// Functions are aligned to this when the compiler emits no padding.
const FUNCTION_ALIGNMENT: u64 = 16;

/// `data[pos]`, mapped at `address`, starts a function if a prologue begins
/// there and it sits on a boundary: after padding or a return, or on a
/// 16-byte alignment.
pub(super) fn is_function_start(data: &[u8], pos: usize, address: u64) -> bool {
    let after_boundary = pos > 0 && BOUNDARY_BYTES.contains(&data[pos - 1]);
    (after_boundary || address % FUNCTION_ALIGNMENT == 0) && is_prologue(&data[pos..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_prologue() {
        assert!(is_prologue(&[0x48, 0x89, 0x5C, 0x24, 0x08]));
        assert!(is_prologue(&[0x40, 0x53, 0x48, 0x83, 0xEC, 0x20]));
        assert!(is_prologue(&[0x48, 0x83, 0xEC, 0x28]));
        assert!(!is_prologue(&[0x48, 0x83, 0xEC]));
        assert!(!is_prologue(&[0x90, 0x90, 0x90]));
    }

    #[test]
    fn test_function_start_needs_boundary() {
        let data = [0xCC, 0x40, 0x53, 0x00, 0x40, 0x53];
        assert!(is_function_start(&data, 1, 0x1001));
        assert!(!is_function_start(&data, 4, 0x1004));
        assert!(!is_function_start(&data, 0, 0x1000));
    }

    #[test]
    fn test_aligned_prologue_is_a_boundary() {
        // jmp rel32 tail call, then a prologue on a 16-byte boundary
        let data = [0xE9, 0x10, 0x20, 0x30, 0x00, 0x48, 0x89, 0x5C, 0x24, 0x08];
        assert!(is_function_start(&data, 5, 0x1400));
        assert!(!is_function_start(&data, 5, 0x1408));
        assert!(is_function_start(&data[5..], 0, 0x1400));
    }
}
