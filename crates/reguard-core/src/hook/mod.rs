//! Inline function hooks.
//!
//! The first instructions of the target are overwritten with a 14-byte
//! absolute jump to the detour. The instructions that were displaced are
//! re-encoded into a trampoline, followed by a jump back to the rest of the
//! target, so the detour can still call the original.
//!
//! Other threads keep running while the jump is written. A thread that is
//! executing inside the overwritten bytes at that moment resumes in the
//! middle of the jump and crashes, so hooks belong on startup, before the
//! target is hot. Threads are not suspended around the write: a suspended
//! thread holding the heap lock would deadlock the allocations made here.

use iced_x86::{
    BlockEncoder, BlockEncoderOptions, Code, Decoder, DecoderOptions, FlowControl, Instruction,
    InstructionBlock,
};
use tracing::info;

use crate::error::{Error, Result};
use crate::memory::{ProcessMemory, Protection};
use crate::patch::{ABSOLUTE_JUMP_LEN, absolute_jump, nop_fill, write_code};
use crate::resolve::MAX_INSTRUCTION_LEN;

/// Space allocated for each trampoline.
pub const TRAMPOLINE_SIZE: usize = 0x100;

#[derive(Debug, Clone)]
pub struct InlineHook {
    target: u64,
    detour: u64,
    trampoline: u64,
    original: Vec<u8>,
}

impl InlineHook {
    pub fn install<M: ProcessMemory + ?Sized>(memory: &M, target: u64, detour: u64) -> Result<Self> {
        let code = memory.read_bytes(target, ABSOLUTE_JUMP_LEN + MAX_INSTRUCTION_LEN)?;
        let mut block = steal_instructions(&code, target)?;
        let stolen_len: usize = block.iter().map(|i| i.len()).sum();

        let relocation_failed = |e: iced_x86::IcedError| Error::HookFailed {
            address: target,
            message: format!("relocating prologue: {}", e),
        };
        block.push(
            Instruction::with_branch(Code::Jmp_rel32_64, target + stolen_len as u64)
                .map_err(relocation_failed)?,
        );

        let trampoline = memory.allocate(TRAMPOLINE_SIZE, Protection::EXECUTE_READWRITE)?;
        let body = BlockEncoder::encode(
            64,
            InstructionBlock::new(&block, trampoline),
            BlockEncoderOptions::NONE,
        )
        .map_err(relocation_failed)?
        .code_buffer;

        if body.len() > TRAMPOLINE_SIZE {
            return Err(Error::HookFailed {
                address: target,
                message: format!("trampoline needs {} bytes", body.len()),
            });
        }
        memory.write_bytes(trampoline, &body)?;
        memory.flush_instruction_cache(trampoline, body.len());

        write_code(memory, target, &nop_fill(&absolute_jump(detour), stolen_len))?;

        info!(
            "Hooked {:#x} -> {:#x} (trampoline {:#x}, {} bytes relocated)",
            target, detour, trampoline, stolen_len
        );

        Ok(Self {
            target,
            detour,
            trampoline,
            original: code[..stolen_len].to_vec(),
        })
    }

    pub fn target(&self) -> u64 {
        self.target
    }

    pub fn detour(&self) -> u64 {
        self.detour
    }

    /// Entry point that behaves like the unhooked target.
    pub fn trampoline(&self) -> u64 {
        self.trampoline
    }

    /// Target bytes displaced by the jump.
    pub fn original_bytes(&self) -> &[u8] {
        &self.original
    }

    /// Put the displaced bytes back. The trampoline stays allocated.
    pub fn remove<M: ProcessMemory + ?Sized>(&self, memory: &M) -> Result<()> {
        write_code(memory, self.target, &self.original)?;
        info!("Unhooked {:#x}", self.target);
        Ok(())
    }
}

/// Whole instructions covering at least `ABSOLUTE_JUMP_LEN` bytes.
fn steal_instructions(code: &[u8], target: u64) -> Result<Vec<Instruction>> {
    let mut decoder = Decoder::with_ip(64, code, target, DecoderOptions::NONE);
    let mut stolen = Vec::new();
    let mut covered = 0usize;

    while covered < ABSOLUTE_JUMP_LEN {
        let instruction = decoder.decode();
        if instruction.is_invalid() {
            return Err(Error::DecodeFailure(instruction.ip()));
        }
        covered += instruction.len();

        let ends_function = matches!(
            instruction.flow_control(),
            FlowControl::Return | FlowControl::UnconditionalBranch | FlowControl::Interrupt
        );
        if ends_function && covered < ABSOLUTE_JUMP_LEN {
            return Err(Error::HookFailed {
                address: target,
                message: format!("function too short to hook ({} bytes)", covered),
            });
        }
        stolen.push(instruction);
    }

    Ok(stolen)
}
