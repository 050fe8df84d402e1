//! Behind command implementation.
//!
//! Shows the instructions that lead up to an address, which is how the
//! branch-behind fallback picks its branch.

use anyhow::Result;
use owo_colors::OwoColorize;
use reguard_core::{AddressResolver, ResolvedInstruction};

use super::hex_utils::format_bytes;
use super::image;
use crate::cli::ImageArgs;

/// Run the behind command
pub fn run(args: &ImageArgs, address: u64) -> Result<()> {
    let memory = image::load(args)?;
    let resolver = AddressResolver::new(&memory);

    match resolver.find_function_start(address) {
        Some(start) => println!("Function start: 0x{:X} (-0x{:X})", start, address - start),
        None => println!("Function start: {}", "not found".yellow()),
    }
    println!();

    let mut behind = resolver.get_disassembly_behind(address);
    if behind.is_empty() {
        println!("{}", "No instruction chain lands on this address".red());
    }
    behind.reverse();

    for instruction in &behind {
        print_instruction(instruction, false);
    }
    match resolver.resolve_instruction(address) {
        Some(instruction) => print_instruction(&instruction, true),
        None => println!("{}", format!("0x{:X}: <undecodable>", address).red()),
    }

    Ok(())
}

fn print_instruction(instruction: &ResolvedInstruction, current: bool) {
    let line = format!(
        "0x{:X}: {:<30} {}",
        instruction.address,
        format_bytes(&instruction.bytes),
        instruction.text
    );

    if current {
        println!("{}", line.bold());
    } else if instruction.is_branch && instruction.is_conditional {
        println!("{}", line.cyan());
    } else {
        println!("{}", line);
    }
}
