//! Hexdump command implementation.
//!
//! # Output Format
//!
//! ```text
//! 0x140001000: 48 89 5C 24 08 57 48 83  EC 20 8B F9 E8 00 00 00  |H.\$.WH.. ......|
//! ```

use anyhow::Result;
use reguard_core::ProcessMemory;

use super::image;
use crate::cli::ImageArgs;

/// Run the hexdump command
pub fn run(args: &ImageArgs, address: u64, size: usize, ascii: bool) -> Result<()> {
    let memory = image::load(args)?;
    let bytes = memory.read_bytes(address, size)?;

    println!("Hexdump at 0x{:X} ({} bytes):", address, size);
    println!();

    for (i, chunk) in bytes.chunks(16).enumerate() {
        println!("{}", format_line(address + (i * 16) as u64, chunk, ascii));
    }

    Ok(())
}

fn format_line(address: u64, chunk: &[u8], ascii: bool) -> String {
    let mut line = format!("0x{:X}: ", address);

    for j in 0..16 {
        if j == 8 {
            line.push(' ');
        }
        match chunk.get(j) {
            Some(byte) => line.push_str(&format!("{:02X} ", byte)),
            None => line.push_str("   "),
        }
    }

    if ascii {
        line.push_str(" |");
        for j in 0..16 {
            line.push(match chunk.get(j) {
                Some(byte) if (0x20..0x7F).contains(byte) => *byte as char,
                Some(_) => '.',
                None => ' ',
            });
        }
        line.push('|');
    }

    line
}
