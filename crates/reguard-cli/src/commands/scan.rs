//! Scan command implementation.

use anyhow::Result;
use owo_colors::OwoColorize;
use reguard_core::{ModuleQuery, PatternSpec, Scanner};
use tracing::debug;

use super::image;
use crate::cli::ImageArgs;

/// Run the scan command
pub fn run(args: &ImageArgs, pattern: &str, offset: usize, all: bool) -> Result<()> {
    let memory = image::load(args)?;
    let spec = PatternSpec::new(pattern, offset);
    let compiled = spec.compile()?;
    debug!("Compiled pattern: {}", compiled);

    let size = memory
        .main_module()
        .map(|module| module.size as usize)
        .unwrap_or_default();
    let scanner = Scanner::new(&memory);

    let matches: Vec<u64> = if all {
        scanner.scan_all(args.base, size, &compiled).collect()
    } else {
        scanner.scan(args.base, size, &compiled).into_iter().collect()
    };

    if matches.is_empty() {
        println!("{}", "No match".red());
        return Ok(());
    }

    for found in &matches {
        let site = found + offset as u64;
        println!(
            "{}  (rva 0x{:X})",
            format!("0x{:X}", site).green(),
            site - args.base
        );
    }
    println!();
    println!("{} match(es)", matches.len());

    Ok(())
}
