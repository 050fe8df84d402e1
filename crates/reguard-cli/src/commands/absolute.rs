//! Absolute command implementation.

use anyhow::Result;
use reguard_core::AddressResolver;

use super::image;
use crate::cli::ImageArgs;

/// Run the absolute command
pub fn run(args: &ImageArgs, address: u64, next: Option<u64>) -> Result<()> {
    let memory = image::load(args)?;
    let resolver = AddressResolver::new(&memory);

    let target = match next {
        Some(next) => resolver.calculate_absolute_with(address, next)?,
        None => resolver.calculate_absolute(address)?,
    };

    println!("Displacement at: 0x{:X}", address);
    println!("Target:          0x{:X}", target);
    if target >= args.base {
        println!("Target RVA:      0x{:X}", target - args.base);
    }

    Ok(())
}
