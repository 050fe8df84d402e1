//! Plan command implementation.
//!
//! Runs the integrity bypass for a game against a module dump and prints
//! which sites it found and what it would write there. Reflection-driven
//! patches need the live runtime, so they always show up as not found.

use std::path::PathBuf;

use anyhow::Result;
use owo_colors::OwoColorize;
use reguard_core::{
    ApplicationEntries, BypassReport, BypassSettings, Handle, IntegrityBypass, MethodInfo,
    SingletonLocator, SiteStatus, TargetVariant, TypeDatabase,
};

use super::hex_utils::{format_bytes, format_patch_bytes};
use super::image;
use crate::cli::ImageArgs;

/// Stands in for the game runtime, which a dump does not have.
struct OfflineRuntime;

impl TypeDatabase for OfflineRuntime {
    fn find_type(&self, _fqn_hash: u32) -> Option<Handle> {
        None
    }

    fn methods(&self, _ty: Handle) -> Vec<MethodInfo> {
        Vec::new()
    }

    fn object_type(&self, _object: Handle) -> Option<Handle> {
        None
    }

    fn find_field(&self, _ty: Handle, _name: &str) -> Option<Handle> {
        None
    }

    fn read_field(&self, _object: Handle, _field: Handle, _len: usize, _bypass: bool) -> Option<Vec<u8>> {
        None
    }

    fn write_field(&self, _object: Handle, _field: Handle, _bytes: &[u8], _bypass: bool) -> bool {
        false
    }
}

impl SingletonLocator for OfflineRuntime {
    fn managed_singleton(&self, _name: &str) -> Option<Handle> {
        None
    }
}

impl ApplicationEntries for OfflineRuntime {
    fn ignore_application_entry(&self, _hash: u64) {}
}

/// Run the plan command
pub fn run(args: &ImageArgs, variant: TargetVariant, patterns: Option<PathBuf>, json: bool) -> Result<()> {
    let memory = image::load(args)?;

    let settings = BypassSettings {
        enabled: true,
        target: variant,
        pattern_file: patterns,
    };
    let mut bypass = IntegrityBypass::from_settings(&settings);
    bypass.run_startup_patches(&memory);
    bypass.initialize(&memory, &OfflineRuntime);

    let report = bypass.report();
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    print_report(&report, args.base);

    println!();
    println!("=== Patches ({}) ===", bypass.patches().len());
    for patch in bypass.patches() {
        println!(
            "  0x{:X} (rva 0x{:X}){}",
            patch.address(),
            patch.address().saturating_sub(args.base),
            if patch.is_immediate() { "" } else { " [toggled]" }
        );
        println!("    {}", format_bytes(patch.original()).dimmed());
        println!("    {}", format_patch_bytes(patch.bytes()).green());
    }

    Ok(())
}

fn print_report(report: &BypassReport, base: u64) {
    println!();
    println!("=== {} ===", report.variant);
    if let Some(flag) = report.flag_address {
        println!("Integrity flag: 0x{:X}", flag);
    }

    for site in &report.sites {
        let status = site.status.to_string();
        let status = match site.status {
            SiteStatus::Patched => status.green().to_string(),
            SiteStatus::PartiallyPatched => status.yellow().to_string(),
            _ => status.red().to_string(),
        };
        println!("{:<32} {}", site.name, status);

        for address in &site.patched {
            println!("    0x{:X} (rva 0x{:X})", address, address.saturating_sub(base));
        }
        for error in &site.errors {
            println!("    {}", error.red());
        }
    }
}
