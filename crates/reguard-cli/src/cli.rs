use std::path::PathBuf;

use clap::{Parser, Subcommand};
use reguard_core::TargetVariant;

use crate::commands::hex_utils::parse_hex_address;

#[derive(Parser)]
#[command(name = "reguard")]
#[command(about = "Offline diagnostics for reguard patterns and patches")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// A raw module dump and the address it was loaded at.
#[derive(clap::Args)]
pub struct ImageArgs {
    /// Raw module dump
    pub image: PathBuf,

    /// Load address of the dump
    #[arg(short, long, default_value = "0x140000000", value_parser = parse_hex_address)]
    pub base: u64,
}

#[derive(Subcommand)]
pub enum Command {
    /// Search a dump for a byte pattern
    Scan {
        #[command(flatten)]
        image: ImageArgs,

        /// Pattern, e.g. "29 c8 0f 87 ?? ?? ?? ??"
        #[arg(short, long)]
        pattern: String,

        /// Offset added to each match
        #[arg(short, long, default_value_t = 0)]
        offset: usize,

        /// List every match instead of the first
        #[arg(short, long)]
        all: bool,
    },

    /// Dry-run the integrity bypass against a dump and print what it would patch
    Plan {
        #[command(flatten)]
        image: ImageArgs,

        /// Game the dump belongs to
        #[arg(short, long, default_value = "generic")]
        variant: TargetVariant,

        /// Extra candidate patterns (JSON pattern set)
        #[arg(short, long)]
        patterns: Option<PathBuf>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Disassemble the instructions leading up to an address
    Behind {
        #[command(flatten)]
        image: ImageArgs,

        /// Address to walk back from
        #[arg(short, long, value_parser = parse_hex_address)]
        address: u64,
    },

    /// Dump raw bytes at an address
    Hexdump {
        #[command(flatten)]
        image: ImageArgs,

        #[arg(short, long, value_parser = parse_hex_address)]
        address: u64,

        /// Number of bytes
        #[arg(short, long, default_value_t = 0x100)]
        size: usize,

        /// Show the ASCII column
        #[arg(long)]
        ascii: bool,
    },

    /// Resolve a rel32 operand to the address it points at
    Absolute {
        #[command(flatten)]
        image: ImageArgs,

        /// Address of the displacement
        #[arg(short, long, value_parser = parse_hex_address)]
        address: u64,

        /// Distance from the displacement to the next instruction, when the
        /// displacement is not the last operand
        #[arg(short, long)]
        next: Option<u64>,
    },
}
