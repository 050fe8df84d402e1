use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

use cli::{Cli, Command};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("reguard=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Scan {
            image,
            pattern,
            offset,
            all,
        } => commands::scan::run(&image, &pattern, offset, all),
        Command::Plan {
            image,
            variant,
            patterns,
            json,
        } => commands::plan::run(&image, variant, patterns, json),
        Command::Behind { image, address } => commands::behind::run(&image, address),
        Command::Hexdump {
            image,
            address,
            size,
            ascii,
        } => commands::hexdump::run(&image, address, size, ascii),
        Command::Absolute {
            image,
            address,
            next,
        } => commands::absolute::run(&image, address, next),
    }
}
