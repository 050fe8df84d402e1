use std::path::Path;

use anyhow::{Context, Result, bail};
use reguard_core::SnapshotMemory;

use crate::cli::ImageArgs;

/// Map a raw module dump as the main executable at `base`.
pub fn load(args: &ImageArgs) -> Result<SnapshotMemory> {
    let bytes = std::fs::read(&args.image)
        .with_context(|| format!("Failed to read {}", args.image.display()))?;
    if bytes.is_empty() {
        bail!("{} is empty", args.image.display());
    }

    println!(
        "Loaded {} ({:#x} bytes) at 0x{:X}",
        args.image.display(),
        bytes.len(),
        args.base
    );
    Ok(SnapshotMemory::from_image(&module_name(&args.image), args.base, bytes))
}

fn module_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string())
}
