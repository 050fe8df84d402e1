//! Settings file next to the game executable.

use std::path::Path;

use reguard_core::config::KEY_ENABLED;
use reguard_core::{BypassSettings, CONFIG_FILE_NAME, Config, Result};
use tracing::{info, warn};

/// Read the bypass settings from `dir`. A missing or unreadable file gives
/// the defaults.
pub fn load(dir: &Path) -> BypassSettings {
    let path = dir.join(CONFIG_FILE_NAME);
    let config = match Config::load_or_default(&path) {
        Ok(config) => config,
        Err(e) => {
            warn!("Failed to load {}: {}, using defaults", path.display(), e);
            Config::default()
        }
    };

    let settings = BypassSettings::from_config(&config, dir);
    info!(
        "Integrity bypass: target {}, {}",
        settings.target,
        if settings.enabled { "enabled" } else { "disabled" }
    );
    settings
}

/// Store the enabled toggle, keeping every other key in the file.
pub fn persist_enabled(dir: &Path, enabled: bool) -> Result<()> {
    let path = dir.join(CONFIG_FILE_NAME);
    let mut config = Config::load_or_default(&path)?;
    config.set(KEY_ENABLED, enabled);
    config.save(&path)
}
