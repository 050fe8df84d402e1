//! Persisted `key=value` settings.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::warn;

use crate::bypass::TargetVariant;
use crate::error::{Error, Result};

pub const CONFIG_FILE_NAME: &str = "reguard_config.txt";

pub const KEY_ENABLED: &str = "IntegrityCheckBypass_Enabled";
pub const KEY_TARGET: &str = "IntegrityCheckBypass_Target";
pub const KEY_PATTERN_FILE: &str = "IntegrityCheckBypass_PatternFile";

/// Flat key/value store. Lines starting with `#` or `;` are comments; keys
/// are case-sensitive and written back sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    values: BTreeMap<String, String>,
}

impl Config {
    pub fn parse(content: &str) -> Self {
        let values = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with(';'))
            .filter_map(|line| {
                let (key, value) = line.split_once('=')?;
                Some((key.trim().to_string(), value.trim().to_string()))
            })
            .collect();
        Self { values }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(Self::parse(&content))
    }

    /// Load, treating a missing file as empty.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        match Self::load(path) {
            Err(e) if e.is_not_found() => Ok(Self::default()),
            other => other,
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content: String = self
            .values
            .iter()
            .map(|(key, value)| format!("{}={}\n", key, value))
            .collect();
        fs::write(path, content)?;
        Ok(())
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn get_bool(&self, key: &str) -> Result<Option<bool>> {
        self.get_string(key)
            .map(|value| match value.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Ok(true),
                "false" | "0" | "no" | "off" => Ok(false),
                _ => Err(Error::Config(format!("{} is not a boolean: {:?}", key, value))),
            })
            .transpose()
    }

    pub fn set(&mut self, key: &str, value: impl ToString) {
        self.values.insert(key.to_string(), value.to_string());
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BypassSettings {
    pub enabled: bool,
    pub target: TargetVariant,
    pub pattern_file: Option<PathBuf>,
}

impl Default for BypassSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            target: TargetVariant::default(),
            pattern_file: None,
        }
    }
}

impl BypassSettings {
    /// Read from `config`, falling back to defaults for missing or invalid
    /// values. Relative pattern file paths are resolved against `base_dir`.
    pub fn from_config(config: &Config, base_dir: &Path) -> Self {
        let defaults = Self::default();

        let enabled = match config.get_bool(KEY_ENABLED) {
            Ok(value) => value.unwrap_or(defaults.enabled),
            Err(e) => {
                warn!("{}", e);
                defaults.enabled
            }
        };

        let target = match config.get_string(KEY_TARGET) {
            Some(name) => TargetVariant::from_str(name).unwrap_or_else(|_| {
                warn!("Unknown target {:?}, using {}", name, defaults.target);
                defaults.target
            }),
            None => defaults.target,
        };

        let pattern_file = config
            .get_string(KEY_PATTERN_FILE)
            .filter(|path| !path.is_empty())
            .map(|path| base_dir.join(path));

        Self {
            enabled,
            target,
            pattern_file,
        }
    }

    pub fn write_to(&self, config: &mut Config) {
        config.set(KEY_ENABLED, self.enabled);
        config.set(KEY_TARGET, self.target);
        if let Some(path) = &self.pattern_file {
            config.set(KEY_PATTERN_FILE, path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_skips_comments_and_blank_lines() {
        let config = Config::parse(
            "# comment\n; other comment\n\nIntegrityCheckBypass_Enabled = false\nbroken line\nkey=a=b\n",
        );
        assert_eq!(config.get_bool(KEY_ENABLED).unwrap(), Some(false));
        assert_eq!(config.get_string("key"), Some("a=b"));
        assert_eq!(config.get_string("broken line"), None);
    }

    #[test]
    fn test_get_bool_rejects_garbage() {
        let config = Config::parse("flag=maybe");
        assert!(config.get_bool("flag").is_err());
        assert_eq!(config.get_bool("missing").unwrap(), None);
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);

        let mut config = Config::default();
        BypassSettings {
            enabled: false,
            target: TargetVariant::Re8,
            pattern_file: None,
        }
        .write_to(&mut config);
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);

        let settings = BypassSettings::from_config(&loaded, dir.path());
        assert!(!settings.enabled);
        assert_eq!(settings.target, TargetVariant::Re8);
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_or_default(dir.path().join("absent.txt")).unwrap();
        assert_eq!(config, Config::default());

        let settings = BypassSettings::from_config(&config, dir.path());
        assert_eq!(settings, BypassSettings::default());
    }

    #[test]
    fn test_settings_fall_back_on_bad_values() {
        let config = Config::parse(
            "IntegrityCheckBypass_Enabled=sure\nIntegrityCheckBypass_Target=re9\nIntegrityCheckBypass_PatternFile=patterns.json",
        );
        let settings = BypassSettings::from_config(&config, Path::new("/game"));
        assert!(settings.enabled);
        assert_eq!(settings.target, TargetVariant::Generic);
        assert_eq!(settings.pattern_file, Some(PathBuf::from("/game/patterns.json")));
    }
}
