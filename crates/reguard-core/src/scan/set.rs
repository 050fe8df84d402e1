//! Pattern sets loaded from disk.
//!
//! Lets users supply extra candidate patterns for a check site after a game
//! update, without rebuilding.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use super::PatternSpec;
use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SitePatterns {
    pub name: String,
    pub patterns: Vec<PatternSpec>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatternSet {
    #[serde(default)]
    pub version: String,
    pub sites: Vec<SitePatterns>,
}

impl PatternSet {
    pub fn site(&self, name: &str) -> Option<&SitePatterns> {
        self.sites
            .iter()
            .find(|site| site.name.eq_ignore_ascii_case(name))
    }

    /// Extra patterns for `name`, empty when the set has none.
    pub fn patterns_for(&self, name: &str) -> &[PatternSpec] {
        self.site(name).map(|s| s.patterns.as_slice()).unwrap_or(&[])
    }
}

pub fn load_pattern_set<P: AsRef<Path>>(path: P) -> Result<PatternSet> {
    let content = fs::read_to_string(&path)?;
    let data = serde_json::from_str(&content)?;
    Ok(data)
}

pub fn save_pattern_set<P: AsRef<Path>>(path: P, set: &PatternSet) -> Result<()> {
    let content = serde_json::to_string_pretty(set)?;
    fs::write(path, content)?;
    Ok(())
}
