use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Byte template with wildcard positions, e.g. `"29 C8 0F 87 ?? ?? ?? ??"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    tokens: Vec<Option<u8>>,
}

impl Pattern {
    pub fn parse(text: &str) -> Result<Self> {
        let mut tokens = Vec::new();
        for token in text.split_whitespace() {
            if token == "??" || token == "?" {
                tokens.push(None);
                continue;
            }

            let value = u8::from_str_radix(token, 16).map_err(|e| {
                Error::InvalidPattern(format!("invalid token '{}' in '{}': {}", token, text, e))
            })?;
            tokens.push(Some(value));
        }

        if tokens.is_empty() {
            return Err(Error::InvalidPattern("pattern is empty".to_string()));
        }

        Ok(Self { tokens })
    }

    /// Exact pattern without wildcards.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            tokens: bytes.iter().copied().map(Some).collect(),
        }
    }

    pub fn tokens(&self) -> &[Option<u8>] {
        &self.tokens
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// `window` must be at least as long as the pattern.
    pub fn matches(&self, window: &[u8]) -> bool {
        window.len() >= self.tokens.len()
            && self
                .tokens
                .iter()
                .zip(window)
                .all(|(token, byte)| token.is_none_or(|value| value == *byte))
    }

    /// First concrete byte, used to skip ahead with memchr.
    fn anchor(&self) -> Option<(usize, u8)> {
        self.tokens
            .iter()
            .enumerate()
            .find_map(|(i, token)| token.map(|b| (i, b)))
    }

    /// Offset of the first match inside `haystack`.
    pub fn find_in(&self, haystack: &[u8]) -> Option<usize> {
        if haystack.len() < self.len() {
            return None;
        }
        let last = haystack.len() - self.len();

        let Some((index, byte)) = self.anchor() else {
            return Some(0);
        };

        let mut pos = 0;
        while pos <= last {
            let offset = memchr::memchr(byte, &haystack[pos + index..=last + index])?;
            let candidate = pos + offset;
            if self.matches(&haystack[candidate..]) {
                return Some(candidate);
            }
            pos = candidate + 1;
        }

        None
    }

    /// Offset of the last match inside `haystack`.
    pub fn rfind_in(&self, haystack: &[u8]) -> Option<usize> {
        if haystack.len() < self.len() {
            return None;
        }
        let last = haystack.len() - self.len();

        (0..=last).rev().find(|&i| self.matches(&haystack[i..]))
    }
}

impl FromStr for Pattern {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = self
            .tokens
            .iter()
            .map(|b| match b {
                Some(value) => format!("{:02X}", value),
                None => "??".to_string(),
            })
            .collect::<Vec<_>>()
            .join(" ");
        f.write_str(&text)
    }
}

/// A pattern plus the offset, relative to the match, of the byte we care about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternSpec {
    pub pattern: String,
    #[serde(default)]
    pub offset: usize,
}

impl PatternSpec {
    pub fn new(pattern: &str, offset: usize) -> Self {
        Self {
            pattern: pattern.to_string(),
            offset,
        }
    }

    pub fn compile(&self) -> Result<Pattern> {
        Pattern::parse(&self.pattern)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pattern_with_wildcards() {
        let pattern = Pattern::parse("48 8D 0D ?? ? ?? ??").unwrap();
        assert_eq!(pattern.len(), 7);
        assert_eq!(pattern.tokens()[0], Some(0x48));
        assert_eq!(pattern.tokens()[2], Some(0x0D));
        assert_eq!(pattern.tokens()[3], None);
        assert_eq!(pattern.tokens()[4], None);
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        let lower = Pattern::parse("29 c8 0f 87").unwrap();
        let upper = Pattern::parse("29 C8 0F 87").unwrap();
        assert_eq!(lower, upper);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(Pattern::parse("").is_err());
        assert!(Pattern::parse("   ").is_err());
        assert!(Pattern::parse("48 GG").is_err());
        assert!(Pattern::parse("488D").is_err());
    }

    #[test]
    fn test_display_normalizes() {
        let pattern: Pattern = "e8 ? ? ? ? 3d f2 01 00 00".parse().unwrap();
        assert_eq!(pattern.to_string(), "E8 ?? ?? ?? ?? 3D F2 01 00 00");
    }

    #[test]
    fn test_find_in_skips_partial_matches() {
        let pattern = Pattern::parse("75 ?? 50 F7 D0").unwrap();
        let haystack = [0x75, 0x10, 0x51, 0x75, 0x08, 0x50, 0xF7, 0xD0, 0x90];
        assert_eq!(pattern.find_in(&haystack), Some(3));
        assert_eq!(pattern.find_in(&haystack[4..]), None);
    }

    #[test]
    fn test_leading_wildcard_uses_later_anchor() {
        let pattern = Pattern::parse("?? 8B ?? 29").unwrap();
        let haystack = [0x00, 0x8B, 0x01, 0x28, 0x41, 0x8B, 0x02, 0x29];
        assert_eq!(pattern.find_in(&haystack), Some(4));
    }

    #[test]
    fn test_rfind_in_returns_last() {
        let pattern = Pattern::parse("C3").unwrap();
        let haystack = [0xC3, 0x90, 0xC3, 0x90];
        assert_eq!(pattern.rfind_in(&haystack), Some(2));
    }

    #[test]
    fn test_short_haystack() {
        let pattern = Pattern::parse("48 8B 05").unwrap();
        assert_eq!(pattern.find_in(&[0x48, 0x8B]), None);
        assert_eq!(pattern.rfind_in(&[]), None);
    }
}
