//! Hex address parsing and byte formatting.

use anyhow::Result;

/// Parse a hex address string (with or without 0x prefix).
pub fn parse_hex_address(s: &str) -> Result<u64> {
    let s = s.trim_start_matches("0x").trim_start_matches("0X");
    u64::from_str_radix(s, 16).map_err(|e| anyhow::anyhow!("Invalid hex address: {}", e))
}

/// Space-separated uppercase hex, `?? ` for bytes left untouched.
pub fn format_patch_bytes(bytes: &[i16]) -> String {
    bytes
        .iter()
        .map(|&b| match u8::try_from(b) {
            Ok(value) => format!("{:02X}", value),
            Err(_) => "??".to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn format_bytes(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
