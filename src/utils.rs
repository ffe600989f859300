/// Helper for parsing user supplied offsets, `0x...` hex or decimal.
pub fn parse_offset(s: &str) -> Result<u64, String> {
    let s = s.trim();
    let lower = s.to_ascii_lowercase();
    if let Some(hex_val) = lower.strip_prefix("0x") {
        u64::from_str_radix(hex_val, 16).map_err(|e| format!("invalid hex offset '{}': {}", s, e))
    } else {
        s.parse::<u64>()
            .map_err(|e| format!("invalid offset '{}': {}", s, e))
    }
}

/// helper for hex encoding
pub mod hex {
    /// converts a byte slice to a hex string.
    pub fn encode<T: AsRef<[u8]>>(data: T) -> String {
        data.as_ref().iter().map(|b| format!("{:02x}", b)).collect()
    }
}
