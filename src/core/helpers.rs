use anyhow::{anyhow, Result};

/// Parse a telegram written as hex, e.g. `"0B 88 02 00"` or `"0b,88,02,00"`.
///
/// Tokens are separated by whitespace or commas and may carry a `0x` prefix. A token that is
/// not a byte fails the whole string.
pub fn parse_hex_telegram(text: &str) -> Result<Vec<u8>> {
    text.split(|c: char| c.is_whitespace() || c == ',')
        .filter(|token| !token.is_empty())
        .map(|token| {
            let digits = token
                .strip_prefix("0x")
                .or_else(|| token.strip_prefix("0X"))
                .unwrap_or(token);
            u8::from_str_radix(digits, 16)
                .map_err(|err| anyhow!("Invalid hex byte '{token}': {err}"))
        })
        .collect()
}

/// Upper-case hex dump separated by spaces.
pub fn format_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse a single number given as hex (`0x18`, `18h`) or decimal.
pub fn parse_number(text: &str) -> Result<u16> {
    let text = text.trim();
    let parsed = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u16::from_str_radix(hex, 16)
    } else if let Some(hex) = text.strip_suffix('h') {
        u16::from_str_radix(hex, 16)
    } else {
        text.parse::<u16>()
    };
    parsed.map_err(|err| anyhow!("Invalid number '{text}': {err}"))
}
