//! LoRaWAN credential normalization and display formatting.
//!
//! Storage always uses the stripped uppercase form; the colon-grouped form is
//! for display only. Validation happens here, before any remote call.

use anyhow::{Result, ensure};

/// DevEUI / AppEUI length in hex characters
pub const EUI_HEX_LEN: usize = 16;
/// AppKey length in hex characters
pub const APP_KEY_HEX_LEN: usize = 32;

fn strip_separators(value: &str) -> String {
    value
        .chars()
        .filter(|c| !matches!(c, ':' | '-' | ' '))
        .collect()
}

/// Normalize a hex credential: strip `:`/`-`/space separators, uppercase and
/// validate the exact length.
pub fn normalize_hex(field: &str, value: &str, expected_len: usize) -> Result<String> {
    let stripped = strip_separators(value);

    ensure!(
        stripped.len() == expected_len,
        "{field} must be {expected_len} hex characters, got {}",
        stripped.len()
    );
    ensure!(
        stripped.chars().all(|c| c.is_ascii_hexdigit()),
        "{field} contains non-hex characters"
    );

    Ok(stripped.to_ascii_uppercase())
}

pub fn normalize_eui(field: &str, value: &str) -> Result<String> {
    normalize_hex(field, value, EUI_HEX_LEN)
}

pub fn normalize_app_key(value: &str) -> Result<String> {
    normalize_hex("app_key", value, APP_KEY_HEX_LEN)
}

/// Colon-delimited byte pairs for display, e.g.
/// `A1B2C3D4E5F67890` -> `A1:B2:C3:D4:E5:F6:78:90`.
///
/// Expects an already normalized EUI; other inputs are grouped as-is.
pub fn format_eui(eui: &str) -> String {
    eui.as_bytes()
        .chunks(2)
        .map(|pair| std::str::from_utf8(pair).unwrap_or_default())
        .collect::<Vec<_>>()
        .join(":")
}

/// Deterministic fallback device id used before the server has assigned one.
/// Stable and case-insensitive on input.
pub fn derive_device_id(dev_eui: &str) -> String {
    format!("sensor-{}", strip_separators(dev_eui).to_ascii_lowercase())
}

/// Deterministic fallback gateway id from the last 8 characters of the EUI.
pub fn derive_gateway_id(gateway_eui: &str) -> String {
    let stripped = strip_separators(gateway_eui).to_ascii_lowercase();
    let tail = &stripped[stripped.len().saturating_sub(8)..];
    format!("fg-gw-{tail}")
}
