//! Input validation for values that cross into the device core.

use std::net::Ipv4Addr;

use crate::error::CoreError;

/// Longest text accepted for a scrolling overlay.
pub const MAX_TEXT_LEN: usize = 500;

/// Highest font index the device knows.
pub const MAX_FONT_INDEX: u8 = 7;

/// Lowest row a text overlay may start on.
pub const MAX_TEXT_Y: u8 = 56;

/// Slowest accepted text scroll speed, in milliseconds per step.
pub const MAX_TEXT_SPEED_MS: u32 = 1000;

/// Parse a dotted-quad IPv4 address.
///
/// Surrounding whitespace is ignored; anything else that is not a plain
/// IPv4 address (hostnames, IPv6, ports) is rejected.
pub fn parse_device_ip(raw: &str) -> Result<Ipv4Addr, CoreError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(CoreError::Validation(
            "Device IP must not be empty".to_string(),
        ));
    }
    trimmed
        .parse::<Ipv4Addr>()
        .map_err(|_| CoreError::Validation(format!("Invalid device IP: '{trimmed}'")))
}

/// Parse a `#RRGGBB` colour into its RGB components.
pub fn parse_hex_color(raw: &str) -> Result<[u8; 3], CoreError> {
    let invalid = || CoreError::Validation(format!("Colour must be #RRGGBB, got '{raw}'"));

    let hex = raw.strip_prefix('#').ok_or_else(invalid)?;
    if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(invalid());
    }

    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| invalid());
    Ok([channel(0)?, channel(2)?, channel(4)?])
}

/// Validate the parameters of a scrolling text overlay.
pub fn validate_text_params(text: &str, speed_ms: u32, font: u8, y: u8) -> Result<(), CoreError> {
    let len = text.chars().count();
    if len == 0 {
        return Err(CoreError::Validation("Text must not be empty".to_string()));
    }
    if len > MAX_TEXT_LEN {
        return Err(CoreError::Validation(format!(
            "Text must not exceed {MAX_TEXT_LEN} characters"
        )));
    }
    if speed_ms == 0 || speed_ms > MAX_TEXT_SPEED_MS {
        return Err(CoreError::Validation(format!(
            "Text speed must be between 1 and {MAX_TEXT_SPEED_MS} ms"
        )));
    }
    if font > MAX_FONT_INDEX {
        return Err(CoreError::Validation(format!(
            "Font index must be between 0 and {MAX_FONT_INDEX}"
        )));
    }
    if y > MAX_TEXT_Y {
        return Err(CoreError::Validation(format!(
            "Text row must be between 0 and {MAX_TEXT_Y}"
        )));
    }
    Ok(())
}
