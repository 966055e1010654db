//! Color parsing, brightness mapping, and gamma correction

use crate::error::{AgentError, AgentResult};
use crate::state::Preset;
use once_cell::sync::Lazy;
use regex::Regex;

/// RGB triple as written to the strip
pub type Rgb = (u8, u8, u8);

static HEX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^#?[0-9A-Fa-f]{6}$").expect("hex color regex"));

/// Normalize a color string to uppercase `#RRGGBB`, or `None` if invalid
pub fn normalize_hex(raw: &str) -> Option<String> {
    if !HEX_RE.is_match(raw) {
        return None;
    }
    Some(format!("#{}", raw.trim_start_matches('#').to_uppercase()))
}

/// Parse a `#RRGGBB` string into an RGB triple
pub fn hex_to_rgb(raw: &str) -> AgentResult<Rgb> {
    let normalized = normalize_hex(raw).ok_or_else(|| AgentError::InvalidColor(raw.to_string()))?;
    let h = &normalized[1..];
    // Normalization guarantees 6 hex digits
    let r = u8::from_str_radix(&h[0..2], 16).expect("validated hex");
    let g = u8::from_str_radix(&h[2..4], 16).expect("validated hex");
    let b = u8::from_str_radix(&h[4..6], 16).expect("validated hex");
    Ok((r, g, b))
}

/// Map logical brightness 0..=100 to the hardware 0..=255 register
pub fn brightness_to_register(val: u8) -> u8 {
    let v = val.min(100) as u32;
    ((v * 255 + 50) / 100) as u8
}

/// Gamma curve applied to each channel so perceived brightness is
/// roughly linear: output = (input/255)^1.6 * 255
fn gamma(c: u8) -> u8 {
    ((c as f32 / 255.0).powf(1.6) * 255.0).round() as u8
}

/// Scale a color by a 0..=255 brightness, then gamma-correct each channel
pub fn shade(rgb: Rgb, brightness_register: u8) -> Rgb {
    let scale = brightness_register as f32 / 255.0;
    let scaled = |c: u8| gamma((c as f32 * scale) as u8);
    (scaled(rgb.0), scaled(rgb.1), scaled(rgb.2))
}

/// Two-stop anchors for a gradient preset
pub fn preset_stops(preset: Preset) -> (Rgb, Rgb) {
    match preset {
        // Deep blue to cyan
        Preset::Ocean => ((0, 40, 120), (0, 180, 170)),
        // Warm orange to red
        Preset::Fire => ((255, 80, 0), (180, 0, 0)),
        // Turquoise to magenta
        Preset::Aurora => ((0, 210, 160), (160, 0, 160)),
    }
}

/// Linear interpolation between two anchors at position i of n pixels
pub fn gradient_at(a: Rgb, b: Rgb, i: usize, n: usize) -> Rgb {
    let t = i as f32 / (n.saturating_sub(1).max(1)) as f32;
    let lerp = |x: u8, y: u8| (x as f32 + (y as f32 - x as f32) * t) as u8;
    (lerp(a.0, b.0), lerp(a.1, b.1), lerp(a.2, b.2))
}
