//! Device state type definitions
//!
//! Defines the logical LED and audio states tracked by the agent, the
//! partial patches used for merges, and the wire-level snapshot sent to
//! the hub.

mod store;

pub use store::StateStore;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// LED gradient preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    Ocean,
    Fire,
    Aurora,
}

impl Preset {
    /// Parse from string (case-insensitive)
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ocean" => Some(Preset::Ocean),
            "fire" => Some(Preset::Fire),
            "aurora" => Some(Preset::Aurora),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Preset::Ocean => "ocean",
            Preset::Fire => "fire",
            Preset::Aurora => "aurora",
        }
    }
}

impl std::fmt::Display for Preset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Playback transport status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioStatus {
    Play,
    Pause,
}

impl AudioStatus {
    /// Parse from string, rejecting anything but the two known values
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "play" => Some(AudioStatus::Play),
            "pause" => Some(AudioStatus::Pause),
            _ => None,
        }
    }
}

/// Logical LED state as rendered on the strip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedState {
    pub on: bool,
    /// Normalized uppercase `#RRGGBB`
    pub color: String,
    /// 0..=100
    pub brightness: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preset: Option<Preset>,
}

impl Default for LedState {
    fn default() -> Self {
        Self {
            on: false,
            color: "#FFFFFF".to_string(),
            brightness: 50,
            preset: None,
        }
    }
}

/// Audio state; `volume` stays `None` until a mixer read has confirmed it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioState {
    pub status: AudioStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track: Option<String>,
}

impl Default for AudioState {
    fn default() -> Self {
        Self {
            status: AudioStatus::Pause,
            volume: None,
            track: None,
        }
    }
}

/// Partial LED update; only present fields are applied
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LedPatch {
    pub on: Option<bool>,
    pub color: Option<String>,
    pub brightness: Option<i64>,
    pub preset: Option<String>,
}

impl LedPatch {
    pub fn is_empty(&self) -> bool {
        self.on.is_none()
            && self.color.is_none()
            && self.brightness.is_none()
            && self.preset.is_none()
    }

    /// True when at least one style field (color/brightness/preset) is set
    pub fn has_style_field(&self) -> bool {
        self.color.is_some() || self.brightness.is_some() || self.preset.is_some()
    }

    /// Extract from a JSON object, tolerating a nested `leds` wrapper
    pub fn from_value(raw: &Value) -> Self {
        let obj = raw.get("leds").unwrap_or(raw);
        Self {
            on: obj.get("on").and_then(Value::as_bool),
            color: obj
                .get("color")
                .and_then(Value::as_str)
                .map(|s| s.to_string()),
            brightness: obj.get("brightness").and_then(Value::as_i64),
            preset: obj
                .get("preset")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string()),
        }
    }
}

/// Partial audio update: a volume, an action, or both absent
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioPatch {
    pub volume: Option<u8>,
    pub action: Option<String>,
}

impl AudioPatch {
    pub fn is_empty(&self) -> bool {
        self.volume.is_none() && self.action.is_none()
    }

    /// Extract from a JSON object, tolerating a nested `music` wrapper.
    ///
    /// Volume accepts a number or a numeric string, clamped to 0..=100.
    /// Non-numeric volume values are dropped rather than erroring.
    pub fn from_value(raw: &Value) -> Self {
        let obj = raw.get("music").unwrap_or(raw);
        let volume = match obj.get("volume") {
            Some(Value::Number(n)) => n.as_i64().map(clamp_volume),
            Some(Value::String(s)) => s.trim().parse::<i64>().ok().map(clamp_volume),
            _ => None,
        };
        let action = obj
            .get("action")
            .and_then(Value::as_str)
            .map(|s| s.to_string());
        let status = obj.get("status").and_then(Value::as_str);
        // Tolerant alias: a pushed {status: "play"} means the same as
        // {action: "play"}.
        let action = action.or_else(|| status.map(|s| s.to_string()));
        Self { volume, action }
    }
}

/// Clamp an arbitrary integer into the 0..=100 volume range
pub fn clamp_volume(v: i64) -> u8 {
    v.clamp(0, 100) as u8
}

/// Clamp an arbitrary integer into the 0..=100 brightness range
pub fn clamp_brightness(v: i64) -> u8 {
    v.clamp(0, 100) as u8
}

/// Full tracked device state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceState {
    pub leds: LedState,
    pub music: AudioState,
    pub widgets: Option<Vec<Value>>,
}

/// Wire-level projection of the state store, sent as `state:report`.
///
/// Subsystems with nothing to report are omitted, not null.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceSnapshot {
    #[serde(rename = "deviceId")]
    pub device_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leds: Option<LedState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub music: Option<AudioState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub widgets: Option<Vec<Value>>,
}

/// Desired state as stored on the hub (`GET /devices/:id/state` or a
/// `state:apply` push), tolerant of partial content.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DesiredState {
    pub leds: Option<Value>,
    pub music: Option<Value>,
    pub widgets: Option<Vec<Value>>,
}

impl DesiredState {
    pub fn from_value(raw: &Value) -> Self {
        Self {
            leds: raw.get("leds").filter(|v| v.is_object()).cloned(),
            music: raw.get("music").filter(|v| !v.is_null()).cloned(),
            widgets: raw
                .get("widgets")
                .and_then(Value::as_array)
                .map(|a| a.to_vec()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.leds.is_none() && self.music.is_none() && self.widgets.is_none()
    }
}
