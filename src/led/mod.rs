//! LED actuator - renders logical LED state into pixel-buffer writes
//!
//! Owns the strip handle and a cache of the last rendered state so that
//! re-applying an identical patch produces no hardware write.

pub mod color;
pub mod strip;

use crate::error::{AgentError, AgentResult};
use crate::state::{clamp_brightness, LedPatch, LedState, Preset};
use color::{brightness_to_register, gradient_at, hex_to_rgb, normalize_hex, preset_stops, shade};
use strip::PixelStrip;
use tracing::{debug, info};

/// Renders a logical LED state onto a pixel strip
pub struct LedActuator {
    strip: Box<dyn PixelStrip>,
    rendered: LedState,
    /// Set by blackout: the pixels no longer match `rendered`, so the
    /// next apply must write even if the target state is identical
    stale: bool,
    writes: u64,
}

impl LedActuator {
    pub fn new(strip: Box<dyn PixelStrip>) -> Self {
        Self {
            strip,
            rendered: LedState::default(),
            stale: false,
            writes: 0,
        }
    }

    /// The state as last rendered on the strip
    pub fn rendered(&self) -> &LedState {
        &self.rendered
    }

    /// Number of frames pushed to the strip since startup
    pub fn write_count(&self) -> u64 {
        self.writes
    }

    /// Turn the strip on or off (logical off, reported to the hub)
    pub fn set_on(&mut self, on: bool) -> AgentResult<()> {
        self.apply(&LedPatch {
            on: Some(on),
            ..Default::default()
        })
        .map(|_| ())
    }

    /// Set the solid color. Fails without touching hardware if the
    /// string is not a 6-hex-digit color.
    pub fn set_color(&mut self, hex: &str) -> AgentResult<()> {
        self.apply(&LedPatch {
            color: Some(hex.to_string()),
            ..Default::default()
        })
        .map(|_| ())
    }

    /// Set logical brightness (clamped to 0..=100)
    pub fn set_brightness(&mut self, value: i64) -> AgentResult<()> {
        self.apply(&LedPatch {
            brightness: Some(value),
            ..Default::default()
        })
        .map(|_| ())
    }

    /// Render a gradient preset; turns the strip on as a side effect
    pub fn set_preset(&mut self, preset: Preset) -> AgentResult<()> {
        self.apply(&LedPatch {
            preset: Some(preset.as_str().to_string()),
            ..Default::default()
        })
        .map(|_| ())
    }

    /// Apply a normalized patch with no-op detection.
    ///
    /// Returns `Ok(true)` when the strip was written, `Ok(false)` when
    /// the patch matched the already-rendered state. Invalid colors and
    /// unknown presets fail before any field or pixel changes.
    pub fn apply(&mut self, patch: &LedPatch) -> AgentResult<bool> {
        let target = self.target_state(patch)?;
        if !self.stale && target == self.rendered {
            debug!("LED patch is a no-op, skipping write");
            return Ok(false);
        }
        self.render(&target)?;
        self.rendered = target;
        self.stale = false;
        Ok(true)
    }

    /// Force all pixels dark without touching the logical state.
    ///
    /// Presentation-only safety action for disconnect/shutdown; the
    /// logical on/color/brightness survive for resync on reconnect.
    pub fn blackout(&mut self) {
        info!("💡 Blackout (logical state preserved)");
        let n = self.strip.len();
        for i in 0..n {
            self.strip.set_pixel(i, (0, 0, 0));
        }
        if let Err(e) = self.strip.show() {
            tracing::warn!("⚠️  Blackout write failed: {}", e);
        }
        self.writes += 1;
        self.stale = true;
    }

    /// Validate and merge a patch over the rendered state
    fn target_state(&self, patch: &LedPatch) -> AgentResult<LedState> {
        let mut target = self.rendered.clone();
        if let Some(on) = patch.on {
            target.on = on;
        }
        if let Some(ref raw) = patch.color {
            let normalized =
                normalize_hex(raw).ok_or_else(|| AgentError::InvalidColor(raw.clone()))?;
            target.color = normalized;
            target.preset = None;
        }
        if let Some(brightness) = patch.brightness {
            target.brightness = clamp_brightness(brightness);
        }
        if let Some(ref name) = patch.preset {
            let preset = Preset::parse(name)
                .ok_or_else(|| AgentError::validation(format!("unknown preset: {name}")))?;
            target.preset = Some(preset);
            // A preset turns the strip on
            target.on = true;
        }
        Ok(target)
    }

    /// Write one frame for the target state
    fn render(&mut self, target: &LedState) -> AgentResult<()> {
        let n = self.strip.len();
        self.strip
            .set_brightness(brightness_to_register(target.brightness));

        if !target.on {
            for i in 0..n {
                self.strip.set_pixel(i, (0, 0, 0));
            }
        } else if let Some(preset) = target.preset {
            // Gradient presets write their anchors directly and skip the
            // solid-color gamma path
            let (a, b) = preset_stops(preset);
            for i in 0..n {
                self.strip.set_pixel(i, gradient_at(a, b, i, n));
            }
        } else {
            let rgb = hex_to_rgb(&target.color).expect("rendered color is always normalized");
            let shaded = shade(rgb, brightness_to_register(target.brightness));
            for i in 0..n {
                self.strip.set_pixel(i, shaded);
            }
        }

        self.strip
            .show()
            .map_err(|e| AgentError::backend("strip", e.to_string()))?;
        self.writes += 1;
        debug!(
            on = target.on,
            color = %target.color,
            brightness = target.brightness,
            preset = ?target.preset,
            "LED frame written"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strip::NullStrip;

    fn actuator(count: usize) -> LedActuator {
        LedActuator::new(Box::new(NullStrip::new(count)))
    }

    #[test]
    fn test_set_color_rejects_invalid_without_write() {
        let mut leds = actuator(8);
        let before = leds.rendered().clone();
        let err = leds.set_color("not-a-color").unwrap_err();
        assert!(matches!(err, AgentError::InvalidColor(_)));
        assert_eq!(leds.rendered(), &before);
        assert_eq!(leds.write_count(), 0);
    }

    #[test]
    fn test_apply_is_idempotent() {
        let mut leds = actuator(8);
        let patch = LedPatch {
            on: Some(true),
            color: Some("#ff8800".to_string()),
            brightness: Some(70),
            ..Default::default()
        };
        assert!(leds.apply(&patch).unwrap());
        assert_eq!(leds.write_count(), 1);

        // Same normalized patch again: no write, no state change
        assert!(!leds.apply(&patch).unwrap());
        assert_eq!(leds.write_count(), 1);
        assert_eq!(leds.rendered().color, "#FF8800");
    }

    #[test]
    fn test_brightness_clamped_not_rejected() {
        let mut leds = actuator(8);
        leds.set_brightness(1000).unwrap();
        assert_eq!(leds.rendered().brightness, 100);
        leds.set_brightness(-5).unwrap();
        assert_eq!(leds.rendered().brightness, 0);
    }

    #[test]
    fn test_preset_turns_strip_on() {
        let mut leds = actuator(8);
        assert!(!leds.rendered().on);
        leds.set_preset(Preset::Aurora).unwrap();
        assert!(leds.rendered().on);
        assert_eq!(leds.rendered().preset, Some(Preset::Aurora));
    }

    #[test]
    fn test_solid_color_clears_preset() {
        let mut leds = actuator(8);
        leds.set_preset(Preset::Ocean).unwrap();
        leds.set_color("#102030").unwrap();
        assert_eq!(leds.rendered().preset, None);
        assert_eq!(leds.rendered().color, "#102030");
    }

    #[test]
    fn test_unknown_preset_is_validation_error() {
        let mut leds = actuator(8);
        let err = leds
            .apply(&LedPatch {
                preset: Some("disco".to_string()),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, AgentError::Validation(_)));
        assert_eq!(leds.write_count(), 0);
    }

    #[test]
    fn test_blackout_preserves_logical_state() {
        let mut leds = actuator(8);
        leds.apply(&LedPatch {
            on: Some(true),
            color: Some("#00FF00".to_string()),
            ..Default::default()
        })
        .unwrap();
        let before = leds.rendered().clone();
        let writes = leds.write_count();

        leds.blackout();
        assert_eq!(leds.rendered(), &before);
        assert_eq!(leds.write_count(), writes + 1);
    }

    #[test]
    fn test_apply_after_blackout_rewrites_identical_state() {
        let mut leds = actuator(8);
        let patch = LedPatch {
            on: Some(true),
            color: Some("#336699".to_string()),
            ..Default::default()
        };
        leds.apply(&patch).unwrap();
        leds.blackout();
        let writes = leds.write_count();

        // Identical logical state, but pixels are dark: must write
        assert!(leds.apply(&patch).unwrap());
        assert_eq!(leds.write_count(), writes + 1);
    }

    #[test]
    fn test_off_writes_dark_frame() {
        let mut leds = actuator(4);
        leds.apply(&LedPatch {
            on: Some(true),
            color: Some("#FFFFFF".to_string()),
            brightness: Some(100),
            ..Default::default()
        })
        .unwrap();
        assert!(leds.apply(&LedPatch {
            on: Some(false),
            ..Default::default()
        })
        .unwrap());
        assert!(!leds.rendered().on);
    }
}
