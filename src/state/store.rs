//! StateStore - the single authoritative snapshot of rendered device state
//!
//! Mutated only by the reconciliation engine and actuator read-back,
//! read by the outbound reporter. Every operation takes one exclusive
//! lock scoped to the call, so concurrent timer and session callers
//! always observe a consistent snapshot.

use super::{
    clamp_brightness, clamp_volume, AudioPatch, AudioStatus, DeviceState, LedPatch, LedState,
    Preset,
};
use crate::led::color::normalize_hex;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;

/// Thread-safe store for the device's rendered state
#[derive(Clone)]
pub struct StateStore {
    inner: Arc<Mutex<DeviceState>>,
}

impl StateStore {
    /// Create a store with conservative defaults (LEDs off, audio unknown)
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(DeviceState::default())),
        }
    }

    /// Return an independent copy safe to hand to concurrent readers
    pub fn snapshot(&self) -> DeviceState {
        self.inner.lock().clone()
    }

    /// Overwrite all tracked keys atomically
    pub fn replace(&self, state: DeviceState) {
        *self.inner.lock() = state;
    }

    /// Merge an LED patch, applying only the provided keys.
    ///
    /// Brightness is clamped, color is normalized, and an unknown preset
    /// name leaves the prior preset unchanged. Never fails: invalid
    /// values are dropped, not raised, because the actuator has already
    /// validated anything that reached hardware.
    pub fn merge_leds(&self, patch: &LedPatch) {
        let mut state = self.inner.lock();
        let leds = &mut state.leds;
        if let Some(on) = patch.on {
            leds.on = on;
        }
        if let Some(ref color) = patch.color {
            if let Some(normalized) = normalize_hex(color) {
                leds.color = normalized;
                // A solid color replaces whatever gradient was showing
                leds.preset = None;
            }
        }
        if let Some(brightness) = patch.brightness {
            leds.brightness = clamp_brightness(brightness);
        }
        if let Some(ref preset) = patch.preset {
            if let Some(p) = Preset::parse(preset) {
                leds.preset = Some(p);
                // Applying a preset turns the strip on
                leds.on = true;
            }
        }
    }

    /// Merge an audio status/track patch.
    ///
    /// Unrecognized status strings leave the prior value unchanged.
    pub fn merge_audio(&self, patch: &AudioPatch) {
        let mut state = self.inner.lock();
        if let Some(volume) = patch.volume {
            state.music.volume = Some(clamp_volume(volume as i64));
        }
        if let Some(ref action) = patch.action {
            if let Some(status) = AudioStatus::parse(action) {
                state.music.status = status;
            }
        }
    }

    /// Record the volume actually confirmed by a mixer read
    pub fn set_confirmed_volume(&self, volume: u8) {
        self.inner.lock().music.volume = Some(clamp_volume(volume as i64));
    }

    /// Record a transport status confirmed by the media backend
    pub fn set_audio_status(&self, status: AudioStatus) {
        self.inner.lock().music.status = status;
    }

    /// Replace the LED sub-state wholesale (used by the actuator after
    /// it has rendered, so the store never leads the hardware)
    pub fn set_leds(&self, leds: LedState) {
        self.inner.lock().leds = leds;
    }

    /// Replace the widgets passthrough payload
    pub fn set_widgets(&self, widgets: Option<Vec<Value>>) {
        self.inner.lock().widgets = widgets;
    }

    /// Current LED sub-state
    pub fn leds(&self) -> LedState {
        self.inner.lock().leds.clone()
    }

    /// Current audio sub-state
    pub fn music(&self) -> super::AudioState {
        self.inner.lock().music.clone()
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}
