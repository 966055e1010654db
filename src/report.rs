//! Outbound reporter - throttled, de-duplicated snapshot emission
//!
//! Prevents report storms (every poll tick emitting) without going
//! silent: an emission happens when forced, when the payload actually
//! changed, or when the minimum interval has elapsed since the last one.

use crate::session::OutboundEvent;
use crate::state::{DeviceSnapshot, DeviceState};
use serde_json::Value;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Builds and emits `state:report` events toward the hub
pub struct Reporter {
    device_id: String,
    min_interval: Duration,
    outbound: mpsc::UnboundedSender<OutboundEvent>,
    last_payload: Option<Value>,
    last_emit: Option<Instant>,
}

impl Reporter {
    pub fn new(
        device_id: String,
        min_interval: Duration,
        outbound: mpsc::UnboundedSender<OutboundEvent>,
    ) -> Self {
        Self {
            device_id,
            min_interval,
            outbound,
            last_payload: None,
            last_emit: None,
        }
    }

    /// Emit a snapshot if forced, changed, or due. Returns whether an
    /// emission happened.
    pub fn report(&mut self, state: &DeviceState, forced: bool) -> bool {
        let snapshot = DeviceSnapshot {
            device_id: self.device_id.clone(),
            leds: Some(state.leds.clone()),
            music: Some(state.music.clone()),
            widgets: state.widgets.clone(),
        };
        let payload = match serde_json::to_value(&snapshot) {
            Ok(v) => v,
            Err(e) => {
                warn!("⚠️  Failed to serialize state report: {}", e);
                return false;
            }
        };

        let changed = self.last_payload.as_ref() != Some(&payload);
        let due = self
            .last_emit
            .map(|t| t.elapsed() >= self.min_interval)
            .unwrap_or(true);

        if !forced && !changed && !due {
            debug!("Report suppressed (unchanged, within throttle window)");
            return false;
        }

        debug!(forced, changed, due, "📤 state:report");
        if self
            .outbound
            .send(OutboundEvent::new("state:report", payload.clone()))
            .is_err()
        {
            warn!("⚠️  Outbound channel closed, report dropped");
            return false;
        }
        self.last_payload = Some(payload);
        self.last_emit = Some(Instant::now());
        true
    }
}
