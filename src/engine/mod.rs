//! Reconciliation engine - the central control loop
//!
//! Single consumer of the trigger channel: every state-change source
//! (hub push, explicit pull, periodic poll, local watch, inbound
//! command, connection lifecycle) lands here, so actuator calls are
//! serialized by construction and the store is only mutated after the
//! corresponding actuator call has returned.

#[cfg(test)]
mod tests;

use crate::audio::AudioActuator;
use crate::config::AgentConfig;
use crate::error::AgentResult;
use crate::hub::HubClient;
use crate::led::LedActuator;
use crate::report::Reporter;
use crate::session::OutboundEvent;
use crate::state::{AudioPatch, DesiredState, LedPatch, StateStore};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Per-domain synchronization phase.
///
/// Unknown is the only state before the first successful sync; there is
/// no stop state, the engine runs for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Unknown,
    Syncing,
    Converged,
    Drifted,
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SyncPhase::Unknown => "unknown",
            SyncPhase::Syncing => "syncing",
            SyncPhase::Converged => "converged",
            SyncPhase::Drifted => "drifted",
        };
        write!(f, "{s}")
    }
}

/// Named inbound instruction requiring an ack or nack
#[derive(Debug, Clone)]
pub struct Command {
    pub kind: CommandKind,
    pub payload: Value,
}

impl Command {
    pub fn new(kind: CommandKind, payload: Value) -> Self {
        Self { kind, payload }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// Tolerant full LED patch (`leds:update`)
    LedsUpdate,
    /// Power only, requires `on` (`leds:state`)
    LedsPower,
    /// Style change, requires one of color/brightness/preset (`leds:style`)
    LedsStyle,
    /// Volume or transport action (`music:cmd`)
    MusicCmd,
}

impl CommandKind {
    /// Ack/nack `type` field as the hub expects it
    fn ack_type(&self) -> &'static str {
        match self {
            CommandKind::LedsUpdate => "leds",
            CommandKind::LedsPower => "leds:state",
            CommandKind::LedsStyle => "leds:style",
            CommandKind::MusicCmd => "music",
        }
    }
}

/// One reconciliation trigger; constructed, consumed, and dropped
/// within a single cycle
#[derive(Debug)]
pub enum Trigger {
    /// Session established
    Connected,
    /// Session lost (defensive blackout)
    Disconnected,
    /// Hub pushed a desired state (`state:apply` payload, deviceId not
    /// yet checked)
    Push(Value),
    /// Desired state fetched on request
    Pull(DesiredState),
    /// Desired state fetched by the periodic poll
    Poll(DesiredState),
    /// Local high-frequency mixer drift check
    Watch,
    /// Named instruction requiring an ack
    Command(Command),
    /// Periodic liveness announcement
    Heartbeat,
}

/// The reconciliation engine; owns both actuators and the reporter
pub struct Reconciler {
    device_id: String,
    apply_cached_on_boot: bool,
    store: StateStore,
    leds: LedActuator,
    audio: AudioActuator,
    reporter: Reporter,
    hub: HubClient,
    outbound: mpsc::UnboundedSender<OutboundEvent>,
    connected: bool,
    led_phase: SyncPhase,
    audio_phase: SyncPhase,
    /// Hub state as of the last poll; poll only reacts to hub-side
    /// changes relative to this baseline
    last_polled: Option<DesiredState>,
    /// Live mixer volume as of the last read; watch only reacts when
    /// the mixer moved relative to this
    last_watch_volume: Option<u8>,
}

impl Reconciler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: &AgentConfig,
        store: StateStore,
        leds: LedActuator,
        audio: AudioActuator,
        reporter: Reporter,
        hub: HubClient,
        outbound: mpsc::UnboundedSender<OutboundEvent>,
    ) -> Self {
        Self {
            device_id: cfg.hub.device_id.clone(),
            apply_cached_on_boot: cfg.apply_cached_on_boot,
            store,
            leds,
            audio,
            reporter,
            hub,
            outbound,
            connected: false,
            led_phase: SyncPhase::Unknown,
            audio_phase: SyncPhase::Unknown,
            last_polled: None,
            last_watch_volume: None,
        }
    }

    /// Consume triggers until every sender is gone
    pub async fn run(mut self, mut triggers: mpsc::Receiver<Trigger>) {
        info!("Reconciliation engine running");
        while let Some(trigger) = triggers.recv().await {
            self.handle(trigger).await;
        }
        info!("Trigger channel closed, engine stopping");
    }

    async fn handle(&mut self, trigger: Trigger) {
        match trigger {
            Trigger::Connected => self.on_connected().await,
            Trigger::Disconnected => self.on_disconnected(),
            Trigger::Push(payload) => self.on_push(payload).await,
            Trigger::Pull(desired) => self.on_pull(desired).await,
            Trigger::Poll(desired) => self.on_poll(desired).await,
            Trigger::Watch => self.on_watch().await,
            Trigger::Command(cmd) => self.on_command(cmd).await,
            Trigger::Heartbeat => self.on_heartbeat().await,
        }
    }

    // ---- Connection lifecycle ----

    async fn on_connected(&mut self) {
        self.connected = true;
        self.emit("agent:register", json!({"deviceId": self.device_id}));

        // Re-render the cached logical state so the hardware reflects it
        // before (or without) any hub contact; also the resync path
        // after a disconnect blackout.
        if self.apply_cached_on_boot {
            let leds = self.store.leds();
            let patch = LedPatch {
                on: Some(leds.on),
                color: Some(leds.color.clone()),
                brightness: Some(leds.brightness as i64),
                preset: leds.preset.map(|p| p.as_str().to_string()),
            };
            match self.leds.apply(&patch) {
                Ok(true) => info!("✅ Boot LED state applied: {:?}", self.leds.rendered()),
                Ok(false) => debug!("Boot LED state already rendered"),
                Err(e) => warn!("⚠️  Boot LED apply failed: {}", e),
            }
        }

        self.report(true).await;

        if let Err(e) = self.hub.post_heartbeat().await {
            warn!("⚠️  Heartbeat failed: {}", e);
        }

        // Resync with the hub's stored state: REST when the route is
        // open to agents, otherwise ask the hub to push one.
        match self.hub.fetch_desired_state().await {
            Ok(Some(desired)) => self.on_pull(desired).await,
            Ok(None) => {
                self.emit("state:pull", json!({"deviceId": self.device_id}));
            }
            Err(e) => {
                warn!("⚠️  Desired-state pull failed: {}", e);
                self.emit("state:pull", json!({"deviceId": self.device_id}));
            }
        }
    }

    fn on_disconnected(&mut self) {
        if !self.connected {
            return;
        }
        self.connected = false;
        // De-lit the strip defensively; logical state stays in the
        // store for resync on reconnect.
        self.leds.blackout();
    }

    // ---- Authoritative desired state (push / pull) ----

    async fn on_push(&mut self, payload: Value) {
        if !self.targets_me(&payload) {
            debug!("Push for another device, ignoring");
            return;
        }
        info!("⬇️  Desired state pushed");
        let desired = DesiredState::from_value(&payload);
        self.apply_desired(&desired).await;
        // An authoritative push always deserves a fresh confirmation
        self.report(true).await;
    }

    async fn on_pull(&mut self, desired: DesiredState) {
        info!("⬇️  Desired state pulled");
        self.apply_desired(&desired).await;
        self.report(true).await;
    }

    /// Apply a hub-authoritative desired state and move the poll
    /// baseline so a later poll cannot overwrite what just converged.
    async fn apply_desired(&mut self, desired: &DesiredState) {
        if let Some(ref leds_val) = desired.leds {
            let patch = LedPatch::from_value(leds_val);
            if !patch.is_empty() {
                if let Err(e) = self.apply_led_patch(&patch) {
                    warn!("⚠️  LED apply failed: {}", e);
                }
            }
        }

        if let Some(ref music_val) = desired.music {
            let patch = AudioPatch::from_value(music_val);
            if !patch.is_empty() {
                self.sync_audio(&patch).await;
            }
        }

        if let Some(ref widgets) = desired.widgets {
            self.store.set_widgets(Some(widgets.clone()));
        }

        self.last_polled = Some(desired.clone());
    }

    // ---- Poll (periodic drift healing) ----

    async fn on_poll(&mut self, desired: DesiredState) {
        if !self.connected {
            return;
        }
        if desired.is_empty() {
            return;
        }

        let hub_changed = self.last_polled.as_ref() != Some(&desired);

        if let Some(ref leds_val) = desired.leds {
            let patch = LedPatch::from_value(leds_val);
            // The actuator's no-op detection keeps identical ticks from
            // re-issuing hardware writes; anything that differs from the
            // rendered state (hub change or drift) gets one write.
            if !patch.is_empty() && (hub_changed || self.led_diverges(&patch)) {
                if let Err(e) = self.apply_led_patch(&patch) {
                    warn!("⚠️  Poll LED apply failed: {}", e);
                }
            }
        }

        if let Some(ref music_val) = desired.music {
            let patch = AudioPatch::from_value(music_val);
            if let Some(wanted) = patch.volume {
                // Compare against the real mixer, not the cached store
                let live = self.audio.read_volume().await;
                let diverges = live.is_some() && live != Some(wanted);
                if diverges || (hub_changed && live.is_none()) {
                    self.set_audio_phase(SyncPhase::Syncing);
                    let confirmed = self.set_volume_tracked(wanted).await;
                    self.set_audio_phase(SyncPhase::Converged);
                    if confirmed.diverged {
                        debug!("Poll volume converged with divergence");
                    }
                } else if let Some(v) = live {
                    self.store.set_confirmed_volume(v);
                    self.last_watch_volume = Some(v);
                }
            }
        }

        self.last_polled = Some(desired);
        self.report(false).await;
    }

    /// Would this LED patch change what is rendered?
    fn led_diverges(&self, patch: &LedPatch) -> bool {
        let rendered = self.leds.rendered();
        if let Some(on) = patch.on {
            if on != rendered.on {
                return true;
            }
        }
        if let Some(ref color) = patch.color {
            match crate::led::color::normalize_hex(color) {
                Some(normalized) if normalized != rendered.color => return true,
                _ => {}
            }
        }
        if let Some(brightness) = patch.brightness {
            if crate::state::clamp_brightness(brightness) != rendered.brightness {
                return true;
            }
        }
        if let Some(ref preset) = patch.preset {
            if crate::state::Preset::parse(preset) != rendered.preset {
                return true;
            }
        }
        false
    }

    // ---- Watch (local drift detection, audio only) ----

    async fn on_watch(&mut self) {
        if !self.connected {
            return;
        }
        let Some(live) = self.audio.read_volume().await else {
            return;
        };

        match self.last_watch_volume {
            None => {
                // First reading seeds the baseline without reporting
                self.last_watch_volume = Some(live);
                self.store.set_confirmed_volume(live);
            }
            Some(previous) if previous != live => {
                // Something external moved the mixer (physical knob,
                // another application); surface it to the hub.
                info!("🎚️  External volume change {} → {}", previous, live);
                self.last_watch_volume = Some(live);
                self.store.set_confirmed_volume(live);
                self.set_audio_phase(SyncPhase::Drifted);
                self.report(true).await;
            }
            Some(_) => {}
        }
    }

    // ---- Commands (ack / nack) ----

    async fn on_command(&mut self, cmd: Command) {
        if !self.targets_me(&cmd.payload) {
            debug!("Command for another device, ignoring");
            return;
        }

        let outcome = match cmd.kind {
            CommandKind::LedsUpdate => self.cmd_leds_update(&cmd.payload),
            CommandKind::LedsPower => self.cmd_leds_power(&cmd.payload),
            CommandKind::LedsStyle => self.cmd_leds_style(&cmd.payload),
            CommandKind::MusicCmd => self.cmd_music(&cmd.payload).await,
        };

        match outcome {
            Ok(data) => {
                self.ack(cmd.kind, data);
                self.report(true).await;
            }
            Err(e) => {
                warn!("⚠️  {} command rejected: {}", cmd.kind.ack_type(), e);
                self.nack(cmd.kind, &e.to_string());
            }
        }
    }

    fn cmd_leds_update(&mut self, payload: &Value) -> AgentResult<Value> {
        let patch = LedPatch::from_value(payload);
        self.apply_led_patch(&patch)?;
        Ok(json!({}))
    }

    fn cmd_leds_power(&mut self, payload: &Value) -> AgentResult<Value> {
        let patch = LedPatch::from_value(payload);
        let on = patch
            .on
            .ok_or_else(|| crate::error::AgentError::validation("Missing 'on'"))?;
        self.apply_led_patch(&LedPatch {
            on: Some(on),
            ..Default::default()
        })?;
        Ok(json!({"on": on}))
    }

    fn cmd_leds_style(&mut self, payload: &Value) -> AgentResult<Value> {
        let patch = LedPatch::from_value(payload);
        if !patch.has_style_field() {
            return Err(crate::error::AgentError::validation(
                "Provide one of color|brightness|preset",
            ));
        }
        // Style commands never flip power explicitly
        self.apply_led_patch(&LedPatch {
            on: None,
            ..patch
        })?;
        Ok(json!({"applied": true}))
    }

    async fn cmd_music(&mut self, payload: &Value) -> AgentResult<Value> {
        let patch = AudioPatch::from_value(payload);
        if patch.is_empty() {
            return Err(crate::error::AgentError::validation(
                "Provide volume or action",
            ));
        }
        self.apply_audio_patch(&patch).await;
        Ok(serde_json::to_value(self.store.music()).unwrap_or(json!({})))
    }

    // ---- Shared apply paths ----

    /// Apply an LED patch through the actuator, then mirror the
    /// rendered result into the store (never ahead of hardware)
    fn apply_led_patch(&mut self, patch: &LedPatch) -> AgentResult<bool> {
        let prev = self.led_phase;
        self.set_led_phase(SyncPhase::Syncing);
        match self.leds.apply(patch) {
            Ok(changed) => {
                if changed {
                    self.store.set_leds(self.leds.rendered().clone());
                }
                self.set_led_phase(SyncPhase::Converged);
                Ok(changed)
            }
            Err(e) => {
                // Validation failures touch neither hardware nor phase
                self.set_led_phase(prev);
                Err(e)
            }
        }
    }

    /// Converge audio onto a hub-desired patch, diffing against a fresh
    /// real read first so identical desired values issue no write
    async fn sync_audio(&mut self, patch: &AudioPatch) {
        if let Some(wanted) = patch.volume {
            let live = self.audio.read_volume().await;
            if live == Some(wanted) {
                self.store.set_confirmed_volume(wanted);
                self.last_watch_volume = Some(wanted);
            } else {
                self.set_audio_phase(SyncPhase::Syncing);
                self.set_volume_tracked(wanted).await;
                self.set_audio_phase(SyncPhase::Converged);
            }
        }
        if let Some(ref action) = patch.action {
            if let Some(parsed) = crate::audio::backends::TransportAction::parse(action) {
                // Desired state carries play/pause; skip when the
                // transport already matches
                let wanted_status = match parsed {
                    crate::audio::backends::TransportAction::Play => {
                        Some(crate::state::AudioStatus::Play)
                    }
                    crate::audio::backends::TransportAction::Pause => {
                        Some(crate::state::AudioStatus::Pause)
                    }
                    _ => None,
                };
                if wanted_status != Some(self.store.music().status) {
                    self.audio.transport(parsed).await;
                }
            }
        }
    }

    /// Apply an explicit music command without diffing: a user-issued
    /// play or skip runs even when the cached status already matches
    async fn apply_audio_patch(&mut self, patch: &AudioPatch) {
        self.set_audio_phase(SyncPhase::Syncing);
        if let Some(wanted) = patch.volume {
            self.set_volume_tracked(wanted).await;
        }
        if let Some(ref action) = patch.action {
            match crate::audio::backends::TransportAction::parse(action) {
                Some(parsed) => {
                    self.audio.transport(parsed).await;
                }
                None => debug!("Ignoring unknown audio action {:?}", action),
            }
        }
        self.set_audio_phase(SyncPhase::Converged);
    }

    /// Set the volume and move the watch baseline to the confirmed
    /// value, so our own write is not re-detected as external drift.
    async fn set_volume_tracked(&mut self, wanted: u8) -> crate::audio::ConfirmedVolume {
        let confirmed = self.audio.set_volume(wanted).await;
        if let Some(v) = confirmed.confirmed {
            self.last_watch_volume = Some(v);
        }
        confirmed
    }

    // ---- Reporting and emission ----

    /// Refresh audio's real-time fields, then hand the snapshot to the
    /// reporter
    async fn report(&mut self, forced: bool) {
        if let Some(v) = self.audio.read_volume().await {
            self.store.set_confirmed_volume(v);
            self.last_watch_volume = Some(v);
        }
        self.reporter.report(&self.store.snapshot(), forced);
    }

    async fn on_heartbeat(&mut self) {
        if !self.connected {
            return;
        }
        if let Err(e) = self.hub.post_heartbeat().await {
            warn!("⚠️  Heartbeat failed: {}", e);
        }
        self.report(false).await;
    }

    fn ack(&self, kind: CommandKind, data: Value) {
        self.emit(
            "ack",
            json!({
                "deviceId": self.device_id,
                "type": kind.ack_type(),
                "status": "ok",
                "data": data,
            }),
        );
    }

    fn nack(&self, kind: CommandKind, reason: &str) {
        self.emit(
            "nack",
            json!({
                "deviceId": self.device_id,
                "type": kind.ack_type(),
                "reason": reason,
            }),
        );
    }

    fn emit(&self, event: &str, payload: Value) {
        if self
            .outbound
            .send(OutboundEvent::new(event, payload))
            .is_err()
        {
            debug!("Outbound channel closed, {} dropped", event);
        }
    }

    /// A payload targets this device when it names it or names nobody
    fn targets_me(&self, payload: &Value) -> bool {
        match payload.get("deviceId").and_then(Value::as_str) {
            None => true,
            Some(id) => id == self.device_id,
        }
    }

    fn set_led_phase(&mut self, phase: SyncPhase) {
        if self.led_phase != phase {
            debug!("LED phase {} → {}", self.led_phase, phase);
            self.led_phase = phase;
        }
    }

    fn set_audio_phase(&mut self, phase: SyncPhase) {
        if self.audio_phase != phase {
            debug!("Audio phase {} → {}", self.audio_phase, phase);
            self.audio_phase = phase;
        }
    }
}
