//! Reconciliation engine tests with substitute backends

use super::*;
use crate::audio::testing::{MockMixer, MockTransport};
use crate::audio::AudioActuator;
use crate::config::AgentConfig;
use crate::led::strip::NullStrip;
use crate::led::LedActuator;
use crate::report::Reporter;
use crate::state::StateStore;
use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;

struct Rig {
    engine: Reconciler,
    outbound: mpsc::UnboundedReceiver<OutboundEvent>,
    mixer: MockMixer,
    store: StateStore,
}

fn rig_with_mixer(mixer: MockMixer) -> Rig {
    let cfg = AgentConfig::default();
    let store = StateStore::new();
    let leds = LedActuator::new(Box::new(NullStrip::new(8)));
    let audio = AudioActuator::with_backends(
        vec![Box::new(mixer.clone())],
        Box::new(MockTransport::default()),
        store.clone(),
    );
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let reporter = Reporter::new(
        cfg.hub.device_id.clone(),
        Duration::from_secs(60),
        outbound_tx.clone(),
    );
    let hub = HubClient::new(&cfg.hub);
    let mut engine = Reconciler::new(&cfg, store.clone(), leds, audio, reporter, hub, outbound_tx);
    engine.connected = true;
    Rig {
        engine,
        outbound: outbound_rx,
        mixer,
        store,
    }
}

fn rig() -> Rig {
    rig_with_mixer(MockMixer::new("pulse", Some(40)))
}

fn drain_events(rx: &mut mpsc::UnboundedReceiver<OutboundEvent>) -> Vec<OutboundEvent> {
    let mut events = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        events.push(ev);
    }
    events
}

fn count_events(events: &[OutboundEvent], name: &str) -> usize {
    events.iter().filter(|e| e.event == name).count()
}

#[tokio::test]
async fn test_push_applies_and_forces_report() {
    let mut rig = rig();
    rig.engine
        .handle(Trigger::Push(json!({
            "deviceId": "test-device",
            "leds": {"on": true, "color": "#ff0000", "brightness": 90},
        })))
        .await;

    assert_eq!(rig.engine.leds.write_count(), 1);
    let leds = rig.store.leds();
    assert!(leds.on);
    assert_eq!(leds.color, "#FF0000");
    assert_eq!(leds.brightness, 90);

    let events = drain_events(&mut rig.outbound);
    assert_eq!(count_events(&events, "state:report"), 1);
}

#[tokio::test]
async fn test_push_for_other_device_is_ignored() {
    let mut rig = rig();
    rig.engine
        .handle(Trigger::Push(json!({
            "deviceId": "someone-else",
            "leds": {"on": true},
        })))
        .await;

    assert_eq!(rig.engine.leds.write_count(), 0);
    assert!(!rig.store.leds().on);
    assert!(drain_events(&mut rig.outbound).is_empty());
}

#[tokio::test]
async fn test_push_repeated_is_hardware_noop() {
    let mut rig = rig();
    let payload = json!({"leds": {"on": true, "color": "#ABCDEF"}});
    rig.engine.handle(Trigger::Push(payload.clone())).await;
    assert_eq!(rig.engine.leds.write_count(), 1);

    // Identical push: confirmation is re-sent but nothing is rewritten
    rig.engine.handle(Trigger::Push(payload)).await;
    assert_eq!(rig.engine.leds.write_count(), 1);
    let events = drain_events(&mut rig.outbound);
    assert_eq!(count_events(&events, "state:report"), 2);
}

#[tokio::test]
async fn test_poll_converges_without_redundant_writes() {
    let mut rig = rig_with_mixer(MockMixer::new("pulse", Some(50)));

    let desired_50 = DesiredState::from_value(&json!({"music": {"volume": 50}}));
    let desired_70 = DesiredState::from_value(&json!({"music": {"volume": 70}}));

    // Seed poll: hub and mixer already agree, no write
    rig.engine.handle(Trigger::Poll(desired_50.clone())).await;
    assert_eq!(rig.mixer.writes(), 0);

    // Identical poll: still nothing to do
    rig.engine.handle(Trigger::Poll(desired_50)).await;
    assert_eq!(rig.mixer.writes(), 0);

    // Changed hub value: exactly one write, to 70
    rig.engine.handle(Trigger::Poll(desired_70)).await;
    assert_eq!(rig.mixer.writes(), 1);
    assert_eq!(rig.store.music().volume, Some(70));
}

#[tokio::test]
async fn test_poll_heals_local_led_drift_only_when_divergent() {
    let mut rig = rig();
    let desired = DesiredState::from_value(&json!({"leds": {"on": true, "color": "#00FF00"}}));

    rig.engine.handle(Trigger::Poll(desired.clone())).await;
    assert_eq!(rig.engine.leds.write_count(), 1);

    // Same hub state, strip already matches: no second write
    rig.engine.handle(Trigger::Poll(desired)).await;
    assert_eq!(rig.engine.leds.write_count(), 1);
}

#[tokio::test]
async fn test_watch_surfaces_external_drift() {
    let mut rig = rig();

    // First tick seeds the baseline at 40 without a forced report
    rig.engine.handle(Trigger::Watch).await;
    assert_eq!(rig.store.music().volume, Some(40));
    let seeded = drain_events(&mut rig.outbound);
    assert_eq!(count_events(&seeded, "state:report"), 0);

    // Physical knob moves the mixer
    rig.mixer.drift_to(55);
    rig.engine.handle(Trigger::Watch).await;
    assert_eq!(rig.store.music().volume, Some(55));
    assert_eq!(rig.engine.audio_phase, SyncPhase::Drifted);
    let events = drain_events(&mut rig.outbound);
    assert_eq!(count_events(&events, "state:report"), 1);

    // Stable value: no further reports
    rig.engine.handle(Trigger::Watch).await;
    let events = drain_events(&mut rig.outbound);
    assert_eq!(count_events(&events, "state:report"), 0);
}

#[tokio::test]
async fn test_own_volume_write_is_not_drift() {
    let mut rig = rig();
    rig.engine.handle(Trigger::Watch).await;

    rig.engine
        .handle(Trigger::Command(Command::new(
            CommandKind::MusicCmd,
            json!({"volume": 65}),
        )))
        .await;
    drain_events(&mut rig.outbound);

    // The watch baseline followed our own write: no drift report
    rig.engine.handle(Trigger::Watch).await;
    let events = drain_events(&mut rig.outbound);
    assert_eq!(count_events(&events, "state:report"), 0);
}

#[tokio::test]
async fn test_disconnect_blacks_out_once_and_preserves_state() {
    let mut rig = rig();
    rig.engine
        .handle(Trigger::Push(json!({"leds": {"on": true, "color": "#123456"}})))
        .await;
    let writes = rig.engine.leds.write_count();

    rig.engine.handle(Trigger::Disconnected).await;
    assert_eq!(rig.engine.leds.write_count(), writes + 1);

    // Logical fields survive for resync on reconnect
    let leds = rig.store.leds();
    assert!(leds.on);
    assert_eq!(leds.color, "#123456");

    // A second disconnect while already offline does nothing
    rig.engine.handle(Trigger::Disconnected).await;
    assert_eq!(rig.engine.leds.write_count(), writes + 1);
}

#[tokio::test]
async fn test_style_command_without_fields_nacks() {
    let mut rig = rig();
    rig.engine
        .handle(Trigger::Command(Command::new(
            CommandKind::LedsStyle,
            json!({"deviceId": "test-device"}),
        )))
        .await;

    assert_eq!(rig.engine.leds.write_count(), 0);
    let events = drain_events(&mut rig.outbound);
    assert_eq!(count_events(&events, "nack"), 1);
    assert_eq!(count_events(&events, "state:report"), 0);
    let nack = events.iter().find(|e| e.event == "nack").unwrap();
    assert_eq!(nack.payload["type"], "leds:style");
    assert!(nack.payload["reason"].as_str().unwrap().contains("color"));
}

#[tokio::test]
async fn test_power_command_requires_on() {
    let mut rig = rig();
    rig.engine
        .handle(Trigger::Command(Command::new(
            CommandKind::LedsPower,
            json!({"color": "#FF0000"}),
        )))
        .await;

    let events = drain_events(&mut rig.outbound);
    assert_eq!(count_events(&events, "nack"), 1);
    assert_eq!(rig.engine.leds.write_count(), 0);
}

#[tokio::test]
async fn test_style_command_acks_and_reports() {
    let mut rig = rig();
    rig.engine
        .handle(Trigger::Command(Command::new(
            CommandKind::LedsStyle,
            json!({"preset": "ocean"}),
        )))
        .await;

    assert_eq!(rig.engine.leds.write_count(), 1);
    assert!(rig.store.leds().on, "preset turns the strip on");

    let events = drain_events(&mut rig.outbound);
    assert_eq!(count_events(&events, "ack"), 1);
    assert_eq!(count_events(&events, "state:report"), 1);
    let ack = events.iter().find(|e| e.event == "ack").unwrap();
    assert_eq!(ack.payload["status"], "ok");
}

#[tokio::test]
async fn test_invalid_color_command_nacks_without_write() {
    let mut rig = rig();
    rig.engine
        .handle(Trigger::Command(Command::new(
            CommandKind::LedsStyle,
            json!({"color": "chartreuse"}),
        )))
        .await;

    assert_eq!(rig.engine.leds.write_count(), 0);
    assert_eq!(rig.store.leds().color, "#FFFFFF");
    let events = drain_events(&mut rig.outbound);
    assert_eq!(count_events(&events, "nack"), 1);
}

#[tokio::test]
async fn test_music_command_sets_volume_and_acks() {
    let mut rig = rig();
    rig.engine
        .handle(Trigger::Command(Command::new(
            CommandKind::MusicCmd,
            json!({"volume": "80"}),
        )))
        .await;

    assert_eq!(rig.store.music().volume, Some(80));
    let events = drain_events(&mut rig.outbound);
    let ack = events.iter().find(|e| e.event == "ack").unwrap();
    assert_eq!(ack.payload["type"], "music");
    assert_eq!(ack.payload["data"]["volume"], 80);
    assert_eq!(count_events(&events, "state:report"), 1);
}

#[tokio::test]
async fn test_empty_music_command_nacks() {
    let mut rig = rig();
    rig.engine
        .handle(Trigger::Command(Command::new(CommandKind::MusicCmd, json!({}))))
        .await;

    let events = drain_events(&mut rig.outbound);
    assert_eq!(count_events(&events, "nack"), 1);
    assert_eq!(rig.mixer.writes(), 0);
}

#[tokio::test]
async fn test_pull_refreshes_poll_baseline() {
    let mut rig = rig();
    let desired = DesiredState::from_value(&json!({"music": {"volume": 40}}));

    // Authoritative pull converges and moves the baseline
    rig.engine.handle(Trigger::Pull(desired.clone())).await;
    let writes_after_pull = rig.mixer.writes();

    // The following poll with the same hub state must not re-write
    rig.engine.handle(Trigger::Poll(desired)).await;
    assert_eq!(rig.mixer.writes(), writes_after_pull);
}

#[tokio::test]
async fn test_widgets_pass_through_to_reports() {
    let mut rig = rig();
    rig.engine
        .handle(Trigger::Push(json!({
            "widgets": [{"type": "clock"}],
            "leds": {"on": true},
        })))
        .await;

    let events = drain_events(&mut rig.outbound);
    let report = events.iter().find(|e| e.event == "state:report").unwrap();
    assert_eq!(report.payload["widgets"][0]["type"], "clock");
}
