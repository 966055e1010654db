//! Audio actuator - volume via a prioritized mixer chain, transport via
//! MPRIS, with read-after-write verification
//!
//! The OS mixer is treated as ground truth: every volume write is
//! followed by a real read, and the store only ever holds values a
//! backend confirmed. Backends may "succeed" while silently clamping or
//! ignoring a request, so requested and confirmed values are compared
//! on every call.

pub mod backends;

use crate::config::AudioConfig;
use crate::error::AgentResult;
use crate::state::{AudioPatch, AudioState, AudioStatus, StateStore};
use backends::{
    AlsaMixer, CommandEnv, MixerBackend, PlayerctlTransport, PulseMixer, TransportAction,
    TransportBackend,
};
use std::time::Duration;
use tracing::{debug, warn};

/// Result of a volume write after verification
#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmedVolume {
    pub requested: u8,
    /// Real value read back after the write, `None` when no backend
    /// could confirm
    pub confirmed: Option<u8>,
    /// Confirmed and differs from requested. Expected with mixers that
    /// enforce fixed steps; surfaced, never treated as an error.
    pub diverged: bool,
}

/// Drives the mixer chain and media transport, feeding confirmed values
/// back into the state store
pub struct AudioActuator {
    mixers: Vec<Box<dyn MixerBackend>>,
    transport: Box<dyn TransportBackend>,
    store: StateStore,
}

impl AudioActuator {
    /// Build the default backend chain: desktop-session mixer first,
    /// hardware mixer as fallback
    pub fn new(cfg: &AudioConfig, store: StateStore) -> Self {
        let env = CommandEnv::new(
            cfg.runtime_dir.clone(),
            Duration::from_secs(cfg.command_timeout_secs),
        );
        let mixers: Vec<Box<dyn MixerBackend>> = vec![
            Box::new(PulseMixer::new(cfg.pulse_sink.clone(), env.clone())),
            Box::new(AlsaMixer::new(cfg.alsa_card, cfg.alsa_control.clone(), env.clone())),
        ];
        Self {
            mixers,
            transport: Box::new(PlayerctlTransport::new(env)),
            store,
        }
    }

    /// Build with explicit backends (substitute backends in tests)
    pub fn with_backends(
        mixers: Vec<Box<dyn MixerBackend>>,
        transport: Box<dyn TransportBackend>,
        store: StateStore,
    ) -> Self {
        Self {
            mixers,
            transport,
            store,
        }
    }

    /// Read the real mixer volume through the chain, without writing
    pub async fn read_volume(&self) -> Option<u8> {
        for mixer in &self.mixers {
            match mixer.get_volume().await {
                Ok(Some(v)) => return Some(v),
                Ok(None) => {
                    debug!("{} returned unparseable volume", mixer.name());
                }
                Err(e) => {
                    debug!("{} read failed: {}", mixer.name(), e);
                }
            }
        }
        None
    }

    /// Refresh the store from a real read and return the current state
    pub async fn get_state(&self) -> AudioState {
        if let Some(v) = self.read_volume().await {
            self.store.set_confirmed_volume(v);
        }
        self.store.music()
    }

    /// Set the volume through the chain and verify what took effect.
    ///
    /// The chain is tried until one backend reports success, but the
    /// real value is re-read afterward regardless of which backend
    /// claimed success.
    pub async fn set_volume(&self, requested: u8) -> ConfirmedVolume {
        let requested = requested.min(100);
        let mut accepted = None;
        for mixer in &self.mixers {
            match mixer.set_volume(requested).await {
                Ok(()) => {
                    accepted = Some(mixer.name());
                    break;
                }
                Err(e) => {
                    warn!("⚠️  {} set-volume failed, trying next: {}", mixer.name(), e);
                }
            }
        }
        if accepted.is_none() {
            warn!("⚠️  No mixer backend accepted volume {}", requested);
        }

        let confirmed = self.read_volume().await;
        if let Some(v) = confirmed {
            self.store.set_confirmed_volume(v);
        }

        let diverged = matches!(confirmed, Some(v) if v != requested);
        if diverged {
            warn!(
                "🎚️  Volume divergence: requested {} confirmed {} (backend {})",
                requested,
                confirmed.unwrap_or(0),
                accepted.unwrap_or("none"),
            );
        }

        ConfirmedVolume {
            requested,
            confirmed,
            diverged,
        }
    }

    /// Run a transport action. Status in the store is updated only when
    /// the backend call itself reports success; otherwise the prior
    /// status is retained.
    pub async fn transport(&self, action: TransportAction) -> AudioState {
        match self.transport.run(action).await {
            Ok(()) => match action {
                TransportAction::Play => self.store.set_audio_status(AudioStatus::Play),
                TransportAction::Pause => self.store.set_audio_status(AudioStatus::Pause),
                // Track skips do not change play/pause status
                TransportAction::Next | TransportAction::Previous => {}
            },
            Err(e) => {
                warn!("⚠️  Transport {:?} failed (status retained): {}", action, e);
            }
        }
        self.store.music()
    }

    /// Apply a normalized audio patch: a volume, an action, or both.
    ///
    /// Unknown action names are ignored without error.
    pub async fn apply(&self, patch: &AudioPatch) -> AgentResult<AudioState> {
        if let Some(volume) = patch.volume {
            self.set_volume(volume).await;
        }
        if let Some(ref action) = patch.action {
            match TransportAction::parse(action) {
                Some(parsed) => {
                    self.transport(parsed).await;
                }
                None => {
                    debug!("Ignoring unknown audio action {:?}", action);
                }
            }
        }
        if patch.is_empty() {
            return Ok(self.get_state().await);
        }
        Ok(self.store.music())
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{MockMixer, MockTransport};
    use super::*;
    use crate::state::StateStore;

    fn actuator_with(
        mixers: Vec<Box<dyn MixerBackend>>,
        transport: MockTransport,
    ) -> (AudioActuator, StateStore) {
        let store = StateStore::new();
        let actuator = AudioActuator::with_backends(mixers, Box::new(transport), store.clone());
        (actuator, store)
    }

    #[tokio::test]
    async fn test_set_volume_round_trip() {
        let mixer = MockMixer::new("pulse", Some(40));
        let (audio, store) = actuator_with(vec![Box::new(mixer)], MockTransport::default());

        let result = audio.set_volume(70).await;
        assert_eq!(result.confirmed, Some(70));
        assert!(!result.diverged);
        assert_eq!(store.music().volume, Some(70));
    }

    #[tokio::test]
    async fn test_divergence_on_step_quantizing_mixer() {
        let mixer = MockMixer::new("pulse", Some(40)).with_step(25);
        let (audio, store) = actuator_with(vec![Box::new(mixer)], MockTransport::default());

        let result = audio.set_volume(70).await;
        // Mixer clamps to its 25% steps: 70 -> 50
        assert_eq!(result.requested, 70);
        assert_eq!(result.confirmed, Some(50));
        assert!(result.diverged);
        // Store reflects the real value, not the requested one
        assert_eq!(store.music().volume, Some(50));
    }

    #[tokio::test]
    async fn test_fallback_to_second_backend() {
        let broken = MockMixer::new("pulse", None).failing();
        let working = MockMixer::new("alsa", Some(10));
        let handle = working.clone();
        let (audio, store) = actuator_with(
            vec![Box::new(broken), Box::new(working)],
            MockTransport::default(),
        );

        let result = audio.set_volume(33).await;
        assert_eq!(result.confirmed, Some(33));
        assert_eq!(handle.writes(), 1);
        assert_eq!(store.music().volume, Some(33));
    }

    #[tokio::test]
    async fn test_all_backends_down_leaves_volume_unknown() {
        let broken = MockMixer::new("pulse", None).failing();
        let (audio, store) = actuator_with(vec![Box::new(broken)], MockTransport::default());

        let result = audio.set_volume(55).await;
        assert_eq!(result.confirmed, None);
        assert!(!result.diverged);
        assert_eq!(store.music().volume, None);
    }

    #[tokio::test]
    async fn test_transport_failure_retains_status() {
        let mixer = MockMixer::new("pulse", Some(40));
        let (audio, store) = actuator_with(vec![Box::new(mixer)], MockTransport::failing());

        let state = audio.transport(TransportAction::Play).await;
        assert_eq!(state.status, AudioStatus::Pause);
        assert_eq!(store.music().status, AudioStatus::Pause);
    }

    #[tokio::test]
    async fn test_transport_success_updates_status() {
        let mixer = MockMixer::new("pulse", Some(40));
        let transport = MockTransport::default();
        let calls = transport.calls.clone();
        let (audio, store) = actuator_with(vec![Box::new(mixer)], transport);

        audio.transport(TransportAction::Play).await;
        assert_eq!(store.music().status, AudioStatus::Play);

        // Skips leave status alone
        audio.transport(TransportAction::Next).await;
        assert_eq!(store.music().status, AudioStatus::Play);
        assert_eq!(calls.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_get_state_reflects_real_mixer() {
        let mixer = MockMixer::new("pulse", Some(40));
        let handle = mixer.clone();
        let (audio, store) = actuator_with(vec![Box::new(mixer)], MockTransport::default());

        assert_eq!(audio.get_state().await.volume, Some(40));

        // External change is visible on the next read, the store never
        // lags behind a successful read
        handle.drift_to(15);
        assert_eq!(audio.get_state().await.volume, Some(15));
        assert_eq!(store.music().volume, Some(15));
    }

    #[tokio::test]
    async fn test_apply_ignores_unknown_action() {
        let mixer = MockMixer::new("pulse", Some(40));
        let transport = MockTransport::default();
        let calls = transport.calls.clone();
        let (audio, _store) = actuator_with(vec![Box::new(mixer)], transport);

        let state = audio
            .apply(&AudioPatch {
                action: Some("rewind".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(calls.lock().is_empty());
        assert_eq!(state.status, AudioStatus::Pause);
    }
}
