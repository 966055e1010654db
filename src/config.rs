//! Configuration loading for the agent
//!
//! One YAML file read at startup. Unreadable or unparseable config is
//! the only fatal failure class in the agent; everything after boot is
//! recoverable.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentConfig {
    pub hub: HubConfig,
    #[serde(default)]
    pub timers: TimerConfig,
    #[serde(default)]
    pub leds: LedConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    /// Push the locally cached state to hardware on connect, before any
    /// hub contact succeeds
    #[serde(default = "default_true")]
    pub apply_cached_on_boot: bool,
}

/// Hub address, device identity, and shared secret
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HubConfig {
    /// Base HTTP address, e.g. http://192.168.1.96:3000
    pub url: String,
    pub device_id: String,
    pub api_key: String,
    #[serde(default = "default_ws_path")]
    pub ws_path: String,
}

/// Timer periods driving the reconciliation triggers
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimerConfig {
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    #[serde(default = "default_poll_secs")]
    pub poll_secs: u64,
    #[serde(default = "default_watch_secs")]
    pub watch_secs: u64,
    #[serde(default = "default_report_min_interval_secs")]
    pub report_min_interval_secs: u64,
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: default_heartbeat_secs(),
            poll_secs: default_poll_secs(),
            watch_secs: default_watch_secs(),
            report_min_interval_secs: default_report_min_interval_secs(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
        }
    }
}

/// LED strip hardware parameters (WS2812B on the PWM peripheral)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LedConfig {
    #[serde(default = "default_led_count")]
    pub count: usize,
    #[serde(default = "default_gpio_pin")]
    pub gpio_pin: u8,
    #[serde(default = "default_freq_hz")]
    pub freq_hz: u32,
    #[serde(default = "default_dma")]
    pub dma: u8,
    #[serde(default)]
    pub channel: u8,
    #[serde(default)]
    pub invert: bool,
    /// Try the hardware driver; the software stand-in is used when this
    /// is off or initialization fails
    #[serde(default = "default_true")]
    pub hardware: bool,
}

impl Default for LedConfig {
    fn default() -> Self {
        Self {
            count: default_led_count(),
            gpio_pin: default_gpio_pin(),
            freq_hz: default_freq_hz(),
            dma: default_dma(),
            channel: 0,
            invert: false,
            hardware: true,
        }
    }
}

/// Audio backend parameters
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AudioConfig {
    /// Pulse sink to target; the default-sink alias avoids fragile long
    /// sink names
    #[serde(default = "default_pulse_sink")]
    pub pulse_sink: String,
    #[serde(default = "default_alsa_card")]
    pub alsa_card: u32,
    #[serde(default = "default_alsa_control")]
    pub alsa_control: String,
    /// `XDG_RUNTIME_DIR` of the session owning the audio server, for
    /// agents not running as that user (e.g. /run/user/1000)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_dir: Option<String>,
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            pulse_sink: default_pulse_sink(),
            alsa_card: default_alsa_card(),
            alsa_control: default_alsa_control(),
            runtime_dir: None,
            command_timeout_secs: default_command_timeout_secs(),
        }
    }
}

impl AgentConfig {
    /// Load and parse the YAML configuration file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AgentConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        Ok(config)
    }
}

#[cfg(test)]
impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            hub: HubConfig {
                url: "http://127.0.0.1:3000".to_string(),
                device_id: "test-device".to_string(),
                api_key: "test-key".to_string(),
                ws_path: default_ws_path(),
            },
            timers: TimerConfig::default(),
            leds: LedConfig::default(),
            audio: AudioConfig::default(),
            apply_cached_on_boot: true,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/agent".to_string()
}

fn default_heartbeat_secs() -> u64 {
    20
}

fn default_poll_secs() -> u64 {
    15
}

fn default_watch_secs() -> u64 {
    3
}

fn default_report_min_interval_secs() -> u64 {
    30
}

fn default_reconnect_delay_secs() -> u64 {
    5
}

fn default_led_count() -> usize {
    60
}

fn default_gpio_pin() -> u8 {
    18
}

fn default_freq_hz() -> u32 {
    800_000
}

fn default_dma() -> u8 {
    10
}

fn default_pulse_sink() -> String {
    "@DEFAULT_SINK@".to_string()
}

fn default_alsa_card() -> u32 {
    1
}

fn default_alsa_control() -> String {
    "PCM".to_string()
}

fn default_command_timeout_secs() -> u64 {
    3
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_minimal_config_gets_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "hub:\n  url: http://hub.local:3000\n  device_id: pi-salon\n  api_key: sekret"
        )
        .unwrap();

        let config = AgentConfig::load(file.path().to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(config.hub.device_id, "pi-salon");
        assert_eq!(config.hub.ws_path, "/agent");
        assert_eq!(config.timers.heartbeat_secs, 20);
        assert_eq!(config.leds.count, 60);
        assert_eq!(config.audio.pulse_sink, "@DEFAULT_SINK@");
        assert!(config.apply_cached_on_boot);
    }

    #[tokio::test]
    async fn test_overrides_apply() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            concat!(
                "hub:\n  url: http://hub.local:3000\n  device_id: d\n  api_key: k\n",
                "timers:\n  poll_secs: 5\n",
                "leds:\n  count: 144\n  hardware: false\n",
                "audio:\n  runtime_dir: /run/user/1000\n",
                "apply_cached_on_boot: false",
            )
        )
        .unwrap();

        let config = AgentConfig::load(file.path().to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(config.timers.poll_secs, 5);
        assert_eq!(config.leds.count, 144);
        assert!(!config.leds.hardware);
        assert_eq!(config.audio.runtime_dir.as_deref(), Some("/run/user/1000"));
        assert!(!config.apply_cached_on_boot);
    }

    #[tokio::test]
    async fn test_missing_file_is_error() {
        assert!(AgentConfig::load("/nonexistent/config.yaml").await.is_err());
    }
}
