//! OS-level audio control backends
//!
//! Shell-invoked controllers for the desktop-session mixer (`pactl`),
//! the hardware mixer (`amixer`), and the MPRIS media transport
//! (`playerctl`). Each call is a short-lived subprocess bounded by a
//! defensive timeout so a stuck tool cannot stall a reconciliation
//! cycle past its budget.

use crate::error::{AgentError, AgentResult};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// First percentage in a mixer tool's output, e.g. "Volume: ... 40% ..."
static PCT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)%").expect("percent regex"));

/// Shared subprocess environment for backend invocations
#[derive(Debug, Clone)]
pub struct CommandEnv {
    /// `XDG_RUNTIME_DIR` of the session that owns the audio server.
    /// Without it a root-run agent would reach the wrong (silent) mixer.
    pub runtime_dir: Option<String>,
    /// Upper bound for any single backend call
    pub timeout: Duration,
}

impl CommandEnv {
    pub fn new(runtime_dir: Option<String>, timeout: Duration) -> Self {
        Self {
            runtime_dir,
            timeout,
        }
    }

    /// Run a tool and capture (exit ok, stdout). Absent tools and
    /// timeouts both surface as `BackendUnavailable`.
    async fn run(&self, backend: &'static str, program: &str, args: &[&str]) -> AgentResult<(bool, String)> {
        debug!("RUN: {} {}", program, args.join(" "));
        let mut cmd = Command::new(program);
        cmd.args(args).kill_on_drop(true);
        if let Some(ref dir) = self.runtime_dir {
            cmd.env("XDG_RUNTIME_DIR", dir);
        }

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| AgentError::backend(backend, format!("{program} timed out")))?
            .map_err(|e| AgentError::backend(backend, format!("{program}: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!("{} exited {:?}: {}", program, output.status.code(), stderr.trim());
        }
        Ok((output.status.success(), stdout))
    }
}

fn parse_percent(out: &str) -> Option<u8> {
    PCT_RE
        .captures(out)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u16>().ok())
        .map(|v| v.min(100) as u8)
}

/// A volume mixer the actuator can write to and read back from
#[async_trait]
pub trait MixerBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Request a volume; success means the tool accepted the request,
    /// not that the value took effect as-is
    async fn set_volume(&self, pct: u8) -> AgentResult<()>;

    /// Read the real current volume, `Ok(None)` when unparseable
    async fn get_volume(&self) -> AgentResult<Option<u8>>;
}

/// Desktop-session mixer via `pactl`.
///
/// Targets `@DEFAULT_SINK@` by default rather than a long fragile sink
/// name; a specific sink can be configured.
pub struct PulseMixer {
    sink: String,
    env: CommandEnv,
}

impl PulseMixer {
    pub fn new(sink: String, env: CommandEnv) -> Self {
        Self { sink, env }
    }
}

#[async_trait]
impl MixerBackend for PulseMixer {
    fn name(&self) -> &'static str {
        "pulse"
    }

    async fn set_volume(&self, pct: u8) -> AgentResult<()> {
        let pct = pct.min(100);
        let spec = format!("{pct}%");
        let (ok, _) = self
            .env
            .run("pulse", "pactl", &["set-sink-volume", &self.sink, &spec])
            .await?;
        if ok {
            Ok(())
        } else {
            Err(AgentError::backend("pulse", "set-sink-volume failed"))
        }
    }

    async fn get_volume(&self) -> AgentResult<Option<u8>> {
        let (ok, out) = self
            .env
            .run("pulse", "pactl", &["get-sink-volume", &self.sink])
            .await?;
        if !ok {
            return Err(AgentError::backend("pulse", "get-sink-volume failed"));
        }
        Ok(parse_percent(&out))
    }
}

/// Hardware mixer fallback via `amixer`
pub struct AlsaMixer {
    card: String,
    control: String,
    env: CommandEnv,
}

impl AlsaMixer {
    pub fn new(card: u32, control: String, env: CommandEnv) -> Self {
        Self {
            card: card.to_string(),
            control,
            env,
        }
    }
}

#[async_trait]
impl MixerBackend for AlsaMixer {
    fn name(&self) -> &'static str {
        "alsa"
    }

    async fn set_volume(&self, pct: u8) -> AgentResult<()> {
        let pct = pct.min(100);
        let spec = format!("{pct}%");
        let (ok, _) = self
            .env
            .run(
                "alsa",
                "amixer",
                &["-c", &self.card, "sset", &self.control, &spec, "-M"],
            )
            .await?;
        if ok {
            Ok(())
        } else {
            Err(AgentError::backend("alsa", "sset failed"))
        }
    }

    async fn get_volume(&self) -> AgentResult<Option<u8>> {
        let (ok, out) = self
            .env
            .run("alsa", "amixer", &["-c", &self.card, "sget", &self.control])
            .await?;
        if !ok {
            return Err(AgentError::backend("alsa", "sget failed"));
        }
        Ok(parse_percent(&out))
    }
}

/// Playback transport action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportAction {
    Play,
    Pause,
    Next,
    Previous,
}

impl TransportAction {
    /// Parse tolerant action names ("prev" and "previous" both work)
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "play" => Some(TransportAction::Play),
            "pause" => Some(TransportAction::Pause),
            "next" => Some(TransportAction::Next),
            "prev" | "previous" => Some(TransportAction::Previous),
            _ => None,
        }
    }

    fn as_arg(&self) -> &'static str {
        match self {
            TransportAction::Play => "play",
            TransportAction::Pause => "pause",
            TransportAction::Next => "next",
            TransportAction::Previous => "previous",
        }
    }
}

/// Media transport control the actuator drives best-effort
#[async_trait]
pub trait TransportBackend: Send + Sync {
    async fn run(&self, action: TransportAction) -> AgentResult<()>;
}

/// MPRIS transport via `playerctl`
pub struct PlayerctlTransport {
    env: CommandEnv,
}

impl PlayerctlTransport {
    pub fn new(env: CommandEnv) -> Self {
        Self { env }
    }
}

#[async_trait]
impl TransportBackend for PlayerctlTransport {
    async fn run(&self, action: TransportAction) -> AgentResult<()> {
        let (ok, _) = self
            .env
            .run("playerctl", "playerctl", &[action.as_arg()])
            .await?;
        if ok {
            Ok(())
        } else {
            Err(AgentError::backend("playerctl", "command failed"))
        }
    }
}
