// Agent adapter layer
//
// A uniform async interface over heterogeneous external agent CLIs. Every
// variant upholds the same contract: deadlines are honored with
// terminate-then-kill, cancellation behaves as a timeout, the prompt is a
// positional argument (never shell-interpolated), output capture is capped,
// and the child is always reaped.

mod acp;
mod claude;
mod exec;
mod gemini;
mod qchat;

pub use acp::AcpAdapter;
pub use claude::ClaudeAdapter;
pub use gemini::GeminiAdapter;
pub use qchat::QChatAdapter;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::{AcpConfig, RalphConfig};
use crate::error::{AdapterError, SupervisorResult};
use crate::types::{AgentKind, AgentResponse};

/// Order in which `auto` probes for a usable agent.
const AUTO_ORDER: &[AgentKind] = &[AgentKind::Claude, AgentKind::Gemini, AgentKind::QChat];

#[async_trait]
pub trait AgentAdapter: Send + Sync {
    fn kind(&self) -> AgentKind;

    /// Cheap availability probe (binary present, runnable).
    async fn available(&self) -> bool;

    /// Run one invocation against the prompt. Blocking is fine; the
    /// deadline and cancel token bound it.
    async fn execute(
        &self,
        prompt: &str,
        prompt_path: &Path,
        deadline: Duration,
        cancel: CancellationToken,
    ) -> AgentResponse;

    /// Tear down any persistent child. One-shot adapters have nothing to do.
    async fn shutdown(&self) {}
}

/// Settings shared by every adapter, derived from the run config.
#[derive(Debug, Clone)]
pub struct AdapterSettings {
    pub working_dir: PathBuf,
    pub max_output_bytes: usize,
    pub grace: Duration,
    pub acp: AcpConfig,
}

impl AdapterSettings {
    pub fn from_config(config: &RalphConfig, working_dir: &Path) -> Self {
        Self {
            working_dir: working_dir.to_path_buf(),
            max_output_bytes: config.max_output_bytes,
            grace: Duration::from_secs(config.cancel_grace_seconds),
            acp: config.acp.clone(),
        }
    }
}

/// Construct the adapter for a concrete agent kind. `Auto` must be resolved
/// first; it never reaches this factory.
pub fn build_adapter(
    kind: AgentKind,
    settings: &AdapterSettings,
) -> SupervisorResult<Arc<dyn AgentAdapter>> {
    match kind {
        AgentKind::Claude => Ok(Arc::new(ClaudeAdapter::new(settings.clone()))),
        AgentKind::Gemini => Ok(Arc::new(GeminiAdapter::new(settings.clone()))),
        AgentKind::QChat => Ok(Arc::new(QChatAdapter::new(settings.clone()))),
        AgentKind::Acp => Ok(Arc::new(AcpAdapter::new(settings.clone()))),
        AgentKind::Auto => Err(AdapterError::Unavailable(
            "'auto' must be resolved before building an adapter".to_string(),
        )
        .into()),
    }
}

/// Resolve the `auto` tag to the first available concrete kind.
pub async fn resolve_auto(settings: &AdapterSettings) -> SupervisorResult<AgentKind> {
    for kind in AUTO_ORDER {
        let adapter = build_adapter(*kind, settings)?;
        if adapter.available().await {
            return Ok(*kind);
        }
    }
    Err(AdapterError::Unavailable("no supported agent CLI found on this system".to_string()).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> AdapterSettings {
        AdapterSettings {
            working_dir: PathBuf::from("."),
            max_output_bytes: 1024,
            grace: Duration::from_secs(1),
            acp: AcpConfig::default(),
        }
    }

    #[test]
    fn test_factory_covers_concrete_kinds() {
        for kind in [AgentKind::Claude, AgentKind::Gemini, AgentKind::QChat, AgentKind::Acp] {
            let adapter = build_adapter(kind, &settings()).unwrap();
            assert_eq!(adapter.kind(), kind);
        }
    }

    #[test]
    fn test_factory_rejects_auto() {
        assert!(build_adapter(AgentKind::Auto, &settings()).is_err());
    }
}
