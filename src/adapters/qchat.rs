// Q chat CLI adapter
//
// Runs `q chat` in trusted non-interactive mode. Plain text output, no
// token reporting.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::exec::{binary_on_path, run_with_deadline, CommandSpec, ExecLimits};
use super::{AdapterSettings, AgentAdapter};
use crate::types::{AgentKind, AgentResponse};

pub struct QChatAdapter {
    settings: AdapterSettings,
}

impl QChatAdapter {
    pub fn new(settings: AdapterSettings) -> Self {
        Self { settings }
    }

    fn binary(&self) -> String {
        std::env::var("RALPH_QCHAT_PATH").unwrap_or_else(|_| "q".to_string())
    }
}

#[async_trait]
impl AgentAdapter for QChatAdapter {
    fn kind(&self) -> AgentKind {
        AgentKind::QChat
    }

    async fn available(&self) -> bool {
        let binary = self.binary();
        binary_on_path(&binary) || Path::new(&binary).is_file()
    }

    async fn execute(
        &self,
        prompt: &str,
        _prompt_path: &Path,
        deadline: Duration,
        cancel: CancellationToken,
    ) -> AgentResponse {
        let spec = CommandSpec {
            program: self.binary(),
            args: vec![
                "chat".to_string(),
                "--no-interactive".to_string(),
                "--trust-all-tools".to_string(),
                prompt.to_string(),
            ],
            working_dir: Some(self.settings.working_dir.clone()),
            env_remove: vec![],
        };
        let limits = ExecLimits {
            deadline,
            grace: self.settings.grace,
            max_output_bytes: self.settings.max_output_bytes,
        };
        run_with_deadline(spec, &limits, &cancel).await
    }
}
