// Gemini CLI adapter
//
// One-shot invocation of the Gemini CLI in non-interactive prompt mode.
// The CLI prints plain text; token counts are not reported, so cost falls
// back to the pricing table.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::exec::{binary_on_path, run_with_deadline, CommandSpec, ExecLimits};
use super::{AdapterSettings, AgentAdapter};
use crate::types::{AgentKind, AgentResponse};

pub struct GeminiAdapter {
    settings: AdapterSettings,
}

impl GeminiAdapter {
    pub fn new(settings: AdapterSettings) -> Self {
        Self { settings }
    }

    fn binary(&self) -> String {
        std::env::var("RALPH_GEMINI_PATH").unwrap_or_else(|_| "gemini".to_string())
    }
}

#[async_trait]
impl AgentAdapter for GeminiAdapter {
    fn kind(&self) -> AgentKind {
        AgentKind::Gemini
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
                "--yolo".to_string(),
                "-p".to_string(),
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
