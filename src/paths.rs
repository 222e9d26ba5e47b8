// Run directory layout
//
// All on-disk artifacts of a run hang off a single run directory:
//
//   PROMPT.md
//   .agent/
//     scratchpad.md
//     task-list.json
//     progress.md
//     coordination/{prompts,results,status}/
//     checkpoints/
//     metrics/
//     logs/
//   validation-evidence/

use std::path::{Path, PathBuf};

use crate::config::RalphConfig;

pub const AGENT_DIR: &str = ".agent";

#[derive(Debug, Clone)]
pub struct RunPaths {
    pub root: PathBuf,
    pub prompt_file: PathBuf,
    pub agent_dir: PathBuf,
    pub scratchpad: PathBuf,
    pub task_list: PathBuf,
    pub progress: PathBuf,
    pub coordination: PathBuf,
    pub coordination_prompts: PathBuf,
    pub coordination_results: PathBuf,
    pub coordination_status: PathBuf,
    pub checkpoints: PathBuf,
    pub metrics_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub evidence_dir: PathBuf,
}

impl RunPaths {
    pub fn new(root: &Path, config: &RalphConfig) -> Self {
        let agent_dir = root.join(AGENT_DIR);
        let coordination = agent_dir.join("coordination");
        Self {
            root: root.to_path_buf(),
            prompt_file: root.join(&config.prompt_file),
            scratchpad: agent_dir.join("scratchpad.md"),
            task_list: agent_dir.join("task-list.json"),
            progress: agent_dir.join("progress.md"),
            coordination_prompts: coordination.join("prompts"),
            coordination_results: coordination.join("results"),
            coordination_status: coordination.join("status"),
            coordination,
            checkpoints: agent_dir.join("checkpoints"),
            metrics_dir: agent_dir.join("metrics"),
            logs_dir: agent_dir.join("logs"),
            evidence_dir: root.join(&config.evidence_dir),
            agent_dir,
        }
    }

    /// Create every directory of the layout. The evidence directory is the
    /// agent's to produce, so it is deliberately not created here.
    pub fn ensure(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.agent_dir)?;
        std::fs::create_dir_all(&self.coordination_prompts)?;
        std::fs::create_dir_all(&self.coordination_results)?;
        std::fs::create_dir_all(&self.coordination_status)?;
        std::fs::create_dir_all(&self.checkpoints)?;
        std::fs::create_dir_all(&self.metrics_dir)?;
        std::fs::create_dir_all(&self.logs_dir)?;
        Ok(())
    }

    pub fn checkpoint_file(&self, iteration: u32) -> PathBuf {
        self.checkpoints.join(format!("PROMPT.{}.md", iteration))
    }
}
