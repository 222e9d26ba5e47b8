// Prompt checkpointing and rollback
//
// Before each iteration the prompt file is copied byte-for-byte into
// .agent/checkpoints/PROMPT.<iter>.md. Only the last K snapshots are kept.
// Rollback restores the newest snapshot exactly. An optional external VCS
// snapshot command runs at the same cadence; its failures are warnings only.

use std::path::{Path, PathBuf};

use tokio::process::Command;

use crate::error::{IoError, SupervisorResult};

pub struct CheckpointManager {
    prompt_path: PathBuf,
    checkpoints_dir: PathBuf,
    depth: usize,
    vcs_snapshot_command: Option<String>,
}

impl CheckpointManager {
    pub fn new(
        prompt_path: PathBuf,
        checkpoints_dir: PathBuf,
        depth: usize,
        vcs_snapshot_command: Option<String>,
    ) -> Self {
        Self {
            prompt_path,
            checkpoints_dir,
            depth,
            vcs_snapshot_command,
        }
    }

    /// Snapshot the prompt file for the given iteration and prune old
    /// checkpoints beyond the rotation depth.
    pub fn snapshot(&self, iteration: u32) -> SupervisorResult<PathBuf> {
        if !self.prompt_path.exists() {
            return Err(IoError::NotFound(self.prompt_path.display().to_string()).into());
        }
        std::fs::create_dir_all(&self.checkpoints_dir)?;
        let target = self
            .checkpoints_dir
            .join(format!("PROMPT.{}.md", iteration));
        std::fs::copy(&self.prompt_path, &target)?;
        self.prune()?;
        Ok(target)
    }

    /// Restore the most recent checkpoint over the prompt file, bit-exact.
    /// Returns the iteration number that was restored.
    pub fn rollback(&self) -> SupervisorResult<u32> {
        let latest = self
            .list()?
            .into_iter()
            .max_by_key(|(iter, _)| *iter)
            .ok_or_else(|| IoError::NotFound("no checkpoints to roll back to".to_string()))?;
        let bytes = std::fs::read(&latest.1)?;
        std::fs::write(&self.prompt_path, bytes)?;
        Ok(latest.0)
    }

    /// Run the configured external snapshot command, if any. Failures are
    /// reported back as a warning string and never as an error.
    pub async fn vcs_snapshot(&self) -> Option<String> {
        let command = self.vcs_snapshot_command.as_ref()?;
        let result = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(self.prompt_path.parent().unwrap_or(Path::new(".")))
            .output()
            .await;
        match result {
            Ok(output) if output.status.success() => None,
            Ok(output) => Some(format!(
                "vcs snapshot command exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )),
            Err(e) => Some(format!("vcs snapshot command failed to start: {}", e)),
        }
    }

    fn prune(&self) -> SupervisorResult<()> {
        let mut checkpoints = self.list()?;
        checkpoints.sort_by_key(|(iter, _)| *iter);
        while checkpoints.len() > self.depth {
            let (_, path) = checkpoints.remove(0);
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    fn list(&self) -> SupervisorResult<Vec<(u32, PathBuf)>> {
        let mut found = Vec::new();
        if !self.checkpoints_dir.exists() {
            return Ok(found);
        }
        for entry in std::fs::read_dir(&self.checkpoints_dir)? {
            let path = entry?.path();
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(name) => name,
                None => continue,
            };
            if let Some(iter) = name
                .strip_prefix("PROMPT.")
                .and_then(|rest| rest.strip_suffix(".md"))
                .and_then(|n| n.parse::<u32>().ok())
            {
                found.push((iter, path));
            }
        }
        Ok(found)
    }
}
