// Iteration loop supervisor
//
// Drives the run state machine: safety check, prompt enhancement,
// checkpoint, adapter invocation (direct or orchestrated), bookkeeping,
// completion detection, context update, sleep. Owns every component and
// threads one cancellation token through all suspension points.

use std::collections::VecDeque;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::adapters::{build_adapter, resolve_auto, AdapterSettings, AgentAdapter};
use crate::checkpoint::CheckpointManager;
use crate::completion::CompletionDetector;
use crate::config::RalphConfig;
use crate::context_manager::ContextManager;
use crate::cost_tracker::{CostTracker, PricingTable};
use crate::error::{AdapterError, SupervisorResult};
use crate::logger::{LogLevel, Logger};
use crate::metrics::{OrchestrationMetrics, RunMetrics, RunSummary};
use crate::orchestration::{CoordinationStore, SubAgentOrchestrator, ToolCatalog};
use crate::paths::RunPaths;
use crate::safety::{
    similarity, GuardAction, GuardSnapshot, SafetyGuard, SafetyLimits, REASON_FAILURE_STREAK,
    REASON_OPERATOR_CANCEL,
};
use crate::types::{AgentKind, AgentResponse, IterationStats, RunState};
use crate::utils::time::now_rfc3339;

/// Poll interval while sitting in Paused.
const PAUSE_POLL: Duration = Duration::from_millis(200);

/// What a finished run looks like to the caller.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub state: RunState,
    pub iterations_recorded: u32,
    pub abort_reason: Option<String>,
    pub total_cost_usd: f64,
    pub duration_seconds: f64,
    pub metrics_path: Option<PathBuf>,
}

impl RunReport {
    /// Supervisor process exit code: 0 Complete, 1 Failed,
    /// 2 Aborted-by-limit, 3 Aborted-by-operator.
    pub fn exit_code(&self) -> i32 {
        match self.state {
            RunState::Complete => 0,
            RunState::Failed => 1,
            RunState::Aborted => {
                if self.abort_reason.as_deref() == Some(REASON_OPERATOR_CANCEL) {
                    3
                } else {
                    2
                }
            }
            _ => 1,
        }
    }
}

pub struct Supervisor {
    config: RalphConfig,
    paths: RunPaths,
    agent_kind: AgentKind,
    adapter: Arc<dyn AgentAdapter>,
    orchestrator: Option<SubAgentOrchestrator>,
    guard: SafetyGuard,
    context: ContextManager,
    checkpoints: CheckpointManager,
    cost: CostTracker,
    detector: CompletionDetector,
    logger: Option<Arc<Logger>>,

    cancel: CancellationToken,
    paused: Arc<AtomicBool>,

    state: RunState,
    iterations: Vec<IterationStats>,
    consecutive_failures: u32,
    output_history: VecDeque<String>,
    abort_reason: Option<String>,
    validation_attempts: u32,
}

impl Supervisor {
    /// Wire up every component for a run rooted at `run_dir`. Resolves the
    /// `auto` agent tag and fails fast when the chosen agent is missing.
    pub async fn new(config: RalphConfig, run_dir: &Path) -> SupervisorResult<Self> {
        let settings = AdapterSettings::from_config(&config, run_dir);
        let agent_kind = match config.agent {
            AgentKind::Auto => resolve_auto(&settings).await?,
            kind => kind,
        };
        let adapter = build_adapter(agent_kind, &settings)?;
        if !adapter.available().await {
            return Err(AdapterError::Unavailable(agent_kind.as_str().to_string()).into());
        }
        Self::with_adapter(config, run_dir, adapter).await
    }

    /// Assemble a supervisor around a caller-supplied adapter. Lets tests
    /// and embedders drive the loop with a stub agent.
    pub async fn with_adapter(
        config: RalphConfig,
        run_dir: &Path,
        adapter: Arc<dyn AgentAdapter>,
    ) -> SupervisorResult<Self> {
        config.validate()?;
        let paths = RunPaths::new(run_dir, &config);
        paths.ensure()?;

        let logger = Logger::new(paths.logs_dir.clone()).ok().map(Arc::new);
        let agent_kind = adapter.kind();

        let context = ContextManager::new(
            paths.prompt_file.clone(),
            paths.task_list.clone(),
            paths.scratchpad.clone(),
        )?;

        let checkpoints = CheckpointManager::new(
            paths.prompt_file.clone(),
            paths.checkpoints.clone(),
            config.checkpoint_depth,
            config.vcs_snapshot_command.clone(),
        );

        let orchestrator = if config.enable_orchestration {
            let store = CoordinationStore::new(
                paths.coordination_prompts.clone(),
                paths.coordination_results.clone(),
                paths.coordination_status.clone(),
            );
            store.ensure()?;
            Some(SubAgentOrchestrator::new(
                adapter.clone(),
                store,
                ToolCatalog::from_env(),
                paths.prompt_file.clone(),
                config.max_parallel_subagents,
            ))
        } else {
            None
        };

        let guard = SafetyGuard::new(SafetyLimits::from_config(&config));
        let detector =
            CompletionDetector::new(&config.completion_marker, config.completion_require_checkbox)?;

        Ok(Self {
            guard,
            context,
            checkpoints,
            cost: CostTracker::new(PricingTable::default()),
            detector,
            logger,
            orchestrator,
            adapter,
            agent_kind,
            cancel: CancellationToken::new(),
            paused: Arc::new(AtomicBool::new(false)),
            state: RunState::Initializing,
            iterations: Vec::new(),
            consecutive_failures: 0,
            output_history: VecDeque::new(),
            abort_reason: None,
            validation_attempts: 0,
            config,
            paths,
        })
    }

    /// Token the operator's signal handler cancels to stop the run.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Flag toggled by the operator's pause signal.
    pub fn pause_flag(&self) -> Arc<AtomicBool> {
        self.paused.clone()
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Run to a terminal state. Metrics are flushed and any persistent
    /// child is torn down on every exit path.
    pub async fn run(&mut self) -> SupervisorResult<RunReport> {
        let started = Instant::now();
        let started_at = now_rfc3339();

        self.log(LogLevel::Info, &format!("run starting with agent '{}'", self.agent_kind))
            .await;

        while !self.state.is_terminal() {
            match self.state {
                RunState::Initializing | RunState::Running => {
                    self.step(&started).await;
                }
                RunState::Paused => {
                    self.wait_while_paused().await;
                }
                RunState::Completing => {
                    let next = if self.config.enable_validation {
                        RunState::Validating
                    } else {
                        RunState::Complete
                    };
                    self.set_state(next);
                }
                RunState::Validating => {
                    self.validate().await;
                }
                // terminal states end the loop
                _ => break,
            }
        }

        // orderly shutdown: reap any persistent child before reporting
        self.adapter.shutdown().await;

        let ended_at = now_rfc3339();
        let duration_seconds = started.elapsed().as_secs_f64();
        let metrics = self.build_metrics(&started_at, &ended_at, duration_seconds);
        let metrics_path = match metrics.write(&self.paths.metrics_dir) {
            Ok(path) => Some(path),
            Err(e) => {
                self.log(LogLevel::Error, &format!("failed to write metrics: {}", e))
                    .await;
                None
            }
        };

        self.log(
            LogLevel::Info,
            &format!(
                "run finished: state={} iterations={} cost=${:.4}",
                self.state,
                self.iterations.len(),
                self.cost.total_cost()
            ),
        )
        .await;

        Ok(RunReport {
            state: self.state,
            iterations_recorded: self.iterations.len() as u32,
            abort_reason: self.abort_reason.clone(),
            total_cost_usd: self.cost.total_cost(),
            duration_seconds,
            metrics_path,
        })
    }

    /// One pass through the Running arm: guard, prompt, checkpoint, invoke,
    /// record, completion test, context update, sleep.
    async fn step(&mut self, started: &Instant) {
        if self.cancel.is_cancelled() {
            self.abort(REASON_OPERATOR_CANCEL).await;
            return;
        }

        let decision = self.guard.evaluate(&self.guard_snapshot(started));
        match decision.action {
            GuardAction::Abort => {
                let reason = decision.reason.unwrap_or_else(|| "safety".to_string());
                self.abort(&reason).await;
                return;
            }
            GuardAction::Pause => {
                self.set_state(RunState::Paused);
                return;
            }
            GuardAction::Continue => {}
        }

        // guard passed while Initializing: the run is live now
        if self.state == RunState::Initializing {
            self.set_state(RunState::Running);
        }
        if self.paused.load(Ordering::SeqCst) {
            self.set_state(RunState::Paused);
            return;
        }

        let sequence = self.iterations.len() as u32 + 1;
        let iteration_started_at = now_rfc3339();
        let iteration_start = Instant::now();

        let prompt = match self.context.prompt() {
            Ok(prompt) => prompt,
            Err(e) => {
                self.fail(&format!("cannot read prompt: {}", e)).await;
                return;
            }
        };

        if let Err(e) = self.checkpoints.snapshot(sequence) {
            self.fail(&format!("cannot checkpoint prompt: {}", e)).await;
            return;
        }
        if let Some(warning) = self.checkpoints.vcs_snapshot().await {
            self.log(LogLevel::Warning, &warning).await;
        }

        let elapsed = started.elapsed().as_secs();
        let deadline = Duration::from_secs(self.config.adapter_deadline_seconds(elapsed));
        let subagent_deadline =
            Duration::from_secs(self.config.subagent_deadline_seconds(elapsed));

        let response = match self.orchestrator.as_mut() {
            Some(orchestrator) => {
                match orchestrator
                    .execute_iteration(&prompt, subagent_deadline, self.cancel.clone())
                    .await
                {
                    Ok(response) => response,
                    Err(e) => AgentResponse::failure(
                        format!("orchestration error: {}", e),
                        iteration_start.elapsed().as_secs_f64(),
                    ),
                }
            }
            None => {
                self.adapter
                    .execute(&prompt, &self.paths.prompt_file, deadline, self.cancel.clone())
                    .await
            }
        };

        let cost_delta = self.cost.record(sequence, self.agent_kind, &response);
        let suspected_loop = self.output_history.iter().any(|prior| {
            similarity(&response.output, prior) >= self.config.loop_similarity_threshold
        });

        let stats = IterationStats {
            sequence,
            started_at: iteration_started_at,
            ended_at: now_rfc3339(),
            agent: self.agent_kind,
            outcome: response.outcome(),
            tokens_in: response.tokens_in,
            tokens_out: response.tokens_out,
            cost: Some(cost_delta),
            duration_seconds: response.duration_seconds,
            suspected_loop,
            trigger_reason: if response.success {
                None
            } else {
                Some(response.error.clone())
            },
        };
        self.append_progress(&stats);
        self.iterations.push(stats);

        self.log(
            LogLevel::Info,
            &format!(
                "iteration {} finished: success={} cost=${:.4}",
                sequence, response.success, cost_delta
            ),
        )
        .await;

        // completion is decided on the raw prompt file, which the agent may
        // have rewritten during the invocation
        match self.context.raw_prompt() {
            Ok(raw) if self.detector.check(&raw) => {
                self.set_state(RunState::Completing);
                return;
            }
            Ok(_) => {}
            Err(e) => {
                self.log(LogLevel::Warning, &format!("cannot re-read prompt: {}", e))
                    .await;
            }
        }

        self.context
            .append_iteration_summary(sequence, &response.output);

        if response.success {
            if self.consecutive_failures > 0 {
                self.context.append_success_note(format!(
                    "iteration {} recovered after {} failed attempt(s)",
                    sequence, self.consecutive_failures
                ));
            }
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures += 1;
            self.context.append_error_note(response.error.clone());
            match self.checkpoints.rollback() {
                Ok(restored) => {
                    self.log(
                        LogLevel::Warning,
                        &format!("iteration {} failed, rolled prompt back to checkpoint {}", sequence, restored),
                    )
                    .await;
                }
                Err(e) => {
                    self.log(LogLevel::Error, &format!("rollback failed: {}", e))
                        .await;
                }
            }
            if self.consecutive_failures >= self.config.max_consecutive_failures {
                self.abort_reason = Some(REASON_FAILURE_STREAK.to_string());
                self.set_state(RunState::Failed);
                return;
            }
        }

        self.push_output_history(response.output);

        if self.config.inter_iteration_sleep_seconds > 0 {
            let sleep = Duration::from_secs(self.config.inter_iteration_sleep_seconds);
            tokio::select! {
                _ = tokio::time::sleep(sleep) => {}
                _ = self.cancel.cancelled() => {}
            }
        }
    }

    /// Evidence gate. Passing completes the run; failing either sends the
    /// loop back to Running for another attempt or, with attempts
    /// exhausted, declares Failed.
    async fn validate(&mut self) {
        let validator = crate::validation::EvidenceValidator::new(
            self.paths.evidence_dir.clone(),
            self.config.fail_on_empty_evidence,
        );
        let report = validator.check();
        for warning in &report.warnings {
            self.log(LogLevel::Warning, warning).await;
        }

        if report.success {
            self.set_state(RunState::Complete);
            return;
        }

        let detail = report.errors.join("; ");
        self.log(LogLevel::Error, &format!("validation failed: {}", detail))
            .await;

        if self.validation_attempts < self.config.validation_max_retries {
            self.validation_attempts += 1;
            self.context
                .append_error_note(format!("validation failed: {}", detail));
            self.set_state(RunState::Running);
        } else {
            self.abort_reason = Some(format!("validation_failed: {}", detail));
            self.set_state(RunState::Failed);
        }
    }

    async fn wait_while_paused(&mut self) {
        self.log(LogLevel::Info, "run paused by operator").await;
        while self.paused.load(Ordering::SeqCst) {
            if self.cancel.is_cancelled() {
                self.abort(REASON_OPERATOR_CANCEL).await;
                return;
            }
            tokio::time::sleep(PAUSE_POLL).await;
        }
        self.log(LogLevel::Info, "run resumed").await;
        self.set_state(RunState::Running);
    }

    /// Every state change funnels through here so an illegal transition
    /// trips in debug builds instead of silently corrupting the run.
    fn set_state(&mut self, to: RunState) {
        debug_assert!(
            crate::types::is_valid_transition(self.state, to),
            "invalid transition {} -> {}",
            self.state,
            to
        );
        self.state = to;
    }

    fn guard_snapshot(&self, started: &Instant) -> GuardSnapshot {
        let mut outputs = self.output_history.iter().rev();
        let last_output = outputs.next().cloned();
        let prior_outputs: Vec<String> = outputs
            .take(self.config.loop_detection_window)
            .cloned()
            .collect();
        GuardSnapshot {
            iteration: self.iterations.len() as u32,
            elapsed_seconds: started.elapsed().as_secs_f64(),
            cost: self.cost.total_cost(),
            consecutive_failures: self.consecutive_failures,
            last_output,
            prior_outputs,
        }
    }

    fn push_output_history(&mut self, output: String) {
        self.output_history.push_back(output);
        // the guard needs the latest output plus the detection window
        while self.output_history.len() > self.config.loop_detection_window + 1 {
            self.output_history.pop_front();
        }
    }

    async fn abort(&mut self, reason: &str) {
        self.log(LogLevel::Warning, &format!("aborting run: {}", reason))
            .await;
        self.abort_reason = Some(reason.to_string());
        self.set_state(RunState::Aborted);
    }

    async fn fail(&mut self, reason: &str) {
        self.log(LogLevel::Error, reason).await;
        self.abort_reason = Some(reason.to_string());
        self.set_state(RunState::Failed);
    }

    fn append_progress(&self, stats: &IterationStats) {
        let line = format!(
            "- iteration {} [{}] outcome={:?} duration={:.1}s cost=${:.4}\n",
            stats.sequence,
            stats.ended_at,
            stats.outcome,
            stats.duration_seconds,
            stats.cost.unwrap_or(0.0),
        );
        if let Ok(mut file) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.paths.progress)
        {
            let _ = file.write_all(line.as_bytes());
        }
    }

    fn build_metrics(&self, started_at: &str, ended_at: &str, duration_seconds: f64) -> RunMetrics {
        let orchestration = self.orchestrator.as_ref().map(|orchestrator| {
            OrchestrationMetrics {
                enabled: true,
                results: orchestrator.aggregate().ok(),
            }
        });
        RunMetrics {
            summary: RunSummary {
                agent: self.agent_kind,
                state: self.state,
                iterations_recorded: self.iterations.len() as u32,
                started_at: started_at.to_string(),
                ended_at: ended_at.to_string(),
                duration_seconds,
                abort_reason: self.abort_reason.clone(),
                cost: self.cost.summary(),
            },
            iterations: self.iterations.clone(),
            orchestration,
        }
    }

    async fn log(&self, level: LogLevel, message: &str) {
        if let Some(logger) = &self.logger {
            logger
                .log_iteration(
                    level,
                    "supervisor",
                    message,
                    self.agent_kind.as_str(),
                    self.iterations.len() as u32,
                )
                .await;
        }
    }
}

/// Install the operator signal handlers: interrupt cancels the run, and on
/// unix SIGUSR1 toggles pause/resume.
pub fn install_signal_handlers(cancel: CancellationToken, paused: Arc<AtomicBool>) {
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        if let Ok(mut stream) = signal(SignalKind::user_defined1()) {
            tokio::spawn(async move {
                while stream.recv().await.is_some() {
                    paused.fetch_xor(true, Ordering::SeqCst);
                }
            });
        }
    }
    #[cfg(not(unix))]
    {
        let _ = paused;
    }
}
