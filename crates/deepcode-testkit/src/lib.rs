//! Shared test fakes: scripted models, a recording shell runner, counting
//! confirmation handlers and a ready-made loop controller.

use anyhow::Result;
pub use deepcode_agent::{ConfirmDecision, ConfirmationHandler, LoopController};
use deepcode_core::{AppConfig, Capability, Transcript, TransportError};
use deepcode_llm::ModelClient;
use deepcode_observe::Observer;
use deepcode_policy::PermissionGate;
use deepcode_tools::{ShellRunResult, ShellRunner, ToolExecutor};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Plays back a fixed script of responses; once exhausted it repeats the
/// last entry, which makes iteration-cap tests trivial.
#[derive(Clone)]
pub struct ScriptedModel {
    script: Arc<Vec<String>>,
    cursor: Arc<AtomicUsize>,
}

impl ScriptedModel {
    pub fn new<I, S>(script: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let script: Vec<String> = script.into_iter().map(Into::into).collect();
        assert!(!script.is_empty(), "scripted model needs at least one response");
        Self {
            script: Arc::new(script),
            cursor: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of completed model calls so far.
    pub fn calls(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }
}

impl ModelClient for ScriptedModel {
    fn complete(&self, _transcript: &Transcript) -> Result<String, TransportError> {
        let index = self.cursor.fetch_add(1, Ordering::SeqCst);
        Ok(self.script[index.min(self.script.len() - 1)].clone())
    }
}

/// Always fails with a network-level transport error.
#[derive(Clone, Copy)]
pub struct FailingModel;

impl ModelClient for FailingModel {
    fn complete(&self, _transcript: &Transcript) -> Result<String, TransportError> {
        Err(TransportError::Network("connection refused".to_string()))
    }
}

/// Captures shell commands instead of running them.
#[derive(Clone, Default)]
pub struct RecordingRunner {
    commands: Arc<Mutex<Vec<String>>>,
}

impl RecordingRunner {
    pub fn captured(&self) -> Vec<String> {
        self.commands.lock().expect("commands").clone()
    }
}

impl ShellRunner for RecordingRunner {
    fn run(&self, cmd: &str, _cwd: &Path, _timeout: Duration) -> Result<ShellRunResult> {
        self.commands
            .lock()
            .expect("commands")
            .push(cmd.to_string());
        Ok(ShellRunResult {
            status: Some(0),
            stdout: "ok".to_string(),
            stderr: String::new(),
            timed_out: false,
        })
    }
}

/// Confirmation handler with a fixed decision and a prompt counter.
pub struct CountingConfirm {
    decision: ConfirmDecision,
    prompts: usize,
}

impl CountingConfirm {
    pub fn approving() -> Self {
        Self {
            decision: ConfirmDecision::Approve,
            prompts: 0,
        }
    }

    pub fn denying() -> Self {
        Self {
            decision: ConfirmDecision::Deny,
            prompts: 0,
        }
    }

    pub fn prompts(&self) -> usize {
        self.prompts
    }
}

impl ConfirmationHandler for CountingConfirm {
    fn confirm(&mut self, _capability: Capability, _summary: &str) -> ConfirmDecision {
        self.prompts += 1;
        self.decision
    }
}

/// A loop controller over default config, an ungranted gate and a recording
/// shell runner, rooted at `workspace`.
pub fn controller_with(
    workspace: &Path,
    model: impl ModelClient + 'static,
) -> (LoopController, RecordingRunner) {
    let cfg = AppConfig::default();
    let gate = Arc::new(Mutex::new(PermissionGate::new()));
    let runner = RecordingRunner::default();
    let executor = ToolExecutor::with_runner(
        workspace,
        cfg.security.clone(),
        cfg.tools.clone(),
        gate,
        Arc::new(runner.clone()),
    )
    .expect("executor");
    let observer = Observer::new(workspace).expect("observer");
    let controller = LoopController::new(Box::new(model), executor, &cfg, observer);
    (controller, runner)
}

/// End-to-end smoke: one scripted tool cycle against a temp workspace.
pub fn run_loop_smoke() -> Result<String> {
    let workspace = tempfile::tempdir()?;
    let model = ScriptedModel::new(["@bash echo hi", "All done."]);
    let (controller, _runner) = controller_with(workspace.path(), model);
    let mut confirm = CountingConfirm::approving();
    let mut transcript = Transcript::with_system("sys");
    let outcome = controller.run_turn(&mut transcript, "smoke", &mut confirm)?;
    Ok(outcome.response)
}
