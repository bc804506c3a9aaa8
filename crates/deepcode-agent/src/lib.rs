//! The conversation loop controller.
//!
//! One turn runs bounded cycles of: send transcript to the model, extract
//! standalone invocations from the response, gate and execute them in order,
//! append response and results, repeat. A cycle either lands in the
//! transcript completely or is rolled back; an interrupt mid-cycle never
//! leaves partial state behind.

pub mod prompts;

use anyhow::Result;
use deepcode_context::ContextManager;
use deepcode_core::{
    AppConfig, Capability, ChatMessage, StopReason, ToolInvocation, ToolResult, Transcript,
};
use deepcode_extract::{ExtractionReport, InvocationExtractor};
use deepcode_llm::ModelClient;
use deepcode_observe::Observer;
use deepcode_policy::GateCheck;
use deepcode_tools::ToolExecutor;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// What the user decided when asked to approve a capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmDecision {
    /// Grant for the rest of the session.
    Approve,
    /// Grant and mark auto-approved.
    ApproveAuto,
    Deny,
}

/// Surface that asks the user to approve an ungranted capability.
/// The state machine pauses on this call until a decision comes back.
pub trait ConfirmationHandler {
    fn confirm(&mut self, capability: Capability, summary: &str) -> ConfirmDecision;
}

/// Shared interrupt flag, observable at both suspension points (the model
/// wait and the confirmation wait).
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Outcome of one user turn.
#[derive(Debug)]
pub struct TurnOutcome {
    /// The model's final response text.
    pub response: String,
    pub stop_reason: StopReason,
    /// Cycles actually run this turn.
    pub iterations: u64,
    /// Every executed invocation with its result, across all cycles.
    pub executed: Vec<(ToolInvocation, ToolResult)>,
    /// Classification of the last model response, for `/explain`.
    pub last_report: ExtractionReport,
}

pub struct LoopController {
    llm: Box<dyn ModelClient>,
    executor: ToolExecutor,
    extractor: InvocationExtractor,
    context: ContextManager,
    observer: Observer,
    max_iterations: u64,
    cancel: CancelFlag,
}

impl LoopController {
    pub fn new(
        llm: Box<dyn ModelClient>,
        executor: ToolExecutor,
        cfg: &AppConfig,
        observer: Observer,
    ) -> Self {
        Self {
            llm,
            executor,
            extractor: InvocationExtractor::new(&cfg.extractor),
            context: ContextManager::new(
                cfg.agent_loop.context_window_tokens,
                cfg.agent_loop.reserve_tokens,
            ),
            observer,
            max_iterations: cfg.agent_loop.max_iterations.max(1),
            cancel: CancelFlag::new(),
        }
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Run one user turn to completion. Recoverable tool failures stay inside
    /// the loop as failed results; only a transport failure aborts the turn.
    pub fn run_turn(
        &self,
        transcript: &mut Transcript,
        user_input: &str,
        confirm: &mut dyn ConfirmationHandler,
    ) -> Result<TurnOutcome> {
        transcript.push(ChatMessage::User {
            content: user_input.to_string(),
        });

        let mut executed = Vec::new();
        let mut last_response = String::new();
        let mut last_report = ExtractionReport::default();
        // Capabilities the user already denied this turn; no point re-asking
        // for every repeated invocation.
        let mut denied: BTreeSet<Capability> = BTreeSet::new();

        for iteration in 1..=self.max_iterations {
            self.observer.record_cycle_started(iteration);

            // Context management runs between cycles, never inside the
            // extraction/execution path.
            if self.context.fit(transcript) {
                self.observer
                    .verbose_log("transcript truncated to fit context budget");
            }

            let snapshot = transcript.snapshot();

            if self.cancel.is_cancelled() {
                return Ok(self.stop(
                    StopReason::Interrupted,
                    iteration - 1,
                    last_response,
                    last_report,
                    executed,
                ));
            }

            // AWAIT_MODEL. A transport failure is fatal to the cycle and
            // surfaces to the caller; nothing has been appended yet.
            let response = self.llm.complete(transcript).map_err(anyhow::Error::new)?;

            if self.cancel.is_cancelled() {
                transcript.rollback(snapshot);
                return Ok(self.stop(
                    StopReason::Interrupted,
                    iteration - 1,
                    last_response,
                    last_report,
                    executed,
                ));
            }

            // EXTRACT
            let report = self.extractor.extract(&response);
            for suppressed in report.suppressed() {
                self.observer.record_suppressed(suppressed);
            }
            let standalone = report.standalone();
            last_response = response.clone();
            last_report = report;

            if standalone.is_empty() {
                transcript.push(ChatMessage::Assistant { content: response });
                return Ok(self.stop(
                    StopReason::Done,
                    iteration,
                    last_response,
                    last_report,
                    executed,
                ));
            }

            // GATE_AND_EXECUTE, strictly sequential: a later invocation may
            // depend on an earlier one's side effect having landed.
            let mut cycle_results = Vec::new();
            let mut interrupted = false;
            for invocation in &standalone {
                if self.cancel.is_cancelled() {
                    interrupted = true;
                    break;
                }
                self.ensure_permission(invocation, confirm, &mut denied);
                if self.cancel.is_cancelled() {
                    interrupted = true;
                    break;
                }
                let result = self.executor.execute(invocation);
                self.observer.record_invocation(invocation, &result);
                cycle_results.push((invocation.clone(), result));
            }

            if interrupted {
                // Discard the cycle wholesale; no partial transcript state.
                transcript.rollback(snapshot);
                return Ok(self.stop(
                    StopReason::Interrupted,
                    iteration,
                    last_response,
                    last_report,
                    executed,
                ));
            }

            // APPEND_RESULTS: response and results land together.
            transcript.push(ChatMessage::Assistant { content: response });
            transcript.push(ChatMessage::ToolOutput {
                content: format_tool_results(&cycle_results),
            });
            executed.extend(cycle_results);
        }

        Ok(self.stop(
            StopReason::IterationLimit,
            self.max_iterations,
            last_response,
            last_report,
            executed,
        ))
    }

    fn ensure_permission(
        &self,
        invocation: &ToolInvocation,
        confirm: &mut dyn ConfirmationHandler,
        denied: &mut BTreeSet<Capability>,
    ) {
        let Some(capability) = invocation.tool.capability() else {
            return;
        };
        if denied.contains(&capability) {
            return;
        }
        let gate = self.executor.gate();
        let needs_confirmation = gate
            .lock()
            .map(|gate| gate.check(capability) == GateCheck::NeedsConfirmation)
            .unwrap_or(true);
        if !needs_confirmation {
            return;
        }

        let summary = invocation_summary(invocation);
        match confirm.confirm(capability, &summary) {
            ConfirmDecision::Approve => {
                if let Ok(mut gate) = gate.lock() {
                    gate.record_grant(capability, false);
                }
            }
            ConfirmDecision::ApproveAuto => {
                if let Ok(mut gate) = gate.lock() {
                    gate.record_grant(capability, true);
                }
            }
            // Leave the gate ungranted: the executor refuses with a failed
            // result naming the gate, and the loop carries on.
            ConfirmDecision::Deny => {
                denied.insert(capability);
            }
        }
    }

    fn stop(
        &self,
        reason: StopReason,
        iterations: u64,
        response: String,
        last_report: ExtractionReport,
        executed: Vec<(ToolInvocation, ToolResult)>,
    ) -> TurnOutcome {
        self.observer.record_stop(reason, iterations);
        TurnOutcome {
            response,
            stop_reason: reason,
            iterations,
            executed,
            last_report,
        }
    }
}

fn invocation_summary(invocation: &ToolInvocation) -> String {
    let mut summary = format!("{} {}", invocation.tool, invocation.argument);
    const MAX: usize = 120;
    if summary.len() > MAX {
        summary.truncate(summary.floor_char_boundary(MAX));
        summary.push('…');
    }
    summary
}

/// Format a cycle's results as the tool-result transcript message.
fn format_tool_results(results: &[(ToolInvocation, ToolResult)]) -> String {
    let mut parts = vec!["[Tool Execution Results]".to_string()];
    for (invocation, result) in results {
        let status = if result.success { "✓" } else { "✗" };
        parts.push(format!("\n{status} {}:", invocation.tool));
        if result.success {
            parts.push(result.output.clone());
        } else {
            parts.push(format!(
                "Error: {}",
                result.error.as_deref().unwrap_or("unknown error")
            ));
        }
        if let Some(warning) = result.metadata.get("warning").and_then(|w| w.as_str()) {
            parts.push(format!("Warning: {warning}"));
        }
    }
    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use deepcode_core::{InvocationOrigin, ToolKind};
    use deepcode_testkit::{
        ConfirmDecision, ConfirmationHandler, CountingConfirm, FailingModel, ScriptedModel,
        controller_with,
    };

    struct DenyAll;
    impl ConfirmationHandler for DenyAll {
        fn confirm(&mut self, _capability: Capability, _summary: &str) -> ConfirmDecision {
            ConfirmDecision::Deny
        }
    }

    struct ApproveAll;
    impl ConfirmationHandler for ApproveAll {
        fn confirm(&mut self, _capability: Capability, _summary: &str) -> ConfirmDecision {
            ConfirmDecision::Approve
        }
    }

    #[test]
    fn plain_response_stops_with_done() {
        let workspace = tempfile::tempdir().expect("workspace");
        let model = ScriptedModel::new(["All good, nothing to run."]);
        let (controller, _runner) = controller_with(workspace.path(), model.clone());

        let mut transcript = Transcript::with_system("sys");
        let outcome = controller
            .run_turn(&mut transcript, "status?", &mut ApproveAll)
            .expect("turn");

        assert_eq!(outcome.stop_reason, StopReason::Done);
        assert_eq!(outcome.iterations, 1);
        assert!(outcome.executed.is_empty());
        assert_eq!(model.calls(), 1);
        // system + user + assistant
        assert_eq!(transcript.len(), 3);
    }

    #[test]
    fn tool_cycle_appends_response_and_results_together() {
        let workspace = tempfile::tempdir().expect("workspace");
        let model = ScriptedModel::new(["@bash git status", "Working tree clean."]);
        let (controller, runner) = controller_with(workspace.path(), model.clone());

        let mut transcript = Transcript::with_system("sys");
        let outcome = controller
            .run_turn(&mut transcript, "check git", &mut ApproveAll)
            .expect("turn");

        assert_eq!(outcome.stop_reason, StopReason::Done);
        assert_eq!(outcome.iterations, 2);
        assert_eq!(outcome.executed.len(), 1);
        assert!(outcome.executed[0].1.success);
        assert_eq!(runner.captured(), vec!["git status".to_string()]);

        let messages = transcript.messages();
        // system, user, assistant, tool-result, assistant
        assert_eq!(messages.len(), 5);
        assert_eq!(messages[3].role(), "tool-result");
        assert!(messages[3].content().contains("[Tool Execution Results]"));
        assert!(messages[3].content().contains("✓ bash:"));
    }

    #[test]
    fn iteration_cap_stops_a_tool_hungry_model() {
        let workspace = tempfile::tempdir().expect("workspace");
        // The scripted model repeats its last response forever.
        let model = ScriptedModel::new(["@bash ls"]);
        let (controller, _runner) = controller_with(workspace.path(), model.clone());

        let mut transcript = Transcript::with_system("sys");
        let outcome = controller
            .run_turn(&mut transcript, "loop", &mut ApproveAll)
            .expect("turn");

        assert_eq!(outcome.stop_reason, StopReason::IterationLimit);
        assert_eq!(outcome.iterations, 3);
        assert_eq!(model.calls(), 3);
        assert_eq!(outcome.executed.len(), 3);
    }

    #[test]
    fn denied_capability_fails_the_invocation_but_continues() {
        let workspace = tempfile::tempdir().expect("workspace");
        let model = ScriptedModel::new(["@bash rm build", "Understood, skipping."]);
        let (controller, runner) = controller_with(workspace.path(), model.clone());

        let mut transcript = Transcript::with_system("sys");
        let outcome = controller
            .run_turn(&mut transcript, "clean up", &mut DenyAll)
            .expect("turn");

        assert_eq!(outcome.stop_reason, StopReason::Done);
        assert_eq!(outcome.executed.len(), 1);
        let (_, result) = &outcome.executed[0];
        assert!(!result.success);
        assert_eq!(result.metadata["refused_by"], "permission_gate");
        // The underlying tool was never reached.
        assert!(runner.captured().is_empty());
        // The failure is visible to the model on the next cycle.
        assert!(
            transcript
                .messages()
                .iter()
                .any(|m| m.role() == "tool-result" && m.content().contains("permission gate"))
        );
    }

    #[test]
    fn denial_is_not_reprompted_within_a_turn() {
        let workspace = tempfile::tempdir().expect("workspace");
        let model = ScriptedModel::new(["@bash ls\n@bash pwd", "Done."]);
        let (controller, _runner) = controller_with(workspace.path(), model.clone());

        let mut confirm = CountingConfirm::denying();
        let mut transcript = Transcript::with_system("sys");
        controller
            .run_turn(&mut transcript, "try", &mut confirm)
            .expect("turn");
        assert_eq!(confirm.prompts(), 1);
    }

    #[test]
    fn approval_is_asked_once_and_grant_persists() {
        let workspace = tempfile::tempdir().expect("workspace");
        let model = ScriptedModel::new(["@bash ls\n@bash pwd", "Done."]);
        let (controller, runner) = controller_with(workspace.path(), model.clone());

        let mut confirm = CountingConfirm::approving();
        let mut transcript = Transcript::with_system("sys");
        let outcome = controller
            .run_turn(&mut transcript, "list", &mut confirm)
            .expect("turn");

        assert_eq!(confirm.prompts(), 1);
        assert_eq!(outcome.executed.len(), 2);
        assert!(outcome.executed.iter().all(|(_, r)| r.success));
        assert_eq!(runner.captured(), vec!["ls".to_string(), "pwd".to_string()]);
    }

    #[test]
    fn cancellation_rolls_the_cycle_back() {
        let workspace = tempfile::tempdir().expect("workspace");
        let model = ScriptedModel::new(["@bash ls"]);
        let (controller, runner) = controller_with(workspace.path(), model.clone());
        controller.cancel_flag().cancel();

        let mut transcript = Transcript::with_system("sys");
        let outcome = controller
            .run_turn(&mut transcript, "list", &mut ApproveAll)
            .expect("turn");

        assert_eq!(outcome.stop_reason, StopReason::Interrupted);
        // The user message stays; nothing from the abandoned cycle landed.
        assert_eq!(transcript.len(), 2);
        assert!(runner.captured().is_empty());
    }

    #[test]
    fn transport_failure_surfaces_and_leaves_no_partial_cycle() {
        let workspace = tempfile::tempdir().expect("workspace");
        let (controller, _runner) = controller_with(workspace.path(), FailingModel);

        let mut transcript = Transcript::with_system("sys");
        let err = controller
            .run_turn(&mut transcript, "hello", &mut ApproveAll)
            .expect_err("transport failure");
        assert!(err.to_string().contains("network error"));
        // system + user only; the failed cycle appended nothing.
        assert_eq!(transcript.len(), 2);
    }

    #[test]
    fn suppressed_lines_never_execute_but_stay_explainable() {
        let workspace = tempfile::tempdir().expect("workspace");
        let model = ScriptedModel::new([
            "You might try @bash ls here.\n```\n@bash pwd\n```\nNothing to run.",
        ]);
        let (controller, runner) = controller_with(workspace.path(), model.clone());

        let mut transcript = Transcript::with_system("sys");
        let outcome = controller
            .run_turn(&mut transcript, "hints", &mut ApproveAll)
            .expect("turn");

        assert_eq!(outcome.stop_reason, StopReason::Done);
        assert!(runner.captured().is_empty());
        let records = outcome.last_report.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].origin, InvocationOrigin::SuppressedMidLine);
        assert_eq!(records[1].origin, InvocationOrigin::SuppressedCodeBlock);
        assert!(records.iter().all(|r| r.tool == ToolKind::Bash));
    }

    #[test]
    fn formatted_results_mark_success_and_failure() {
        let inv = ToolInvocation {
            tool: ToolKind::Bash,
            argument: "ls".to_string(),
            line_index: 0,
            origin: InvocationOrigin::Standalone,
        };
        let text = format_tool_results(&[
            (inv.clone(), ToolResult::ok("files")),
            (inv, ToolResult::fail("boom")),
        ]);
        assert!(text.starts_with("[Tool Execution Results]"));
        assert!(text.contains("✓ bash:"));
        assert!(text.contains("✗ bash:"));
        assert!(text.contains("Error: boom"));
    }
}
