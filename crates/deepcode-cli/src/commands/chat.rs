use crate::confirm::StdinConfirm;
use anyhow::Result;
use deepcode_agent::{ConfirmDecision, ConfirmationHandler, LoopController, TurnOutcome};
use deepcode_core::{Capability, StopReason, Transcript};
use deepcode_extract::ExtractionReport;
use deepcode_policy::PermissionGate;
use std::io::{self, BufRead, Write};
use std::sync::{Arc, Mutex};

const HELP: &str = "Commands:\n\
  /help         show this help\n\
  /permissions  show capability grants for this session\n\
  /explain      why lines of the last response were or weren't executed\n\
  /exit         quit\n\
\n\
Tool request syntax (the model uses these; you can too):\n\
  @read <path> [start [end]]   read a file\n\
  @write <path> <content>      write a file\n\
  @edit <path> \"<old>\" \"<new>\" [all]\n\
  @glob <pattern> [dir]        find files\n\
  @grep <pattern> [dir]        search file contents\n\
  @bash <command>              execute a shell command\n\
  @web <query>                 search the web\n\
  @curl <url>                  fetch a URL";

/// Auto-approving handler for non-interactive mode; the gate is pre-granted
/// there, so this is never actually consulted.
struct AutoApprove;

impl ConfirmationHandler for AutoApprove {
    fn confirm(&mut self, _capability: Capability, _summary: &str) -> ConfirmDecision {
        ConfirmDecision::Approve
    }
}

pub fn run_print_mode(
    controller: &LoopController,
    mut transcript: Transcript,
    prompt: &str,
) -> Result<()> {
    let outcome = controller.run_turn(&mut transcript, prompt, &mut AutoApprove)?;
    println!("{}", outcome.response);
    if let Some(notice) = stop_notice(&outcome) {
        eprintln!("{notice}");
    }
    Ok(())
}

pub fn run_chat(
    controller: &LoopController,
    mut transcript: Transcript,
    gate: Arc<Mutex<PermissionGate>>,
    initial_prompt: Option<&str>,
) -> Result<()> {
    println!("deepcode interactive mode — /help for commands, /exit to quit");

    let mut last_outcome: Option<TurnOutcome> = None;

    if let Some(prompt) = initial_prompt {
        run_one_turn(controller, &mut transcript, prompt, &mut last_outcome);
    }

    let stdin = io::stdin();
    loop {
        print!("› ");
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break; // EOF
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        match input {
            "/exit" | "exit" | "quit" => break,
            "/help" => println!("{HELP}"),
            "/permissions" => print_permissions(&gate),
            "/explain" => match &last_outcome {
                Some(outcome) => println!("{}", format_explain(&outcome.last_report)),
                None => println!("nothing to explain yet — run a prompt first"),
            },
            _ => run_one_turn(controller, &mut transcript, input, &mut last_outcome),
        }
    }
    Ok(())
}

fn run_one_turn(
    controller: &LoopController,
    transcript: &mut Transcript,
    input: &str,
    last_outcome: &mut Option<TurnOutcome>,
) {
    match controller.run_turn(transcript, input, &mut StdinConfirm) {
        Ok(outcome) => {
            for (invocation, result) in &outcome.executed {
                let status = if result.success { "✓" } else { "✗" };
                println!("{status} {} {}", invocation.tool, invocation.argument);
                let body = if result.success {
                    result.output.as_str()
                } else {
                    result.error.as_deref().unwrap_or("unknown error")
                };
                println!("{}", preview(body, 20));
            }
            if !outcome.response.is_empty() {
                println!("\n{}", outcome.response);
            }
            if let Some(notice) = stop_notice(&outcome) {
                println!("{notice}");
            }
            *last_outcome = Some(outcome);
        }
        // Transport failures are fatal to the cycle but not to the session.
        Err(err) => eprint!("{}", deepcode_errors::classify(&err).render()),
    }
}

fn print_permissions(gate: &Arc<Mutex<PermissionGate>>) {
    let Ok(gate) = gate.lock() else {
        println!("permission state unavailable");
        return;
    };
    println!("Session permissions:");
    for (capability, state) in gate.status() {
        let label = match (state.granted, state.auto_approve) {
            (_, true) => "auto-approve",
            (true, false) => "granted",
            (false, false) => "not granted",
        };
        println!("  {:<11} {label}", capability.as_str());
    }
}

/// Distinguishes the iteration-limit stop from normal completion, per the
/// loop contract.
fn stop_notice(outcome: &TurnOutcome) -> Option<String> {
    match outcome.stop_reason {
        StopReason::Done => None,
        StopReason::IterationLimit => Some(format!(
            "⚠ stopped after {} iterations (iteration limit reached — not normal completion)",
            outcome.iterations
        )),
        StopReason::Interrupted => {
            Some("⚠ interrupted — the in-flight cycle was discarded".to_string())
        }
    }
}

fn format_explain(report: &ExtractionReport) -> String {
    if report.records().is_empty() {
        return "no tool-like lines in the last response".to_string();
    }
    report
        .records()
        .iter()
        .map(|record| {
            format!(
                "line {}: @{} {} — {}",
                record.line_index + 1,
                record.tool,
                record.argument,
                record.origin.describe()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn preview(text: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    if lines.len() <= max_lines {
        return text.trim_end().to_string();
    }
    let mut shown = lines[..max_lines].join("\n");
    shown.push_str(&format!("\n… ({} more lines)", lines.len() - max_lines));
    shown
}

#[cfg(test)]
mod tests {
    use super::*;
    use deepcode_extract::InvocationExtractor;

    fn outcome(reason: StopReason, iterations: u64) -> TurnOutcome {
        TurnOutcome {
            response: String::new(),
            stop_reason: reason,
            iterations,
            executed: Vec::new(),
            last_report: ExtractionReport::default(),
        }
    }

    #[test]
    fn iteration_limit_notice_is_distinct_from_done() {
        assert!(stop_notice(&outcome(StopReason::Done, 1)).is_none());
        let notice = stop_notice(&outcome(StopReason::IterationLimit, 3)).expect("notice");
        assert!(notice.contains("3 iterations"));
        assert!(notice.contains("iteration limit"));
        assert!(stop_notice(&outcome(StopReason::Interrupted, 1)).is_some());
    }

    #[test]
    fn explain_covers_standalone_and_suppressed_lines() {
        let extractor = InvocationExtractor::new(&deepcode_core::ExtractorConfig::default());
        let report = extractor.extract("@bash pwd\nYou might try @bash ls next.");
        let explained = format_explain(&report);
        assert!(explained.contains("line 1: @bash pwd — standalone request"));
        assert!(explained.contains("line 2"));
        assert!(explained.contains("not at line start"));
    }

    #[test]
    fn explain_handles_empty_reports() {
        assert!(format_explain(&ExtractionReport::default()).contains("no tool-like lines"));
    }

    #[test]
    fn preview_caps_long_output() {
        let text = (0..30).map(|i| i.to_string()).collect::<Vec<_>>().join("\n");
        let shown = preview(&text, 20);
        assert!(shown.contains("… (10 more lines)"));
        assert_eq!(preview("short", 20), "short");
    }
}
