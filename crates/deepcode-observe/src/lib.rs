use anyhow::Result;
use chrono::Utc;
use deepcode_core::{StopReason, ToolInvocation, ToolResult, runtime_dir};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Append-only run log under the workspace runtime dir, plus verbose/warn
/// helpers for stderr. Logging only, not a metrics surface.
pub struct Observer {
    log_path: PathBuf,
    verbose: bool,
}

impl Observer {
    pub fn new(workspace: &Path) -> Result<Self> {
        let dir = runtime_dir(workspace);
        fs::create_dir_all(&dir)?;
        Ok(Self {
            log_path: dir.join("observe.log"),
            verbose: false,
        })
    }

    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    pub fn verbose_log(&self, msg: &str) {
        if self.verbose {
            eprintln!("[deepcode] {msg}");
        }
    }

    /// Always written to the log file and to stderr.
    pub fn warn_log(&self, msg: &str) {
        eprintln!("[deepcode WARN] {msg}");
        let _ = self.append_log_line(&format!("{} WARN {msg}", Utc::now().to_rfc3339()));
    }

    pub fn record_cycle_started(&self, iteration: u64) {
        let _ = self.append_log_line(&format!(
            "{} CYCLE iteration={iteration}",
            Utc::now().to_rfc3339()
        ));
    }

    pub fn record_invocation(&self, invocation: &ToolInvocation, result: &ToolResult) {
        let status = if result.success { "ok" } else { "error" };
        let detail = result.error.as_deref().unwrap_or("");
        let _ = self.append_log_line(&format!(
            "{} TOOL name={} line={} status={status} {detail}",
            Utc::now().to_rfc3339(),
            invocation.tool,
            invocation.line_index,
        ));
    }

    pub fn record_suppressed(&self, invocation: &ToolInvocation) {
        let _ = self.append_log_line(&format!(
            "{} SUPPRESSED name={} line={} origin={}",
            Utc::now().to_rfc3339(),
            invocation.tool,
            invocation.line_index,
            invocation.origin.describe(),
        ));
    }

    pub fn record_stop(&self, reason: StopReason, iterations: u64) {
        let _ = self.append_log_line(&format!(
            "{} STOP reason={reason} iterations={iterations}",
            Utc::now().to_rfc3339()
        ));
    }

    fn append_log_line(&self, line: &str) -> Result<()> {
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;
        writeln!(f, "{line}")?;
        Ok(())
    }
}
