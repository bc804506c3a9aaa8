mod shell;
mod web;

use anyhow::{Result, anyhow};
use deepcode_core::{SecurityConfig, ToolInvocation, ToolKind, ToolResult, ToolsConfig};
use deepcode_policy::{PathOperation, PermissionGate, SecurityValidator};
use ignore::WalkBuilder;
use regex::Regex;
pub use shell::{PlatformShellRunner, ShellRunResult, ShellRunner};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;
pub use web::{FetchedPage, SearchResult, WebClient};

/// Dispatches invocations to their implementations behind one enforcement
/// point: security validation and the permission gate are both checked here,
/// so no tool can be reached through a side door. Every failure path
/// (refusal, tool error, timeout) resolves to a `ToolResult`; nothing
/// panics or propagates past this boundary.
pub struct ToolExecutor {
    workspace: PathBuf,
    validator: SecurityValidator,
    gate: Arc<Mutex<PermissionGate>>,
    runner: Arc<dyn ShellRunner + Send + Sync>,
    web: WebClient,
    cfg: ToolsConfig,
    ansi_escapes: Regex,
}

impl ToolExecutor {
    pub fn new(
        workspace: &Path,
        security: SecurityConfig,
        tools: ToolsConfig,
        gate: Arc<Mutex<PermissionGate>>,
    ) -> Result<Self> {
        Self::with_runner(workspace, security, tools, gate, Arc::new(PlatformShellRunner))
    }

    pub fn with_runner(
        workspace: &Path,
        security: SecurityConfig,
        tools: ToolsConfig,
        gate: Arc<Mutex<PermissionGate>>,
        runner: Arc<dyn ShellRunner + Send + Sync>,
    ) -> Result<Self> {
        Ok(Self {
            workspace: workspace.to_path_buf(),
            validator: SecurityValidator::new(security)?,
            web: WebClient::new(tools.http_timeout_seconds)?,
            gate,
            runner,
            cfg: tools,
            ansi_escapes: Regex::new(r"\x1b\[[0-9;]*[A-Za-z]").expect("valid regex"),
        })
    }

    pub fn gate(&self) -> Arc<Mutex<PermissionGate>> {
        Arc::clone(&self.gate)
    }

    pub fn execute(&self, invocation: &ToolInvocation) -> ToolResult {
        if !invocation.origin.is_standalone() {
            return ToolResult::fail(format!(
                "refusing suppressed invocation ({})",
                invocation.origin.describe()
            ))
            .with_meta("refused_by", "extractor");
        }

        if let Some(capability) = invocation.tool.capability() {
            let granted = self
                .gate
                .lock()
                .map(|gate| gate.may_execute(capability))
                .unwrap_or(false);
            if !granted {
                return ToolResult::fail(format!(
                    "permission gate refused capability '{capability}'"
                ))
                .with_meta("refused_by", "permission_gate");
            }
        }

        let mut result = match self.run_tool(invocation) {
            Ok(result) => result,
            Err(err) => ToolResult::fail(format!("error executing {}: {err}", invocation.tool)),
        };
        result.output = self.sanitize_output(&result.output);
        result.with_meta("invocation_id", Uuid::now_v7().to_string())
    }

    fn run_tool(&self, invocation: &ToolInvocation) -> Result<ToolResult> {
        let arg = invocation.argument.as_str();
        match invocation.tool {
            ToolKind::Read => self.read_file(arg),
            ToolKind::Write => self.write_file(arg),
            ToolKind::Edit => self.edit_file(arg),
            ToolKind::Glob => self.glob_files(arg),
            ToolKind::Grep => self.grep_files(arg),
            ToolKind::Bash => self.run_bash(arg),
            ToolKind::WebSearch => self.web_search(arg),
            ToolKind::WebFetch => self.web_fetch(arg),
        }
    }

    fn read_file(&self, arg: &str) -> Result<ToolResult> {
        let fields = split_fields(arg)?;
        let Some(path) = fields.first() else {
            return Ok(ToolResult::fail("read requires a file path"));
        };
        let start_line = fields.get(1).map(|f| f.parse::<usize>()).transpose()?;
        let end_line = fields.get(2).map(|f| f.parse::<usize>()).transpose()?;

        let full = self.resolve(path);
        let decision = self
            .validator
            .validate_path(&full.to_string_lossy(), PathOperation::Read);
        if !decision.allowed {
            return Ok(blocked_by_validator(decision.reason));
        }
        if !full.is_file() {
            return Ok(ToolResult::fail(format!("not a file: {}", full.display())));
        }

        let content = fs::read_to_string(&full)
            .map_err(|err| anyhow!("error reading file: {err}"))?;
        let lines: Vec<&str> = content.lines().collect();
        let total_lines = lines.len();

        let start_idx = start_line.unwrap_or(1).saturating_sub(1).min(total_lines);
        let end_idx = end_line
            .unwrap_or(start_idx + self.cfg.max_read_lines)
            .min(total_lines)
            .max(start_idx);
        let shown = &lines[start_idx..end_idx];

        let output = shown
            .iter()
            .enumerate()
            .map(|(i, line)| format!("{:6}\t{}", start_idx + i + 1, line))
            .collect::<Vec<_>>()
            .join("\n");

        Ok(ToolResult::ok(output)
            .with_meta("total_lines", total_lines)
            .with_meta("lines_shown", shown.len())
            .with_meta("start_line", start_idx + 1)
            .with_meta("end_line", end_idx))
    }

    fn write_file(&self, arg: &str) -> Result<ToolResult> {
        let Some((path, content)) = split_first_token(arg) else {
            return Ok(ToolResult::fail("write requires a file path and content"));
        };

        let full = self.resolve(&path);
        let decision = self
            .validator
            .validate_path(&full.to_string_lossy(), PathOperation::Write);
        if !decision.allowed {
            return Ok(blocked_by_validator(decision.reason));
        }

        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&full, &content)?;

        Ok(
            ToolResult::ok(format!(
                "successfully wrote {} bytes to {}",
                content.len(),
                full.display()
            ))
            .with_meta("file_path", full.to_string_lossy().to_string())
            .with_meta("bytes_written", content.len()),
        )
    }

    /// Argument form: `<path> "<old>" "<new>" [all]`. The match must be
    /// unique unless `all` is given.
    fn edit_file(&self, arg: &str) -> Result<ToolResult> {
        let fields = split_fields(arg)?;
        if fields.len() < 3 || fields.len() > 4 {
            return Ok(ToolResult::fail(
                "edit requires: <path> \"<old>\" \"<new>\" [all]",
            ));
        }
        let replace_all = match fields.get(3).map(String::as_str) {
            None => false,
            Some("all") => true,
            Some(other) => {
                return Ok(ToolResult::fail(format!(
                    "unknown edit flag '{other}' (expected 'all')"
                )));
            }
        };
        let (path, old, new) = (&fields[0], &fields[1], &fields[2]);

        let full = self.resolve(path);
        let decision = self
            .validator
            .validate_path(&full.to_string_lossy(), PathOperation::Write);
        if !decision.allowed {
            return Ok(blocked_by_validator(decision.reason));
        }
        if !full.exists() {
            return Ok(ToolResult::fail(format!("file not found: {}", full.display())));
        }

        let content = fs::read_to_string(&full)?;
        let count = content.matches(old.as_str()).count();
        if count == 0 {
            return Ok(ToolResult::fail(
                "string not found in file; match exact indentation and whitespace",
            ));
        }
        if !replace_all && count > 1 {
            return Ok(ToolResult::fail(format!(
                "found {count} occurrences; string must be unique or pass 'all'"
            )));
        }

        let (updated, replacements) = if replace_all {
            (content.replace(old.as_str(), new), count)
        } else {
            (content.replacen(old.as_str(), new, 1), 1)
        };
        fs::write(&full, updated)?;

        Ok(
            ToolResult::ok(format!(
                "successfully replaced {replacements} occurrence(s) in {}",
                full.display()
            ))
            .with_meta("file_path", full.to_string_lossy().to_string())
            .with_meta("replacements", replacements),
        )
    }

    fn glob_files(&self, arg: &str) -> Result<ToolResult> {
        let fields = split_fields(arg)?;
        let Some(pattern) = fields.first() else {
            return Ok(ToolResult::fail("glob requires a pattern"));
        };
        let base = fields.get(1).map(String::as_str).unwrap_or(".");
        let base_path = self.resolve(base);

        let compiled = glob::Pattern::new(pattern)
            .map_err(|err| anyhow!("invalid glob pattern '{pattern}': {err}"))?;

        let mut matches = Vec::new();
        let mut truncated = false;
        for path in walk_paths(&base_path, &self.workspace) {
            if !path.is_file() {
                continue;
            }
            let Ok(rel_path) = path.strip_prefix(&self.workspace) else {
                continue;
            };
            let rel = normalize_rel_path(rel_path);
            if compiled.matches(&rel) {
                matches.push(rel);
                if matches.len() >= self.cfg.max_glob_results {
                    truncated = true;
                    break;
                }
            }
        }

        let count = matches.len();
        let output = if matches.is_empty() {
            format!("no files found matching pattern: {pattern}")
        } else {
            matches.join("\n")
        };
        Ok(ToolResult::ok(output)
            .with_meta("count", count)
            .with_meta("truncated", truncated))
    }

    fn grep_files(&self, arg: &str) -> Result<ToolResult> {
        let fields = split_fields(arg)?;
        let Some(pattern) = fields.first() else {
            return Ok(ToolResult::fail("grep requires a pattern"));
        };
        let base = fields.get(1).map(String::as_str).unwrap_or(".");
        let base_path = self.resolve(base);

        let regex = match Regex::new(pattern) {
            Ok(regex) => regex,
            Err(err) => {
                return Ok(ToolResult::fail(format!("invalid regex pattern: {err}")));
            }
        };

        let mut matches = Vec::new();
        'files: for path in walk_paths(&base_path, &self.workspace) {
            if !path.is_file() {
                continue;
            }
            let Ok(bytes) = fs::read(&path) else {
                continue;
            };
            if is_binary(&bytes) {
                continue;
            }
            let Ok(content) = String::from_utf8(bytes) else {
                continue;
            };
            let rel = path
                .strip_prefix(&self.workspace)
                .map(normalize_rel_path)
                .unwrap_or_else(|_| path.to_string_lossy().to_string());
            for (idx, line) in content.lines().enumerate() {
                if regex.is_match(line) {
                    matches.push(format!("{rel}:{}: {line}", idx + 1));
                    if matches.len() >= self.cfg.max_grep_results {
                        break 'files;
                    }
                }
            }
        }

        let count = matches.len();
        let output = if matches.is_empty() {
            format!("no matches found for pattern: {pattern}")
        } else {
            matches.join("\n")
        };
        Ok(ToolResult::ok(output)
            .with_meta("count", count)
            .with_meta("truncated", count >= self.cfg.max_grep_results))
    }

    fn run_bash(&self, cmd: &str) -> Result<ToolResult> {
        let decision = self.validator.validate_command(cmd);
        if !decision.allowed {
            return Ok(blocked_by_validator(decision.reason));
        }

        let timeout = Duration::from_secs(self.cfg.shell_timeout_seconds);
        let run = self.runner.run(cmd, &self.workspace, timeout)?;

        if run.timed_out {
            return Ok(ToolResult::fail(format!(
                "command timed out after {} seconds",
                self.cfg.shell_timeout_seconds
            ))
            .with_meta("timed_out", true));
        }

        let mut sections = Vec::new();
        if !run.stdout.is_empty() {
            sections.push(format!("STDOUT:\n{}", run.stdout));
        }
        if !run.stderr.is_empty() {
            sections.push(format!("STDERR:\n{}", run.stderr));
        }
        let output = if sections.is_empty() {
            "(no output)".to_string()
        } else {
            sections.join("\n")
        };

        let code = run.status.unwrap_or(-1);
        let mut result = if code == 0 {
            ToolResult::ok(output)
        } else {
            let mut failed =
                ToolResult::fail(format!("command failed with exit code {code}"));
            failed.output = output;
            failed
        };
        result = result.with_meta("return_code", code);
        Ok(result)
    }

    fn web_search(&self, query: &str) -> Result<ToolResult> {
        let decision = self
            .validator
            .validate_url("https://html.duckduckgo.com/html/");
        if !decision.allowed {
            return Ok(blocked_by_validator(decision.reason));
        }
        if query.trim().is_empty() {
            return Ok(ToolResult::fail("web search requires a query"));
        }

        let results = self
            .web
            .search(query.trim(), self.cfg.web_search_results)?;
        let output = web::format_search_results(query.trim(), &results);
        Ok(ToolResult::ok(output).with_meta("count", results.len()))
    }

    fn web_fetch(&self, url: &str) -> Result<ToolResult> {
        let url = url.trim();
        let decision = self.validator.validate_url(url);
        if !decision.allowed {
            return Ok(blocked_by_validator(decision.reason));
        }

        let page = self.web.fetch(url, self.cfg.fetch_max_bytes)?;
        let mut result = ToolResult::ok(page.body)
            .with_meta("status", page.status)
            .with_meta("content_type", page.content_type)
            .with_meta("total_bytes", page.total_bytes)
            .with_meta("truncated", page.truncated);
        if let Some(warning) = decision.warning {
            result = result.with_meta("warning", warning);
        }
        Ok(result)
    }

    /// Truncate, strip ANSI escapes and redact secrets before output reaches
    /// the transcript or the terminal.
    fn sanitize_output(&self, output: &str) -> String {
        let mut sanitized = if output.len() > self.cfg.max_output_bytes {
            let cut = output.floor_char_boundary(self.cfg.max_output_bytes);
            format!(
                "{}\n\n... (truncated, total {} bytes)",
                &output[..cut],
                output.len()
            )
        } else {
            output.to_string()
        };
        sanitized = self.ansi_escapes.replace_all(&sanitized, "").to_string();
        self.validator.redact(&sanitized)
    }

    fn resolve(&self, raw: &str) -> PathBuf {
        if let Some(rest) = raw.strip_prefix("~/") {
            if let Some(home) = std::env::var("HOME")
                .ok()
                .or_else(|| std::env::var("USERPROFILE").ok())
            {
                return PathBuf::from(home).join(rest);
            }
        }
        let path = PathBuf::from(raw);
        if path.is_absolute() {
            path
        } else {
            self.workspace.join(path)
        }
    }
}

fn blocked_by_validator(reason: Option<String>) -> ToolResult {
    ToolResult::fail(format!(
        "blocked by security validator: {}",
        reason.unwrap_or_else(|| "policy refused".to_string())
    ))
    .with_meta("refused_by", "security_validator")
}

fn split_fields(arg: &str) -> Result<Vec<String>> {
    shell_words::split(arg).map_err(|err| anyhow!("could not parse arguments: {err}"))
}

fn split_first_token(arg: &str) -> Option<(String, String)> {
    let trimmed = arg.trim_start();
    let token_end = trimmed
        .find(char::is_whitespace)
        .unwrap_or(trimmed.len());
    let token = &trimmed[..token_end];
    if token.is_empty() {
        return None;
    }
    let rest = trimmed[token_end..].trim_start();
    Some((token.to_string(), rest.to_string()))
}

fn should_skip_rel_path(path: &Path) -> bool {
    path.components().any(|c| {
        matches!(
            c.as_os_str().to_str(),
            Some(
                ".git"
                    | ".deepcode"
                    | "target"
                    | "node_modules"
                    | "__pycache__"
                    | "venv"
                    | ".venv"
                    | "dist"
                    | "build"
            )
        )
    })
}

fn walk_paths(root: &Path, workspace: &Path) -> Vec<PathBuf> {
    let mut builder = WalkBuilder::new(root);
    builder.hidden(false);
    builder.follow_links(false);
    builder.git_ignore(true);
    builder.git_global(true);
    builder.git_exclude(true);
    builder.require_git(false);

    let mut paths = Vec::new();
    for entry in builder.build() {
        let Ok(entry) = entry else {
            continue;
        };
        let path = entry.path();
        let Ok(rel) = path.strip_prefix(workspace) else {
            continue;
        };
        if should_skip_rel_path(rel) {
            continue;
        }
        paths.push(path.to_path_buf());
    }
    paths
}

fn normalize_rel_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn is_binary(bytes: &[u8]) -> bool {
    if bytes.is_empty() {
        return false;
    }
    if bytes.contains(&0) {
        return true;
    }
    let sample = bytes.iter().take(8192);
    let non_text = sample
        .filter(|b| !(b.is_ascii() || **b == b'\n' || **b == b'\r' || **b == b'\t'))
        .count();
    non_text > 64
}

#[cfg(test)]
mod tests {
    use super::*;
    use deepcode_core::InvocationOrigin;

    fn invocation(tool: ToolKind, argument: &str) -> ToolInvocation {
        ToolInvocation {
            tool,
            argument: argument.to_string(),
            line_index: 0,
            origin: InvocationOrigin::Standalone,
        }
    }

    fn temp_executor() -> (tempfile::TempDir, ToolExecutor) {
        temp_executor_with(SecurityConfig::default(), Arc::new(PlatformShellRunner))
    }

    fn temp_executor_with(
        security: SecurityConfig,
        runner: Arc<dyn ShellRunner + Send + Sync>,
    ) -> (tempfile::TempDir, ToolExecutor) {
        let workspace = tempfile::tempdir().expect("workspace");
        let gate = Arc::new(Mutex::new(PermissionGate::allow_all()));
        let executor = ToolExecutor::with_runner(
            workspace.path(),
            security,
            ToolsConfig::default(),
            gate,
            runner,
        )
        .expect("executor");
        (workspace, executor)
    }

    #[derive(Clone, Default)]
    struct RecordingRunner {
        commands: Arc<Mutex<Vec<String>>>,
        timed_out: bool,
    }

    impl RecordingRunner {
        fn captured(&self) -> Vec<String> {
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
                timed_out: self.timed_out,
            })
        }
    }

    #[test]
    fn read_supports_line_ranges_with_numbering() {
        let (workspace, executor) = temp_executor();
        fs::write(workspace.path().join("note.txt"), "a\nb\nc\nd\n").expect("seed");

        let result = executor.execute(&invocation(ToolKind::Read, "note.txt 2 3"));
        assert!(result.success);
        assert!(result.output.contains("     2\tb"));
        assert!(result.output.contains("     3\tc"));
        assert!(!result.output.contains("\ta"));
        assert_eq!(result.metadata["total_lines"], 4);
        assert_eq!(result.metadata["lines_shown"], 2);
    }

    #[test]
    fn write_creates_parent_directories() {
        let (workspace, executor) = temp_executor();
        let result = executor.execute(&invocation(ToolKind::Write, "sub/dir/out.txt hello world"));
        assert!(result.success, "{:?}", result.error);
        let content =
            fs::read_to_string(workspace.path().join("sub/dir/out.txt")).expect("written");
        assert_eq!(content, "hello world");
        assert_eq!(result.metadata["bytes_written"], 11);
    }

    #[test]
    fn edit_requires_a_unique_match() {
        let (workspace, executor) = temp_executor();
        fs::write(workspace.path().join("code.rs"), "foo();\nfoo();\n").expect("seed");

        let ambiguous = executor.execute(&invocation(ToolKind::Edit, r#"code.rs "foo" "bar""#));
        assert!(!ambiguous.success);
        assert!(ambiguous.error.unwrap().contains("2 occurrences"));

        let all = executor.execute(&invocation(ToolKind::Edit, r#"code.rs "foo" "bar" all"#));
        assert!(all.success);
        assert_eq!(all.metadata["replacements"], 2);
        let content = fs::read_to_string(workspace.path().join("code.rs")).expect("updated");
        assert!(!content.contains("foo"));
    }

    #[test]
    fn edit_missing_string_fails_cleanly() {
        let (workspace, executor) = temp_executor();
        fs::write(workspace.path().join("code.rs"), "fn main() {}\n").expect("seed");
        let result = executor.execute(&invocation(ToolKind::Edit, r#"code.rs "absent" "x""#));
        assert!(!result.success);
        assert!(result.error.unwrap().contains("not found"));
    }

    #[test]
    fn glob_finds_files_and_skips_ignored_dirs() {
        let (workspace, executor) = temp_executor();
        fs::create_dir_all(workspace.path().join("src")).expect("src");
        fs::create_dir_all(workspace.path().join("target/debug")).expect("target");
        fs::write(workspace.path().join("src/main.rs"), "fn main() {}\n").expect("seed");
        fs::write(workspace.path().join("target/debug/junk.rs"), "x").expect("seed");

        let result = executor.execute(&invocation(ToolKind::Glob, "**/*.rs"));
        assert!(result.success);
        assert!(result.output.contains("src/main.rs"));
        assert!(!result.output.contains("target/"));
        assert_eq!(result.metadata["count"], 1);
    }

    #[test]
    fn grep_reports_path_line_and_text() {
        let (workspace, executor) = temp_executor();
        fs::create_dir_all(workspace.path().join("src")).expect("src");
        fs::write(
            workspace.path().join("src/lib.rs"),
            "pub fn alpha() {}\npub fn beta() {}\n",
        )
        .expect("seed");

        let result = executor.execute(&invocation(ToolKind::Grep, "beta"));
        assert!(result.success);
        assert!(result.output.contains("src/lib.rs:2: pub fn beta() {}"));
        assert_eq!(result.metadata["count"], 1);

        let invalid = executor.execute(&invocation(ToolKind::Grep, "[unclosed"));
        assert!(!invalid.success);
        assert!(invalid.error.unwrap().contains("invalid regex"));
    }

    #[test]
    fn bash_runs_through_the_shell_runner() {
        let runner = RecordingRunner::default();
        let (_workspace, executor) =
            temp_executor_with(SecurityConfig::default(), Arc::new(runner.clone()));

        let result = executor.execute(&invocation(ToolKind::Bash, "git status"));
        assert!(result.success);
        assert!(result.output.contains("STDOUT:"));
        assert_eq!(result.metadata["return_code"], 0);
        assert_eq!(runner.captured(), vec!["git status".to_string()]);
    }

    #[test]
    fn forbidden_command_never_reaches_the_runner() {
        let runner = RecordingRunner::default();
        let (_workspace, executor) =
            temp_executor_with(SecurityConfig::default(), Arc::new(runner.clone()));

        let result = executor.execute(&invocation(ToolKind::Bash, "rm -rf /"));
        assert!(!result.success);
        assert_eq!(result.metadata["refused_by"], "security_validator");
        assert!(runner.captured().is_empty());
    }

    #[test]
    fn ungranted_capability_never_reaches_the_tool() {
        let runner = RecordingRunner::default();
        let workspace = tempfile::tempdir().expect("workspace");
        let gate = Arc::new(Mutex::new(PermissionGate::new()));
        let executor = ToolExecutor::with_runner(
            workspace.path(),
            SecurityConfig::default(),
            ToolsConfig::default(),
            gate,
            Arc::new(runner.clone()),
        )
        .expect("executor");

        let result = executor.execute(&invocation(ToolKind::Bash, "git status"));
        assert!(!result.success);
        assert_eq!(result.metadata["refused_by"], "permission_gate");
        assert!(result.error.unwrap().contains("shell"));
        assert!(runner.captured().is_empty());
    }

    #[test]
    fn read_only_tools_skip_the_gate() {
        let workspace = tempfile::tempdir().expect("workspace");
        fs::write(workspace.path().join("f.txt"), "data\n").expect("seed");
        let gate = Arc::new(Mutex::new(PermissionGate::new()));
        let executor = ToolExecutor::new(
            workspace.path(),
            SecurityConfig::default(),
            ToolsConfig::default(),
            gate,
        )
        .expect("executor");

        let result = executor.execute(&invocation(ToolKind::Read, "f.txt"));
        assert!(result.success);
    }

    #[test]
    fn suppressed_invocations_are_refused_outright() {
        let (_workspace, executor) = temp_executor();
        let mut inv = invocation(ToolKind::Bash, "ls");
        inv.origin = InvocationOrigin::SuppressedCodeBlock;
        let result = executor.execute(&inv);
        assert!(!result.success);
        assert_eq!(result.metadata["refused_by"], "extractor");
    }

    #[test]
    fn shell_timeout_becomes_a_failed_result() {
        let runner = RecordingRunner {
            timed_out: true,
            ..RecordingRunner::default()
        };
        let (_workspace, executor) =
            temp_executor_with(SecurityConfig::default(), Arc::new(runner));

        let result = executor.execute(&invocation(ToolKind::Bash, "cargo test"));
        assert!(!result.success);
        assert!(result.error.unwrap().contains("timed out"));
        assert_eq!(result.metadata["timed_out"], true);
    }

    #[test]
    fn output_is_sanitized_and_redacted() {
        let (_workspace, executor) = temp_executor();
        let noisy = "\x1b[31mred\x1b[0m api_key=supersecret123";
        assert_eq!(
            executor.sanitize_output(noisy),
            "red api_key=REDACTED"
        );

        let long = "x".repeat(ToolsConfig::default().max_output_bytes + 10);
        let truncated = executor.sanitize_output(&long);
        assert!(truncated.contains("truncated, total"));
    }

    #[test]
    fn sensitive_read_is_blocked_by_the_validator() {
        let (workspace, executor) = temp_executor();
        fs::write(workspace.path().join("server.key"), "---key---").expect("seed");
        let result = executor.execute(&invocation(ToolKind::Read, "server.key"));
        assert!(!result.success);
        assert_eq!(result.metadata["refused_by"], "security_validator");
    }

    #[test]
    fn web_tools_respect_disabled_network_access() {
        let mut security = SecurityConfig::default();
        security.allow_network_access = false;
        let (_workspace, executor) =
            temp_executor_with(security, Arc::new(PlatformShellRunner));

        let search = executor.execute(&invocation(ToolKind::WebSearch, "rust"));
        assert!(!search.success);
        assert_eq!(search.metadata["refused_by"], "security_validator");

        let fetch = executor.execute(&invocation(ToolKind::WebFetch, "https://example.com"));
        assert!(!fetch.success);
        assert_eq!(fetch.metadata["refused_by"], "security_validator");
    }
}
