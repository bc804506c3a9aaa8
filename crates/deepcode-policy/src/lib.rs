use deepcode_core::{Capability, SecurityConfig, SecurityDecision};
use regex::{Regex, RegexBuilder, RegexSet, RegexSetBuilder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// The filesystem operation a path is being validated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathOperation {
    Read,
    Write,
    Delete,
}

impl PathOperation {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Delete => "delete",
        }
    }

    fn mutates(&self) -> bool {
        matches!(self, Self::Write | Self::Delete)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum PolicyError {
    #[error("invalid pattern in security config: {0}")]
    InvalidPattern(#[from] regex::Error),
}

/// Directories no write or delete may ever target.
const SYSTEM_DIRS: [&str; 7] = ["/bin", "/sbin", "/usr/bin", "/usr/sbin", "/etc", "/sys", "/proc"];

/// Pure classification of commands, paths and URLs against a fixed policy.
/// Decisions are advisory; enforcement happens in the executor dispatch path
/// so no tool can bypass validation by calling a different entry point.
#[derive(Debug)]
pub struct SecurityValidator {
    cfg: SecurityConfig,
    dangerous: Vec<Regex>,
    sensitive: RegexSet,
    local_urls: RegexSet,
    redact: Vec<Regex>,
}

impl SecurityValidator {
    pub fn new(cfg: SecurityConfig) -> Result<Self, PolicyError> {
        let dangerous = cfg
            .dangerous_patterns
            .iter()
            .map(|p| RegexBuilder::new(p).case_insensitive(true).build())
            .collect::<Result<Vec<_>, _>>()?;
        let sensitive = RegexSet::new(&cfg.sensitive_files)?;
        let local_urls = RegexSetBuilder::new([
            r"^https?://localhost",
            r"^https?://127\.",
            r"^https?://10\.",
            r"^https?://192\.168\.",
            r"^https?://172\.(1[6-9]|2[0-9]|3[0-1])\.",
            r"^https?://169\.254\.",
            r"^file://",
        ])
        .case_insensitive(true)
        .build()?;
        let redact = cfg
            .redact_patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            cfg,
            dangerous,
            sensitive,
            local_urls,
            redact,
        })
    }

    pub fn validate_command(&self, command: &str) -> SecurityDecision {
        for forbidden in &self.cfg.forbidden_commands {
            if command.contains(forbidden.as_str()) {
                return SecurityDecision::block(format!(
                    "forbidden command pattern: {forbidden}"
                ));
            }
        }

        if !self.cfg.allow_dangerous_commands {
            for pattern in &self.dangerous {
                if pattern.is_match(command) {
                    return SecurityDecision::block(format!(
                        "dangerous command pattern ({}); requires allow_dangerous_commands",
                        pattern.as_str()
                    ));
                }
            }
        }

        SecurityDecision::allow()
    }

    pub fn validate_path(&self, file_path: &str, operation: PathOperation) -> SecurityDecision {
        let path = resolve_path(file_path);
        let display = path.display();

        if operation == PathOperation::Read && !path.exists() {
            return SecurityDecision::block(format!("path does not exist: {display}"));
        }

        if !self.cfg.allowed_directories.is_empty() {
            let inside = self
                .cfg
                .allowed_directories
                .iter()
                .any(|dir| path.starts_with(resolve_path(dir)));
            if !inside {
                return SecurityDecision::block(format!(
                    "path outside allowed directories: {display}"
                ));
            }
        }

        for blocked in &self.cfg.blocked_directories {
            if path.starts_with(resolve_path(blocked)) {
                return SecurityDecision::block(format!("path in blocked directory: {display}"));
            }
        }

        if operation.mutates() {
            for sys_dir in SYSTEM_DIRS {
                if path.starts_with(sys_dir) {
                    return SecurityDecision::block(format!(
                        "cannot {} in system directory: {display}",
                        operation.as_str()
                    ));
                }
            }
        }

        if operation == PathOperation::Write && !self.cfg.allow_file_writes {
            return SecurityDecision::block("file writes are disabled by security policy");
        }
        if operation == PathOperation::Delete && !self.cfg.allow_file_deletes {
            return SecurityDecision::block("file deletes are disabled by security policy");
        }

        if operation == PathOperation::Read
            && let Ok(meta) = path.metadata()
            && meta.is_file()
        {
            let limit = self.cfg.max_file_size_mb * 1024 * 1024;
            if meta.len() > limit {
                return SecurityDecision::block(format!(
                    "file too large: {:.1}MB (max: {}MB)",
                    meta.len() as f64 / (1024.0 * 1024.0),
                    self.cfg.max_file_size_mb
                ));
            }
        }

        if self.is_sensitive_file(&path) {
            if operation.mutates() {
                return SecurityDecision::block(format!(
                    "refusing to {} sensitive file: {display}",
                    operation.as_str()
                ));
            }
            if !self.cfg.allow_sensitive_reads {
                return SecurityDecision::block(format!(
                    "reading sensitive file requires allow_sensitive_reads: {display}"
                ));
            }
        }

        SecurityDecision::allow()
    }

    pub fn validate_url(&self, url: &str) -> SecurityDecision {
        if !self.cfg.allow_network_access {
            return SecurityDecision::block("network access is disabled by security policy");
        }
        if self.local_urls.is_match(url) {
            return SecurityDecision::allow_with_warning(
                "accessing local/private network address",
            );
        }
        SecurityDecision::allow()
    }

    /// Strip secret-shaped values before text reaches logs or the transcript.
    pub fn redact(&self, text: &str) -> String {
        let mut out = text.to_string();
        for pattern in &self.redact {
            out = pattern.replace_all(&out, "$1=REDACTED").to_string();
        }
        out
    }

    fn is_sensitive_file(&self, path: &Path) -> bool {
        let lowered = path.to_string_lossy().to_ascii_lowercase();
        self.sensitive.is_match(&lowered)
    }
}

fn resolve_path(raw: &str) -> PathBuf {
    let expanded = if let Some(rest) = raw.strip_prefix("~/") {
        match std::env::var("HOME")
            .ok()
            .or_else(|| std::env::var("USERPROFILE").ok())
        {
            Some(home) => PathBuf::from(home).join(rest),
            None => PathBuf::from(raw),
        }
    } else {
        PathBuf::from(raw)
    };
    match std::fs::canonicalize(&expanded) {
        Ok(canonical) => canonical,
        Err(_) => std::path::absolute(&expanded).unwrap_or(expanded),
    }
}

/// Per-capability approval state for the running session.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PermissionState {
    pub granted: bool,
    pub auto_approve: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateCheck {
    Granted,
    NeedsConfirmation,
}

/// Session-scoped capability grants. One instance per running session;
/// grants live for the process lifetime and are never written to disk.
#[derive(Debug, Clone, Default)]
pub struct PermissionGate {
    states: BTreeMap<Capability, PermissionState>,
}

impl PermissionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every capability pre-granted with auto-approve. Used for
    /// non-interactive print mode where no confirmation surface exists.
    pub fn allow_all() -> Self {
        let mut gate = Self::new();
        for capability in Capability::ALL {
            gate.record_grant(capability, true);
        }
        gate
    }

    pub fn may_execute(&self, capability: Capability) -> bool {
        self.states
            .get(&capability)
            .is_some_and(|state| state.granted || state.auto_approve)
    }

    pub fn check(&self, capability: Capability) -> GateCheck {
        if self.may_execute(capability) {
            GateCheck::Granted
        } else {
            GateCheck::NeedsConfirmation
        }
    }

    pub fn record_grant(&mut self, capability: Capability, auto_approve: bool) {
        let state = self.states.entry(capability).or_default();
        state.granted = true;
        state.auto_approve = state.auto_approve || auto_approve;
    }

    pub fn revoke(&mut self, capability: Capability) {
        self.states.remove(&capability);
    }

    pub fn status(&self) -> Vec<(Capability, PermissionState)> {
        Capability::ALL
            .iter()
            .map(|cap| (*cap, self.states.get(cap).copied().unwrap_or_default()))
            .collect()
    }
}
