use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub fn runtime_dir(workspace: &Path) -> PathBuf {
    workspace.join(".deepcode")
}

/// Coarse permission class gating whole categories of tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Shell,
    FileWrite,
    Web,
}

impl Capability {
    pub const ALL: [Self; 3] = [Self::Shell, Self::FileWrite, Self::Web];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Shell => "shell",
            Self::FileWrite => "file_write",
            Self::Web => "web",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The tools the assistant may request by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    Read,
    Write,
    Edit,
    Glob,
    Grep,
    Bash,
    WebSearch,
    WebFetch,
}

impl ToolKind {
    /// Resolve a response-text keyword (the token after the sigil) to a tool.
    /// Aliases follow the syntax the system prompt advertises.
    pub fn from_keyword(word: &str) -> Option<Self> {
        match word.to_ascii_lowercase().as_str() {
            "read" => Some(Self::Read),
            "write" => Some(Self::Write),
            "edit" => Some(Self::Edit),
            "glob" | "find" => Some(Self::Glob),
            "grep" | "search" => Some(Self::Grep),
            "bash" | "exec" | "run" => Some(Self::Bash),
            "web" | "websearch" => Some(Self::WebSearch),
            "curl" | "fetch" | "request" => Some(Self::WebFetch),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Edit => "edit",
            Self::Glob => "glob",
            Self::Grep => "grep",
            Self::Bash => "bash",
            Self::WebSearch => "web_search",
            Self::WebFetch => "web_fetch",
        }
    }

    /// The capability class that gates this tool, if any. Read-only local
    /// tools are not gated.
    pub fn capability(&self) -> Option<Capability> {
        match self {
            Self::Read | Self::Glob | Self::Grep => None,
            Self::Write | Self::Edit => Some(Capability::FileWrite),
            Self::Bash => Some(Capability::Shell),
            Self::WebSearch | Self::WebFetch => Some(Capability::Web),
        }
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self, Self::Read | Self::Glob | Self::Grep)
    }
}

impl std::fmt::Display for ToolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the extractor classified a tool-like line.
/// Only `Standalone` lines ever execute; the rest are kept for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvocationOrigin {
    #[serde(rename = "standalone")]
    Standalone,
    #[serde(rename = "suppressed-explanatory")]
    SuppressedExplanatory,
    #[serde(rename = "suppressed-codeblock")]
    SuppressedCodeBlock,
    #[serde(rename = "suppressed-inline-code")]
    SuppressedInlineCode,
    #[serde(rename = "suppressed-mid-line")]
    SuppressedMidLine,
}

impl InvocationOrigin {
    pub fn is_standalone(&self) -> bool {
        matches!(self, Self::Standalone)
    }

    /// Short human explanation used by the `/explain` surface.
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Standalone => "standalone request",
            Self::SuppressedExplanatory => "suppressed: explanatory phrasing",
            Self::SuppressedCodeBlock => "suppressed: inside fenced code block",
            Self::SuppressedInlineCode => "suppressed: inline code span",
            Self::SuppressedMidLine => "suppressed: tool mention not at line start",
        }
    }
}

/// A parsed request to run one tool with one argument string.
/// Produced by the extractor, immutable, discarded after its cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub tool: ToolKind,
    pub argument: String,
    pub line_index: usize,
    pub origin: InvocationOrigin,
}

/// Normalized outcome of one tool execution. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// Outcome of a security check. Recomputed on every call and never cached;
/// policy can depend on mutable permission state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityDecision {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl SecurityDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
            warning: None,
        }
    }

    pub fn allow_with_warning(warning: impl Into<String>) -> Self {
        Self {
            allowed: true,
            reason: None,
            warning: Some(warning.into()),
        }
    }

    pub fn block(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            warning: None,
        }
    }
}

/// A message in the conversation transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role")]
pub enum ChatMessage {
    #[serde(rename = "system")]
    System { content: String },
    #[serde(rename = "user")]
    User { content: String },
    #[serde(rename = "assistant")]
    Assistant { content: String },
    #[serde(rename = "tool-result")]
    ToolOutput { content: String },
}

impl ChatMessage {
    pub fn role(&self) -> &'static str {
        match self {
            Self::System { .. } => "system",
            Self::User { .. } => "user",
            Self::Assistant { .. } => "assistant",
            Self::ToolOutput { .. } => "tool-result",
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Self::System { content }
            | Self::User { content }
            | Self::Assistant { content }
            | Self::ToolOutput { content } => content,
        }
    }
}

/// Opaque marker for rolling a transcript back to a prior length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranscriptSnapshot(usize);

/// Ordered role-tagged conversation history. Append-only within a cycle;
/// a cycle either lands completely or is rolled back to its snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Transcript {
    messages: Vec<ChatMessage>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_system(prompt: impl Into<String>) -> Self {
        let mut t = Self::new();
        t.push(ChatMessage::System {
            content: prompt.into(),
        });
        t
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn snapshot(&self) -> TranscriptSnapshot {
        TranscriptSnapshot(self.messages.len())
    }

    pub fn rollback(&mut self, snapshot: TranscriptSnapshot) {
        self.messages.truncate(snapshot.0);
    }

    /// Replace the full message list. Used by the context manager between
    /// cycles; never called inside the extraction/execution path.
    pub fn replace_messages(&mut self, messages: Vec<ChatMessage>) {
        self.messages = messages;
    }
}

/// Why the conversation loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The model produced a response with no standalone invocations.
    Done,
    /// The iteration cap was reached while the model still requested tools.
    IterationLimit,
    /// The user interrupted mid-cycle; the cycle was discarded.
    Interrupted,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Done => "done",
            Self::IterationLimit => "iteration_limit",
            Self::Interrupted => "interrupted",
        }
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure to reach the model. Fatal to the current cycle; never retried by
/// the loop controller (retry policy lives in the transport).
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("model endpoint returned HTTP {status}: {detail}")]
    Api { status: u16, detail: String },
    #[error("network error reaching model endpoint: {0}")]
    Network(String),
    #[error("model response could not be parsed: {0}")]
    Malformed(String),
    #[error("missing API key (set {0} or llm.api_key in settings)")]
    MissingApiKey(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub model: String,
    pub endpoint: String,
    pub api_key: Option<String>,
    pub api_key_env: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_seconds: u64,
    pub max_retries: u8,
    pub retry_base_ms: u64,
    pub stream: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "deepseek-chat".to_string(),
            endpoint: "https://api.deepseek.com/chat/completions".to_string(),
            api_key: None,
            api_key_env: "DEEPSEEK_API_KEY".to_string(),
            temperature: 0.2,
            max_tokens: 4096,
            timeout_seconds: 60,
            max_retries: 3,
            retry_base_ms: 400,
            stream: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub allow_dangerous_commands: bool,
    pub allow_file_writes: bool,
    pub allow_file_deletes: bool,
    pub allow_network_access: bool,
    /// Reads of key/credential-shaped files are refused unless this is set.
    pub allow_sensitive_reads: bool,
    pub max_file_size_mb: u64,
    /// Empty = all directories allowed.
    pub allowed_directories: Vec<String>,
    pub blocked_directories: Vec<String>,
    pub forbidden_commands: Vec<String>,
    pub dangerous_patterns: Vec<String>,
    pub sensitive_files: Vec<String>,
    pub redact_patterns: Vec<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allow_dangerous_commands: false,
            allow_file_writes: true,
            allow_file_deletes: false,
            allow_network_access: true,
            allow_sensitive_reads: false,
            max_file_size_mb: 10,
            allowed_directories: Vec::new(),
            blocked_directories: Vec::new(),
            forbidden_commands: vec![
                ":(){:|:&};:".to_string(),
                "rm -rf /".to_string(),
                "rm -rf /*".to_string(),
                "mkfs.".to_string(),
                "> /dev/sd".to_string(),
                "dd if=/dev/zero".to_string(),
                "mv /* /dev/null".to_string(),
                "chmod -R 777 /".to_string(),
            ],
            dangerous_patterns: vec![
                r"rm\s+-[rf]+".to_string(),
                r"rm\s+.*\*".to_string(),
                r"dd\s+if=".to_string(),
                r"mkfs\.".to_string(),
                r"format\s+".to_string(),
                r"del(?:ete)?\s+/[sS]".to_string(),
                r">\s*/dev/".to_string(),
                r"chmod\s+-R\s+777".to_string(),
                r"chown\s+-R".to_string(),
                r"wget.*\|\s*sh".to_string(),
                r"curl.*\|\s*bash".to_string(),
            ],
            sensitive_files: vec![
                r".*\.pem$".to_string(),
                r".*\.key$".to_string(),
                r".*\.crt$".to_string(),
                r".*\.p12$".to_string(),
                r".*\.pfx$".to_string(),
                r".*\.env$".to_string(),
                r".*\.env\..*$".to_string(),
                r".*credentials.*".to_string(),
                r".*secret.*".to_string(),
                r".*password.*".to_string(),
                r".*\.ssh/.*".to_string(),
                r".*\.aws/.*".to_string(),
                r".*\.gnupg/.*".to_string(),
            ],
            redact_patterns: vec![
                r"(?i)(api[_-]?key|secret|token|password)\s*[:=]\s*[^\s]+".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Marker that introduces a tool request at line start.
    pub sigil: char,
    /// Phrases signaling hypothetical or instructional framing. A candidate
    /// line containing any of these (case-insensitive) is suppressed.
    pub explanatory_phrases: Vec<String>,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            sigil: '@',
            explanatory_phrases: vec![
                "you can use".to_string(),
                "you could use".to_string(),
                "you might".to_string(),
                "for example".to_string(),
                "e.g.".to_string(),
                "such as".to_string(),
                "try using".to_string(),
                "would be".to_string(),
                "consider using".to_string(),
                "if you want".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentLoopConfig {
    /// Model→extract→execute cycles per user turn before forcing a stop.
    pub max_iterations: u64,
    pub context_window_tokens: u64,
    pub reserve_tokens: u64,
}

impl Default for AgentLoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            context_window_tokens: 64_000,
            reserve_tokens: 4_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub shell_timeout_seconds: u64,
    pub http_timeout_seconds: u64,
    /// Output longer than this is truncated before display or transcript use.
    pub max_output_bytes: usize,
    pub max_read_lines: usize,
    pub max_glob_results: usize,
    pub max_grep_results: usize,
    pub web_search_results: usize,
    pub fetch_max_bytes: usize,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            shell_timeout_seconds: 30,
            http_timeout_seconds: 10,
            max_output_bytes: 50_000,
            max_read_lines: 10_000,
            max_glob_results: 1_000,
            max_grep_results: 100,
            web_search_results: 5,
            fetch_max_bytes: 200_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub security: SecurityConfig,
    pub extractor: ExtractorConfig,
    pub agent_loop: AgentLoopConfig,
    pub tools: ToolsConfig,
}

impl AppConfig {
    pub fn user_settings_path() -> Option<PathBuf> {
        let home = std::env::var("HOME")
            .ok()
            .or_else(|| std::env::var("USERPROFILE").ok())?;
        Some(Path::new(&home).join(".deepcode/settings.json"))
    }

    pub fn project_settings_path(workspace: &Path) -> PathBuf {
        runtime_dir(workspace).join("settings.json")
    }

    pub fn project_local_settings_path(workspace: &Path) -> PathBuf {
        runtime_dir(workspace).join("settings.local.json")
    }

    pub fn legacy_toml_path(workspace: &Path) -> PathBuf {
        runtime_dir(workspace).join("config.toml")
    }

    /// Load defaults merged with the legacy TOML file, then user, project and
    /// project-local JSON settings, later layers winning per key.
    pub fn load(workspace: &Path) -> Result<Self> {
        let mut merged = serde_json::to_value(Self::default())?;

        let legacy = Self::legacy_toml_path(workspace);
        if legacy.exists() {
            let raw = fs::read_to_string(legacy)?;
            let legacy_cfg: AppConfig = toml::from_str(&raw)?;
            merge_json_value(&mut merged, &serde_json::to_value(legacy_cfg)?);
        }

        let mut paths = Vec::new();
        if let Some(user) = Self::user_settings_path() {
            paths.push(user);
        }
        paths.push(Self::project_settings_path(workspace));
        paths.push(Self::project_local_settings_path(workspace));

        for path in paths {
            if !path.exists() {
                continue;
            }
            let raw = fs::read_to_string(path)?;
            let value: serde_json::Value = serde_json::from_str(&raw)?;
            merge_json_value(&mut merged, &value);
        }

        Ok(serde_json::from_value(merged)?)
    }

    pub fn save(&self, workspace: &Path) -> Result<()> {
        let path = Self::project_settings_path(workspace);
        fs::create_dir_all(
            path.parent()
                .ok_or_else(|| anyhow::anyhow!("invalid config path"))?,
        )?;
        fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }
}

fn merge_json_value(base: &mut serde_json::Value, overlay: &serde_json::Value) {
    match (base, overlay) {
        (serde_json::Value::Object(base_obj), serde_json::Value::Object(overlay_obj)) => {
            for (key, overlay_value) in overlay_obj {
                if let Some(base_value) = base_obj.get_mut(key) {
                    merge_json_value(base_value, overlay_value);
                } else {
                    base_obj.insert(key.clone(), overlay_value.clone());
                }
            }
        }
        (base_slot, overlay_value) => {
            *base_slot = overlay_value.clone();
        }
    }
}
