//! Classifies assistant response text into genuine tool requests versus
//! prose that merely mentions a tool.
//!
//! A request is only honored when it stands alone: the line begins with the
//! sigil, names a known tool, and carries an argument. Everything else
//! (code blocks, inline code spans, mid-sentence mentions, hypothetical
//! phrasing) is suppressed but retained in the report so the classification
//! can be explained after the fact.

use deepcode_core::{ExtractorConfig, InvocationOrigin, ToolInvocation, ToolKind};
use serde::{Deserialize, Serialize};

/// Everything the extractor found in one response, in line order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionReport {
    records: Vec<ToolInvocation>,
}

impl ExtractionReport {
    /// The invocations to execute, in order of first appearance.
    /// Duplicates are preserved; repeated intent is the controller's call.
    pub fn standalone(&self) -> Vec<ToolInvocation> {
        self.records
            .iter()
            .filter(|inv| inv.origin.is_standalone())
            .cloned()
            .collect()
    }

    pub fn has_standalone(&self) -> bool {
        self.records.iter().any(|inv| inv.origin.is_standalone())
    }

    /// All classified tool-like lines, suppressed ones included.
    pub fn records(&self) -> &[ToolInvocation] {
        &self.records
    }

    pub fn suppressed(&self) -> impl Iterator<Item = &ToolInvocation> {
        self.records
            .iter()
            .filter(|inv| !inv.origin.is_standalone())
    }
}

#[derive(Debug, Clone)]
pub struct InvocationExtractor {
    sigil: char,
    /// Lowercased deny phrases; matched as substrings of the whole line.
    phrases: Vec<String>,
}

impl InvocationExtractor {
    pub fn new(cfg: &ExtractorConfig) -> Self {
        Self {
            sigil: cfg.sigil,
            phrases: cfg
                .explanatory_phrases
                .iter()
                .map(|p| p.to_ascii_lowercase())
                .collect(),
        }
    }

    /// Scan a full response. Pure and deterministic: the same text always
    /// yields the identical report.
    pub fn extract(&self, response: &str) -> ExtractionReport {
        let mut records = Vec::new();
        let mut in_code_block = false;

        for (line_index, line) in response.lines().enumerate() {
            let trimmed = line.trim();

            if trimmed.starts_with("```") {
                in_code_block = !in_code_block;
                // A mention on the fence line itself is still fenced text.
                if let Some(mention) = self.find_mention(line) {
                    records.push(mention.into_invocation(
                        line_index,
                        InvocationOrigin::SuppressedCodeBlock,
                    ));
                }
                continue;
            }

            if in_code_block {
                if let Some(mention) = self.find_mention(line) {
                    records.push(mention.into_invocation(
                        line_index,
                        InvocationOrigin::SuppressedCodeBlock,
                    ));
                }
                continue;
            }

            if let Some(candidate) = self.line_initial_candidate(trimmed) {
                let origin = if self.matches_deny_phrase(trimmed) {
                    InvocationOrigin::SuppressedExplanatory
                } else {
                    InvocationOrigin::Standalone
                };
                records.push(candidate.into_invocation(line_index, origin));
                continue;
            }

            // Not a candidate: keep mid-line and inline-code mentions around
            // for diagnostics only.
            if let Some(mention) = self.find_mention(line) {
                let origin = if mention.inside_inline_code {
                    InvocationOrigin::SuppressedInlineCode
                } else {
                    InvocationOrigin::SuppressedMidLine
                };
                records.push(mention.into_invocation(line_index, origin));
            }
        }

        ExtractionReport { records }
    }

    /// A candidate must begin with sigil + known keyword + separator + a
    /// non-empty argument. Mentions anywhere else in the line never qualify.
    fn line_initial_candidate(&self, trimmed: &str) -> Option<Mention> {
        let rest = trimmed.strip_prefix(self.sigil)?;
        let keyword: String = rest
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
            .collect();
        let tool = ToolKind::from_keyword(&keyword)?;
        let after = &rest[keyword.len()..];
        if !after.starts_with(char::is_whitespace) {
            return None;
        }
        let argument = after.trim();
        if argument.is_empty() {
            return None;
        }
        Some(Mention {
            tool,
            argument: argument.to_string(),
            inside_inline_code: false,
        })
    }

    /// First sigil+keyword mention anywhere in the line, noting whether it
    /// sits inside a single-backtick span.
    fn find_mention(&self, line: &str) -> Option<Mention> {
        for (offset, ch) in line.char_indices() {
            if ch != self.sigil {
                continue;
            }
            let rest = &line[offset + ch.len_utf8()..];
            let keyword: String = rest
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
                .collect();
            let Some(tool) = ToolKind::from_keyword(&keyword) else {
                continue;
            };
            let argument = rest[keyword.len()..]
                .trim()
                .trim_end_matches('`')
                .trim()
                .to_string();
            let backticks_before = line[..offset].matches('`').count();
            return Some(Mention {
                tool,
                argument,
                inside_inline_code: backticks_before % 2 == 1,
            });
        }
        None
    }

    fn matches_deny_phrase(&self, line: &str) -> bool {
        let lowered = line.to_ascii_lowercase();
        self.phrases.iter().any(|phrase| lowered.contains(phrase))
    }
}

struct Mention {
    tool: ToolKind,
    argument: String,
    inside_inline_code: bool,
}

impl Mention {
    fn into_invocation(self, line_index: usize, origin: InvocationOrigin) -> ToolInvocation {
        ToolInvocation {
            tool: self.tool,
            argument: self.argument,
            line_index,
            origin,
        }
    }
}
