//! Keeps the transcript inside the model's context budget between cycles.
//!
//! Token counts are estimates (roughly four characters per token); the loop
//! controller never inspects counts itself; it hands the transcript over
//! and trusts what comes back.

use deepcode_core::{ChatMessage, Transcript};

const CHARS_PER_TOKEN: usize = 4;
/// Structural overhead charged per message on top of its content.
const MESSAGE_OVERHEAD_TOKENS: u64 = 4;

pub fn estimate_tokens(text: &str) -> u64 {
    (text.len() / CHARS_PER_TOKEN) as u64
}

pub fn estimate_message_tokens(message: &ChatMessage) -> u64 {
    MESSAGE_OVERHEAD_TOKENS + estimate_tokens(message.content())
}

pub fn estimate_transcript_tokens(transcript: &Transcript) -> u64 {
    transcript
        .messages()
        .iter()
        .map(estimate_message_tokens)
        .sum()
}

#[derive(Debug, Clone)]
pub struct ContextManager {
    window_tokens: u64,
    reserve_tokens: u64,
}

impl ContextManager {
    pub fn new(window_tokens: u64, reserve_tokens: u64) -> Self {
        Self {
            window_tokens,
            reserve_tokens,
        }
    }

    fn target_tokens(&self) -> u64 {
        self.window_tokens.saturating_sub(self.reserve_tokens)
    }

    /// Truncate oldest-first until the transcript fits, always preserving a
    /// leading system message. Returns true when anything was dropped.
    pub fn fit(&self, transcript: &mut Transcript) -> bool {
        let target = self.target_tokens();
        if estimate_transcript_tokens(transcript) <= target {
            return false;
        }

        let messages = transcript.messages().to_vec();
        let (system, rest): (Option<ChatMessage>, &[ChatMessage]) = match messages.first() {
            Some(msg @ ChatMessage::System { .. }) => (Some(msg.clone()), &messages[1..]),
            _ => (None, &messages[..]),
        };

        let system_tokens = system.as_ref().map(estimate_message_tokens).unwrap_or(0);
        let available = target.saturating_sub(system_tokens);

        // Walk backwards keeping the most recent messages that fit.
        let mut kept = Vec::new();
        let mut used = 0_u64;
        for message in rest.iter().rev() {
            let cost = estimate_message_tokens(message);
            if used + cost > available {
                break;
            }
            used += cost;
            kept.push(message.clone());
        }
        kept.reverse();

        let mut rebuilt = Vec::with_capacity(kept.len() + 1);
        if let Some(system) = system {
            rebuilt.push(system);
        }
        rebuilt.extend(kept);
        transcript.replace_messages(rebuilt);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(content: &str) -> ChatMessage {
        ChatMessage::User {
            content: content.to_string(),
        }
    }

    #[test]
    fn short_transcripts_are_untouched() {
        let manager = ContextManager::new(64_000, 4_000);
        let mut t = Transcript::with_system("sys");
        t.push(user("hello"));
        assert!(!manager.fit(&mut t));
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn truncation_drops_oldest_and_keeps_system() {
        // Budget of 50 tokens with 10 reserved leaves room for the system
        // message plus roughly one long user message.
        let manager = ContextManager::new(50, 10);
        let mut t = Transcript::with_system("sys");
        t.push(user(&"a".repeat(120)));
        t.push(user(&"b".repeat(120)));
        assert!(manager.fit(&mut t));

        let messages = t.messages();
        assert_eq!(messages[0].role(), "system");
        assert!(messages.last().expect("kept").content().starts_with('b'));
        assert!(messages.iter().all(|m| !m.content().starts_with('a')));
    }

    #[test]
    fn estimate_scales_with_length() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcdefgh"), 2);
        let msg = user("abcdefgh");
        assert_eq!(estimate_message_tokens(&msg), 6);
    }
}
