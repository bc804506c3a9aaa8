//! User-facing classification for fatal errors.
//!
//! Recoverable failures (blocked invocations, tool errors) stay inside the
//! loop as failed tool results; only errors that abort a cycle (transport
//! failures, configuration problems) reach this layer for display.

use anyhow::Error;
use deepcode_core::TransportError;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    Configuration,
    Network,
    Permission,
    Runtime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserFacingError {
    pub title: String,
    pub message: String,
    pub kind: ErrorKind,
    pub suggestions: Vec<String>,
}

impl UserFacingError {
    pub fn new(title: impl Into<String>, message: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            kind,
            suggestions: Vec::new(),
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn render(&self) -> String {
        let mut out = format!("{}: {}\n", self.title, self.message);
        if !self.suggestions.is_empty() {
            out.push_str("\n  Suggestions:\n");
            for (i, suggestion) in self.suggestions.iter().enumerate() {
                out.push_str(&format!("    {}. {}\n", i + 1, suggestion));
            }
        }
        out
    }
}

impl fmt::Display for UserFacingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}

/// Map a fatal error to a titled message with recovery suggestions.
pub fn classify(error: &Error) -> UserFacingError {
    if let Some(transport) = error.downcast_ref::<TransportError>() {
        return classify_transport(transport);
    }

    let text = error.to_string();
    let lowered = text.to_lowercase();

    if lowered.contains("api key") || lowered.contains("settings") {
        return UserFacingError::new("Configuration Error", &text, ErrorKind::Configuration)
            .with_suggestion("Check .deepcode/settings.json")
            .with_suggestion("Set the DEEPSEEK_API_KEY environment variable");
    }
    if lowered.contains("timeout") || lowered.contains("connection") || lowered.contains("network")
    {
        return UserFacingError::new("Network Error", &text, ErrorKind::Network)
            .with_suggestion("Check your internet connection")
            .with_suggestion("Try again in a few moments");
    }
    if lowered.contains("permission") || lowered.contains("denied") {
        return UserFacingError::new("Permission Error", &text, ErrorKind::Permission)
            .with_suggestion("Grant the capability when prompted, or adjust security settings");
    }

    UserFacingError::new("Error", &text, ErrorKind::Runtime)
        .with_suggestion("Re-run with --verbose for more detail")
}

fn classify_transport(error: &TransportError) -> UserFacingError {
    match error {
        TransportError::MissingApiKey(env) => UserFacingError::new(
            "Missing API Key",
            format!("An API key is required to reach the model (checked {env})."),
            ErrorKind::Configuration,
        )
        .with_suggestion(format!("export {env}=<your key>"))
        .with_suggestion("Or set llm.api_key in .deepcode/settings.json"),
        TransportError::Network(detail) => UserFacingError::new(
            "Network Error",
            format!("Could not reach the model endpoint: {detail}"),
            ErrorKind::Network,
        )
        .with_suggestion("Check your internet connection")
        .with_suggestion("Verify llm.endpoint in settings"),
        TransportError::Api { status, detail } => UserFacingError::new(
            "Model API Error",
            format!("The endpoint returned HTTP {status}: {detail}"),
            ErrorKind::Network,
        )
        .with_suggestion("Check your API key and account quota"),
        TransportError::Malformed(detail) => UserFacingError::new(
            "Malformed Model Response",
            detail.clone(),
            ErrorKind::Runtime,
        )
        .with_suggestion("Retry the request; report if it persists"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn transport_errors_classify_by_variant() {
        let err = Error::new(TransportError::MissingApiKey("DEEPSEEK_API_KEY".to_string()));
        let classified = classify(&err);
        assert_eq!(classified.kind, ErrorKind::Configuration);
        assert!(classified.render().contains("DEEPSEEK_API_KEY"));

        let err = Error::new(TransportError::Api {
            status: 429,
            detail: "rate limited".to_string(),
        });
        assert_eq!(classify(&err).kind, ErrorKind::Network);
    }

    #[test]
    fn generic_errors_classify_by_message() {
        assert_eq!(
            classify(&anyhow!("connection refused")).kind,
            ErrorKind::Network
        );
        assert_eq!(
            classify(&anyhow!("permission denied for /etc")).kind,
            ErrorKind::Permission
        );
        assert_eq!(classify(&anyhow!("something odd")).kind, ErrorKind::Runtime);
    }

    #[test]
    fn rendered_errors_number_their_suggestions() {
        let rendered = UserFacingError::new("T", "m", ErrorKind::Runtime)
            .with_suggestion("first")
            .with_suggestion("second")
            .render();
        assert!(rendered.contains("1. first"));
        assert!(rendered.contains("2. second"));
    }
}
