use deepcode_agent::{ConfirmDecision, ConfirmationHandler};
use deepcode_core::Capability;
use std::io::{self, BufRead, Write};

/// Asks on stdin. `y` grants for the session, `a` grants with auto-approve,
/// anything else denies.
pub struct StdinConfirm;

impl ConfirmationHandler for StdinConfirm {
    fn confirm(&mut self, capability: Capability, summary: &str) -> ConfirmDecision {
        println!("Permission needed: {capability}");
        println!("  requested by: {summary}");
        print!("Allow? [y]es for this session / [a]lways / [n]o: ");
        let _ = io::stdout().flush();

        let mut line = String::new();
        if io::stdin().lock().read_line(&mut line).is_err() {
            return ConfirmDecision::Deny;
        }
        parse_decision(&line)
    }
}

pub fn parse_decision(input: &str) -> ConfirmDecision {
    match input.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => ConfirmDecision::Approve,
        "a" | "always" => ConfirmDecision::ApproveAuto,
        _ => ConfirmDecision::Deny,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decisions_parse_leniently() {
        assert_eq!(parse_decision("y\n"), ConfirmDecision::Approve);
        assert_eq!(parse_decision("YES"), ConfirmDecision::Approve);
        assert_eq!(parse_decision("a"), ConfirmDecision::ApproveAuto);
        assert_eq!(parse_decision("Always\n"), ConfirmDecision::ApproveAuto);
        assert_eq!(parse_decision("n"), ConfirmDecision::Deny);
        assert_eq!(parse_decision(""), ConfirmDecision::Deny);
        assert_eq!(parse_decision("whatever"), ConfirmDecision::Deny);
    }
}
