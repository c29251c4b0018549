//! Host side of the page message bridge, plus in-page error reports.
//!
//! Page scripts talk back to the host by calling a browser binding with a
//! JSON envelope `{token, kind, message}`. Only envelopes carrying this run's
//! token are accepted, so ordinary page chatter never reaches the run log.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Name of the binding installed in every page.
pub const BRIDGE_BINDING: &str = "__pagewatchEmit";

/// Per-process random token that authenticates bridge messages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunToken(String);

impl RunToken {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeKind {
    Log,
    Warn,
    Progress,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeEnvelope {
    pub token: String,
    pub kind: BridgeKind,
    pub message: String,
}

/// An accepted bridge message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeMessage {
    pub kind: BridgeKind,
    pub message: String,
}

impl BridgeMessage {
    /// Line forwarded to the run log.
    pub fn render(&self) -> String {
        match self.kind {
            BridgeKind::Warn => format!("console warning: {}", self.message),
            BridgeKind::Log | BridgeKind::Progress => format!("console: {}", self.message),
        }
    }
}

/// Decodes a binding payload, keeping it only if it carries `token`.
pub fn accept(token: &RunToken, payload: &str) -> Option<BridgeMessage> {
    let envelope: BridgeEnvelope = serde_json::from_str(payload).ok()?;
    if envelope.token != token.as_str() {
        return None;
    }
    Some(BridgeMessage {
        kind: envelope.kind,
        message: envelope.message,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceFrame {
    pub file: String,
    pub line: i64,
    pub function: Option<String>,
}

/// An uncaught error thrown inside a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageErrorReport {
    pub message: String,
    pub trace: Vec<TraceFrame>,
}

impl fmt::Display for PageErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ERROR: {}", self.message)?;
        if !self.trace.is_empty() {
            write!(f, "\nTRACE:")?;
            for frame in &self.trace {
                write!(f, "\n -> {}: {}", frame.file, frame.line)?;
                if let Some(function) = frame.function.as_deref().filter(|name| !name.is_empty()) {
                    write!(f, " (in function \"{}\")", function)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(token: &str, kind: &str, message: &str) -> String {
        serde_json::json!({"token": token, "kind": kind, "message": message}).to_string()
    }

    #[test]
    fn tokens_look_like_uuid_v4_and_differ_per_run() {
        let a = RunToken::generate();
        let b = RunToken::generate();
        assert_ne!(a, b);
        let parsed = Uuid::parse_str(a.as_str()).unwrap();
        assert_eq!(parsed.get_version_num(), 4);
    }

    #[test]
    fn accepts_only_matching_token() {
        let token = RunToken::generate();
        let ok = accept(&token, &envelope(token.as_str(), "log", "walked 12 elements")).unwrap();
        assert_eq!(ok.kind, BridgeKind::Log);
        assert_eq!(ok.render(), "console: walked 12 elements");

        assert!(accept(&token, &envelope("someone-else", "log", "hi")).is_none());
    }

    #[test]
    fn rejects_malformed_payloads() {
        let token = RunToken::generate();
        assert!(accept(&token, "not json").is_none());
        assert!(accept(&token, &envelope(token.as_str(), "shout", "x")).is_none());
        assert!(accept(&token, r#"{"token":"t"}"#).is_none());
    }

    #[test]
    fn warn_messages_are_marked() {
        let token = RunToken::generate();
        let msg = accept(&token, &envelope(token.as_str(), "warn", "no boxes")).unwrap();
        assert_eq!(msg.render(), "console warning: no boxes");
    }

    #[test]
    fn error_report_lists_trace_frames() {
        let report = PageErrorReport {
            message: "TypeError: x is undefined".to_string(),
            trace: vec![
                TraceFrame {
                    file: "https://example.com/app.js".to_string(),
                    line: 12,
                    function: Some("init".to_string()),
                },
                TraceFrame {
                    file: "https://example.com/app.js".to_string(),
                    line: 40,
                    function: None,
                },
            ],
        };
        assert_eq!(
            report.to_string(),
            "ERROR: TypeError: x is undefined\nTRACE:\n -> https://example.com/app.js: 12 (in function \"init\")\n -> https://example.com/app.js: 40"
        );
    }

    #[test]
    fn error_report_without_trace_is_one_line() {
        let report = PageErrorReport {
            message: "boom".to_string(),
            trace: Vec::new(),
        };
        assert_eq!(report.to_string(), "ERROR: boom");
    }
}
