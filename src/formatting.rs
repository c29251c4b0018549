use std::process::ExitCode;

use pagewatch_lib::{RunOutcome, WatchError};
use serde_json::json;

/// Prints a fatal diagnostic and returns the matching exit code.
pub fn render_error(err: &WatchError, json_output: bool) -> ExitCode {
    let payload = err.to_payload();
    eprintln!("{}", fatal_message(err));
    if json_output {
        let content = serde_json::to_string(&json!({"outcome": "error", "error": payload}))
            .unwrap_or_else(|_| "{\"outcome\":\"error\"}".into());
        println!("{content}");
    }
    ExitCode::from(err.exit_code())
}

/// `FATAL ERROR:` line plus a `HINT:` line when there is a remediation.
pub fn fatal_message(err: &WatchError) -> String {
    match err.to_payload().remediation {
        Some(hint) => format!("FATAL ERROR: {err}\nHINT: {hint}"),
        None => format!("FATAL ERROR: {err}"),
    }
}

pub fn write_outcome(outcome: &RunOutcome, json_output: bool) -> ExitCode {
    if json_output {
        match serde_json::to_string(outcome) {
            Ok(content) => println!("{content}"),
            Err(err) => eprintln!("Failed to serialize run outcome: {err}"),
        }
    }
    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_message_carries_hint() {
        let err = WatchError::config("path.dir is required");
        assert_eq!(
            fatal_message(&err),
            "FATAL ERROR: Configuration error: path.dir is required\nHINT: Set path.dir in the config document or pass --root."
        );
    }
}
