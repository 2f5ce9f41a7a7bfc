pub mod config;
pub mod doctor;
pub mod migrate;
pub mod run;

use serde_json::json;

/// Printable outcome of one subcommand: a single JSON line plus the
/// process exit code the binary should end with.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

/// A failed startup stage. Each stage owns a stable error class and a
/// distinct exit code, so scripts can tell a config problem from an
/// unreachable database without parsing the message.
#[derive(Debug)]
pub struct CommandFailure {
    pub class: &'static str,
    pub exit_code: u8,
    pub message: String,
}

impl CommandFailure {
    pub fn new(class: &'static str, exit_code: u8, message: impl Into<String>) -> Self {
        Self { class, exit_code, message: message.into() }
    }
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        let body = json!({
            "command": command,
            "status": "ok",
            "error_class": null,
            "message": message.into(),
        });
        Self { exit_code: 0, output: body.to_string() }
    }

    pub fn failure(command: &str, failure: CommandFailure) -> Self {
        let body = json!({
            "command": command,
            "status": "error",
            "error_class": failure.class,
            "message": failure.message,
        });
        Self { exit_code: failure.exit_code, output: body.to_string() }
    }
}
