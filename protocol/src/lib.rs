use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub mod redaction;

/// A parsed block of command output: field name to scalar.
pub type Record = serde_json::Map<String, Value>;

/// Stable error codes. Callers branch on the string form, so these never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    #[serde(rename = "P4_NOT_FOUND")]
    NotFound,
    #[serde(rename = "P4_AUTH_FAILED")]
    AuthFailed,
    #[serde(rename = "P4_CLIENT_UNKNOWN")]
    ClientUnknown,
    #[serde(rename = "P4_CONNECTION_FAILED")]
    ConnectionFailed,
    #[serde(rename = "P4_TIMEOUT")]
    Timeout,
    #[serde(rename = "P4_NOT_UNDER_CLIENT")]
    NotUnderClient,
    #[serde(rename = "P4_COMMAND_FAILED")]
    CommandFailed,
    #[serde(rename = "MEMORY_LIMIT_EXCEEDED")]
    MemoryLimitExceeded,
    #[serde(rename = "P4_INVALID_ARGS")]
    InvalidArgs,
    #[serde(rename = "AUDIT_DISABLED")]
    AuditDisabled,
    #[serde(rename = "P4_READONLY_MODE")]
    ReadOnlyMode,
    #[serde(rename = "P4_DELETE_DISABLED")]
    DeleteDisabled,
    #[serde(rename = "RATE_LIMIT_EXCEEDED")]
    RateLimited,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NotFound => "P4_NOT_FOUND",
            ErrorCode::AuthFailed => "P4_AUTH_FAILED",
            ErrorCode::ClientUnknown => "P4_CLIENT_UNKNOWN",
            ErrorCode::ConnectionFailed => "P4_CONNECTION_FAILED",
            ErrorCode::Timeout => "P4_TIMEOUT",
            ErrorCode::NotUnderClient => "P4_NOT_UNDER_CLIENT",
            ErrorCode::CommandFailed => "P4_COMMAND_FAILED",
            ErrorCode::MemoryLimitExceeded => "MEMORY_LIMIT_EXCEEDED",
            ErrorCode::InvalidArgs => "P4_INVALID_ARGS",
            ErrorCode::AuditDisabled => "AUDIT_DISABLED",
            ErrorCode::ReadOnlyMode => "P4_READONLY_MODE",
            ErrorCode::DeleteDisabled => "P4_DELETE_DISABLED",
            ErrorCode::RateLimited => "RATE_LIMIT_EXCEEDED",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl CommandError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            exit_code: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Outcome {
    Success {
        result: Value,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        warnings: Vec<String>,
    },
    Failure {
        error: CommandError,
    },
}

/// Outcome of exactly one `p4` invocation (or of a policy rejection that
/// prevented it).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    pub ok: bool,
    pub command: String,
    pub args: Vec<String>,
    pub cwd: String,
    /// Connection-relevant environment only, password masked.
    pub env: BTreeMap<String, String>,
    #[serde(flatten)]
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_file: Option<String>,
}

impl CommandResult {
    pub fn success(
        command: String,
        args: Vec<String>,
        cwd: String,
        env: BTreeMap<String, String>,
        result: Value,
        warnings: Vec<String>,
    ) -> Self {
        Self {
            ok: true,
            command,
            args,
            cwd,
            env,
            outcome: Outcome::Success { result, warnings },
            config_file: None,
        }
    }

    pub fn failure(
        command: String,
        args: Vec<String>,
        cwd: String,
        env: BTreeMap<String, String>,
        error: CommandError,
    ) -> Self {
        Self {
            ok: false,
            command,
            args,
            cwd,
            env,
            outcome: Outcome::Failure { error },
            config_file: None,
        }
    }

    pub fn result(&self) -> Option<&Value> {
        match &self.outcome {
            Outcome::Success { result, .. } => Some(result),
            Outcome::Failure { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&CommandError> {
        match &self.outcome {
            Outcome::Success { .. } => None,
            Outcome::Failure { error } => Some(error),
        }
    }

    pub fn warnings(&self) -> &[String] {
        match &self.outcome {
            Outcome::Success { warnings, .. } => warnings,
            Outcome::Failure { .. } => &[],
        }
    }

    /// Replace the success payload, keeping warnings. No-op on failures.
    pub fn map_result(mut self, f: impl FnOnce(Value) -> Value) -> Self {
        if let Outcome::Success { result, warnings } = self.outcome {
            self.outcome = Outcome::Success {
                result: f(result),
                warnings,
            };
        }
        self
    }

    pub fn push_warnings(&mut self, extra: impl IntoIterator<Item = String>) {
        if let Outcome::Success { warnings, .. } = &mut self.outcome {
            warnings.extend(extra);
        }
    }

    pub fn with_config_file(mut self, path: Option<String>) -> Self {
        self.config_file = path;
        self
    }
}
