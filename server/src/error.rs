use chrono::{DateTime, Utc};
use p4mcp_protocol::{CommandError, ErrorCode};

/// Rejections raised before (or instead of) running `p4`.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid arguments: {message}")]
    InvalidArgs { message: String },
    #[error("{tool} is not allowed in read-only mode (set P4_READONLY_MODE=false)")]
    ReadOnly { tool: String },
    #[error("{tool} deletes files and delete operations are disabled (set P4_DISABLE_DELETE=false)")]
    DeleteDisabled { tool: String },
    #[error("audit logging is disabled (set P4_ENABLE_AUDIT_LOGGING=true)")]
    AuditDisabled,
    #[error("rate limit exceeded for {tool}; blocked until {blocked_until}")]
    RateLimited {
        tool: String,
        blocked_until: DateTime<Utc>,
    },
    #[error("unknown tool: {name}")]
    UnknownTool { name: String },
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ToolError {
    pub fn invalid(message: impl Into<String>) -> Self {
        ToolError::InvalidArgs {
            message: message.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            ToolError::InvalidArgs { .. } | ToolError::UnknownTool { .. } => ErrorCode::InvalidArgs,
            ToolError::ReadOnly { .. } => ErrorCode::ReadOnlyMode,
            ToolError::DeleteDisabled { .. } => ErrorCode::DeleteDisabled,
            ToolError::AuditDisabled => ErrorCode::AuditDisabled,
            ToolError::RateLimited { .. } => ErrorCode::RateLimited,
            ToolError::Internal(_) => ErrorCode::CommandFailed,
        }
    }

    pub fn to_command_error(&self) -> CommandError {
        CommandError::new(self.code(), self.to_string())
    }
}
