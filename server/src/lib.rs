//! MCP front-end for Perforce: tool definitions, policy gating and the
//! JSON-RPC plumbing shared by the `p4-mcp` binary and its tests.

pub mod config;
pub mod error;
pub mod rpc;
pub mod tools;

pub use config::ServerConfig;
pub use error::ToolError;
pub use tools::{ToolReply, Tools};
