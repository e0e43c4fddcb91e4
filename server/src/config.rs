use anyhow::Context;
use p4mcp_core::config::env_bool;
use p4mcp_core::{PolicyConfig, RunnerConfig};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Rejects write and delete tools.
    pub read_only: bool,
    /// Rejects delete tools even when writes are allowed.
    pub delete_disabled: bool,
    pub runner: RunnerConfig,
    pub policy: PolicyConfig,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let runner = RunnerConfig::from_env();
        for pat in &runner.redaction_extra_regex {
            regex_check(pat).with_context(|| {
                format!("invalid P4_REDACTION_EXTRA_REGEX entry {pat:?} (comma-separated regexes)")
            })?;
        }

        Ok(Self {
            read_only: env_bool("P4_READONLY_MODE", true),
            delete_disabled: env_bool("P4_DISABLE_DELETE", true),
            runner,
            policy: PolicyConfig::from_env(),
        })
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            read_only: true,
            delete_disabled: true,
            runner: RunnerConfig::default(),
            policy: PolicyConfig::default(),
        }
    }
}

fn regex_check(pat: &str) -> anyhow::Result<()> {
    p4mcp_protocol::redaction::Redactor::new(&[pat.to_string()])?;
    Ok(())
}
