use std::time::Duration;

pub const DEFAULT_MAX_MEMORY_MB: u64 = 512;
pub const DEFAULT_TIMEOUT_MS: i64 = 30_000;

pub fn env_bool(name: &str, default: bool) -> bool {
    let Ok(v) = std::env::var(name) else {
        return default;
    };
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => true,
        "0" | "false" | "no" | "n" | "off" => false,
        _ => default,
    }
}

pub fn env_u64(name: &str, default: u64) -> u64 {
    match std::env::var(name) {
        Ok(v) => v.trim().parse::<u64>().ok().unwrap_or(default),
        Err(_) => default,
    }
}

/// Values past `u32::MAX` saturate rather than wrap.
pub fn env_u32(name: &str, default: u32) -> u32 {
    saturate_u32(env_u64(name, u64::from(default)))
}

fn saturate_u32(v: u64) -> u32 {
    u32::try_from(v).unwrap_or(u32::MAX)
}

pub fn env_i64(name: &str, default: i64) -> i64 {
    match std::env::var(name) {
        Ok(v) => v.trim().parse::<i64>().ok().unwrap_or(default),
        Err(_) => default,
    }
}

fn default_p4_bin() -> &'static str {
    if cfg!(windows) { "p4.exe" } else { "p4" }
}

/// Settings for the command runner.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub p4_bin: String,
    /// `None` disables the timeout.
    pub timeout: Option<Duration>,
    pub max_memory_mb: u64,
    pub memory_limits_enabled: bool,
    pub redaction_extra_regex: Vec<String>,
}

impl RunnerConfig {
    pub fn from_env() -> Self {
        let p4_bin = std::env::var("P4_PATH")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| default_p4_bin().to_string());

        let redaction_extra_regex = std::env::var("P4_REDACTION_EXTRA_REGEX")
            .ok()
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim())
                    .filter(|s| !s.is_empty())
                    .map(|s| s.to_string())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        Self {
            p4_bin,
            timeout: timeout_from_ms(env_i64("P4_TIMEOUT_MS", DEFAULT_TIMEOUT_MS)),
            max_memory_mb: env_u64("P4_MAX_MEMORY_MB", DEFAULT_MAX_MEMORY_MB),
            memory_limits_enabled: env_bool("P4_ENABLE_MEMORY_LIMITS", true),
            redaction_extra_regex,
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            p4_bin: default_p4_bin().to_string(),
            timeout: timeout_from_ms(DEFAULT_TIMEOUT_MS),
            max_memory_mb: DEFAULT_MAX_MEMORY_MB,
            memory_limits_enabled: true,
            redaction_extra_regex: Vec::new(),
        }
    }
}

/// Zero or negative disables the timeout.
pub fn timeout_from_ms(ms: i64) -> Option<Duration> {
    if ms <= 0 {
        None
    } else {
        Some(Duration::from_millis(ms as u64))
    }
}

/// Settings for the safety/policy manager.
#[derive(Debug, Clone)]
pub struct PolicyConfig {
    pub audit_enabled: bool,
    pub audit_retention_days: i64,
    pub rate_limit_enabled: bool,
    pub rate_limit_max_requests: u32,
    pub rate_limit_window: Duration,
    pub rate_limit_block: Duration,
    pub memory_limits_enabled: bool,
    pub max_memory_mb: u64,
    pub sanitization_enabled: bool,
}

impl PolicyConfig {
    pub fn from_env() -> Self {
        Self {
            audit_enabled: env_bool("P4_ENABLE_AUDIT_LOGGING", true),
            audit_retention_days: env_i64("P4_AUDIT_RETENTION_DAYS", 30),
            rate_limit_enabled: env_bool("P4_ENABLE_RATE_LIMITING", true),
            rate_limit_max_requests: env_u32("P4_RATE_LIMIT_REQUESTS", 100),
            rate_limit_window: Duration::from_millis(env_u64("P4_RATE_LIMIT_WINDOW_MS", 60_000)),
            rate_limit_block: Duration::from_millis(env_u64("P4_RATE_LIMIT_BLOCK_MS", 300_000)),
            memory_limits_enabled: env_bool("P4_ENABLE_MEMORY_LIMITS", true),
            max_memory_mb: env_u64("P4_MAX_MEMORY_MB", DEFAULT_MAX_MEMORY_MB),
            sanitization_enabled: env_bool("P4_ENABLE_INPUT_SANITIZATION", true),
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            audit_enabled: true,
            audit_retention_days: 30,
            rate_limit_enabled: true,
            rate_limit_max_requests: 100,
            rate_limit_window: Duration::from_secs(60),
            rate_limit_block: Duration::from_secs(300),
            memory_limits_enabled: true,
            max_memory_mb: DEFAULT_MAX_MEMORY_MB,
            sanitization_enabled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_positive_timeout_disables() {
        assert_eq!(timeout_from_ms(0), None);
        assert_eq!(timeout_from_ms(-5), None);
        assert_eq!(timeout_from_ms(1500), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn oversized_counts_saturate() {
        assert_eq!(saturate_u32(4_294_967_296), u32::MAX);
        assert_eq!(saturate_u32(u64::MAX), u32::MAX);
        assert_eq!(saturate_u32(100), 100);
    }
}
