//! Cross-cutting gate applied around every tool call.

pub mod audit;
pub mod memory;
pub mod rate_limit;
pub mod sanitize;

use crate::config::PolicyConfig;
use audit::{AuditEvent, AuditLog};
use memory::{GcReport, MemoryCheck, MemoryProbe, SystemMemoryProbe};
use rate_limit::{RateLimitDecision, RateLimiter};
use sanitize::{InputKind, SanitizeResult};
use std::sync::Arc;

fn chrono_duration(d: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}

/// Owns the rate-limit table, the audit log and the memory probe. One
/// instance per server, shared by reference.
pub struct PolicyManager {
    config: PolicyConfig,
    rate_limiter: RateLimiter,
    audit: AuditLog,
    probe: Arc<dyn MemoryProbe>,
}

impl PolicyManager {
    pub fn new(config: PolicyConfig) -> Self {
        Self::with_probe(config, Arc::new(SystemMemoryProbe))
    }

    pub fn with_probe(config: PolicyConfig, probe: Arc<dyn MemoryProbe>) -> Self {
        let rate_limiter = RateLimiter::new(
            config.rate_limit_enabled,
            config.rate_limit_max_requests,
            chrono_duration(config.rate_limit_window),
            chrono_duration(config.rate_limit_block),
        );
        let audit = AuditLog::new(config.audit_enabled, config.audit_retention_days);
        Self {
            config,
            rate_limiter,
            audit,
            probe,
        }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    pub fn probe(&self) -> Arc<dyn MemoryProbe> {
        Arc::clone(&self.probe)
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn check_rate_limit(&self, identifier: &str) -> RateLimitDecision {
        self.rate_limiter.check(identifier)
    }

    pub fn check_memory(&self) -> MemoryCheck {
        let check = memory::evaluate(
            self.probe.snapshot(),
            self.config.max_memory_mb,
            self.config.memory_limits_enabled,
        );
        for w in &check.warnings {
            tracing::warn!(warning = %w, "memory check");
        }
        check
    }

    /// There is no collector to run; the report says so and carries a
    /// fresh reading.
    pub fn force_gc(&self) -> GcReport {
        let before = self.probe.snapshot();
        let after = self.probe.snapshot();
        GcReport {
            ran: false,
            before,
            after,
            message: "no garbage collector in this runtime; memory is freed on drop".to_string(),
        }
    }

    /// With sanitization turned off, every input passes through untouched.
    pub fn sanitize(&self, value: &str, kind: InputKind) -> SanitizeResult {
        if !self.config.sanitization_enabled {
            return SanitizeResult {
                valid: true,
                sanitized: value.to_string(),
                warnings: Vec::new(),
            };
        }
        let result = sanitize::sanitize(value, kind);
        if !result.valid {
            tracing::warn!(?kind, warnings = ?result.warnings, "rejected input");
        }
        result
    }

    pub fn record(&self, event: AuditEvent) {
        if self.audit.enabled() {
            self.audit.record(event, self.probe.snapshot());
        }
    }
}
