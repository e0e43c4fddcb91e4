use super::memory::MemorySnapshot;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditResult {
    Success,
    Error,
    Blocked,
}

impl AuditResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditResult::Success => "success",
            AuditResult::Error => "error",
            AuditResult::Blocked => "blocked",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: uuid::Uuid,
    pub timestamp: DateTime<Utc>,
    pub tool: String,
    pub user: String,
    pub args: Value,
    pub result: AuditResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    pub duration_ms: u64,
    pub memory: MemorySnapshot,
}

/// What the caller knows about a finished (or blocked) tool call.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub tool: String,
    pub user: Option<String>,
    pub args: Value,
    pub result: AuditResult,
    pub error_code: Option<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditQuery {
    pub tool: Option<String>,
    pub user: Option<String>,
    pub result: Option<AuditResult>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Csv,
}

const CSV_HEADER: &str = "id,timestamp,tool,user,result,errorCode,durationMs,rssMb,heapUsedMb";

pub struct AuditLog {
    enabled: bool,
    retention: Duration,
    entries: Mutex<VecDeque<AuditEntry>>,
}

impl AuditLog {
    pub fn new(enabled: bool, retention_days: i64) -> Self {
        Self {
            enabled,
            retention: Duration::try_days(retention_days.max(0)).unwrap_or(Duration::MAX),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<AuditEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record(&self, event: AuditEvent, memory: MemorySnapshot) {
        self.record_at(event, memory, Utc::now());
    }

    pub fn record_at(&self, event: AuditEvent, memory: MemorySnapshot, now: DateTime<Utc>) {
        if !self.enabled {
            return;
        }
        let entry = AuditEntry {
            id: uuid::Uuid::new_v4(),
            timestamp: now,
            tool: event.tool,
            user: event
                .user
                .filter(|u| !u.trim().is_empty())
                .unwrap_or_else(|| "unknown".to_string()),
            args: event.args,
            result: event.result,
            error_code: event.error_code,
            duration_ms: event.duration_ms,
            memory,
        };
        let mut entries = self.lock();
        entries.push_back(entry);
        let cutoff = now
            .checked_sub_signed(self.retention)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        entries.retain(|e| e.timestamp >= cutoff);
    }

    /// Drop entries past retention. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Utc::now())
    }

    pub fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        if !self.enabled {
            return 0;
        }
        let cutoff = now
            .checked_sub_signed(self.retention)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|e| e.timestamp >= cutoff);
        before - entries.len()
    }

    /// Matching entries, newest first.
    pub fn query(&self, q: &AuditQuery) -> Vec<AuditEntry> {
        if !self.enabled {
            return Vec::new();
        }
        let entries = self.lock();
        let matches = entries
            .iter()
            .rev()
            .filter(|e| q.tool.as_deref().is_none_or(|t| e.tool == t))
            .filter(|e| q.user.as_deref().is_none_or(|u| e.user == u))
            .filter(|e| q.result.is_none_or(|r| e.result == r))
            .filter(|e| q.since.is_none_or(|s| e.timestamp >= s))
            .cloned();
        match q.limit {
            Some(n) => matches.take(n).collect(),
            None => matches.collect(),
        }
    }

    pub fn export(&self, format: ExportFormat) -> anyhow::Result<String> {
        if !self.enabled {
            return Ok(String::new());
        }
        let entries = self.query(&AuditQuery::default());
        match format {
            ExportFormat::Json => Ok(serde_json::to_string_pretty(&entries)?),
            ExportFormat::Csv => Ok(to_csv(&entries)),
        }
    }
}

fn csv_field(raw: &str) -> String {
    if raw.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}

fn to_csv(entries: &[AuditEntry]) -> String {
    let mut out = String::from(CSV_HEADER);
    out.push('\n');
    for e in entries {
        let row = [
            e.id.to_string(),
            e.timestamp.to_rfc3339(),
            csv_field(&e.tool),
            csv_field(&e.user),
            e.result.as_str().to_string(),
            csv_field(e.error_code.as_deref().unwrap_or("")),
            e.duration_ms.to_string(),
            format!("{:.2}", e.memory.rss_mb()),
            format!("{:.2}", e.memory.heap_used_mb()),
        ];
        out.push_str(&row.join(","));
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(tool: &str, user: Option<&str>, result: AuditResult) -> AuditEvent {
        AuditEvent {
            tool: tool.to_string(),
            user: user.map(str::to_string),
            args: json!({"files": ["//depot/a.c"]}),
            result,
            error_code: (result == AuditResult::Error).then(|| "P4_COMMAND_FAILED".to_string()),
            duration_ms: 12,
        }
    }

    fn mem() -> MemorySnapshot {
        MemorySnapshot {
            rss_bytes: 64 * 1024 * 1024,
            heap_used_bytes: 32 * 1024 * 1024,
        }
    }

    #[test]
    fn query_filters_newest_first() {
        let log = AuditLog::new(true, 30);
        let t0 = Utc::now();
        log.record_at(event("p4_info", Some("bob"), AuditResult::Success), mem(), t0);
        log.record_at(event("p4_edit", Some("amy"), AuditResult::Error), mem(), t0 + Duration::seconds(1));
        log.record_at(event("p4_info", None, AuditResult::Blocked), mem(), t0 + Duration::seconds(2));

        let all = log.query(&AuditQuery::default());
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].result, AuditResult::Blocked);
        assert_eq!(all[0].user, "unknown");

        let info = log.query(&AuditQuery {
            tool: Some("p4_info".into()),
            ..Default::default()
        });
        assert_eq!(info.len(), 2);

        let errors = log.query(&AuditQuery {
            result: Some(AuditResult::Error),
            ..Default::default()
        });
        assert_eq!(errors[0].user, "amy");
        assert_eq!(errors[0].error_code.as_deref(), Some("P4_COMMAND_FAILED"));

        let recent = log.query(&AuditQuery {
            since: Some(t0 + Duration::seconds(1)),
            limit: Some(1),
            ..Default::default()
        });
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].tool, "p4_info");
    }

    #[test]
    fn retention_trims_on_write_and_sweep() {
        let log = AuditLog::new(true, 1);
        let t0 = Utc::now();
        log.record_at(event("old", None, AuditResult::Success), mem(), t0 - Duration::days(3));
        log.record_at(event("new", None, AuditResult::Success), mem(), t0);
        let all = log.query(&AuditQuery::default());
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].tool, "new");

        assert_eq!(log.sweep_at(t0 + Duration::days(2)), 1);
        assert!(log.query(&AuditQuery::default()).is_empty());
    }

    #[test]
    fn huge_retention_keeps_everything() {
        let log = AuditLog::new(true, 1_000_000_000_000);
        let t0 = Utc::now();
        log.record_at(event("old", None, AuditResult::Success), mem(), t0 - Duration::days(3650));
        log.record_at(event("new", None, AuditResult::Success), mem(), t0);
        assert_eq!(log.sweep_at(t0), 0);
        assert_eq!(log.query(&AuditQuery::default()).len(), 2);
    }

    #[test]
    fn csv_has_fixed_columns_in_mb() {
        let log = AuditLog::new(true, 30);
        log.record(event("p4_edit", Some("a,b"), AuditResult::Error), mem());
        let csv = log.export(ExportFormat::Csv).unwrap();
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some(CSV_HEADER));
        let row = lines.next().unwrap();
        assert!(row.contains(",p4_edit,\"a,b\",error,P4_COMMAND_FAILED,12,64.00,32.00"));
    }

    #[test]
    fn json_export_round_trips() {
        let log = AuditLog::new(true, 30);
        log.record(event("p4_info", Some("bob"), AuditResult::Success), mem());
        let text = log.export(ExportFormat::Json).unwrap();
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v[0]["tool"], json!("p4_info"));
        assert_eq!(v[0]["result"], json!("success"));
        assert_eq!(v[0]["memory"]["rssBytes"], json!(64 * 1024 * 1024));
    }

    #[test]
    fn disabled_log_is_inert() {
        let log = AuditLog::new(false, 30);
        log.record(event("p4_info", None, AuditResult::Success), mem());
        assert!(log.query(&AuditQuery::default()).is_empty());
        assert_eq!(log.export(ExportFormat::Csv).unwrap(), "");
        assert_eq!(log.sweep(), 0);
    }
}
