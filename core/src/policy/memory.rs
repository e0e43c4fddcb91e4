use serde::Serialize;

const MB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorySnapshot {
    pub rss_bytes: u64,
    pub heap_used_bytes: u64,
}

impl MemorySnapshot {
    pub fn rss_mb(&self) -> f64 {
        self.rss_bytes as f64 / MB
    }

    pub fn heap_used_mb(&self) -> f64 {
        self.heap_used_bytes as f64 / MB
    }
}

pub trait MemoryProbe: Send + Sync {
    fn snapshot(&self) -> MemorySnapshot;
}

/// Reads this process's memory through `sysinfo`. Heap usage is the
/// anonymous resident set (`resident - shared` from `/proc/self/statm`) on
/// Linux and falls back to RSS elsewhere.
pub struct SystemMemoryProbe;

impl MemoryProbe for SystemMemoryProbe {
    fn snapshot(&self) -> MemorySnapshot {
        let rss_bytes = current_rss_bytes().unwrap_or(0);
        let heap_used_bytes = anonymous_resident_bytes().unwrap_or(rss_bytes);
        MemorySnapshot {
            rss_bytes,
            heap_used_bytes,
        }
    }
}

fn current_rss_bytes() -> Option<u64> {
    use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};

    let pid = sysinfo::get_current_pid().ok()?;
    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[pid]),
        true,
        ProcessRefreshKind::nothing().with_memory(),
    );
    system.process(pid).map(|p| p.memory())
}

#[cfg(target_os = "linux")]
fn anonymous_resident_bytes() -> Option<u64> {
    use nix::unistd::{SysconfVar, sysconf};

    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let mut fields = statm.split_whitespace().skip(1);
    let resident = fields.next()?.parse::<u64>().ok()?;
    let shared = fields.next()?.parse::<u64>().ok()?;
    let page = sysconf(SysconfVar::PAGE_SIZE).ok().flatten()? as u64;
    Some(resident.saturating_sub(shared) * page)
}

#[cfg(not(target_os = "linux"))]
fn anonymous_resident_bytes() -> Option<u64> {
    None
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryCheck {
    pub within_limits: bool,
    pub usage: MemorySnapshot,
    pub limit_mb: u64,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GcReport {
    pub ran: bool,
    pub before: MemorySnapshot,
    pub after: MemorySnapshot,
    pub message: String,
}

pub fn evaluate(usage: MemorySnapshot, limit_mb: u64, enabled: bool) -> MemoryCheck {
    let mut warnings = Vec::new();
    if enabled {
        let limit = limit_mb as f64;
        if usage.rss_mb() > limit {
            warnings.push(format!(
                "resident memory {:.1} MB exceeds limit of {limit_mb} MB",
                usage.rss_mb()
            ));
        }
        if usage.heap_used_mb() > limit * 0.8 {
            warnings.push(format!(
                "heap usage {:.1} MB is above 80% of the {limit_mb} MB limit",
                usage.heap_used_mb()
            ));
        }
    }
    MemoryCheck {
        within_limits: warnings.is_empty(),
        usage,
        limit_mb,
        warnings,
    }
}
