use p4mcp_core::policy::audit::{AuditResult, ExportFormat};
use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer};
use serde::Deserialize;
use std::path::PathBuf;

/// Changelist reference: a number, or `default` for the default changelist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeId(String);

impl ChangeId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_default(&self) -> bool {
        self.0 == "default"
    }
}

impl std::fmt::Display for ChangeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ChangeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Num(u64),
            Text(String),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Num(n) => Ok(ChangeId(n.to_string())),
            Raw::Text(s) => {
                let s = s.trim();
                if s == "default" || (!s.is_empty() && s.chars().all(|c| c.is_ascii_digit())) {
                    Ok(ChangeId(s.to_string()))
                } else {
                    Err(de::Error::custom(format!(
                        "changelist must be a number or \"default\", got {s:?}"
                    )))
                }
            }
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    /// Start directory for the config search.
    pub workspace_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FstatArgs {
    #[serde(flatten)]
    pub ws: Workspace,
    pub files: Vec<String>,
    pub max: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenArgs {
    #[serde(flatten)]
    pub ws: Workspace,
    pub files: Vec<String>,
    pub changelist: Option<ChangeId>,
    /// Only honored by `p4_add`.
    pub filetype: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevertArgs {
    #[serde(flatten)]
    pub ws: Workspace,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub unchanged_only: bool,
    pub changelist: Option<ChangeId>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncArgs {
    #[serde(flatten)]
    pub ws: Workspace,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub preview: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenedArgs {
    #[serde(flatten)]
    pub ws: Workspace,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub all_clients: bool,
    pub changelist: Option<ChangeId>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffArgs {
    #[serde(flatten)]
    pub ws: Workspace,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default = "default_true")]
    pub unified: bool,
    /// List opened files that differ instead of printing diffs.
    #[serde(default)]
    pub summary_only: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    Pending,
    Submitted,
    Shelved,
}

impl ChangeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeStatus::Pending => "pending",
            ChangeStatus::Submitted => "submitted",
            ChangeStatus::Shelved => "shelved",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangesArgs {
    #[serde(flatten)]
    pub ws: Workspace,
    #[serde(default)]
    pub files: Vec<String>,
    pub status: Option<ChangeStatus>,
    pub max: Option<u32>,
    pub user: Option<String>,
    pub client: Option<String>,
    #[serde(default)]
    pub long_description: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeArgs {
    #[serde(flatten)]
    pub ws: Workspace,
    pub changelist: ChangeId,
    #[serde(default)]
    pub include_diff: bool,
    #[serde(default)]
    pub shelved: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilelogArgs {
    #[serde(flatten)]
    pub ws: Workspace,
    pub files: Vec<String>,
    pub max: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientsArgs {
    #[serde(flatten)]
    pub ws: Workspace,
    pub user: Option<String>,
    pub max: Option<u32>,
    /// Case-insensitive name filter (`-E`).
    pub name_filter: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamedSpecArgs {
    #[serde(flatten)]
    pub ws: Workspace,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequiredNameArgs {
    #[serde(flatten)]
    pub ws: Workspace,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangelistCreateArgs {
    #[serde(flatten)]
    pub ws: Workspace,
    pub description: String,
    #[serde(default)]
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangelistUpdateArgs {
    #[serde(flatten)]
    pub ws: Workspace,
    pub changelist: ChangeId,
    pub description: Option<String>,
    pub files: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangelistArgs {
    #[serde(flatten)]
    pub ws: Workspace,
    pub changelist: ChangeId,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitArgs {
    #[serde(flatten)]
    pub ws: Workspace,
    pub description: String,
    #[serde(default)]
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResolveMode {
    Auto,
    Safe,
    Theirs,
    Yours,
    Force,
}

impl ResolveMode {
    pub fn flag(&self) -> &'static str {
        match self {
            ResolveMode::Auto => "-am",
            ResolveMode::Safe => "-as",
            ResolveMode::Theirs => "-at",
            ResolveMode::Yours => "-ay",
            ResolveMode::Force => "-af",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveArgs {
    #[serde(flatten)]
    pub ws: Workspace,
    #[serde(default)]
    pub files: Vec<String>,
    pub mode: Option<ResolveMode>,
    #[serde(default)]
    pub preview: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShelveArgs {
    #[serde(flatten)]
    pub ws: Workspace,
    pub changelist: ChangeId,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub delete: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnshelveArgs {
    #[serde(flatten)]
    pub ws: Workspace,
    pub source_changelist: ChangeId,
    pub target_changelist: Option<ChangeId>,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlameArgs {
    #[serde(flatten)]
    pub ws: Workspace,
    pub file: String,
    #[serde(default)]
    pub show_change: bool,
    #[serde(default)]
    pub follow_integrations: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyMoveArgs {
    #[serde(flatten)]
    pub ws: Workspace,
    pub source: String,
    pub target: String,
    pub changelist: Option<ChangeId>,
    /// Only honored by `p4_copy`.
    #[serde(default)]
    pub preview: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrepArgs {
    #[serde(flatten)]
    pub ws: Workspace,
    pub pattern: String,
    pub files: Vec<String>,
    #[serde(default)]
    pub case_insensitive: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilesArgs {
    #[serde(flatten)]
    pub ws: Workspace,
    pub files: Vec<String>,
    #[serde(default)]
    pub all_revisions: bool,
    pub max: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirsArgs {
    #[serde(flatten)]
    pub ws: Workspace,
    pub dirs: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsersArgs {
    #[serde(flatten)]
    pub ws: Workspace,
    pub filter: Option<String>,
    pub max: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobsArgs {
    #[serde(flatten)]
    pub ws: Workspace,
    pub expression: Option<String>,
    pub max: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixesArgs {
    #[serde(flatten)]
    pub ws: Workspace,
    pub changelist: Option<ChangeId>,
    pub job: Option<String>,
    #[serde(default)]
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelsArgs {
    #[serde(flatten)]
    pub ws: Workspace,
    pub user: Option<String>,
    pub max: Option<u32>,
    #[serde(default)]
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhereArgs {
    #[serde(flatten)]
    pub ws: Workspace,
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogsArgs {
    #[serde(flatten)]
    pub ws: Workspace,
    pub tool: Option<String>,
    pub user: Option<String>,
    pub result: Option<AuditResult>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

fn default_export_format() -> ExportFormat {
    ExportFormat::Json
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditExportArgs {
    #[serde(flatten)]
    pub ws: Workspace,
    #[serde(default = "default_export_format")]
    pub format: ExportFormat,
}

/// How much a tool is allowed to change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    Read,
    Write,
    Delete,
}

/// A `tools/call` request, already typed. The wire shape is the MCP params
/// object: `{"name": "p4_edit", "arguments": {...}}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "name", content = "arguments")]
pub enum ToolRequest {
    #[serde(rename = "p4_info")]
    Info(Workspace),
    #[serde(rename = "p4_status")]
    Status(Workspace),
    #[serde(rename = "p4_fstat")]
    Fstat(FstatArgs),
    #[serde(rename = "p4_add")]
    Add(OpenArgs),
    #[serde(rename = "p4_edit")]
    Edit(OpenArgs),
    #[serde(rename = "p4_delete")]
    Delete(OpenArgs),
    #[serde(rename = "p4_revert")]
    Revert(RevertArgs),
    #[serde(rename = "p4_sync")]
    Sync(SyncArgs),
    #[serde(rename = "p4_opened")]
    Opened(OpenedArgs),
    #[serde(rename = "p4_diff")]
    Diff(DiffArgs),
    #[serde(rename = "p4_changes")]
    Changes(ChangesArgs),
    #[serde(rename = "p4_describe")]
    Describe(DescribeArgs),
    #[serde(rename = "p4_filelog")]
    Filelog(FilelogArgs),
    #[serde(rename = "p4_clients")]
    Clients(ClientsArgs),
    #[serde(rename = "p4_client")]
    Client(NamedSpecArgs),
    #[serde(rename = "p4_config_detect")]
    ConfigDetect(Workspace),
    #[serde(rename = "p4_changelist_create")]
    ChangelistCreate(ChangelistCreateArgs),
    #[serde(rename = "p4_changelist_update")]
    ChangelistUpdate(ChangelistUpdateArgs),
    #[serde(rename = "p4_changelist_submit")]
    ChangelistSubmit(ChangelistArgs),
    #[serde(rename = "p4_submit")]
    Submit(SubmitArgs),
    #[serde(rename = "p4_resolve")]
    Resolve(ResolveArgs),
    #[serde(rename = "p4_shelve")]
    Shelve(ShelveArgs),
    #[serde(rename = "p4_unshelve")]
    Unshelve(UnshelveArgs),
    #[serde(rename = "p4_blame")]
    Blame(BlameArgs),
    #[serde(rename = "p4_copy")]
    Copy(CopyMoveArgs),
    #[serde(rename = "p4_move")]
    Move(CopyMoveArgs),
    #[serde(rename = "p4_grep")]
    Grep(GrepArgs),
    #[serde(rename = "p4_files")]
    Files(FilesArgs),
    #[serde(rename = "p4_dirs")]
    Dirs(DirsArgs),
    #[serde(rename = "p4_users")]
    Users(UsersArgs),
    #[serde(rename = "p4_user")]
    User(NamedSpecArgs),
    #[serde(rename = "p4_job")]
    Job(RequiredNameArgs),
    #[serde(rename = "p4_jobs")]
    Jobs(JobsArgs),
    #[serde(rename = "p4_fixes")]
    Fixes(FixesArgs),
    #[serde(rename = "p4_label")]
    Label(RequiredNameArgs),
    #[serde(rename = "p4_labels")]
    Labels(LabelsArgs),
    #[serde(rename = "p4_where")]
    Where(WhereArgs),
    #[serde(rename = "p4_audit_logs")]
    AuditLogs(AuditLogsArgs),
    #[serde(rename = "p4_audit_export")]
    AuditExport(AuditExportArgs),
    #[serde(rename = "p4_server_status")]
    ServerStatus(Workspace),
}

impl ToolRequest {
    pub fn mutation(&self) -> Mutation {
        use ToolRequest::*;
        match self {
            Add(_) | Edit(_) | Revert(_) | ChangelistCreate(_) | ChangelistUpdate(_)
            | ChangelistSubmit(_) | Submit(_) | Resolve(_) | Unshelve(_) | Copy(_) | Move(_) => {
                Mutation::Write
            }
            Delete(_) => Mutation::Delete,
            Sync(a) if a.preview => Mutation::Read,
            Sync(_) => Mutation::Write,
            Shelve(a) if a.delete => Mutation::Delete,
            Shelve(_) => Mutation::Write,
            _ => Mutation::Read,
        }
    }

    pub fn workspace(&self) -> &Workspace {
        use ToolRequest::*;
        match self {
            Info(w) | Status(w) | ConfigDetect(w) | ServerStatus(w) => w,
            Fstat(a) => &a.ws,
            Add(a) | Edit(a) | Delete(a) => &a.ws,
            Revert(a) => &a.ws,
            Sync(a) => &a.ws,
            Opened(a) => &a.ws,
            Diff(a) => &a.ws,
            Changes(a) => &a.ws,
            Describe(a) => &a.ws,
            Filelog(a) => &a.ws,
            Clients(a) => &a.ws,
            Client(a) | User(a) => &a.ws,
            ChangelistCreate(a) => &a.ws,
            ChangelistUpdate(a) => &a.ws,
            ChangelistSubmit(a) => &a.ws,
            Submit(a) => &a.ws,
            Resolve(a) => &a.ws,
            Shelve(a) => &a.ws,
            Unshelve(a) => &a.ws,
            Blame(a) => &a.ws,
            Copy(a) | Move(a) => &a.ws,
            Grep(a) => &a.ws,
            Files(a) => &a.ws,
            Dirs(a) => &a.ws,
            Users(a) => &a.ws,
            Job(a) | Label(a) => &a.ws,
            Jobs(a) => &a.ws,
            Fixes(a) => &a.ws,
            Labels(a) => &a.ws,
            Where(a) => &a.ws,
            AuditLogs(a) => &a.ws,
            AuditExport(a) => &a.ws,
        }
    }
}
