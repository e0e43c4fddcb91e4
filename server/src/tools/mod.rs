//! Tool functions: typed requests in, one `p4` invocation (or a policy
//! answer) out.

pub mod args;
pub mod schema;

use crate::config::ServerConfig;
use crate::error::ToolError;
use anyhow::Context;
use args::{ChangelistUpdateArgs, Mutation, ToolRequest, Workspace};
use p4mcp_core::p4config::{self, CommandSetup};
use p4mcp_core::parse::forms::render_change_spec;
use p4mcp_core::policy::audit::AuditQuery;
use p4mcp_core::policy::sanitize::InputKind;
use p4mcp_core::{Grammar, OutputFormat, P4Command, PolicyManager, Runner};
use p4mcp_protocol::{CommandResult, ErrorCode};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

/// What a tool call produced, ready for the wire and the audit log.
#[derive(Debug, Clone)]
pub struct ToolReply {
    pub payload: Value,
    pub is_error: bool,
    pub error_code: Option<ErrorCode>,
    /// Best effort, from `P4USER` of the call's environment.
    pub user: Option<String>,
}

impl ToolReply {
    fn from_result(res: &CommandResult, user: Option<String>) -> Result<Self, ToolError> {
        Ok(Self {
            payload: serde_json::to_value(res).map_err(anyhow::Error::from)?,
            is_error: !res.ok,
            error_code: res.error().map(|e| e.code),
            user,
        })
    }

    fn data(payload: Value) -> Self {
        Self {
            payload,
            is_error: false,
            error_code: None,
            user: None,
        }
    }

    pub fn from_error(err: &ToolError) -> Self {
        Self {
            payload: json!({ "ok": false, "error": err.to_command_error() }),
            is_error: true,
            error_code: Some(err.code()),
            user: None,
        }
    }
}

/// Runs caller-supplied strings through the sanitizer, keeping advisory
/// warnings for the reply.
struct Inputs<'a> {
    policy: &'a PolicyManager,
    warnings: Vec<String>,
}

impl<'a> Inputs<'a> {
    fn new(policy: &'a PolicyManager) -> Self {
        Self {
            policy,
            warnings: Vec::new(),
        }
    }

    fn check(&mut self, field: &str, value: &str, kind: InputKind) -> Result<String, ToolError> {
        if value.trim().is_empty() {
            return Err(ToolError::invalid(format!("{field} must not be empty")));
        }
        let res = self.policy.sanitize(value, kind);
        if !res.valid {
            return Err(ToolError::invalid(format!("{field}: {}", res.warnings.join("; "))));
        }
        if kind != InputKind::Pattern && res.sanitized.starts_with('-') {
            return Err(ToolError::invalid(format!("{field} may not start with '-'")));
        }
        self.warnings.extend(res.warnings);
        Ok(res.sanitized)
    }

    fn filespec(&mut self, field: &str, value: &str) -> Result<String, ToolError> {
        self.check(field, value, InputKind::Filespec)
    }

    fn filespecs(&mut self, values: &[String]) -> Result<Vec<String>, ToolError> {
        values.iter().map(|v| self.filespec("files", v)).collect()
    }

    fn required_filespecs(&mut self, values: &[String]) -> Result<Vec<String>, ToolError> {
        if values.is_empty() {
            return Err(ToolError::invalid("files must contain at least one filespec"));
        }
        self.filespecs(values)
    }

    /// Client, user, job and label names: a single token, no flags.
    fn name(&mut self, field: &str, value: &str) -> Result<String, ToolError> {
        let v = value.trim();
        if v.is_empty() || v.contains(char::is_whitespace) || v.starts_with('-') {
            return Err(ToolError::invalid(format!("{field} is not a valid name: {value:?}")));
        }
        Ok(v.to_string())
    }

    fn opt_name(&mut self, field: &str, value: Option<&str>) -> Result<Option<String>, ToolError> {
        value.map(|v| self.name(field, v)).transpose()
    }

    fn text(&mut self, field: &str, value: &str) -> Result<String, ToolError> {
        if value.trim().is_empty() {
            return Err(ToolError::invalid(format!("{field} must not be empty")));
        }
        Ok(value.to_string())
    }
}

fn numbered(field: &str, change: &args::ChangeId) -> Result<String, ToolError> {
    if change.is_default() {
        return Err(ToolError::invalid(format!("{field} must be a numbered changelist")));
    }
    Ok(change.to_string())
}

/// `Files:` entries in a `change -o` form carry a trailing `# action`.
fn form_files(form: &Map<String, Value>) -> Vec<String> {
    form.get("Files")
        .and_then(Value::as_array)
        .map(|files| {
            files
                .iter()
                .filter_map(Value::as_str)
                .filter_map(|f| f.split('#').next())
                .map(|f| f.trim().to_string())
                .filter(|f| !f.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

const NOT_OPENED: &str = "not opened on this client";

/// `opened` with nothing open fails on some servers; that is just an empty list.
fn not_opened_as_empty(res: CommandResult) -> CommandResult {
    let Some(err) = res.error() else {
        return res;
    };
    let empty = err
        .details
        .as_deref()
        .is_some_and(|d| d.to_ascii_lowercase().contains(NOT_OPENED));
    if !empty {
        return res;
    }
    CommandResult::success(
        res.command.clone(),
        res.args.clone(),
        res.cwd.clone(),
        res.env.clone(),
        Value::Array(Vec::new()),
        vec!["file(s) not opened on this client".to_string()],
    )
    .with_config_file(res.config_file.clone())
}

fn status_summary(files: Value) -> Value {
    let list = files.as_array().cloned().unwrap_or_default();
    let mut by_action: BTreeMap<String, u64> = BTreeMap::new();
    let mut by_change: BTreeMap<String, u64> = BTreeMap::new();
    for f in &list {
        if let Some(a) = f.get("action").and_then(Value::as_str) {
            *by_action.entry(a.to_string()).or_default() += 1;
        }
        if let Some(c) = f.get("change") {
            let key = match c {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            *by_change.entry(key).or_default() += 1;
        }
    }
    json!({
        "files": list,
        "summary": {
            "total": list.len(),
            "byAction": by_action,
            "byChange": by_change,
        }
    })
}

/// Everything a tool call needs: mode flags, the runner and the policy gate.
pub struct Tools {
    config: ServerConfig,
    runner: Runner,
    policy: Arc<PolicyManager>,
}

impl Tools {
    pub fn new(config: ServerConfig) -> anyhow::Result<Self> {
        let policy = Arc::new(PolicyManager::new(config.policy.clone()));
        Self::with_policy(config, policy)
    }

    pub fn with_policy(config: ServerConfig, policy: Arc<PolicyManager>) -> anyhow::Result<Self> {
        let runner = Runner::with_probe(config.runner.clone(), policy.probe())
            .context("build p4 runner")?;
        Ok(Self {
            config,
            runner,
            policy,
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn policy(&self) -> &Arc<PolicyManager> {
        &self.policy
    }

    pub fn decode(name: &str, arguments: Value) -> Result<ToolRequest, ToolError> {
        if !schema::TOOL_NAMES.contains(&name) {
            return Err(ToolError::UnknownTool {
                name: name.to_string(),
            });
        }
        let arguments = match arguments {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };
        serde_json::from_value(json!({ "name": name, "arguments": arguments }))
            .map_err(|e| ToolError::invalid(e.to_string()))
    }

    /// Read-only mode is checked first, so a delete in read-only mode
    /// reports read-only.
    pub fn gate(&self, name: &str, req: &ToolRequest) -> Result<(), ToolError> {
        let class = req.mutation();
        if self.config.read_only && class != Mutation::Read {
            return Err(ToolError::ReadOnly {
                tool: name.to_string(),
            });
        }
        if self.config.delete_disabled && class == Mutation::Delete {
            return Err(ToolError::DeleteDisabled {
                tool: name.to_string(),
            });
        }
        Ok(())
    }

    /// Decode, gate and execute one call. Rate limiting and auditing are
    /// the caller's business.
    pub async fn call(&self, name: &str, arguments: Value) -> ToolReply {
        let outcome = async {
            let req = Self::decode(name, arguments)?;
            self.gate(name, &req)?;
            self.execute(req).await
        }
        .await;
        match outcome {
            Ok(reply) => reply,
            Err(err) => {
                tracing::warn!(tool = name, code = %err.code(), error = %err, "tool call rejected");
                ToolReply::from_error(&err)
            }
        }
    }

    async fn setup(&self, ws: &Workspace, inputs: &mut Inputs<'_>) -> CommandSetup {
        let start = match &ws.workspace_path {
            Some(p) => {
                let raw = p.to_string_lossy();
                let clean = self.policy.sanitize(&raw, InputKind::Path);
                inputs.warnings.extend(clean.warnings);
                Some(PathBuf::from(clean.sanitized))
            }
            None => None,
        };
        p4config::setup_for_command(start.as_deref(), &BTreeMap::new()).await
    }

    async fn run_in(&self, setup: &CommandSetup, cmd: &P4Command) -> CommandResult {
        self.runner
            .run(cmd, &setup.cwd, &setup.env)
            .await
            .with_config_file(setup.resolution.config_path_string())
    }

    async fn execute(&self, req: ToolRequest) -> Result<ToolReply, ToolError> {
        let mut inputs = Inputs::new(&self.policy);
        let setup = self.setup(req.workspace(), &mut inputs).await;
        let user = setup.env.get("P4USER").map(str::to_string);

        let res = match &req {
            ToolRequest::ConfigDetect(_) => return Ok(self.config_detect(&setup, inputs.warnings)),
            ToolRequest::AuditLogs(a) => {
                if !self.policy.audit().enabled() {
                    return Err(ToolError::AuditDisabled);
                }
                let entries = self.policy.audit().query(&AuditQuery {
                    tool: a.tool.clone(),
                    user: a.user.clone(),
                    result: a.result,
                    since: a.since,
                    limit: a.limit,
                });
                return Ok(ToolReply::data(json!({
                    "count": entries.len(),
                    "entries": entries,
                })));
            }
            ToolRequest::AuditExport(a) => {
                if !self.policy.audit().enabled() {
                    return Err(ToolError::AuditDisabled);
                }
                let data = self.policy.audit().export(a.format)?;
                return Ok(ToolReply::data(json!({ "format": a.format, "data": data })));
            }
            ToolRequest::ServerStatus(_) => return Ok(ToolReply::data(self.server_status())),
            ToolRequest::Status(_) => {
                let cmd = P4Command::new("opened").grammar(Grammar::Opened);
                not_opened_as_empty(self.run_in(&setup, &cmd).await).map_result(status_summary)
            }
            ToolRequest::Opened(_) => {
                let cmd = self.command_for(&req, &mut inputs)?;
                not_opened_as_empty(self.run_in(&setup, &cmd).await)
            }
            ToolRequest::ChangelistUpdate(a) => self.changelist_update(&setup, a, &mut inputs).await?,
            _ => {
                let cmd = self.command_for(&req, &mut inputs)?;
                self.run_in(&setup, &cmd).await
            }
        };
        let mut res = res;
        res.push_warnings(inputs.warnings);
        ToolReply::from_result(&res, user)
    }

    fn command_for(&self, req: &ToolRequest, inp: &mut Inputs<'_>) -> Result<P4Command, ToolError> {
        use ToolRequest as T;
        let cmd = match req {
            T::Info(_) => P4Command::new("info").grammar(Grammar::Info),
            T::Fstat(a) => P4Command::new("fstat")
                .format(OutputFormat::Tagged)
                .opt("-m", a.max)
                .args(inp.required_filespecs(&a.files)?),
            T::Add(a) => P4Command::new("add")
                .opt("-c", a.changelist.as_ref())
                .opt("-t", inp.opt_name("filetype", a.filetype.as_deref())?)
                .args(inp.required_filespecs(&a.files)?)
                .grammar(Grammar::FileActions),
            T::Edit(a) => P4Command::new("edit")
                .opt("-c", a.changelist.as_ref())
                .args(inp.required_filespecs(&a.files)?)
                .grammar(Grammar::FileActions),
            T::Delete(a) => P4Command::new("delete")
                .opt("-c", a.changelist.as_ref())
                .args(inp.required_filespecs(&a.files)?)
                .grammar(Grammar::FileActions),
            T::Revert(a) => {
                let files = if a.unchanged_only {
                    inp.filespecs(&a.files)?
                } else {
                    inp.required_filespecs(&a.files)?
                };
                P4Command::new("revert")
                    .flag("-a", a.unchanged_only)
                    .opt("-c", a.changelist.as_ref())
                    .args(files)
                    .grammar(Grammar::FileActions)
            }
            T::Sync(a) => P4Command::new("sync")
                .flag("-f", a.force)
                .flag("-n", a.preview)
                .args(inp.filespecs(&a.files)?)
                .grammar(Grammar::Sync),
            T::Opened(a) => P4Command::new("opened")
                .flag("-a", a.all_clients)
                .opt("-c", a.changelist.as_ref())
                .args(inp.filespecs(&a.files)?)
                .grammar(Grammar::Opened),
            T::Diff(a) => {
                let base = if a.summary_only {
                    P4Command::new("diff").arg("-sa")
                } else {
                    P4Command::new("diff").flag("-du", a.unified).grammar(Grammar::Diff)
                };
                base.args(inp.filespecs(&a.files)?)
            }
            T::Changes(a) => P4Command::new("changes")
                .opt("-s", a.status.map(|s| s.as_str()))
                .opt("-m", a.max)
                .opt("-u", inp.opt_name("user", a.user.as_deref())?)
                .opt("-c", inp.opt_name("client", a.client.as_deref())?)
                .flag("-l", a.long_description)
                .args(inp.filespecs(&a.files)?)
                .grammar(Grammar::Changes),
            T::Describe(a) => P4Command::new("describe")
                .flag("-s", !a.include_diff)
                .flag("-S", a.shelved)
                .arg(numbered("changelist", &a.changelist)?)
                .grammar(Grammar::Describe),
            T::Filelog(a) => P4Command::new("filelog")
                .opt("-m", a.max)
                .args(inp.required_filespecs(&a.files)?)
                .grammar(Grammar::Filelog),
            T::Clients(a) => P4Command::new("clients")
                .opt("-u", inp.opt_name("user", a.user.as_deref())?)
                .opt("-m", a.max)
                .opt("-E", inp.opt_name("nameFilter", a.name_filter.as_deref())?)
                .grammar(Grammar::Clients),
            T::Client(a) => P4Command::new("client")
                .arg("-o")
                .args(inp.opt_name("name", a.name.as_deref())?)
                .grammar(Grammar::SpecForm),
            T::ChangelistCreate(a) => {
                let description = inp.text("description", &a.description)?;
                let files = inp.filespecs(&a.files)?;
                P4Command::new("change")
                    .arg("-i")
                    .input(render_change_spec("new", &description, &files))
                    .grammar(Grammar::ChangeSaved)
            }
            T::ChangelistSubmit(a) => P4Command::new("submit")
                .arg("-c")
                .arg(numbered("changelist", &a.changelist)?)
                .grammar(Grammar::Submit),
            T::Submit(a) => P4Command::new("submit")
                .arg("-d")
                .arg(inp.text("description", &a.description)?)
                .args(inp.filespecs(&a.files)?)
                .grammar(Grammar::Submit),
            T::Resolve(a) => P4Command::new("resolve")
                .args(a.mode.map(|m| m.flag()))
                .flag("-n", a.preview)
                .args(inp.filespecs(&a.files)?)
                .grammar(Grammar::Resolve),
            T::Shelve(a) => P4Command::new("shelve")
                .flag("-f", a.force)
                .flag("-d", a.delete)
                .arg("-c")
                .arg(numbered("changelist", &a.changelist)?)
                .args(inp.filespecs(&a.files)?)
                .grammar(Grammar::Shelve),
            T::Unshelve(a) => P4Command::new("unshelve")
                .arg("-s")
                .arg(numbered("sourceChangelist", &a.source_changelist)?)
                .opt("-c", a.target_changelist.as_ref())
                .flag("-f", a.force)
                .args(inp.filespecs(&a.files)?)
                .grammar(Grammar::Unshelve),
            T::Blame(a) => P4Command::new("annotate")
                .flag("-c", a.show_change)
                .flag("-i", a.follow_integrations)
                .arg(inp.filespec("file", &a.file)?)
                .grammar(Grammar::Annotate),
            T::Copy(a) => P4Command::new("copy")
                .opt("-c", a.changelist.as_ref())
                .flag("-n", a.preview)
                .arg(inp.filespec("source", &a.source)?)
                .arg(inp.filespec("target", &a.target)?)
                .grammar(Grammar::Copy),
            T::Move(a) => P4Command::new("move")
                .opt("-c", a.changelist.as_ref())
                .arg(inp.filespec("source", &a.source)?)
                .arg(inp.filespec("target", &a.target)?)
                .grammar(Grammar::Move),
            T::Grep(a) => P4Command::new("grep")
                .arg("-n")
                .flag("-i", a.case_insensitive)
                .arg("-e")
                .arg(inp.check("pattern", &a.pattern, InputKind::Pattern)?)
                .args(inp.required_filespecs(&a.files)?)
                .grammar(Grammar::Grep),
            T::Files(a) => P4Command::new("files")
                .flag("-a", a.all_revisions)
                .opt("-m", a.max)
                .args(inp.required_filespecs(&a.files)?)
                .grammar(Grammar::Files),
            T::Dirs(a) => {
                if a.dirs.is_empty() {
                    return Err(ToolError::invalid("dirs must contain at least one path"));
                }
                let dirs = a
                    .dirs
                    .iter()
                    .map(|d| inp.filespec("dirs", d))
                    .collect::<Result<Vec<_>, _>>()?;
                P4Command::new("dirs").args(dirs).grammar(Grammar::Dirs)
            }
            T::Users(a) => P4Command::new("users")
                .opt("-m", a.max)
                .args(inp.opt_name("filter", a.filter.as_deref())?)
                .grammar(Grammar::Users),
            T::User(a) => P4Command::new("user")
                .arg("-o")
                .args(inp.opt_name("name", a.name.as_deref())?)
                .grammar(Grammar::SpecForm),
            T::Job(a) => P4Command::new("job")
                .arg("-o")
                .arg(inp.name("name", &a.name)?)
                .grammar(Grammar::SpecForm),
            T::Jobs(a) => P4Command::new("jobs")
                .opt("-e", a.expression.as_deref())
                .opt("-m", a.max)
                .grammar(Grammar::Jobs),
            T::Fixes(a) => P4Command::new("fixes")
                .opt("-c", a.changelist.as_ref())
                .opt("-j", inp.opt_name("job", a.job.as_deref())?)
                .args(inp.filespecs(&a.files)?)
                .grammar(Grammar::Fixes),
            T::Label(a) => P4Command::new("label")
                .arg("-o")
                .arg(inp.name("name", &a.name)?)
                .grammar(Grammar::SpecForm),
            T::Labels(a) => P4Command::new("labels")
                .opt("-u", inp.opt_name("user", a.user.as_deref())?)
                .opt("-m", a.max)
                .args(inp.filespecs(&a.files)?)
                .grammar(Grammar::Labels),
            T::Where(a) => P4Command::new("where")
                .args(inp.required_filespecs(&a.files)?)
                .grammar(Grammar::Where),
            T::Status(_)
            | T::ConfigDetect(_)
            | T::ChangelistUpdate(_)
            | T::AuditLogs(_)
            | T::AuditExport(_)
            | T::ServerStatus(_) => {
                return Err(ToolError::Internal(anyhow::anyhow!(
                    "tool has no single p4 command"
                )));
            }
        };
        Ok(cmd)
    }

    /// `change -o N`, merge the caller's edits into the form, `change -i`.
    async fn changelist_update(
        &self,
        setup: &CommandSetup,
        a: &ChangelistUpdateArgs,
        inp: &mut Inputs<'_>,
    ) -> Result<CommandResult, ToolError> {
        let change = numbered("changelist", &a.changelist)?;
        if a.description.is_none() && a.files.is_none() {
            return Err(ToolError::invalid("nothing to update: pass description and/or files"));
        }
        let description = a
            .description
            .as_deref()
            .map(|d| inp.text("description", d))
            .transpose()?;
        let files = a.files.as_deref().map(|f| inp.filespecs(f)).transpose()?;

        let read = P4Command::new("change")
            .arg("-o")
            .arg(&change)
            .grammar(Grammar::SpecForm);
        let current = self.run_in(setup, &read).await;
        let Some(form) = current.result().and_then(Value::as_object) else {
            return Ok(current);
        };

        let description = description.unwrap_or_else(|| {
            form.get("Description")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        });
        let files = files.unwrap_or_else(|| form_files(form));

        let write = P4Command::new("change")
            .arg("-i")
            .input(render_change_spec(&change, &description, &files))
            .grammar(Grammar::ChangeSaved);
        Ok(self.run_in(setup, &write).await)
    }

    fn config_detect(&self, setup: &CommandSetup, warnings: Vec<String>) -> ToolReply {
        let res = &setup.resolution;
        let redactor = self.runner.redactor();
        let config: BTreeMap<String, String> = res
            .config
            .iter()
            .map(|(k, v)| {
                let v = if k == "P4PASSWD" {
                    p4mcp_protocol::redaction::MASK.to_string()
                } else {
                    redactor.redact(v)
                };
                (k.clone(), v)
            })
            .collect();
        let validation = p4config::validate_environment(res, &p4config::process_env());
        let mut reply = ToolReply::data(json!({
            "found": res.found,
            "configPath": res.config_path,
            "projectRoot": res.project_root,
            "cwd": setup.cwd,
            "config": config,
            "environment": redactor.connection_details(setup.env.iter()),
            "validation": validation,
            "warnings": warnings,
        }));
        reply.user = setup.env.get("P4USER").map(str::to_string);
        reply
    }

    fn server_status(&self) -> Value {
        let policy = self.policy.config();
        json!({
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "readOnly": self.config.read_only,
            "deleteDisabled": self.config.delete_disabled,
            "features": {
                "auditLogging": policy.audit_enabled,
                "rateLimiting": policy.rate_limit_enabled,
                "memoryLimits": policy.memory_limits_enabled,
                "inputSanitization": policy.sanitization_enabled,
            },
            "runner": {
                "p4Path": self.runner.config().p4_bin,
                "timeoutMs": self.runner.config().timeout.map(|t| t.as_millis() as u64),
                "maxMemoryMb": self.runner.config().max_memory_mb,
            },
            "memory": self.policy.check_memory(),
            "gc": self.policy.force_gc(),
            "rateLimits": self.policy.rate_limiter().snapshot(),
        })
    }
}
