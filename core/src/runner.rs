use crate::config::RunnerConfig;
use crate::p4config::EffectiveEnv;
use crate::parse::{self, Grammar};
use crate::policy::memory::{MemoryProbe, SystemMemoryProbe};
use p4mcp_protocol::redaction::Redactor;
use p4mcp_protocol::{CommandError, CommandResult, ErrorCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};

/// Non-interactive script mode; every line comes back tagged.
const SCRIPT_FLAG: &str = "-s";
const TAGGED_FLAG: &str = "-ztag";
const MARSHAL_FLAG: &str = "-G";

const TERM_GRACE: Duration = Duration::from_secs(2);
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Subcommands whose output is not record-shaped, so `-ztag`/`-G` are not
/// added even when asked for.
const UNSTRUCTURED_SUBCOMMANDS: &[&str] = &[
    "annotate", "diff", "diff2", "grep", "help", "login", "logout", "print", "set", "tickets",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Tagged,
    Marshal,
}

/// One fully validated `p4` invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct P4Command {
    pub subcommand: String,
    pub args: Vec<String>,
    pub input: Option<String>,
    pub format: OutputFormat,
    pub grammar: Option<Grammar>,
    pub parse: bool,
    /// Overrides the runner default when set.
    pub timeout: Option<Duration>,
}

impl P4Command {
    pub fn new(subcommand: impl Into<String>) -> Self {
        Self {
            subcommand: subcommand.into(),
            args: Vec::new(),
            input: None,
            format: OutputFormat::Text,
            grammar: None,
            parse: true,
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Push `flag` only when `on`.
    pub fn flag(self, flag: &str, on: bool) -> Self {
        if on { self.arg(flag) } else { self }
    }

    /// Push `flag value` when a value is present.
    pub fn opt(self, flag: &str, value: Option<impl ToString>) -> Self {
        match value {
            Some(v) => self.arg(flag).arg(v.to_string()),
            None => self,
        }
    }

    pub fn input(mut self, input: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self
    }

    pub fn format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn grammar(mut self, grammar: Grammar) -> Self {
        self.grammar = Some(grammar);
        self
    }

    /// Return trimmed stdout instead of a parsed record.
    pub fn raw(mut self) -> Self {
        self.parse = false;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn structured(&self) -> bool {
        self.format != OutputFormat::Text
            && !UNSTRUCTURED_SUBCOMMANDS.contains(&self.subcommand.as_str())
    }

    /// Full argument vector after the executable.
    pub fn build_args(&self) -> Vec<String> {
        let mut out = vec![SCRIPT_FLAG.to_string()];
        if self.structured() {
            out.push(
                match self.format {
                    OutputFormat::Marshal => MARSHAL_FLAG,
                    _ => TAGGED_FLAG,
                }
                .to_string(),
            );
        }
        out.push(self.subcommand.clone());
        out.extend(self.args.iter().cloned());
        out
    }
}

static NOT_FOUND_SIGNATURES: &[&str] = &[
    "command not found",
    "not recognized as an internal or external command",
];
static AUTH_SIGNATURES: &[&str] = &[
    "perforce password (p4passwd) invalid or unset",
    "access denied",
    "session has expired",
    "please login again",
];
static CONNECTION_SIGNATURES: &[&str] = &[
    "connect to server failed",
    "check $p4port",
    "tcp connect to",
    "connection refused",
];
static TIMEOUT_SIGNATURES: &[&str] = &["timed out", "timeout"];
static NOT_UNDER_CLIENT_SIGNATURES: &[&str] = &["is not under client's root", "not in client view"];

fn client_unknown(lower: &str) -> bool {
    lower.contains("use 'client' command to create it")
        || lower
            .split("client '")
            .skip(1)
            .any(|rest| rest.split_once('\'').is_some_and(|(_, tail)| tail.trim_start().starts_with("unknown")))
}

/// Map a failed run onto a stable code. Order matters: the first matching
/// signature wins.
pub fn classify_failure(
    text: &str,
    exit_code: Option<i32>,
    timed_out: bool,
    spawn_error: Option<std::io::ErrorKind>,
) -> ErrorCode {
    let lower = text.to_ascii_lowercase();
    let any = |sigs: &[&str]| sigs.iter().any(|s| lower.contains(s));

    if spawn_error == Some(std::io::ErrorKind::NotFound) || any(NOT_FOUND_SIGNATURES) {
        return ErrorCode::NotFound;
    }
    if timed_out {
        return ErrorCode::Timeout;
    }
    if any(AUTH_SIGNATURES) {
        return ErrorCode::AuthFailed;
    }
    if client_unknown(&lower) {
        return ErrorCode::ClientUnknown;
    }
    if any(CONNECTION_SIGNATURES) {
        return ErrorCode::ConnectionFailed;
    }
    if any(TIMEOUT_SIGNATURES) {
        return ErrorCode::Timeout;
    }
    if any(NOT_UNDER_CLIENT_SIGNATURES) {
        return ErrorCode::NotUnderClient;
    }
    if exit_code == Some(127) {
        return ErrorCode::NotFound;
    }
    ErrorCode::CommandFailed
}

fn failure_message(code: ErrorCode, bin: &str, timeout: Option<Duration>) -> String {
    match code {
        ErrorCode::NotFound => format!("{bin} executable not found; install the Perforce CLI or set P4_PATH"),
        ErrorCode::AuthFailed => "Perforce authentication failed; run `p4 login`".to_string(),
        ErrorCode::ClientUnknown => "Perforce client workspace is unknown; check P4CLIENT".to_string(),
        ErrorCode::ConnectionFailed => "could not connect to the Perforce server; check P4PORT".to_string(),
        ErrorCode::Timeout => match timeout {
            Some(t) => format!("p4 command timed out after {} ms", t.as_millis()),
            None => "p4 command timed out".to_string(),
        },
        ErrorCode::NotUnderClient => "path is not under the client workspace root or view".to_string(),
        _ => "p4 command failed".to_string(),
    }
}

fn warning_lines(text: &str) -> impl Iterator<Item = String> + '_ {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
}

async fn read_all<R: AsyncRead + Unpin>(mut reader: R) -> String {
    let mut buf = Vec::new();
    let _ = reader.read_to_end(&mut buf).await;
    String::from_utf8_lossy(&buf).into_owned()
}

async fn drain(task: Option<tokio::task::JoinHandle<String>>) -> String {
    let Some(task) = task else {
        return String::new();
    };
    match tokio::time::timeout(DRAIN_TIMEOUT, task).await {
        Ok(Ok(s)) => s,
        _ => String::new(),
    }
}

/// SIGTERM first, then a hard kill if the process ignores it.
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        if tokio::time::timeout(TERM_GRACE, child.wait()).await.is_ok() {
            return;
        }
    }
    let _ = child.kill().await;
}

/// Spawns `p4` and folds every outcome into a [`CommandResult`].
pub struct Runner {
    config: RunnerConfig,
    redactor: Redactor,
    probe: Arc<dyn MemoryProbe>,
}

impl Runner {
    pub fn new(config: RunnerConfig) -> anyhow::Result<Self> {
        Self::with_probe(config, Arc::new(SystemMemoryProbe))
    }

    pub fn with_probe(config: RunnerConfig, probe: Arc<dyn MemoryProbe>) -> anyhow::Result<Self> {
        let redactor = Redactor::new(&config.redaction_extra_regex)?;
        Ok(Self {
            config,
            redactor,
            probe,
        })
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn redactor(&self) -> &Redactor {
        &self.redactor
    }

    fn memory_preflight(&self) -> Option<CommandError> {
        if !self.config.memory_limits_enabled {
            return None;
        }
        let rss_mb = self.probe.snapshot().rss_mb();
        if rss_mb <= self.config.max_memory_mb as f64 {
            return None;
        }
        tracing::warn!(rss_mb, limit_mb = self.config.max_memory_mb, "refusing to spawn p4");
        Some(CommandError::new(
            ErrorCode::MemoryLimitExceeded,
            format!(
                "process memory {rss_mb:.1} MB exceeds limit of {} MB",
                self.config.max_memory_mb
            ),
        ))
    }

    pub async fn run(&self, cmd: &P4Command, cwd: &Path, env: &EffectiveEnv) -> CommandResult {
        let args = cmd.build_args();
        let bin = self.config.p4_bin.clone();
        let cwd_str = cwd.display().to_string();
        let echo: BTreeMap<String, String> = self.redactor.connection_details(env.iter());
        let fail = |error: CommandError| {
            CommandResult::failure(bin.clone(), args.clone(), cwd_str.clone(), echo.clone(), error)
        };

        if let Some(err) = self.memory_preflight() {
            return fail(err);
        }

        let timeout = cmd.timeout.or(self.config.timeout);
        tracing::debug!(subcommand = %cmd.subcommand, ?args, cwd = %cwd_str, "spawning p4");

        let mut command = Command::new(&bin);
        command
            .args(&args)
            .current_dir(cwd)
            .envs(env.iter())
            .stdin(if cmd.input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(windows)]
        command.creation_flags(CREATE_NO_WINDOW);

        let mut child = match command.spawn() {
            Ok(c) => c,
            Err(e) => {
                let text = e.to_string();
                let code = classify_failure(&text, None, false, Some(e.kind()));
                return fail(
                    CommandError::new(code, failure_message(code, &bin, timeout))
                        .with_details(self.redactor.redact(&text)),
                );
            }
        };

        if let (Some(input), Some(mut stdin)) = (cmd.input.clone(), child.stdin.take()) {
            tokio::spawn(async move {
                let _ = stdin.write_all(input.as_bytes()).await;
                let _ = stdin.shutdown().await;
            });
        }
        let stdout_task = child.stdout.take().map(|s| tokio::spawn(read_all(s)));
        let stderr_task = child.stderr.take().map(|s| tokio::spawn(read_all(s)));

        let waited = match timeout {
            Some(t) => tokio::time::timeout(t, child.wait()).await.ok(),
            None => Some(child.wait().await),
        };
        let (status, timed_out) = match waited {
            Some(res) => (res, false),
            None => {
                tracing::warn!(subcommand = %cmd.subcommand, ?timeout, "p4 timed out");
                terminate(&mut child).await;
                (Err(std::io::Error::other("timed out")), true)
            }
        };

        let stdout = drain(stdout_task).await;
        let stderr = drain(stderr_task).await;
        let script = parse::normalize_script_output(&stdout);

        let exit_code = match &status {
            Ok(s) => match (s.code(), script.exit) {
                (Some(0), Some(n)) if n != 0 => Some(n),
                (code, _) => code,
            },
            Err(_) => None,
        };

        if exit_code != Some(0) || timed_out {
            let combined = format!("{}\n{}", stderr.trim(), stdout.trim());
            let code = classify_failure(&combined, exit_code, timed_out, None);
            let mut error = CommandError::new(code, failure_message(code, &bin, timeout))
                .with_details(self.redactor.redact(combined.trim()));
            error.exit_code = exit_code;
            return fail(error);
        }

        let result = self.shape(cmd, &stdout, &script.body);
        let warnings = warning_lines(&stderr)
            .chain(script.messages.iter().flat_map(|m| warning_lines(m)))
            .map(|w| self.redactor.redact(&w))
            .collect();
        CommandResult::success(bin.clone(), args.clone(), cwd_str.clone(), echo.clone(), result, warnings)
    }

    fn shape(&self, cmd: &P4Command, raw_stdout: &str, body: &str) -> Value {
        if !cmd.parse {
            return Value::String(body.trim().to_string());
        }
        if cmd.structured() {
            return match cmd.format {
                OutputFormat::Marshal => parse::unparsed_marshal(raw_stdout),
                _ => parse::tagged::parse_tagged(body),
            };
        }
        match cmd.grammar {
            Some(g) => g.apply(body),
            None => Value::String(body.trim().to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::memory::MemorySnapshot;
    use serde_json::json;

    struct FixedProbe(u64);

    impl MemoryProbe for FixedProbe {
        fn snapshot(&self) -> MemorySnapshot {
            MemorySnapshot {
                rss_bytes: self.0 * 1024 * 1024,
                heap_used_bytes: 0,
            }
        }
    }

    fn env() -> EffectiveEnv {
        let config = BTreeMap::from([
            ("P4PORT".to_string(), "ssl:perforce:1666".to_string()),
            ("P4USER".to_string(), "bob".to_string()),
            ("P4PASSWD".to_string(), "hunter2".to_string()),
        ]);
        EffectiveEnv::assemble(".p4config", &BTreeMap::new(), &config, &BTreeMap::new())
    }

    #[test]
    fn args_get_script_and_structure_flags() {
        let cmd = P4Command::new("fstat")
            .format(OutputFormat::Tagged)
            .arg("//depot/a.c");
        assert_eq!(cmd.build_args(), vec!["-s", "-ztag", "fstat", "//depot/a.c"]);

        let cmd = P4Command::new("changes").format(OutputFormat::Marshal);
        assert_eq!(cmd.build_args(), vec!["-s", "-G", "changes"]);

        let cmd = P4Command::new("diff")
            .format(OutputFormat::Tagged)
            .flag("-du", true)
            .flag("-sa", false)
            .opt("-c", None::<u32>);
        assert_eq!(cmd.build_args(), vec!["-s", "diff", "-du"]);

        let cmd = P4Command::new("changes").opt("-m", Some(5));
        assert_eq!(cmd.build_args(), vec!["-s", "changes", "-m", "5"]);
    }

    #[test]
    fn classification_order() {
        use std::io::ErrorKind;
        assert_eq!(
            classify_failure("", None, false, Some(ErrorKind::NotFound)),
            ErrorCode::NotFound
        );
        assert_eq!(
            classify_failure("sh: p4: command not found", Some(127), false, None),
            ErrorCode::NotFound
        );
        assert_eq!(classify_failure("", Some(127), false, None), ErrorCode::NotFound);
        assert_eq!(
            classify_failure("Access denied", Some(1), true, None),
            ErrorCode::Timeout
        );
        assert_eq!(
            classify_failure("Access denied", Some(1), false, None),
            ErrorCode::AuthFailed
        );
        assert_eq!(
            classify_failure("Perforce password (P4PASSWD) invalid or unset.", Some(1), false, None),
            ErrorCode::AuthFailed
        );
        assert_eq!(
            classify_failure("Your session has expired, please login again.", Some(1), false, None),
            ErrorCode::AuthFailed
        );
        assert_eq!(
            classify_failure("Client 'ws1' unknown - use 'client' command to create it.", Some(1), false, None),
            ErrorCode::ClientUnknown
        );
        assert_eq!(
            classify_failure(
                "Perforce client error:\n\tConnect to server failed; check $P4PORT.\n\tTCP connect to perforce:1666 failed.",
                Some(1),
                false,
                None
            ),
            ErrorCode::ConnectionFailed
        );
        assert_eq!(
            classify_failure("//ws/x.c - file(s) not in client view.", Some(1), false, None),
            ErrorCode::NotUnderClient
        );
        assert_eq!(
            classify_failure("Path '/tmp/x' is not under client's root '/ws'.", Some(1), false, None),
            ErrorCode::NotUnderClient
        );
        assert_eq!(
            classify_failure("no such changelist", Some(1), false, None),
            ErrorCode::CommandFailed
        );
    }

    #[tokio::test]
    async fn memory_preflight_refuses_to_spawn() {
        let config = RunnerConfig {
            p4_bin: "/definitely/not/here/p4".into(),
            max_memory_mb: 100,
            ..Default::default()
        };
        let runner = Runner::with_probe(config, Arc::new(FixedProbe(200))).unwrap();
        let res = runner.run(&P4Command::new("info"), Path::new("."), &env()).await;
        assert!(!res.ok);
        assert_eq!(res.error().unwrap().code, ErrorCode::MemoryLimitExceeded);
    }

    #[tokio::test]
    async fn missing_executable_is_not_found() {
        let config = RunnerConfig {
            p4_bin: "/definitely/not/here/p4".into(),
            ..Default::default()
        };
        let runner = Runner::with_probe(config, Arc::new(FixedProbe(1))).unwrap();
        let res = runner.run(&P4Command::new("info"), Path::new("."), &env()).await;
        assert_eq!(res.error().unwrap().code, ErrorCode::NotFound);
        assert_eq!(res.args, vec!["-s", "info"]);
        assert_eq!(res.env.get("P4PASSWD").map(String::as_str), Some("********"));
        assert_eq!(res.env.get("P4CONFIG").map(String::as_str), Some(".p4config"));
    }

    #[cfg(unix)]
    mod fake_p4 {
        use super::*;
        use std::os::unix::fs::PermissionsExt;

        fn script(dir: &tempfile::TempDir, body: &str) -> String {
            let path = dir.path().join("p4");
            std::fs::write(&path, format!("#!/bin/sh\n{body}")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path.display().to_string()
        }

        fn runner(bin: String, timeout: Option<Duration>) -> Runner {
            let config = RunnerConfig {
                p4_bin: bin,
                timeout,
                ..Default::default()
            };
            Runner::with_probe(config, Arc::new(FixedProbe(1))).unwrap()
        }

        #[tokio::test]
        async fn success_parses_and_surfaces_warnings() {
            let dir = tempfile::tempdir().unwrap();
            let bin = script(
                &dir,
                "echo 'info: User name: bob'\necho 'info: Client name: ws1'\necho 'warning: password=hunter2 is weak'\necho 'exit: 0'\necho 'slow server' >&2\n",
            );
            let res = runner(bin, None)
                .run(&P4Command::new("info").grammar(Grammar::Info), dir.path(), &env())
                .await;
            assert!(res.ok, "{res:?}");
            assert_eq!(res.result().unwrap()["userName"], json!("bob"));
            assert_eq!(res.result().unwrap()["clientName"], json!("ws1"));
            assert_eq!(res.warnings().len(), 2);
            assert_eq!(res.warnings()[0], "slow server");
            assert!(!res.warnings()[1].contains("hunter2"));
        }

        #[tokio::test]
        async fn tagged_output_becomes_records() {
            let dir = tempfile::tempdir().unwrap();
            let bin = script(
                &dir,
                "echo 'info1: depotFile //depot/a.c'\necho 'info1: headRev 4'\necho 'info1: depotFile //depot/b.c'\necho 'info1: headRev 2'\necho 'exit: 0'\n",
            );
            let res = runner(bin, None)
                .run(&P4Command::new("fstat").format(OutputFormat::Tagged), dir.path(), &env())
                .await;
            assert_eq!(
                res.result().unwrap(),
                &json!([
                    {"depotFile": "//depot/a.c", "headRev": 4},
                    {"depotFile": "//depot/b.c", "headRev": 2}
                ])
            );
            assert_eq!(res.args[..2], ["-s", "-ztag"]);
        }

        #[tokio::test]
        async fn stdin_is_passed_through() {
            let dir = tempfile::tempdir().unwrap();
            let bin = script(&dir, "sed 's/^/info: /'\n");
            let res = runner(bin, None)
                .run(
                    &P4Command::new("change").arg("-i").input("Change: new\nStatus: new\n").raw(),
                    dir.path(),
                    &env(),
                )
                .await;
            assert_eq!(res.result().unwrap(), &json!("Change: new\nStatus: new"));
        }

        #[tokio::test]
        async fn script_exit_code_marks_failure() {
            let dir = tempfile::tempdir().unwrap();
            let bin = script(
                &dir,
                "echo 'error: Perforce password (P4PASSWD) invalid or unset.'\necho 'exit: 1'\nexit 0\n",
            );
            let res = runner(bin, None)
                .run(&P4Command::new("opened"), dir.path(), &env())
                .await;
            let err = res.error().unwrap();
            assert_eq!(err.code, ErrorCode::AuthFailed);
            assert_eq!(err.exit_code, Some(1));
            assert!(err.details.as_deref().unwrap().contains("P4PASSWD"));
        }

        #[tokio::test]
        async fn access_denied_on_stderr_is_auth_failure() {
            let dir = tempfile::tempdir().unwrap();
            let bin = script(&dir, "echo 'Access denied.' >&2\nexit 1\n");
            let res = runner(bin, None)
                .run(&P4Command::new("changes"), dir.path(), &env())
                .await;
            let err = res.error().unwrap();
            assert_eq!(err.code, ErrorCode::AuthFailed);
            assert_eq!(err.exit_code, Some(1));
        }

        #[tokio::test]
        async fn hung_process_times_out() {
            let dir = tempfile::tempdir().unwrap();
            let bin = script(&dir, "exec sleep 10\n");
            let started = std::time::Instant::now();
            let res = runner(bin, Some(Duration::from_millis(200)))
                .run(&P4Command::new("sync"), dir.path(), &env())
                .await;
            assert_eq!(res.error().unwrap().code, ErrorCode::Timeout);
            assert!(started.elapsed() < Duration::from_secs(5));
        }
    }
}
