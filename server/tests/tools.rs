use p4mcp_server::{ServerConfig, Tools, rpc};
use serde_json::{Value, json};

fn config(read_only: bool, delete_disabled: bool) -> ServerConfig {
    let mut cfg = ServerConfig {
        read_only,
        delete_disabled,
        ..Default::default()
    };
    cfg.runner.memory_limits_enabled = false;
    cfg.runner.p4_bin = "/definitely/not/here/p4".into();
    cfg
}

fn code(payload: &Value) -> &str {
    payload["error"]["code"].as_str().unwrap_or_default()
}

#[tokio::test]
async fn read_only_blocks_writes_before_delete_check() {
    let tools = Tools::new(config(true, true)).unwrap();

    let edit = tools.call("p4_edit", json!({"files": ["//depot/a.c"]})).await;
    assert!(edit.is_error);
    assert_eq!(code(&edit.payload), "P4_READONLY_MODE");

    let delete = tools.call("p4_delete", json!({"files": ["//depot/a.c"]})).await;
    assert_eq!(code(&delete.payload), "P4_READONLY_MODE");

    let shelve_delete = tools
        .call("p4_shelve", json!({"changelist": 5, "delete": true}))
        .await;
    assert_eq!(code(&shelve_delete.payload), "P4_READONLY_MODE");
}

#[tokio::test]
async fn delete_disabled_only_blocks_deletes() {
    let tools = Tools::new(config(false, true)).unwrap();

    let delete = tools.call("p4_delete", json!({"files": ["//depot/a.c"]})).await;
    assert_eq!(code(&delete.payload), "P4_DELETE_DISABLED");

    // Passes the gate and fails on the missing executable instead.
    let edit = tools.call("p4_edit", json!({"files": ["//depot/a.c"]})).await;
    assert_eq!(code(&edit.payload), "P4_NOT_FOUND");
}

#[tokio::test]
async fn bad_arguments_are_rejected_before_spawning() {
    let tools = Tools::new(config(true, true)).unwrap();

    let missing = tools.call("p4_describe", json!({})).await;
    assert_eq!(code(&missing.payload), "P4_INVALID_ARGS");

    let flag = tools.call("p4_fstat", json!({"files": ["-m1"]})).await;
    assert_eq!(code(&flag.payload), "P4_INVALID_ARGS");

    let redos = tools
        .call("p4_grep", json!({"pattern": "(a+)+$", "files": ["//depot/..."]}))
        .await;
    assert_eq!(code(&redos.payload), "P4_INVALID_ARGS");

    let traversal = tools
        .call("p4_files", json!({"files": ["//depot/../secret/..."]}))
        .await;
    assert_eq!(code(&traversal.payload), "P4_INVALID_ARGS");
}

#[tokio::test]
async fn audit_tools_report_disabled() {
    let mut cfg = config(true, true);
    cfg.policy.audit_enabled = false;
    let tools = Tools::new(cfg).unwrap();

    let logs = tools.call("p4_audit_logs", json!({})).await;
    assert_eq!(code(&logs.payload), "AUDIT_DISABLED");
    let export = tools.call("p4_audit_export", json!({"format": "csv"})).await;
    assert_eq!(code(&export.payload), "AUDIT_DISABLED");
}

#[tokio::test]
async fn audit_export_csv_after_calls() {
    let tools = Tools::new(config(true, true)).unwrap();
    rpc::call_tool(&tools, "p4_server_status", json!({})).await;
    rpc::call_tool(&tools, "p4_edit", json!({"files": ["//depot/a.c"]})).await;

    let logs = tools.call("p4_audit_logs", json!({"result": "error"})).await;
    assert_eq!(logs.payload["count"], json!(1));
    assert_eq!(logs.payload["entries"][0]["tool"], json!("p4_edit"));

    let export = tools.call("p4_audit_export", json!({"format": "csv"})).await;
    let csv = export.payload["data"].as_str().unwrap();
    assert!(csv.starts_with("id,timestamp,tool,user,result,errorCode,durationMs,rssMb,heapUsedMb\n"));
    assert_eq!(csv.lines().count(), 3);
}

#[cfg(unix)]
mod with_fake_p4 {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    const FAKE_P4: &str = r#"#!/bin/sh
shift
[ "$1" = "-ztag" ] && shift
sub="$1"; shift
case "$sub" in
  info)
    echo "info: User name: $P4USER"
    echo "info: Client name: $P4CLIENT"
    echo "info: Server address: $P4PORT"
    ;;
  opened)
    echo "info: //depot/main/a.c#3 - edit default change (text)"
    echo "info: //depot/main/b.c#1 - add change 12 (text)"
    echo "info: //depot/main/c.c#2 - edit change 12 (text)"
    ;;
  change)
    if [ "$1" = "-i" ]; then
      cat > "$(dirname "$0")/last-spec"
      echo "info: Change 77 created."
    fi
    ;;
  edit)
    for f in "$@"; do echo "info: $f#3 - opened for edit"; done
    ;;
  *)
    echo "error: unknown command $sub"
    echo "exit: 1"
    exit 1
    ;;
esac
echo "exit: 0"
"#;

    struct Fixture {
        dir: tempfile::TempDir,
        workspace: std::path::PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("p4");
        std::fs::write(&bin, FAKE_P4).unwrap();
        std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();

        let workspace = dir.path().join("ws");
        let nested = workspace.join("src").join("lib");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(
            workspace.join(".p4config"),
            "P4PORT=ssl:perforce.example.com:1666\nP4USER=bob\nP4CLIENT=bob-ws\nP4PASSWD=hunter2\n",
        )
        .unwrap();
        Fixture { dir, workspace }
    }

    fn tools(fx: &Fixture, read_only: bool) -> Tools {
        let mut cfg = config(read_only, true);
        cfg.runner.p4_bin = fx.dir.path().join("p4").display().to_string();
        Tools::new(cfg).unwrap()
    }

    #[tokio::test]
    async fn info_uses_discovered_config() {
        let fx = fixture();
        let nested = fx.workspace.join("src").join("lib");
        let reply = tools(&fx, true)
            .call("p4_info", json!({"workspacePath": nested}))
            .await;
        assert!(!reply.is_error, "{}", reply.payload);
        let p = &reply.payload;
        assert_eq!(p["result"]["userName"], json!("bob"));
        assert_eq!(p["result"]["clientName"], json!("bob-ws"));
        assert_eq!(p["env"]["P4PASSWD"], json!("********"));
        assert_eq!(p["env"]["P4CONFIG"], json!(".p4config"));
        assert!(p["configFile"].as_str().unwrap().ends_with(".p4config"));
        assert_eq!(p["args"], json!(["-s", "info"]));
        assert_eq!(reply.user.as_deref(), Some("bob"));
    }

    #[tokio::test]
    async fn absolute_workspace_path_is_flagged() {
        let fx = fixture();
        let tools = tools(&fx, true);
        let flagged = |payload: &Value| {
            payload["warnings"]
                .as_array()
                .unwrap()
                .iter()
                .any(|w| w.as_str().unwrap_or_default().contains("absolute local path"))
        };

        let info = tools.call("p4_info", json!({"workspacePath": fx.workspace})).await;
        assert!(!info.is_error, "{}", info.payload);
        assert!(flagged(&info.payload), "{}", info.payload);

        let detect = tools
            .call("p4_config_detect", json!({"workspacePath": fx.workspace}))
            .await;
        assert!(flagged(&detect.payload), "{}", detect.payload);
    }

    #[tokio::test]
    async fn status_summarizes_opened_files() {
        let fx = fixture();
        let reply = tools(&fx, true)
            .call("p4_status", json!({"workspacePath": fx.workspace}))
            .await;
        let summary = &reply.payload["result"]["summary"];
        assert_eq!(summary["total"], json!(3));
        assert_eq!(summary["byAction"]["edit"], json!(2));
        assert_eq!(summary["byChange"]["12"], json!(2));
        assert_eq!(summary["byChange"]["default"], json!(1));
    }

    #[tokio::test]
    async fn changelist_create_feeds_spec_on_stdin() {
        let fx = fixture();
        let reply = tools(&fx, false)
            .call(
                "p4_changelist_create",
                json!({"workspacePath": fx.workspace, "description": "Fix loader crash"}),
            )
            .await;
        assert!(!reply.is_error, "{}", reply.payload);
        assert_eq!(reply.payload["result"]["change"], json!(77));
        assert_eq!(reply.payload["result"]["action"], json!("created"));

        let spec = std::fs::read_to_string(fx.dir.path().join("last-spec")).unwrap();
        assert!(spec.starts_with("Change:\tnew\n"));
        assert!(spec.contains("\tFix loader crash\n"));
    }

    #[tokio::test]
    async fn edit_runs_when_writes_allowed() {
        let fx = fixture();
        let reply = tools(&fx, false)
            .call(
                "p4_edit",
                json!({"workspacePath": fx.workspace, "files": ["//depot/main/a.c"], "changelist": 12}),
            )
            .await;
        assert!(!reply.is_error, "{}", reply.payload);
        assert_eq!(reply.payload["args"], json!(["-s", "edit", "-c", "12", "//depot/main/a.c"]));
        assert_eq!(reply.payload["result"][0]["action"], json!("edit"));
    }

    #[tokio::test]
    async fn unknown_subcommand_maps_to_command_failed() {
        let fx = fixture();
        let reply = tools(&fx, true)
            .call("p4_users", json!({"workspacePath": fx.workspace}))
            .await;
        assert!(reply.is_error);
        assert_eq!(code(&reply.payload), "P4_COMMAND_FAILED");
        assert_eq!(reply.payload["error"]["exitCode"], json!(1));
    }

    #[tokio::test]
    async fn config_detect_masks_password() {
        let fx = fixture();
        let reply = tools(&fx, true)
            .call("p4_config_detect", json!({"workspacePath": fx.workspace}))
            .await;
        let p = &reply.payload;
        assert_eq!(p["found"], json!(true));
        assert_eq!(p["config"]["P4PASSWD"], json!("********"));
        assert_eq!(p["config"]["P4USER"], json!("bob"));
        assert_eq!(p["environment"]["P4CLIENT"], json!("bob-ws"));
    }
}
