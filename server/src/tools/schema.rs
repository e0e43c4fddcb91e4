use serde_json::{Map, Value, json};

pub const TOOL_NAMES: &[&str] = &[
    "p4_info",
    "p4_status",
    "p4_fstat",
    "p4_add",
    "p4_edit",
    "p4_delete",
    "p4_revert",
    "p4_sync",
    "p4_opened",
    "p4_diff",
    "p4_changes",
    "p4_describe",
    "p4_filelog",
    "p4_clients",
    "p4_client",
    "p4_config_detect",
    "p4_changelist_create",
    "p4_changelist_update",
    "p4_changelist_submit",
    "p4_submit",
    "p4_resolve",
    "p4_shelve",
    "p4_unshelve",
    "p4_blame",
    "p4_copy",
    "p4_move",
    "p4_grep",
    "p4_files",
    "p4_dirs",
    "p4_users",
    "p4_user",
    "p4_job",
    "p4_jobs",
    "p4_fixes",
    "p4_label",
    "p4_labels",
    "p4_where",
    "p4_audit_logs",
    "p4_audit_export",
    "p4_server_status",
];

fn s(description: &str) -> Value {
    json!({ "type": "string", "description": description })
}

fn b(description: &str) -> Value {
    json!({ "type": "boolean", "description": description })
}

fn n(description: &str) -> Value {
    json!({ "type": "integer", "minimum": 1, "description": description })
}

fn files(description: &str) -> Value {
    json!({ "type": "array", "items": { "type": "string" }, "description": description })
}

fn change(description: &str) -> Value {
    json!({ "type": ["integer", "string"], "description": description })
}

fn tool(name: &str, description: &str, props: Value, required: &[&str]) -> Value {
    let mut properties = match props {
        Value::Object(m) => m,
        _ => Map::new(),
    };
    properties.insert(
        "workspacePath".to_string(),
        s("Directory to start the P4CONFIG search from (default: server cwd)"),
    );
    json!({
        "name": name,
        "description": description,
        "inputSchema": {
            "type": "object",
            "properties": properties,
            "required": required,
        }
    })
}

pub fn tool_list_result() -> Value {
    let tools = vec![
        tool("p4_info", "Show client and server information (`p4 info`).", json!({}), &[]),
        tool(
            "p4_status",
            "Files opened in the current workspace with counts by action and changelist.",
            json!({}),
            &[],
        ),
        tool(
            "p4_fstat",
            "File metadata as tagged records (`p4 -ztag fstat`).",
            json!({ "files": files("Filespecs"), "max": n("Maximum files (-m)") }),
            &["files"],
        ),
        tool(
            "p4_add",
            "Open new files for add. Blocked in read-only mode.",
            json!({
                "files": files("Local paths or filespecs"),
                "changelist": change("Target changelist number or \"default\""),
                "filetype": s("Perforce filetype (-t), e.g. text or binary+l"),
            }),
            &["files"],
        ),
        tool(
            "p4_edit",
            "Open files for edit. Blocked in read-only mode.",
            json!({ "files": files("Filespecs"), "changelist": change("Target changelist") }),
            &["files"],
        ),
        tool(
            "p4_delete",
            "Open files for delete. Blocked in read-only mode or when deletes are disabled.",
            json!({ "files": files("Filespecs"), "changelist": change("Target changelist") }),
            &["files"],
        ),
        tool(
            "p4_revert",
            "Discard changes to opened files. Blocked in read-only mode.",
            json!({
                "files": files("Filespecs (optional with unchangedOnly)"),
                "unchangedOnly": b("Only revert unchanged files (-a)"),
                "changelist": change("Limit to a changelist (-c)"),
            }),
            &[],
        ),
        tool(
            "p4_sync",
            "Sync workspace files to the depot. Preview mode is read-only.",
            json!({
                "files": files("Filespecs (default: whole workspace)"),
                "force": b("Force resync (-f)"),
                "preview": b("Show what would change (-n)"),
            }),
            &[],
        ),
        tool(
            "p4_opened",
            "List opened files.",
            json!({
                "files": files("Filespecs"),
                "allClients": b("Files opened in any workspace (-a)"),
                "changelist": change("Limit to a changelist (-c)"),
            }),
            &[],
        ),
        tool(
            "p4_diff",
            "Diff opened files against the depot.",
            json!({
                "files": files("Filespecs"),
                "unified": b("Unified format (-du), default true"),
                "summaryOnly": b("Only list opened files that differ (-sa)"),
            }),
            &[],
        ),
        tool(
            "p4_changes",
            "List changelists.",
            json!({
                "files": files("Filespecs"),
                "status": { "type": "string", "enum": ["pending", "submitted", "shelved"] },
                "max": n("Maximum changelists (-m)"),
                "user": s("Owner (-u)"),
                "client": s("Workspace (-c)"),
                "longDescription": b("Full descriptions (-l)"),
            }),
            &[],
        ),
        tool(
            "p4_describe",
            "Describe a changelist.",
            json!({
                "changelist": change("Changelist number"),
                "includeDiff": b("Include file diffs (omits -s)"),
                "shelved": b("Describe shelved files (-S)"),
            }),
            &["changelist"],
        ),
        tool(
            "p4_filelog",
            "Revision history with integrations.",
            json!({ "files": files("Filespecs"), "max": n("Maximum revisions (-m)") }),
            &["files"],
        ),
        tool(
            "p4_clients",
            "List workspaces.",
            json!({
                "user": s("Owner (-u)"),
                "max": n("Maximum workspaces (-m)"),
                "nameFilter": s("Case-insensitive name filter (-E)"),
            }),
            &[],
        ),
        tool(
            "p4_client",
            "Show a workspace spec (`p4 client -o`).",
            json!({ "name": s("Workspace name (default: current)") }),
            &[],
        ),
        tool(
            "p4_config_detect",
            "Locate the P4CONFIG file and report the resolved connection settings.",
            json!({}),
            &[],
        ),
        tool(
            "p4_changelist_create",
            "Create a pending changelist. Blocked in read-only mode.",
            json!({
                "description": s("Changelist description"),
                "files": files("Opened files to move into the new changelist"),
            }),
            &["description"],
        ),
        tool(
            "p4_changelist_update",
            "Update a pending changelist's description and/or files. Blocked in read-only mode.",
            json!({
                "changelist": change("Changelist number"),
                "description": s("New description"),
                "files": files("Replacement file list"),
            }),
            &["changelist"],
        ),
        tool(
            "p4_changelist_submit",
            "Submit a pending changelist. Blocked in read-only mode.",
            json!({ "changelist": change("Changelist number") }),
            &["changelist"],
        ),
        tool(
            "p4_submit",
            "Submit the default changelist with a description. Blocked in read-only mode.",
            json!({ "description": s("Submit description"), "files": files("Limit to filespecs") }),
            &["description"],
        ),
        tool(
            "p4_resolve",
            "Resolve integrated files. Blocked in read-only mode.",
            json!({
                "files": files("Filespecs"),
                "mode": { "type": "string", "enum": ["auto", "safe", "theirs", "yours", "force"] },
                "preview": b("Show what would be resolved (-n)"),
            }),
            &[],
        ),
        tool(
            "p4_shelve",
            "Shelve files of a pending changelist; with delete, remove the shelf.",
            json!({
                "changelist": change("Changelist number"),
                "files": files("Filespecs"),
                "force": b("Overwrite an existing shelf (-f)"),
                "delete": b("Delete shelved files (-d)"),
            }),
            &["changelist"],
        ),
        tool(
            "p4_unshelve",
            "Restore shelved files into the workspace. Blocked in read-only mode.",
            json!({
                "sourceChangelist": change("Shelved changelist (-s)"),
                "targetChangelist": change("Changelist to open files in (-c)"),
                "files": files("Filespecs"),
                "force": b("Overwrite writable files (-f)"),
            }),
            &["sourceChangelist"],
        ),
        tool(
            "p4_blame",
            "Line-by-line origin of a file (`p4 annotate`).",
            json!({
                "file": s("Filespec"),
                "showChange": b("Show changelist numbers instead of revisions (-c)"),
                "followIntegrations": b("Follow integrations (-i)"),
            }),
            &["file"],
        ),
        tool(
            "p4_copy",
            "Copy files between branches. Blocked in read-only mode.",
            json!({
                "source": s("Source filespec"),
                "target": s("Target filespec"),
                "changelist": change("Target changelist"),
                "preview": b("Preview only (-n)"),
            }),
            &["source", "target"],
        ),
        tool(
            "p4_move",
            "Move or rename an opened file. Blocked in read-only mode.",
            json!({
                "source": s("Source filespec"),
                "target": s("Target filespec"),
                "changelist": change("Target changelist"),
            }),
            &["source", "target"],
        ),
        tool(
            "p4_grep",
            "Search depot file contents (`p4 grep -n -e`).",
            json!({
                "pattern": s("Regular expression"),
                "files": files("Filespecs"),
                "caseInsensitive": b("Ignore case (-i)"),
            }),
            &["pattern", "files"],
        ),
        tool(
            "p4_files",
            "List depot files.",
            json!({
                "files": files("Filespecs"),
                "allRevisions": b("All revisions (-a)"),
                "max": n("Maximum files (-m)"),
            }),
            &["files"],
        ),
        tool(
            "p4_dirs",
            "List depot subdirectories.",
            json!({ "dirs": files("Directory specs, e.g. //depot/*") }),
            &["dirs"],
        ),
        tool(
            "p4_users",
            "List users.",
            json!({ "filter": s("User name filter"), "max": n("Maximum users (-m)") }),
            &[],
        ),
        tool(
            "p4_user",
            "Show a user spec (`p4 user -o`).",
            json!({ "name": s("User name (default: current)") }),
            &[],
        ),
        tool("p4_job", "Show a job spec (`p4 job -o`).", json!({ "name": s("Job name") }), &["name"]),
        tool(
            "p4_jobs",
            "List jobs.",
            json!({ "expression": s("Job filter expression (-e)"), "max": n("Maximum jobs (-m)") }),
            &[],
        ),
        tool(
            "p4_fixes",
            "List job fixes.",
            json!({
                "changelist": change("Limit to a changelist (-c)"),
                "job": s("Limit to a job (-j)"),
                "files": files("Filespecs"),
            }),
            &[],
        ),
        tool("p4_label", "Show a label spec (`p4 label -o`).", json!({ "name": s("Label name") }), &["name"]),
        tool(
            "p4_labels",
            "List labels.",
            json!({
                "user": s("Owner (-u)"),
                "max": n("Maximum labels (-m)"),
                "files": files("Filespecs"),
            }),
            &[],
        ),
        tool(
            "p4_where",
            "Map filespecs to depot, client and local paths.",
            json!({ "files": files("Filespecs") }),
            &["files"],
        ),
        tool(
            "p4_audit_logs",
            "Query this server's audit log, newest first.",
            json!({
                "tool": s("Tool name"),
                "user": s("User"),
                "result": { "type": "string", "enum": ["success", "error", "blocked"] },
                "since": s("RFC 3339 timestamp"),
                "limit": n("Maximum entries"),
            }),
            &[],
        ),
        tool(
            "p4_audit_export",
            "Export the audit log as JSON or CSV.",
            json!({ "format": { "type": "string", "enum": ["json", "csv"] } }),
            &[],
        ),
        tool(
            "p4_server_status",
            "Modes, memory usage and rate-limit state of this server.",
            json!({}),
            &[],
        ),
    ];
    json!({ "tools": tools })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_named_tool_is_listed_once() {
        let list = tool_list_result();
        let names: Vec<&str> = list["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, TOOL_NAMES);
        for t in list["tools"].as_array().unwrap() {
            assert!(t["inputSchema"]["properties"].get("workspacePath").is_some());
        }
    }
}
