//! Text-to-record parsers for `p4` output.
//!
//! Every parser is best effort: lines that do not match the expected shape
//! are dropped, never reported as errors.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::sync::LazyLock;

pub mod diff;
pub mod files;
pub mod forms;
pub mod history;
pub mod tagged;

pub use p4mcp_protocol::Record;

/// Which grammar to apply to text-mode output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Grammar {
    Info,
    SpecForm,
    Opened,
    FileActions,
    Files,
    Dirs,
    Where,
    Sync,
    Resolve,
    Shelve,
    Unshelve,
    Copy,
    Move,
    Annotate,
    Grep,
    Changes,
    Describe,
    Filelog,
    Clients,
    Labels,
    Users,
    Jobs,
    Fixes,
    ChangeSaved,
    Submit,
    Diff,
}

impl Grammar {
    pub fn apply(self, text: &str) -> Value {
        match self {
            Grammar::Info => Value::Object(forms::parse_info(text)),
            Grammar::SpecForm => Value::Object(forms::parse_spec_form(text)),
            Grammar::Opened => records(files::parse_opened(text)),
            Grammar::FileActions => records(files::parse_file_actions(text)),
            Grammar::Files => records(files::parse_files(text)),
            Grammar::Dirs => records(files::parse_dirs(text)),
            Grammar::Where => records(files::parse_where(text)),
            Grammar::Sync => records(files::parse_sync(text)),
            Grammar::Resolve => records(files::parse_resolve(text)),
            Grammar::Shelve => Value::Object(files::parse_shelve(text)),
            Grammar::Unshelve => records(files::parse_unshelve(text)),
            Grammar::Copy => records(files::parse_copy(text)),
            Grammar::Move => records(files::parse_move(text)),
            Grammar::Annotate => Value::Object(files::parse_annotate(text)),
            Grammar::Grep => records(files::parse_grep(text)),
            Grammar::Changes => records(history::parse_changes(text)),
            Grammar::Describe => history::parse_describe(text)
                .map(Value::Object)
                .unwrap_or(Value::Null),
            Grammar::Filelog => records(history::parse_filelog(text)),
            Grammar::Clients => records(history::parse_clients(text)),
            Grammar::Labels => records(history::parse_labels(text)),
            Grammar::Users => records(history::parse_users(text)),
            Grammar::Jobs => records(history::parse_jobs(text)),
            Grammar::Fixes => records(history::parse_fixes(text)),
            Grammar::ChangeSaved => history::parse_change_saved(text)
                .map(Value::Object)
                .unwrap_or(Value::Null),
            Grammar::Submit => Value::Object(history::parse_submit(text)),
            Grammar::Diff => records(diff::parse_diff(text)),
        }
    }
}

pub fn records(list: Vec<Record>) -> Value {
    Value::Array(list.into_iter().map(Value::Object).collect())
}

/// `-G` output is not decoded; hand back the bytes we got, flagged.
pub fn unparsed_marshal(raw: &str) -> Value {
    serde_json::json!({
        "unparsed": true,
        "format": "marshal",
        "raw": raw,
    })
}

static NUMERIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-?\d+(\.\d+)?$").expect("numeric regex"));

/// Numbers become numbers, `true/yes/on` and `false/no/off` become booleans.
pub fn coerce_scalar(raw: &str) -> Value {
    let v = raw.trim();
    if NUMERIC.is_match(v) {
        if let Ok(n) = v.parse::<i64>() {
            return Value::Number(n.into());
        }
        if let Some(n) = v.parse::<f64>().ok().and_then(Number::from_f64) {
            return Value::Number(n);
        }
    }
    match v.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" => Value::Bool(true),
        "false" | "no" | "off" => Value::Bool(false),
        _ => Value::String(v.to_string()),
    }
}

/// Integer fields (change numbers, revisions); anything else stays a string.
pub(crate) fn int_or_str(raw: &str) -> Value {
    match raw.parse::<i64>() {
        Ok(n) => Value::Number(n.into()),
        Err(_) => Value::String(raw.to_string()),
    }
}

pub(crate) fn str_val(raw: &str) -> Value {
    Value::String(raw.to_string())
}

/// `p4 -s` output split into the body the grammars see and the
/// error/warning lines worth surfacing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScriptOutput {
    pub body: String,
    pub messages: Vec<String>,
    pub exit: Option<i32>,
}

static INFO_LEVEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^info(\d+): ?(.*)$").expect("info level regex"));

/// Undo the `-s` line tagging. Untagged lines pass through unchanged.
pub fn normalize_script_output(stdout: &str) -> ScriptOutput {
    let mut out = ScriptOutput::default();
    let mut body = Vec::new();
    for line in stdout.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if let Some(rest) = line.strip_prefix("exit: ") {
            out.exit = rest.trim().parse::<i32>().ok();
            continue;
        }
        if let Some(rest) = line
            .strip_prefix("error: ")
            .or_else(|| line.strip_prefix("warning: "))
        {
            out.messages.push(rest.to_string());
            continue;
        }
        if let Some(rest) = line
            .strip_prefix("info: ")
            .or_else(|| line.strip_prefix("text: "))
        {
            body.push(rest.to_string());
            continue;
        }
        if line == "info:" || line == "text:" {
            body.push(String::new());
            continue;
        }
        if let Some(caps) = INFO_LEVEL.captures(line) {
            let depth = caps[1].parse::<usize>().unwrap_or(1).max(1);
            body.push(format!("{}{}", "... ".repeat(depth), &caps[2]));
            continue;
        }
        body.push(line.to_string());
    }
    out.body = body.join("\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalar_coercion() {
        assert_eq!(coerce_scalar("42"), json!(42));
        assert_eq!(coerce_scalar("-3.5"), json!(-3.5));
        assert_eq!(coerce_scalar("YES"), json!(true));
        assert_eq!(coerce_scalar("off"), json!(false));
        assert_eq!(coerce_scalar("12abc"), json!("12abc"));
        assert_eq!(coerce_scalar("//depot/a#3"), json!("//depot/a#3"));
    }

    #[test]
    fn coerced_records_keep_types_through_json() {
        let v = tagged::parse_tagged("... change 12\n... shelved true\n... desc fix it\n");
        let text = serde_json::to_string(&v).unwrap();
        let back: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(back, v);
        assert!(back["change"].is_i64());
        assert!(back["shelved"].is_boolean());
        assert!(back["desc"].is_string());
    }

    #[test]
    fn script_tags_are_stripped() {
        let raw = "info: //depot/a.c#1 - opened for edit\ninfo1: depotFile //depot/b.c\nwarning: //depot/x - file(s) not on client.\nexit: 1\n";
        let out = normalize_script_output(raw);
        assert_eq!(
            out.body,
            "//depot/a.c#1 - opened for edit\n... depotFile //depot/b.c"
        );
        assert_eq!(out.messages, vec!["//depot/x - file(s) not on client."]);
        assert_eq!(out.exit, Some(1));
    }

    #[test]
    fn untagged_output_passes_through() {
        let out = normalize_script_output("... key1 value1\n\n... key1 other\n");
        assert_eq!(out.body, "... key1 value1\n\n... key1 other");
        assert_eq!(out.exit, None);
    }

    #[test]
    fn marshal_output_is_flagged_unparsed() {
        let v = unparsed_marshal("{s\x04code");
        assert_eq!(v["unparsed"], json!(true));
        assert_eq!(v["format"], json!("marshal"));
    }
}
