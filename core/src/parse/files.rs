//! Single-line file record grammars: opened, files, sync, where, ...

use super::{Record, int_or_str, str_val};
use regex::{Captures, Regex};
use serde_json::{Value, json};
use std::sync::LazyLock;

fn re(pat: &str) -> Regex {
    Regex::new(pat).expect("static grammar regex")
}

static OPENED: LazyLock<Regex> = LazyLock::new(|| {
    re(r"^(?P<file>//[^#]+)#(?P<rev>\d+|none) - (?P<action>\S+) (?:default change|change (?P<change>\d+)) \((?P<type>[^)]+)\)(?: by (?P<user>[^@\s]+)@(?P<client>\S+))?(?P<locked> \*locked\*)?")
});
static FILE_ACTION: LazyLock<Regex> =
    LazyLock::new(|| re(r"^(?P<file>//[^#]+?|/\S.*?|[A-Za-z]:\\.*?)(?:#(?P<rev>\d+|none))? - (?P<msg>.+)$"));
static OPENED_FOR: LazyLock<Regex> = LazyLock::new(|| re(r"opened for (\S+)"));
static FILES: LazyLock<Regex> = LazyLock::new(|| {
    re(r"^(?P<file>//[^#]+)#(?P<rev>\d+) - (?P<action>\S+) change (?P<change>\d+) \((?P<type>[^)]+)\)$")
});
static WHERE: LazyLock<Regex> =
    LazyLock::new(|| re(r"^(?P<unmap>-)?(?P<depot>//\S+) (?P<client>//\S+) (?P<local>.+)$"));
static SYNC: LazyLock<Regex> = LazyLock::new(|| {
    re(r"^(?P<file>//[^#]+)#(?P<rev>\d+|none) - (?P<verb>updating|added as|deleted as|refreshing|replacing|is opened and not being changed|is opened at a later revision - not changed)(?: (?P<local>.+))?$")
});
static RESOLVE: LazyLock<Regex> = LazyLock::new(|| {
    re(r"^(?P<local>.+?) - (?P<verb>merging|merge from|copy from|ignored|vs|resolving|resolve skipped)\.?(?: (?P<from>//[^#\s]+)(?:#(?P<start>\d+)(?:,#(?P<end>\d+))?)?)?$")
});
static CHUNKS: LazyLock<Regex> = LazyLock::new(|| {
    re(r"^Diff chunks: (\d+) yours \+ (\d+) theirs \+ (\d+) both \+ (\d+) conflicting$")
});
static SHELVE_FILE: LazyLock<Regex> = LazyLock::new(|| {
    re(r"^(?P<action>add|edit|delete|branch|integrate|import|archive|purge|move/add|move/delete) (?P<file>//[^#]+)#(?P<rev>\d+|none)$")
});
static SHELVE_DONE: LazyLock<Regex> = LazyLock::new(|| re(r"^Change (\d+) files shelved\.$"));
static SHELVE_DELETED: LazyLock<Regex> =
    LazyLock::new(|| re(r"^Shelved change (\d+) deleted\.$"));
static UNSHELVE: LazyLock<Regex> = LazyLock::new(|| {
    re(r"^(?P<file>//[^#]+)#(?P<rev>\d+|none) - unshelved, opened for (?P<action>\S+)$")
});
static COPY: LazyLock<Regex> = LazyLock::new(|| {
    re(r"^(?P<file>//[^#]+)#(?P<rev>\d+|none) - (?P<action>.+?) from (?P<from>//[^#]+)#(?P<fromRev>\S+)$")
});
static MOVE: LazyLock<Regex> = LazyLock::new(|| {
    re(r"^(?P<file>//[^#]+)#(?P<rev>\d+|none) - moved from (?P<from>//[^#]+)#(?P<fromRev>\S+)$")
});
static ANNOTATE_LINE: LazyLock<Regex> = LazyLock::new(|| re(r"^(\d+): ?(.*)$"));
static GREP_NUMBERED: LazyLock<Regex> =
    LazyLock::new(|| re(r"^(?P<file>//[^#]+)#(?P<rev>\d+):(?P<line>\d+):(?P<text>.*)$"));
static GREP_PLAIN: LazyLock<Regex> =
    LazyLock::new(|| re(r"^(?P<file>//[^#]+)#(?P<rev>\d+):(?P<text>.*)$"));

fn each_line<F>(text: &str, mut f: F) -> Vec<Record>
where
    F: FnMut(&str) -> Option<Record>,
{
    text.lines()
        .map(|l| l.trim_end())
        .filter(|l| !l.is_empty())
        .filter_map(&mut f)
        .collect()
}

fn put(rec: &mut Record, key: &str, v: Value) {
    rec.insert(key.to_string(), v);
}

fn put_opt(rec: &mut Record, caps: &Captures<'_>, name: &str, key: &str) {
    if let Some(m) = caps.name(name) {
        rec.insert(key.to_string(), str_val(m.as_str()));
    }
}

fn file_rev(caps: &Captures<'_>) -> Record {
    let mut rec = Record::new();
    put(&mut rec, "depotFile", str_val(&caps["file"]));
    if let Some(rev) = caps.name("rev") {
        put(&mut rec, "rev", int_or_str(rev.as_str()));
    }
    rec
}

pub fn parse_opened_line(line: &str) -> Option<Record> {
    let caps = OPENED.captures(line)?;
    let mut rec = file_rev(&caps);
    put(&mut rec, "action", str_val(&caps["action"]));
    let change = match caps.name("change") {
        Some(c) => int_or_str(c.as_str()),
        None => str_val("default"),
    };
    put(&mut rec, "change", change);
    put(&mut rec, "type", str_val(&caps["type"]));
    put_opt(&mut rec, &caps, "user", "user");
    put_opt(&mut rec, &caps, "client", "client");
    put(&mut rec, "locked", Value::Bool(caps.name("locked").is_some()));
    Some(rec)
}

pub fn parse_opened(text: &str) -> Vec<Record> {
    each_line(text, parse_opened_line)
}

/// `add`/`edit`/`delete`/`revert`/`reopen` confirmations.
pub fn parse_file_actions(text: &str) -> Vec<Record> {
    each_line(text, |line| {
        let caps = FILE_ACTION.captures(line)?;
        let mut rec = file_rev(&caps);
        let msg = &caps["msg"];
        put(&mut rec, "message", str_val(msg));
        if let Some(a) = OPENED_FOR.captures(msg) {
            put(&mut rec, "action", str_val(&a[1]));
        } else if msg.contains("reverted") {
            put(&mut rec, "action", str_val("revert"));
        }
        Some(rec)
    })
}

pub fn parse_files(text: &str) -> Vec<Record> {
    each_line(text, |line| {
        let caps = FILES.captures(line)?;
        let mut rec = file_rev(&caps);
        put(&mut rec, "action", str_val(&caps["action"]));
        put(&mut rec, "change", int_or_str(&caps["change"]));
        put(&mut rec, "type", str_val(&caps["type"]));
        Some(rec)
    })
}

pub fn parse_dirs(text: &str) -> Vec<Record> {
    each_line(text, |line| {
        if !line.starts_with("//") {
            return None;
        }
        let mut rec = Record::new();
        put(&mut rec, "dir", str_val(line));
        Some(rec)
    })
}

pub fn parse_where(text: &str) -> Vec<Record> {
    each_line(text, |line| {
        let caps = WHERE.captures(line)?;
        let mut rec = Record::new();
        put(&mut rec, "depotFile", str_val(&caps["depot"]));
        put(&mut rec, "clientFile", str_val(&caps["client"]));
        put(&mut rec, "path", str_val(&caps["local"]));
        put(&mut rec, "unmap", Value::Bool(caps.name("unmap").is_some()));
        Some(rec)
    })
}

pub fn parse_sync(text: &str) -> Vec<Record> {
    each_line(text, |line| {
        let caps = SYNC.captures(line)?;
        let mut rec = file_rev(&caps);
        let action = match &caps["verb"] {
            "updating" => "updated",
            "added as" => "added",
            "deleted as" => "deleted",
            "refreshing" => "refreshed",
            "replacing" => "replaced",
            _ => "skipped",
        };
        put(&mut rec, "action", str_val(action));
        put_opt(&mut rec, &caps, "local", "clientFile");
        Some(rec)
    })
}

pub fn parse_resolve(text: &str) -> Vec<Record> {
    let mut out: Vec<Record> = Vec::new();
    for line in text.lines().map(str::trim_end) {
        if let Some(c) = CHUNKS.captures(line) {
            let n = |i: usize| c[i].parse::<i64>().unwrap_or(0);
            if let Some(last) = out.last_mut() {
                put(
                    last,
                    "chunks",
                    json!({"yours": n(1), "theirs": n(2), "both": n(3), "conflicting": n(4)}),
                );
                put(last, "conflicts", Value::Bool(n(4) > 0));
            }
            continue;
        }
        let Some(caps) = RESOLVE.captures(line) else {
            continue;
        };
        let mut rec = Record::new();
        put(&mut rec, "clientFile", str_val(&caps["local"]));
        put(&mut rec, "action", str_val(&caps["verb"]));
        put_opt(&mut rec, &caps, "from", "fromFile");
        if let Some(s) = caps.name("start") {
            put(&mut rec, "startFromRev", int_or_str(s.as_str()));
        }
        if let Some(e) = caps.name("end") {
            put(&mut rec, "endFromRev", int_or_str(e.as_str()));
        }
        out.push(rec);
    }
    out
}

pub fn parse_shelve(text: &str) -> Record {
    let mut rec = Record::new();
    let mut files = Vec::new();
    let mut shelved = false;
    let mut deleted = false;
    for line in text.lines().map(str::trim_end) {
        if let Some(caps) = SHELVE_FILE.captures(line) {
            let mut f = file_rev(&caps);
            put(&mut f, "action", str_val(&caps["action"]));
            files.push(Value::Object(f));
        } else if let Some(c) = SHELVE_DONE.captures(line) {
            shelved = true;
            put(&mut rec, "change", int_or_str(&c[1]));
        } else if let Some(c) = SHELVE_DELETED.captures(line) {
            deleted = true;
            put(&mut rec, "change", int_or_str(&c[1]));
        }
    }
    put(&mut rec, "shelved", Value::Bool(shelved));
    put(&mut rec, "deleted", Value::Bool(deleted));
    put(&mut rec, "files", Value::Array(files));
    rec
}

pub fn parse_unshelve(text: &str) -> Vec<Record> {
    each_line(text, |line| {
        let caps = UNSHELVE.captures(line)?;
        let mut rec = file_rev(&caps);
        put(&mut rec, "action", str_val(&caps["action"]));
        Some(rec)
    })
}

fn from_pair(caps: &Captures<'_>) -> Record {
    let mut rec = file_rev(caps);
    put(&mut rec, "fromFile", str_val(&caps["from"]));
    put(&mut rec, "fromRev", int_or_str(&caps["fromRev"]));
    rec
}

pub fn parse_copy(text: &str) -> Vec<Record> {
    each_line(text, |line| {
        let caps = COPY.captures(line)?;
        let mut rec = from_pair(&caps);
        put(&mut rec, "action", str_val(&caps["action"]));
        Some(rec)
    })
}

pub fn parse_move(text: &str) -> Vec<Record> {
    each_line(text, |line| {
        let caps = MOVE.captures(line)?;
        let mut rec = from_pair(&caps);
        put(&mut rec, "action", str_val("move"));
        Some(rec)
    })
}

/// `p4 annotate`: one header line, then `origin: content` per line. The
/// origin is a revision, or a change number with `-c`.
pub fn parse_annotate(text: &str) -> Record {
    let mut rec = Record::new();
    let mut lines = Vec::new();
    for line in text.lines() {
        if !rec.contains_key("depotFile") {
            if let Some(caps) = FILES.captures(line.trim_end()) {
                rec = file_rev(&caps);
                put(&mut rec, "action", str_val(&caps["action"]));
                put(&mut rec, "change", int_or_str(&caps["change"]));
                put(&mut rec, "type", str_val(&caps["type"]));
                continue;
            }
        }
        let Some(caps) = ANNOTATE_LINE.captures(line) else {
            continue;
        };
        lines.push(json!({
            "line": lines.len() + 1,
            "origin": int_or_str(&caps[1]),
            "content": &caps[2],
        }));
    }
    put(&mut rec, "lines", Value::Array(lines));
    rec
}

pub fn parse_grep(text: &str) -> Vec<Record> {
    each_line(text, |line| {
        if let Some(caps) = GREP_NUMBERED.captures(line) {
            let mut rec = file_rev(&caps);
            put(&mut rec, "line", int_or_str(&caps["line"]));
            put(&mut rec, "matchedLine", str_val(&caps["text"]));
            return Some(rec);
        }
        let caps = GREP_PLAIN.captures(line)?;
        let mut rec = file_rev(&caps);
        put(&mut rec, "matchedLine", str_val(&caps["text"]));
        Some(rec)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opened_lines() {
        let text = "//depot/main/a.c#3 - edit default change (text)\n//depot/main/b.c#none - add change 1234 (text+x) by bob@bob-ws *locked*\nnot an opened line\n";
        let recs = parse_opened(text);
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0]["depotFile"], json!("//depot/main/a.c"));
        assert_eq!(recs[0]["rev"], json!(3));
        assert_eq!(recs[0]["change"], json!("default"));
        assert_eq!(recs[0]["locked"], json!(false));
        assert_eq!(recs[1]["rev"], json!("none"));
        assert_eq!(recs[1]["change"], json!(1234));
        assert_eq!(recs[1]["type"], json!("text+x"));
        assert_eq!(recs[1]["user"], json!("bob"));
        assert_eq!(recs[1]["client"], json!("bob-ws"));
        assert_eq!(recs[1]["locked"], json!(true));
    }

    #[test]
    fn file_action_confirmations() {
        let text = "//depot/a.c#1 - opened for add\n//depot/b.c#4 - was edit, reverted\n//depot/c.c - file(s) not on client.\n";
        let recs = parse_file_actions(text);
        assert_eq!(recs.len(), 3);
        assert_eq!(recs[0]["action"], json!("add"));
        assert_eq!(recs[1]["action"], json!("revert"));
        assert_eq!(recs[1]["rev"], json!(4));
        assert!(recs[2].get("action").is_none());
        assert!(recs[2].get("rev").is_none());
    }

    #[test]
    fn files_and_dirs() {
        let recs = parse_files("//depot/a.c#7 - edit change 321 (text)\n//depot/b.bin#1 - add change 9 (binary+l)\n");
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0]["change"], json!(321));
        assert_eq!(recs[1]["type"], json!("binary+l"));

        let dirs = parse_dirs("//depot/main\n//depot/rel\nno such file(s).\n");
        assert_eq!(dirs.len(), 2);
        assert_eq!(dirs[1]["dir"], json!("//depot/rel"));
    }

    #[test]
    fn where_triples() {
        let recs = parse_where("//depot/a.c //ws/a.c /home/bob/ws/a.c\n-//depot/tmp/x //ws/tmp/x /home/bob/ws/tmp/x\n");
        assert_eq!(recs[0]["path"], json!("/home/bob/ws/a.c"));
        assert_eq!(recs[0]["unmap"], json!(false));
        assert_eq!(recs[1]["unmap"], json!(true));
        assert_eq!(recs[1]["depotFile"], json!("//depot/tmp/x"));
    }

    #[test]
    fn sync_lines() {
        let text = "//depot/a.c#3 - updating /ws/a.c\n//depot/b.c#1 - added as /ws/b.c\n//depot/c.c#2 - deleted as /ws/c.c\n//depot/d.c#4 - is opened and not being changed\nFile(s) up-to-date.\n";
        let recs = parse_sync(text);
        assert_eq!(recs.len(), 4);
        assert_eq!(recs[0]["action"], json!("updated"));
        assert_eq!(recs[1]["clientFile"], json!("/ws/b.c"));
        assert_eq!(recs[2]["action"], json!("deleted"));
        assert_eq!(recs[3]["action"], json!("skipped"));
    }

    #[test]
    fn resolve_with_chunks() {
        let text = "/ws/a.c - merging //depot/a.c#2,#3\nDiff chunks: 1 yours + 2 theirs + 0 both + 1 conflicting\n/ws/b.c - copy from //depot/b.c\n";
        let recs = parse_resolve(text);
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0]["startFromRev"], json!(2));
        assert_eq!(recs[0]["endFromRev"], json!(3));
        assert_eq!(recs[0]["chunks"]["theirs"], json!(2));
        assert_eq!(recs[0]["conflicts"], json!(true));
        assert_eq!(recs[1]["action"], json!("copy from"));
        assert_eq!(recs[1]["fromFile"], json!("//depot/b.c"));
    }

    #[test]
    fn shelve_and_unshelve() {
        let rec = parse_shelve("Shelving files for change 55.\nedit //depot/a.c#3\nadd //depot/n.c#none\nChange 55 files shelved.\n");
        assert_eq!(rec["change"], json!(55));
        assert_eq!(rec["shelved"], json!(true));
        assert_eq!(rec["files"].as_array().unwrap().len(), 2);
        assert_eq!(rec["files"][1]["rev"], json!("none"));

        let del = parse_shelve("Shelved change 55 deleted.\n");
        assert_eq!(del["deleted"], json!(true));

        let un = parse_unshelve("//depot/a.c#3 - unshelved, opened for edit\n");
        assert_eq!(un[0]["action"], json!("edit"));
    }

    #[test]
    fn copy_and_move() {
        let c = parse_copy("//depot/rel/a.c#1 - branch/sync from //depot/main/a.c#1,#4\n");
        assert_eq!(c[0]["action"], json!("branch/sync"));
        assert_eq!(c[0]["fromRev"], json!("1,#4"));
        let m = parse_move("//depot/new.c#1 - moved from //depot/old.c#3\n");
        assert_eq!(m[0]["fromFile"], json!("//depot/old.c"));
        assert_eq!(m[0]["fromRev"], json!(3));
    }

    #[test]
    fn annotate_lines() {
        let rec = parse_annotate("//depot/a.c#3 - edit change 42 (text)\n1: int main() {\n3:   return 0;\n1: }\n");
        assert_eq!(rec["depotFile"], json!("//depot/a.c"));
        let lines = rec["lines"].as_array().unwrap();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1]["origin"], json!(3));
        assert_eq!(lines[1]["line"], json!(2));
        assert_eq!(lines[1]["content"], json!("  return 0;"));
    }

    #[test]
    fn grep_matches() {
        let recs = parse_grep("//depot/a.c#3:12:    foo(bar);\n//depot/b.c#1:no line number\n");
        assert_eq!(recs[0]["line"], json!(12));
        assert_eq!(recs[0]["matchedLine"], json!("    foo(bar);"));
        assert!(recs[1].get("line").is_none());
    }
}
