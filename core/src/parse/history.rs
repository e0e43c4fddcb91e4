//! Changelist, history and listing grammars.

use super::{Record, diff, int_or_str, str_val};
use regex::{Captures, Regex};
use serde_json::{Value, json};
use std::sync::LazyLock;

fn re(pat: &str) -> Regex {
    Regex::new(pat).expect("static grammar regex")
}

static CHANGE_SUMMARY: LazyLock<Regex> = LazyLock::new(|| {
    re(r"^Change (?P<change>\d+) on (?P<date>\S+)(?: (?P<time>\d{2}:\d{2}:\d{2}))? by (?P<user>[^@\s]+)@(?P<client>\S+)(?: \*(?P<status>\w+)\*)?(?: '(?P<desc>.*)')?$")
});
static DESCRIBE_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    re(r"^Change (?P<change>\d+) by (?P<user>[^@\s]+)@(?P<client>\S+) on (?P<date>\S+)(?: (?P<time>\d{2}:\d{2}:\d{2}))?(?: \*(?P<status>\w+)\*)?$")
});
static DESCRIBE_FILE: LazyLock<Regex> =
    LazyLock::new(|| re(r"^\.\.\. (?P<file>//[^#]+)#(?P<rev>\d+|none) (?P<action>\S+)$"));
static FILELOG_REV: LazyLock<Regex> = LazyLock::new(|| {
    re(r"^\.\.\. #(?P<rev>\d+) change (?P<change>\d+) (?P<action>\S+) on (?P<date>\S+)(?: (?P<time>\d{2}:\d{2}:\d{2}))? by (?P<user>[^@\s]+)@(?P<client>\S+) \((?P<type>[^)]+)\)(?: '(?P<desc>.*)')?$")
});
static FILELOG_INTEG: LazyLock<Regex> =
    LazyLock::new(|| re(r"^\.\.\. \.\.\. (?P<how>.+?) (?P<file>//[^#]+)#(?P<revs>\S+)$"));
static CLIENT: LazyLock<Regex> = LazyLock::new(|| {
    re(r"^Client (?P<name>\S+) (?P<date>\S+) root (?P<root>.+?) '(?P<desc>.*)'$")
});
static LABEL: LazyLock<Regex> =
    LazyLock::new(|| re(r"^Label (?P<name>\S+) (?P<date>\S+) '(?P<desc>.*)'$"));
static USER: LazyLock<Regex> = LazyLock::new(|| {
    re(r"^(?P<user>\S+) <(?P<email>[^>]*)> \((?P<name>.*)\) accessed (?P<access>\S+)$")
});
static JOB: LazyLock<Regex> = LazyLock::new(|| {
    re(r"^(?P<job>\S+) on (?P<date>\S+) by (?P<user>\S+)(?: \*(?P<status>\w+)\*)? '(?P<desc>.*)'$")
});
static FIX: LazyLock<Regex> = LazyLock::new(|| {
    re(r"^(?P<job>\S+) fixed by change (?P<change>\d+) on (?P<date>\S+) by (?P<user>[^@\s]+)@(?P<client>\S+)(?: \((?P<status>\w+)\))?$")
});
static CHANGE_SAVED: LazyLock<Regex> = LazyLock::new(|| {
    re(r"^Change (?P<change>\d+) (?P<verb>created|updated)(?: with (?P<open>\d+) open file\(s\))?\.?")
});
static SUBMIT_DONE: LazyLock<Regex> = LazyLock::new(|| {
    re(r"^Change (?P<change>\d+)(?: renamed change (?P<renamed>\d+) and)? submitted\.$")
});
static SUBMIT_FILE: LazyLock<Regex> = LazyLock::new(|| {
    re(r"^(?P<action>add|edit|delete|branch|integrate|import|move/add|move/delete) (?P<file>//[^#]+)#(?P<rev>\d+|none)$")
});

fn put(rec: &mut Record, key: &str, v: Value) {
    rec.insert(key.to_string(), v);
}

fn put_opt(rec: &mut Record, caps: &Captures<'_>, name: &str) {
    if let Some(m) = caps.name(name) {
        rec.insert(name.to_string(), str_val(m.as_str()));
    }
}

fn put_names(rec: &mut Record, caps: &Captures<'_>, names: &[&str]) {
    for name in names {
        put_opt(rec, caps, name);
    }
}

fn append_description(rec: &mut Record, line: &str) {
    let text = line.trim_start_matches('\t');
    let desc = match rec.get("description").and_then(Value::as_str) {
        Some(existing) if rec.contains_key("longDescription") => format!("{existing}\n{text}"),
        _ => text.to_string(),
    };
    put(rec, "description", str_val(desc.trim_end()));
    put(rec, "longDescription", Value::Bool(true));
}

/// `p4 changes` summary lines; `-l` continuation lines replace the
/// truncated description.
pub fn parse_changes(text: &str) -> Vec<Record> {
    let mut out: Vec<Record> = Vec::new();
    for line in text.lines() {
        if line.starts_with('\t') {
            if let Some(last) = out.last_mut() {
                append_description(last, line);
            }
            continue;
        }
        let Some(caps) = CHANGE_SUMMARY.captures(line.trim_end()) else {
            continue;
        };
        let mut rec = Record::new();
        put(&mut rec, "change", int_or_str(&caps["change"]));
        put_names(&mut rec, &caps, &["date", "time", "user", "client"]);
        let status = caps.name("status").map_or("submitted", |m| m.as_str());
        put(&mut rec, "status", str_val(status));
        if let Some(d) = caps.name("desc") {
            put(&mut rec, "description", str_val(d.as_str()));
        }
        out.push(rec);
    }
    for rec in &mut out {
        rec.remove("longDescription");
    }
    out
}

#[derive(PartialEq)]
enum DescribeSection {
    Description,
    Affected,
    Shelved,
    Differences,
}

/// `p4 describe`: header, indented description, affected/shelved file
/// lists and an optional diff section.
pub fn parse_describe(text: &str) -> Option<Record> {
    let mut lines = text.lines();
    let header = lines.by_ref().find_map(|l| DESCRIBE_HEADER.captures(l.trim_end()))?;

    let mut rec = Record::new();
    put(&mut rec, "change", int_or_str(&header["change"]));
    put_names(&mut rec, &header, &["user", "client", "date", "time"]);
    let status = header.name("status").map_or("submitted", |m| m.as_str());
    put(&mut rec, "status", str_val(status));

    let mut section = DescribeSection::Description;
    let mut description = Vec::new();
    let mut affected = Vec::new();
    let mut shelved = Vec::new();
    let mut diff_text = Vec::new();

    for line in lines {
        let trimmed = line.trim_end();
        if trimmed.starts_with("Affected files ...") {
            section = DescribeSection::Affected;
            continue;
        }
        if trimmed.starts_with("Shelved files ...") {
            section = DescribeSection::Shelved;
            continue;
        }
        if trimmed.starts_with("Differences ...") {
            section = DescribeSection::Differences;
            continue;
        }
        match section {
            DescribeSection::Description => {
                if let Some(d) = line.strip_prefix('\t') {
                    description.push(d.to_string());
                }
            }
            DescribeSection::Affected | DescribeSection::Shelved => {
                let Some(caps) = DESCRIBE_FILE.captures(trimmed) else {
                    continue;
                };
                let f = json!({
                    "depotFile": &caps["file"],
                    "rev": int_or_str(&caps["rev"]),
                    "action": &caps["action"],
                });
                if section == DescribeSection::Affected {
                    affected.push(f);
                } else {
                    shelved.push(f);
                }
            }
            DescribeSection::Differences => diff_text.push(line),
        }
    }

    while description.last().is_some_and(|l| l.trim().is_empty()) {
        description.pop();
    }
    put(&mut rec, "description", str_val(&description.join("\n")));
    put(&mut rec, "files", Value::Array(affected));
    if !shelved.is_empty() {
        put(&mut rec, "shelvedFiles", Value::Array(shelved));
    }
    if !diff_text.is_empty() {
        let diffs = diff::parse_diff(&diff_text.join("\n"));
        put(&mut rec, "diffs", super::records(diffs));
    }
    Some(rec)
}

/// `p4 filelog`: depot file lines, each followed by its revisions and
/// their integration records.
pub fn parse_filelog(text: &str) -> Vec<Record> {
    let mut out: Vec<Record> = Vec::new();
    let mut revisions: Vec<Record> = Vec::new();

    fn flush(out: &mut [Record], revisions: &mut Vec<Record>) {
        if let Some(file) = out.last_mut() {
            for r in revisions.iter_mut() {
                r.remove("longDescription");
            }
            let revs = std::mem::take(revisions);
            put(file, "revisions", super::records(revs));
        }
    }

    for line in text.lines() {
        let trimmed = line.trim_end();
        if trimmed.starts_with("//") {
            flush(&mut out, &mut revisions);
            let mut file = Record::new();
            put(&mut file, "depotFile", str_val(trimmed));
            out.push(file);
            continue;
        }
        if line.starts_with('\t') {
            if let Some(rev) = revisions.last_mut() {
                append_description(rev, line);
            }
            continue;
        }
        if let Some(caps) = FILELOG_INTEG.captures(trimmed) {
            if let Some(rev) = revisions.last_mut() {
                let entry = json!({
                    "how": &caps["how"],
                    "file": &caps["file"],
                    "revs": &caps["revs"],
                });
                match rev.get_mut("integrations").and_then(Value::as_array_mut) {
                    Some(list) => list.push(entry),
                    None => put(rev, "integrations", Value::Array(vec![entry])),
                }
            }
            continue;
        }
        let Some(caps) = FILELOG_REV.captures(trimmed) else {
            continue;
        };
        if out.is_empty() {
            continue;
        }
        let mut rev = Record::new();
        put(&mut rev, "rev", int_or_str(&caps["rev"]));
        put(&mut rev, "change", int_or_str(&caps["change"]));
        put_names(
            &mut rev,
            &caps,
            &["action", "date", "time", "user", "client", "type"],
        );
        if let Some(d) = caps.name("desc") {
            put(&mut rev, "description", str_val(d.as_str()));
        }
        revisions.push(rev);
    }
    flush(&mut out, &mut revisions);
    out
}

fn listing(text: &str, regex: &Regex, names: &[&str]) -> Vec<Record> {
    text.lines()
        .filter_map(|line| {
            let caps = regex.captures(line.trim_end())?;
            let mut rec = Record::new();
            put_names(&mut rec, &caps, names);
            Some(rec)
        })
        .collect()
}

pub fn parse_clients(text: &str) -> Vec<Record> {
    listing(text, &CLIENT, &["name", "date", "root", "desc"])
        .into_iter()
        .map(rename_desc)
        .collect()
}

pub fn parse_labels(text: &str) -> Vec<Record> {
    listing(text, &LABEL, &["name", "date", "desc"])
        .into_iter()
        .map(rename_desc)
        .collect()
}

pub fn parse_users(text: &str) -> Vec<Record> {
    listing(text, &USER, &["user", "email", "name", "access"])
}

pub fn parse_jobs(text: &str) -> Vec<Record> {
    listing(text, &JOB, &["job", "date", "user", "status", "desc"])
        .into_iter()
        .map(rename_desc)
        .collect()
}

pub fn parse_fixes(text: &str) -> Vec<Record> {
    text.lines()
        .filter_map(|line| {
            let caps = FIX.captures(line.trim_end())?;
            let mut rec = Record::new();
            put_names(&mut rec, &caps, &["job", "date", "user", "client", "status"]);
            put(&mut rec, "change", int_or_str(&caps["change"]));
            Some(rec)
        })
        .collect()
}

fn rename_desc(mut rec: Record) -> Record {
    if let Some(d) = rec.remove("desc") {
        rec.insert("description".to_string(), d);
    }
    rec
}

/// `Change N created.` / `Change N updated.` from `p4 change -i`.
pub fn parse_change_saved(text: &str) -> Option<Record> {
    text.lines().find_map(|line| {
        let caps = CHANGE_SAVED.captures(line.trim())?;
        let mut rec = Record::new();
        put(&mut rec, "change", int_or_str(&caps["change"]));
        put(&mut rec, "action", str_val(&caps["verb"]));
        if let Some(n) = caps.name("open") {
            put(&mut rec, "openFiles", int_or_str(n.as_str()));
        }
        Some(rec)
    })
}

pub fn parse_submit(text: &str) -> Record {
    let mut rec = Record::new();
    let mut files = Vec::new();
    let mut submitted = false;
    for line in text.lines().map(str::trim_end) {
        if let Some(caps) = SUBMIT_FILE.captures(line) {
            files.push(json!({
                "action": &caps["action"],
                "depotFile": &caps["file"],
                "rev": int_or_str(&caps["rev"]),
            }));
        } else if let Some(caps) = SUBMIT_DONE.captures(line) {
            submitted = true;
            match caps.name("renamed") {
                Some(new) => {
                    put(&mut rec, "change", int_or_str(new.as_str()));
                    put(&mut rec, "originalChange", int_or_str(&caps["change"]));
                }
                None => put(&mut rec, "change", int_or_str(&caps["change"])),
            }
        }
    }
    put(&mut rec, "submitted", Value::Bool(submitted));
    put(&mut rec, "files", Value::Array(files));
    rec
}
