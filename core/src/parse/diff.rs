use super::{Record, int_or_str, str_val};
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

static FILE_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^==== (?P<file>//[^#]+)#(?P<rev>\d+|none)(?: - (?P<local>.+?))?(?: \((?P<type>[^)]+)\))? ====(?: \((?P<type2>[^)]+)\))?$")
        .expect("diff header regex")
});
static NORMAL_HUNK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d+(,\d+)?[acd]\d+(,\d+)?$").expect("normal hunk regex")
});

#[derive(Default, Clone, Copy, PartialEq)]
enum Hunk {
    /// Before the first hunk: `---`/`+++` file headers live here.
    #[default]
    None,
    Unified,
    Normal,
}

#[derive(Default)]
struct FileDiff {
    header: Record,
    hunk: Hunk,
    hunks: i64,
    added: i64,
    removed: i64,
    lines: Vec<String>,
}

impl FileDiff {
    fn into_record(self) -> Record {
        let mut rec = self.header;
        rec.insert("hunks".into(), Value::from(self.hunks));
        rec.insert("added".into(), Value::from(self.added));
        rec.insert("removed".into(), Value::from(self.removed));
        rec.insert("diff".into(), str_val(self.lines.join("\n").trim_end()));
        rec
    }

    fn feed(&mut self, line: &str) {
        if line.starts_with("@@") {
            self.hunks += 1;
            self.hunk = Hunk::Unified;
        } else if NORMAL_HUNK.is_match(line) {
            self.hunks += 1;
            self.hunk = Hunk::Normal;
        } else {
            match self.hunk {
                Hunk::None => {}
                // Every +/- line counts, including content like `-- comment`.
                Hunk::Unified => {
                    if line.starts_with('+') {
                        self.added += 1;
                    } else if line.starts_with('-') {
                        self.removed += 1;
                    }
                }
                Hunk::Normal => {
                    if line.starts_with("> ") || line == ">" {
                        self.added += 1;
                    } else if line.starts_with("< ") || line == "<" {
                        self.removed += 1;
                    }
                }
            }
        }
        self.lines.push(line.to_string());
    }
}

/// `p4 diff` / `describe` diff sections: `====` headers, then hunks in
/// normal or unified format. Text before the first header is ignored.
pub fn parse_diff(text: &str) -> Vec<Record> {
    let mut out = Vec::new();
    let mut current: Option<FileDiff> = None;
    for line in text.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if let Some(caps) = FILE_HEADER.captures(line) {
            if let Some(done) = current.take() {
                out.push(done.into_record());
            }
            let mut header = Record::new();
            header.insert("depotFile".into(), str_val(&caps["file"]));
            header.insert("rev".into(), int_or_str(&caps["rev"]));
            if let Some(local) = caps.name("local") {
                header.insert("localFile".into(), str_val(local.as_str()));
            }
            if let Some(t) = caps.name("type").or_else(|| caps.name("type2")) {
                header.insert("type".into(), str_val(t.as_str()));
            }
            current = Some(FileDiff {
                header,
                ..Default::default()
            });
            continue;
        }
        if let Some(file) = current.as_mut() {
            file.feed(line);
        }
    }
    if let Some(done) = current {
        out.push(done.into_record());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unified_diff_counts() {
        let text = "==== //depot/a.c#3 - /ws/a.c ====\n@@ -1,3 +1,4 @@\n int x;\n-int y;\n+int y = 1;\n+int z;\n@@ -10,2 +11,2 @@\n-a\n+b\n==== //depot/b.c#1 - /ws/b.c ====\n@@ -1 +1 @@\n-q\n+r\n";
        let recs = parse_diff(text);
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0]["depotFile"], json!("//depot/a.c"));
        assert_eq!(recs[0]["localFile"], json!("/ws/a.c"));
        assert_eq!(recs[0]["hunks"], json!(2));
        assert_eq!(recs[0]["added"], json!(3));
        assert_eq!(recs[0]["removed"], json!(2));
        assert_eq!(recs[1]["rev"], json!(1));
    }

    #[test]
    fn normal_diff_counts() {
        let text = "==== //depot/a.c#3 (text) ====\n\n1c1\n< old\n---\n> new\n5a6,7\n> x\n> y\n";
        let recs = parse_diff(text);
        assert_eq!(recs[0]["type"], json!("text"));
        assert!(recs[0].get("localFile").is_none());
        assert_eq!(recs[0]["hunks"], json!(2));
        assert_eq!(recs[0]["added"], json!(3));
        assert_eq!(recs[0]["removed"], json!(1));
    }

    #[test]
    fn unified_lines_that_look_like_headers_are_counted() {
        let text = "==== //depot/q.sql#2 - /ws/q.sql ====\n--- //depot/q.sql\n+++ /ws/q.sql\n@@ -1,3 +1,3 @@\n--- old\n+-- new\n+++ x\n select 1;\n";
        let recs = parse_diff(text);
        assert_eq!(recs[0]["hunks"], json!(1));
        assert_eq!(recs[0]["removed"], json!(1));
        assert_eq!(recs[0]["added"], json!(2));
    }

    #[test]
    fn identical_files_have_no_hunks() {
        let recs = parse_diff("==== //depot/a.c#3 - /ws/a.c ====\n");
        assert_eq!(recs[0]["hunks"], json!(0));
        assert_eq!(recs[0]["diff"], json!(""));
    }
}
