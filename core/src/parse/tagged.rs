use super::{Record, coerce_scalar};
use serde_json::Value;

fn tag_line(line: &str) -> Option<(&str, &str)> {
    let mut rest = line.strip_prefix("... ")?;
    while let Some(r) = rest.strip_prefix("... ") {
        rest = r;
    }
    let rest = rest.trim_end();
    match rest.split_once(' ') {
        Some((k, v)) if !k.is_empty() => Some((k, v)),
        None if !rest.is_empty() => Some((rest, "")),
        _ => None,
    }
}

/// All records of `-ztag` output, in order.
///
/// A blank line closes the current record. A key that repeats inside the
/// open record also starts a new one, since `-s` output can lose the blank
/// separators.
pub fn parse_tagged_records(text: &str) -> Vec<Record> {
    let mut out = Vec::new();
    let mut current = Record::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                out.push(std::mem::take(&mut current));
            }
            continue;
        }
        let Some((key, value)) = tag_line(line) else {
            continue;
        };
        if current.contains_key(key) {
            out.push(std::mem::take(&mut current));
        }
        current.insert(key.to_string(), coerce_scalar(value));
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

/// One record comes back unwrapped, several as an array.
pub fn parse_tagged(text: &str) -> Value {
    let mut records = parse_tagged_records(text);
    if records.len() == 1 {
        return Value::Object(records.remove(0));
    }
    Value::Array(records.into_iter().map(Value::Object).collect())
}
