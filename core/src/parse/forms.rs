use super::{Record, str_val};
use serde_json::Value;

/// Spec-form fields whose lines are independent entries.
const LIST_FIELDS: &[&str] = &[
    "View", "Files", "Jobs", "AltRoots", "ChangeView", "Reviews", "Paths", "Remapped", "Ignored",
];

/// "Server address" -> "serverAddress".
fn camel_join(key: &str) -> String {
    let mut out = String::new();
    for (i, word) in key.split_whitespace().enumerate() {
        let mut chars = word.chars();
        let Some(first) = chars.next() else {
            continue;
        };
        if i == 0 {
            out.extend(first.to_lowercase());
        } else {
            out.extend(first.to_uppercase());
        }
        out.push_str(chars.as_str());
    }
    out
}

/// Colon-delimited `key: value` lines, split at the first `": "`.
pub fn parse_colon(text: &str) -> Record {
    let mut out = Record::new();
    for line in text.lines() {
        let Some((key, value)) = line.split_once(": ") else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        out.insert(key.to_string(), str_val(value.trim()));
    }
    out
}

/// `p4 info`: colon-delimited with multi-word keys folded to camelCase.
pub fn parse_info(text: &str) -> Record {
    parse_colon(text)
        .into_iter()
        .map(|(k, v)| (camel_join(&k), v))
        .collect()
}

/// Spec forms as printed by `client -o`, `user -o`, `change -o` and friends:
/// `Field:<ws>value` lines, tab-indented continuation lines, `#` comments.
pub fn parse_spec_form(text: &str) -> Record {
    let mut fields: Vec<(String, Vec<String>)> = Vec::new();
    for line in text.lines() {
        if line.starts_with('#') {
            continue;
        }
        if line.starts_with('\t') || line.starts_with(' ') {
            if let Some((_, lines)) = fields.last_mut() {
                lines.push(line.trim().to_string());
            }
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        if key.is_empty() || key.contains(char::is_whitespace) {
            continue;
        }
        if !(value.is_empty() || value.starts_with(char::is_whitespace)) {
            continue;
        }
        let value = value.trim();
        let lines = if value.is_empty() {
            Vec::new()
        } else {
            vec![value.to_string()]
        };
        fields.push((key.to_string(), lines));
    }

    let mut out = Record::new();
    for (key, mut lines) in fields {
        let value = if LIST_FIELDS.contains(&key.as_str()) {
            lines.retain(|l| !l.is_empty());
            Value::Array(lines.into_iter().map(Value::String).collect())
        } else {
            while lines.last().is_some_and(|l| l.is_empty()) {
                lines.pop();
            }
            Value::String(lines.join("\n"))
        };
        out.insert(key, value);
    }
    out
}

/// Render a changelist spec for `p4 change -i`.
pub fn render_change_spec(change: &str, description: &str, files: &[String]) -> String {
    let mut spec = format!("Change:\t{change}\n\nDescription:\n");
    for line in description.lines() {
        spec.push('\t');
        spec.push_str(line);
        spec.push('\n');
    }
    if description.trim().is_empty() {
        spec.push_str("\t<none>\n");
    }
    if !files.is_empty() {
        spec.push_str("\nFiles:\n");
        for f in files {
            spec.push('\t');
            spec.push_str(f);
            spec.push('\n');
        }
    }
    spec
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn info_keys_are_camel_joined() {
        let text = "User name: bob\nClient name: bob-ws\nServer address: ssl:p4:1666\nServer version: P4D/LINUX26X86_64/2023.1/2468153 (2023/06/12)\nCase Handling: sensitive\n";
        let rec = parse_info(text);
        assert_eq!(rec["userName"], json!("bob"));
        assert_eq!(rec["clientName"], json!("bob-ws"));
        assert_eq!(rec["serverAddress"], json!("ssl:p4:1666"));
        assert_eq!(rec["caseHandling"], json!("sensitive"));
        assert!(rec["serverVersion"].as_str().unwrap().starts_with("P4D/"));
    }

    #[test]
    fn client_spec_form() {
        let text = "# A Perforce Client Specification.\n#\n#  Client: The client name.\n\nClient:\tbob-ws\n\nUpdate:\t2024/01/15 10:00:00\n\nOwner:\tbob\n\nDescription:\n\tCreated by bob.\n\tSecond line.\n\nRoot:\t/home/bob/ws\n\nView:\n\t//depot/... //bob-ws/...\n\t-//depot/tmp/... //bob-ws/tmp/...\n";
        let rec = parse_spec_form(text);
        assert_eq!(rec["Client"], json!("bob-ws"));
        assert_eq!(rec["Update"], json!("2024/01/15 10:00:00"));
        assert_eq!(rec["Description"], json!("Created by bob.\nSecond line."));
        assert_eq!(rec["Root"], json!("/home/bob/ws"));
        assert_eq!(
            rec["View"],
            json!(["//depot/... //bob-ws/...", "-//depot/tmp/... //bob-ws/tmp/..."])
        );
        assert!(!rec.contains_key("#  Client"));
    }

    #[test]
    fn change_spec_round_trips_through_form_parser() {
        let spec = render_change_spec("new", "Fix crash\nin loader", &["//depot/a.c".into()]);
        let rec = parse_spec_form(&spec);
        assert_eq!(rec["Change"], json!("new"));
        assert_eq!(rec["Description"], json!("Fix crash\nin loader"));
        assert_eq!(rec["Files"], json!(["//depot/a.c"]));
    }
}
