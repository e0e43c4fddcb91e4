use regex::Regex;
use std::collections::BTreeMap;

pub const MASK: &str = "********";

/// Connection keys echoed back in a command envelope. Anything else in the
/// effective environment stays private to the subprocess.
pub const CONNECTION_KEYS: &[&str] = &[
    "P4PORT",
    "P4USER",
    "P4CLIENT",
    "P4CHARSET",
    "P4CONFIG",
    "P4PASSWD",
];

const SECRET_KEYS: &[&str] = &["P4PASSWD"];

pub struct Redactor {
    kv_regex: Regex,
    ticket_regex: Regex,
    extra: Vec<Regex>,
}

impl Redactor {
    pub fn new(extra_patterns: &[String]) -> anyhow::Result<Self> {
        let kv_regex = Regex::new(
            r#"(?ix)
            \b(p4passwd|password|passwd|ticket|token|secret)\b
            \s*[:=]\s*
            ([^\s'"]+|"[^"]*"|'[^']*')
        "#,
        )?;
        // p4 tickets are 32 uppercase hex characters.
        let ticket_regex = Regex::new(r"\b[0-9A-F]{32}\b")?;

        let mut extra = Vec::new();
        for pat in extra_patterns {
            extra.push(Regex::new(pat)?);
        }

        Ok(Self {
            kv_regex,
            ticket_regex,
            extra,
        })
    }

    pub fn redact(&self, raw: &str) -> String {
        let mut redacted = self
            .kv_regex
            .replace_all(raw, format!("$1={MASK}").as_str())
            .to_string();

        for extra in &self.extra {
            redacted = extra.replace_all(&redacted, MASK).to_string();
        }

        self.ticket_regex.replace_all(&redacted, MASK).to_string()
    }

    /// Keep only the connection allow-list, masking secret values.
    pub fn connection_details<'a, I>(&self, env: I) -> BTreeMap<String, String>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        env.into_iter()
            .filter(|(k, _)| CONNECTION_KEYS.contains(k))
            .map(|(k, v)| {
                let v = if SECRET_KEYS.contains(&k) {
                    MASK.to_string()
                } else {
                    v.to_string()
                };
                (k.to_string(), v)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_password_assignments_and_tickets() {
        let r = Redactor::new(&[]).unwrap();
        let out = r.redact("P4PASSWD=hunter2 failed; ticket ABCDEF0123456789ABCDEF0123456789 expired");
        assert!(!out.contains("hunter2"));
        assert!(!out.contains("ABCDEF0123456789ABCDEF0123456789"));
        assert!(out.contains("P4PASSWD=********"));
    }

    #[test]
    fn extra_patterns_apply() {
        let r = Redactor::new(&["corp-[0-9]+".to_string()]).unwrap();
        assert_eq!(r.redact("host corp-42 down"), "host ******** down");
    }

    #[test]
    fn connection_details_are_allow_listed_and_masked() {
        let r = Redactor::new(&[]).unwrap();
        let env = [
            ("P4PORT", "ssl:p4:1666"),
            ("P4PASSWD", "hunter2"),
            ("P4EDITOR", "vim"),
            ("HOME", "/home/bob"),
        ];
        let details = r.connection_details(env);
        assert_eq!(details.get("P4PORT").map(String::as_str), Some("ssl:p4:1666"));
        assert_eq!(details.get("P4PASSWD").map(String::as_str), Some(MASK));
        assert!(!details.contains_key("P4EDITOR"));
        assert!(!details.contains_key("HOME"));
    }
}
