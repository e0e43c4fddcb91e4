use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

pub const MAX_PATTERN_CHARS: usize = 1000;

/// Warnings carrying this word make the input invalid; all others are
/// advisory.
const BLOCKING_MARKER: &str = "dangerous";

const SHELL_META: &[char] = &['<', '>', '|', ';', '&', '$'];

static NESTED_QUANTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\([^()]*[+*][^()]*\)\s*[+*{]").expect("nested quantifier regex")
});
static WINDOWS_ABSOLUTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z]:[\\/]").expect("windows path regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputKind {
    Filespec,
    Pattern,
    Path,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SanitizeResult {
    pub valid: bool,
    pub sanitized: String,
    pub warnings: Vec<String>,
}

impl SanitizeResult {
    fn from_warnings(sanitized: String, warnings: Vec<String>) -> Self {
        let valid = !warnings.iter().any(|w| w.contains(BLOCKING_MARKER));
        Self {
            valid,
            sanitized,
            warnings,
        }
    }
}

pub fn sanitize(value: &str, kind: InputKind) -> SanitizeResult {
    match kind {
        InputKind::Filespec => sanitize_filespec(value),
        InputKind::Pattern => sanitize_pattern(value),
        InputKind::Path => sanitize_path(value),
    }
}

fn is_depot_path(value: &str) -> bool {
    value.starts_with("//")
}

/// `..` anywhere, except as part of the `...` wildcard.
fn contains_parent_ref(value: &str) -> bool {
    value
        .split(|c: char| c != '.')
        .any(|run| run.len() == 2)
}

fn sanitize_filespec(value: &str) -> SanitizeResult {
    let mut warnings = Vec::new();
    let has_traversal = contains_parent_ref(value);

    if has_traversal && !is_depot_path(value) {
        warnings.push(format!("path traversal segment in filespec: {value}"));
    }
    if has_traversal && (value.contains("...") || value.contains('*')) {
        warnings.push(format!(
            "dangerous wildcard combined with path traversal: {value}"
        ));
    }

    let sanitized: String = value.chars().filter(|c| !SHELL_META.contains(c)).collect();
    if sanitized.len() != value.len() {
        warnings.push("removed shell metacharacters from filespec".to_string());
    }
    SanitizeResult::from_warnings(sanitized, warnings)
}

fn sanitize_pattern(value: &str) -> SanitizeResult {
    let mut warnings = Vec::new();
    let mut sanitized = value.to_string();
    if value.chars().count() > MAX_PATTERN_CHARS {
        sanitized = value.chars().take(MAX_PATTERN_CHARS).collect();
        warnings.push(format!(
            "pattern truncated to {MAX_PATTERN_CHARS} characters"
        ));
    }
    if sanitized.contains('\0') {
        warnings.push("dangerous pattern: embedded null byte".to_string());
    }
    if sanitized.contains("(?<=") || sanitized.contains("(?<!") {
        warnings.push("dangerous pattern: lookbehind assertion".to_string());
    }
    if NESTED_QUANTIFIER.is_match(&sanitized) {
        warnings.push(
            "dangerous pattern: nested quantifier may cause catastrophic backtracking".to_string(),
        );
    }
    SanitizeResult::from_warnings(sanitized, warnings)
}

fn sanitize_path(value: &str) -> SanitizeResult {
    let mut warnings = Vec::new();
    let absolute = (value.starts_with('/') && !is_depot_path(value))
        || WINDOWS_ABSOLUTE.is_match(value);
    if absolute {
        warnings.push(format!("absolute local path outside depot syntax: {value}"));
    }
    let sanitized: String = value.chars().filter(|c| *c != '\0').collect();
    if sanitized.len() != value.len() {
        warnings.push("removed null bytes from path".to_string());
    }
    SanitizeResult::from_warnings(sanitized, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_traversal_is_advisory() {
        let r = sanitize("../other/file.c", InputKind::Filespec);
        assert!(r.valid);
        assert_eq!(r.warnings.len(), 1);
        assert!(r.warnings[0].contains("traversal"));
    }

    #[test]
    fn depot_paths_with_dots_are_fine() {
        let r = sanitize("//depot/main/...", InputKind::Filespec);
        assert!(r.valid);
        assert!(r.warnings.is_empty());
        assert_eq!(r.sanitized, "//depot/main/...");
    }

    #[test]
    fn dots_inside_a_segment_count_as_traversal() {
        let r = sanitize("a/..b", InputKind::Filespec);
        assert!(r.valid);
        assert!(r.warnings.iter().any(|w| w.contains("traversal")));

        assert!(sanitize("//depot/main/....c", InputKind::Filespec).warnings.is_empty());
        assert!(sanitize("src/.../x.c", InputKind::Filespec).warnings.is_empty());
    }

    #[test]
    fn wildcard_with_traversal_blocks() {
        let r = sanitize("//depot/main/../secret/...", InputKind::Filespec);
        assert!(!r.valid);
    }

    #[test]
    fn shell_metacharacters_are_stripped() {
        let r = sanitize("//depot/a.c; rm -rf $HOME | cat > x & <y", InputKind::Filespec);
        assert!(r.valid);
        assert_eq!(r.sanitized, "//depot/a.c rm -rf HOME  cat  x  y");
    }

    #[test]
    fn lookbehind_pattern_is_dangerous() {
        let r = sanitize("(?<=foo)bar", InputKind::Pattern);
        assert!(!r.valid);
        assert!(r.warnings.iter().any(|w| w.contains("dangerous")));
    }

    #[test]
    fn nested_quantifier_is_dangerous() {
        assert!(!sanitize("(a+)+$", InputKind::Pattern).valid);
        assert!(!sanitize("(.*a)*", InputKind::Pattern).valid);
        assert!(sanitize("fo+bar", InputKind::Pattern).valid);
    }

    #[test]
    fn long_pattern_is_truncated_but_valid() {
        let long = "a".repeat(MAX_PATTERN_CHARS + 50);
        let r = sanitize(&long, InputKind::Pattern);
        assert!(r.valid);
        assert_eq!(r.sanitized.len(), MAX_PATTERN_CHARS);
        assert_eq!(r.warnings.len(), 1);
    }

    #[test]
    fn absolute_paths_warn_and_nulls_are_stripped() {
        let r = sanitize("/etc/passwd\0", InputKind::Path);
        assert!(r.valid);
        assert_eq!(r.sanitized, "/etc/passwd");
        assert_eq!(r.warnings.len(), 2);

        assert!(sanitize("C:\\ws\\a.c", InputKind::Path).warnings.len() == 1);
        assert!(sanitize("//depot/a.c", InputKind::Path).warnings.is_empty());
    }
}
