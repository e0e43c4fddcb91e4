//! Project-local `P4CONFIG` discovery and environment assembly.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const CONFIG_MARKER: &str = "P4CONFIG";
pub const DEFAULT_CONFIG_NAME: &str = ".p4config";

/// Keys copied from a config file into the subprocess environment.
pub const RECOGNIZED_KEYS: &[&str] = &[
    "P4PORT",
    "P4USER",
    "P4CLIENT",
    "P4CHARSET",
    "P4PASSWD",
    "P4COMMANDCHARSET",
    "P4LANGUAGE",
    "P4DIFF",
    "P4MERGE",
    "P4EDITOR",
];

const REQUIRED_KEYS: &[&str] = &["P4PORT", "P4USER", "P4CLIENT"];

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigResolution {
    pub found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_root: Option<PathBuf>,
    /// Raw key/value pairs from the file (may include unrecognized keys).
    #[serde(skip)]
    pub config: BTreeMap<String, String>,
    /// Recognized keys plus the config marker.
    #[serde(skip)]
    pub environment: BTreeMap<String, String>,
}

impl ConfigResolution {
    fn not_found(config_name: &str) -> Self {
        Self {
            environment: marker_env(config_name),
            ..Default::default()
        }
    }

    pub fn config_path_string(&self) -> Option<String> {
        self.config_path
            .as_ref()
            .map(|p| p.to_string_lossy().to_string())
    }
}

fn marker_env(config_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(CONFIG_MARKER.to_string(), config_name.to_string())])
}

/// Config file name from `P4CONFIG`, else `.p4config`.
pub fn config_file_name() -> String {
    std::env::var(CONFIG_MARKER)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_CONFIG_NAME.to_string())
}

fn strip_matching_quotes(v: &str) -> &str {
    for q in ['"', '\''] {
        if v.len() >= 2 && v.starts_with(q) && v.ends_with(q) {
            return &v[1..v.len() - 1];
        }
    }
    v
}

pub fn parse_config(content: &str) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        out.insert(
            key.to_string(),
            strip_matching_quotes(value.trim()).to_string(),
        );
    }
    out
}

/// Environment form of a parsed config: allow-listed keys plus the marker.
pub fn config_environment(
    config: &BTreeMap<String, String>,
    config_name: &str,
) -> BTreeMap<String, String> {
    let mut env = marker_env(config_name);
    for key in RECOGNIZED_KEYS {
        if let Some(v) = config.get(*key) {
            env.insert((*key).to_string(), v.clone());
        }
    }
    env
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

/// Search `start` and every ancestor (root included) for `config_name`.
/// Filesystem errors count as "not found".
pub async fn find_config_named(start: &Path, config_name: &str) -> ConfigResolution {
    let start = match tokio::fs::canonicalize(start).await {
        Ok(p) => p,
        Err(_) => start.to_path_buf(),
    };

    let mut dir = Some(start.as_path());
    while let Some(d) = dir {
        let candidate = d.join(config_name);
        if is_file(&candidate).await {
            let content = match tokio::fs::read_to_string(&candidate).await {
                Ok(c) => c,
                Err(err) => {
                    tracing::debug!(path=%candidate.display(), error=%err, "unreadable p4config");
                    return ConfigResolution::not_found(config_name);
                }
            };
            let config = parse_config(&content);
            let environment = config_environment(&config, config_name);
            tracing::debug!(path=%candidate.display(), keys=config.len(), "p4config found");
            return ConfigResolution {
                found: true,
                config_path: Some(candidate),
                project_root: Some(d.to_path_buf()),
                config,
                environment,
            };
        }
        dir = d.parent();
    }

    ConfigResolution::not_found(config_name)
}

pub async fn find_config(start: &Path) -> ConfigResolution {
    find_config_named(start, &config_file_name()).await
}

/// The environment for one call, frozen once assembled.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EffectiveEnv {
    vars: BTreeMap<String, String>,
}

impl EffectiveEnv {
    /// Precedence: overrides > config file > process env > defaults.
    pub fn assemble(
        config_name: &str,
        process: &BTreeMap<String, String>,
        config: &BTreeMap<String, String>,
        overrides: &BTreeMap<String, String>,
    ) -> Self {
        let mut vars = marker_env(config_name);
        for key in RECOGNIZED_KEYS {
            if let Some(v) = process.get(*key) {
                vars.insert((*key).to_string(), v.clone());
            }
        }
        for (k, v) in config.iter().chain(overrides.iter()) {
            vars.insert(k.clone(), v.clone());
        }
        Self { vars }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

pub fn process_env() -> BTreeMap<String, String> {
    std::env::vars().collect()
}

#[derive(Debug, Clone)]
pub struct CommandSetup {
    pub cwd: PathBuf,
    pub env: EffectiveEnv,
    pub resolution: ConfigResolution,
}

/// Resolve config from `start` (default: current dir) and build the
/// working directory and environment for a command.
pub async fn setup_for_command(
    start: Option<&Path>,
    overrides: &BTreeMap<String, String>,
) -> CommandSetup {
    let start = match start {
        Some(p) => p.to_path_buf(),
        None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    };
    let config_name = config_file_name();
    let resolution = find_config_named(&start, &config_name).await;
    let cwd = resolution
        .project_root
        .clone()
        .unwrap_or_else(|| start.clone());
    let env = EffectiveEnv::assemble(
        &config_name,
        &process_env(),
        &resolution.environment,
        overrides,
    );
    CommandSetup {
        cwd,
        env,
        resolution,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnvValidation {
    pub valid: bool,
    pub errors: Vec<String>,
}

pub fn validate_environment(
    resolution: &ConfigResolution,
    process: &BTreeMap<String, String>,
) -> EnvValidation {
    let mut errors = Vec::new();
    for key in REQUIRED_KEYS {
        let present = resolution
            .config
            .get(*key)
            .or_else(|| process.get(*key))
            .is_some_and(|v| !v.trim().is_empty());
        if !present {
            errors.push(format!("{key} is not set (config file or environment)"));
        }
    }
    if !resolution.found {
        let name = resolution
            .environment
            .get(CONFIG_MARKER)
            .cloned()
            .unwrap_or_else(|| DEFAULT_CONFIG_NAME.to_string());
        errors.push(format!("no {name} file found in the directory chain"));
    }
    EnvValidation {
        valid: errors.is_empty(),
        errors,
    }
}
