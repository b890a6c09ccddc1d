use std::sync::OnceLock;
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use regex::{Captures, Regex};

use crate::error::RefgenError;

pub const CONFIG_ENV_VAR: &str = "REFGENIE";
pub const DEFAULT_WAIT_MAX_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct Settings {
    pub config_path: Utf8PathBuf,
    pub wait_max: Duration,
}

pub struct SettingsLoader;

impl SettingsLoader {
    pub fn resolve(path: Option<&str>, wait_max: Option<u64>) -> Result<Settings, RefgenError> {
        let from_env = std::env::var(CONFIG_ENV_VAR)
            .ok()
            .filter(|value| !value.trim().is_empty());
        Self::resolve_with(path, from_env.as_deref(), wait_max)
    }

    pub fn resolve_with(
        path: Option<&str>,
        env_path: Option<&str>,
        wait_max: Option<u64>,
    ) -> Result<Settings, RefgenError> {
        let raw = path.or(env_path).ok_or(RefgenError::MissingConfig)?;
        Ok(Settings {
            config_path: Utf8PathBuf::from(expand_path(raw)),
            wait_max: Duration::from_secs(wait_max.unwrap_or(DEFAULT_WAIT_MAX_SECS)),
        })
    }
}

fn env_var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$(?:\{([A-Za-z_][A-Za-z0-9_]*)\}|([A-Za-z_][A-Za-z0-9_]*))")
            .expect("environment variable pattern is valid")
    })
}

fn var_name<'a>(caps: &'a Captures<'_>) -> &'a str {
    caps.get(1)
        .or_else(|| caps.get(2))
        .map(|m| m.as_str())
        .unwrap_or_default()
}

/// Names of environment variables referenced in `path` that are not set,
/// in order of appearance and without repeats.
pub fn unbound_env_vars(path: &str) -> Vec<String> {
    let mut missing: Vec<String> = Vec::new();
    for caps in env_var_pattern().captures_iter(path) {
        let name = var_name(&caps);
        if std::env::var_os(name).is_none() && !missing.iter().any(|known| known == name) {
            missing.push(name.to_string());
        }
    }
    missing
}

/// Expands a leading `~` and every bound `$VAR`/`${VAR}`; unbound references
/// are left in place.
pub fn expand_path(path: &str) -> String {
    let with_home = match path.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => BaseDirs::new()
            .and_then(|dirs| dirs.home_dir().to_str().map(|home| format!("{home}{rest}")))
            .unwrap_or_else(|| path.to_string()),
        _ => path.to_string(),
    };
    env_var_pattern()
        .replace_all(&with_home, |caps: &Captures<'_>| {
            std::env::var(var_name(caps)).unwrap_or_else(|_| caps[0].to_string())
        })
        .into_owned()
}
