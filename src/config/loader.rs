// Configuration loader
// Loads ~/.switchboard/config.toml (or an explicit path), then applies
// environment overrides.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::settings::{app_dir, Config};

pub const ENV_WORKER_PROGRAM: &str = "SWITCHBOARD_WORKER_PROGRAM";
pub const ENV_DECISION_DIR: &str = "SWITCHBOARD_DECISION_DIR";
pub const ENV_DECISION_TIMEOUT_SECS: &str = "SWITCHBOARD_DECISION_TIMEOUT_SECS";
pub const ENV_TURN_TIMEOUT_SECS: &str = "SWITCHBOARD_TURN_TIMEOUT_SECS";
pub const ENV_FLUSH_INTERVAL_MS: &str = "SWITCHBOARD_FLUSH_INTERVAL_MS";

/// Load configuration from the default location and the process environment
pub fn load_config() -> Result<Config> {
    load_config_from(None)
}

/// Load configuration from `path` (or the default location when `None`).
///
/// A missing file at the default location is not an error; a missing file at
/// an explicit path is.
pub fn load_config_from(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => read_config_file(path)?,
        None => {
            let default_path = default_config_path();
            if default_path.exists() {
                read_config_file(&default_path)?
            } else {
                debug!(path = %default_path.display(), "No config file, using defaults");
                Config::default()
            }
        }
    };

    apply_overrides(&mut config, |key| std::env::var(key).ok())?;

    config
        .validate()
        .context("Configuration validation failed")?;

    Ok(config)
}

pub fn default_config_path() -> PathBuf {
    app_dir().join("config.toml")
}

fn read_config_file(path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: Config = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    info!(path = %path.display(), "Loaded configuration");
    Ok(config)
}

/// Apply environment overrides. `lookup` abstracts the environment so tests
/// don't have to mutate process state.
pub fn apply_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
    let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    if let Some(program) = get(ENV_WORKER_PROGRAM) {
        config.worker.program = program;
    }
    if let Some(dir) = get(ENV_DECISION_DIR) {
        config.decision.exchange_dir = PathBuf::from(dir);
    }
    if let Some(raw) = get(ENV_DECISION_TIMEOUT_SECS) {
        config.decision.timeout_secs = raw
            .parse()
            .with_context(|| format!("{} must be a number of seconds, got '{}'", ENV_DECISION_TIMEOUT_SECS, raw))?;
    }
    if let Some(raw) = get(ENV_TURN_TIMEOUT_SECS) {
        config.session.turn_timeout_secs = raw
            .parse()
            .with_context(|| format!("{} must be a number of seconds, got '{}'", ENV_TURN_TIMEOUT_SECS, raw))?;
    }
    if let Some(raw) = get(ENV_FLUSH_INTERVAL_MS) {
        config.streaming.flush_interval_ms = raw
            .parse()
            .with_context(|| format!("{} must be a number of milliseconds, got '{}'", ENV_FLUSH_INTERVAL_MS, raw))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_env_overrides_apply() {
        let env: HashMap<&str, &str> = [
            (ENV_DECISION_DIR, "/tmp/exchange"),
            (ENV_FLUSH_INTERVAL_MS, "25"),
            (ENV_WORKER_PROGRAM, "  node  "),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        apply_overrides(&mut config, |key| env.get(key).map(|v| v.to_string())).unwrap();

        assert_eq!(config.decision.exchange_dir, PathBuf::from("/tmp/exchange"));
        assert_eq!(config.streaming.flush_interval_ms, 25);
        assert_eq!(config.worker.program, "node");
    }

    #[test]
    fn test_bad_numeric_override_is_an_error() {
        let mut config = Config::default();
        let result = apply_overrides(&mut config, |key| {
            (key == ENV_TURN_TIMEOUT_SECS).then(|| "soon".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_explicit_file_is_loaded() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "history_dir = \"/tmp/sb-history\"\n[worker]\nprogram = \"node\"\nargs = [\"bridge.js\"]"
        )
        .unwrap();

        let config = load_config_from(Some(file.path())).unwrap();
        assert_eq!(config.worker.args, vec!["bridge.js".to_string()]);
        assert_eq!(config.history_dir, PathBuf::from("/tmp/sb-history"));
    }

    #[test]
    fn test_missing_explicit_file_fails() {
        let result = load_config_from(Some(Path::new("/nonexistent/switchboard.toml")));
        assert!(result.is_err());
    }
}
