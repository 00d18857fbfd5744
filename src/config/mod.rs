//! Configuration for the hawser bot.
//!
//! All configuration comes from environment variables with the `HAWSER_`
//! prefix. An environment file is required and seeds anything not already
//! set in the process environment; real environment variables always win.
//!
//! The file is looked for at:
//! - `./.env` - local override, useful during development
//! - `~/.config/hawser/env` - the deployed location
//!
//! A missing file is a hard startup error: the bot holds several vendor
//! credentials and silently running without them only surfaces later as
//! confusing API failures.
//!
//! Accessors are grouped per service (`tracker()`, `workspace()`, `hr()`,
//! `metric_api()`, `settings()`) so each subcommand validates only the
//! keys it actually needs.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the local environment file.
pub const ENV_FILE_LOCAL: &str = ".env";

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no environment file found (looked for {0})")]
    EnvFileNotFound(String),

    #[error("failed to load environment file {0}: {1}")]
    EnvFileInvalid(String, String),

    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, String),
}

/// Connection settings for the issue tracker.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Base URL of the tracker instance, without a trailing slash.
    pub base_url: String,
    pub token: String,
}

/// Connection settings for the project workspace.
#[derive(Debug, Clone)]
pub struct WorkspaceConfig {
    pub token: String,
    /// Database that holds task pages.
    pub task_db: String,
    /// Database that holds the metrics catalog, when catalog sync is used.
    pub catalog_db: Option<String>,
}

/// Connection settings for the leave-tracking HR service.
#[derive(Debug, Clone)]
pub struct HrConfig {
    pub base_url: String,
    pub client_id: String,
    pub client_secret: String,
    /// Default employee for leave reports.
    pub employee: Option<String>,
}

/// Connection settings for the metrics service.
#[derive(Debug, Clone)]
pub struct MetricApiConfig {
    pub base_url: String,
    pub token: String,
}

/// Bot-wide tunables with their defaults applied.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Username the bot's own tracker notes are written under.
    pub bot_username: String,
    /// Seconds between sync passes.
    pub interval_secs: u64,
    /// Directory for the sync-state database and caches.
    pub state_dir: PathBuf,
    /// How far back to look for issues to link, in minutes.
    pub link_window_mins: i64,
    /// How far back to look for closed issues to mirror, in minutes.
    pub closed_window_mins: i64,
    /// Maximum age of the metrics compute cache.
    pub cache_max_age: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            bot_username: "hawser-bot".to_string(),
            interval_secs: 300,
            state_dir: default_state_dir(),
            link_window_mins: 720,
            closed_window_mins: 600,
            cache_max_age: Duration::from_secs(600),
        }
    }
}

fn default_state_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("hawser")
}

/// Loaded configuration. Holding one proves the environment file was read.
#[derive(Debug, Clone)]
pub struct Config {
    /// The environment file that seeded the process environment.
    pub env_file: PathBuf,
}

impl Config {
    /// Load configuration from the standard environment file locations.
    pub fn load() -> Result<Self, ConfigError> {
        let mut candidates = vec![PathBuf::from(ENV_FILE_LOCAL)];
        if let Some(config_dir) = dirs::config_dir() {
            candidates.push(config_dir.join("hawser").join("env"));
        }
        Self::load_from(&candidates)
    }

    /// Load configuration from the first existing file in `candidates`.
    pub fn load_from(candidates: &[PathBuf]) -> Result<Self, ConfigError> {
        for candidate in candidates {
            if candidate.is_file() {
                return Self::load_file(candidate);
            }
        }
        let looked = candidates
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        Err(ConfigError::EnvFileNotFound(looked))
    }

    fn load_file(path: &Path) -> Result<Self, ConfigError> {
        // Values already present in the environment are preserved.
        dotenvy::from_path(path).map_err(|e| {
            ConfigError::EnvFileInvalid(path.display().to_string(), e.to_string())
        })?;
        Ok(Config {
            env_file: path.to_path_buf(),
        })
    }

    pub fn tracker(&self) -> Result<TrackerConfig, ConfigError> {
        Ok(TrackerConfig {
            base_url: required("HAWSER_TRACKER_URL")?
                .trim_end_matches('/')
                .to_string(),
            token: required("HAWSER_TRACKER_TOKEN")?,
        })
    }

    pub fn workspace(&self) -> Result<WorkspaceConfig, ConfigError> {
        Ok(WorkspaceConfig {
            token: required("HAWSER_WORKSPACE_TOKEN")?,
            task_db: required("HAWSER_TASK_DB_ID")?,
            catalog_db: optional("HAWSER_CATALOG_DB_ID"),
        })
    }

    pub fn hr(&self) -> Result<HrConfig, ConfigError> {
        Ok(HrConfig {
            base_url: required("HAWSER_HR_URL")?.trim_end_matches('/').to_string(),
            client_id: required("HAWSER_HR_CLIENT_ID")?,
            client_secret: required("HAWSER_HR_CLIENT_SECRET")?,
            employee: optional("HAWSER_HR_EMPLOYEE"),
        })
    }

    pub fn metric_api(&self) -> Result<MetricApiConfig, ConfigError> {
        Ok(MetricApiConfig {
            base_url: required("HAWSER_METRIC_API_URL")?
                .trim_end_matches('/')
                .to_string(),
            token: required("HAWSER_METRIC_API_TOKEN")?,
        })
    }

    pub fn settings(&self) -> Result<Settings, ConfigError> {
        let mut settings = Settings::default();
        if let Some(user) = optional("HAWSER_BOT_USER") {
            settings.bot_username = user;
        }
        if let Some(secs) = optional("HAWSER_INTERVAL_SECS") {
            settings.interval_secs = parse_num("HAWSER_INTERVAL_SECS", &secs)?;
        }
        if let Some(dir) = optional("HAWSER_STATE_DIR") {
            settings.state_dir = PathBuf::from(dir);
        }
        if let Some(mins) = optional("HAWSER_LINK_WINDOW_MINS") {
            settings.link_window_mins = parse_num("HAWSER_LINK_WINDOW_MINS", &mins)?;
        }
        if let Some(mins) = optional("HAWSER_CLOSED_WINDOW_MINS") {
            settings.closed_window_mins = parse_num("HAWSER_CLOSED_WINDOW_MINS", &mins)?;
        }
        if let Some(secs) = optional("HAWSER_CACHE_MAX_AGE_SECS") {
            settings.cache_max_age =
                Duration::from_secs(parse_num("HAWSER_CACHE_MAX_AGE_SECS", &secs)?);
        }
        Ok(settings)
    }
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::Missing(key)),
    }
}

fn optional(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_num<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::Invalid(key, value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    /// Sets an env var for the duration of a test and restores it on drop.
    struct EnvGuard {
        key: &'static str,
        previous: Option<String>,
    }

    impl EnvGuard {
        fn set(key: &'static str, value: &str) -> Self {
            let previous = std::env::var(key).ok();
            // SAFETY: tests touching the environment are serialized with
            // #[serial], so no other thread reads the environment here.
            unsafe {
                std::env::set_var(key, value);
            }
            EnvGuard { key, previous }
        }

        fn unset(key: &'static str) -> Self {
            let previous = std::env::var(key).ok();
            // SAFETY: see EnvGuard::set.
            unsafe {
                std::env::remove_var(key);
            }
            EnvGuard { key, previous }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            // SAFETY: see EnvGuard::set.
            unsafe {
                match &self.previous {
                    Some(v) => std::env::set_var(self.key, v),
                    None => std::env::remove_var(self.key),
                }
            }
        }
    }

    fn loaded() -> Config {
        Config {
            env_file: PathBuf::from(".env"),
        }
    }

    #[test]
    #[serial]
    fn test_load_from_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let candidates = vec![dir.path().join(".env"), dir.path().join("env")];
        let err = Config::load_from(&candidates).unwrap_err();
        assert!(matches!(err, ConfigError::EnvFileNotFound(_)));
        assert!(err.to_string().contains(".env"));
    }

    #[test]
    #[serial]
    fn test_load_from_reads_file_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "HAWSER_TEST_FILE_KEY=from-file").unwrap();
        drop(file);

        let _guard = EnvGuard::unset("HAWSER_TEST_FILE_KEY");
        let config = Config::load_from(std::slice::from_ref(&path)).unwrap();
        assert_eq!(config.env_file, path);
        assert_eq!(
            std::env::var("HAWSER_TEST_FILE_KEY").unwrap(),
            "from-file"
        );
    }

    #[test]
    #[serial]
    fn test_environment_wins_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "HAWSER_TEST_PRECEDENCE=from-file").unwrap();
        drop(file);

        let _guard = EnvGuard::set("HAWSER_TEST_PRECEDENCE", "from-env");
        Config::load_from(std::slice::from_ref(&path)).unwrap();
        assert_eq!(
            std::env::var("HAWSER_TEST_PRECEDENCE").unwrap(),
            "from-env"
        );
    }

    #[test]
    #[serial]
    fn test_tracker_requires_url_and_token() {
        let _url = EnvGuard::unset("HAWSER_TRACKER_URL");
        let _token = EnvGuard::unset("HAWSER_TRACKER_TOKEN");
        let err = loaded().tracker().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("HAWSER_TRACKER_URL")));
    }

    #[test]
    #[serial]
    fn test_tracker_trims_trailing_slash() {
        let _url = EnvGuard::set("HAWSER_TRACKER_URL", "https://tracker.example.com/");
        let _token = EnvGuard::set("HAWSER_TRACKER_TOKEN", "secret");
        let tracker = loaded().tracker().unwrap();
        assert_eq!(tracker.base_url, "https://tracker.example.com");
    }

    #[test]
    #[serial]
    fn test_settings_defaults() {
        let _a = EnvGuard::unset("HAWSER_BOT_USER");
        let _b = EnvGuard::unset("HAWSER_INTERVAL_SECS");
        let _c = EnvGuard::unset("HAWSER_LINK_WINDOW_MINS");
        let _d = EnvGuard::unset("HAWSER_CLOSED_WINDOW_MINS");
        let _e = EnvGuard::unset("HAWSER_CACHE_MAX_AGE_SECS");
        let settings = loaded().settings().unwrap();
        assert_eq!(settings.bot_username, "hawser-bot");
        assert_eq!(settings.interval_secs, 300);
        assert_eq!(settings.link_window_mins, 720);
        assert_eq!(settings.closed_window_mins, 600);
        assert_eq!(settings.cache_max_age, Duration::from_secs(600));
    }

    #[test]
    #[serial]
    fn test_settings_overrides() {
        let _a = EnvGuard::set("HAWSER_INTERVAL_SECS", "900");
        let _b = EnvGuard::set("HAWSER_BOT_USER", "deck-bot");
        let settings = loaded().settings().unwrap();
        assert_eq!(settings.interval_secs, 900);
        assert_eq!(settings.bot_username, "deck-bot");
    }

    #[test]
    #[serial]
    fn test_settings_rejects_bad_numbers() {
        let _guard = EnvGuard::set("HAWSER_INTERVAL_SECS", "soon");
        let err = loaded().settings().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid("HAWSER_INTERVAL_SECS", _)
        ));
    }

    #[test]
    #[serial]
    fn test_blank_value_counts_as_missing() {
        let _guard = EnvGuard::set("HAWSER_TRACKER_URL", "  ");
        let _token = EnvGuard::set("HAWSER_TRACKER_TOKEN", "secret");
        let err = loaded().tracker().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("HAWSER_TRACKER_URL")));
    }
}
