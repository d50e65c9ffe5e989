use serde::{Deserialize, Serialize};
use std::{env, path::Path, path::PathBuf};
use thiserror::Error;
use ts_rs::TS;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    pub app: AppConfig,
    pub paths: PathsConfig,
    pub telemetry: TelemetryConfig,
    pub provider: ProviderConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AppConfig {
    pub service_name: String,
    pub port: u16,
    pub env: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PathsConfig {
    pub database: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TelemetryConfig {
    pub otlp_endpoint: Option<String>,
    pub export_traces: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ProviderConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_user_id")]
    pub user_id: String,
    pub access_token: String,
}

fn default_api_base() -> String {
    "https://gmail.googleapis.com/gmail/v1/users".to_string()
}

fn default_user_id() -> String {
    "me".to_string()
}

/// Tuning for the action engine. Every field has a default so the whole
/// section may be omitted.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct EngineConfig {
    pub proposal_ttl_days: u32,
    pub preview_sample_size: usize,
    pub max_concurrency: usize,
    pub provider_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub max_realization_attempts: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            proposal_ttl_days: 7,
            preview_sample_size: 5,
            max_concurrency: 4,
            provider_max_attempts: 3,
            retry_base_delay_ms: 200,
            max_realization_attempts: 3,
        }
    }
}

/// Which pipeline a scheduler tick runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum PipelineMode {
    DryRun,
    Execute,
}

impl PipelineMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineMode::DryRun => "dry_run",
            PipelineMode::Execute => "execute",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub mode: PipelineMode,
    pub paused: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 3600,
            mode: PipelineMode::DryRun,
            paused: false,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read configuration file: {0}")]
    ConfigBuild(config::ConfigError),
    #[error("failed to parse configuration: {0}")]
    Deserialize(config::ConfigError),
    #[error("missing required environment variable {0}")]
    MissingEnvVar(String),
    #[error("invalid APP_PORT override: {0}")]
    InvalidPort(std::num::ParseIntError),
}

impl Config {
    /// Load configuration from the provided path, apply environment overrides, and
    /// resolve any `env:` indirections.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .build()
            .map_err(ConfigError::ConfigBuild)?;

        let mut cfg: Config = raw.try_deserialize().map_err(ConfigError::Deserialize)?;
        cfg.apply_env_overrides()?;
        cfg.resolve_env_markers()?;
        cfg.expand_paths();
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(port) = env::var("APP_PORT") {
            self.app.port = port.parse().map_err(ConfigError::InvalidPort)?;
        }

        if let Ok(otlp) = env::var("OTLP_ENDPOINT") {
            self.telemetry.otlp_endpoint = Some(otlp);
        }

        if let Ok(token) = env::var("MAIL_PROVIDER_TOKEN") {
            self.provider.access_token = token;
        }

        Ok(())
    }

    fn resolve_env_markers(&mut self) -> Result<(), ConfigError> {
        apply_env_marker(&mut self.app.service_name)?;
        apply_env_marker(&mut self.app.env)?;
        apply_env_marker(&mut self.provider.api_base)?;
        apply_env_marker(&mut self.provider.user_id)?;
        apply_env_marker(&mut self.provider.access_token)?;
        apply_env_marker_path(&mut self.paths.database)?;
        if let Some(endpoint) = &mut self.telemetry.otlp_endpoint {
            apply_env_marker(endpoint)?;
        }
        Ok(())
    }

    fn expand_paths(&mut self) {
        let database_string = self.paths.database.to_string_lossy().to_string();
        let database = shellexpand::tilde(&database_string);
        self.paths.database = PathBuf::from(database.as_ref());
    }
}

fn apply_env_marker(value: &mut String) -> Result<(), ConfigError> {
    if let Some(rest) = value.strip_prefix("env:") {
        *value = env::var(rest).map_err(|_| ConfigError::MissingEnvVar(rest.to_string()))?;
    }
    Ok(())
}

fn apply_env_marker_path(path: &mut PathBuf) -> Result<(), ConfigError> {
    let mut value = path.to_string_lossy().to_string();
    apply_env_marker(&mut value)?;
    *path = PathBuf::from(value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::Lazy;
    use std::{fs, sync::Mutex};
    use tempfile::TempDir;

    static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

    fn write_config(contents: &str) -> (TempDir, PathBuf) {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, contents).expect("write config");
        (dir, path)
    }

    fn with_env(vars: &[(&str, Option<&str>)], f: impl FnOnce()) {
        let _guard = ENV_LOCK.lock().expect("lock env");
        let saved: Vec<(String, Option<String>)> = vars
            .iter()
            .map(|(k, _)| (k.to_string(), env::var(k).ok()))
            .collect();

        for (key, value) in vars {
            match value {
                Some(v) => unsafe { env::set_var(key, v) },
                None => unsafe { env::remove_var(key) },
            }
        }

        f();

        for (key, value) in saved {
            match value {
                Some(v) => unsafe { env::set_var(&key, v) },
                None => unsafe { env::remove_var(&key) },
            }
        }
    }

    fn minimal_body(database_path: &str, token: &str) -> String {
        format!(
            r#"
[app]
service_name = "mailsweep"
port = 17900
env = "dev"

[paths]
database = "{database_path}"

[telemetry]
otlp_endpoint = "http://localhost:4318"
export_traces = false

[provider]
access_token = "{token}"
"#
        )
    }

    #[test]
    fn optional_sections_fall_back_to_defaults() {
        let (_dir, path) = write_config(&minimal_body("/tmp/mailsweep.db", "file-token"));

        with_env(
            &[
                ("APP_PORT", None),
                ("OTLP_ENDPOINT", None),
                ("MAIL_PROVIDER_TOKEN", None),
            ],
            || {
                let cfg = Config::load(&path).expect("config loads");
                assert_eq!(cfg.provider.user_id, "me");
                assert_eq!(
                    cfg.provider.api_base,
                    "https://gmail.googleapis.com/gmail/v1/users"
                );
                assert_eq!(cfg.engine.proposal_ttl_days, 7);
                assert_eq!(cfg.engine.preview_sample_size, 5);
                assert_eq!(cfg.engine.max_concurrency, 4);
                assert_eq!(cfg.engine.provider_max_attempts, 3);
                assert_eq!(cfg.engine.max_realization_attempts, 3);
                assert!(cfg.scheduler.enabled);
                assert_eq!(cfg.scheduler.mode, PipelineMode::DryRun);
                assert_eq!(cfg.scheduler.interval_secs, 3600);
            },
        );
    }

    #[test]
    fn load_config_expands_tilde_and_resolves_env_markers() {
        let (dir, path) = write_config(&minimal_body("env:DB_PATH", "env:GMAIL_TOKEN"));
        let home_dir = dir.path().join("home");
        fs::create_dir_all(&home_dir).expect("create home dir");
        let expected_db = home_dir.join("db/mailsweep.db");

        with_env(
            &[
                ("APP_PORT", None),
                ("OTLP_ENDPOINT", None),
                ("MAIL_PROVIDER_TOKEN", None),
                ("HOME", Some(home_dir.to_str().expect("utf8 home"))),
                ("DB_PATH", Some("~/db/mailsweep.db")),
                ("GMAIL_TOKEN", Some("secret-token")),
            ],
            || {
                let cfg = Config::load(&path).expect("config loads");
                assert_eq!(cfg.app.service_name, "mailsweep");
                assert_eq!(cfg.paths.database, expected_db);
                assert_eq!(cfg.provider.access_token, "secret-token");
            },
        );
    }

    #[test]
    fn partial_engine_and_scheduler_sections_merge_with_defaults() {
        let body = format!(
            "{}\n[engine]\nproposal_ttl_days = 14\nmax_concurrency = 8\n\n[scheduler]\nmode = \"execute\"\ninterval_secs = 600\n",
            minimal_body("/tmp/mailsweep.db", "token")
        );
        let (_dir, path) = write_config(&body);

        with_env(&[("APP_PORT", None), ("MAIL_PROVIDER_TOKEN", None)], || {
            let cfg = Config::load(&path).expect("config loads");
            assert_eq!(cfg.engine.proposal_ttl_days, 14);
            assert_eq!(cfg.engine.max_concurrency, 8);
            assert_eq!(cfg.engine.retry_base_delay_ms, 200);
            assert_eq!(cfg.scheduler.mode, PipelineMode::Execute);
            assert_eq!(cfg.scheduler.interval_secs, 600);
            assert!(!cfg.scheduler.paused);
        });
    }

    #[test]
    fn env_overrides_take_precedence() {
        let (_dir, path) = write_config(&minimal_body("/tmp/mailsweep.db", "file-token"));

        with_env(
            &[
                ("APP_PORT", Some("19000")),
                ("OTLP_ENDPOINT", Some("http://override.local:4318")),
                ("MAIL_PROVIDER_TOKEN", Some("env-token")),
            ],
            || {
                let cfg = Config::load(&path).expect("config loads");
                assert_eq!(cfg.app.port, 19000);
                assert_eq!(
                    cfg.telemetry.otlp_endpoint.as_deref(),
                    Some("http://override.local:4318")
                );
                assert_eq!(cfg.provider.access_token, "env-token");
            },
        );
    }

    #[test]
    fn env_marker_without_variable_errors() {
        let (_dir, path) = write_config(&minimal_body("/tmp/mailsweep.db", "env:NEEDS_TOKEN"));

        with_env(
            &[("MAIL_PROVIDER_TOKEN", None), ("NEEDS_TOKEN", None)],
            || {
                let err = Config::load(&path).expect_err("missing env var should error");
                match err {
                    ConfigError::MissingEnvVar(name) => assert_eq!(name, "NEEDS_TOKEN"),
                    other => panic!("unexpected error: {other}"),
                }
            },
        );
    }

    #[test]
    fn invalid_port_override_is_reported() {
        let (_dir, path) = write_config(&minimal_body("/tmp/mailsweep.db", "token"));

        with_env(&[("APP_PORT", Some("not-a-number"))], || {
            let err = Config::load(&path).expect_err("invalid port should error");
            assert!(matches!(err, ConfigError::InvalidPort(_)));
        });
    }
}
