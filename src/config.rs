//! Command line and environment configuration
//!
//! Every option can come from a flag or an environment variable; a `.env`
//! file in the working directory is loaded before parsing. Backend settings
//! are checked once at start-up and the program refuses to run without them
//! unless `--offline` is given.

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Shortest accepted anon key
pub const MIN_ANON_KEY_LENGTH: usize = 10;

/// Default HTTP request timeout in milliseconds
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

#[derive(Parser, Debug, Clone)]
#[command(name = "quizrush", version, about = "Quiz Rush lobby client")]
pub struct Cli {
    /// Base URL of the backend project (e.g. https://xyz.supabase.co)
    #[arg(long, env = "QUIZRUSH_SUPABASE_URL")]
    pub supabase_url: Option<String>,

    /// Public anon key sent with every request
    #[arg(long, env = "QUIZRUSH_SUPABASE_ANON_KEY", hide_env_values = true)]
    pub anon_key: Option<String>,

    /// Run against an in-process backend instead of the network
    #[arg(long)]
    pub offline: bool,

    /// Where the session database and log file live
    #[arg(long, env = "QUIZRUSH_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// HTTP request timeout in milliseconds
    #[arg(long, default_value_t = DEFAULT_REQUEST_TIMEOUT_MS)]
    pub request_timeout_ms: u64,

    /// Log filter directives (e.g. "debug" or "quizrush=trace")
    #[arg(long, env = "QUIZRUSH_LOG", default_value = "info")]
    pub log_filter: String,
}

/// Backend connection settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    pub url: Url,
    pub anon_key: String,
    pub request_timeout: Duration,
}

/// Validated configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// `None` when running offline
    pub backend: Option<BackendConfig>,
    pub data_dir: Option<PathBuf>,
    pub log_filter: String,
}

/// Start-up configuration problems
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    MissingUrl,
    InvalidUrl(String),
    MissingAnonKey,
    AnonKeyTooShort,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MissingUrl => {
                write!(f, "QUIZRUSH_SUPABASE_URL is not set (or pass --supabase-url)")
            }
            ConfigError::InvalidUrl(url) => {
                write!(f, "QUIZRUSH_SUPABASE_URL is not a valid http(s) URL: {}", url)
            }
            ConfigError::MissingAnonKey => {
                write!(f, "QUIZRUSH_SUPABASE_ANON_KEY is not set (or pass --anon-key)")
            }
            ConfigError::AnonKeyTooShort => write!(
                f,
                "QUIZRUSH_SUPABASE_ANON_KEY must be at least {} characters",
                MIN_ANON_KEY_LENGTH
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

fn parse_backend_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw.trim()).map_err(|_| ConfigError::InvalidUrl(raw.to_string()))?;
    match url.scheme() {
        "http" | "https" if url.host().is_some() => Ok(url),
        _ => Err(ConfigError::InvalidUrl(raw.to_string())),
    }
}

impl Config {
    /// Validate parsed arguments.
    pub fn from_cli(cli: Cli) -> Result<Self, ConfigError> {
        let backend = if cli.offline {
            None
        } else {
            let raw_url = cli.supabase_url.ok_or(ConfigError::MissingUrl)?;
            let url = parse_backend_url(&raw_url)?;
            let anon_key = cli.anon_key.ok_or(ConfigError::MissingAnonKey)?;
            if anon_key.trim().chars().count() < MIN_ANON_KEY_LENGTH {
                return Err(ConfigError::AnonKeyTooShort);
            }
            Some(BackendConfig {
                url,
                anon_key: anon_key.trim().to_string(),
                request_timeout: Duration::from_millis(cli.request_timeout_ms),
            })
        };

        Ok(Self {
            backend,
            data_dir: cli.data_dir,
            log_filter: cli.log_filter,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(url: Option<&str>, key: Option<&str>) -> Cli {
        Cli {
            supabase_url: url.map(str::to_string),
            anon_key: key.map(str::to_string),
            offline: false,
            data_dir: None,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            log_filter: "info".to_string(),
        }
    }

    #[test]
    fn test_valid_config() {
        let config = Config::from_cli(cli(Some("https://demo.supabase.co"), Some("anon-key-123"))).unwrap();
        let backend = config.backend.unwrap();
        assert_eq!(backend.url.host_str(), Some("demo.supabase.co"));
        assert_eq!(backend.anon_key, "anon-key-123");
        assert_eq!(backend.request_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_rejects_malformed_url() {
        let err = Config::from_cli(cli(Some("not a url"), Some("anon-key-123"))).unwrap_err();
        assert_eq!(err, ConfigError::InvalidUrl("not a url".to_string()));

        let err = Config::from_cli(cli(Some("ftp://demo.example"), Some("anon-key-123"))).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUrl(_)));
    }

    #[test]
    fn test_rejects_short_key() {
        let err = Config::from_cli(cli(Some("http://localhost:54321"), Some("short"))).unwrap_err();
        assert_eq!(err, ConfigError::AnonKeyTooShort);
    }

    #[test]
    fn test_missing_values() {
        assert_eq!(
            Config::from_cli(cli(None, Some("anon-key-123"))).unwrap_err(),
            ConfigError::MissingUrl
        );
        assert_eq!(
            Config::from_cli(cli(Some("http://localhost:54321"), None)).unwrap_err(),
            ConfigError::MissingAnonKey
        );
    }

    #[test]
    fn test_offline_needs_no_backend() {
        let mut args = cli(None, None);
        args.offline = true;
        let config = Config::from_cli(args).unwrap();
        assert!(config.backend.is_none());
    }

    #[test]
    fn test_parses_flags() {
        let args = Cli::try_parse_from([
            "quizrush",
            "--supabase-url",
            "http://localhost:54321",
            "--anon-key",
            "anon-key-123",
            "--request-timeout-ms",
            "2500",
        ])
        .unwrap();
        assert_eq!(args.request_timeout_ms, 2500);
        let config = Config::from_cli(args).unwrap();
        assert_eq!(
            config.backend.unwrap().request_timeout,
            Duration::from_millis(2500)
        );
    }
}
