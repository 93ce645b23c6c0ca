use std::path::PathBuf;
use std::str::FromStr;

use inpaint_core::image_io::CANONICAL_SIZE;
use inpaint_pipeline::executor::DEFAULT_POOL_SIZE;

/// A configuration variable that is set but cannot be parsed.
#[derive(Debug, thiserror::Error)]
#[error("{name} must be a valid {expected}, got '{value}'")]
pub struct ConfigError {
    pub name: &'static str,
    pub value: String,
    pub expected: &'static str,
}

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development. Object store
/// and inference engine settings are loaded by their own crates.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8080`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Number of executor workers (default: `2`).
    pub worker_pool_size: usize,
    /// Retention of finished tasks; `None` keeps them for the process lifetime.
    pub task_ttl_secs: Option<u64>,
    /// Directory holding the per-group working directories (default: `.`).
    pub work_root: PathBuf,
    /// Side length inputs are normalised to before inference (default: `512`).
    pub canonical_size: u32,
    /// Output naming strategy (default: `file-name`).
    pub output_naming: String,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                    |
    /// |------------------------|----------------------------|
    /// | `HOST`                 | `0.0.0.0`                  |
    /// | `PORT`                 | `8080`                     |
    /// | `CORS_ORIGINS`         | `http://localhost:3000`    |
    /// | `REQUEST_TIMEOUT_SECS` | `30`                       |
    /// | `WORKER_POOL_SIZE`     | `2`                        |
    /// | `TASK_TTL_SECS`        | unset                      |
    /// | `WORK_ROOT`            | `.`                        |
    /// | `CANONICAL_SIZE`       | `512`                      |
    /// | `OUTPUT_NAMING`        | `file-name`                |
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port = parse_var("PORT", 8080_u16, "u16")?;

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs = parse_var("REQUEST_TIMEOUT_SECS", 30_u64, "u64")?;
        let worker_pool_size = parse_var("WORKER_POOL_SIZE", DEFAULT_POOL_SIZE, "usize")?;
        let task_ttl_secs = parse_optional_var("TASK_TTL_SECS", "u64")?;
        let work_root = PathBuf::from(std::env::var("WORK_ROOT").unwrap_or_else(|_| ".".into()));
        let canonical_size = parse_var("CANONICAL_SIZE", CANONICAL_SIZE, "u32")?;
        let output_naming =
            std::env::var("OUTPUT_NAMING").unwrap_or_else(|_| "file-name".into());

        Ok(Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            worker_pool_size,
            task_ttl_secs,
            work_root,
            canonical_size,
            output_naming,
        })
    }
}

fn parse_var<T: FromStr>(
    name: &'static str,
    default: T,
    expected: &'static str,
) -> Result<T, ConfigError> {
    Ok(parse_optional_var(name, expected)?.unwrap_or(default))
}

fn parse_optional_var<T: FromStr>(
    name: &'static str,
    expected: &'static str,
) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => {
            value.trim().parse().map(Some).map_err(|_| ConfigError {
                name,
                value,
                expected,
            })
        }
        _ => Ok(None),
    }
}
