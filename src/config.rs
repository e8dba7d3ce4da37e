use std::{env, str::FromStr, time::Duration};

use thiserror::Error;

pub const DEFAULT_JWT_SECRET: &str = "secret";

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid value {value:?} for {key}")]
pub struct ConfigError {
    pub key: &'static str,
    pub value: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub server: ServerConfig,
    pub reset_token_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub busy_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
}

impl JwtConfig {
    pub fn uses_default_secret(&self) -> bool {
        self.secret == DEFAULT_JWT_SECRET
    }
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: DEFAULT_JWT_SECRET.to_string(),
            access_token_ttl: Duration::from_secs(15 * 60),
            refresh_token_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Config {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup. Empty values
    /// fall back to the default, like unset ones.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let database = DatabaseConfig {
            url: get("DATABASE_URL").unwrap_or_else(|| "sqlite://schwiftybox.db".to_string()),
            max_connections: parse_or(&get, "DB_MAX_CONNECTIONS", 10)?,
            busy_timeout: Duration::from_secs(parse_or(&get, "DB_BUSY_TIMEOUT_SECS", 5)?),
        };

        let jwt = JwtConfig {
            secret: get("JWT_SECRET").unwrap_or_else(|| DEFAULT_JWT_SECRET.to_string()),
            access_token_ttl: parse_duration(&get, "JWT_ACCESS_TTL_MINUTES", 15, 60)?,
            refresh_token_ttl: parse_duration(&get, "JWT_REFRESH_TTL_HOURS", 24, 60 * 60)?,
        };

        // SERVER_PORT used to be given as ":8080"
        let port: u16 = match get("SERVER_PORT") {
            Some(raw) => {
                let trimmed = raw.trim().trim_start_matches(':');
                trimmed.parse().map_err(|_| ConfigError {
                    key: "SERVER_PORT",
                    value: raw.clone(),
                })?
            }
            None => 8080,
        };

        let server = ServerConfig {
            host: get("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port,
        };

        let reset_token_ttl = parse_duration(&get, "RESET_TOKEN_TTL_MINUTES", 5, 60)?;

        Ok(Config {
            database,
            jwt,
            server,
            reset_token_ttl,
        })
    }
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError { key, value: raw }),
        None => Ok(default),
    }
}

/// Reads a count of `unit_secs`-long units; overflowing values are rejected.
fn parse_duration<G>(
    get: &G,
    key: &'static str,
    default: u64,
    unit_secs: u64,
) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let count: u64 = parse_or(get, key, default)?;
    count
        .checked_mul(unit_secs)
        .map(Duration::from_secs)
        .ok_or_else(|| ConfigError {
            key,
            value: count.to_string(),
        })
}
