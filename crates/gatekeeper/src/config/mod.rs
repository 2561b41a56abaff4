use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub database: DatabaseConfig,
    pub rcon: RconConfig,
    pub whitelist: WhitelistConfig,
    pub transport: TransportConfig,
    pub admin_token: Option<String>,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let database = DatabaseConfig {
            url: env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://data/users.db".to_string()),
            max_connections: parse_var("DATABASE_MAX_CONNECTIONS", 5)?,
        };

        let rcon = RconConfig {
            host: env::var("RCON_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: parse_var("RCON_PORT", 25575)?,
            password: non_empty_var("RCON_PASSWORD").ok_or(ConfigError::Missing("RCON_PASSWORD"))?,
            timeout: Duration::from_secs(parse_var("RCON_TIMEOUT_SECS", 5)?),
        };

        let max_attempts: u32 = parse_var("WHITELIST_MAX_ATTEMPTS", 3)?;
        if max_attempts == 0 {
            return Err(ConfigError::InvalidNumber {
                var: "WHITELIST_MAX_ATTEMPTS",
                value: max_attempts.to_string(),
            });
        }
        let whitelist = WhitelistConfig {
            max_attempts,
            backoff: Duration::from_secs(parse_var("WHITELIST_BACKOFF_SECS", 2)?),
        };

        let transport = TransportConfig {
            webhook_url: non_empty_var("TRANSPORT_WEBHOOK_URL"),
            webhook_token: non_empty_var("TRANSPORT_WEBHOOK_TOKEN"),
            outbox_capacity: parse_var("OUTBOX_CAPACITY", 1000)?,
        };

        // Administrative routes are open without a token.
        let admin_token = non_empty_var("ADMIN_TOKEN");
        if admin_token.is_none() && environment == AppEnvironment::Production {
            return Err(ConfigError::Missing("ADMIN_TOKEN"));
        }

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            database,
            rcon,
            whitelist,
            transport,
            admin_token,
        })
    }
}

fn non_empty_var(var: &'static str) -> Option<String> {
    env::var(var)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_var<T: std::str::FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    match non_empty_var(var) {
        Some(value) => value
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidNumber { var, value }),
        None => Ok(default),
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Location of the application table.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// Remote console endpoint of the game server.
#[derive(Clone)]
pub struct RconConfig {
    pub host: String,
    pub port: u16,
    pub password: String,
    pub timeout: Duration,
}

impl fmt::Debug for RconConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RconConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Bounded retry applied to `whitelist add` on approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WhitelistConfig {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for WhitelistConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(2),
        }
    }
}

/// Where outbound chat events go. Without a webhook they queue in the outbox.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub webhook_url: Option<String>,
    pub webhook_token: Option<String>,
    pub outbox_capacity: usize,
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    Missing(&'static str),
    InvalidNumber { var: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::Missing(var) => write!(f, "{var} must be set"),
            ConfigError::InvalidNumber { var, value } => {
                write!(f, "{var} has an invalid value '{value}'")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidPort
            | ConfigError::Missing(_)
            | ConfigError::InvalidNumber { .. } => None,
        }
    }
}
