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

/// Top-level configuration for the board service.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub moderation: ModerationConfig,
    pub notifications: NotificationConfig,
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

        let moderator_emails = env::var("MODERATOR_EMAILS")
            .map(|raw| parse_email_list(&raw))
            .unwrap_or_default();

        let admin_email = env::var("ADMIN_NOTIFY_EMAIL")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        let max_attempts = read_number("NOTIFY_MAX_ATTEMPTS", 3)?.max(1) as u32;
        let backoff_ms = read_number("NOTIFY_BACKOFF_MS", 250)?;
        let backoff_max_ms = read_number("NOTIFY_BACKOFF_MAX_MS", 5_000)?;
        let max_in_flight = read_number("NOTIFY_MAX_IN_FLIGHT", 16)?.max(1) as usize;
        let from_address =
            env::var("MAIL_FROM").unwrap_or_else(|_| "no-reply@studentworks.local".to_string());

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            moderation: ModerationConfig { moderator_emails },
            notifications: NotificationConfig {
                max_attempts,
                base_backoff: Duration::from_millis(backoff_ms),
                max_backoff: Duration::from_millis(backoff_max_ms.max(backoff_ms)),
                max_in_flight,
                admin_email,
                from_address,
            },
        })
    }
}

fn read_number(variable: &'static str, default: u64) -> Result<u64, ConfigError> {
    match env::var(variable) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map_err(|_| ConfigError::InvalidNumber { variable }),
        Err(_) => Ok(default),
    }
}

fn parse_email_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|entry| entry.trim().to_ascii_lowercase())
        .filter(|entry| !entry.is_empty())
        .collect()
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

/// Accounts allowed to approve, reject, and review.
#[derive(Debug, Clone, Default)]
pub struct ModerationConfig {
    pub moderator_emails: Vec<String>,
}

/// Delivery settings for outbound notification mail.
#[derive(Debug, Clone)]
pub struct NotificationConfig {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    /// Messages allowed to be mid-delivery at once, retries included.
    pub max_in_flight: usize,
    pub admin_email: Option<String>,
    pub from_address: String,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(5),
            max_in_flight: 16,
            admin_email: None,
            from_address: "no-reply@studentworks.local".to_string(),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidNumber { variable: &'static str },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { variable } => {
                write!(f, "{variable} must be a non-negative integer")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidPort | ConfigError::InvalidNumber { .. } => None,
            ConfigError::InvalidHost { source } => Some(source),
        }
    }
}
