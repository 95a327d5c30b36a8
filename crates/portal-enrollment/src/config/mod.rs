use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

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
    pub enrollment: EnrollmentConfig,
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

        let enrollment = EnrollmentConfig::from_env()?;

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig {
                log_level,
                ansi: environment == AppEnvironment::Development,
            },
            enrollment,
        })
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
    pub ansi: bool,
}

const DEFAULT_SELECTION_TTL_MINUTES: i64 = 30;
const MAX_SELECTION_TTL_MINUTES: i64 = 24 * 60;

/// Knobs for the selection and checkout flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollmentConfig {
    pub selection_ttl_minutes: i64,
    pub currency: String,
    pub auto_capture_payments: bool,
}

impl EnrollmentConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let selection_ttl_minutes = match env::var("PORTAL_SELECTION_TTL_MINUTES") {
            Ok(raw) => raw
                .trim()
                .parse::<i64>()
                .ok()
                .filter(|minutes| (1..=MAX_SELECTION_TTL_MINUTES).contains(minutes))
                .ok_or(ConfigError::InvalidSelectionTtl { value: raw })?,
            Err(_) => DEFAULT_SELECTION_TTL_MINUTES,
        };

        let currency = env::var("PORTAL_CURRENCY")
            .map(|value| value.trim().to_ascii_lowercase())
            .unwrap_or_else(|_| "usd".to_string());

        let auto_capture_payments = match env::var("PORTAL_PAYMENTS_AUTO_CAPTURE") {
            Ok(raw) => parse_flag(&raw).ok_or(ConfigError::InvalidFlag {
                name: "PORTAL_PAYMENTS_AUTO_CAPTURE",
                value: raw,
            })?,
            Err(_) => false,
        };

        Ok(Self {
            selection_ttl_minutes,
            currency,
            auto_capture_payments,
        })
    }

    pub fn selection_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.selection_ttl_minutes)
    }
}

impl Default for EnrollmentConfig {
    fn default() -> Self {
        Self {
            selection_ttl_minutes: DEFAULT_SELECTION_TTL_MINUTES,
            currency: "usd".to_string(),
            auto_capture_payments: false,
        }
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidSelectionTtl { value: String },
    InvalidFlag { name: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidSelectionTtl { value } => write!(
                f,
                "PORTAL_SELECTION_TTL_MINUTES must be between 1 and {MAX_SELECTION_TTL_MINUTES} (got '{value}')"
            ),
            ConfigError::InvalidFlag { name, value } => {
                write!(f, "{name} must be a boolean flag (got '{value}')")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidPort
            | ConfigError::InvalidSelectionTtl { .. }
            | ConfigError::InvalidFlag { .. } => None,
        }
    }
}
