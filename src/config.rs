use std::env;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub google: GoogleConfig,
    pub sync: SyncConfig,
    pub rate_limit: RateLimitConfig,
    pub ai: AiConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub frontend_url: String,
    /// Emit logs as JSON lines instead of the human readable format.
    /// Read from env var `LOG_FORMAT` (`json` enables it).
    pub log_json: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// Bearer tokens are issued by the hosted auth provider; we only verify them.
#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    /// Expected `aud` claim. Audience validation is skipped when unset.
    pub audience: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GoogleConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub token_url: String,
    pub calendar_api_url: String,
    pub tasks_api_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Whether the periodic ICS auto-sync worker runs.
    pub auto_sync_enabled: bool,
    /// Seconds between auto-sync cycles.
    pub interval_seconds: u64,
    /// Upper bound for a single feed / API request.
    pub fetch_timeout_seconds: u64,
    /// Shared secret required by the cron-triggered Canvas sync endpoint, if set.
    pub cron_secret: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Allowed requests per second (per IP) for `/api/functions/*`
    pub functions_per_second: u32,
    /// Burst size for `/api/functions/*`
    pub functions_burst: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AiConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        Ok(Config {
            server: ServerConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("PORT")
                    .unwrap_or_else(|_| "8080".to_string())
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("PORT".to_string()))?,
                frontend_url: env::var("FRONTEND_URL")
                    .unwrap_or_else(|_| "http://localhost:5173".to_string()),
                log_json: env::var("LOG_FORMAT")
                    .map(|v| v.eq_ignore_ascii_case("json"))
                    .unwrap_or(false),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite://data/studyhub.db".to_string()),
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5),
            },
            jwt: JwtConfig {
                secret: env::var("JWT_SECRET")
                    .map_err(|_| ConfigError::MissingEnv("JWT_SECRET".to_string()))?,
                audience: env::var("JWT_AUDIENCE").ok().filter(|s| !s.is_empty()),
            },
            google: GoogleConfig {
                client_id: env::var("GOOGLE_CLIENT_ID").ok(),
                client_secret: env::var("GOOGLE_CLIENT_SECRET").ok(),
                token_url: env::var("GOOGLE_TOKEN_URL")
                    .unwrap_or_else(|_| "https://oauth2.googleapis.com/token".to_string()),
                calendar_api_url: env::var("GOOGLE_CALENDAR_API_URL")
                    .unwrap_or_else(|_| "https://www.googleapis.com/calendar/v3".to_string()),
                tasks_api_url: env::var("GOOGLE_TASKS_API_URL")
                    .unwrap_or_else(|_| "https://tasks.googleapis.com/tasks/v1".to_string()),
            },
            sync: SyncConfig {
                auto_sync_enabled: match env::var("SYNC_AUTO_ENABLED") {
                    Ok(v) => match v.to_lowercase().as_str() {
                        "1" | "true" | "yes" => true,
                        "0" | "false" | "no" => false,
                        _ => true,
                    },
                    Err(_) => true,
                },
                interval_seconds: env::var("SYNC_INTERVAL_SECONDS")
                    .unwrap_or_else(|_| "3600".to_string())
                    .parse()
                    .unwrap_or(3600u64),
                fetch_timeout_seconds: env::var("SYNC_FETCH_TIMEOUT_SECONDS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .unwrap_or(30u64),
                cron_secret: env::var("SYNC_CRON_SECRET").ok().filter(|s| !s.is_empty()),
            },
            rate_limit: RateLimitConfig {
                functions_per_second: env::var("RATE_LIMIT_FUNCTIONS_PER_SECOND")
                    .unwrap_or_else(|_| "2".to_string())
                    .parse()
                    .unwrap_or(2),
                functions_burst: env::var("RATE_LIMIT_FUNCTIONS_BURST")
                    .unwrap_or_else(|_| "20".to_string())
                    .parse()
                    .unwrap_or(20),
            },
            ai: AiConfig {
                api_key: env::var("AI_API_KEY").ok().filter(|s| !s.is_empty()),
                base_url: env::var("AI_BASE_URL")
                    .unwrap_or_else(|_| "https://openrouter.ai/api/v1".to_string()),
                model: env::var("AI_MODEL")
                    .unwrap_or_else(|_| "openai/gpt-4o-mini".to_string()),
            },
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                frontend_url: "http://localhost:5173".to_string(),
                log_json: false,
            },
            database: DatabaseConfig {
                url: "sqlite://data/studyhub.db".to_string(),
                max_connections: 5,
            },
            jwt: JwtConfig {
                secret: String::new(),
                audience: None,
            },
            google: GoogleConfig {
                client_id: None,
                client_secret: None,
                token_url: "https://oauth2.googleapis.com/token".to_string(),
                calendar_api_url: "https://www.googleapis.com/calendar/v3".to_string(),
                tasks_api_url: "https://tasks.googleapis.com/tasks/v1".to_string(),
            },
            sync: SyncConfig {
                auto_sync_enabled: true,
                interval_seconds: 3600,
                fetch_timeout_seconds: 30,
                cron_secret: None,
            },
            rate_limit: RateLimitConfig {
                functions_per_second: 2,
                functions_burst: 20,
            },
            ai: AiConfig {
                api_key: None,
                base_url: "https://openrouter.ai/api/v1".to_string(),
                model: "openai/gpt-4o-mini".to_string(),
            },
        }
    }
}
