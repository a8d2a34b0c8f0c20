//! Configuration management for messages-service
//!
//! Loads configuration from environment variables (and `.env` when present).

use crate::error::AppError;
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub kafka: KafkaConfig,
    pub consumer: ConsumerConfig,
}

/// HTTP server settings
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Server host to bind to
    pub host: String,
    /// HTTP port for the query API, health and metrics
    pub port: u16,
    /// Emit JSON log lines instead of human readable ones
    pub json_logs: bool,
}

#[derive(Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &"[REDACTED]")
            .field("max_connections", &self.max_connections)
            .field("min_connections", &self.min_connections)
            .field("acquire_timeout", &self.acquire_timeout)
            .finish()
    }
}

/// Query cache settings; the cache is disabled when no URL is configured
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub redis_url: Option<String>,
    /// Zero means entries never expire
    pub ttl: Duration,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
    /// Topic standing in for the message events exchange
    pub topic: String,
    pub dlq_topic: String,
}

/// Delivery processing limits
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Failures of a permanent kind tolerated before dead-lettering
    pub max_attempts: u32,
    /// Failures of a retryable kind tolerated before dead-lettering
    pub max_transient_attempts: u32,
    /// Deadline applied to each store call
    pub store_timeout: Duration,
    /// Re-read-and-retry budget when an update races another writer
    pub version_conflict_retries: u32,
    /// Base delay before requeueing after a retryable failure
    pub retry_backoff: Duration,
    /// Time in-flight deliveries get to finish after shutdown is requested
    pub shutdown_grace: Duration,
    /// Age after which attempt ledger rows are pruned
    pub attempt_retention: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            max_transient_attempts: 50,
            store_timeout: Duration::from_millis(5000),
            version_conflict_retries: 3,
            retry_backoff: Duration::from_millis(100),
            shutdown_grace: Duration::from_secs(30),
            attempt_retention: Duration::from_secs(7 * 86400),
        }
    }
}

const DEFAULT_TOPIC: &str = "chat.message.events";

fn parse_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();

        let app = AppConfig {
            host: env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: parse_or("PORT", 8080),
            json_logs: env::var("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
        };

        let database = DatabaseConfig {
            url: non_empty("DATABASE_URL")
                .ok_or_else(|| AppError::Config("DATABASE_URL missing".into()))?,
            max_connections: parse_or("DB_MAX_CONNECTIONS", 20),
            min_connections: parse_or("DB_MIN_CONNECTIONS", 2),
            acquire_timeout: Duration::from_secs(parse_or("DB_ACQUIRE_TIMEOUT_SECS", 10)),
        };

        if database.min_connections > database.max_connections {
            return Err(AppError::Config(format!(
                "DB_MIN_CONNECTIONS ({}) exceeds DB_MAX_CONNECTIONS ({})",
                database.min_connections, database.max_connections
            )));
        }

        let cache = CacheConfig {
            redis_url: non_empty("REDIS_URL"),
            ttl: Duration::from_secs(parse_or("CACHE_TTL_SECS", 0)),
            timeout: Duration::from_millis(parse_or("CACHE_TIMEOUT_MS", 250)),
        };

        let topic = non_empty("KAFKA_MESSAGE_EVENTS_TOPIC").unwrap_or_else(|| DEFAULT_TOPIC.into());
        let kafka = KafkaConfig {
            brokers: non_empty("KAFKA_BROKERS").unwrap_or_else(|| "localhost:9092".into()),
            dlq_topic: non_empty("KAFKA_DLQ_TOPIC").unwrap_or_else(|| format!("{topic}.dlq")),
            topic,
        };

        let defaults = ConsumerConfig::default();
        let consumer = ConsumerConfig {
            max_attempts: parse_or("CONSUMER_MAX_ATTEMPTS", defaults.max_attempts),
            max_transient_attempts: parse_or(
                "CONSUMER_MAX_TRANSIENT_ATTEMPTS",
                defaults.max_transient_attempts,
            ),
            store_timeout: Duration::from_millis(parse_or("STORE_TIMEOUT_MS", 5000)),
            version_conflict_retries: parse_or(
                "VERSION_CONFLICT_RETRIES",
                defaults.version_conflict_retries,
            ),
            retry_backoff: Duration::from_millis(parse_or("CONSUMER_RETRY_BACKOFF_MS", 100)),
            shutdown_grace: Duration::from_secs(parse_or("SHUTDOWN_GRACE_SECS", 30)),
            attempt_retention: Duration::from_secs(parse_or(
                "ATTEMPT_RETENTION_SECS",
                defaults.attempt_retention.as_secs(),
            )),
        };

        if consumer.max_attempts == 0 || consumer.max_transient_attempts == 0 {
            return Err(AppError::Config(
                "consumer attempt limits must be at least 1".into(),
            ));
        }

        Ok(Config {
            app,
            database,
            cache,
            kafka,
            consumer,
        })
    }
}
