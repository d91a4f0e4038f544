use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Storage backend: "memory" or "postgres"
    #[serde(default = "default_storage_backend")]
    pub backend: String,
    /// PostgreSQL connection URL (required for the postgres backend)
    pub database_url: Option<String>,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Time-to-live for cached template lookups in seconds
    #[serde(default = "default_cache_ttl")]
    pub ttl_seconds: u64,
    /// Whether "template not found" lookups are cached as negative entries
    #[serde(default = "default_cache_negative")]
    pub cache_negative: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerationConfig {
    /// Maximum backend attempts per generation call (including the first)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Initial backoff delay in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Backoff multiplier applied after each failed attempt
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Jitter factor (0.0 to 1.0) applied to backoff delays
    #[serde(default)]
    pub jitter_factor: f64,
    /// Sampling temperature used when neither the caller nor the
    /// template supplies one
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,
    /// Per-call timeout in seconds (0 = no timeout)
    #[serde(default)]
    pub default_timeout_seconds: u64,
}

fn default_storage_backend() -> String {
    "memory".to_string()
}

fn default_pool_size() -> u32 {
    5
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_cache_ttl() -> u64 {
    300 // 5 minutes
}

fn default_cache_negative() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    3 // initial call plus two retries
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_temperature() -> f32 {
    0.7
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            // Start with default values
            .set_default("storage.backend", "memory")?
            .set_default("cache.ttl_seconds", 300)?
            .set_default("cache.cache_negative", true)?
            .set_default("generation.max_attempts", 3)?
            .set_default("generation.base_delay_ms", 1000)?
            .set_default("generation.backoff_multiplier", 2.0)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables
            // STORAGE_BACKEND, STORAGE_DATABASE_URL, CACHE_TTL_SECONDS, etc.
            .add_source(
                Environment::default()
                    .separator("_")
                    .try_parsing(true)
                    .list_separator(","),
            );

        builder.build()?.try_deserialize()
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            database_url: None,
            pool_size: default_pool_size(),
            connect_timeout_seconds: default_connect_timeout(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_cache_ttl(),
            cache_negative: default_cache_negative(),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter_factor: 0.0,
            default_temperature: default_temperature(),
            default_timeout_seconds: 0,
        }
    }
}
