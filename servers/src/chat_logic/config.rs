use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_CONFIG_FILE: &str = "server_chat.conf";

/// Backend holding room history.
#[derive(ValueEnum, Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Redis,
    Memory,
}

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[command(about = "Room based chat relay server", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[arg(long, env = "CHAT_PORT", help = "Port to listen on for client connections.")]
    pub port: Option<u16>,

    #[arg(long, env = "CHAT_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[arg(long, env = "REDISURI", help = "Redis address (host:port) or redis:// URL.")]
    pub redis_uri: Option<String>,

    #[arg(long, env = "SOCKET_CLIENT_URL", help = "Origin allowed to connect from a browser. Any origin when unset.")]
    pub client_origin: Option<String>,

    #[arg(long, env = "CHAT_STATIC_DIR", help = "Directory served for non-websocket paths.")]
    pub static_dir: Option<PathBuf>,

    #[arg(long, env = "CHAT_STORE", value_enum, help = "Message store backend.")]
    pub store: Option<StoreKind>,

    #[arg(long, env = "CHAT_STORE_TIMEOUT_MS", help = "Timeout in milliseconds for each message store call.")]
    pub store_timeout_ms: Option<u64>,

    #[arg(long, env = "CHAT_OUTBOUND_QUEUE", help = "Events buffered per connection before new ones are dropped.")]
    pub outbound_queue: Option<usize>,

    #[arg(long, env = "CHAT_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[arg(long, env = "CHAT_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,
}

/// Fully resolved settings handed to the server.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub port: u16,
    pub redis_uri: String,
    pub client_origin: Option<String>,
    pub static_dir: PathBuf,
    pub store: StoreKind,
    pub store_timeout: Duration,
    pub outbound_queue: usize,
    pub log_dir: PathBuf,
    pub log_level: String,
}

impl Config {
    // 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            redis_uri: other.redis_uri.or(self.redis_uri),
            client_origin: other.client_origin.or(self.client_origin),
            static_dir: other.static_dir.or(self.static_dir),
            store: other.store.or(self.store),
            store_timeout_ms: other.store_timeout_ms.or(self.store_timeout_ms),
            outbound_queue: other.outbound_queue.or(self.outbound_queue),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
        }
    }

    fn defaults() -> Config {
        Config {
            port: Some(8080),
            redis_uri: Some(lib_relay::connections::cache_redis::DEFAULT_REDIS_ADDR.to_string()),
            static_dir: Some(PathBuf::from("./public")),
            store: Some(StoreKind::Redis),
            store_timeout_ms: Some(5000),
            outbound_queue: Some(lib_relay::relay::session::DEFAULT_OUTBOUND_CAPACITY),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            ..Default::default()
        }
    }

    pub fn settings(&self) -> Settings {
        let defaults = Config::defaults();
        let merged = defaults.merge(self.clone());
        Settings {
            port: merged.port.unwrap_or(8080),
            redis_uri: merged.redis_uri.unwrap_or_default(),
            // An empty origin means "not configured".
            client_origin: merged.client_origin.filter(|o| !o.trim().is_empty()),
            static_dir: merged.static_dir.unwrap_or_default(),
            store: merged.store.unwrap_or_default(),
            store_timeout: Duration::from_millis(merged.store_timeout_ms.unwrap_or(5000)),
            outbound_queue: merged.outbound_queue.unwrap_or(lib_relay::relay::session::DEFAULT_OUTBOUND_CAPACITY),
            log_dir: merged.log_dir.unwrap_or_default(),
            log_level: merged.log_level.unwrap_or_default(),
        }
    }
}

/// Layers defaults < config file < environment and CLI.
pub fn load_config() -> Config {
    load_config_from(Config::parse())
}

pub fn load_config_from(cli: Config) -> Config {
    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let mut current_config = Config::defaults();

    if config_file_path.exists() {
        match fs::read_to_string(&config_file_path) {
            Ok(config_str) => match serde_json::from_str::<Config>(&config_str) {
                Ok(file_config) => current_config = current_config.merge(file_config),
                Err(e) => log::warn!(
                    "Failed to parse config file {}: {}. Falling back to other sources.",
                    config_file_path.display(),
                    e
                ),
            },
            Err(e) => log::warn!(
                "Failed to read config file {}: {}. Falling back to other sources.",
                config_file_path.display(),
                e
            ),
        }
    } else {
        log::info!(
            "Config file not found at {}. Using defaults and environment/CLI variables.",
            config_file_path.display()
        );
    }

    current_config.merge(cli)
}
