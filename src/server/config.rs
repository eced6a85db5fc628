use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::data::session_store::{
    DEFAULT_ANONYMOUS_IDLE_TIMEOUT, DEFAULT_MAX_ANONYMOUS_SESSIONS,
};
use crate::data::setup::{MAX_HASH_COST, MIN_HASH_COST};
use crate::docker::definitions::MASTER_CONTAINER_NAME;

/// Process configuration of the master container.
#[derive(Deserialize, Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub data_dir: String,
    pub log_dir: String,
    /// Docker network every managed container joins.
    pub network_name: String,
    pub image_prefix: String,
    pub image_tag: String,
    /// Engine name of the container this process runs in.
    pub master_container_name: String,
    pub session_idle_timeout_secs: u64,
    /// Idle timeout of sessions that never logged in.
    pub anonymous_session_timeout_secs: u64,
    pub max_anonymous_sessions: usize,
    pub login_min_latency_ms: u64,
    pub backup_poll_interval_secs: u64,
    pub password_hash_cost: u32,
    pub secure_cookies: bool,
}

// Partial config for layering
#[derive(Deserialize, Default, Debug)]
pub struct PartialServerConfig {
    listen_addr: Option<SocketAddr>,
    data_dir: Option<String>,
    log_dir: Option<String>,
    network_name: Option<String>,
    image_prefix: Option<String>,
    image_tag: Option<String>,
    master_container_name: Option<String>,
    session_idle_timeout_secs: Option<u64>,
    anonymous_session_timeout_secs: Option<u64>,
    max_anonymous_sessions: Option<usize>,
    login_min_latency_ms: Option<u64>,
    backup_poll_interval_secs: Option<u64>,
    password_hash_cost: Option<u32>,
    secure_cookies: Option<bool>,
}

/// Environment variables carry this prefix, e.g. `AIO_DATA_DIR`.
const ENV_PREFIX: &str = "AIO_";

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::merge(PartialServerConfig::default(), PartialServerConfig::default())
    }
}

impl ServerConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self, String> {
        dotenv::dotenv().ok();

        // 1. Load from file (optional)
        let file_config: PartialServerConfig = match config_path.map(Path::new) {
            Some(path) if path.exists() => {
                let contents = fs::read_to_string(path)
                    .map_err(|e| format!("Failed to read config file at {path:?}: {e}"))?;
                toml::from_str(&contents)
                    .map_err(|e| format!("Failed to parse TOML from config file at {path:?}: {e}"))?
            }
            _ => PartialServerConfig::default(),
        };

        // 2. Load from environment variables
        let env_config: PartialServerConfig = envy::prefixed(ENV_PREFIX)
            .from_env::<PartialServerConfig>()
            .map_err(|e| format!("Failed to load config from environment: {e}"))?;

        // 3. Merge: environment overrides file
        let config = Self::merge(env_config, file_config);
        config.validate()?;
        Ok(config)
    }

    fn merge(env: PartialServerConfig, file: PartialServerConfig) -> Self {
        ServerConfig {
            listen_addr: env
                .listen_addr
                .or(file.listen_addr)
                .unwrap_or_else(default_listen_addr),
            data_dir: env
                .data_dir
                .or(file.data_dir)
                .unwrap_or_else(|| "data".to_string()),
            log_dir: env
                .log_dir
                .or(file.log_dir)
                .unwrap_or_else(|| "logs".to_string()),
            network_name: env
                .network_name
                .or(file.network_name)
                .unwrap_or_else(|| "nextcloud-aio".to_string()),
            image_prefix: env
                .image_prefix
                .or(file.image_prefix)
                .unwrap_or_else(|| "nextcloud/".to_string()),
            image_tag: env
                .image_tag
                .or(file.image_tag)
                .unwrap_or_else(|| "latest".to_string()),
            master_container_name: env
                .master_container_name
                .or(file.master_container_name)
                .unwrap_or_else(|| MASTER_CONTAINER_NAME.to_string()),
            session_idle_timeout_secs: env
                .session_idle_timeout_secs
                .or(file.session_idle_timeout_secs)
                .unwrap_or(86_400),
            anonymous_session_timeout_secs: env
                .anonymous_session_timeout_secs
                .or(file.anonymous_session_timeout_secs)
                .unwrap_or(DEFAULT_ANONYMOUS_IDLE_TIMEOUT.as_secs()),
            max_anonymous_sessions: env
                .max_anonymous_sessions
                .or(file.max_anonymous_sessions)
                .unwrap_or(DEFAULT_MAX_ANONYMOUS_SESSIONS),
            login_min_latency_ms: env
                .login_min_latency_ms
                .or(file.login_min_latency_ms)
                .unwrap_or(1_000),
            backup_poll_interval_secs: env
                .backup_poll_interval_secs
                .or(file.backup_poll_interval_secs)
                .unwrap_or(5),
            password_hash_cost: env
                .password_hash_cost
                .or(file.password_hash_cost)
                .unwrap_or(bcrypt::DEFAULT_COST),
            secure_cookies: env
                .secure_cookies
                .or(file.secure_cookies)
                .unwrap_or(true),
        }
    }

    fn validate(&self) -> Result<(), String> {
        if !(MIN_HASH_COST..=MAX_HASH_COST).contains(&self.password_hash_cost) {
            return Err(format!(
                "password_hash_cost must be between {} and {}",
                MIN_HASH_COST,
                MAX_HASH_COST
            ));
        }
        if self.backup_poll_interval_secs == 0 {
            return Err("backup_poll_interval_secs must be positive".to_string());
        }
        if self.session_idle_timeout_secs == 0 {
            return Err("session_idle_timeout_secs must be positive".to_string());
        }
        if self.anonymous_session_timeout_secs == 0 {
            return Err("anonymous_session_timeout_secs must be positive".to_string());
        }
        if self.max_anonymous_sessions == 0 {
            return Err("max_anonymous_sessions must be positive".to_string());
        }
        if self.master_container_name.trim().is_empty() {
            return Err("master_container_name must not be empty".to_string());
        }
        Ok(())
    }

    pub fn session_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.session_idle_timeout_secs)
    }

    pub fn anonymous_session_timeout(&self) -> Duration {
        Duration::from_secs(self.anonymous_session_timeout_secs)
    }

    pub fn login_min_latency(&self) -> Duration {
        Duration::from_millis(self.login_min_latency_ms)
    }

    pub fn backup_poll_interval(&self) -> Duration {
        Duration::from_secs(self.backup_poll_interval_secs)
    }
}
