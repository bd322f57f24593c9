// src/config.rs
// Configuration loading: XDG-resolved config.toml, overridable by environment
// variables named per spec.md §6. Mirrors the teacher's Config::load shape.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use xdg::BaseDirectories;

pub const APP_NAME: &str = "infrallm";
pub const DEFAULT_CONFIG_FILENAME: &str = "config.toml";

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub credential_encryption: CredentialEncryptionConfig,
    pub llm: LlmConfig,
    pub logging: LoggingConfig,
    pub cors: CorsConfig,
    pub ssh: SshPoolConfig,
    pub mcp: McpConfig,
    pub jobs: JobsConfig,
    pub health_check: HealthCheckConfig,
    pub environment: String,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub shutdown_grace_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            shutdown_grace_seconds: 15,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://infrallm.db".to_string(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct JwtConfig {
    pub secret: Option<String>,
    pub issuer: Option<String>,
    pub audience: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct CredentialEncryptionConfig {
    pub master_key: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct LlmConfig {
    pub provider_api_key: Option<String>,
    pub provider_base_url: String,
    pub default_model: String,
    pub request_timeout_seconds: u64,
    pub max_tool_iterations: u32,
    pub max_turn_wall_clock_seconds: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider_api_key: None,
            provider_base_url: "https://api.anthropic.com".to_string(),
            default_model: "claude-sonnet-4-5".to_string(),
            request_timeout_seconds: 300,
            max_tool_iterations: 25,
            max_turn_wall_clock_seconds: 300,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub log_dir: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: "~/.infrallm/logs".to_string(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct SshPoolConfig {
    pub max_clients_per_host: usize,
    pub idle_reap_minutes: u64,
    pub connect_timeout_seconds: u64,
    pub command_timeout_seconds: u64,
}

impl Default for SshPoolConfig {
    fn default() -> Self {
        Self {
            max_clients_per_host: 4,
            idle_reap_minutes: 10,
            connect_timeout_seconds: 15,
            command_timeout_seconds: 120,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct McpConfig {
    pub tool_list_cache_seconds: u64,
    pub stdio_idle_timeout_minutes: u64,
    pub call_timeout_seconds: u64,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            tool_list_cache_seconds: 60,
            stdio_idle_timeout_minutes: 15,
            call_timeout_seconds: 60,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct JobsConfig {
    pub cron_poll_interval_seconds: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            cron_poll_interval_seconds: 30,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct HealthCheckConfig {
    pub enabled: bool,
    pub interval_seconds: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_seconds: 300,
        }
    }
}

impl Config {
    pub fn load(config_path_override: Option<&Path>) -> Result<Self> {
        let xdg_dirs = BaseDirectories::with_prefix(APP_NAME)?;
        let config_path = match config_path_override {
            Some(path) => path.to_path_buf(),
            None => xdg_dirs
                .find_config_file(DEFAULT_CONFIG_FILENAME)
                .unwrap_or_else(|| xdg_dirs.get_config_home().join(DEFAULT_CONFIG_FILENAME)),
        };

        info!("loading configuration from {:?}", config_path);

        let mut config: Config = if config_path.exists() {
            let raw = std::fs::read_to_string(&config_path)
                .with_context(|| format!("failed to read config file: {:?}", config_path))?;
            toml::from_str(&raw)
                .with_context(|| format!("failed to parse config file: {:?}", config_path))?
        } else {
            warn!("no config file found at {:?}, using defaults", config_path);
            Config::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("INFRALLM_BIND_ADDR") {
            self.server.bind_addr = v;
        }
        if let Ok(v) = std::env::var("DATABASE_URL") {
            self.database.url = v;
        }
        if let Ok(v) = std::env::var("JWT_SECRET") {
            self.jwt.secret = Some(v);
        }
        if let Ok(v) = std::env::var("JWT_ISSUER") {
            self.jwt.issuer = Some(v);
        }
        if let Ok(v) = std::env::var("JWT_AUDIENCE") {
            self.jwt.audience = Some(v);
        }
        if let Ok(v) = std::env::var("CREDENTIAL_MASTER_KEY") {
            self.credential_encryption.master_key = Some(v);
        }
        if let Ok(v) = std::env::var("LLM_PROVIDER_API_KEY") {
            self.llm.provider_api_key = Some(v);
        }
        if let Ok(v) = std::env::var("LLM_PROVIDER_BASE_URL") {
            self.llm.provider_base_url = v;
        }
        if let Ok(v) = std::env::var("CORS_ALLOWED_ORIGINS") {
            self.cors.allowed_origins = v.split(',').map(|s| s.trim().to_string()).collect();
        }
        debug!("environment overrides applied");
    }

    /// Refuses a production start with a missing or placeholder master key (§4.1).
    pub fn validate_for_production(&self) -> Result<()> {
        if self.environment != "production" {
            return Ok(());
        }
        match &self.credential_encryption.master_key {
            None => anyhow::bail!("CREDENTIAL_MASTER_KEY must be set in production"),
            Some(key) if key.starts_with("CHANGE_ME") => {
                anyhow::bail!("refusing to start in production with a CHANGE_ME master key")
            }
            Some(_) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_usable_for_development() {
        let config = Config::default();
        assert!(config.validate_for_production().is_ok());
    }

    #[test]
    fn production_rejects_missing_master_key() {
        let mut config = Config::default();
        config.environment = "production".to_string();
        assert!(config.validate_for_production().is_err());
    }

    #[test]
    fn production_rejects_change_me_prefix() {
        let mut config = Config::default();
        config.environment = "production".to_string();
        config.credential_encryption.master_key = Some("CHANGE_ME_NOW".to_string());
        assert!(config.validate_for_production().is_err());
    }

    #[test]
    fn production_accepts_real_master_key() {
        let mut config = Config::default();
        config.environment = "production".to_string();
        config.credential_encryption.master_key = Some("a-real-secret".to_string());
        assert!(config.validate_for_production().is_ok());
    }
}
