//! Server configuration.

use anyhow::{Result, bail};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use termrelay_core::{DEFAULT_ISSUER, RegistryConfig, SshPtyConfig, StoredConnection};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// HS256 secret shared with the login service.
    #[serde(default)]
    pub jwt_secret: String,
    #[serde(default = "default_issuer")]
    pub jwt_issuer: String,
    /// Key for `enc:` secrets in `connections`.
    #[serde(default)]
    pub encryption_key: Option<String>,
    #[serde(default = "default_ssh_path")]
    pub ssh_path: PathBuf,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_host_key_checking")]
    pub host_key_checking: String,
    #[serde(default = "default_term")]
    pub term: String,
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
    #[serde(default)]
    pub connections: Vec<StoredConnection>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_issuer() -> String {
    DEFAULT_ISSUER.to_string()
}

fn default_ssh_path() -> PathBuf {
    PathBuf::from("ssh")
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_host_key_checking() -> String {
    "accept-new".to_string()
}

fn default_term() -> String {
    "xterm-256color".to_string()
}

fn default_shutdown_grace() -> u64 {
    5
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            jwt_secret: String::new(),
            jwt_issuer: default_issuer(),
            encryption_key: None,
            ssh_path: default_ssh_path(),
            connect_timeout_secs: default_connect_timeout(),
            host_key_checking: default_host_key_checking(),
            term: default_term(),
            shutdown_grace_secs: default_shutdown_grace(),
            connections: Vec::new(),
        }
    }
}

impl Config {
    /// Load config from a specific file path.
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load config from `config/default.toml`, then the user config directory
    /// (`~/.config/termrelay/config.toml` on Linux), or fall back to defaults.
    pub fn load() -> Result<Self> {
        for config_path in Self::search_paths() {
            if config_path.exists() {
                return Self::load_from(&config_path);
            }
        }
        Ok(Config::default())
    }

    fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("config/default.toml")];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("termrelay").join("config.toml"));
        }
        paths
    }

    /// Apply `JWT_SECRET`, `ENCRYPTION_KEY` and `PORT` from the environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    pub fn apply_env_from(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(secret) = var("JWT_SECRET").filter(|s| !s.is_empty()) {
            self.jwt_secret = secret;
        }
        if let Some(key) = var("ENCRYPTION_KEY").filter(|s| !s.is_empty()) {
            self.encryption_key = Some(key);
        }
        if let Some(port) = var("PORT").filter(|s| !s.is_empty()) {
            self.port = port.parse()?;
        }
        Ok(())
    }

    /// Reject configurations the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.jwt_secret.is_empty() {
            bail!("jwt_secret is not set (config file or JWT_SECRET)");
        }
        if self.connect_timeout_secs == 0 {
            bail!("connect_timeout_secs must be greater than zero");
        }
        Ok(())
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            shutdown_grace: Duration::from_secs(self.shutdown_grace_secs),
        }
    }

    pub fn ssh_config(&self) -> SshPtyConfig {
        SshPtyConfig {
            ssh_path: self.ssh_path.clone(),
            host_key_checking: self.host_key_checking.clone(),
            term: self.term.clone(),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
        }
    }
}
