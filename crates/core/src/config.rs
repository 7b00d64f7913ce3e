use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TracelineError};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub service_name: String,
    pub daemon_udp_addr: String,
    pub daemon_tcp_addr: String,
    pub emit_channel_capacity: usize,
    pub proxy_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "traceline".to_string(),
            daemon_udp_addr: "127.0.0.1:2000".to_string(),
            daemon_tcp_addr: "127.0.0.1:2000".to_string(),
            emit_channel_capacity: 256,
            proxy_timeout: Duration::from_secs(2),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut cfg = Self::default();
        let config_path = config_file_path();
        if let Some(file_overrides) = load_file_overrides(&config_path)? {
            apply_overrides(&mut cfg, file_overrides, "config file")?;
        }
        let env_overrides = load_env_overrides()?;
        apply_overrides(&mut cfg, env_overrides, "environment")?;
        Ok(cfg)
    }

    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        let env_overrides = load_env_overrides()?;
        apply_overrides(&mut cfg, env_overrides, "environment")?;
        Ok(cfg)
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigOverrides {
    service_name: Option<String>,
    daemon_udp_addr: Option<String>,
    daemon_tcp_addr: Option<String>,
    emit_channel_capacity: Option<usize>,
    proxy_timeout: Option<String>,
}

fn config_file_path() -> PathBuf {
    if let Ok(path) = env::var("TRACELINE_CONFIG") {
        return PathBuf::from(path);
    }

    let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
    let config_home = env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(home).join(".config"));
    config_home.join("traceline/config.toml")
}

fn load_file_overrides(path: &PathBuf) -> Result<Option<ConfigOverrides>> {
    if !path.exists() {
        return Ok(None);
    }

    let raw = fs::read_to_string(path)
        .map_err(|e| TracelineError::Config(format!("failed reading {}: {e}", path.display())))?;
    let parsed: ConfigOverrides = toml::from_str(&raw)
        .map_err(|e| TracelineError::Config(format!("failed parsing {}: {e}", path.display())))?;
    Ok(Some(parsed))
}

fn load_env_overrides() -> Result<ConfigOverrides> {
    let emit_channel_capacity = match env::var("TRACELINE_EMIT_CHANNEL_CAPACITY") {
        Ok(v) => Some(v.parse::<usize>().map_err(|e| {
            TracelineError::Config(format!(
                "bad TRACELINE_EMIT_CHANNEL_CAPACITY in environment: {e}"
            ))
        })?),
        Err(_) => None,
    };

    Ok(ConfigOverrides {
        service_name: env::var("TRACELINE_SERVICE_NAME").ok(),
        daemon_udp_addr: env::var("TRACELINE_DAEMON_UDP_ADDR").ok(),
        daemon_tcp_addr: env::var("TRACELINE_DAEMON_TCP_ADDR").ok(),
        emit_channel_capacity,
        proxy_timeout: env::var("TRACELINE_PROXY_TIMEOUT").ok(),
    })
}

fn apply_overrides(cfg: &mut Config, overrides: ConfigOverrides, source: &str) -> Result<()> {
    if let Some(v) = overrides.service_name {
        cfg.service_name = v;
    }
    if let Some(v) = overrides.daemon_udp_addr {
        cfg.daemon_udp_addr = v;
    }
    if let Some(v) = overrides.daemon_tcp_addr {
        cfg.daemon_tcp_addr = v;
    }
    if let Some(v) = overrides.emit_channel_capacity {
        if v == 0 {
            return Err(TracelineError::Config(format!(
                "emit_channel_capacity in {source} must be positive"
            )));
        }
        cfg.emit_channel_capacity = v;
    }
    if let Some(v) = overrides.proxy_timeout {
        cfg.proxy_timeout = crate::time::parse_duration_str(&v)
            .map_err(|e| TracelineError::Config(format!("bad proxy_timeout in {source}: {e}")))?;
    }
    Ok(())
}
