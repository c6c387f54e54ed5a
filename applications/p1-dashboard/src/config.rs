use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const MIN_POLL_INTERVAL_SECS: f64 = 0.2;
pub const MAX_POLL_INTERVAL_SECS: f64 = 60.0;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Host or IP of the P1 meter; "http://" is assumed when no scheme is given
    #[serde(default = "default_device_host")]
    pub host: String,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: f64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_true")]
    pub auto_connect: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            host: default_device_host(),
            poll_interval_secs: default_poll_interval_secs(),
            request_timeout_ms: default_request_timeout_ms(),
            auto_connect: true,
        }
    }
}

fn default_device_host() -> String {
    "192.168.68.10".into()
}

fn default_poll_interval_secs() -> f64 {
    1.0
}

fn default_request_timeout_ms() -> u64 {
    2000
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_url")]
    pub url: String,
    #[serde(default)]
    pub caching_enabled: bool,
    /// Samples older than this are pruned; unset keeps everything
    #[serde(default)]
    pub retention_days: Option<u32>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            url: default_storage_url(),
            caching_enabled: false,
            retention_days: None,
        }
    }
}

fn default_storage_url() -> String {
    "sqlite://p1-dashboard.db".into()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowMode {
    Fifo,
    Calendar,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    #[serde(default = "default_window_capacity")]
    pub capacity: usize,
    #[serde(default = "default_window_mode")]
    pub mode: WindowMode,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            capacity: default_window_capacity(),
            mode: default_window_mode(),
        }
    }
}

fn default_window_capacity() -> usize {
    crate::window::DEFAULT_CAPACITY
}

fn default_window_mode() -> WindowMode {
    WindowMode::Fifo
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_host")]
    pub host: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
        }
    }
}

fn default_api_host() -> String {
    "127.0.0.1".into()
}

fn default_api_port() -> u16 {
    8080
}

impl Config {
    /// Load YAML from disk, substitute $(VAR)/${VAR} with env vars, then parse.
    /// Afterwards, P1_DEVICE_HOST and DATABASE_URL override the YAML values.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let expanded = expand_env_placeholders(raw)?;
        let mut cfg: Self = serde_yaml::from_str(&expanded)?;

        if let Ok(host) = std::env::var("P1_DEVICE_HOST") {
            cfg.device.host = host;
        }
        if let Ok(url) = std::env::var("DATABASE_URL") {
            cfg.storage.url = url;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.device.host.trim().is_empty() {
            return Err(AppError::Config("device.host cannot be empty".to_string()));
        }

        if !(MIN_POLL_INTERVAL_SECS..=MAX_POLL_INTERVAL_SECS)
            .contains(&self.device.poll_interval_secs)
        {
            return Err(AppError::Config(format!(
                "device.poll_interval_secs must be between {} and {}",
                MIN_POLL_INTERVAL_SECS, MAX_POLL_INTERVAL_SECS
            )));
        }

        if self.window.capacity == 0 {
            return Err(AppError::Config(
                "window.capacity must be greater than 0".to_string(),
            ));
        }

        if self.api.port == 0 {
            return Err(AppError::Config("api.port cannot be 0".to_string()));
        }

        Ok(())
    }
}

/// Expand $(VAR) and ${VAR} placeholders using environment variables.
/// "$$" becomes a literal "$".
fn expand_env_placeholders(input: &str) -> Result<String> {
    let mut out = String::with_capacity(input.len());
    let mut it = input.chars().peekable();

    while let Some(c) = it.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        let close = match it.peek().copied() {
            Some('$') => {
                it.next();
                out.push('$');
                continue;
            }
            Some('(') => ')',
            Some('{') => '}',
            _ => {
                out.push('$');
                continue;
            }
        };
        it.next();
        let var = read_until(&mut it, close).ok_or_else(|| {
            AppError::Config(format!("unterminated env placeholder: missing '{}'", close))
        })?;
        let val = std::env::var(&var)
            .map_err(|_| AppError::Config(format!("missing environment variable: {}", var)))?;
        out.push_str(&val);
    }

    Ok(out)
}

/// Read characters until we hit `end`, consuming the delimiter.
fn read_until<I>(it: &mut std::iter::Peekable<I>, end: char) -> Option<String>
where
    I: Iterator<Item = char>,
{
    let mut buf = String::new();
    for ch in it.by_ref() {
        if ch == end {
            return Some(buf);
        }
        buf.push(ch);
    }
    None
}
