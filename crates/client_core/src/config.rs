use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use thiserror::Error;
use url::Url;

pub const DEFAULT_BROKER_URL: &str = "http://localhost:8081/api/ws-command";
pub const DEFAULT_CONFIG_FILE: &str = "viewer.toml";
pub const DEFAULT_CELL_SIZE: f64 = 25.0;
const ENV_PREFIX: &str = "SIM_VIEWER__";
const SOCKJS_WEBSOCKET_SUFFIX: &str = "websocket";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },
    #[error("invalid broker url '{0}': expected http(s):// or ws(s)://")]
    InvalidBrokerUrl(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// SockJS endpoint or raw WebSocket url of the broker.
    pub broker_url: String,
    /// Pixel size of one grid cell.
    pub cell_size: f64,
    pub auto_step_period: Duration,
    /// Zero disables automatic reconnect.
    pub reconnect_delay: Duration,
    pub connect_timeout: Duration,
    pub download_dir: PathBuf,
    /// Falls back to a per-user directory chosen by the front end when unset.
    pub state_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            broker_url: DEFAULT_BROKER_URL.into(),
            cell_size: DEFAULT_CELL_SIZE,
            auto_step_period: Duration::from_millis(1000),
            reconnect_delay: Duration::from_millis(5000),
            connect_timeout: Duration::from_millis(10_000),
            download_dir: PathBuf::from("."),
            state_dir: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileSettings {
    broker_url: Option<String>,
    cell_size: Option<f64>,
    auto_step_period_ms: Option<u64>,
    reconnect_delay_ms: Option<u64>,
    connect_timeout_ms: Option<u64>,
    download_dir: Option<PathBuf>,
    state_dir: Option<PathBuf>,
}

/// Defaults, then `viewer.toml` in the working directory when it exists, then
/// `SIM_VIEWER__*` environment variables.
pub fn load_settings() -> Result<Settings, ConfigError> {
    let default_path = Path::new(DEFAULT_CONFIG_FILE);
    let file = default_path.exists().then_some(default_path);
    load_settings_from(file)
}

/// Like [`load_settings`] but with an explicit config file, which must exist.
pub fn load_settings_from(path: Option<&Path>) -> Result<Settings, ConfigError> {
    let mut settings = Settings::default();
    if let Some(path) = path {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        apply_file_overrides(&mut settings, &raw, path)?;
    }
    apply_env_overrides(&mut settings, |key| std::env::var(key).ok())?;
    Ok(settings)
}

fn apply_file_overrides(settings: &mut Settings, raw: &str, path: &Path) -> Result<(), ConfigError> {
    let file_cfg = toml::from_str::<FileSettings>(raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    if let Some(v) = file_cfg.broker_url {
        settings.broker_url = v;
    }
    if let Some(v) = file_cfg.cell_size {
        settings.cell_size = validate_cell_size("cell_size", v)?;
    }
    if let Some(v) = file_cfg.auto_step_period_ms {
        settings.auto_step_period = validate_period("auto_step_period_ms", v)?;
    }
    if let Some(v) = file_cfg.reconnect_delay_ms {
        settings.reconnect_delay = Duration::from_millis(v);
    }
    if let Some(v) = file_cfg.connect_timeout_ms {
        settings.connect_timeout = validate_period("connect_timeout_ms", v)?;
    }
    if let Some(v) = file_cfg.download_dir {
        settings.download_dir = v;
    }
    if let Some(v) = file_cfg.state_dir {
        settings.state_dir = Some(v);
    }
    Ok(())
}

fn apply_env_overrides(
    settings: &mut Settings,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    let var = |name: &str| {
        let key = format!("{ENV_PREFIX}{name}");
        lookup(&key).map(|value| (key, value))
    };

    if let Some((_, v)) = var("BROKER_URL") {
        settings.broker_url = v;
    }
    if let Some((key, v)) = var("CELL_SIZE") {
        let parsed = parse_number::<f64>(&key, &v)?;
        settings.cell_size = validate_cell_size(&key, parsed)?;
    }
    if let Some((key, v)) = var("AUTO_STEP_PERIOD_MS") {
        let parsed = parse_number::<u64>(&key, &v)?;
        settings.auto_step_period = validate_period(&key, parsed)?;
    }
    if let Some((key, v)) = var("RECONNECT_DELAY_MS") {
        settings.reconnect_delay = Duration::from_millis(parse_number::<u64>(&key, &v)?);
    }
    if let Some((key, v)) = var("CONNECT_TIMEOUT_MS") {
        let parsed = parse_number::<u64>(&key, &v)?;
        settings.connect_timeout = validate_period(&key, parsed)?;
    }
    if let Some((_, v)) = var("DOWNLOAD_DIR") {
        settings.download_dir = PathBuf::from(v);
    }
    if let Some((_, v)) = var("STATE_DIR") {
        settings.state_dir = Some(PathBuf::from(v));
    }
    Ok(())
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn validate_cell_size(key: &str, value: f64) -> Result<f64, ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        })
    }
}

fn validate_period(key: &str, millis: u64) -> Result<Duration, ConfigError> {
    if millis == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: millis.to_string(),
        });
    }
    Ok(Duration::from_millis(millis))
}

/// Turns the configured broker url into the raw WebSocket url of its SockJS
/// endpoint: `http(s)` becomes `ws(s)` and `/websocket` is appended once.
pub fn normalize_broker_url(raw: &str) -> Result<Url, ConfigError> {
    let raw = raw.trim();
    let raw = if raw.is_empty() { DEFAULT_BROKER_URL } else { raw };
    let invalid = || ConfigError::InvalidBrokerUrl(raw.to_string());

    let mut url = Url::parse(raw).map_err(|_| invalid())?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        _ => return Err(invalid()),
    };
    url.set_scheme(scheme).map_err(|_| invalid())?;

    let path = url.path().trim_end_matches('/').to_string();
    if !path.ends_with(&format!("/{SOCKJS_WEBSOCKET_SUFFIX}")) {
        url.set_path(&format!("{path}/{SOCKJS_WEBSOCKET_SUFFIX}"));
    }
    Ok(url)
}
