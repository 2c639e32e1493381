use gpuhunt_common::rates::DEFAULT_GPU_DPH_RATES;
use gpuhunt_common::{RateTable, RateTableError};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_API_BASE_URL: &str = "https://console.vast.ai/api/v0";
pub const DEFAULT_API_KEY_FILE: &str = "api_key.txt";
pub const DEFAULT_ORDER_IMAGE: &str = "nvidia/cuda:12.0.1-devel-ubuntu20.04";
pub const DEFAULT_LOG_FILE: &str = "gpuhunt.log";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("{var}: invalid value `{value}` ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error("GPU_DPH_RATES: {0}")]
    Rates(#[from] RateTableError),
    #[error("no API key: file `{file}` not readable and VAST_API_KEY not set")]
    MissingApiKey { file: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Vast,
    Mock,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Vast => "vast",
            ProviderKind::Mock => "mock",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorMode {
    /// One tokio task per accepted order; the search loop keeps going.
    Spawn,
    /// Await each instance before looking at the next offer.
    Inline,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub provider: ProviderKind,
    pub api_base_url: String,
    pub api_key: Option<String>,

    pub rates: RateTable,
    pub min_cuda: f64,
    pub verified_only: bool,
    pub max_orders: u32,

    pub check_interval: Duration,
    pub loop_tick: Duration,
    pub initial_delay: Duration,

    pub monitor_timeout: Duration,
    pub monitor_interval: Duration,
    pub min_gpu_util: Option<f64>,
    pub monitor_mode: MonitorMode,
    pub verify_before_order: bool,

    pub ignore_machine_ids: Vec<u64>,

    pub order_image: String,
    pub order_disk_gb: u32,
    pub order_onstart: Option<String>,

    /// None disables balance logging.
    pub balance_interval: Option<Duration>,
    pub status_addr: Option<SocketAddr>,
    pub log_file: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Vast,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            api_key: None,
            rates: RateTable::parse(DEFAULT_GPU_DPH_RATES).unwrap_or_default(),
            min_cuda: 12.0,
            verified_only: false,
            max_orders: 6,
            check_interval: Duration::from_secs(30),
            loop_tick: Duration::from_secs(5),
            initial_delay: Duration::from_secs(10),
            monitor_timeout: Duration::from_secs(300),
            monitor_interval: Duration::from_secs(30),
            min_gpu_util: None,
            monitor_mode: MonitorMode::Spawn,
            verify_before_order: true,
            ignore_machine_ids: vec![],
            order_image: DEFAULT_ORDER_IMAGE.to_string(),
            order_disk_gb: 4,
            order_onstart: None,
            balance_interval: Some(Duration::from_secs(300)),
            status_addr: None,
            log_file: Some(PathBuf::from(DEFAULT_LOG_FILE)),
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup (env in production, a map in tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };
        let d = Settings::default();

        let provider = match get("PROVIDER").map(|s| s.to_ascii_lowercase()).as_deref() {
            None | Some("vast") => ProviderKind::Vast,
            Some("mock") => ProviderKind::Mock,
            Some(other) => {
                return Err(SettingsError::Invalid {
                    var: "PROVIDER",
                    value: other.to_string(),
                    reason: "expected `vast` or `mock`".to_string(),
                })
            }
        };

        let monitor_mode = match get("MONITOR_MODE").map(|s| s.to_ascii_lowercase()).as_deref() {
            None | Some("spawn") => MonitorMode::Spawn,
            Some("inline") => MonitorMode::Inline,
            Some(other) => {
                return Err(SettingsError::Invalid {
                    var: "MONITOR_MODE",
                    value: other.to_string(),
                    reason: "expected `spawn` or `inline`".to_string(),
                })
            }
        };

        let rates = match get("GPU_DPH_RATES") {
            Some(raw) => RateTable::parse(&raw)?,
            None => d.rates.clone(),
        };

        // Prefer the key file, fallback to env var.
        let api_key_file =
            get("VAST_API_KEY_FILE").unwrap_or_else(|| DEFAULT_API_KEY_FILE.to_string());
        let api_key = std::fs::read_to_string(&api_key_file)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .or_else(|| get("VAST_API_KEY"));
        if provider == ProviderKind::Vast && api_key.is_none() {
            return Err(SettingsError::MissingApiKey { file: api_key_file });
        }

        let min_gpu_util = match get("MIN_GPU_UTIL") {
            Some(raw) => Some(parse_f64("MIN_GPU_UTIL", &raw, 0.0, 100.0)?),
            None => None,
        };

        let balance_interval = match get("BALANCE_INTERVAL_S") {
            Some(raw) => match parse_u64("BALANCE_INTERVAL_S", &raw)? {
                0 => None,
                s => Some(Duration::from_secs(s)),
            },
            None => d.balance_interval,
        };

        let status_addr = match get("STATUS_ADDR") {
            Some(raw) => Some(raw.parse::<SocketAddr>().map_err(|e| SettingsError::Invalid {
                var: "STATUS_ADDR",
                value: raw.clone(),
                reason: e.to_string(),
            })?),
            None => None,
        };

        // LOG_FILE set to an empty string disables file logging.
        let log_file = match lookup("LOG_FILE") {
            Some(raw) if raw.trim().is_empty() => None,
            Some(raw) => Some(PathBuf::from(raw.trim())),
            None => d.log_file.clone(),
        };

        let max_orders = match get("MAX_ORDERS") {
            Some(raw) => {
                let n = parse_u64("MAX_ORDERS", &raw)?;
                u32::try_from(n)
                    .ok()
                    .filter(|n| *n > 0)
                    .ok_or_else(|| SettingsError::Invalid {
                        var: "MAX_ORDERS",
                        value: raw.clone(),
                        reason: "must be a positive integer".to_string(),
                    })?
            }
            None => d.max_orders,
        };

        Ok(Settings {
            provider,
            api_base_url: get("VAST_API_BASE_URL").unwrap_or(d.api_base_url),
            api_key,
            rates,
            min_cuda: opt_f64(&get, "MIN_CUDA_VERSION", d.min_cuda, 0.0, 100.0)?,
            verified_only: opt_bool(&get, "VERIFIED_ONLY", d.verified_only)?,
            max_orders,
            check_interval: opt_secs(&get, "CHECK_INTERVAL_S", d.check_interval, true)?,
            loop_tick: opt_secs(&get, "LOOP_TICK_S", d.loop_tick, true)?,
            initial_delay: opt_secs(&get, "INITIAL_DELAY_S", d.initial_delay, false)?,
            monitor_timeout: opt_secs(&get, "MONITOR_TIMEOUT_S", d.monitor_timeout, true)?,
            monitor_interval: opt_secs(&get, "MONITOR_INTERVAL_S", d.monitor_interval, true)?,
            min_gpu_util,
            monitor_mode,
            verify_before_order: opt_bool(&get, "VERIFY_BEFORE_ORDER", d.verify_before_order)?,
            ignore_machine_ids: parse_machine_ids(get("IGNORE_MACHINE_IDS").as_deref())?,
            order_image: get("ORDER_IMAGE").unwrap_or(d.order_image),
            order_disk_gb: match get("ORDER_DISK_GB") {
                Some(raw) => u32::try_from(parse_u64("ORDER_DISK_GB", &raw)?).map_err(|e| {
                    SettingsError::Invalid {
                        var: "ORDER_DISK_GB",
                        value: raw.clone(),
                        reason: e.to_string(),
                    }
                })?,
                None => d.order_disk_gb,
            },
            order_onstart: get("ORDER_ONSTART"),
            balance_interval,
            status_addr,
            log_file,
        })
    }
}

/// Parse a comma-separated machine id list.
///
/// - Trims whitespace
/// - Drops empty entries and duplicates (first occurrence wins)
pub fn parse_machine_ids(raw: Option<&str>) -> Result<Vec<u64>, SettingsError> {
    let mut out: Vec<u64> = vec![];
    for part in raw.unwrap_or("").split(',').map(|s| s.trim()).filter(|s| !s.is_empty()) {
        let id = part.parse::<u64>().map_err(|e| SettingsError::Invalid {
            var: "IGNORE_MACHINE_IDS",
            value: part.to_string(),
            reason: e.to_string(),
        })?;
        if !out.contains(&id) {
            out.push(id);
        }
    }
    Ok(out)
}

fn parse_u64(var: &'static str, raw: &str) -> Result<u64, SettingsError> {
    raw.parse::<u64>().map_err(|e| SettingsError::Invalid {
        var,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

fn parse_f64(var: &'static str, raw: &str, min: f64, max: f64) -> Result<f64, SettingsError> {
    let v = raw.parse::<f64>().map_err(|e| SettingsError::Invalid {
        var,
        value: raw.to_string(),
        reason: e.to_string(),
    })?;
    if !v.is_finite() || v < min || v > max {
        return Err(SettingsError::Invalid {
            var,
            value: raw.to_string(),
            reason: format!("must be between {} and {}", min, max),
        });
    }
    Ok(v)
}

fn opt_f64<G>(get: &G, var: &'static str, default: f64, min: f64, max: f64) -> Result<f64, SettingsError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        Some(raw) => parse_f64(var, &raw, min, max),
        None => Ok(default),
    }
}

fn opt_bool<G>(get: &G, var: &'static str, default: bool) -> Result<bool, SettingsError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(var).map(|s| s.to_ascii_lowercase()).as_deref() {
        None => Ok(default),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(other) => Err(SettingsError::Invalid {
            var,
            value: other.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}

fn opt_secs<G>(
    get: &G,
    var: &'static str,
    default: Duration,
    non_zero: bool,
) -> Result<Duration, SettingsError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        Some(raw) => {
            let s = parse_u64(var, &raw)?;
            if non_zero && s == 0 {
                return Err(SettingsError::Invalid {
                    var,
                    value: raw,
                    reason: "must be greater than 0".to_string(),
                });
            }
            Ok(Duration::from_secs(s))
        }
        None => Ok(default),
    }
}
