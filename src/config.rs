use anyhow::{anyhow, Context, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use std::str::FromStr;
use std::time::Duration;
use std::{env, fs};
use strum_macros::{Display, EnumString};
use tracing::{debug, info};

const DEFAULT_CONFIG_FILE: &str = "allsafe-console.json";

/// How plugin executions reach the backend. One per deployment, never mixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum TransportKind {
    /// Server-sent events, one event per log line
    #[default]
    Streaming,
    /// Single request answered with the full result
    Synchronous,
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub base_url: String,
    pub transport: TransportKind,
    pub execution_path: String,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "request_timeout_secs")]
    pub request_timeout: Duration,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "refresh_check_secs")]
    pub refresh_check_period: Duration,
    pub csrf_cookie_name: String,
    pub csrf_header: String,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            transport: TransportKind::Streaming,
            execution_path: "/api/plugin_result/".to_string(),
            request_timeout: Duration::from_secs(120),
            refresh_check_period: Duration::from_secs(10),
            csrf_cookie_name: "csrftoken".to_string(),
            csrf_header: "X-CSRFToken".to_string(),
        }
    }
}

impl ConsoleConfig {
    /// Reads the optional JSON file named by `ALLSAFE_CONSOLE_CONFIG`, then applies `ALLSAFE_*` overrides
    pub fn load() -> Result<Self> {
        let path =
            env::var("ALLSAFE_CONSOLE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        let file_cfg: Option<ConsoleConfig> = fs::read_to_string(&path)
            .ok()
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .with_context(|| format!("failed to parse {}", path))?;

        let mut cfg = match file_cfg {
            Some(cfg) => {
                info!("Loaded console configuration from {}", path);
                cfg
            }
            None => {
                debug!("No configuration file at {}, using defaults", path);
                Self::default()
            }
        };

        if let Ok(v) = env::var("ALLSAFE_BASE_URL") {
            cfg.base_url = v;
        }
        if let Ok(v) = env::var("ALLSAFE_TRANSPORT") {
            cfg.transport = TransportKind::from_str(&v)
                .with_context(|| format!("invalid ALLSAFE_TRANSPORT: {}", v))?;
        }
        if let Ok(v) = env::var("ALLSAFE_REQUEST_TIMEOUT_SECS") {
            let secs: u64 = v
                .parse()
                .with_context(|| format!("invalid ALLSAFE_REQUEST_TIMEOUT_SECS: {}", v))?;
            cfg.request_timeout = Duration::from_secs(secs);
        }
        if let Ok(v) = env::var("ALLSAFE_REFRESH_CHECK_SECS") {
            let secs: u64 = v
                .parse()
                .with_context(|| format!("invalid ALLSAFE_REFRESH_CHECK_SECS: {}", v))?;
            cfg.refresh_check_period = Duration::from_secs(secs);
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        self.base()?;
        if self.refresh_check_period.is_zero() {
            return Err(anyhow!("refresh check period must be at least one second"));
        }
        if !self.execution_path.starts_with('/') {
            return Err(anyhow!(
                "execution path must be absolute: {}",
                self.execution_path
            ));
        }
        Ok(())
    }

    pub fn base(&self) -> Result<Url> {
        Url::parse(&self.base_url).with_context(|| format!("invalid base URL: {}", self.base_url))
    }

    /// Joins an API path onto the base URL
    pub fn endpoint(&self, path: &str) -> Result<Url> {
        self.base()?
            .join(path)
            .with_context(|| format!("invalid endpoint path: {}", path))
    }
}
