use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ConfigError;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/kiosk/kiosk.toml";
pub const CONFIG_PATH_ENV: &str = "KIOSK_CONFIG";
pub const API_URL_ENV: &str = "KIOSK_API_URL";
pub const DEVICE_ID_ENV: &str = "KIOSK_DEVICE_ID";
pub const WATCHDOG_INTERVAL_ENV: &str = "WATCHDOG_CHECK_INTERVAL";
pub const AGENT_TOKEN_ENV: &str = "KIOSK_AGENT_TOKEN";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub url: String,
    pub status_timeout_secs: u64,
    pub register_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost/api".to_string(),
            status_timeout_secs: 5,
            register_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub id: Option<String>,
    pub power_command: Vec<String>,
    pub power_on_arg: String,
    pub power_off_arg: String,
    pub power_timeout_secs: u64,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            id: None,
            power_command: vec!["vcgencmd".to_string(), "display_power".to_string()],
            power_on_arg: "1".to_string(),
            power_off_arg: "0".to_string(),
            power_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub check_interval: u64,
    pub content_service: String,
    pub manager: Vec<String>,
    pub control_timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            check_interval: 60,
            content_service: "kiosk-content".to_string(),
            manager: vec!["sudo".to_string(), "systemctl".to_string()],
            control_timeout_secs: 10,
        }
    }
}

/// The X session and browsers that make up the rendering surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfaceConfig {
    pub display: String,
    pub windowing_process: String,
    pub browsers: Vec<String>,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            display: ":0".to_string(),
            windowing_process: "Xorg".to_string(),
            browsers: ["chromium-browser", "epiphany-browser", "surf", "firefox-esr"]
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub log_file: PathBuf,
    pub pid_file: PathBuf,
    pub status_file: PathBuf,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            log_file: PathBuf::from("/var/log/kiosk-scheduler.log"),
            pid_file: PathBuf::from("/run/kiosk-scheduler.pid"),
            status_file: PathBuf::from("/tmp/kiosk_display_status"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub log_file: PathBuf,
    pub pid_file: PathBuf,
    pub home_dir: PathBuf,
    pub listen_addr: String,
    /// `Host` values accepted besides the loopback names for the listen
    /// port. Needed only when the agent listens beyond loopback.
    pub allowed_hosts: Vec<String>,
    /// Bearer token required on `POST /api/command`. Commands are refused
    /// while it is unset.
    pub command_token: Option<String>,
    pub poll_interval_secs: u64,
    pub command_timeout_secs: u64,
    pub kill_timeout_secs: u64,
    pub restart_settle_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            log_file: PathBuf::from("/var/log/kiosk-agent.log"),
            pid_file: PathBuf::from("/run/kiosk-agent.pid"),
            home_dir: PathBuf::from("/opt/kiosk"),
            listen_addr: "127.0.0.1:8765".to_string(),
            allowed_hosts: Vec::new(),
            command_token: None,
            poll_interval_secs: 60,
            command_timeout_secs: 10,
            kill_timeout_secs: 5,
            restart_settle_secs: 2,
        }
    }
}

impl AgentConfig {
    pub fn screenshot_dir(&self) -> PathBuf {
        self.home_dir.join("screenshots")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    pub log_file: PathBuf,
    pub pid_file: PathBuf,
    pub check_interval_secs: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            log_file: PathBuf::from("/var/log/kiosk-watchdog.log"),
            pid_file: PathBuf::from("/run/kiosk-watchdog.pid"),
            check_interval_secs: 30,
        }
    }
}

/// Settings shared by all three agents. Loaded once at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KioskConfig {
    pub api: ApiConfig,
    pub display: DisplayConfig,
    pub service: ServiceConfig,
    pub surface: SurfaceConfig,
    pub scheduler: SchedulerConfig,
    pub agent: AgentConfig,
    pub watchdog: WatchdogConfig,
}

impl KioskConfig {
    pub fn config_path() -> PathBuf {
        std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    /// Reads `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        Self::parse(&raw, path)
    }

    pub fn parse(raw: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(API_URL_ENV).filter(|value| !value.trim().is_empty()) {
            self.api.url = url;
        }

        if let Some(id) = lookup(DEVICE_ID_ENV).filter(|value| !value.trim().is_empty()) {
            self.display.id = Some(id);
        }

        if let Some(token) = lookup(AGENT_TOKEN_ENV).filter(|value| !value.trim().is_empty()) {
            self.agent.command_token = Some(token);
        }

        if let Some(raw) = lookup(WATCHDOG_INTERVAL_ENV) {
            match raw.trim().parse::<u64>() {
                Ok(secs) => self.watchdog.check_interval_secs = secs,
                Err(_) => warn!("ignoring invalid {WATCHDOG_INTERVAL_ENV}={raw:?}"),
            }
        }
    }

    pub fn sanitize(&mut self) {
        self.api.url = self.api.url.trim_end_matches('/').to_string();
        self.api.status_timeout_secs = self.api.status_timeout_secs.max(1);
        self.api.register_timeout_secs = self.api.register_timeout_secs.max(1);
        self.display.power_timeout_secs = self.display.power_timeout_secs.max(1);
        self.service.check_interval = self.service.check_interval.max(1);
        self.service.control_timeout_secs = self.service.control_timeout_secs.max(1);
        self.agent.poll_interval_secs = self.agent.poll_interval_secs.max(1);
        self.agent.command_timeout_secs = self.agent.command_timeout_secs.max(1);
        self.agent.kill_timeout_secs = self.agent.kill_timeout_secs.max(1);
        self.watchdog.check_interval_secs = self.watchdog.check_interval_secs.max(1);

        if self.display.id.as_deref().is_some_and(|id| id.trim().is_empty()) {
            self.display.id = None;
        }
        if self
            .agent
            .command_token
            .as_deref()
            .is_some_and(|token| token.trim().is_empty())
        {
            self.agent.command_token = None;
        }
    }

    pub fn device_id(&self) -> Result<&str, ConfigError> {
        self.display.id.as_deref().ok_or(ConfigError::Missing("display.id"))
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.service.check_interval)
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_secs(self.api.status_timeout_secs)
    }
}
