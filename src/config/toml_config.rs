use crate::adapters::launcher::default_server_args;
use crate::core::coordinator::{DEFAULT_REAP_INTERVAL, DEFAULT_RETENTION};
use crate::domain::model::{
    LaunchMode, PortRange, PortStrategy, DEFAULT_ENGINE, DEFAULT_PORT_RANGE_END,
    DEFAULT_PORT_RANGE_START,
};
use crate::utils::error::{CoordinatorError, Result};
use crate::utils::validation::{self, Validate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

pub const DEFAULT_BIND: &str = "0.0.0.0:80";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub server: ServerConfig,
    pub ports: PortsConfig,
    pub launch: LaunchConfig,
    pub reaper: ReaperConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortsConfig {
    pub start: u16,
    pub end: u16,
    pub strategy: PortStrategy,
    /// Engine CLI queried by the probe strategy when launching local binaries.
    pub probe_engine: Option<String>,
}

impl Default for PortsConfig {
    fn default() -> Self {
        Self {
            start: DEFAULT_PORT_RANGE_START,
            end: DEFAULT_PORT_RANGE_END,
            strategy: PortStrategy::default(),
            probe_engine: None,
        }
    }
}

/// `[launch]` table. `mode` selects the variant:
///
/// ```toml
/// [launch]
/// mode = "local"
/// binary = "/opt/game/Server.sh"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchConfig {
    #[serde(flatten)]
    pub mode: LaunchMode,
    #[serde(default = "default_server_args")]
    pub server_args: Vec<String>,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            mode: LaunchMode::default(),
            server_args: default_server_args(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaperConfig {
    pub interval_secs: u64,
    pub retention_secs: u64,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_REAP_INTERVAL.as_secs(),
            retention_secs: DEFAULT_RETENTION.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub verbose: bool,
    pub json: bool,
    pub monitor: bool,
}

impl CoordinatorConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(CoordinatorError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        // 處理環境變數替換
        let processed_content = Self::substitute_env_vars(content);

        toml::from_str(&processed_content).map_err(|e| CoordinatorError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| CoordinatorError::ConfigError {
            message: format!("Cannot render configuration: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${GAME_SERVER_IMAGE})，未設定的變數保持原樣
    fn substitute_env_vars(content: &str) -> String {
        static RE: OnceLock<Regex> = OnceLock::new();
        let re = RE.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("static regex is valid"));

        re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        })
        .into_owned()
    }

    pub fn port_range(&self) -> PortRange {
        PortRange::new(self.ports.start, self.ports.end)
    }

    /// Engine queried by the probe strategy: the launch engine in container
    /// mode, otherwise `ports.probe_engine` or `docker`.
    pub fn probe_engine(&self) -> String {
        match &self.launch.mode {
            LaunchMode::Container { engine, .. } => engine.clone(),
            LaunchMode::Local { .. } => self
                .ports
                .probe_engine
                .clone()
                .unwrap_or_else(|| DEFAULT_ENGINE.to_string()),
        }
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reaper.interval_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.reaper.retention_secs)
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        validation::validate_socket_addr("server.bind", &self.server.bind)
    }
}

impl Validate for CoordinatorConfig {
    fn validate(&self) -> Result<()> {
        // 驗證監聽位址
        self.bind_addr()?;

        // 驗證 port 範圍
        validation::validate_port_range("ports", self.ports.start, self.ports.end)?;

        // 驗證啟動模式
        match &self.launch.mode {
            LaunchMode::Local { binary, project } => {
                validation::validate_non_empty_string("launch.binary", binary)?;
                if let Some(project) = project {
                    validation::validate_non_empty_string("launch.project", project)?;
                }
            }
            LaunchMode::Container { engine, image } => {
                validation::validate_non_empty_string("launch.engine", engine)?;
                validation::validate_non_empty_string("launch.image", image)?;
            }
        }

        if let Some(engine) = &self.ports.probe_engine {
            validation::validate_non_empty_string("ports.probe_engine", engine)?;
        }

        // 驗證 reaper 週期
        validation::validate_positive_number("reaper.interval_secs", self.reaper.interval_secs, 1)?;

        Ok(())
    }
}
