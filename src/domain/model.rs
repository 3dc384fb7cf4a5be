use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Flag names understood by the backend server. Also used as JSON keys at the HTTP boundary.
pub const SESSION_NAME_KEY: &str = "SESSION_NAME";
pub const SESSION_SEARCH_ID_KEY: &str = "SESSION_SEARCH_ID";
pub const PORT_KEY: &str = "PORT";

pub const DEFAULT_PORT_RANGE_START: u16 = 7777;
pub const DEFAULT_PORT_RANGE_END: u16 = 8000;
pub const DEFAULT_ENGINE: &str = "docker";
pub const DEFAULT_IMAGE: &str = "server";

/// Inclusive range of ports the coordinator may hand out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, port: u16) -> bool {
        port >= self.start && port <= self.end
    }

    pub fn len(&self) -> usize {
        if self.end < self.start {
            0
        } else {
            (self.end - self.start) as usize + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = u16> {
        self.start..=self.end
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self::new(DEFAULT_PORT_RANGE_START, DEFAULT_PORT_RANGE_END)
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// How the ledger picks the next port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[serde(rename_all = "snake_case")]
pub enum PortStrategy {
    /// Monotonic cursor, never reuses a port.
    Counter,
    /// Ascending scan that excludes ports bound on the host.
    #[default]
    Probe,
}

impl fmt::Display for PortStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortStrategy::Counter => write!(f, "counter"),
            PortStrategy::Probe => write!(f, "probe"),
        }
    }
}

/// Backend invocation strategy for a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum LaunchMode {
    /// Run a server executable directly on the host.
    Local {
        binary: String,
        #[serde(default)]
        project: Option<String>,
    },
    /// Run a container image through a container engine CLI.
    Container {
        #[serde(default = "default_engine")]
        engine: String,
        image: String,
    },
}

fn default_engine() -> String {
    DEFAULT_ENGINE.to_string()
}

impl Default for LaunchMode {
    fn default() -> Self {
        LaunchMode::Container {
            engine: default_engine(),
            image: DEFAULT_IMAGE.to_string(),
        }
    }
}

impl LaunchMode {
    pub fn name(&self) -> &'static str {
        match self {
            LaunchMode::Local { .. } => "local",
            LaunchMode::Container { .. } => "container",
        }
    }
}

/// Lifecycle of a launched backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Launching,
    Running,
    Exited,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Exited | SessionStatus::Failed)
    }

    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        match (self, next) {
            (SessionStatus::Launching, SessionStatus::Running) => true,
            (SessionStatus::Launching | SessionStatus::Running, s) => s.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Launching => write!(f, "launching"),
            SessionStatus::Running => write!(f, "running"),
            SessionStatus::Exited => write!(f, "exited"),
            SessionStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Everything a launcher needs to start one backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub instance_id: String,
    pub session_name: String,
    pub session_search_id: String,
    pub port: u16,
}

/// How a tracked backend ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitOutcome {
    pub code: Option<i32>,
}

impl ExitOutcome {
    pub fn status(&self) -> SessionStatus {
        match self.code {
            Some(0) => SessionStatus::Exited,
            _ => SessionStatus::Failed,
        }
    }
}

/// Serializable view of a tracked session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub instance_id: String,
    pub session_name: String,
    pub session_search_id: String,
    pub port: u16,
    /// PID or container name.
    pub handle: String,
    pub status: SessionStatus,
    pub launched_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}
