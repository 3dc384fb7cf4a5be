use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("No port available in range {start}-{end}")]
    NoPortAvailable { start: u16, end: u16 },

    #[error("Failed to launch `{program}`: {message}")]
    LaunchError { program: String, message: String },

    #[error("Host port probe failed: {message}")]
    ProbeError { message: String },

    #[error("Cannot observe session {instance_id}: {message}")]
    ReaperObservationError { instance_id: String, message: String },

    #[error("Session not found: {instance_id}")]
    SessionNotFound { instance_id: String },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Coordinator rejected the request ({status}): {message}")]
    CoordinatorRejected { status: u16, message: String },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Missing configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Invalid value for {field}: '{value}' ({reason})")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Configuration validation failed for {field}: {message}")]
    ConfigValidationError { field: String, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Capacity,
    Launch,
    Host,
    Request,
    Configuration,
    Network,
    Internal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl CoordinatorError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            CoordinatorError::NoPortAvailable { .. } => ErrorCategory::Capacity,
            CoordinatorError::LaunchError { .. } => ErrorCategory::Launch,
            CoordinatorError::ProbeError { .. }
            | CoordinatorError::ReaperObservationError { .. } => ErrorCategory::Host,
            CoordinatorError::SessionNotFound { .. } | CoordinatorError::InvalidRequest { .. } => {
                ErrorCategory::Request
            }
            CoordinatorError::ConfigError { .. }
            | CoordinatorError::MissingConfigError { .. }
            | CoordinatorError::InvalidConfigValueError { .. }
            | CoordinatorError::ConfigValidationError { .. } => ErrorCategory::Configuration,
            CoordinatorError::HttpError(_) | CoordinatorError::CoordinatorRejected { .. } => {
                ErrorCategory::Network
            }
            CoordinatorError::IoError(_) | CoordinatorError::SerializationError(_) => {
                ErrorCategory::Internal
            }
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.category() {
            // 只影響單一請求或單一 session
            ErrorCategory::Host | ErrorCategory::Request => ErrorSeverity::Low,
            ErrorCategory::Capacity | ErrorCategory::Network => ErrorSeverity::Medium,
            ErrorCategory::Launch | ErrorCategory::Internal => ErrorSeverity::High,
            ErrorCategory::Configuration => ErrorSeverity::Critical,
        }
    }

    /// Whether the caller may simply retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoordinatorError::NoPortAvailable { .. } | CoordinatorError::HttpError(_)
        ) || matches!(self, CoordinatorError::CoordinatorRejected { status: 503, .. })
    }

    /// Status code used by the HTTP boundary for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            CoordinatorError::NoPortAvailable { .. } => 503,
            CoordinatorError::InvalidRequest { .. } | CoordinatorError::SerializationError(_) => {
                400
            }
            CoordinatorError::SessionNotFound { .. } => 404,
            CoordinatorError::CoordinatorRejected { status, .. } => *status,
            _ => 500,
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            CoordinatorError::NoPortAvailable { .. } => {
                "All game server ports are in use, please try again shortly".to_string()
            }
            CoordinatorError::LaunchError { .. } => {
                "The game server could not be started".to_string()
            }
            CoordinatorError::SessionNotFound { instance_id } => {
                format!("No session with id '{}'", instance_id)
            }
            CoordinatorError::InvalidRequest { message } => message.clone(),
            other => other.to_string(),
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Capacity => "Retry later or widen the configured port range",
            ErrorCategory::Launch => {
                "Check that the server binary or container image exists and the engine is running"
            }
            ErrorCategory::Host => "Check that the container engine CLI is installed and reachable",
            ErrorCategory::Request => "Check the request body and session id",
            ErrorCategory::Configuration => "Fix the configuration file or command line flags",
            ErrorCategory::Network => "Check that the coordinator URL is correct and reachable",
            ErrorCategory::Internal => "Inspect the coordinator logs for details",
        }
    }
}

pub type Result<T> = std::result::Result<T, CoordinatorError>;
