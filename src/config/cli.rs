use crate::config::CoordinatorConfig;
use crate::domain::model::{LaunchMode, PortStrategy, DEFAULT_ENGINE, DEFAULT_IMAGE};
use crate::utils::error::Result;
use crate::utils::validation::{validate_required_field, Validate};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LaunchModeKind {
    Local,
    Container,
}

/// Command line of the coordinator. Flags override the configuration file.
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "session-coordinator")]
#[command(about = "Allocates ports and launches dedicated game servers on request")]
pub struct CliConfig {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address the HTTP endpoint listens on
    #[arg(long)]
    pub bind: Option<String>,

    /// First port that may be handed out
    #[arg(long)]
    pub port_start: Option<u16>,

    /// Last port that may be handed out (inclusive)
    #[arg(long)]
    pub port_end: Option<u16>,

    /// Port allocation strategy
    #[arg(long, value_enum)]
    pub strategy: Option<PortStrategy>,

    /// How backends are started
    #[arg(long, value_enum)]
    pub launch_mode: Option<LaunchModeKind>,

    /// Server executable (local mode)
    #[arg(long)]
    pub binary: Option<String>,

    /// Project file passed before the server flags (local mode)
    #[arg(long)]
    pub project: Option<String>,

    /// Server image (container mode)
    #[arg(long)]
    pub image: Option<String>,

    /// Container engine CLI, e.g. docker or podman
    #[arg(long)]
    pub engine: Option<String>,

    /// Seconds between reaper passes
    #[arg(long)]
    pub reap_interval_secs: Option<u64>,

    /// Seconds a finished session stays listed
    #[arg(long)]
    pub retention_secs: Option<u64>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,

    /// Log coordinator CPU and memory usage after each reaper pass
    #[arg(long)]
    pub monitor: bool,

    /// Print the resolved configuration and exit
    #[arg(long)]
    pub check_config: bool,
}

impl CliConfig {
    /// Load the configuration file (if any), apply flag overrides and validate.
    pub fn resolve(&self) -> Result<CoordinatorConfig> {
        let mut config = match &self.config {
            Some(path) => CoordinatorConfig::from_file(path)?,
            None => CoordinatorConfig::default(),
        };

        if let Some(bind) = &self.bind {
            config.server.bind = bind.clone();
        }
        if let Some(start) = self.port_start {
            config.ports.start = start;
        }
        if let Some(end) = self.port_end {
            config.ports.end = end;
        }
        if let Some(strategy) = self.strategy {
            config.ports.strategy = strategy;
        }
        if let Some(interval) = self.reap_interval_secs {
            config.reaper.interval_secs = interval;
        }
        if let Some(retention) = self.retention_secs {
            config.reaper.retention_secs = retention;
        }

        config.launch.mode = self.launch_mode_override(&config.launch.mode)?;

        config.logging.verbose |= self.verbose;
        config.logging.json |= self.json_logs;
        config.logging.monitor |= self.monitor;

        config.validate()?;
        Ok(config)
    }

    fn launch_mode_override(&self, current: &LaunchMode) -> Result<LaunchMode> {
        let kind = self.launch_mode.unwrap_or(match current {
            LaunchMode::Local { .. } => LaunchModeKind::Local,
            LaunchMode::Container { .. } => LaunchModeKind::Container,
        });

        let mode = match (kind, current) {
            (LaunchModeKind::Local, LaunchMode::Local { binary, project }) => LaunchMode::Local {
                binary: self.binary.clone().unwrap_or_else(|| binary.clone()),
                project: self.project.clone().or_else(|| project.clone()),
            },
            (LaunchModeKind::Local, LaunchMode::Container { .. }) => LaunchMode::Local {
                binary: validate_required_field("binary", &self.binary)?.clone(),
                project: self.project.clone(),
            },
            (LaunchModeKind::Container, LaunchMode::Container { engine, image }) => {
                LaunchMode::Container {
                    engine: self.engine.clone().unwrap_or_else(|| engine.clone()),
                    image: self.image.clone().unwrap_or_else(|| image.clone()),
                }
            }
            (LaunchModeKind::Container, LaunchMode::Local { .. }) => LaunchMode::Container {
                engine: self
                    .engine
                    .clone()
                    .unwrap_or_else(|| DEFAULT_ENGINE.to_string()),
                image: self
                    .image
                    .clone()
                    .unwrap_or_else(|| DEFAULT_IMAGE.to_string()),
            },
        };
        Ok(mode)
    }
}
