pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;

pub use adapters::client::CoordinatorClient;
pub use config::CoordinatorConfig;
pub use crate::core::coordinator::{Coordinator, CoordinatorStats, ReapSummary, ReaperHandle};
pub use crate::core::ledger::PortLedger;
pub use utils::error::{CoordinatorError, Result};
