pub mod coordinator;
pub mod ledger;
pub mod registry;

pub use crate::domain::model::{LaunchRequest, PortRange, SessionInfo, SessionStatus};
pub use crate::domain::ports::{PortSource, ProcessHandle, ProcessLauncher};
pub use crate::utils::error::Result;
