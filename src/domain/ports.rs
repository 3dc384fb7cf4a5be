use crate::domain::model::{ExitOutcome, LaunchRequest, PortStrategy};
use crate::utils::error::Result;
use async_trait::async_trait;
use std::collections::BTreeSet;

/// Where the ledger learns about ports it does not own.
#[async_trait]
pub trait PortSource: Send + Sync {
    fn strategy(&self) -> PortStrategy;

    /// Ports currently bound by anything visible on the host.
    async fn observe_used_ports(&self) -> Result<BTreeSet<u16>>;

    /// Next port to hand out without scanning. Only the counter strategy yields one.
    fn next_candidate(&self) -> Option<u16> {
        None
    }
}

/// A started backend process or container.
#[async_trait]
pub trait ProcessHandle: Send + Sync {
    /// PID or container name, for logs and listings.
    fn id(&self) -> String;

    /// `Ok(None)` while the backend is still alive.
    async fn poll_exit(&mut self) -> Result<Option<ExitOutcome>>;

    /// Stop the backend and collect its exit status.
    async fn terminate(&mut self) -> Result<()>;
}

#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    /// Start a backend and return as soon as it is spawned, not when it is ready.
    async fn launch(&self, request: &LaunchRequest) -> Result<Box<dyn ProcessHandle>>;
}
