//! Port bookkeeping shared by every creation request and the reaper.

use crate::domain::model::{PortRange, PortStrategy};
use crate::domain::ports::PortSource;
use crate::utils::error::{CoordinatorError, Result};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Tracks which ports in the configured range are held by live sessions.
///
/// Allocation, the host probe and release all run under one lock, so a probe
/// result is never acted upon after a concurrent allocation changed the set.
pub struct PortLedger {
    range: PortRange,
    source: Arc<dyn PortSource>,
    allocated: Mutex<BTreeSet<u16>>,
}

impl PortLedger {
    pub fn new(range: PortRange, source: Arc<dyn PortSource>) -> Self {
        Self {
            range,
            source,
            allocated: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn range(&self) -> PortRange {
        self.range
    }

    pub fn strategy(&self) -> PortStrategy {
        self.source.strategy()
    }

    /// Claim the next free port.
    ///
    /// Never blocks waiting for a port: fails with `NoPortAvailable` as soon as
    /// the range is exhausted.
    pub async fn allocate(&self) -> Result<u16> {
        let mut allocated = self.allocated.lock().await;

        let port = match self.source.strategy() {
            PortStrategy::Counter => self.next_counter_port(&allocated),
            PortStrategy::Probe => {
                let external = self.observe_external().await;
                self.range
                    .iter()
                    .find(|port| !allocated.contains(port) && !external.contains(port))
            }
        };

        let port = port.ok_or(CoordinatorError::NoPortAvailable {
            start: self.range.start,
            end: self.range.end,
        })?;

        allocated.insert(port);
        debug!(port = port, allocated = allocated.len(), "Allocated port");
        Ok(port)
    }

    /// Return a port to the pool. Releasing a port that is not held is a no-op.
    pub async fn release(&self, port: u16) -> bool {
        let mut allocated = self.allocated.lock().await;
        let removed = allocated.remove(&port);
        if removed {
            debug!(port = port, allocated = allocated.len(), "Released port");
        } else {
            debug!(port = port, "Release of port that is not held ignored");
        }
        removed
    }

    pub async fn is_allocated(&self, port: u16) -> bool {
        self.allocated.lock().await.contains(&port)
    }

    pub async fn allocated_count(&self) -> usize {
        self.allocated.lock().await.len()
    }

    /// Ports in the range not held by this ledger. Host-bound ports are not subtracted.
    pub async fn available_count(&self) -> usize {
        self.range.len().saturating_sub(self.allocated_count().await)
    }

    pub async fn allocated_ports(&self) -> Vec<u16> {
        self.allocated.lock().await.iter().copied().collect()
    }

    fn next_counter_port(&self, allocated: &BTreeSet<u16>) -> Option<u16> {
        // The cursor only moves forward, so this loop ends once it passes the range.
        while let Some(candidate) = self.source.next_candidate() {
            if candidate > self.range.end {
                return None;
            }
            if candidate < self.range.start || allocated.contains(&candidate) {
                continue;
            }
            return Some(candidate);
        }
        None
    }

    async fn observe_external(&self) -> BTreeSet<u16> {
        match self.source.observe_used_ports().await {
            Ok(ports) => ports,
            Err(e) => {
                warn!(error = %e, "Port probe failed, relying on internal bookkeeping only");
                BTreeSet::new()
            }
        }
    }
}
