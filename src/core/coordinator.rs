use crate::adapters::launcher::CommandLauncher;
use crate::adapters::port_source::{ContainerPortProbe, CounterPortSource};
use crate::config::CoordinatorConfig;
use crate::core::ledger::PortLedger;
use crate::core::registry::SessionRegistry;
use crate::domain::model::{
    ExitOutcome, LaunchRequest, PortRange, PortStrategy, SessionInfo, SessionStatus,
};
use crate::domain::ports::{PortSource, ProcessLauncher};
use crate::utils::error::{CoordinatorError, Result};
use crate::utils::monitor::SystemMonitor;
use crate::utils::validation::Validate;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const DEFAULT_REAP_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(60);
/// Shortest reaper period; shorter requests are raised to it.
pub const MIN_REAP_INTERVAL: Duration = Duration::from_millis(1);

/// Allocates a port, launches a backend on it and tracks it until it exits.
pub struct Coordinator {
    ledger: PortLedger,
    launcher: Arc<dyn ProcessLauncher>,
    registry: SessionRegistry,
    retention: Duration,
    monitor: SystemMonitor,
}

#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorStats {
    pub strategy: PortStrategy,
    pub port_range: PortRange,
    pub tracked_sessions: usize,
    pub live_sessions: usize,
    pub finished_sessions: usize,
    pub allocated_ports: usize,
    pub available_ports: usize,
}

/// What one reaper cycle observed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapSummary {
    pub started: usize,
    pub finished: usize,
    pub unobservable: usize,
    pub evicted: usize,
}

impl Coordinator {
    pub fn new(ledger: PortLedger, launcher: Arc<dyn ProcessLauncher>, retention: Duration) -> Self {
        Self {
            ledger,
            launcher,
            registry: SessionRegistry::new(),
            retention,
            monitor: SystemMonitor::default(),
        }
    }

    pub fn with_monitoring(mut self, enabled: bool) -> Self {
        self.monitor = SystemMonitor::new(enabled);
        self
    }

    /// Wire the configured port source and launcher together.
    pub fn from_config(config: &CoordinatorConfig) -> Result<Self> {
        config.validate()?;

        let range = config.port_range();
        let source: Arc<dyn PortSource> = match config.ports.strategy {
            PortStrategy::Counter => Arc::new(CounterPortSource::new(range.start)),
            PortStrategy::Probe => Arc::new(ContainerPortProbe::new(config.probe_engine())),
        };
        let launcher = CommandLauncher::new(config.launch.mode.clone(), config.launch.server_args.clone());

        info!(
            range = %range,
            strategy = %config.ports.strategy,
            mode = config.launch.mode.name(),
            "Coordinator configured"
        );

        Ok(Self::new(
            PortLedger::new(range, source),
            Arc::new(launcher),
            config.retention(),
        )
        .with_monitoring(config.logging.monitor))
    }

    pub fn ledger(&self) -> &PortLedger {
        &self.ledger
    }

    /// Allocate a port and launch a backend on it. Returns the port.
    pub async fn create_session(&self, session_name: &str, session_search_id: &str) -> Result<u16> {
        self.launch_session(session_name, session_search_id)
            .await
            .map(|info| info.port)
    }

    /// Like [`Coordinator::create_session`] but returns the full tracked record.
    pub async fn launch_session(
        &self,
        session_name: &str,
        session_search_id: &str,
    ) -> Result<SessionInfo> {
        let port = self.ledger.allocate().await?;
        let request = LaunchRequest {
            instance_id: Uuid::new_v4().to_string(),
            session_name: session_name.to_string(),
            session_search_id: session_search_id.to_string(),
            port,
        };

        info!(
            instance_id = %request.instance_id,
            session_name = %session_name,
            session_search_id = %session_search_id,
            port = port,
            "Launching session"
        );

        let handle = match self.launcher.launch(&request).await {
            Ok(handle) => handle,
            Err(e) => {
                error!(instance_id = %request.instance_id, port = port, error = %e, "Launch failed");
                self.ledger.release(port).await;
                return Err(e);
            }
        };

        let info = SessionInfo {
            instance_id: request.instance_id,
            session_name: request.session_name,
            session_search_id: request.session_search_id,
            port,
            handle: handle.id(),
            status: SessionStatus::Launching,
            launched_at: Utc::now(),
            finished_at: None,
            exit_code: None,
        };
        self.registry.insert(info.clone(), handle).await;
        Ok(info)
    }

    /// Stop a backend explicitly and release its port.
    ///
    /// Tearing down a session that already finished returns its record unchanged.
    pub async fn terminate_session(&self, instance_id: &str) -> Result<SessionInfo> {
        let not_found = || CoordinatorError::SessionNotFound {
            instance_id: instance_id.to_string(),
        };

        let Some(handle) = self.registry.live_handle(instance_id).await? else {
            return self.registry.get(instance_id).await.ok_or_else(not_found);
        };

        handle.lock().await.terminate().await?;

        match self
            .registry
            .finish(instance_id, ExitOutcome { code: None }, SessionStatus::Exited)
            .await
        {
            Some(info) => {
                self.ledger.release(info.port).await;
                info!(instance_id = %instance_id, port = info.port, "Session torn down");
                Ok(info)
            }
            // the reaper saw the exit first and already released the port
            None => self.registry.get(instance_id).await.ok_or_else(not_found),
        }
    }

    /// One reaper pass: detect exits, release their ports, evict old records.
    pub async fn reap_once(&self) -> ReapSummary {
        let report = self.registry.poll().await;

        for info in &report.finished {
            self.ledger.release(info.port).await;
            match info.status {
                SessionStatus::Failed => warn!(
                    instance_id = %info.instance_id,
                    port = info.port,
                    exit_code = ?info.exit_code,
                    "Session failed, port released"
                ),
                _ => info!(
                    instance_id = %info.instance_id,
                    port = info.port,
                    "Session exited, port released"
                ),
            }
        }

        let evicted = self
            .registry
            .evict_expired(self.retention, Utc::now())
            .await;

        ReapSummary {
            started: report.started.len(),
            finished: report.finished.len(),
            unobservable: report.unobservable,
            evicted: evicted.len(),
        }
    }

    /// Run [`Coordinator::reap_once`] every `interval` until the handle is stopped.
    pub fn spawn_reaper(self: &Arc<Self>, interval: Duration) -> ReaperHandle {
        let interval = interval.max(MIN_REAP_INTERVAL);
        let coordinator = Arc::clone(self);
        let stop = Arc::new(Notify::new());
        let stop_signal = Arc::clone(&stop);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(interval = ?interval, "Reaper started");

            loop {
                tokio::select! {
                    _ = stop_signal.notified() => break,
                    _ = ticker.tick() => {
                        let summary = coordinator.reap_once().await;
                        if summary != ReapSummary::default() {
                            debug!(?summary, "Reaper cycle");
                        }
                        coordinator.monitor.log_stats("reaper cycle");
                    }
                }
            }

            info!("Reaper stopped");
        });

        ReaperHandle { stop, task }
    }

    pub async fn session(&self, instance_id: &str) -> Result<SessionInfo> {
        self.registry
            .get(instance_id)
            .await
            .ok_or_else(|| CoordinatorError::SessionNotFound {
                instance_id: instance_id.to_string(),
            })
    }

    pub async fn list_sessions(&self) -> Vec<SessionInfo> {
        self.registry.list().await
    }

    pub async fn stats(&self) -> CoordinatorStats {
        let sessions = self.registry.list().await;
        let live_sessions = sessions.iter().filter(|s| !s.status.is_terminal()).count();

        CoordinatorStats {
            strategy: self.ledger.strategy(),
            port_range: self.ledger.range(),
            tracked_sessions: sessions.len(),
            live_sessions,
            finished_sessions: sessions.len() - live_sessions,
            allocated_ports: self.ledger.allocated_count().await,
            available_ports: self.ledger.available_count().await,
        }
    }

    /// Tear down every live session. Stop the reaper first.
    pub async fn shutdown(&self) {
        let live = self.registry.live_ids().await;
        info!(sessions = live.len(), "Shutting down sessions");

        for instance_id in live {
            if let Err(e) = self.terminate_session(&instance_id).await {
                warn!(instance_id = %instance_id, error = %e, "Failed to tear down session during shutdown");
            }
        }
        self.monitor.log_final_stats();
    }
}

/// Controls a running reaper task.
pub struct ReaperHandle {
    stop: Arc<Notify>,
    task: JoinHandle<()>,
}

impl ReaperHandle {
    pub async fn stop(self) {
        self.stop.notify_one();
        if let Err(e) = self.task.await {
            error!(error = %e, "Reaper task panicked");
        }
    }
}
