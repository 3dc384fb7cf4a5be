//! Session instance bookkeeping and liveness polling.

use crate::domain::model::{ExitOutcome, SessionInfo, SessionStatus};
use crate::domain::ports::ProcessHandle;
use crate::utils::error::{CoordinatorError, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

pub type SharedHandle = Arc<Mutex<Box<dyn ProcessHandle>>>;

struct TrackedSession {
    info: SessionInfo,
    handle: SharedHandle,
}

impl TrackedSession {
    /// Apply a status change if the state machine allows it.
    fn transition(&mut self, next: SessionStatus, exit_code: Option<i32>) -> bool {
        if !self.info.status.can_transition_to(next) {
            return false;
        }
        self.info.status = next;
        if next.is_terminal() {
            self.info.exit_code = exit_code;
            self.info.finished_at = Some(Utc::now());
        }
        true
    }
}

/// Result of one liveness pass over all tracked sessions.
#[derive(Debug, Default)]
pub struct PollReport {
    /// Sessions confirmed alive for the first time.
    pub started: Vec<String>,
    /// Sessions that reached a terminal state during this pass.
    pub finished: Vec<SessionInfo>,
    /// Sessions whose liveness could not be determined; retried next pass.
    pub unobservable: usize,
}

/// Maps coordinator-generated instance ids to launched backends.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, TrackedSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, info: SessionInfo, handle: Box<dyn ProcessHandle>) {
        let mut sessions = self.sessions.write().await;
        sessions.insert(
            info.instance_id.clone(),
            TrackedSession {
                info,
                handle: Arc::new(Mutex::new(handle)),
            },
        );
    }

    pub async fn get(&self, instance_id: &str) -> Option<SessionInfo> {
        let sessions = self.sessions.read().await;
        sessions.get(instance_id).map(|s| s.info.clone())
    }

    /// All tracked sessions, oldest first.
    pub async fn list(&self) -> Vec<SessionInfo> {
        let sessions = self.sessions.read().await;
        let mut infos: Vec<SessionInfo> = sessions.values().map(|s| s.info.clone()).collect();
        infos.sort_by(|a, b| {
            a.launched_at
                .cmp(&b.launched_at)
                .then_with(|| a.port.cmp(&b.port))
        });
        infos
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Handle of a session that is not yet terminal.
    pub async fn live_handle(&self, instance_id: &str) -> Result<Option<SharedHandle>> {
        let sessions = self.sessions.read().await;
        let session = sessions
            .get(instance_id)
            .ok_or_else(|| CoordinatorError::SessionNotFound {
                instance_id: instance_id.to_string(),
            })?;
        if session.info.status.is_terminal() {
            return Ok(None);
        }
        Ok(Some(Arc::clone(&session.handle)))
    }

    /// Instance ids of every session that is not yet terminal.
    pub async fn live_ids(&self) -> Vec<String> {
        let sessions = self.sessions.read().await;
        sessions
            .values()
            .filter(|s| !s.info.status.is_terminal())
            .map(|s| s.info.instance_id.clone())
            .collect()
    }

    /// Move a session to a terminal state.
    ///
    /// Returns the updated info only for the caller that performed the
    /// transition, so exactly one party releases the session's port.
    pub async fn finish(
        &self,
        instance_id: &str,
        outcome: ExitOutcome,
        status: SessionStatus,
    ) -> Option<SessionInfo> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(instance_id)?;
        if session.transition(status, outcome.code) {
            Some(session.info.clone())
        } else {
            None
        }
    }

    /// Check every live handle once.
    ///
    /// Handles are polled without holding the registry lock, so a slow
    /// liveness check never stalls inserts or lookups.
    pub async fn poll(&self) -> PollReport {
        let live: Vec<(String, SharedHandle)> = {
            let sessions = self.sessions.read().await;
            sessions
                .values()
                .filter(|s| !s.info.status.is_terminal())
                .map(|s| (s.info.instance_id.clone(), Arc::clone(&s.handle)))
                .collect()
        };

        let mut observations = Vec::with_capacity(live.len());
        for (id, shared) in live {
            // A handle being torn down right now is left to the teardown.
            let Ok(mut handle) = shared.try_lock() else {
                continue;
            };
            let observed = handle.poll_exit().await;
            observations.push((id, observed));
        }

        let mut report = PollReport::default();
        let mut sessions = self.sessions.write().await;
        for (id, observed) in observations {
            match observed {
                Ok(None) => {
                    if let Some(session) = sessions.get_mut(&id) {
                        if session.transition(SessionStatus::Running, None) {
                            report.started.push(id);
                        }
                    }
                }
                Ok(Some(outcome)) => {
                    // a teardown that finished meanwhile already owns the release
                    if let Some(session) = sessions.get_mut(&id) {
                        if session.transition(outcome.status(), outcome.code) {
                            report.finished.push(session.info.clone());
                        }
                    }
                }
                Err(e) => {
                    warn!(instance_id = %id, error = %e, "Liveness check failed, will retry");
                    report.unobservable += 1;
                }
            }
        }

        report
    }

    /// Drop terminal sessions that finished at least `retention` before `now`.
    pub async fn evict_expired(&self, retention: Duration, now: DateTime<Utc>) -> Vec<String> {
        let retention = chrono::Duration::from_std(retention)
            .unwrap_or_else(|_| chrono::Duration::days(365 * 100));
        let mut sessions = self.sessions.write().await;

        let expired: Vec<String> = sessions
            .values()
            .filter(|s| match s.info.finished_at {
                Some(finished_at) if s.info.status.is_terminal() => {
                    now.signed_duration_since(finished_at) >= retention
                }
                _ => false,
            })
            .map(|s| s.info.instance_id.clone())
            .collect();

        for id in &expired {
            sessions.remove(id);
            debug!(instance_id = %id, "Evicted finished session");
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::Notify;

    struct ScriptedHandle {
        exit: Arc<Mutex<Option<Result<Option<ExitOutcome>>>>>,
    }

    #[async_trait]
    impl ProcessHandle for ScriptedHandle {
        fn id(&self) -> String {
            "scripted".to_string()
        }

        async fn poll_exit(&mut self) -> Result<Option<ExitOutcome>> {
            self.exit.lock().await.take().unwrap_or(Ok(None))
        }

        async fn terminate(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn info(id: &str, port: u16) -> SessionInfo {
        SessionInfo {
            instance_id: id.to_string(),
            session_name: "name".to_string(),
            session_search_id: "search".to_string(),
            port,
            handle: "scripted".to_string(),
            status: SessionStatus::Launching,
            launched_at: Utc::now(),
            finished_at: None,
            exit_code: None,
        }
    }

    async fn registry_with(
        id: &str,
        port: u16,
    ) -> (SessionRegistry, Arc<Mutex<Option<Result<Option<ExitOutcome>>>>>) {
        let registry = SessionRegistry::new();
        let exit = Arc::new(Mutex::new(None));
        registry
            .insert(
                info(id, port),
                Box::new(ScriptedHandle {
                    exit: Arc::clone(&exit),
                }),
            )
            .await;
        (registry, exit)
    }

    #[tokio::test]
    async fn test_launching_becomes_running_then_failed() {
        let (registry, exit) = registry_with("a", 7777).await;

        let report = registry.poll().await;
        assert_eq!(report.started, vec!["a".to_string()]);
        assert_eq!(registry.get("a").await.unwrap().status, SessionStatus::Running);

        *exit.lock().await = Some(Ok(Some(ExitOutcome { code: Some(2) })));
        let report = registry.poll().await;
        assert_eq!(report.finished.len(), 1);
        let finished = registry.get("a").await.unwrap();
        assert_eq!(finished.status, SessionStatus::Failed);
        assert_eq!(finished.exit_code, Some(2));
        assert!(finished.finished_at.is_some());

        // terminal sessions are not polled again
        let report = registry.poll().await;
        assert!(report.finished.is_empty());
    }

    #[tokio::test]
    async fn test_unobservable_handle_is_left_alone() {
        let (registry, exit) = registry_with("a", 7777).await;
        *exit.lock().await = Some(Err(CoordinatorError::ReaperObservationError {
            instance_id: "a".to_string(),
            message: "permission denied".to_string(),
        }));

        let report = registry.poll().await;
        assert_eq!(report.unobservable, 1);
        assert_eq!(registry.get("a").await.unwrap().status, SessionStatus::Launching);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_finish_happens_once() {
        let (registry, _exit) = registry_with("a", 7777).await;
        let outcome = ExitOutcome { code: None };

        assert!(registry
            .finish("a", outcome, SessionStatus::Exited)
            .await
            .is_some());
        assert!(registry
            .finish("a", outcome, SessionStatus::Failed)
            .await
            .is_none());
        assert!(registry.live_handle("a").await.unwrap().is_none());
        assert!(registry.live_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_evict_after_retention() {
        let (registry, exit) = registry_with("a", 7777).await;
        *exit.lock().await = Some(Ok(Some(ExitOutcome { code: Some(0) })));
        registry.poll().await;

        let now = Utc::now();
        assert!(registry
            .evict_expired(Duration::from_secs(60), now)
            .await
            .is_empty());
        let evicted = registry
            .evict_expired(Duration::from_secs(60), now + chrono::Duration::seconds(61))
            .await;
        assert_eq!(evicted, vec!["a".to_string()]);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_busy_handle_is_skipped() {
        let (registry, _exit) = registry_with("a", 7777).await;
        let handle = registry.live_handle("a").await.unwrap().unwrap();
        let _guard = handle.lock().await;

        let report = registry.poll().await;
        assert!(report.started.is_empty());
        assert_eq!(registry.get("a").await.unwrap().status, SessionStatus::Launching);

        let missing = registry.live_handle("missing").await;
        assert!(matches!(missing, Err(CoordinatorError::SessionNotFound { .. })));
    }

    struct SlowHandle {
        entered: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl ProcessHandle for SlowHandle {
        fn id(&self) -> String {
            "slow".to_string()
        }

        async fn poll_exit(&mut self) -> Result<Option<ExitOutcome>> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(Some(ExitOutcome { code: Some(0) }))
        }

        async fn terminate(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_slow_liveness_check_does_not_block_registry() {
        let registry = Arc::new(SessionRegistry::new());
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        registry
            .insert(
                info("slow", 7777),
                Box::new(SlowHandle {
                    entered: Arc::clone(&entered),
                    release: Arc::clone(&release),
                }),
            )
            .await;

        let polling = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.poll().await })
        };
        entered.notified().await;

        let lookup = tokio::time::timeout(Duration::from_secs(1), registry.get("slow")).await;
        assert_eq!(lookup.unwrap().unwrap().status, SessionStatus::Launching);

        tokio::time::timeout(
            Duration::from_secs(1),
            registry.insert(
                info("b", 7779),
                Box::new(ScriptedHandle {
                    exit: Arc::new(Mutex::new(None)),
                }),
            ),
        )
        .await
        .unwrap();

        release.notify_one();
        let report = polling.await.unwrap();
        assert_eq!(report.finished.len(), 1);
        assert_eq!(registry.get("slow").await.unwrap().status, SessionStatus::Exited);
    }

    #[tokio::test]
    async fn test_teardown_during_poll_keeps_single_owner() {
        let registry = Arc::new(SessionRegistry::new());
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        registry
            .insert(
                info("slow", 7777),
                Box::new(SlowHandle {
                    entered: Arc::clone(&entered),
                    release: Arc::clone(&release),
                }),
            )
            .await;

        let polling = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.poll().await })
        };
        entered.notified().await;

        assert!(registry
            .finish("slow", ExitOutcome { code: None }, SessionStatus::Exited)
            .await
            .is_some());
        release.notify_one();

        let report = polling.await.unwrap();
        assert!(report.finished.is_empty());
    }
}
