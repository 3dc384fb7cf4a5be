#![allow(dead_code)]

use async_trait::async_trait;
use session_coordinator::core::ledger::PortLedger;
use session_coordinator::domain::model::{ExitOutcome, LaunchRequest, PortRange, PortStrategy};
use session_coordinator::domain::ports::{PortSource, ProcessHandle, ProcessLauncher};
use session_coordinator::{Coordinator, CoordinatorError, Result};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Probe source whose host-bound ports are set by the test.
#[derive(Default)]
pub struct FakeProbe {
    bound: Mutex<BTreeSet<u16>>,
    fail: AtomicBool,
}

impl FakeProbe {
    pub fn bind(&self, port: u16) {
        self.bound.lock().unwrap().insert(port);
    }

    pub fn unbind(&self, port: u16) {
        self.bound.lock().unwrap().remove(&port);
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl PortSource for FakeProbe {
    fn strategy(&self) -> PortStrategy {
        PortStrategy::Probe
    }

    async fn observe_used_ports(&self) -> Result<BTreeSet<u16>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CoordinatorError::ProbeError {
                message: "engine unreachable".to_string(),
            });
        }
        Ok(self.bound.lock().unwrap().clone())
    }
}

type Exits = Arc<Mutex<HashMap<String, ExitOutcome>>>;

/// Launcher that records requests; the test decides when each backend exits.
#[derive(Default)]
pub struct FakeLauncher {
    fail: AtomicBool,
    launched: Mutex<Vec<LaunchRequest>>,
    exits: Exits,
    terminated: Arc<Mutex<Vec<String>>>,
}

impl FakeLauncher {
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn launched(&self) -> Vec<LaunchRequest> {
        self.launched.lock().unwrap().clone()
    }

    pub fn terminated(&self) -> Vec<String> {
        self.terminated.lock().unwrap().clone()
    }

    /// Make the backend of `instance_id` report an exit on the next poll.
    pub fn exit(&self, instance_id: &str, code: Option<i32>) {
        self.exits
            .lock()
            .unwrap()
            .insert(instance_id.to_string(), ExitOutcome { code });
    }
}

#[async_trait]
impl ProcessLauncher for FakeLauncher {
    async fn launch(&self, request: &LaunchRequest) -> Result<Box<dyn ProcessHandle>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CoordinatorError::LaunchError {
                program: "fake-server".to_string(),
                message: "image not found".to_string(),
            });
        }
        self.launched.lock().unwrap().push(request.clone());
        Ok(Box::new(FakeHandle {
            instance_id: request.instance_id.clone(),
            exits: Arc::clone(&self.exits),
            terminated: Arc::clone(&self.terminated),
        }))
    }
}

struct FakeHandle {
    instance_id: String,
    exits: Exits,
    terminated: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl ProcessHandle for FakeHandle {
    fn id(&self) -> String {
        format!("fake-{}", self.instance_id)
    }

    async fn poll_exit(&mut self) -> Result<Option<ExitOutcome>> {
        Ok(self.exits.lock().unwrap().get(&self.instance_id).copied())
    }

    async fn terminate(&mut self) -> Result<()> {
        self.terminated.lock().unwrap().push(self.instance_id.clone());
        self.exits
            .lock()
            .unwrap()
            .insert(self.instance_id.clone(), ExitOutcome { code: None });
        Ok(())
    }
}

pub struct Harness {
    pub coordinator: Arc<Coordinator>,
    pub launcher: Arc<FakeLauncher>,
}

pub fn coordinator_with(source: Arc<dyn PortSource>, start: u16, end: u16, retention: Duration) -> Harness {
    let launcher = Arc::new(FakeLauncher::default());
    let ledger = PortLedger::new(PortRange::new(start, end), source);
    let coordinator = Coordinator::new(ledger, launcher.clone(), retention);
    Harness {
        coordinator: Arc::new(coordinator),
        launcher,
    }
}

pub fn probe_coordinator(start: u16, end: u16) -> (Harness, Arc<FakeProbe>) {
    let probe = Arc::new(FakeProbe::default());
    let harness = coordinator_with(probe.clone(), start, end, Duration::from_secs(60));
    (harness, probe)
}
