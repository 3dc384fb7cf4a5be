use crate::domain::model::PortStrategy;
use crate::domain::ports::PortSource;
use crate::utils::error::{CoordinatorError, Result};
use async_trait::async_trait;
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;
use tokio::process::Command;

/// Monotonic cursor. Knows nothing about the host.
#[derive(Debug)]
pub struct CounterPortSource {
    cursor: AtomicU32,
}

impl CounterPortSource {
    pub fn new(base: u16) -> Self {
        Self {
            cursor: AtomicU32::new(base as u32),
        }
    }
}

#[async_trait]
impl PortSource for CounterPortSource {
    fn strategy(&self) -> PortStrategy {
        PortStrategy::Counter
    }

    async fn observe_used_ports(&self) -> Result<BTreeSet<u16>> {
        Ok(BTreeSet::new())
    }

    fn next_candidate(&self) -> Option<u16> {
        let value = self
            .cursor
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                (v <= u16::MAX as u32).then_some(v + 1)
            })
            .ok()?;
        u16::try_from(value).ok()
    }
}

/// Asks the container engine which host ports its containers publish.
#[derive(Debug, Clone)]
pub struct ContainerPortProbe {
    engine: String,
}

impl ContainerPortProbe {
    pub fn new(engine: impl Into<String>) -> Self {
        Self {
            engine: engine.into(),
        }
    }
}

#[async_trait]
impl PortSource for ContainerPortProbe {
    fn strategy(&self) -> PortStrategy {
        PortStrategy::Probe
    }

    async fn observe_used_ports(&self) -> Result<BTreeSet<u16>> {
        let output = Command::new(&self.engine)
            .args(["ps", "--format", "{{.Ports}}"])
            .output()
            .await
            .map_err(|e| CoordinatorError::ProbeError {
                message: format!("failed to run `{} ps`: {}", self.engine, e),
            })?;

        if !output.status.success() {
            return Err(CoordinatorError::ProbeError {
                message: format!(
                    "`{} ps` exited with {}: {}",
                    self.engine,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        let ports = parse_published_ports(&String::from_utf8_lossy(&output.stdout));
        tracing::debug!(engine = %self.engine, bound = ports.len(), "Observed host ports");
        Ok(ports)
    }
}

fn mapping_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // host_ip:port[-port]->container_port/proto
    RE.get_or_init(|| {
        Regex::new(r"(?:\d{1,3}(?:\.\d{1,3}){3}|\[[0-9a-fA-F:]*\]|::):(\d+)(?:-(\d+))?->")
            .expect("static regex is valid")
    })
}

/// Extract host ports from `ps --format {{.Ports}}` output. Unparsable entries are skipped.
pub fn parse_published_ports(output: &str) -> BTreeSet<u16> {
    let mut ports = BTreeSet::new();

    for line in output.lines() {
        for caps in mapping_regex().captures_iter(line) {
            let Some(first) = caps.get(1).and_then(|m| m.as_str().parse::<u16>().ok()) else {
                continue;
            };
            let last = match caps.get(2) {
                Some(m) => match m.as_str().parse::<u16>() {
                    Ok(last) if last >= first => last,
                    _ => continue,
                },
                None => first,
            };
            ports.extend(first..=last);
        }
    }

    ports
}
