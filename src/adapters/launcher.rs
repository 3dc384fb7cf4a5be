use crate::domain::model::{
    ExitOutcome, LaunchMode, LaunchRequest, PORT_KEY, SESSION_NAME_KEY, SESSION_SEARCH_ID_KEY,
};
use crate::domain::ports::{ProcessHandle, ProcessLauncher};
use crate::utils::error::{CoordinatorError, Result};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Flags every backend receives before the session flags.
pub fn default_server_args() -> Vec<String> {
    vec![
        "-server".to_string(),
        "-log".to_string(),
        "-epicapp=\"ServerClient\"".to_string(),
    ]
}

/// Session flags in the vocabulary the backend parses from its command line.
pub fn session_args(request: &LaunchRequest) -> Vec<String> {
    vec![
        format!("-{}=\"{}\"", SESSION_NAME_KEY, request.session_name),
        format!("-{}=\"{}\"", SESSION_SEARCH_ID_KEY, request.session_search_id),
        format!("-{}={}", PORT_KEY, request.port),
    ]
}

pub fn container_name(request: &LaunchRequest) -> String {
    format!("coord-{}", request.instance_id)
}

/// Inspect template that prints `<status> <exit code>` for a container.
const INSPECT_FORMAT: &str = "{{.State.Status}} {{.State.ExitCode}}";

/// Starts backends either as a child process running the server binary or as
/// a detached container created through the engine CLI.
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    mode: LaunchMode,
    server_args: Vec<String>,
}

impl CommandLauncher {
    pub fn new(mode: LaunchMode, server_args: Vec<String>) -> Self {
        Self { mode, server_args }
    }

    pub fn mode(&self) -> &LaunchMode {
        &self.mode
    }

    pub fn program(&self) -> &str {
        match &self.mode {
            LaunchMode::Local { binary, .. } => binary,
            LaunchMode::Container { engine, .. } => engine,
        }
    }

    pub fn build_args(&self, request: &LaunchRequest) -> Vec<String> {
        let mut args = Vec::new();

        match &self.mode {
            LaunchMode::Local { project, .. } => {
                if let Some(project) = project {
                    args.push(project.clone());
                }
            }
            LaunchMode::Container { image, .. } => {
                args.extend([
                    "run".to_string(),
                    "-d".to_string(),
                    "--name".to_string(),
                    container_name(request),
                    "-p".to_string(),
                    format!("{0}:{0}/tcp", request.port),
                    "-p".to_string(),
                    format!("{0}:{0}/udp", request.port),
                    image.clone(),
                ]);
            }
        }

        args.extend(self.server_args.iter().cloned());
        args.extend(session_args(request));
        args
    }

    fn spawn_local(&self, program: &str, args: &[String]) -> Result<ChildHandle> {
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| CoordinatorError::LaunchError {
                program: program.to_string(),
                message: e.to_string(),
            })?;
        Ok(ChildHandle::new(child))
    }

    /// Create the container and wait for the engine to confirm it, so an
    /// unreachable engine or a bad image fails the launch itself.
    async fn create_container(
        &self,
        engine: &str,
        args: &[String],
        request: &LaunchRequest,
    ) -> Result<ContainerHandle> {
        let output = Command::new(engine)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| CoordinatorError::LaunchError {
                program: engine.to_string(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(CoordinatorError::LaunchError {
                program: engine.to_string(),
                message: if stderr.is_empty() {
                    format!("container creation exited with {}", output.status)
                } else {
                    stderr
                },
            });
        }

        let container_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(ContainerHandle::new(
            engine.to_string(),
            container_name(request),
            &container_id,
        ))
    }
}

#[async_trait]
impl ProcessLauncher for CommandLauncher {
    async fn launch(&self, request: &LaunchRequest) -> Result<Box<dyn ProcessHandle>> {
        let program = self.program().to_string();
        let args = self.build_args(request);
        debug!(program = %program, args = ?args, "Spawning backend");

        let handle: Box<dyn ProcessHandle> = match &self.mode {
            LaunchMode::Local { .. } => Box::new(self.spawn_local(&program, &args)?),
            LaunchMode::Container { .. } => {
                Box::new(self.create_container(&program, &args, request).await?)
            }
        };

        info!(
            instance_id = %request.instance_id,
            port = request.port,
            handle = %handle.id(),
            mode = self.mode.name(),
            "Backend started"
        );
        Ok(handle)
    }
}

/// Handle to a server binary running as our child process.
pub struct ChildHandle {
    child: Child,
    id: String,
}

impl ChildHandle {
    fn new(child: Child) -> Self {
        let id = child
            .id()
            .map(|pid| pid.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        Self { child, id }
    }
}

#[async_trait]
impl ProcessHandle for ChildHandle {
    fn id(&self) -> String {
        self.id.clone()
    }

    async fn poll_exit(&mut self) -> Result<Option<ExitOutcome>> {
        match self.child.try_wait() {
            Ok(Some(status)) => Ok(Some(ExitOutcome {
                code: status.code(),
            })),
            Ok(None) => Ok(None),
            Err(e) => Err(CoordinatorError::ReaperObservationError {
                instance_id: self.id.clone(),
                message: e.to_string(),
            }),
        }
    }

    async fn terminate(&mut self) -> Result<()> {
        if self.child.try_wait()?.is_none() {
            // Already-exited children make start_kill fail; the wait below still reaps them.
            if let Err(e) = self.child.start_kill() {
                debug!(handle = %self.id, error = %e, "Kill skipped");
            }
        }
        self.child.wait().await?;
        Ok(())
    }
}

/// Handle to a detached container, observed through `<engine> inspect`.
///
/// The container is removed once its exit has been observed or it was torn down.
pub struct ContainerHandle {
    engine: String,
    name: String,
    id: String,
}

impl ContainerHandle {
    fn new(engine: String, name: String, container_id: &str) -> Self {
        let id = match container_id.lines().last().map(str::trim) {
            Some(id) if !id.is_empty() => id.chars().take(12).collect(),
            _ => name.clone(),
        };
        Self { engine, name, id }
    }

    async fn remove(&self) {
        match Command::new(&self.engine)
            .args(["rm", "-f", &self.name])
            .output()
            .await
        {
            Ok(output) if output.status.success() => {
                debug!(container = %self.name, "Container removed");
            }
            Ok(output) => debug!(
                container = %self.name,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "Container removal reported failure"
            ),
            Err(e) => warn!(container = %self.name, error = %e, "Failed to run container removal"),
        }
    }
}

#[async_trait]
impl ProcessHandle for ContainerHandle {
    fn id(&self) -> String {
        self.id.clone()
    }

    async fn poll_exit(&mut self) -> Result<Option<ExitOutcome>> {
        let observation_error = |message: String| CoordinatorError::ReaperObservationError {
            instance_id: self.id.clone(),
            message,
        };

        let output = Command::new(&self.engine)
            .args(["inspect", "-f", INSPECT_FORMAT, &self.name])
            .output()
            .await
            .map_err(|e| observation_error(e.to_string()))?;
        if !output.status.success() {
            return Err(observation_error(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        let state = String::from_utf8_lossy(&output.stdout);
        let outcome = parse_inspect_state(&state).ok_or_else(|| {
            observation_error(format!("unrecognized container state: {}", state.trim()))
        })?;

        if outcome.is_some() {
            self.remove().await;
        }
        Ok(outcome)
    }

    async fn terminate(&mut self) -> Result<()> {
        match Command::new(&self.engine)
            .args(["stop", &self.name])
            .output()
            .await
        {
            Ok(output) if output.status.success() => {
                debug!(container = %self.name, "Container stopped");
            }
            Ok(output) => warn!(
                container = %self.name,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "Container stop reported failure"
            ),
            Err(e) => warn!(container = %self.name, error = %e, "Failed to run container stop"),
        }
        self.remove().await;
        Ok(())
    }
}

/// Parse `<status> <exit code>` from inspect. `Some(None)` means still alive,
/// `None` means the output is not a container state.
pub fn parse_inspect_state(output: &str) -> Option<Option<ExitOutcome>> {
    let mut parts = output.split_whitespace();
    let status = parts.next()?;
    let code = parts.next().and_then(|code| code.parse::<i32>().ok());

    match status {
        "created" | "running" | "restarting" | "paused" | "removing" => Some(None),
        "exited" | "dead" | "stopped" => Some(Some(ExitOutcome { code })),
        _ => None,
    }
}
