#![cfg(unix)]

use session_coordinator::adapters::launcher::CommandLauncher;
use session_coordinator::adapters::port_source::CounterPortSource;
use session_coordinator::core::ledger::PortLedger;
use session_coordinator::domain::model::{LaunchMode, PortRange, SessionInfo, SessionStatus};
use session_coordinator::{Coordinator, CoordinatorError};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn local_coordinator(binary: &str, project: Option<String>, start: u16, end: u16) -> Coordinator {
    let launcher = CommandLauncher::new(
        LaunchMode::Local {
            binary: binary.to_string(),
            project,
        },
        vec!["-server".to_string(), "-log".to_string()],
    );
    let ledger = PortLedger::new(
        PortRange::new(start, end),
        Arc::new(CounterPortSource::new(start)),
    );
    Coordinator::new(ledger, Arc::new(launcher), Duration::from_secs(60))
}

/// Reap until the session reaches a terminal state or the deadline passes.
async fn wait_for_exit(coordinator: &Coordinator, instance_id: &str) -> SessionInfo {
    for _ in 0..250 {
        coordinator.reap_once().await;
        let info = coordinator.session(instance_id).await.unwrap();
        if info.status.is_terminal() {
            return info;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("session {} never exited", instance_id);
}

fn script(dir: &TempDir, name: &str, body: &str) -> String {
    let path = dir.path().join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    path.to_string_lossy().into_owned()
}

#[tokio::test]
async fn test_clean_exit_is_exited_and_port_released() {
    let coordinator = local_coordinator("true", None, 9100, 9101);
    let info = coordinator.launch_session("lobby", "abc").await.unwrap();
    assert_eq!(info.port, 9100);
    assert!(info.handle.parse::<u32>().is_ok(), "handle should be a pid");

    let info = wait_for_exit(&coordinator, &info.instance_id).await;
    assert_eq!(info.status, SessionStatus::Exited);
    assert_eq!(info.exit_code, Some(0));
    assert!(!coordinator.ledger().is_allocated(9100).await);
}

#[tokio::test]
async fn test_error_exit_is_failed() {
    let dir = TempDir::new().unwrap();
    // run through sh so the script never needs the exec bit
    let project = script(&dir, "crash.sh", "exit 3");
    let coordinator = local_coordinator("sh", Some(project), 9110, 9111);

    let info = coordinator.launch_session("lobby", "abc").await.unwrap();
    let info = wait_for_exit(&coordinator, &info.instance_id).await;
    assert_eq!(info.status, SessionStatus::Failed);
    assert_eq!(info.exit_code, Some(3));
    assert!(!coordinator.ledger().is_allocated(9110).await);
}

#[tokio::test]
async fn test_server_receives_session_flags() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("args.txt");
    let project = script(
        &dir,
        "record.sh",
        &format!("printf '%s\\n' \"$@\" > '{}'", out.display()),
    );
    let coordinator = local_coordinator("sh", Some(project), 9120, 9121);

    let info = coordinator.launch_session("Friday", "search-1").await.unwrap();
    let info = wait_for_exit(&coordinator, &info.instance_id).await;
    assert_eq!(info.status, SessionStatus::Exited);

    let args: Vec<String> = std::fs::read_to_string(&out)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect();
    assert_eq!(
        args,
        vec![
            "-server",
            "-log",
            "-SESSION_NAME=\"Friday\"",
            "-SESSION_SEARCH_ID=\"search-1\"",
            "-PORT=9120",
        ]
    );
}

#[tokio::test]
async fn test_terminate_running_server() {
    let dir = TempDir::new().unwrap();
    let project = script(&dir, "serve.sh", "exec sleep 30");
    let coordinator = local_coordinator("sh", Some(project), 9130, 9131);

    let info = coordinator.launch_session("lobby", "abc").await.unwrap();
    coordinator.reap_once().await;

    let ended = tokio::time::timeout(
        Duration::from_secs(5),
        coordinator.terminate_session(&info.instance_id),
    )
    .await
    .expect("teardown timed out")
    .unwrap();
    assert_eq!(ended.status, SessionStatus::Exited);
    assert!(!coordinator.ledger().is_allocated(9130).await);
}

#[tokio::test]
async fn test_unreachable_container_engine_fails_launch_and_frees_port() {
    let launcher = CommandLauncher::new(
        LaunchMode::Container {
            engine: "false".to_string(),
            image: "server".to_string(),
        },
        vec![],
    );
    let ledger = PortLedger::new(
        PortRange::new(9150, 9150),
        Arc::new(CounterPortSource::new(9150)),
    );
    let coordinator = Coordinator::new(ledger, Arc::new(launcher), Duration::from_secs(60));

    let err = coordinator.create_session("lobby", "abc").await.unwrap_err();
    assert!(matches!(err, CoordinatorError::LaunchError { .. }));
    assert!(!coordinator.ledger().is_allocated(9150).await);
    assert!(coordinator.list_sessions().await.is_empty());
}

#[tokio::test]
async fn test_missing_binary_leaves_no_allocation() {
    let coordinator = local_coordinator("/nonexistent/game-server", None, 9140, 9140);
    assert!(coordinator.create_session("lobby", "abc").await.is_err());
    assert_eq!(coordinator.ledger().allocated_count().await, 0);
    assert!(coordinator.list_sessions().await.is_empty());
}
