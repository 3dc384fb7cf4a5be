use clap::Parser;
use session_coordinator::adapters::http;
use session_coordinator::utils::error::{CoordinatorError, ErrorSeverity};
use session_coordinator::utils::logger;
use session_coordinator::{CliConfig, Coordinator};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliConfig::parse();

    // 解析並驗證配置
    let config = match cli.resolve() {
        Ok(config) => config,
        Err(e) => {
            logger::init_cli_logger(cli.verbose);
            tracing::error!("❌ Configuration validation failed: {}", e);
            tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
            eprintln!("❌ {}", e.user_friendly_message());
            std::process::exit(exit_code(&e));
        }
    };

    if cli.check_config {
        println!("{}", config.to_toml_string()?);
        return Ok(());
    }

    // 初始化日誌
    logger::init_logger(config.logging.verbose, config.logging.json);
    tracing::info!("Starting session-coordinator");
    if config.logging.verbose {
        tracing::debug!("Resolved config: {:?}", config);
    }
    if config.logging.monitor {
        tracing::info!("🔍 System monitoring enabled");
    }

    if let Err(e) = run(config).await {
        tracing::error!(
            "❌ Coordinator stopped with error: {} (Category: {:?}, Severity: {:?})",
            e,
            e.category(),
            e.severity()
        );
        tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());
        eprintln!("❌ {}", e.user_friendly_message());
        std::process::exit(exit_code(&e));
    }

    Ok(())
}

async fn run(config: session_coordinator::CoordinatorConfig) -> session_coordinator::Result<()> {
    let bind = config.bind_addr()?;
    let coordinator = Arc::new(Coordinator::from_config(&config)?);

    // 啟動 reaper
    let reaper = coordinator.spawn_reaper(config.reap_interval());

    let listener = tokio::net::TcpListener::bind(bind).await?;
    http::serve(listener, Arc::clone(&coordinator), shutdown_signal()).await?;

    // 停止 reaper 後再收掉所有 session
    reaper.stop().await;
    coordinator.shutdown().await;

    tracing::info!("✅ Coordinator stopped, all ports released");
    Ok(())
}

fn exit_code(e: &CoordinatorError) -> i32 {
    // 根據錯誤嚴重程度決定退出碼
    match e.severity() {
        ErrorSeverity::Low | ErrorSeverity::High => 1,
        ErrorSeverity::Medium => 2,
        ErrorSeverity::Critical => 3,
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => {},
                    _ = tokio::signal::ctrl_c() => {},
                }
            }
            Err(e) => {
                tracing::warn!("Cannot install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    tracing::info!("Shutdown signal received");
}
