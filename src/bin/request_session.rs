use clap::Parser;
use session_coordinator::utils::logger;
use session_coordinator::CoordinatorClient;
use std::time::Duration;

/// Ask a running coordinator for a dedicated server and print its port.
#[derive(Debug, Parser)]
#[command(name = "request-session")]
struct Args {
    /// Base URL of the coordinator
    #[arg(long, default_value = "http://127.0.0.1:80")]
    url: String,

    /// Session name passed to the server
    #[arg(long)]
    name: String,

    /// Search id passed to the server (random when omitted)
    #[arg(long)]
    search_id: Option<String>,

    /// Request timeout in seconds
    #[arg(long, default_value = "30")]
    timeout_secs: u64,

    #[arg(short, long, help = "Enable verbose output")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // 初始化日誌
    logger::init_cli_logger(args.verbose);

    let search_id = args
        .search_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let client = CoordinatorClient::new(&args.url)?.with_timeout(Duration::from_secs(args.timeout_secs));

    match client.create_session(&args.name, &search_id).await {
        Ok(port) => {
            tracing::info!("✅ Session '{}' is starting on port {}", args.name, port);
            println!("{}", port);
            Ok(())
        }
        Err(e) => {
            tracing::error!("❌ Session request failed: {}", e);
            eprintln!("❌ {}", e.user_friendly_message());
            eprintln!("💡 建議: {}", e.recovery_suggestion());
            std::process::exit(if e.is_retryable() { 2 } else { 1 });
        }
    }
}
