//! Fan-out gateway with a synthetic log source
//!
//! Run with: cargo run --example fanout_server [BIND_ADDR] [APP_ID]
//!
//! Examples:
//!   cargo run --example fanout_server                        # binds to 0.0.0.0:8081
//!   cargo run --example fanout_server localhost              # binds to 127.0.0.1:8081
//!   cargo run --example fanout_server 127.0.0.1:9000 my-app  # custom port and app id
//!
//! ## Consuming
//!
//! With websocat:
//!   websocat ws://localhost:8081/apps/demo-app/stream
//!   websocat ws://localhost:8081/apps/demo-app/recentlogs
//!   websocat ws://localhost:8081/firehose
//!   websocat ws://localhost:8081/firehose/audit
//!
//! Two clients on the same firehose path split the stream between them.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log_fanout::{Gateway, GatewayConfig, Message, SinkRegistry};

const DEFAULT_PORT: u16 = 8081;

/// Parse bind address from command line argument
///
/// Accepts formats:
/// - "localhost" -> 127.0.0.1:8081
/// - "localhost:9000" -> 127.0.0.1:9000
/// - "127.0.0.1" -> 127.0.0.1:8081
/// - "0.0.0.0:8081" -> 0.0.0.0:8081
fn parse_bind_addr(arg: &str) -> Result<SocketAddr, String> {
    let normalized = arg.replace("localhost", "127.0.0.1");

    if let Ok(addr) = normalized.parse::<SocketAddr>() {
        return Ok(addr);
    }

    if let Ok(ip) = normalized.parse::<std::net::IpAddr>() {
        return Ok(SocketAddr::new(ip, DEFAULT_PORT));
    }

    Err(format!(
        "Invalid bind address: '{}'. Expected format: IP:PORT or IP or 'localhost'",
        arg
    ))
}

fn print_usage() {
    eprintln!("Usage: fanout_server [BIND_ADDR] [APP_ID]");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  BIND_ADDR    Address to bind to (default: 0.0.0.0:8081)");
    eprintln!("  APP_ID       Application the synthetic source logs for (default: demo-app)");
}

/// Emit one numbered log line per interval
async fn synthetic_source(registry: Arc<SinkRegistry>, app_id: String) {
    let mut ticker = tokio::time::interval(Duration::from_millis(500));
    let mut seq: u64 = 0;

    loop {
        ticker.tick().await;
        seq += 1;

        let line = format!("[{}] log line {}", app_id, seq);
        let report = registry.dispatch(&app_id, Message::from(line.into_bytes())).await;

        if seq % 20 == 0 {
            tracing::info!(
                seq = seq,
                app_sinks = report.app_deliveries,
                firehose_groups = report.firehose_deliveries,
                "Synthetic source progress"
            );
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    let config = match args.get(1) {
        Some(addr_str) => match parse_bind_addr(addr_str) {
            Ok(addr) => GatewayConfig::with_addr(addr),
            Err(e) => {
                eprintln!("Error: {}", e);
                eprintln!();
                print_usage();
                std::process::exit(1);
            }
        },
        None => GatewayConfig::default(),
    };
    let app_id = args.get(2).cloned().unwrap_or_else(|| "demo-app".to_string());

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("log_fanout=debug".parse()?)
                .add_directive("fanout_server=debug".parse()?),
        )
        .init();

    let registry = Arc::new(SinkRegistry::new());
    let gateway = Gateway::bind(config, Arc::clone(&registry)).await?;
    let handle = gateway.handle();

    println!("Fan-out gateway on {}", gateway.local_addr());
    println!("Stream:   ws://{}/apps/{}/stream", gateway.local_addr(), app_id);
    println!("Replay:   ws://{}/apps/{}/recentlogs", gateway.local_addr(), app_id);
    println!("Firehose: ws://{}/firehose", gateway.local_addr());
    println!();

    let source = tokio::spawn(synthetic_source(Arc::clone(&registry), app_id));
    let server = tokio::spawn(gateway.run());

    tokio::signal::ctrl_c().await?;
    println!("\nShutting down...");

    handle.shutdown();
    source.abort();
    registry.shutdown().await;

    if let Err(e) = server.await? {
        eprintln!("Server error: {}", e);
    }

    Ok(())
}
