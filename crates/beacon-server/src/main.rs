//! Beacon server CLI
//!
//! Starts the Beacon HTTP server with its background workers.

use beacon_server::{config::ServerConfig, start_server, ServerError};
use std::env;
use std::process;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

async fn run() -> Result<(), ServerError> {
    // Parse command-line arguments
    let args: Vec<String> = env::args().collect();

    let config = if args.len() > 2 && args[1] == "--config" {
        ServerConfig::from_file(&args[2])?
    } else if args.len() > 1 && args[1] == "--help" {
        print_help();
        process::exit(0);
    } else {
        eprintln!("Warning: No config file specified, using an in-memory store");
        eprintln!("Usage: beacon-server --config <path-to-config.toml>");
        eprintln!();
        ServerConfig::default_test_config()
    };

    start_server(config).await?;

    Ok(())
}

fn print_help() {
    println!("Beacon - Student Risk Scoring and Alerting");
    println!();
    println!("USAGE:");
    println!("    beacon-server --config <path-to-config.toml>");
    println!();
    println!("OPTIONS:");
    println!("    --config <file>    Load configuration from TOML file");
    println!("    --help             Print this help message");
    println!();
    println!("EXAMPLE:");
    println!("    beacon-server --config config/beacon.toml");
    println!();
    println!("CONFIGURATION:");
    println!("    The TOML config file may contain:");
    println!("    - bind_address / bind_port: listen address (default 127.0.0.1:8080)");
    println!("    - database_path: SQLite file (default beacon.db)");
    println!("    - alert_preset / trend_preset: named rule presets");
    println!("    - [scoring], [alerts], [cache], [trends]: tunables");
    println!("    - [[notifications.recipients]]: who gets alerts, and when");
    println!();
    println!("    Log verbosity follows RUST_LOG (default: info).");
    println!();
}
