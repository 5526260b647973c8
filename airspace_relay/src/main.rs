// CLI entry point for the airspace simulation server.
//
// Loads the config file (if any), applies CLI overrides, loads the user
// directory, builds the `Service` around the built-in kinematic engine, and
// starts the RPC and control listeners. See `server.rs` for the networking
// architecture and `service.rs` for the RPC surface.
//
// Usage:
//   airspace-relay [OPTIONS]
//     --config <FILE>         JSON config file (fields default individually)
//     --bind <IP>             Bind address (default: 127.0.0.1)
//     --rpc-port <PORT>       RPC port (default: 2017)
//     --control-port <PORT>   Control socket port (default: 2020)
//     --users <FILE>          User/assignment file
//     --scenario <FILE>       Scenario loaded at startup
//     --liveness-ms <MS>      Liveness probe interval (default: 2000)
//     --trust-same-host       Auto-bind same-host clients to localhost_admin
//     --log <FILTER>          Log filter when RUST_LOG is unset (default: info)

use std::path::PathBuf;
use std::process;
use std::str::FromStr;
use std::sync::Arc;

use airspace_engine::KinematicEngine;
use airspace_relay::{RelayConfig, Service, UserDirectory, start_relay};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

struct Args {
    config: RelayConfig,
    log: String,
}

fn main() {
    let args = parse_args();
    init_logging(&args.log);
    let config = args.config;

    let users = match &config.user_file {
        Some(path) => UserDirectory::load(path).unwrap_or_else(|e| {
            error!(error = %e, "cannot load user file");
            process::exit(1);
        }),
        None => UserDirectory::default(),
    };
    info!(users = users.len(), "user directory loaded");

    let service = Service::new(&config, users, Box::new(KinematicEngine::new()))
        .unwrap_or_else(|e| {
            error!(error = %e, "cannot start simulation service");
            process::exit(1);
        });

    let (_handle, addrs) = match start_relay(&config, Arc::new(service)) {
        Ok(result) => result,
        Err(e) => {
            error!(error = %e, "failed to start relay");
            process::exit(1);
        }
    };

    println!("RPC listening on {}", addrs.rpc);
    println!("Control socket listening on {}", addrs.control);
    println!("Press Ctrl+C to stop.");

    // The process exits on SIGINT/SIGTERM; the listener threads go with it.
    loop {
        std::thread::park();
    }
}

fn init_logging(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Parse command-line arguments. Uses simple `std::env::args()` matching, no
/// clap dependency. `--config` is applied first wherever it appears, so
/// other flags always override file values.
fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();

    let mut config = match args.iter().position(|a| a == "--config") {
        Some(i) => {
            let path = args.get(i + 1).map(PathBuf::from).unwrap_or_else(|| {
                eprintln!("--config requires a file path");
                process::exit(1);
            });
            RelayConfig::from_file(&path).unwrap_or_else(|e| {
                eprintln!("{e}");
                process::exit(1);
            })
        }
        None => RelayConfig::default(),
    };
    let mut log = "info".to_string();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
            }
            "--bind" => {
                i += 1;
                config.bind_address = parse_value(&args, i, "--bind", "an IP address");
            }
            "--rpc-port" => {
                i += 1;
                config.rpc_port = parse_value(&args, i, "--rpc-port", "a valid port number");
            }
            "--control-port" => {
                i += 1;
                config.control_port =
                    parse_value(&args, i, "--control-port", "a valid port number");
            }
            "--users" => {
                i += 1;
                config.user_file = Some(parse_value(&args, i, "--users", "a file path"));
            }
            "--scenario" => {
                i += 1;
                config.scenario = Some(parse_value(&args, i, "--scenario", "a file path"));
            }
            "--liveness-ms" => {
                i += 1;
                config.liveness_interval_ms =
                    parse_value(&args, i, "--liveness-ms", "a number of milliseconds");
            }
            "--trust-same-host" => {
                config.trust_same_host = true;
            }
            "--log" => {
                i += 1;
                log = parse_value(&args, i, "--log", "a filter such as `debug`");
            }
            "--help" | "-h" => {
                print_usage();
                process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {other}");
                print_usage();
                process::exit(1);
            }
        }
        i += 1;
    }

    Args { config, log }
}

fn parse_value<T: FromStr>(args: &[String], i: usize, flag: &str, what: &str) -> T {
    args.get(i).and_then(|s| s.parse().ok()).unwrap_or_else(|| {
        eprintln!("{flag} requires {what}");
        process::exit(1);
    })
}

fn print_usage() {
    println!("Usage: airspace-relay [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --config <FILE>         JSON config file");
    println!("  --bind <IP>             Bind address (default: 127.0.0.1)");
    println!("  --rpc-port <PORT>       RPC port (default: 2017)");
    println!("  --control-port <PORT>   Control socket port (default: 2020)");
    println!("  --users <FILE>          User/assignment file");
    println!("  --scenario <FILE>       Scenario loaded at startup");
    println!("  --liveness-ms <MS>      Liveness probe interval (default: 2000)");
    println!("  --trust-same-host       Auto-bind same-host clients to localhost_admin");
    println!("  --log <FILTER>          Log filter when RUST_LOG is unset (default: info)");
    println!("  --help, -h              Show this help");
}
