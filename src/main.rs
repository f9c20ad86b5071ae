//! configcheck: load a configuration file, provision its listeners, and
//! report what the serving subsystem would receive.
//!
//! Exits non-zero when the load fails, so it doubles as a pre-deploy
//! configuration lint.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use server_core::{ConfiguratorRegistry, GlobalConfig};

#[derive(Parser)]
#[command(name = "configcheck")]
#[command(about = "Validate a server configuration and show the provisioned listeners", long_about = None)]
struct Cli {
    /// Configuration file (YAML)
    config: PathBuf,

    /// Print the result as JSON
    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "server_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let input = match std::fs::read_to_string(&cli.config) {
        Ok(input) => input,
        Err(e) => {
            eprintln!("configcheck: cannot read {}: {}", cli.config.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let mut config = GlobalConfig::new();
    let result = server_core::from_yaml_str(&input)
        .and_then(|document| ConfiguratorRegistry::new().apply(&document, &mut config));
    if let Err(e) = result {
        eprintln!("configcheck: {}: {}", cli.config.display(), e);
        return ExitCode::FAILURE;
    }

    if cli.json {
        print_json(&config);
    } else {
        print_plain(&config);
    }
    ExitCode::SUCCESS
}

fn host_names(config: &GlobalConfig, listener: &server_core::Listener) -> Vec<String> {
    match listener.hosts() {
        Some(hosts) => hosts
            .iter()
            .filter_map(|id| config.host(*id).map(|h| h.name.clone()))
            .collect(),
        None => Vec::new(),
    }
}

fn print_plain(config: &GlobalConfig) {
    println!("listeners:");
    for listener in config.listeners.iter() {
        let hosts = host_names(config, listener);
        println!(
            "  {} fd={} proxy-protocol={} hosts={}",
            listener.address(),
            listener.fd(),
            if listener.proxy_protocol() { "on" } else { "off" },
            if hosts.is_empty() {
                "*".to_string()
            } else {
                hosts.join(",")
            }
        );
    }
    match serde_json::to_string_pretty(&config.snapshot()) {
        Ok(snapshot) => println!("knobs: {}", snapshot),
        Err(e) => eprintln!("configcheck: cannot render knob snapshot: {}", e),
    }
}

fn print_json(config: &GlobalConfig) {
    let listeners: Vec<serde_json::Value> = config
        .listeners
        .iter()
        .map(|listener| {
            serde_json::json!({
                "address": listener.address().to_string(),
                "fd": listener.fd(),
                "proxy_protocol": listener.proxy_protocol(),
                "hosts": host_names(config, listener),
            })
        })
        .collect();
    let report = serde_json::json!({
        "listeners": listeners,
        "knobs": config.snapshot(),
    });
    match serde_json::to_string_pretty(&report) {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("configcheck: cannot render report: {}", e),
    }
}
