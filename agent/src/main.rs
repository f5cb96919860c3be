//! k3s edge agent - Entry Point
//!
//! Runs on an edge device next to a single-node k3s cluster and executes the
//! lifecycle commands it receives from the MQTT broker.

use std::collections::HashMap;
use std::env;
use std::process::ExitCode;

use k3s_edge_agent::app::options::AppOptions;
use k3s_edge_agent::app::run::run;
use k3s_edge_agent::diagnostic::run_diagnostic;
use k3s_edge_agent::logs::{init_logging, LogOptions};
use k3s_edge_agent::storage::layout::StorageLayout;
use k3s_edge_agent::storage::settings::Settings;
use k3s_edge_agent::utils::version_info;

use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Failed to serialize version info: {e}"),
        }
        return ExitCode::SUCCESS;
    }

    let layout = match cli_args.get("home") {
        Some(home) => StorageLayout::new(home),
        None => StorageLayout::from_env(),
    };

    // Run diagnostics
    if cli_args.contains_key("diagnostic") || cli_args.contains_key("diag") {
        return if run_diagnostic(&layout).await {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        };
    }

    // Run the agent starting here

    // Retrieve the settings file
    let settings_file = layout.settings_file();
    let settings_missing = !settings_file.exists().await;
    let mut settings = if settings_missing {
        Settings::default()
    } else {
        match settings_file.read_json::<Settings>().await {
            Ok(settings) => settings,
            Err(e) => {
                eprintln!("Unable to read settings file {}: {e}", settings_file.path().display());
                return ExitCode::FAILURE;
            }
        }
    };
    settings.resolve_paths(&layout);

    if let Err(e) = layout.setup().await {
        eprintln!("Unable to create the home directory layout: {e}");
        return ExitCode::FAILURE;
    }

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level,
        json_format: settings.json_logs,
        log_dir: Some(layout.logs_dir().path().to_path_buf()),
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            println!("Failed to initialize logging: {e}");
            None
        }
    };

    if settings_missing {
        warn!(
            "Settings file {} not found, using defaults",
            settings_file.path().display()
        );
    }

    // Run the agent
    let options = AppOptions::from_settings(&settings, &layout);
    info!("Running k3s edge agent with options: {:?}", options);
    match run(version.version, options, await_shutdown_signal()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Failed to run the agent: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                _ => {
                    error!("Failed to install signal handlers, waiting for Ctrl+C only");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {e}");
        }
        info!("Ctrl+C received, shutting down...");
    }
}
