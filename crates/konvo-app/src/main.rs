mod cli;
mod demo;

use std::process::ExitCode;

use konvo_config::KonvoConfig;
use tracing_subscriber::filter::{Directive, LevelFilter};
use tracing_subscriber::EnvFilter;

const DEFAULT_DIRECTIVE: &str = "konvo=info";

fn init_logging(directive: &str) {
    let directive: Directive = directive.parse().unwrap_or_else(|_| {
        eprintln!("Invalid log directive {directive:?}, using {DEFAULT_DIRECTIVE}");
        DEFAULT_DIRECTIVE
            .parse()
            .unwrap_or_else(|_| Directive::from(LevelFilter::INFO))
    });
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(directive))
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = cli::parse();

    // Config is loaded before logging so its level can apply; the error is
    // reported once the subscriber is up.
    let loaded = konvo_config::load_config(args.config.as_deref());
    let log_directive = match (&args.log_level, &loaded) {
        (Some(level), _) => level.clone(),
        (None, Ok(config)) => config.logging.level.as_directive().to_string(),
        (None, Err(_)) => DEFAULT_DIRECTIVE.to_string(),
    };
    init_logging(&log_directive);

    tracing::info!("Konvo v{} starting...", env!("CARGO_PKG_VERSION"));
    if let Some(ref path) = args.config {
        tracing::info!("Using config override: {}", path.display());
    }
    let config = loaded.unwrap_or_else(|e| {
        tracing::warn!("Config load failed, using defaults: {e}");
        KonvoConfig::default()
    });

    match args.command {
        Some(cli::Command::Demo { hold }) => {
            if let Err(e) = demo::run(&config, hold).await {
                tracing::error!("Demo failed: {e}");
                return ExitCode::FAILURE;
            }
        }
        None => println!("{}", konvo_config::config_to_json(&config)),
    }

    tracing::info!("Shutdown complete");
    ExitCode::SUCCESS
}
