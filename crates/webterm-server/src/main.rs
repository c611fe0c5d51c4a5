//! webterm-server: serve an admin-only browser terminal over WebSocket.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use webterm_core::{issue_token, HmacTokenValidator, Principal};
use webterm_server::{CliOverrides, ServerConfig, TerminalServer};

/// webterm-server: browser terminal bridge
#[derive(Parser, Debug)]
#[command(name = "webterm-server", version, about = "Browser terminal bridge")]
struct Cli {
    /// Listen address (host:port)
    #[arg(long, global = true)]
    bind: Option<String>,

    /// Config file path
    #[arg(long, global = true, default_value = "~/.webterm/config.toml")]
    config: String,

    /// Shell to spawn for each session
    #[arg(long, global = true)]
    shell: Option<String>,

    /// Allowed browser origin; repeat to allow several (replaces the config list)
    #[arg(long = "allow-origin", global = true)]
    allow_origin: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a principal token signed with the configured secret
    MintToken {
        /// Principal id
        #[arg(long, default_value_t = 1)]
        id: u64,

        #[arg(long)]
        username: String,

        #[arg(long, default_value = "admin")]
        role: String,

        /// Lifetime in seconds
        #[arg(long, default_value_t = 3600)]
        ttl: u64,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    use tracing_subscriber::EnvFilter;
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let overrides = CliOverrides {
        bind: cli.bind.clone(),
        shell: cli.shell.clone(),
        allow_origins: cli.allow_origin.clone(),
    };
    let config_path = PathBuf::from(&cli.config);
    let config = match ServerConfig::load(Some(&config_path), &overrides) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    if let Some(Command::MintToken {
        id,
        username,
        role,
        ttl,
    }) = cli.command
    {
        let principal = Principal::new(id, username, role);
        match issue_token(&config.secret, &principal, ttl) {
            Ok(token) => println!("{token}"),
            Err(e) => {
                error!(error = %e, "failed to mint token");
                std::process::exit(1);
            }
        }
        return;
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        bind = %config.bind,
        "starting webterm-server"
    );

    let validator = Arc::new(HmacTokenValidator::new(config.secret.clone()));
    let server = match TerminalServer::bind(config, validator).await {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to create server");
            std::process::exit(1);
        }
    };

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("received shutdown signal");
        shutdown.trigger();
    });

    if let Err(e) = server.run().await {
        error!(error = %e, "server error");
        std::process::exit(1);
    }
}

/// Resolve on SIGINT, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
