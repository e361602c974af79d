//! Voxrelay entry point.
//!
//! Binary name: `voxrelay`
//!
//! Parses CLI arguments, loads configuration, then either starts the relay
//! server or runs one of the small inspection commands.

mod http;
mod state;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::{generate, Shell};

use voxrelay_core::persona::AgentDirectory;

use state::AppState;

#[derive(Parser)]
#[command(name = "voxrelay", version, about = "Owl Bank voice relay session engine")]
struct Cli {
    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Bridge tracing spans to OpenTelemetry (stdout exporter)
    #[arg(long, global = true)]
    otel: bool,

    /// Path to the relay configuration file (default: ./voxrelay.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the relay server
    Serve {
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        #[arg(short, long, default_value_t = 8080, env = "PORT")]
        port: u16,
    },

    /// List the configured agent personas
    Personas,

    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Shell completions don't need tracing or config
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "voxrelay", &mut std::io::stdout());
        return Ok(());
    }

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "info,voxrelay=debug",
        _ => "trace",
    };
    voxrelay_observe::tracing_setup::init_tracing(cli.otel, filter)
        .map_err(|e| anyhow::anyhow!("tracing init failed: {e}"))?;

    let config = state::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { host, port } => {
            let state = AppState::init(config)?;

            let addr = format!("{host}:{port}");
            let listener = tokio::net::TcpListener::bind(&addr).await?;

            println!(
                "  {} voxrelay listening on {}",
                console::style("⚡").bold(),
                console::style(format!("ws://{addr}/ws/relay")).cyan()
            );
            println!(
                "  {} observers on {}",
                console::style("👁").bold(),
                console::style(format!("ws://{addr}/ws/observe")).cyan()
            );
            println!("  {}", console::style("Press Ctrl+C to stop").dim());

            let router = http::router::build_router(state);

            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown_signal())
                .await?;

            voxrelay_observe::tracing_setup::shutdown_tracing();
            println!("\n  Server stopped.");
        }

        Commands::Personas => {
            let directory = AgentDirectory::new(config.personas.clone())?;
            println!();
            for persona in directory.iter() {
                println!(
                    "  {}  {} ({})",
                    console::style(&persona.id).cyan(),
                    persona.name,
                    persona.role
                );
                if !persona.triggers.is_empty() {
                    println!(
                        "      {} {}",
                        console::style("triggers:").dim(),
                        persona.triggers.join(", ")
                    );
                }
            }
            println!();
        }

        Commands::Completions { .. } => unreachable!("handled above"),
    }

    Ok(())
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
