/// qcflow daemon - Main entry point
/// Serves the drawing review workflow over HTTP and mints actor tokens
use anyhow::{anyhow, Context};
use clap::{Args, Parser, Subcommand};
use qcflow_core::{Actor, ProjectId, Role};
use qcflow_daemon::config::DEFAULT_JWT_SECRET;
use qcflow_daemon::{AuthManager, DaemonConfig, HttpServer};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "qcflow-daemon",
    about = "HTTP server for the drawing review workflow",
    version = env!("CARGO_PKG_VERSION")
)]
struct Cli {
    /// Configuration file path
    #[arg(
        short,
        long,
        global = true,
        value_name = "PATH",
        help = "Path to configuration file (TOML)"
    )]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server
    Serve(ServeArgs),
    /// Print a signed token for an actor
    Token(TokenArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// HTTP server port
    #[arg(long, value_name = "PORT", help = "HTTP server port (default: 8080)")]
    http_port: Option<u16>,

    /// Metrics server port
    #[arg(long, value_name = "PORT", help = "Metrics port (default: 9090)")]
    metrics_port: Option<u16>,

    /// Database file
    #[arg(long, value_name = "PATH")]
    database: Option<PathBuf>,

    /// Log level
    #[arg(
        short,
        long,
        value_name = "LEVEL",
        help = "Log level (trace, debug, info, warn, error)"
    )]
    log_level: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, help = "Enable verbose output")]
    verbose: bool,
}

#[derive(Args, Debug)]
struct TokenArgs {
    #[arg(long)]
    actor_id: i64,

    #[arg(long)]
    username: String,

    /// One of drafter, shift_lead, final_qc, admin
    #[arg(long)]
    role: String,

    /// Project the actor may access; repeatable
    #[arg(long = "project", value_name = "ID")]
    projects: Vec<ProjectId>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = DaemonConfig::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Command::Serve(args) => serve(config, args).await,
        Command::Token(args) => print_token(config, args),
    }
}

fn init_logging(level: &str, format: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::from_default_env().add_directive(level.parse()?);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_line_number(true);

    if format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

async fn serve(mut config: DaemonConfig, args: ServeArgs) -> anyhow::Result<()> {
    // Apply CLI overrides
    if let Some(port) = args.http_port {
        config.server.http_port = port;
    }
    if let Some(port) = args.metrics_port {
        config.server.metrics_port = port;
    }
    if let Some(path) = args.database {
        config.database.path = path;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    if args.verbose {
        config.logging.level = "debug".to_string();
    }

    init_logging(&config.logging.level, &config.logging.format)?;
    config.validate()?;

    info!("Starting qcflow daemon v{}", qcflow_daemon::VERSION);
    if config.auth.jwt_secret == DEFAULT_JWT_SECRET {
        warn!("Using the default JWT secret; set auth.jwt_secret before exposing the server");
    }
    info!(
        "Server configuration: HTTP {}:{}, database {}",
        config.server.http_addr,
        config.server.http_port,
        config.database.path.display()
    );

    let server = HttpServer::open(config).await?;
    let handle = server.start().await?;

    shutdown_signal().await;
    info!("Shutting down daemon...");
    handle.shutdown().await?;

    info!("qcflow daemon stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for CTRL+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received CTRL+C signal");
        },
        () = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}

fn print_token(config: DaemonConfig, args: TokenArgs) -> anyhow::Result<()> {
    let role: Role = args.role.parse().map_err(|e: String| anyhow!(e))?;
    let actor = Actor::new(args.actor_id, args.username, role);
    let auth = AuthManager::new(config.auth).context("Invalid auth configuration")?;
    let token = auth.generate_token(&actor, args.projects)?;
    println!("{}", token.token);
    Ok(())
}
