//! parley-server: authenticated WebSocket relay for point-to-point chat.
//!
//! `serve` (the default) runs the relay; `token` mints a development token
//! signed with the same secret the server would use.

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use parley_core::{generate_secret, issue_token, UserId};
use parley_server::auth::JwtAuthenticator;
use parley_server::config::{CliOverrides, ServerConfig, JWT_SECRET_ENV};
use parley_server::persist::{DiscardPersister, JsonlPersister, Persister};
use parley_server::ParleyServer;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

/// parley-server — WebSocket chat relay
#[derive(Parser, Debug)]
#[command(name = "parley-server", version, about = "WebSocket chat relay")]
struct Cli {
    /// Config file path
    #[arg(long, global = true, default_value = "~/.parley/config.toml")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the relay (default)
    Serve(ServeArgs),
    /// Print a signed token for a user
    Token {
        /// User id (UUID); a random one is used when omitted
        #[arg(long)]
        user: Option<String>,

        /// Token lifetime in seconds
        #[arg(long, default_value_t = 86_400)]
        ttl: u64,
    },
}

#[derive(Args, Debug, Default)]
struct ServeArgs {
    /// Bind address
    #[arg(long)]
    bind: Option<String>,

    /// Listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// WebSocket endpoint path
    #[arg(long)]
    path: Option<String>,

    /// Append routed messages to this JSONL file
    #[arg(long)]
    persist: Option<String>,

    /// Outbound queue capacity per session
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// Idle read timeout in seconds
    #[arg(long)]
    idle_timeout: Option<u64>,

    /// Also deliver each message back to its sender
    #[arg(long)]
    echo_to_sender: bool,
}

impl ServeArgs {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            bind: self.bind.clone(),
            port: self.port,
            path: self.path.clone(),
            persist: self.persist.clone(),
            queue_capacity: self.queue_capacity,
            idle_timeout: self.idle_timeout,
            echo_to_sender: self.echo_to_sender,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    use tracing_subscriber::EnvFilter;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    let config_path = PathBuf::from(&cli.config);
    let result = match cli.command {
        Some(Command::Token { user, ttl }) => print_token(&config_path, user.as_deref(), ttl),
        Some(Command::Serve(args)) => serve(&config_path, &args).await,
        None => serve(&config_path, &ServeArgs::default()).await,
    };

    if let Err(e) = result {
        error!(error = %format!("{e:#}"), "parley-server failed");
        std::process::exit(1);
    }
}

async fn serve(config_path: &Path, args: &ServeArgs) -> anyhow::Result<()> {
    let config = ServerConfig::load(Some(config_path), &args.overrides())
        .context("failed to load config")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %config.listen,
        "starting parley-server"
    );

    let secret = match config.jwt_secret.clone() {
        Some(secret) => secret,
        None => {
            warn!(
                "no JWT secret configured (set {JWT_SECRET_ENV} or [auth] jwt_secret); \
                 using a random secret, previously issued tokens will be rejected"
            );
            generate_secret()
        }
    };
    let authenticator = Arc::new(JwtAuthenticator::new(secret));

    let persister: Arc<dyn Persister> = match &config.persistence_path {
        Some(path) => {
            let persister = JsonlPersister::open(path)
                .await
                .with_context(|| format!("failed to open message log {}", path.display()))?;
            info!(path = %path.display(), "persisting messages");
            Arc::new(persister)
        }
        None => {
            info!("message persistence disabled");
            Arc::new(DiscardPersister)
        }
    };

    let server = ParleyServer::bind(config, authenticator, persister)
        .await
        .context("failed to start server")?;
    server.run(shutdown_signal()).await?;
    Ok(())
}

fn print_token(config_path: &Path, user: Option<&str>, ttl: u64) -> anyhow::Result<()> {
    let config = ServerConfig::load(Some(config_path), &CliOverrides::default())
        .context("failed to load config")?;
    let Some(secret) = config.jwt_secret else {
        bail!("no JWT secret configured; set {JWT_SECRET_ENV} or [auth] jwt_secret");
    };
    let user = match user {
        Some(raw) => raw
            .parse::<UserId>()
            .with_context(|| format!("invalid user id {raw:?}"))?,
        None => UserId::random(),
    };
    let token = issue_token(secret.as_bytes(), user, ttl)?;
    info!(user = %user, ttl_secs = ttl, "issued token");
    println!("{token}");
    Ok(())
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
