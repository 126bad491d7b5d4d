mod cli;
mod config;
mod credentials;
mod tui;
mod unlock;

use clap::Parser;
use color_eyre::Result;
use cryptoshield_core::ShieldError;
use cryptoshield_drive::{Enumeration, StrategyOutcome};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{
    cli::{Command, ConfigCommand},
    credentials::CredentialCommand,
    unlock::with_guidance,
};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = cli::Cli::parse();
    let config = config::load(cli.config.as_deref())?;
    match cli.command.unwrap_or(Command::Open) {
        Command::Open => run_open(&config).await?,
        Command::Drives => run_drives(&config).await,
        Command::Setup { path } => run_setup(&config, path).await?,
        Command::List { show_secrets } => {
            run_credentials(&config, CredentialCommand::List { show_secrets }).await?
        }
        Command::Search {
            query,
            show_secrets,
        } => {
            run_credentials(
                &config,
                CredentialCommand::Search {
                    query,
                    show_secrets,
                },
            )
            .await?
        }
        Command::Add {
            website,
            username,
            secret,
        } => {
            run_credentials(
                &config,
                CredentialCommand::Add {
                    website,
                    username,
                    secret,
                },
            )
            .await?
        }
        Command::Delete { website, username } => {
            run_credentials(&config, CredentialCommand::Delete { website, username }).await?
        }
        Command::MigrateLegacy => {
            run_credentials(&config, CredentialCommand::MigrateLegacy).await?
        }
        Command::Watch => run_watch(&config).await?,
        Command::Config(ConfigCommand::Init) => init_config(&config, cli.config.as_deref())?,
        Command::Version => print_version(),
    }

    Ok(())
}

fn init_tracing() {
    // Respect user-provided filters, default to info to avoid noisy stdout.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn print_version() {
    println!("cryptoshield {}", env!("CARGO_PKG_VERSION"));
}

fn init_config(config: &config::Config, explicit: Option<&std::path::Path>) -> Result<()> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => config::default_path()?,
    };
    let path = config::write_default_if_missing(config, &path)?;
    println!("Config initialized at {}", path.display());
    Ok(())
}

async fn run_drives(config: &config::Config) {
    let controller = unlock::controller(config, false);
    let enumeration = controller.enumerator().enumerate().await;
    print!("{}", describe_drives(&enumeration, |root| {
        controller.authorization().is_authorized(root)
    }));
}

fn describe_drives(
    enumeration: &Enumeration,
    is_authorized: impl Fn(&std::path::Path) -> bool,
) -> String {
    let mut out = String::new();
    if enumeration.candidates.is_empty() {
        out.push_str("No removable drives detected.\n");
    }
    for candidate in &enumeration.candidates {
        let state = if is_authorized(&candidate.path) {
            "authorized"
        } else {
            "not authorized"
        };
        out.push_str(&format!(
            "{:<40} [{}] {}\n",
            candidate.path.display(),
            candidate.source,
            state
        ));
    }
    out.push_str("\nDetectors:\n");
    for report in &enumeration.reports {
        let outcome = match &report.outcome {
            StrategyOutcome::Responded { count } => format!("{count} drive(s)"),
            StrategyOutcome::Failed { reason } => format!("failed: {reason}"),
            StrategyOutcome::TimedOut => "timed out".to_string(),
        };
        out.push_str(&format!("  {:<12} {outcome}\n", report.kind.label()));
    }
    out
}

async fn run_setup(config: &config::Config, path: Option<std::path::PathBuf>) -> Result<()> {
    let controller = unlock::controller(config, false);
    let root = controller
        .setup(path.as_deref())
        .await
        .map_err(with_guidance)?;
    println!("Drive authorized: {}", root.display());
    Ok(())
}

async fn run_credentials(config: &config::Config, cmd: CredentialCommand) -> Result<()> {
    let session = unlock::open_session(config, false).await?;
    let result = credentials::handle(cmd, session.store());
    session.close().await;
    result
}

async fn run_open(config: &config::Config) -> Result<()> {
    let session = unlock::open_session(config, true).await?;
    let exit = tui::launch(&session);
    let revoked = session.is_revoked();
    session.close().await;
    match exit? {
        tui::Exit::Revoked => Err(revoked_report()),
        tui::Exit::Quit if revoked => Err(revoked_report()),
        tui::Exit::Quit => Ok(()),
    }
}

async fn run_watch(config: &config::Config) -> Result<()> {
    let session = unlock::open_session(config, true).await?;
    info!(session = %session.id(), root = %session.root().display(), "watching drive");
    println!(
        "Session {} open on {}. Remove the drive or press Ctrl+C to end.",
        session.id(),
        session.root().display()
    );

    let revoked = tokio::select! {
        _ = session.wait_revoked() => true,
        _ = shutdown_signal() => false,
    };
    session.close().await;
    if revoked {
        return Err(revoked_report());
    }
    println!("Session closed.");
    Ok(())
}

fn revoked_report() -> color_eyre::Report {
    eprintln!("The authorized drive was removed. Session terminated.");
    with_guidance(ShieldError::SessionRevoked)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
