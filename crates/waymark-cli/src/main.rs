//! Waymark CLI
//!
//! Serves a tutorial session to an editor host and keeps its snapshot on disk.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;
use waymark_tracker::{
    apply_event, create_router, AppState, Config, Disposition, LogFormat, Notice, SessionEvent,
    SessionSnapshot, SessionState, SessionStatus, StateLock, TrackerEvent, Tutorial,
};

/// Waymark - tutorial position and progress tracker
///
/// Tracks a learner through a tutorial's levels, stages and steps, advancing
/// as the host reports passing tests.
#[derive(Parser, Debug)]
#[command(name = "waymark")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the tutorial JSON file
    #[arg(value_name = "TUTORIAL")]
    tutorial: Option<String>,

    /// Path to configuration file (default: waymark.json in current directory)
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Tutorial version to follow (default: latest published)
    #[arg(long, value_name = "VERSION")]
    tutorial_version: Option<String>,

    /// Path to the session state file
    #[arg(short, long, value_name = "FILE")]
    state_file: Option<String>,

    /// Port for the HTTP API server
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long)]
    verbose: bool,

    /// Resume from an existing session instead of starting fresh
    #[arg(long)]
    resume: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::from(1);
        }
    };

    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if args.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    match config.log_format {
        LogFormat::Full => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Compact => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .init(),
    }

    tracing::info!("Waymark starting");
    tracing::debug!(config = ?args.config, "Config file");

    match run(args, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

/// Runs a tracker session until Ctrl+C.
///
/// 1. Apply overrides and load the tutorial
/// 2. Acquire the state lock
/// 3. Restore or create the session
/// 4. Serve the host API and autosave snapshots
/// 5. Save and summarize on shutdown
async fn run(args: Args, mut config: Config) -> anyhow::Result<()> {
    if let Some(ref tutorial) = args.tutorial {
        config.tutorial.clone_from(tutorial);
    }
    if args.tutorial_version.is_some() {
        config.tutorial_version.clone_from(&args.tutorial_version);
    }
    if let Some(ref state_file) = args.state_file {
        config.state_file.clone_from(state_file);
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    config.validate()?;
    print_config(&config);

    tracing::info!(tutorial = %config.tutorial, "Loading tutorial");
    let tutorial = Tutorial::load(&config.tutorial)?;
    print_tutorial_info(&tutorial);

    let state_path = PathBuf::from(&config.state_file);
    println!();
    println!("Acquiring state lock...");
    let _lock = StateLock::acquire(&state_path).await.map_err(|e| {
        anyhow::anyhow!("Failed to acquire state lock: {e}")
    })?;
    println!("State lock acquired");

    let session = load_or_create_session(
        &state_path,
        args.resume,
        &tutorial,
        config.tutorial_version.as_deref(),
    )
    .await?;
    save_snapshot(&session, &state_path).await;

    let app_state = AppState::with_state(config.clone(), session);
    let router = create_router(app_state.clone());

    let addr: SocketAddr = ([127, 0, 0, 1], config.port).into();
    println!();
    println!("Starting HTTP API server on {addr}...");
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!(
            "Failed to bind to {addr}: {e}\n\nSuggestion: Try a different port with --port"
        )
    })?;

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "HTTP server error");
        }
    });
    let autosave_handle = config
        .autosave
        .then(|| spawn_autosave(app_state.clone(), state_path.clone()));

    println!("HTTP API server running on http://{addr}");
    println!("Press Ctrl+C to stop");
    println!();

    tokio::signal::ctrl_c().await?;
    tracing::info!("Received Ctrl+C, shutting down");

    server_handle.abort();
    if let Some(handle) = autosave_handle {
        handle.abort();
    }

    let final_state = app_state.session.lock().await.clone();
    if let Some(snapshot) = final_state.snapshot() {
        snapshot.save(&state_path).await?;
        println!("Final state saved to {}", state_path.display());
    }

    println!();
    print_summary(&final_state);
    Ok(())
}

/// Loads configuration from the specified path or default location.
fn load_config(config_path: Option<&str>) -> anyhow::Result<Config> {
    match config_path {
        Some(path_str) => {
            let path = Path::new(path_str);
            if !path.exists() {
                anyhow::bail!(
                    "Config file not found: '{}'\n\nSuggestion: Check the path or remove the --config flag to use defaults",
                    path.display()
                );
            }
            Config::load_from_file(path).map_err(|e| anyhow::anyhow!("{e}"))
        }
        None => Config::load().map_err(|e| anyhow::anyhow!("{e}")),
    }
}

/// Restores the saved session or loads the tutorial fresh.
async fn load_or_create_session(
    state_path: &Path,
    resume: bool,
    tutorial: &Tutorial,
    version: Option<&str>,
) -> anyhow::Result<SessionState> {
    match SessionSnapshot::load(state_path).await? {
        Some(snapshot) if resume => {
            let session = SessionState::restore(tutorial, &snapshot)?;
            println!(
                "Resuming session at {} ({} steps completed)",
                snapshot.position,
                snapshot.progress.completed_steps()
            );
            tracing::info!(
                position = %snapshot.position,
                status = %session.status(),
                "Resuming from snapshot"
            );
            Ok(session)
        }
        Some(snapshot) if !snapshot.completed => {
            anyhow::bail!(
                "Found active session at '{}' (position {})\n\nSuggestion: Use --resume to continue or delete the state file to start fresh",
                state_path.display(),
                snapshot.position
            );
        }
        Some(_) | None => {
            println!("Starting fresh session");
            let settled = apply_event(
                &SessionState::new(),
                SessionEvent::LoadTutorial {
                    tutorial: tutorial.clone(),
                    version: version.map(ToString::to_string),
                },
            )?;

            if let Some(Notice::InvalidTutorial { message }) = settled
                .notices
                .iter()
                .find(|n| matches!(n, Notice::InvalidTutorial { .. }))
            {
                anyhow::bail!("Tutorial cannot be navigated: {message}");
            }

            tracing::info!(
                tutorial = %tutorial.id,
                position = ?settled.state.position().map(ToString::to_string),
                "Session created"
            );
            Ok(settled.state)
        }
    }
}

/// Saves a snapshot after every applied event.
fn spawn_autosave(app_state: AppState, state_path: PathBuf) -> JoinHandle<()> {
    let mut receiver = app_state.broadcaster.subscribe();

    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(TrackerEvent::Settled(payload))
                    if payload.disposition == Disposition::Applied =>
                {
                    let session = app_state.session.lock().await.clone();
                    save_snapshot(&session, &state_path).await;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "Autosave fell behind, saving current state");
                    let session = app_state.session.lock().await.clone();
                    save_snapshot(&session, &state_path).await;
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Writes a snapshot, logging instead of failing.
async fn save_snapshot(session: &SessionState, state_path: &Path) {
    let Some(snapshot) = session.snapshot() else {
        return;
    };
    if let Err(e) = snapshot.save(state_path).await {
        tracing::warn!(error = %e, path = %state_path.display(), "Failed to save state");
    }
}

/// Prints the loaded configuration.
fn print_config(config: &Config) {
    println!("Configuration loaded:");
    println!("  Tutorial: {}", config.tutorial);
    println!(
        "  Version: {}",
        config.tutorial_version.as_deref().unwrap_or("latest")
    );
    println!("  State file: {}", config.state_file);
    println!("  Port: {}", config.port);
    println!("  Autosave: {}", config.autosave);
}

/// Prints tutorial information.
fn print_tutorial_info(tutorial: &Tutorial) {
    println!();
    println!("Tutorial loaded:");
    println!("  Id: {}", tutorial.id);
    println!("  Title: {}", tutorial.title);
    println!("  Versions: {}", tutorial.versions.len());

    for version in &tutorial.versions {
        tracing::debug!(
            version = %version.version,
            published_at = ?version.published_at,
            levels = version.levels.len(),
            "Version available"
        );
    }
}

/// Prints a summary of the session.
fn print_summary(state: &SessionState) {
    println!("=== Waymark Summary ===");
    println!("Status: {}", state.status());

    if let Some(position) = state.position() {
        println!("Position: {position}");
    }

    let progress = state.progress();
    if let Some(document) = state.document() {
        println!(
            "Steps completed: {}/{}",
            progress.completed_steps(),
            document.step_count()
        );
    }
    println!("Stages completed: {}", progress.completed_stages());

    if state.status() == SessionStatus::Finished {
        println!("Tutorial finished!");
    }
}
