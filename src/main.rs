#![forbid(unsafe_code)]

//! `worker-injector`: inspect worker sessions and drive a worker from the
//! command line.
//!
//! Logs go to stderr; command results go to stdout.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use futures_util::StreamExt;
use tokio_util::codec::FramedRead;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use worker_injector::discovery::mapper::map_running_sessions;
use worker_injector::discovery::process_detector::detector_for_platform;
use worker_injector::discovery::session_detector::SessionDetector;
use worker_injector::models::payload::InjectionPayload;
use worker_injector::models::session::Session;
use worker_injector::orchestrator::manager::SessionManager;
use worker_injector::stream::codec::LineCodec;
use worker_injector::{AppError, InjectorConfig, Result};

/// First-message characters shown by `sessions --brief`.
const BRIEF_PREVIEW_CHARS: usize = 60;

/// How often `run` mirrors newly captured worker output.
const MIRROR_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "worker-injector", about = "Discover and drive AI worker sessions", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List recorded project ids.
    Projects,
    /// Print recorded sessions as JSON.
    Sessions {
        /// Only this project.
        #[arg(long)]
        project: Option<String>,
        /// One line per session instead of JSON.
        #[arg(long)]
        brief: bool,
    },
    /// Scan for running worker processes.
    Processes {
        /// Executable name to look for (defaults to `worker_cli`).
        #[arg(long)]
        name: Option<String>,
        /// Pair each process with its most recent recorded session.
        #[arg(long)]
        map: bool,
    },
    /// Print the text a payload injects.
    Preview {
        #[command(subcommand)]
        kind: PreviewKind,
    },
    /// Start a worker and forward each stdin line to it as context.
    Run {
        /// Resume a recorded session by id.
        #[arg(long)]
        session: Option<String>,
        /// Working directory (defaults to the session's project or `.`).
        #[arg(long)]
        cwd: Option<PathBuf>,
        /// Initial prompt.
        #[arg(long)]
        prompt: Option<String>,
    },
}

#[derive(Debug, Subcommand)]
enum PreviewKind {
    /// Background information.
    Context { text: String },
    /// Non-blocking advisory.
    Warning { text: String },
    /// Blocking condition.
    Block { text: String },
    /// Progress report.
    Progress { percentage: i64, message: String },
    /// Completion notice.
    Completion {
        summary: String,
        /// `key=value` detail, repeatable.
        #[arg(long = "detail", value_parser = parse_key_value)]
        details: Vec<(String, String)>,
    },
    /// Raw user prompt.
    Prompt { text: String },
    /// Payload given as JSON.
    Json { raw: String },
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let config = match &args.config {
        Some(path) => InjectorConfig::load_from_path(path)?,
        None => InjectorConfig::default(),
    };

    match args.command {
        Command::Projects => {
            for project in SessionDetector::from_config(&config)?.list_projects()? {
                println!("{project}");
            }
        }
        Command::Sessions { project, brief } => {
            let detector = SessionDetector::from_config(&config)?;
            let sessions = match project {
                Some(project_id) => {
                    let mut grouped = BTreeMap::new();
                    let sessions = detector.get_project_sessions(&project_id)?;
                    grouped.insert(project_id, sessions);
                    grouped
                }
                None => detector.get_all_sessions()?,
            };
            if brief {
                for session in sessions.values().flatten() {
                    println!("{}", brief_line(session));
                }
            } else {
                println!("{}", to_json(&sessions)?);
            }
        }
        Command::Processes { name, map } => {
            let name = name.unwrap_or_else(|| config.worker_cli.clone());
            let detector = detector_for_platform(&name);
            let processes =
                tokio::task::spawn_blocking(move || detector.find_running_processes())
                    .await
                    .map_err(|err| AppError::ProcessQuery(format!("scan task failed: {err}")))??;

            let json = if map {
                let sessions: Vec<Session> = SessionDetector::from_config(&config)?
                    .get_all_sessions()?
                    .into_values()
                    .flatten()
                    .collect();
                to_json(&map_running_sessions(&sessions, processes))?
            } else {
                to_json(&processes)?
            };
            println!("{json}");
        }
        Command::Preview { kind } => println!("{}", build_payload(kind)?.body()),
        Command::Run {
            session,
            cwd,
            prompt,
        } => run_worker(&config, session, cwd, prompt).await?,
    }

    Ok(())
}

/// `<project>  <session>  <last active>  <first message>` on one line.
fn brief_line(session: &Session) -> String {
    format!(
        "{}\t{}\t{}\t{}",
        session.project_id,
        session.session_id,
        session.last_active_at.format("%Y-%m-%d %H:%M"),
        session.preview(BRIEF_PREVIEW_CHARS).unwrap_or_default()
    )
}

fn build_payload(kind: PreviewKind) -> Result<InjectionPayload> {
    Ok(match kind {
        PreviewKind::Context { text } => InjectionPayload::context(text),
        PreviewKind::Warning { text } => InjectionPayload::warning(text),
        PreviewKind::Block { text } => InjectionPayload::block(text),
        PreviewKind::Progress {
            percentage,
            message,
        } => InjectionPayload::progress(percentage, message)?,
        PreviewKind::Completion { summary, details } => {
            InjectionPayload::completion(summary, details)
        }
        PreviewKind::Prompt { text } => InjectionPayload::user_prompt(text),
        PreviewKind::Json { raw } => InjectionPayload::from_json(&raw)?,
    })
}

/// Start a worker, forward stdin lines as context, and mirror its output
/// until stdin closes, the worker exits, or a shutdown signal arrives.
async fn run_worker(
    config: &InjectorConfig,
    session_id: Option<String>,
    cwd: Option<PathBuf>,
    prompt: Option<String>,
) -> Result<()> {
    let mut session = match session_id {
        Some(id) => SessionDetector::from_config(config)?
            .find_session(&id)?
            .ok_or_else(|| AppError::SessionNotFound(format!("no recorded session {id}")))?,
        None => Session::ad_hoc(std::env::current_dir()?),
    };
    if let Some(cwd) = cwd {
        session.project_path = cwd;
    }

    let manager = SessionManager::new(config)?;
    let id = manager.start_session(&session, prompt).await?;
    info!(session_id = %id, "worker running; stdin lines are injected as context");

    let mut input = FramedRead::new(tokio::io::stdin(), LineCodec::new());
    let mut mirror = tokio::time::interval(MIRROR_INTERVAL);
    let mut printed = 0usize;
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            () = &mut shutdown => {
                info!("shutdown signal received");
                break;
            }
            line = input.next() => match line {
                Some(Ok(line)) if line.trim().is_empty() => {}
                Some(Ok(line)) => {
                    if let Err(err) = manager.inject(&id, &InjectionPayload::context(line)).await {
                        warn!(%err, "injection failed");
                    }
                }
                Some(Err(err)) => {
                    warn!(%err, "failed to read stdin");
                    break;
                }
                None => {
                    info!("stdin closed");
                    break;
                }
            },
            _ = mirror.tick() => {
                printed = print_new_output(&manager, &id, printed).await?;
                if !manager.is_session_active(&id).await {
                    info!(status = %manager.status(&id).await?, "worker is no longer active");
                    break;
                }
            }
        }
    }

    print_new_output(&manager, &id, printed).await?;
    manager.stop_session(&id, true).await
}

async fn print_new_output(manager: &SessionManager, id: &str, printed: usize) -> Result<usize> {
    let output = manager.output(id).await?;
    if let Some(new) = output.get(printed..) {
        print!("{new}");
    }
    Ok(output.len())
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value)
        .map_err(|err| AppError::Io(format!("failed to serialize output: {err}")))
}

fn parse_key_value(raw: &str) -> std::result::Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_owned(), v.trim().to_owned()))
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))
}

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
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
