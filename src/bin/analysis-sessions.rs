//! Analysis Sessions CLI
//!
//! Command-line front end for submitting analyses and tracking their sessions.
//! Every command prints one JSON document on stdout (`watch` prints one per event);
//! logs and notices go to stderr.

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

use analysis_sessions::{
    app_data_dir, context_from_pairs, resume_map, sessions_dir, ClientConfig, ContinueOutcome,
    HttpGateway, LocalSessionStore, LogNotifier, RestoreOutcome, SessionEvent, SessionGateway,
    SessionReconciler, SessionSnapshot, TrackerOptions,
};

#[derive(Parser)]
#[command(name = "analysis-sessions")]
#[command(about = "Analysis Sessions CLI - track long-running analysis jobs", long_about = None)]
struct Cli {
    /// Backend base URL (overrides the config file)
    #[arg(long, global = true)]
    base_url: Option<String>,
    /// Data directory holding config and session history
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a new analysis from key=value pairs (segmento=..., produto=...)
    Submit {
        pairs: Vec<String>,
        /// Keep running and print progress until the analysis finishes
        #[arg(short, long)]
        watch: bool,
    },
    /// Print progress events for a session until it finishes
    Watch {
        /// Session ID; defaults to the session active before the last exit
        session_id: Option<String>,
    },
    /// Ask the server for a session's current status
    Status { session_id: String },
    /// List session history
    List {
        /// Merge the server's listing into local history first
        #[arg(long)]
        remote: bool,
    },
    /// Pause the active session
    Pause,
    /// Resume the active session
    Resume,
    /// Save a session on the server for later
    Save { session_id: String },
    /// Show results of a completed session, or continue an unfinished one
    Continue { session_id: String },
    /// Continue a session from a workflow step (1-3)
    Step { session_id: String, step: u8 },
    /// Delete a session remotely and locally
    Delete { session_id: String },
    /// Remove every session remotely and locally
    Clear,
}

// ============ Output Types ============

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitOutput {
    session_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusOutput {
    session_id: String,
    status: String,
    progress_percent: u8,
    current_step_label: String,
    completed_steps: Vec<u8>,
    has_results: bool,
    error: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionListItem {
    session_id: String,
    name: String,
    status: String,
    progress_percent: u8,
    completed_steps: Vec<u8>,
    resumable_steps: Vec<u8>,
    last_saved: String,
}

impl From<&SessionSnapshot> for SessionListItem {
    fn from(s: &SessionSnapshot) -> Self {
        let resumable_steps = resume_map(&s.completed_steps)
            .iter()
            .enumerate()
            .filter(|(_, ok)| **ok)
            .map(|(i, _)| i as u8 + 1)
            .collect();
        Self {
            session_id: s.session_id.clone(),
            name: s.display_name(),
            status: s.status.to_string(),
            progress_percent: s.progress_percent,
            completed_steps: s.completed_steps.iter().copied().collect(),
            resumable_steps,
            last_saved: s.last_saved.to_rfc3339(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StepOutput {
    session_id: String,
    step: u8,
    context_keys: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DoneOutput {
    session_id: Option<String>,
    ok: bool,
    removed: Option<usize>,
}

#[derive(Serialize)]
struct ErrorOutput {
    error: String,
}

struct App {
    gateway: Arc<HttpGateway>,
    reconciler: SessionReconciler,
    events: UnboundedReceiver<SessionEvent>,
}

impl App {
    fn open(cli: &Cli) -> anyhow::Result<Self> {
        let data_dir = match &cli.data_dir {
            Some(dir) => dir.clone(),
            None => app_data_dir()?,
        };
        let mut config = ClientConfig::load_or_init(&data_dir)?;
        if let Some(url) = &cli.base_url {
            config.base_url = url.clone();
        }
        tracing::debug!(base_url = %config.base_url, data_dir = %data_dir.display(), "Client configured");

        let store = LocalSessionStore::open(sessions_dir(&data_dir))
            .with_context(|| format!("opening session store in {}", data_dir.display()))?;
        let gateway = Arc::new(HttpGateway::from_config(&config));
        let (reconciler, events) = SessionReconciler::create(
            gateway.clone(),
            store,
            Arc::new(LogNotifier),
            TrackerOptions::from(config),
        );
        Ok(Self {
            gateway,
            reconciler,
            events,
        })
    }

    /// Print events for `session_id` until it completes, fails or Ctrl-C.
    async fn watch(&mut self, session_id: &str) -> anyhow::Result<String> {
        loop {
            tokio::select! {
                event = self.events.recv() => {
                    let Some(event) = event else { break };
                    println!("{}", serde_json::to_string(&event)?);
                    let finished = matches!(
                        event,
                        SessionEvent::Completed { .. } | SessionEvent::Failed { .. }
                    );
                    if finished && event.session_id() == session_id {
                        break;
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!(session_id = %session_id, "Interrupted, session keeps running on the server");
                    break;
                }
            }
        }
        self.reconciler.dispose();
        let snapshot = self.reconciler.snapshot(session_id);
        Ok(serde_json::to_string(&snapshot.as_ref().map(SessionListItem::from))?)
    }
}

async fn run(cli: Cli) -> anyhow::Result<String> {
    let mut app = App::open(&cli)?;

    let output = match cli.command {
        Commands::Submit { pairs, watch } => {
            let context = context_from_pairs(pairs.iter().map(String::as_str));
            let session_id = app.reconciler.submit(context).await?;
            if watch {
                return app.watch(&session_id).await;
            }
            serde_json::to_string(&SubmitOutput { session_id })?
        }

        Commands::Watch { session_id } => {
            let restored = app.reconciler.restore().await;
            let target = match (session_id, restored) {
                (None, RestoreOutcome::Polling { session_id }) => session_id,
                (None, outcome) => return Ok(serde_json::to_string(&outcome)?),
                (Some(id), _) if app.reconciler.polling_session().as_deref() == Some(id.as_str()) => id,
                (Some(id), _) => match app.reconciler.continue_session(&id).await? {
                    ContinueOutcome::Tracking { session_id } => session_id,
                    results => return Ok(serde_json::to_string(&results)?),
                },
            };
            return app.watch(&target).await;
        }

        Commands::Status { session_id } => {
            let report = app.gateway.get_status(&session_id).await?;
            serde_json::to_string(&StatusOutput {
                session_id,
                status: report.status.to_string(),
                progress_percent: report.progress_percent,
                current_step_label: report.current_step_label,
                completed_steps: report.completed_steps.into_iter().collect(),
                has_results: report.results.is_some(),
                error: report.error,
            })?
        }

        Commands::List { remote } => {
            let sessions = if remote {
                app.reconciler.sync_history().await
            } else {
                app.reconciler.history()
            };
            let items: Vec<SessionListItem> = sessions.iter().map(SessionListItem::from).collect();
            serde_json::to_string(&items)?
        }

        Commands::Pause => {
            app.reconciler.pause_active().await?;
            serde_json::to_string(&DoneOutput {
                session_id: app.reconciler.active_session(),
                ok: true,
                removed: None,
            })?
        }

        Commands::Resume => {
            app.reconciler.resume_active().await?;
            serde_json::to_string(&DoneOutput {
                session_id: app.reconciler.active_session(),
                ok: true,
                removed: None,
            })?
        }

        Commands::Save { session_id } => {
            app.reconciler.save(&session_id).await?;
            serde_json::to_string(&DoneOutput {
                session_id: Some(session_id),
                ok: true,
                removed: None,
            })?
        }

        Commands::Continue { session_id } => {
            let outcome = app.reconciler.continue_session(&session_id).await?;
            serde_json::to_string(&outcome)?
        }

        Commands::Step { session_id, step } => {
            app.reconciler.select_session(&session_id)?;
            let continuation = app.reconciler.resume_from_step(step).await?;
            serde_json::to_string(&StepOutput {
                session_id,
                step: continuation.step,
                context_keys: continuation.context.keys().cloned().collect(),
            })?
        }

        Commands::Delete { session_id } => {
            app.reconciler.delete(&session_id).await?;
            serde_json::to_string(&DoneOutput {
                session_id: Some(session_id),
                ok: true,
                removed: None,
            })?
        }

        Commands::Clear => {
            let removed = app.reconciler.clear_all().await?;
            serde_json::to_string(&DoneOutput {
                session_id: None,
                ok: true,
                removed: Some(removed),
            })?
        }
    };

    app.reconciler.dispose();
    Ok(output)
}

// ============ Main ============

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "analysis_sessions=info".into()),
        )
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(json) => println!("{}", json),
        Err(e) => {
            let error = ErrorOutput { error: format!("{:#}", e) };
            println!("{}", serde_json::to_string(&error).unwrap_or_default());
            std::process::exit(1);
        }
    }
}
