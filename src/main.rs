use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use ctfpilot::backend::{LlmBackend, LlmBackendConfig};
use ctfpilot::config::ProviderKind;
use ctfpilot::events::{handler, EventPayload, ToolPhase, UserCommand};
use ctfpilot::matcher::RegexMatcher;
use ctfpilot::providers::{AnthropicProvider, LLMProvider, OpenAIProvider};
use ctfpilot::storage::{JsonFileStore, SessionStore};
use ctfpilot::{Config, EventBus, EventKind, Orchestrator, OrchestratorHandle, SessionId};

#[derive(Parser)]
#[command(name = "ctfpilot")]
#[command(about = "Pausable LLM agent runs against CTF targets", long_about = None)]
#[command(version)]
struct Cli {
    /// TOML config file; environment variables override its values
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new session
    Run {
        #[arg(help = "Target host, URL or challenge description")]
        target: String,
        #[arg(short, long)]
        instruction: Option<String>,
    },
    /// Continue an unfinished session
    Resume {
        id: SessionId,
        #[arg(short, long)]
        instruction: Option<String>,
    },
    /// Inspect stored sessions
    Sessions {
        #[command(subcommand)]
        command: SessionCommands,
    },
}

#[derive(Subcommand)]
enum SessionCommands {
    List,
    Show { id: SessionId },
    Delete { id: SessionId },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env(),
    };

    match cli.command {
        Commands::Run {
            target,
            instruction,
        } => run_session(&config, Launch::New { target, instruction }).await?,
        Commands::Resume { id, instruction } => {
            run_session(&config, Launch::Restore { id, instruction }).await?
        }
        Commands::Sessions { command } => manage_sessions(&config, command).await?,
    }

    Ok(())
}

enum Launch {
    New {
        target: String,
        instruction: Option<String>,
    },
    Restore {
        id: SessionId,
        instruction: Option<String>,
    },
}

fn build_provider(config: &Config) -> Result<Arc<dyn LLMProvider>> {
    let api_key = config
        .api_key()
        .context("no API key configured for the selected provider")?
        .to_string();

    let provider: Arc<dyn LLMProvider> = match (config.provider, config.model.clone()) {
        (ProviderKind::Anthropic, Some(model)) => {
            Arc::new(AnthropicProvider::new(api_key).with_model(model))
        }
        (ProviderKind::Anthropic, None) => Arc::new(AnthropicProvider::new(api_key)),
        (ProviderKind::OpenAI, Some(model)) => {
            Arc::new(OpenAIProvider::new(api_key).with_model(model))
        }
        (ProviderKind::OpenAI, None) => Arc::new(OpenAIProvider::new(api_key)),
    };
    Ok(provider)
}

async fn run_session(config: &Config, launch: Launch) -> Result<()> {
    let backend = LlmBackend::with_config(
        build_provider(config)?,
        LlmBackendConfig {
            max_turns: config.max_turns,
            ..LlmBackendConfig::default()
        },
    );
    let store: Arc<dyn SessionStore> = Arc::new(JsonFileStore::new(&config.sessions_dir));
    let bus = Arc::new(EventBus::new());
    subscribe_printer(&bus);

    let mut orchestrator = Orchestrator::new(
        backend,
        store,
        bus.clone(),
        Arc::new(RegexMatcher::default()),
    )
    .with_config(config.orchestrator());

    let handle = orchestrator.handle();
    let _bridge = handle.attach(&bus);
    let lines = spawn_line_reader(std::io::BufReader::new(std::io::stdin()));
    let console = tokio::spawn(read_console(bus.clone(), handle, lines));

    let record = match launch {
        Launch::New {
            target,
            instruction,
        } => orchestrator.start(&target, instruction.as_deref()).await?,
        Launch::Restore { id, instruction } => {
            orchestrator.restore(id, instruction.as_deref()).await?
        }
    };
    console.abort();

    println!("\nSession {} finished: {}", record.id, record.status.as_str());
    if let Some(error) = &record.last_error {
        println!("Error: {}", error);
    }
    println!("Cost: ${:.4}", record.accumulated_cost);
    for found in &record.matches_found {
        println!("  {}", found.value);
    }

    Ok(())
}

fn subscribe_printer(bus: &EventBus) {
    let printer = handler(|event| {
        match &event.payload {
            EventPayload::StateChanged { from, to, .. } => println!("[state] {} -> {}", from, to),
            EventPayload::Message { text } => println!("{}", text),
            EventPayload::ToolStatus { tool, phase, .. } => match phase {
                ToolPhase::Started => println!("[tool] {} ...", tool),
                ToolPhase::Finished => println!("[tool] {} done", tool),
                ToolPhase::Failed => println!("[tool] {} failed", tool),
            },
            EventPayload::MatchFound { value, .. } => println!("[match] {}", value),
            EventPayload::UserCommand { .. } | EventPayload::UserInput { .. } => {}
        }
        Ok(())
    });

    for kind in [
        EventKind::StateChanged,
        EventKind::Message,
        EventKind::ToolStatus,
        EventKind::MatchFound,
    ] {
        bus.subscribe(kind, printer.clone());
    }
}

/// Forwards lines from `reader` until EOF or a read error.
///
/// Runs on a plain thread: a blocking read cannot be cancelled, and parked on
/// the runtime's blocking pool it would hold up shutdown until the next line.
fn spawn_line_reader<R>(reader: R) -> mpsc::UnboundedReceiver<String>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in reader.lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// `pause`, `resume [text]` and `stop` become commands; any other line is new input.
async fn read_console(
    bus: Arc<EventBus>,
    handle: OrchestratorHandle,
    mut lines: mpsc::UnboundedReceiver<String>,
) {
    while let Some(line) = lines.recv().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line.split_once(' ').unwrap_or((line, "")) {
            ("pause", _) => bus.emit_user_command(UserCommand::Pause),
            ("stop", _) => bus.emit_user_command(UserCommand::Stop),
            ("resume", rest) => bus.emit_user_command(UserCommand::Resume {
                instruction: Some(rest.to_string()).filter(|r| !r.trim().is_empty()),
            }),
            ("status", _) => println!("[state] {}", handle.state()),
            _ => bus.emit_user_input(line),
        }
    }
}

async fn manage_sessions(config: &Config, command: SessionCommands) -> Result<()> {
    let store = JsonFileStore::new(&config.sessions_dir);

    match command {
        SessionCommands::List => {
            let records = store.list().await?;
            if records.is_empty() {
                println!("No sessions in {}", store.dir().display());
            }
            for record in records {
                println!(
                    "{}  {:<9}  {:>3} match(es)  {}  {}",
                    record.id,
                    record.status.as_str(),
                    record.matches_found.len(),
                    record.updated_at.format("%Y-%m-%d %H:%M"),
                    record.target
                );
            }
        }
        SessionCommands::Show { id } => {
            let record = store
                .load(id)
                .await?
                .with_context(|| format!("session {} not found", id))?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        SessionCommands::Delete { id } => {
            if store.delete(id).await? {
                println!("Deleted session {}", id);
            } else {
                println!("Session {} not found", id);
            }
        }
    }

    Ok(())
}
