//! DeepNote CLI — save notes to a git-backed archive and dig into them.
//!
//! Run `deepnote init` to write a config file, then `deepnote serve` to expose
//! the LINE webhook and the REST API, or `deepnote chat` to talk to the assistant
//! from a terminal.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use colored::*;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use deepnote_core::config::DeepNoteConfig;
use deepnote_core::message::{Channel, InboundMessage};
use deepnote_core::{NoteAssistant, Turn};
use deepnote_hub::api::{ApiState, start_server};
use deepnote_hub::providers::OpenAiProvider;
use deepnote_hub::stores::{GitHubConfig, GitHubDocumentStore};

// ─── CLI Definition ────────────────────────────────────────

/// DeepNote — capture notes from chat and dig deeper with guided questions
#[derive(Parser)]
#[command(name = "deepnote", version, about, long_about = None)]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server (REST API, LINE webhook, scheduled actions)
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(long)]
        port: Option<u16>,

        /// Seconds between stale-session sweeps
        #[arg(long, default_value_t = 60)]
        sweep_secs: u64,
    },

    /// Interactive deep-dive session in the terminal
    Chat,

    /// Send a single message and print the reply
    Send {
        /// The message to send
        message: String,

        /// Session key
        #[arg(short, long, default_value = "cli")]
        session: String,
    },

    /// Print a random past day's notes
    Review,

    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

// ─── Helpers ───────────────────────────────────────────────

fn config_path(cli_path: Option<PathBuf>) -> PathBuf {
    cli_path.unwrap_or_else(DeepNoteConfig::default_path)
}

/// Config file, then environment overrides, then validation.
fn load_config(path: &Path) -> anyhow::Result<DeepNoteConfig> {
    let mut config = DeepNoteConfig::load(path)?;
    config.apply_env();
    tracing::debug!("Config loaded from {}", path.display());
    config.validate().map_err(|e| {
        anyhow::anyhow!(
            "{}\n\nSet the variables above, or run {} and edit {}",
            e,
            "deepnote init".cyan(),
            path.display()
        )
    })?;
    Ok(config)
}

fn build_assistant(config: &DeepNoteConfig) -> anyhow::Result<Arc<NoteAssistant>> {
    let store = GitHubDocumentStore::new(GitHubConfig::from_settings(&config.archive)?)?;
    let provider = OpenAiProvider::new(config.provider.clone());
    let assistant = NoteAssistant::new(Arc::new(store), Arc::new(provider), config)?;
    Ok(Arc::new(assistant))
}

fn print_turn(turn: &Turn) {
    for reply in &turn.replies {
        if turn.success {
            println!("{}", reply);
        } else {
            println!("{}", reply.yellow());
        }
        println!();
    }
    if let Some(err) = &turn.error {
        println!("  {} {}", "error:".red(), err.dimmed());
    }
    println!("  {} {}", "state:".dimmed(), turn.state.as_str().cyan());
}

// ─── Commands ──────────────────────────────────────────────

async fn run_serve(
    config: DeepNoteConfig,
    host: Option<String>,
    port: Option<u16>,
    sweep_secs: u64,
) -> anyhow::Result<()> {
    let host = host.unwrap_or_else(|| config.server.host.clone());
    let port = port.unwrap_or(config.server.port);
    let assistant = build_assistant(&config)?;

    println!();
    println!("  {} {}", "Mode:".dimmed(), "HTTP server".green().bold());
    println!("  {} {}", "Model:".dimmed(), config.provider.model.cyan());
    println!(
        "  {} {}",
        "Archive:".dimmed(),
        format!(
            "{}/{}@{}",
            config.archive.owner.as_deref().unwrap_or("?"),
            config.archive.repository.as_deref().unwrap_or("?"),
            config.archive.branch
        )
        .cyan()
    );
    println!(
        "  {} {}",
        "LINE:".dimmed(),
        if config.line.is_some() {
            "configured".green()
        } else {
            "not configured".yellow()
        }
    );
    println!(
        "  {} {}",
        "Endpoint:".dimmed(),
        format!("http://{}:{}", host, port).green().bold()
    );
    println!();
    println!("  {}", "Endpoints:".bold());
    println!("    {} — Health check", "GET  /health".cyan());
    println!("    {} — Send a message", "POST /api/message".cyan());
    println!("    {} — Session status", "GET  /api/session/{id}".cyan());
    println!("    {} — LINE webhook", "POST /callback".cyan());
    println!("    {} — reminder | review | sweep", "POST /actions".cyan());
    println!();

    let state = ApiState::new(assistant, &config);
    start_server(state, &host, port, Duration::from_secs(sweep_secs.max(1))).await
}

async fn run_chat(config: DeepNoteConfig) -> anyhow::Result<()> {
    let assistant = build_assistant(&config)?;
    let timeout = config.deep_dive.api_timeout_minutes;

    println!();
    println!("  {}", "DeepNote chat".green().bold());
    println!(
        "  {}",
        "Type a memo to save it. Ctrl-D or /quit to leave.".dimmed()
    );
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{} ", ">".cyan().bold());
        io::stdout().flush().ok();

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            break;
        }

        let msg = InboundMessage::text(Channel::Cli, "cli", line);
        let turn = assistant.handle(msg, timeout).await;
        println!();
        print_turn(&turn);
        println!();
    }

    println!("{}", "Bye!".dimmed());
    Ok(())
}

async fn run_send(config: DeepNoteConfig, message: &str, session: &str) -> anyhow::Result<()> {
    let assistant = build_assistant(&config)?;
    let msg = InboundMessage::text(Channel::Cli, session, message);
    let turn = assistant
        .handle(msg, config.deep_dive.api_timeout_minutes)
        .await;
    print_turn(&turn);
    if !turn.success {
        anyhow::bail!("message was not processed");
    }
    Ok(())
}

async fn run_review(config: DeepNoteConfig) -> anyhow::Result<()> {
    let assistant = build_assistant(&config)?;
    let mut rng = StdRng::from_entropy();
    let text = assistant.review(&mut rng, chrono::Utc::now()).await?;
    println!("{}", text);
    Ok(())
}

fn run_init(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        println!(
            "  {} {} already exists (use {} to overwrite)",
            "!".yellow(),
            path.display(),
            "--force".cyan()
        );
        return Ok(());
    }
    DeepNoteConfig::default().save(path)?;
    println!("  {} Wrote {}", "✓".green(), path.display());
    println!(
        "  {}",
        "Fill in the archive and provider sections, or set the matching environment variables."
            .dimmed()
    );
    Ok(())
}

// ─── Main ──────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,deepnote_core=debug,deepnote_hub=debug")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let path = config_path(cli.config);

    match cli.command {
        Commands::Init { force } => run_init(&path, force)?,
        Commands::Serve {
            host,
            port,
            sweep_secs,
        } => run_serve(load_config(&path)?, host, port, sweep_secs).await?,
        Commands::Chat => run_chat(load_config(&path)?).await?,
        Commands::Send { message, session } => {
            run_send(load_config(&path)?, &message, &session).await?
        }
        Commands::Review => run_review(load_config(&path)?).await?,
    }

    Ok(())
}
