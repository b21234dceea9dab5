//! questline CLI entry point.

use questline::acp::StubRequestHandler;
use questline::config::Config;
use questline::connection::WebSocketTransport;
use questline::state::{ChatItem, SessionState};
use questline::{Engine, QuestId};

use anyhow::Context as _;
use clap::Parser;
use std::collections::HashMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt as _, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "questline")]
#[command(about = "Drive coding-agent quests over the Agent Client Protocol")]
struct Cli {
    /// Path to config file (optional)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Agent WebSocket endpoint, overrides the config file
    #[arg(short, long)]
    url: Option<String>,

    /// Working directory for the first quest
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // CLI flags are the last layer, so validate only after applying them.
    let mut config = Config::load_unvalidated(cli.config.as_deref()).with_context(|| {
        match &cli.config {
            Some(path) => format!("failed to load config from {}", path.display()),
            None => "failed to load configuration".to_string(),
        }
    })?;
    if let Some(url) = cli.url {
        config.server_url = url;
    }
    if let Some(cwd) = cli.cwd {
        config.cwd = cwd;
    }
    let config = config.validated().context("invalid configuration")?;

    // Logs go to stderr so stdout stays the transcript.
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else if let Ok(filter) = EnvFilter::try_from_default_env() {
        filter
    } else {
        EnvFilter::new(config.log_filter.as_deref().unwrap_or("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Several rustls backends may be linked in; pick ring explicitly.
    let _ = rustls::crypto::ring::default_provider().install_default();

    tracing::info!(url = %config.server_url, "starting questline");

    let engine = Engine::spawn(
        Arc::new(WebSocketTransport::new(config.server_url.clone())),
        config.reconnect,
        Arc::new(StubRequestHandler),
    );
    engine.connect();
    engine
        .wait_until_initialized()
        .await
        .context("agent never completed initialize")?;

    let quest_id = engine
        .create_quest(&config.cwd)
        .await
        .context("failed to open the first quest")?;
    println!("[{quest_id}] ready in {}", config.cwd.display());

    let printer = tokio::spawn(print_transcripts(engine.clone()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received");
                None
            }
        };
        let Some(line) = line else {
            break;
        };
        match run_command(&engine, &config.cwd, line.trim()).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(error) => eprintln!("error: {error:#}"),
        }
    }

    printer.abort();
    engine.shutdown();
    tracing::info!("questline stopped");
    Ok(())
}

/// Handle one input line. Returns `false` to quit.
async fn run_command(engine: &Engine, default_cwd: &Path, line: &str) -> anyhow::Result<bool> {
    if line.is_empty() {
        return Ok(true);
    }
    let Some(command) = line.strip_prefix('/') else {
        engine.send_prompt(line)?;
        return Ok(true);
    };

    let (name, argument) = match command.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (command, ""),
    };

    match name {
        "quit" | "exit" => return Ok(false),
        "new" => {
            let cwd = if argument.is_empty() {
                default_cwd.to_path_buf()
            } else {
                PathBuf::from(argument)
            };
            let quest_id = engine.create_quest(&cwd).await?;
            println!("[{quest_id}] opened in {}", cwd.display());
        }
        "switch" => {
            anyhow::ensure!(!argument.is_empty(), "usage: /switch <quest-id>");
            engine.switch_quest(argument);
        }
        "close" => {
            let quest_id = if argument.is_empty() {
                engine
                    .snapshot()
                    .active_quest_id
                    .context("no active quest")?
            } else {
                argument.to_string()
            };
            engine.close_quest(&quest_id);
        }
        "cancel" => engine.cancel_prompt()?,
        "model" => {
            anyhow::ensure!(!argument.is_empty(), "usage: /model <model-id>");
            engine.set_model(argument)?;
        }
        "mode" => {
            anyhow::ensure!(!argument.is_empty(), "usage: /mode <mode-id>");
            engine.set_mode(argument)?;
        }
        "allow" => {
            anyhow::ensure!(!argument.is_empty(), "usage: /allow <option-id>");
            engine.respond_permission(argument)?;
        }
        "quests" => print_quests(&engine.snapshot()),
        other => anyhow::bail!("unknown command /{other}"),
    }
    Ok(true)
}

fn print_quests(state: &SessionState) {
    for quest in &state.quests {
        let marker = if state.active_quest_id.as_deref() == Some(quest.id.as_str()) {
            "*"
        } else {
            " "
        };
        let activity = if quest.processing { "working" } else { "idle" };
        println!(
            "{marker} {} {:?} model={} mode={} {activity}",
            quest.id, quest.title, quest.current_model_id, quest.current_mode_id
        );
    }
}

/// What has already been printed for one transcript item.
#[derive(Default)]
struct Printed {
    text_len: usize,
    status: Option<String>,
}

/// Echo new agent text, tool call status changes and permission prompts.
async fn print_transcripts(engine: Engine) {
    let mut state = engine.subscribe();
    let mut printed: HashMap<(QuestId, u64), Printed> = HashMap::new();
    let mut announced_permission = None;

    loop {
        {
            let snapshot = state.borrow_and_update();
            for quest in &snapshot.quests {
                for item in &quest.transcript {
                    let key = (quest.id.clone(), item.id().0);
                    let seen = printed.entry(key).or_default();
                    match item {
                        ChatItem::Agent { text, .. } if text.len() > seen.text_len => {
                            print!("{}", &text[seen.text_len..]);
                            let _ = std::io::stdout().flush();
                            seen.text_len = text.len();
                        }
                        ChatItem::ToolCall(call) => {
                            let status = call.status.to_string();
                            if seen.status.as_deref() != Some(status.as_str()) {
                                println!(
                                    "\n[{}] tool {} {status}: {}",
                                    quest.id, call.tool_call_id, call.title
                                );
                                seen.status = Some(status);
                            }
                        }
                        _ => {}
                    }
                }
            }

            if let Some(pending) = &snapshot.pending_permission {
                if announced_permission.as_ref() != Some(&pending.request_id) {
                    let options: Vec<&str> = pending
                        .request
                        .options
                        .iter()
                        .map(|option| option.option_id.as_str())
                        .collect();
                    println!(
                        "\n[{}] permission needed for {}; answer with /allow <{}>",
                        pending.quest_id,
                        pending.request.tool_call.title.as_deref().unwrap_or("a tool call"),
                        options.join("|")
                    );
                    announced_permission = Some(pending.request_id.clone());
                }
            }
        }

        if state.changed().await.is_err() {
            break;
        }
    }
}
