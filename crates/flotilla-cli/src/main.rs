//! Flotilla - multi-agent orchestration over local models and MCP tool
//! servers.
//!
//! A thin presentation layer: build a session from flags and config,
//! send queries, render the event stream. All orchestration lives in
//! `flotilla-core`.

use std::collections::HashMap;
use std::io::Write as _;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;

use flotilla_core::agent::AgentEvent;
use flotilla_core::config::SessionConfig;
use flotilla_core::constants::{config_dir, DEFAULT_HOST};
use flotilla_core::mcp::discovery;
use flotilla_core::trace::TraceLevel;
use flotilla_core::{RuntimeError, Session};

/// Multi-agent orchestration over local models and MCP tool servers
#[derive(Parser)]
#[command(name = "flotilla", version, about)]
struct Cli {
    /// Path to an MCP server script (repeatable)
    #[arg(long = "mcp-server")]
    mcp_server: Vec<String>,

    /// URL of an HTTP-class MCP server (repeatable)
    #[arg(long = "mcp-server-url")]
    mcp_server_url: Vec<String>,

    /// JSON file with an mcpServers map
    #[arg(long = "servers-json")]
    servers_json: Option<PathBuf>,

    /// Import servers from the canonical client config
    #[arg(long = "auto-discovery")]
    auto_discovery: bool,

    /// Model name (overrides the configured model)
    #[arg(long)]
    model: Option<String>,

    /// Model endpoint host
    #[arg(long)]
    host: Option<String>,

    /// Process one query and exit
    #[arg(long)]
    query: Option<String>,

    /// Suppress progress output; print only the final reply
    #[arg(long)]
    quiet: bool,

    /// Enable the delegation trace
    #[arg(long = "trace-enabled")]
    trace_enabled: bool,

    /// Trace verbosity
    #[arg(long = "trace-level", value_parser = parse_trace_level)]
    trace_level: Option<TraceLevel>,

    /// Directory for trace documents
    #[arg(long = "trace-dir")]
    trace_dir: Option<PathBuf>,
}

fn parse_trace_level(s: &str) -> Result<TraceLevel, String> {
    s.parse()
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<i32> {
    init_logging()?;

    let config_path = SessionConfig::default_path();
    let mut config = SessionConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    apply_overrides(&mut config, &cli)?;

    let host = cli
        .host
        .clone()
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    let working_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

    let session = Session::new(config, config_path, working_dir, host).await?;

    let code = match &cli.query {
        Some(query) => run_once(&session, query, cli.quiet).await,
        None => run_interactive(&session, cli.quiet).await,
    }?;

    session.close().await;
    Ok(code)
}

/// Merge CLI flags into the loaded config.
fn apply_overrides(config: &mut SessionConfig, cli: &Cli) -> Result<()> {
    if let Some(model) = &cli.model {
        config.model = model.clone();
    }

    let mut extra: HashMap<String, _> = HashMap::new();
    for script in &cli.mcp_server {
        let (name, server) = discovery::server_from_script(script)?;
        extra.insert(name, server);
    }
    for url in &cli.mcp_server_url {
        let (name, server) = discovery::server_from_url(url)?;
        extra.insert(name, server);
    }
    if let Some(path) = &cli.servers_json {
        extra.extend(discovery::load_servers_file(path)?);
    }
    if cli.auto_discovery {
        extra.extend(discovery::discover_servers()?);
    }
    config.mcp_servers.extend(extra);

    if cli.trace_enabled {
        config.delegation.trace_enabled = true;
    }
    if let Some(level) = cli.trace_level {
        config.delegation.trace_enabled = level > TraceLevel::Off;
        config.delegation.trace_level = level;
    }
    if let Some(dir) = &cli.trace_dir {
        config.delegation.trace_dir = Some(dir.clone());
    }

    Ok(())
}

fn init_logging() -> Result<()> {
    use tracing_subscriber::EnvFilter;

    let log_dir = config_dir().join("logs");
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("creating {}", log_dir.display()))?;
    let log_file = std::fs::File::create(log_dir.join("flotilla.log"))
        .context("creating log file")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::sync::Mutex::new(log_file))
        .with_ansi(false)
        .init();
    Ok(())
}

/// What the renderer shows, from the quiet flag and display settings.
#[derive(Clone, Copy)]
struct RenderOptions {
    quiet: bool,
    show_tool_execution: bool,
    show_metrics: bool,
}

impl RenderOptions {
    async fn for_session(session: &Session, quiet: bool) -> Self {
        let config = session.config_snapshot().await;
        Self {
            quiet,
            show_tool_execution: config.display_settings.show_tool_execution,
            show_metrics: config.display_settings.show_metrics,
        }
    }
}

/// Spawn the event renderer for one query.
fn spawn_renderer(
    options: RenderOptions,
) -> (mpsc::UnboundedSender<AgentEvent>, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<AgentEvent>();
    let handle = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if options.quiet {
                continue;
            }
            match event {
                AgentEvent::PlanReady { task_count, .. } => {
                    println!("plan: {task_count} task(s)");
                }
                AgentEvent::TaskStarted {
                    task_id,
                    role,
                    attempt,
                } => {
                    if attempt > 1 {
                        println!("{task_id} [{role}] attempt {attempt}");
                    } else {
                        println!("{task_id} [{role}] started");
                    }
                }
                AgentEvent::TaskFinished { task_id, status } => {
                    println!("{task_id} {status}");
                }
                AgentEvent::ToolExecuting { label, name } => {
                    if options.show_tool_execution {
                        println!("  {label}: {name}...");
                    }
                }
                AgentEvent::ToolResult {
                    label,
                    name,
                    is_error,
                } => {
                    if is_error {
                        println!("  {label}: {name} failed");
                    }
                }
                AgentEvent::Notice { text } => {
                    println!("note: {text}");
                }
                AgentEvent::Metrics { metrics } => {
                    if options.show_metrics {
                        if let Some(tps) = metrics.tokens_per_second() {
                            println!(
                                "  [{} tokens, {:.1} tok/s]",
                                metrics.eval_count, tps
                            );
                        }
                    }
                }
                AgentEvent::AnswerDelta { .. } | AgentEvent::ThinkingDelta { .. } => {}
            }
        }
    });
    (tx, handle)
}

async fn run_once(session: &Session, query: &str, quiet: bool) -> Result<i32> {
    let options = RenderOptions::for_session(session, quiet).await;
    let (events, renderer) = spawn_renderer(options);

    match session.process_query(query, events).await {
        Ok(reply) => {
            let _ = renderer.await;
            println!("{reply}");
            Ok(0)
        }
        Err(e) => {
            let _ = renderer.await;
            eprintln!("error [{}]: {e}", e.tag());
            Ok(e.exit_code())
        }
    }
}

async fn run_interactive(session: &Session, quiet: bool) -> Result<i32> {
    use tokio::io::{AsyncBufReadExt, BufReader};

    println!(
        "flotilla - model {} - {} mode (commands: /mode /model <name> /reload /clear /quit)",
        session.model_name().await,
        session.mode().await
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        std::io::stdout().flush().ok();

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match line {
            "/quit" | "/exit" => break,
            "/mode" => {
                let mode = session.toggle_mode().await;
                println!("now in {mode} mode");
            }
            "/reload" => {
                session.reload_servers().await;
                println!("servers reloaded");
            }
            "/clear" => {
                session.clear_context().await;
                println!("context cleared");
            }
            _ if line.starts_with("/model ") => {
                let name = line.trim_start_matches("/model ").trim();
                session.set_model(name).await;
                println!("model set to {name}");
            }
            query => {
                let options = RenderOptions::for_session(session, quiet).await;
                let (events, renderer) = spawn_renderer(options);
                match session.process_query(query, events).await {
                    Ok(reply) => {
                        let _ = renderer.await;
                        println!("{reply}");
                    }
                    Err(e) => {
                        let _ = renderer.await;
                        eprintln!("error [{}]: {e}", e.tag());
                        if matches!(e, RuntimeError::Cancelled) {
                            break;
                        }
                    }
                }
            }
        }
    }

    Ok(0)
}
