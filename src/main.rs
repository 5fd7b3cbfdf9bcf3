mod cli;

use agent_gateway::collab::ConsoleTransport;
use agent_gateway::config::{default_config_path, load_config_with_source, GatewayConfig};
use agent_gateway::gate::{PolicyReloader, PolicySnapshot};
use agent_gateway::logging::resolve_level;
use agent_gateway::process::{ProcessClient, ProcessPool};
use agent_gateway::Orchestrator;
use anyhow::{Context, Result};
use clap::Parser;
use cli::{describe_config, parse_console_line, AskArgs, Cli, Commands, ConsoleInput};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;

const OUTBOX_DIR: &str = "outbox";

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments first to get debug flag
    let cli = Cli::parse();

    let explicit = cli.config.is_some();
    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let loaded = load_gateway_config(&config_path, explicit);

    // The configured level applies unless --debug is given
    let configured_level = loaded
        .as_ref()
        .map(|(config, _)| config.logging.level.clone())
        .unwrap_or_else(|_| "warn".to_string());
    tracing_subscriber::fmt()
        .with_max_level(resolve_level(cli.debug, &configured_level))
        .init();

    let (config, source) = loaded?;

    match cli.command {
        None => run_console(&config, &source, &config_path, &cli.user).await?,
        Some(Commands::Show) => println!("{}", describe_config(&config, &config_path)),
        Some(Commands::Check) => handle_check_command(&config, &source).await?,
        Some(Commands::Ask(args)) => handle_ask_command(&config, &source, &args).await?,
    }

    Ok(())
}

/// A missing default config file means "all defaults"; a missing explicit
/// one is an error.
fn load_gateway_config(path: &Path, explicit: bool) -> Result<(GatewayConfig, String)> {
    if !explicit && !path.exists() {
        return Ok((GatewayConfig::default(), String::new()));
    }
    load_config_with_source(path)
}

fn console_transport(config: &GatewayConfig) -> Arc<ConsoleTransport> {
    let files_dir = config
        .documents
        .output_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(OUTBOX_DIR));
    Arc::new(ConsoleTransport::new(files_dir, true))
}

/// Console chat loop (default mode when no subcommand is provided)
async fn run_console(config: &GatewayConfig, source: &str, config_path: &Path, default_user: &str) -> Result<()> {
    let orchestrator = Arc::new(Orchestrator::from_config(
        config,
        source,
        console_transport(config),
    )?);

    // Hot reload only makes sense for a file on disk
    let _reloader = if config_path.exists() {
        match PolicyReloader::watch(config_path, orchestrator.policy_store()) {
            Ok(reloader) => Some(reloader),
            Err(e) => {
                tracing::warn!("⚠️  Policy hot reload disabled: {:#}", e);
                None
            }
        }
    } else {
        None
    };

    println!("🎯 agent-gateway started");
    println!("📂 Config file: {}", config_path.display());
    println!("💬 Type `user: message` (or just a message as {}), `/cancel`, `/quit`", default_user);
    println!("🛑 Press Ctrl+C to stop");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut tasks = tokio::task::JoinSet::new();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read from stdin")? else {
                    break;
                };
                match parse_console_line(&line, default_user) {
                    None => {}
                    Some(ConsoleInput::Quit) => break,
                    Some(ConsoleInput::Cancel { user }) => {
                        let cancelled = orchestrator.cancel(&user);
                        println!("🛑 Cancelled {} request(s) of {}", cancelled, user);
                    }
                    Some(ConsoleInput::Message { user, text }) => {
                        let orchestrator = orchestrator.clone();
                        tasks.spawn(async move {
                            orchestrator.process(&user, &text).await;
                        });
                    }
                }
            }
            _ = signal::ctrl_c() => {
                println!("\n👋 Shutting down...");
                break;
            }
            // Reap finished request tasks so the set stays small
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = joined {
                    tracing::error!("❌ Request task failed: {}", e);
                }
            }
        }
    }

    // Requests still running are aborted; their subprocesses are killed on drop
    tasks.shutdown().await;
    Ok(())
}

async fn handle_ask_command(config: &GatewayConfig, source: &str, args: &AskArgs) -> Result<()> {
    let orchestrator = Orchestrator::from_config(config, source, console_transport(config))?;
    let response = orchestrator.process(&args.user, &args.text.join(" ")).await;
    if !response.is_ok() {
        anyhow::bail!("Request finished with status {}", response.status);
    }
    Ok(())
}

async fn handle_check_command(config: &GatewayConfig, source: &str) -> Result<()> {
    let snapshot =
        PolicySnapshot::compile(&config.security, source).context("Failed to compile security policy")?;
    println!("✅ Configuration is valid");
    println!(
        "🔐 Policy {}: {} content rules, {} whitelisted / {} blacklisted command patterns",
        snapshot.short_fingerprint(),
        snapshot.content_filter.len(),
        snapshot.command_guard.whitelist_len(),
        snapshot.command_guard.blacklist_len()
    );

    let pool = ProcessPool::from_section(&config.concurrency);
    let client = ProcessClient::locate(config.tool.clone(), pool).context("Failed to locate the AI tool")?;
    println!("🔧 AI tool: {}", client.program().display());
    match client.probe_version().await {
        Ok(version) => println!("   version: {}", version),
        Err(e) => println!("⚠️  Could not read tool version: {}", e),
    }

    match which::which(&config.documents.pandoc) {
        Ok(path) => println!("📄 pandoc: {}", path.display()),
        Err(_) => println!("📄 pandoc: not found (docx/pdf output unavailable)"),
    }

    if config.code_execution.enabled {
        println!("▶️  Code execution runtimes:");
        for (language, argv) in &config.code_execution.runtimes {
            let status = match argv.first().map(which::which) {
                Some(Ok(path)) => path.display().to_string(),
                _ => "not installed".to_string(),
            };
            println!("   {}: {} ({})", language, argv.join(" "), status);
        }
        for (language, argv) in &config.code_execution.compilers {
            let status = match argv.first().map(which::which) {
                Some(Ok(path)) => path.display().to_string(),
                _ => "not installed".to_string(),
            };
            println!("   {} (build): {} ({})", language, argv.join(" "), status);
        }
    } else {
        println!("▶️  Code execution disabled");
    }
    Ok(())
}
