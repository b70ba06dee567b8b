use anyhow::{Context, Result};
use blockcore::{ExecutionEvent, Flow, LogLevel, NodeSpec, Value};
use blockruntime::{EngineConfig, FlowEngine, MemoryFlowStore};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "blockflow")]
#[command(about = "Block flow engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a flow file until Ctrl-C or the given duration
    Run {
        /// Path to flow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Stop after this many seconds
        #[arg(short, long)]
        duration: Option<u64>,

        /// Fire the input nodes once with this JSON payload after starting
        #[arg(short, long)]
        trigger: Option<String>,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a flow file against the built-in blocks
    Validate {
        /// Path to flow JSON file
        file: PathBuf,
    },

    /// List available block types
    Blocks,

    /// Create a new example flow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "flow.json")]
        output: PathBuf,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            duration,
            trigger,
            verbose,
        } => {
            init_logging(verbose);
            run_flow(&file, duration.map(Duration::from_secs), trigger).await?;
        }

        Commands::Validate { file } => {
            validate_flow(&file)?;
        }

        Commands::Blocks => {
            list_blocks();
        }

        Commands::Init { output } => {
            create_example_flow(&output)?;
        }
    }

    Ok(())
}

fn read_flow(file: &Path) -> Result<Flow> {
    let json = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    serde_json::from_str(&json).with_context(|| format!("failed to parse {}", file.display()))
}

async fn run_flow(file: &Path, duration: Option<Duration>, trigger: Option<String>) -> Result<()> {
    println!("Loading flow from: {}", file.display());

    let flow = read_flow(file)?;
    println!("Flow: {} ({})", flow.name, flow.id);
    println!("   Nodes: {}", flow.nodes.len());
    println!("   Connections: {}", flow.connections.len());
    println!();

    let payload = trigger
        .map(|raw| serde_json::from_str::<serde_json::Value>(&raw).map(Value::from))
        .transpose()
        .context("trigger payload must be valid JSON")?;

    let engine = FlowEngine::new(
        Arc::new(blocknodes::builtin_registry()),
        Arc::new(MemoryFlowStore::new()),
        EngineConfig::from_env(),
    );

    let mut events = engine.subscribe_events();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ExecutionEvent::FlowStarted { nodes, .. } => {
                    println!("Flow started with {} nodes", nodes);
                }
                ExecutionEvent::FlowStopped { .. } => {
                    println!("Flow stopped");
                }
                ExecutionEvent::NodeFailed { node_id, error, .. } => {
                    println!("  Node {} failed: {}", node_id, error);
                }
                ExecutionEvent::MessageDropped { source, target, .. } => {
                    println!("  Dropped message {} -> {}", source, target);
                }
                ExecutionEvent::NodeLog {
                    node_id,
                    level: LogLevel::Info | LogLevel::Warn | LogLevel::Error,
                    message,
                    ..
                } => {
                    println!("  [{}] {}", node_id, message);
                }
                _ => {}
            }
        }
    });

    let flow = engine.save_flow(flow).await?;
    tracing::debug!(flow_id = %flow.id, file = %file.display(), "starting flow");
    engine.start_flow(&flow.id).await?;

    if let Some(payload) = payload {
        let fired = engine.trigger_flow(&flow.id, Some(payload)).await?;
        println!("Triggered {} input node(s)", fired);
    }

    match duration {
        Some(limit) => {
            tokio::select! {
                _ = tokio::time::sleep(limit) => {}
                _ = tokio::signal::ctrl_c() => {}
            }
        }
        None => {
            println!("Running; press Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;
        }
    }

    engine.stop_flow(&flow.id).await?;
    let stats = engine.node_stats(&flow.id).await?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    event_task.abort();

    println!();
    println!("Node statistics:");
    let mut node_ids: Vec<_> = stats.keys().cloned().collect();
    node_ids.sort();
    for node_id in node_ids {
        let s = &stats[&node_id];
        println!(
            "   {}: received={} executions={} emitted={} failed={} dropped={}",
            node_id, s.received, s.executions, s.emitted, s.failed, s.dropped
        );
    }

    Ok(())
}

fn validate_flow(file: &Path) -> Result<()> {
    println!("Validating flow: {}", file.display());

    let flow = read_flow(file)?;
    let engine = FlowEngine::new(
        Arc::new(blocknodes::builtin_registry()),
        Arc::new(MemoryFlowStore::new()),
        EngineConfig::default(),
    );
    engine.executor().validate(&flow)?;

    println!("Flow is valid:");
    println!("   Name: {}", flow.name);
    println!("   Nodes: {}", flow.nodes.len());
    println!("   Connections: {}", flow.connections.len());

    Ok(())
}

fn list_blocks() {
    println!("Available block types:");
    println!();

    for info in blocknodes::builtin_registry().describe() {
        println!(
            "  {} ({}, {} in / {} out)",
            info.block_type, info.group, info.inputs, info.outputs
        );
        println!("    {}", info.description);
    }
}

fn create_example_flow(output: &Path) -> Result<()> {
    let mut flow = Flow::new("Example Math Flow");
    flow.description = Some("Injects a number, adds 3, doubles it and logs the result".to_string());
    flow.active = true;

    let inject = flow.add_node(
        NodeSpec::new("inject1", "inject")
            .with_name("Inject 5")
            .with_property("payload", 5.0)
            .with_property("interval", 1000.0)
            .with_position(100.0, 100.0),
    );
    let add = flow.add_node(
        NodeSpec::new("add1", "add")
            .with_name("Add 3")
            .with_property("value", 3.0)
            .with_position(300.0, 100.0),
    );
    let multiply = flow.add_node(
        NodeSpec::new("multiply1", "multiply")
            .with_name("Double")
            .with_property("value", 2.0)
            .with_position(500.0, 100.0),
    );
    let debug = flow.add_node(
        NodeSpec::new("debug1", "debug")
            .with_name("Log Result")
            .with_property("prefix", "result")
            .with_position(700.0, 100.0),
    );

    flow.connect(inject, 0, add.clone(), 0);
    flow.connect(add, 0, multiply.clone(), 0);
    flow.connect(multiply, 0, debug, 0);

    let json = serde_json::to_string_pretty(&flow)?;
    std::fs::write(output, json)?;

    println!("Created example flow: {}", output.display());
    println!();
    println!("Run it with:");
    println!("  blockflow run --file {} --duration 5", output.display());

    Ok(())
}
