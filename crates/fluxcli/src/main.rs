use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use fluxcore::{EventKind, ExecutionEvent, NodeDefinition, RunState, Workflow};
use fluxruntime::{FlowRuntime, RuntimeConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "flux")]
#[command(about = "Flux workflow engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow file
    Run {
        /// Path to workflow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Input data as JSON (object, array or scalar)
        #[arg(short, long)]
        input: Option<String>,

        /// Maximum number of nodes running at once
        #[arg(long)]
        max_parallel: Option<usize>,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a workflow file and print its execution layers
    Validate {
        /// Path to workflow JSON file
        file: PathBuf,
    },

    /// List available node types
    Nodes,

    /// Create a new example workflow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "workflow.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            input,
            max_parallel,
            verbose,
        } => {
            let default_level = if verbose { "debug" } else { "info" };
            tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| EnvFilter::new(default_level)),
                )
                .init();

            run_workflow(&file, input, max_parallel).await?;
        }

        Commands::Validate { file } => {
            validate_workflow(&file)?;
        }

        Commands::Nodes => {
            list_nodes();
        }

        Commands::Init { output } => {
            create_example_workflow(&output)?;
        }
    }

    Ok(())
}

fn runtime(config: RuntimeConfig) -> FlowRuntime {
    FlowRuntime::with_registry(Arc::new(fluxnodes::default_registry()), config)
}

fn load_workflow(file: &Path) -> Result<Workflow> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("Cannot read {}", file.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid workflow JSON in {}", file.display()))
}

async fn run_workflow(file: &Path, input: Option<String>, max_parallel: Option<usize>) -> Result<()> {
    println!("🚀 Loading workflow from: {}", file.display());
    let workflow = load_workflow(file)?;

    println!("📋 Workflow: {}", workflow.name);
    println!("   Nodes: {}", workflow.nodes.len());
    println!("   Connections: {}", workflow.connections.len());
    println!();

    let input: serde_json::Value = match input {
        Some(raw) => serde_json::from_str(&raw).context("Input must be valid JSON")?,
        None => serde_json::Value::Null,
    };

    let mut config = RuntimeConfig::default();
    if let Some(max_parallel) = max_parallel {
        config.max_parallel_nodes = max_parallel;
    }
    let runtime = runtime(config);

    let mut handle = runtime.start(workflow, input).await;
    let cancellation = handle.cancellation_token();
    let mut interrupted = false;
    loop {
        tokio::select! {
            event = handle.events.recv() => match event {
                Some(event) => print_event(&event),
                None => break,
            },
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                println!("🛑 Interrupted, cancelling...");
                interrupted = true;
                cancellation.cancel();
            }
        }
    }

    let report = handle.wait().await?;

    println!();
    println!("📊 Execution Summary:");
    println!("   Execution ID: {}", report.execution_id);
    println!("   Status: {:?}", report.status);

    if !report.data.is_empty() {
        println!();
        println!("📤 Outputs:");
        for (node_name, items) in &report.data {
            println!("   Node {} ({} items):", node_name, items.len());
            for item in items {
                println!("     {}", serde_json::Value::Object(item.json.clone()));
            }
        }
    }

    match report.status {
        RunState::Succeeded => Ok(()),
        status => bail!(
            "Execution {:?}: {}",
            status,
            report.error.unwrap_or_else(|| "see node errors above".to_string())
        ),
    }
}

fn print_event(event: &ExecutionEvent) {
    let node = event.node_name.as_deref().unwrap_or("?");
    let progress = event
        .progress
        .map(|p| format!(" [{}/{}]", p.completed, p.total))
        .unwrap_or_default();

    match event.kind {
        EventKind::ExecutionStart => println!("▶️  Execution started"),
        EventKind::NodeStart => println!(
            "  ⚡ Starting node: {} ({})",
            node,
            event.node_type.as_deref().unwrap_or("?")
        ),
        EventKind::NodeComplete => {
            let items = event.data.as_ref().map(Vec::len).unwrap_or(0);
            println!("  ✅ Node {} completed with {} items{}", node, items, progress);
        }
        EventKind::NodeError => println!(
            "  ❌ Node {} failed: {}",
            node,
            event.error.as_deref().unwrap_or("unknown error")
        ),
        EventKind::ExecutionResult => {}
        EventKind::ExecutionComplete => println!("✨ Execution finished{}", progress),
        EventKind::ExecutionError => println!(
            "💥 Execution failed: {}",
            event.error.as_deref().unwrap_or("unknown error")
        ),
    }
}

fn validate_workflow(file: &Path) -> Result<()> {
    println!("🔍 Validating workflow: {}", file.display());

    let workflow = load_workflow(file)?;
    let plan = runtime(RuntimeConfig::default())
        .validate(&workflow)
        .context("Workflow is invalid")?;

    println!("✅ Workflow is valid:");
    println!("   Name: {}", workflow.name);
    println!("   Nodes: {} ({} scheduled)", workflow.nodes.len(), plan.scheduled_count());
    println!("   Connections: {}", workflow.connections.len());
    println!("   Layers:");
    for (depth, layer) in plan.layers().iter().enumerate() {
        println!("     {}: {}", depth, layer.join(", "));
    }

    Ok(())
}

fn list_nodes() {
    println!("📦 Available Node Types:");
    println!();

    let registry = fluxnodes::default_registry();

    for node_type in registry.list_node_types() {
        if let Some(metadata) = registry.get_metadata(&node_type) {
            println!("  • {} ({})", node_type, metadata.category);
            println!("    {}", metadata.description);
            let outputs: Vec<&str> = metadata.outputs.iter().map(|p| p.name.as_str()).collect();
            println!("    outputs: {}", outputs.join(", "));
        } else {
            println!("  • {}", node_type);
        }
    }
}

fn create_example_workflow(output: &Path) -> Result<()> {
    let mut workflow = Workflow::new("Example Routing Workflow");
    workflow.description = Some("Routes large orders away from small ones".to_string());

    let start = workflow.add_node(NodeDefinition::new("Start", "trigger.manual").with_position(0.0, 100.0));
    let check = workflow.add_node(
        NodeDefinition::new("Large Order", "flow.if")
            .with_parameter("field", "amount")
            .with_parameter("operation", "gt")
            .with_parameter("value", 100)
            .with_position(200.0, 100.0),
    );
    let large = workflow.add_node(
        NodeDefinition::new("Log Large", "debug.log")
            .with_parameter("label", "large")
            .with_position(400.0, 0.0),
    );
    let small = workflow.add_node(
        NodeDefinition::new("Log Small", "debug.log")
            .with_parameter("label", "small")
            .with_position(400.0, 200.0),
    );

    workflow.connect(start, check.clone());
    workflow.connect_slots(check.clone(), "true", large, fluxcore::MAIN_SLOT);
    workflow.connect_slots(check, "false", small, fluxcore::MAIN_SLOT);

    let json = serde_json::to_string_pretty(&workflow)?;
    std::fs::write(output, json)?;

    println!("✨ Created example workflow: {}", output.display());
    println!();
    println!("Run it with:");
    println!(
        "  flux run --file {} --input '[{{\"amount\": 250}}, {{\"amount\": 20}}]'",
        output.display()
    );

    Ok(())
}
