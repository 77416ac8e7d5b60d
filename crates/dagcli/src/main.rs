use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use dagcore::{ContextMap, ExecutionEvent, NodeType, Value, WorkflowEvent, WorkflowSettings};
use dagruntime::{
    EdgeDefinition, ExecutionStatus, FlowRuntime, NodeDefinition, NodeRegistry, OrchestrationType,
    RuntimeConfig, WorkflowAssembler, WorkflowDefinition,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "dag")]
#[command(about = "Dependency-graph workflow engine CLI", long_about = None)]
struct Cli {
    /// Show debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow definition
    Run {
        /// Path to workflow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Initial context as a JSON object
        #[arg(short, long)]
        input: Option<String>,

        /// Runtime configuration JSON file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Check a workflow definition without running it
    Validate {
        /// Path to workflow JSON file
        file: PathBuf,
    },

    /// List available node kinds
    Nodes,

    /// Create a new example workflow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "workflow.json")]
        output: PathBuf,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_target(false)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Run {
            file,
            input,
            config,
        } => run_workflow(&file, input.as_deref(), config.as_deref()).await,
        Commands::Validate { file } => validate_workflow(&file),
        Commands::Nodes => {
            list_nodes();
            Ok(())
        }
        Commands::Init { output } => create_example_workflow(&output),
    }
}

fn load_definition(file: &Path) -> Result<WorkflowDefinition> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("reading workflow file {}", file.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing workflow file {}", file.display()))
}

fn load_config(file: Option<&Path>) -> Result<RuntimeConfig> {
    let Some(file) = file else {
        return Ok(RuntimeConfig::default());
    };
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("reading config file {}", file.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing config file {}", file.display()))
}

fn parse_input(input: Option<&str>) -> Result<ContextMap> {
    let Some(input) = input else {
        return Ok(ContextMap::new());
    };
    match serde_json::from_str::<Value>(input).context("parsing --input")? {
        Value::Object(fields) => Ok(fields.into_iter().collect()),
        _ => Err(anyhow!("Input must be a JSON object")),
    }
}

fn print_event(event: &ExecutionEvent) {
    let icon = match &event.event {
        WorkflowEvent::WorkflowStarted { .. } => "▶️ ",
        WorkflowEvent::WorkflowCompleted { .. } => "✨",
        WorkflowEvent::WorkflowFailed { .. } => "💥",
        WorkflowEvent::WorkflowStalled { .. } => "🧱",
        WorkflowEvent::WorkflowPaused { .. } | WorkflowEvent::WorkflowResumed { .. } => "⏯️ ",
        WorkflowEvent::NodeStarted { .. } => "  ⚡",
        WorkflowEvent::NodeCompleted { .. } => "  ✅",
        WorkflowEvent::NodeFailed { .. } => "  ❌",
        WorkflowEvent::NodeSkipped { .. } | WorkflowEvent::NodeCancelled { .. } => "  ⏭️ ",
        WorkflowEvent::NodeReset { .. } => "  ↩️ ",
    };
    println!("{} {}", icon, event.event.message());
}

async fn run_workflow(file: &Path, input: Option<&str>, config: Option<&Path>) -> Result<()> {
    println!("🚀 Loading workflow from: {}", file.display());

    let definition = load_definition(file)?;
    let inputs = parse_input(input)?;
    let config = load_config(config)?;

    println!("📋 Workflow: {}", definition.name);
    println!("   Nodes: {}", definition.nodes.len());
    println!("   Edges: {}", definition.edges.len());
    println!();

    let runtime = FlowRuntime::with_registry(Arc::new(dagnodes::standard_registry()), config);

    // Subscribe to events for real-time output
    let mut events = runtime.subscribe_events();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            print_event(&event);
        }
    });

    let id = runtime.register_workflow(definition).await?;
    let result = runtime.execute_workflow(&id, inputs).await?;
    let report = runtime
        .service()
        .status(&id)
        .await
        .into_data()
        .ok_or_else(|| anyhow!("workflow {} disappeared from the store", id))?;

    // Closing the bus ends the listener once every event is printed
    drop(runtime);
    if tokio::time::timeout(Duration::from_secs(1), event_task).await.is_err() {
        tracing::warn!("event listener did not finish");
    }

    println!();
    println!("📊 Execution Summary:");
    println!("   Run ID: {}", result.run_id);
    println!("   Status: {:?}", result.status);
    println!("   Completed: {}/{} nodes", result.completed_nodes, result.total_nodes);
    if let Some(duration) = result.duration_ms() {
        println!("   Duration: {}ms", duration);
    }
    if let Some(error) = &result.error_message {
        println!("   Error: {}", error);
    }

    if !report.context.is_empty() {
        println!();
        println!("📤 Context:");
        let mut keys: Vec<&String> = report.context.keys().collect();
        keys.sort();
        for key in keys {
            println!("   {}: {}", key, report.context[key]);
        }
    }

    if result.status != ExecutionStatus::Completed {
        bail!("workflow '{}' finished with status {:?}", report.name, result.status);
    }
    Ok(())
}

fn validate_workflow(file: &Path) -> Result<()> {
    println!("🔍 Validating workflow: {}", file.display());

    let definition = load_definition(file)?;
    let name = definition.name.clone();
    let registry = dagnodes::standard_registry();
    let command = definition.into_command(&registry)?;
    let workflow = WorkflowAssembler::new().assemble(command)?;

    println!("✅ Workflow is valid:");
    println!("   Name: {}", name);
    println!("   Nodes: {}", workflow.node_count());
    println!("   Edges: {}", workflow.edge_count());

    Ok(())
}

fn list_nodes() {
    println!("📦 Available Node Kinds:");
    println!();

    let registry: NodeRegistry = dagnodes::standard_registry();
    for kind in registry.list_node_types() {
        if let Some(metadata) = registry.get_metadata(&kind) {
            println!("  • {} ({}, {})", kind, metadata.category, metadata.node_type);
            println!("    {}", metadata.description);
        } else {
            println!("  • {}", kind);
        }
    }
}

fn node(name: &str, node_type: NodeType, kind: &str, dependencies: &[&str]) -> NodeDefinition {
    NodeDefinition {
        name: name.to_string(),
        node_type,
        kind: kind.to_string(),
        config: ContextMap::new(),
        input: ContextMap::new(),
        dependencies: dependencies.iter().map(|d| d.to_string()).collect(),
    }
}

fn create_example_workflow(output: &Path) -> Result<()> {
    let mut start = node("start", NodeType::Start, "control.start", &[]);
    start.config.insert(
        "initial_data".to_string(),
        serde_json::json!({"greeting": "hello"}),
    );
    let mut wait = node("wait", NodeType::Custom, "time.delay", &["start"]);
    wait.config.insert("delay_ms".to_string(), serde_json::json!(250));
    let mut log = node("log", NodeType::Custom, "debug.log", &["wait"]);
    log.input
        .insert("message".to_string(), serde_json::json!("waited a little"));
    let end = node("end", NodeType::End, "control.end", &["log"]);

    let definition = WorkflowDefinition {
        name: "Example Workflow".to_string(),
        description: Some("Starts, waits, logs a line and finishes".to_string()),
        orchestration: OrchestrationType::Static,
        settings: WorkflowSettings::default(),
        context: ContextMap::new(),
        nodes: vec![start, wait, log, end],
        edges: vec![
            EdgeDefinition::new("start", "wait"),
            EdgeDefinition::new("wait", "log"),
            EdgeDefinition::new("log", "end"),
        ],
    };

    let json = serde_json::to_string_pretty(&definition)?;
    std::fs::write(output, json).with_context(|| format!("writing {}", output.display()))?;

    println!("✨ Created example workflow: {}", output.display());
    println!();
    println!("Run it with:");
    println!(
        "  dag run --file {} --input '{{\"user\": \"ada\"}}'",
        output.display()
    );

    Ok(())
}
