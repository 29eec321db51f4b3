//! OmniFlow CLI
//!
//! Runs workflow documents exported by the editor:
//! - `run`: execute a document and print per-node outputs as JSON
//! - `validate`: report structural problems without running anything
//! - `executors`: list the registered node types

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use omniflow_core::{OmniflowConfig, WorkflowDocument};
use omniflow_workflows::prelude::*;
use omniflow_workflows::validate_workflow;

#[derive(Parser, Debug)]
#[command(name = "omniflow")]
#[command(about = "Execute OmniFlow workflow graphs")]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Execute a workflow document
    Run {
        /// Path to the workflow JSON ({nodes, connections})
        file: PathBuf,

        /// Abort the run after this many milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Fail instead of falling back to node-list order on a cycle
        #[arg(long)]
        strict_cycles: bool,

        /// Pretty-print the result
        #[arg(long)]
        pretty: bool,
    },

    /// Check a workflow document for structural problems
    Validate {
        /// Path to the workflow JSON
        file: PathBuf,
    },

    /// List registered executor types
    Executors,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from /etc/omniflow/environment (if exists)
    omniflow_core::config::load_environment();

    let args = Args::parse();
    init_tracing(args.json_logs)?;

    let config = OmniflowConfig::from_env();
    debug!(?config, "Loaded configuration");

    match args.command {
        Commands::Run {
            file,
            timeout_ms,
            strict_cycles,
            pretty,
        } => run(&config, &file, timeout_ms, strict_cycles, pretty).await,
        Commands::Validate { file } => validate(&file),
        Commands::Executors => {
            let registry = build_registry(&config).await;
            for node_type in registry.registered_types().await {
                println!("{}", node_type);
            }
            Ok(())
        }
    }
}

fn init_tracing(json: bool) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("omniflow=info".parse()?)
        .add_directive("omniflow_workflows=info".parse()?)
        .add_directive("omniflow_llm=info".parse()?);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

async fn build_registry(config: &OmniflowConfig) -> Arc<ExecutorRegistry> {
    let deps = BuiltinDependencies::from_config(config);
    Arc::new(ExecutorRegistry::with_builtins(deps).await)
}

fn load_document(file: &Path) -> Result<WorkflowDocument> {
    WorkflowDocument::from_path(file)
        .with_context(|| format!("Failed to load workflow from {}", file.display()))
}

fn validate(file: &Path) -> Result<()> {
    let document = load_document(file)?;
    let issues = validate_workflow(&document.nodes, &document.connections);
    if issues.is_empty() {
        println!(
            "ok: {} node(s), {} connection(s)",
            document.nodes.len(),
            document.connections.len()
        );
        return Ok(());
    }
    for issue in &issues {
        println!("{}", issue);
    }
    anyhow::bail!("{} issue(s) found", issues.len())
}

async fn run(
    config: &OmniflowConfig,
    file: &Path,
    timeout_ms: Option<u64>,
    strict_cycles: bool,
    pretty: bool,
) -> Result<()> {
    let document = load_document(file)?;
    for issue in validate_workflow(&document.nodes, &document.connections) {
        warn!(%issue, "Workflow validation issue");
    }

    let registry = build_registry(config).await;
    let controller = Arc::new(WorkflowController::new(WorkflowEngine::new(registry)));

    let total = document.nodes.len();
    controller.on_state_change(move |state| {
        if let Some(node_id) = state.current_node_id.as_deref() {
            debug!(
                node_id,
                progress = state.progress,
                completed = state.completed_node_ids.len(),
                total,
                "Run progress"
            );
        }
    });

    // Ctrl-C stops the run; the controller reports it as a manual stop
    let stopper = controller.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() && stopper.stop() {
            info!("Interrupted, stopping workflow run");
        }
    });

    let mut options = ExecutionOptions::default();
    if let Some(timeout_ms) = timeout_ms.or(config.run_timeout_ms) {
        options = options.with_timeout_ms(timeout_ms);
    }
    if strict_cycles {
        options = options.with_cycle_policy(CyclePolicy::Fail);
    }

    let outcome = controller
        .execute(&document.nodes, &document.connections, options)
        .await;
    ctrl_c.abort();

    let result = outcome.context("Workflow run failed")?;
    for node_id in result.failed_nodes() {
        warn!(node_id, "Node finished with an error output");
    }

    let rendered = if pretty {
        serde_json::to_string_pretty(&result)?
    } else {
        serde_json::to_string(&result)?
    };
    println!("{}", rendered);
    Ok(())
}
