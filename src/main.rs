//! liveflow - Main Entry Point
//!
//! Runs or checks a graph description with the built-in node classes. The
//! same binary serves as the worker program for process-placed groups.

use anyhow::Context;
use clap::{Parser, Subcommand};
use liveflow::pipeline::nodes::builtin_registry;
use liveflow::{logging, worker, FlowConfig, Graph, GraphDescription, Runner};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "liveflow", version, about = "Placement-aware dataflow pipelines")]
struct Cli {
    /// Config file (.toml or .json); the platform default when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a graph description to completion
    Run {
        graph: PathBuf,

        /// Stop the graph after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Validate a graph description and print its discovery order
    Check { graph: PathBuf },
}

fn main() -> anyhow::Result<()> {
    let registry = builtin_registry().context("Failed to register built-in nodes")?;
    worker::enter_if_requested(&registry);

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => FlowConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => FlowConfig::default_path()
            .map(|path| FlowConfig::load_or_default(path))
            .unwrap_or_default(),
    };
    let _guard = logging::init(&config.logging)?;

    match cli.command {
        Command::Run { graph, timeout } => {
            let desc = GraphDescription::load(&graph)
                .with_context(|| format!("Failed to load graph {}", graph.display()))?;
            let graph = Graph::from_description(&desc, &registry)?;
            tracing::info!("Running {} node(s)", graph.len());

            let mut runner = Runner::new(&graph, config.scheduler)?;
            let finished = runner.run(timeout.map(Duration::from_secs))?;
            for (name, state) in runner.clock_registry().read_state()? {
                tracing::info!("{} reached tick {}", name, state.max_ctr);
            }
            if !finished {
                tracing::warn!("Graph was stopped before it finished");
            }
        }
        Command::Check { graph } => {
            let desc = GraphDescription::load(&graph)
                .with_context(|| format!("Failed to load graph {}", graph.display()))?;
            let graph = Graph::from_description(&desc, &registry)?;

            let mut seen = std::collections::HashSet::new();
            for id in graph.node_ids() {
                if seen.contains(&id) {
                    continue;
                }
                let component = graph.discover_graph(id)?;
                println!("component:");
                for member in &component {
                    seen.insert(*member);
                    let entry = graph.node(*member)?;
                    println!(
                        "  {} @ {} ({} input(s))",
                        entry.string_id(),
                        entry.placement(),
                        entry.input_connections().len()
                    );
                }
            }
        }
    }

    Ok(())
}
