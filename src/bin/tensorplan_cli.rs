use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tensorplan::logging::init_logging_default;
use tensorplan::memory::{GraphLadder, LadderProvider, MemoryAssigner, PlannerConfig};
use tensorplan::Graph;

#[derive(Parser, Debug)]
#[command(name = "tensorplan-cli", version)]
#[command(about = "Plan the device memory arena of a compiled tensor graph", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Assign arena offsets to every output and workspace of a graph
    Plan {
        /// Graph in JSON form
        #[arg(long)]
        graph: PathBuf,
        /// Give every slot a fresh block (defaults to TENSORPLAN_DISABLE_REUSE)
        #[arg(long)]
        disable_reuse: bool,
        /// Pooled blocks of one size needed before oversized reuse kicks in
        #[arg(long)]
        threshold: Option<u64>,
        /// Block size alignment in bytes
        #[arg(long)]
        alignment: Option<u64>,
        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
        /// Write the annotated graph here
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print the size ladder derived from a graph
    Ladder {
        /// Graph in JSON form
        #[arg(long)]
        graph: PathBuf,
    },
}

fn load_graph(path: &Path) -> anyhow::Result<Graph> {
    let graph = Graph::load(path)
        .with_context(|| format!("failed to load graph {}", path.display()))?;
    graph.validate()?;
    Ok(graph)
}

fn main() -> anyhow::Result<()> {
    init_logging_default();
    let cli = Cli::parse();
    match cli.command {
        Commands::Plan {
            graph,
            disable_reuse,
            threshold,
            alignment,
            json,
            output,
        } => {
            let mut config = PlannerConfig::from_env();
            if disable_reuse {
                config = config.with_disable_reuse(true);
            }
            if let Some(threshold) = threshold {
                config = config.with_reuse_threshold(threshold);
            }
            if let Some(alignment) = alignment {
                config = config.with_alignment(alignment);
            }

            let mut planned = load_graph(&graph)?;
            let summary = MemoryAssigner::new(config).assign(&mut planned)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print!("{}", summary);
            }
            if let Some(path) = output {
                fs::write(&path, planned.to_json()?)
                    .with_context(|| format!("failed to write {}", path.display()))?;
            }
        }
        Commands::Ladder { graph } => {
            let graph = load_graph(&graph)?;
            let ladder = GraphLadder.ladder(&graph)?;
            println!("{} sizes", ladder.len());
            for size in ladder.sizes() {
                println!("{}", size);
            }
        }
    }
    Ok(())
}
