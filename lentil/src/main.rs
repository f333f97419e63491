mod common;
mod run_cell_embed;
mod run_coarse_grain;
mod run_extract;
mod run_gene_dist;
mod run_gene_embed;
mod run_graph_dist;
mod run_pipeline;
mod run_simulate;

use run_cell_embed::*;
use run_coarse_grain::*;
use run_extract::*;
use run_gene_dist::*;
use run_gene_embed::*;
use run_graph_dist::*;
use run_pipeline::*;
use run_simulate::*;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "lentil")]
#[command(about = "Gene trajectory inference via optimal transport on single-cell data")]
struct Cli {
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// number of worker threads (default: all cores)
    #[arg(long, global = true)]
    threads: Option<usize>,

    #[command(subcommand)]
    commands: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate cells on a grid with two gene programs along its axes
    Simulate(SimulateArgs),
    /// Diffusion-map embedding of cells from a feature matrix
    CellEmbed(CellEmbedArgs),
    /// Geodesic cell-cell distances on a kNN graph
    GraphDist(GraphDistArgs),
    /// Cluster cells into meta-cells and aggregate distances and expression
    CoarseGrain(CoarseGrainCliArgs),
    /// Optimal transport distances between gene expression distributions
    GeneDist(GeneDistArgs),
    /// Diffusion-map embedding of genes from their distances
    GeneEmbed(GeneEmbedArgs),
    /// Extract gene trajectories by random walks on the gene graph
    Extract(ExtractTrajArgs),
    /// Run every step from a cell embedding to gene trajectories
    Run(RunArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    let max_threads = num_cpus::get();
    let num_threads = cli.threads.unwrap_or(max_threads).clamp(1, max_threads);
    rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build_global()?;

    match &cli.commands {
        Commands::Simulate(args) => {
            run_simulate(args)?;
        }
        Commands::CellEmbed(args) => {
            run_cell_embed(args)?;
        }
        Commands::GraphDist(args) => {
            run_graph_dist(args)?;
        }
        Commands::CoarseGrain(args) => {
            run_coarse_grain(args)?;
        }
        Commands::GeneDist(args) => {
            run_gene_dist(args)?;
        }
        Commands::GeneEmbed(args) => {
            run_gene_embed(args)?;
        }
        Commands::Extract(args) => {
            run_extract(args)?;
        }
        Commands::Run(args) => {
            run_all(args)?;
        }
    }

    Ok(())
}
