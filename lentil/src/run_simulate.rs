use crate::common::*;
use clap::Args;
use lentil::simulate::{simulate, SimArgs};
use log::info;
use matrix_util::common_io::write_lines;

#[derive(Args, Debug, Clone)]
pub struct SimulateArgs {
    /// grid columns (x positions)
    #[arg(long, default_value_t = 10)]
    pub nx: usize,

    /// grid rows (y positions)
    #[arg(long, default_value_t = 10)]
    pub ny: usize,

    /// genes in each of the two programs
    #[arg(long, default_value_t = 20)]
    pub genes_per_program: usize,

    /// Poisson rate at a gene's peak
    #[arg(long, default_value_t = 10.0)]
    pub peak_rate: f32,

    /// width of each gene's bump
    #[arg(long, default_value_t = 1.5)]
    pub width: f32,

    /// background Poisson rate
    #[arg(long, default_value_t = 0.05)]
    pub background: f32,

    /// jitter of cell positions
    #[arg(long, default_value_t = 0.1)]
    pub jitter: f32,

    /// Random seed
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Output prefix
    #[arg(short, long)]
    pub out: String,
}

pub fn run_simulate(args: &SimulateArgs) -> Result<()> {
    let sim_args = SimArgs {
        nx: args.nx,
        ny: args.ny,
        genes_per_program: args.genes_per_program,
        peak_rate: args.peak_rate,
        width: args.width,
        background: args.background,
        jitter: args.jitter,
        seed: args.seed,
    };

    let sim = simulate(&sim_args)?;
    info!(
        "simulated {} genes x {} cells",
        sim.expression.nrows(),
        sim.expression.ncols()
    );

    let embedding_file = format!("{}.embedding.tsv.gz", args.out);
    let expression_file = format!("{}.expression.tsv.gz", args.out);
    let truth_file = format!("{}.truth.tsv.gz", args.out);

    let axes: Vec<Box<str>> = vec!["x".into(), "y".into()];
    write_named(&sim.embedding, &embedding_file, &sim.cell_names, &axes)?;
    write_named(
        &sim.expression,
        &expression_file,
        &sim.gene_names,
        &sim.cell_names,
    )?;

    let mut truth: Vec<Box<str>> = vec!["gene\tprogram\tpeak".into()];
    truth.extend(sim.gene_names.iter().enumerate().map(|(g, name)| {
        format!("{}\t{}\t{}", name, sim.program[g] + 1, sim.peak[g]).into_boxed_str()
    }));
    write_lines(&truth, &truth_file)?;

    let param_file = format!("{}.parameters.json", args.out);
    let params = serde_json::json!({
        "command": "simulate",
        "nx": args.nx,
        "ny": args.ny,
        "genes_per_program": args.genes_per_program,
        "peak_rate": args.peak_rate,
        "width": args.width,
        "background": args.background,
        "jitter": args.jitter,
        "seed": args.seed,
        "outputs": {
            "embedding": embedding_file,
            "expression": expression_file,
            "truth": truth_file,
        },
    });
    std::fs::write(&param_file, serde_json::to_string_pretty(&params)?)?;
    info!("Wrote parameters: {}", param_file);

    Ok(())
}
