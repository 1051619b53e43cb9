use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use env_logger::Env;
use log::info;

use cachesim::coherence::NUM_PROCS;
use cachesim::commons::{Protocol, SystemSpec};
use cachesim::utils::read_testfiles;
use cachesim::{Report, Simulator};

/// A MSI, MESI and Dragon cache coherence protocol simulator.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Coherence protocol: MSI, MESI or DRAGON
    protocol: String,
    /// Trace base path, reads `<INPUT>_0.data` .. `<INPUT>_3.data`
    input: PathBuf,
    /// Cache size in bytes
    #[arg(default_value_t = 4096)]
    cache_size: u32,
    /// Associativity of the cache
    #[arg(default_value_t = 2)]
    associativity: u32,
    /// Block size in bytes
    #[arg(default_value_t = 32)]
    block_size: u32,
    /// Stop after this many cycles
    #[arg(long)]
    max_cycles: Option<u64>,
    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    // logging
    let env = Env::default()
        .filter_or("CACHESIM_LOG", if args.verbose { "info" } else { "warn" })
        .write_style_or("CACHESIM_LOG_STYLE", "auto");
    env_logger::init_from_env(env);

    let specs = SystemSpec {
        protocol: args.protocol.parse::<Protocol>()?,
        cache_size: args.cache_size,
        cache_assoc: args.associativity,
        block_size: args.block_size,
        ..Default::default()
    };
    specs.validate().context("invalid cache configuration")?;

    let traces = read_testfiles(&args.input, NUM_PROCS)
        .with_context(|| format!("failed to load traces for {}", args.input.display()))?;

    let t0 = Instant::now();
    let mut sim = Simulator::new(specs, traces)?;
    sim.run(args.max_cycles)?;
    info!("execution time {:?}", t0.elapsed());

    println!("{}", Report::new(&sim));
    Ok(())
}
