use anyhow::{Context, Result, bail};
use bwtmerge::output::{BwtOutput, OutputPaths, SampleKind, SampledArray};
use bwtmerge::text::{Histogram, InputText};
use bwtmerge::{BuildConfig, build_bwt};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "bwtmerge")]
#[command(about = "External-memory BWT construction by merging sorted blocks")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the BWT (and sampled SA/ISA) of a file
    Build {
        /// Input text file
        input: PathBuf,

        /// Output prefix (default: the input path)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// JSON configuration file; flags below override it
        #[arg(long)]
        config: Option<PathBuf>,

        /// Memory budget, e.g. 512M or 4G
        #[arg(long, value_parser = parse_size)]
        mem: Option<u64>,

        /// Worker threads
        #[arg(short = 'j', long)]
        threads: Option<usize>,

        /// Leaf block size, e.g. 16M
        #[arg(long, value_parser = parse_size)]
        block_size: Option<u64>,

        /// SA sampling rate (power of two)
        #[arg(long)]
        sa_rate: Option<u64>,

        /// ISA sampling rate (power of two)
        #[arg(long)]
        isa_rate: Option<u64>,

        /// Only write the BWT and histogram
        #[arg(long)]
        bwt_only: bool,

        /// Work packets per thread
        #[arg(long)]
        granularity: Option<usize>,

        /// Directory for temporary files
        #[arg(long)]
        temp_dir: Option<PathBuf>,

        /// Skip writing the wavelet tree
        #[arg(long)]
        no_hwt: bool,

        /// Hide progress bars
        #[arg(short, long)]
        quiet: bool,
    },
    /// Check a built BWT against its input by inverting it
    Verify {
        /// Output prefix used when building
        prefix: PathBuf,

        /// The original input file
        input: PathBuf,
    },
}

/// Parse a byte count with an optional K, M or G suffix
fn parse_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    let (digits, shift) = match s.chars().last().map(|c| c.to_ascii_uppercase()) {
        Some('K') => (&s[..s.len() - 1], 10),
        Some('M') => (&s[..s.len() - 1], 20),
        Some('G') => (&s[..s.len() - 1], 30),
        _ => (s, 0),
    };
    let value: u64 = digits
        .trim()
        .parse()
        .map_err(|e| format!("invalid size '{s}': {e}"))?;
    value
        .checked_mul(1 << shift)
        .ok_or_else(|| format!("size '{s}' is too large"))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Build {
            input,
            output,
            config,
            mem,
            threads,
            block_size,
            sa_rate,
            isa_rate,
            bwt_only,
            granularity,
            temp_dir,
            no_hwt,
            quiet,
        } => {
            let mut cfg = match config {
                Some(path) => BuildConfig::from_json_file(&path)?,
                None => BuildConfig::default(),
            };
            if let Some(mem) = mem {
                cfg.memory_budget = mem;
            }
            if let Some(threads) = threads {
                cfg.threads = threads;
            }
            if let Some(block_size) = block_size {
                cfg.block_size = block_size;
            }
            if let Some(rate) = sa_rate {
                cfg.sa_sample_rate = rate;
            }
            if let Some(rate) = isa_rate {
                cfg.isa_sample_rate = rate;
            }
            if let Some(granularity) = granularity {
                cfg.granularity = granularity;
            }
            if let Some(dir) = temp_dir {
                cfg.temp_dir = dir;
            }
            cfg.bwt_only |= bwt_only;
            if no_hwt {
                cfg.write_hwt = false;
            }
            cfg.progress = !quiet;

            let prefix = output.unwrap_or_else(|| input.clone());
            let report = build_bwt(&input, &prefix, &cfg)?;
            println!("Built BWT of {} symbols in {:.2?}", report.text_len, report.elapsed);
            println!("  Blocks: {}", report.blocks);
            println!("  Merge tree: {} nodes, depth {}", report.tree_nodes, report.tree_depth);
            if let (Some(sa), Some(isa)) = (report.sa_samples, report.isa_samples) {
                println!("  Samples: {sa} SA, {isa} ISA");
            }
            for path in &report.outputs {
                println!("  Wrote {}", path.display());
            }
        }
        Commands::Verify { prefix, input } => {
            verify(&prefix, &input)?;
        }
    }

    Ok(())
}

fn verify(prefix: &Path, input: &Path) -> Result<()> {
    let text = InputText::open(input)?;
    let paths = OutputPaths::new(prefix);
    let bwt = BwtOutput::read_file(&paths.bwt)?;

    if bwt.invert() != text.as_bytes() {
        bail!("{} does not invert to {}", paths.bwt.display(), input.display());
    }
    println!("BWT OK: {} symbols, p0 = {}", bwt.len(), bwt.p0);

    if paths.hist.exists() {
        let hist = Histogram::read_file(&paths.hist)?;
        if hist != text.histogram() {
            bail!("{} does not match the input", paths.hist.display());
        }
        println!("Histogram OK");
    }

    if paths.sa.exists() && paths.isa.exists() {
        let sa = SampledArray::read_file(&paths.sa, SampleKind::Sa)?;
        let isa = SampledArray::read_file(&paths.isa, SampleKind::Isa)?;
        let mut checked = 0u64;
        for (i, &rank) in isa.values.iter().enumerate() {
            if rank % sa.rate != 0 {
                continue;
            }
            let pos = sa
                .get((rank / sa.rate) as usize)
                .with_context(|| format!("rank {rank} beyond {}", paths.sa.display()))?;
            if pos != i as u64 * isa.rate {
                bail!(
                    "SA and ISA disagree: ISA[{}] = {rank} but SA[{rank}] = {pos}",
                    i as u64 * isa.rate
                );
            }
            checked += 1;
        }
        println!("Samples OK: {} SA, {} ISA, {checked} cross-checked", sa.len(), isa.len());
    }
    Ok(())
}
