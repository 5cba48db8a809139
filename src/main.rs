use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use coidb_rust::config::{EngineConfig, Settings};
use coidb_rust::io::bold::{self, FilterOpt};
use coidb_rust::io::records;
use coidb_rust::pipeline;
use coidb_rust::taxonomy;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[derive(Parser, Debug)]
#[command(
    name = "coidb-rust",
    author,
    version,
    about = "Lineage normalization and BIN consensus for BOLD COI-5P records",
    arg_required_else_help = true
)]
struct Cli {
    /// More log output (-v debug, -vv trace); RUST_LOG takes precedence
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
    /// TOML config file; command-line flags override its values
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(flatten)]
    engine: EngineArgs,
    #[command(subcommand)]
    command: Commands,
}

/// 覆盖配置文件中的引擎参数
#[derive(Args, Debug, Default)]
struct EngineArgs {
    /// Rank columns from coarsest to finest, comma separated
    #[arg(long, global = true, value_delimiter = ',')]
    ranks: Option<Vec<String>>,
    /// Consensus threshold in percent, (0, 100]
    #[arg(long, global = true)]
    threshold: Option<f64>,
    /// Consensus method: rank or full
    #[arg(long, global = true)]
    method: Option<String>,
    /// Filled placeholder labels do not vote; `--exclude-filled=false` overrides the config file
    #[arg(long, global = true, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    exclude_filled: Option<bool>,
    /// Separator between a base label and its fill marker
    #[arg(long, global = true)]
    separator: Option<String>,
    /// Fill marker character
    #[arg(long, global = true)]
    marker: Option<String>,
    /// Unfillable lineages: drop or pass-through
    #[arg(long, global = true)]
    unfillable: Option<String>,
    /// Worker threads for per-BIN consensus
    #[arg(short = 't', long, global = true)]
    threads: Option<usize>,
}

impl EngineArgs {
    fn apply(&self, s: &mut Settings) {
        if let Some(ranks) = &self.ranks {
            s.ranks = ranks.clone();
        }
        if let Some(t) = self.threshold {
            s.threshold = t;
        }
        if let Some(m) = &self.method {
            s.method = m.clone();
        }
        if let Some(v) = self.exclude_filled {
            s.exclude_filled = v;
        }
        if let Some(sep) = &self.separator {
            s.separator = sep.clone();
        }
        if let Some(m) = &self.marker {
            s.marker = m.clone();
        }
        if let Some(p) = &self.unfillable {
            s.unfillable = p.clone();
        }
        if let Some(n) = self.threads {
            s.threads = n;
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Filter a raw BOLD TSV data package down to clean COI-5P records
    Filter {
        /// BOLD TSV file
        input: PathBuf,
        /// Output record table (stdout if omitted)
        #[arg(short, long)]
        out: Option<PathBuf>,
        #[arg(long = "min-len", default_value_t = bold::DEFAULT_MIN_LEN)]
        min_len: usize,
        #[arg(long = "marker-code", default_value = bold::DEFAULT_MARKER)]
        marker_code: String,
    },
    /// Fill missing ranks in every lineage
    Fill {
        /// Record table
        input: PathBuf,
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Fill, then disambiguate homonymous labels
    Disambiguate {
        input: PathBuf,
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Write the collision report here
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Full run; writes one consensus lineage per BIN
    Consensus {
        input: PathBuf,
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Full run; writes normalized records with their BIN consensus
    Run {
        input: PathBuf,
        /// Normalized record table (stdout if omitted)
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Also write the consensus table
        #[arg(long)]
        consensus: Option<PathBuf>,
        /// Also write the collision report
        #[arg(long)]
        report: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut settings = match &cli.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    cli.engine.apply(&mut settings);
    let cfg = settings.validate().context("invalid configuration")?;

    match cli.command {
        Commands::Filter { input, out, min_len, marker_code } => {
            run_filter(&input, out.as_deref(), &cfg, &FilterOpt { marker: marker_code, min_len })
        }
        Commands::Fill { input, out } => run_fill(&input, out.as_deref(), &cfg),
        Commands::Disambiguate { input, out, report } => {
            run_disambiguate(&input, out.as_deref(), report.as_deref(), &cfg)
        }
        Commands::Consensus { input, out } => run_consensus(&input, out.as_deref(), &cfg),
        Commands::Run { input, out, consensus, report } => {
            run_all(&input, out.as_deref(), consensus.as_deref(), report.as_deref(), &cfg)
        }
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "coidb_rust=info",
        1 => "coidb_rust=debug",
        _ => "coidb_rust=trace",
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn create_output(path: Option<&Path>) -> Result<Box<dyn Write>> {
    match path {
        Some(p) => {
            let fh = File::create(p).with_context(|| format!("cannot create output file '{}'", p.display()))?;
            Ok(Box::new(BufWriter::new(fh)))
        }
        None => Ok(Box::new(BufWriter::new(std::io::stdout().lock()))),
    }
}

fn run_filter(input: &Path, out: Option<&Path>, cfg: &EngineConfig, opt: &FilterOpt) -> Result<()> {
    let fh = File::open(input).with_context(|| format!("cannot open BOLD file '{}'", input.display()))?;
    let stats = bold::filter_bold(BufReader::new(fh), create_output(out)?, &cfg.schema, opt)
        .with_context(|| format!("cannot filter BOLD file '{}'", input.display()))?;
    if stats.kept == 0 {
        anyhow::bail!("no record in '{}' passed the filter", input.display());
    }
    Ok(())
}

fn run_fill(input: &Path, out: Option<&Path>, cfg: &EngineConfig) -> Result<()> {
    let recs = records::read_records_path(input, &cfg.schema)?;
    let filled = pipeline::fill_records(recs, cfg);
    info!("filled {} records, {} dropped", filled.records.len(), filled.dropped.len());
    records::write_records(create_output(out)?, &cfg.schema, &filled.records)
}

fn run_disambiguate(input: &Path, out: Option<&Path>, report: Option<&Path>, cfg: &EngineConfig) -> Result<()> {
    let recs = records::read_records_path(input, &cfg.schema)?;
    let filled = pipeline::fill_records(recs, cfg);
    let dis = taxonomy::disambiguate(filled.records, &cfg.schema, &cfg.style);
    info!(
        "{} collisions, {} records dropped, {} kept",
        dis.collisions.len(),
        filled.dropped.len() + dis.dropped.len(),
        dis.records.len()
    );
    records::write_records(create_output(out)?, &cfg.schema, &dis.records)?;
    if let Some(path) = report {
        write_report(path, &dis.collisions)?;
    }
    Ok(())
}

fn run_consensus(input: &Path, out: Option<&Path>, cfg: &EngineConfig) -> Result<()> {
    let recs = records::read_records_path(input, &cfg.schema)?;
    let result = pipeline::run(recs, cfg)?;
    records::write_consensus(create_output(out)?, &cfg.schema, &result.consensus)
}

fn run_all(
    input: &Path,
    out: Option<&Path>,
    consensus: Option<&Path>,
    report: Option<&Path>,
    cfg: &EngineConfig,
) -> Result<()> {
    let recs = records::read_records_path(input, &cfg.schema)?;
    let result = pipeline::run(recs, cfg)?;

    records::write_normalized(
        create_output(out)?,
        &cfg.schema,
        &result.records,
        &result.assignments,
        &result.consensus,
    )?;
    if let Some(path) = consensus {
        let fh = File::create(path).with_context(|| format!("cannot create consensus table '{}'", path.display()))?;
        records::write_consensus(BufWriter::new(fh), &cfg.schema, &result.consensus)?;
    }
    if let Some(path) = report {
        write_report(path, &result.collisions)?;
    }
    Ok(())
}

fn write_report(path: &Path, collisions: &[taxonomy::Collision]) -> Result<()> {
    let fh = File::create(path).with_context(|| format!("cannot create report '{}'", path.display()))?;
    records::write_collisions(BufWriter::new(fh), collisions)?;
    info!("collision report saved: {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(args: &[&str], base: Settings) -> Settings {
        let cli = Cli::try_parse_from(args).unwrap();
        let mut s = base;
        cli.engine.apply(&mut s);
        s
    }

    #[test]
    fn exclude_filled_flag_sets_and_clears() {
        let off = Settings::default();
        let on = Settings { exclude_filled: true, ..Settings::default() };

        assert!(settings(&["coidb-rust", "--exclude-filled", "fill", "in.tsv"], off.clone()).exclude_filled);
        assert!(settings(&["coidb-rust", "fill", "in.tsv", "--exclude-filled=true"], off.clone()).exclude_filled);
        assert!(!settings(&["coidb-rust", "--exclude-filled=false", "fill", "in.tsv"], on.clone()).exclude_filled);
        // absent flag keeps the config file value
        assert!(settings(&["coidb-rust", "fill", "in.tsv"], on).exclude_filled);
        assert!(!settings(&["coidb-rust", "fill", "in.tsv"], off).exclude_filled);
    }

    #[test]
    fn engine_overrides_apply() {
        let s = settings(
            &["coidb-rust", "run", "in.tsv", "--ranks", "kingdom,phylum,genus", "--threshold", "90", "-t", "4"],
            Settings::default(),
        );
        assert_eq!(s.ranks, ["kingdom", "phylum", "genus"]);
        assert_eq!(s.threshold, 90.0);
        assert_eq!(s.threads, 4);
        assert!(s.validate().is_ok());
    }
}
