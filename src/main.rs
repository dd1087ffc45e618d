use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::{self, Write};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use reconcile_bench::{
    open_database, BenchConfig, Benchmark, FailurePolicy, Provisioner, ReconcilerKind,
    ReportFormat, SyntheticProvisioner, TrialRunner,
};

#[derive(Parser)]
#[command(name = "reconcile-bench")]
#[command(about = "Benchmark staged key reconciliation strategies against a reference set")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision test data, run warmup + timed trials, print the report
    Run(RunArgs),

    /// Print the effective configuration as TOML
    PrintConfig {
        /// TOML config file
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,
    },
}

#[derive(clap::Args, Default)]
struct RunArgs {
    /// TOML config file (defaults apply to anything it leaves out)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// SQLite database path, or :memory:
    #[arg(long, env = "RECONCILE_BENCH_DB")]
    db: Option<String>,

    /// Timed trials per strategy
    #[arg(long, short = 'n')]
    trials: Option<usize>,

    /// Reference set size
    #[arg(long)]
    reference_size: Option<usize>,

    /// Seed for synthetic data
    #[arg(long)]
    seed: Option<u64>,

    #[arg(long, value_enum)]
    reconciler: Option<ReconcilerArg>,

    /// Per-trial deadline in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Record a failed strategy and continue with the next one
    #[arg(long)]
    continue_on_failure: bool,

    /// Keep reference and incoming tables after the run
    #[arg(long)]
    keep_data: bool,

    #[arg(long, short = 'f', value_enum, default_value = "text")]
    format: ReportFormat,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum ReconcilerArg {
    Join,
    Correlated,
}

impl From<ReconcilerArg> for ReconcilerKind {
    fn from(arg: ReconcilerArg) -> Self {
        match arg {
            ReconcilerArg::Join => ReconcilerKind::JoinUpdate,
            ReconcilerArg::Correlated => ReconcilerKind::CorrelatedUpdate,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Run(args)) => run(args),
        Some(Commands::PrintConfig { config }) => {
            let config = load_config(config.as_ref())?;
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
        None => run(RunArgs::default()),
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<BenchConfig> {
    match path {
        Some(path) => BenchConfig::from_path(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(BenchConfig::default()),
    }
}

fn apply_overrides(config: &mut BenchConfig, args: &RunArgs) {
    if let Some(db) = &args.db {
        config.database = db.clone();
    }
    if let Some(trials) = args.trials {
        config.trials_per_config = trials;
    }
    if let Some(size) = args.reference_size {
        config.provision.reference_size = size;
    }
    if let Some(seed) = args.seed {
        config.provision.seed = Some(seed);
    }
    if let Some(reconciler) = args.reconciler {
        config.reconciler = reconciler.into();
    }
    if let Some(timeout) = args.timeout_ms {
        config.trial_timeout_ms = Some(timeout);
    }
    if args.continue_on_failure {
        config.failure_policy = FailurePolicy::Continue;
    }
    if args.keep_data {
        config.keep_data = true;
    }
}

fn run(args: RunArgs) -> Result<()> {
    let mut config = load_config(args.config.as_ref())?;
    apply_overrides(&mut config, &args);
    config.validate()?;

    let conn = open_database(&config.database)?;

    // 1. Test data; a failed provisioning drops whatever it created
    let mut provisioner = SyntheticProvisioner::new(config.provision.clone());
    let (reference, sample) = provisioner
        .provision(&conn)
        .context("Failed to provision test data")?;

    // 2. Warmup + timed trials
    let reconciler = config.reconciler.build();
    let runner = TrialRunner::new(&conn, &reference, reconciler.as_ref())
        .with_timeout(config.trial_timeout());
    let mut benchmark = Benchmark::new(runner, config.trials_per_config)
        .with_warmup(config.warmup)
        .with_failure_policy(config.failure_policy);
    let outcome = benchmark.run(&sample, &config.strategies);

    // 3. Teardown runs whether or not the benchmark succeeded
    if !config.keep_data {
        if let Err(err) = provisioner.teardown(&conn) {
            tracing::warn!(error = %err, "test data teardown failed");
        }
    }

    let report = outcome.context("Benchmark failed")?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    args.format.sink().write_report(&report, &mut out)?;
    out.flush()?;

    if report.has_failures() {
        std::process::exit(1);
    }

    Ok(())
}
