use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::{fmt, EnvFilter};

use rcaprobe::collect::Collector;
use rcaprobe::config::{ExportConfig, LoadConfig, TaskWeights, TimeWindow};
use rcaprobe::error::{ExportError, EXIT_FAILURE};
use rcaprobe::prom::promql::LatencyUnit;
use rcaprobe::schema::EntityCatalog;
use rcaprobe::{export, load};

/// Default service workload names collected per run.
const DEFAULT_SERVICES: &str = "carts,user,orders,payment,shipping,front-end,catalogue,queue-master,rabbitmq,orders-db,carts-db,user-db";

/// RCA experiment tooling: metrics export and storefront load generation.
#[derive(Parser)]
#[command(name = "rcaprobe", about)]
struct Cli {
    /// Logging verbosity level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Export time-aligned service and node metrics into one wide CSV.
    Export(ExportArgs),

    /// Generate a weighted mix of HTTP load against the storefront.
    Load(LoadArgs),

    /// Print version information and exit.
    Version,
}

#[derive(Args)]
struct ExportArgs {
    /// Metrics backend base URL, e.g. http://localhost:9090.
    #[arg(long, default_value = "http://127.0.0.1:8428")]
    prom: String,

    /// Comma-separated service workload names.
    #[arg(long, default_value = DEFAULT_SERVICES)]
    services: String,

    /// Kubernetes namespace for container and mesh selectors.
    #[arg(long, default_value = "sock-shop")]
    namespace: String,

    /// RFC3339 window start (e.g. 2025-11-09T12:30:00Z).
    #[arg(long)]
    start: Option<String>,

    /// RFC3339 window end.
    #[arg(long)]
    end: Option<String>,

    /// Injection epoch seconds; shortcut setting start/end symmetrically.
    #[arg(long, conflicts_with_all = ["start", "end"])]
    inject: Option<i64>,

    /// Window minutes on each side of --inject.
    #[arg(long, default_value_t = 10)]
    window_minutes: u64,

    /// Query step (e.g. 5s, 15s, 1m).
    #[arg(long, default_value = "15s")]
    step: String,

    /// Rate window used inside every rate() expression.
    #[arg(long, default_value = "3m")]
    rate_window: String,

    /// Output CSV path.
    #[arg(long, default_value = "merged.csv")]
    out: PathBuf,

    /// Per-request HTTP timeout.
    #[arg(long, default_value = "120s", value_parser = humantime::parse_duration)]
    timeout: Duration,

    /// Duration unit in the mesh latency histogram's metric name.
    #[arg(long, value_enum, default_value = "ms")]
    lat_histogram: LatencyUnitArg,

    /// Also auto-discover worker nodes and collect node metrics.
    #[arg(long)]
    nodes: bool,

    /// Regex for control-plane node names to exclude from discovery.
    #[arg(long, default_value = ".*(control-plane|master).*")]
    controlplane_re: String,
}

#[derive(Args)]
struct LoadArgs {
    /// Storefront base URL.
    #[arg(long)]
    target: String,

    /// Number of simulated concurrent users.
    #[arg(long, default_value_t = 10)]
    users: usize,

    /// Run duration in seconds (0 = until Ctrl-C).
    #[arg(long, default_value_t = 30)]
    duration: u64,

    /// Seconds over which user starts are staggered.
    #[arg(long, default_value_t = 2)]
    ramp: u64,

    /// Minimum think-time between tasks.
    #[arg(long, default_value = "1s", value_parser = humantime::parse_duration)]
    wait_min: Duration,

    /// Maximum think-time between tasks.
    #[arg(long, default_value = "3s", value_parser = humantime::parse_duration)]
    wait_max: Duration,

    /// Relative weight of browsing behavior.
    #[arg(long, default_value_t = 6)]
    browse: u32,

    /// Relative weight of add-to-cart behavior.
    #[arg(long, default_value_t = 3)]
    cart: u32,

    /// Relative weight of register/login behavior.
    #[arg(long, default_value_t = 1)]
    login: u32,

    /// Relative weight of checkout behavior.
    #[arg(long, default_value_t = 1)]
    checkout: u32,

    /// Skip per-user register/login at session start.
    #[arg(long)]
    no_auth: bool,

    /// Skip checkout orders entirely.
    #[arg(long)]
    no_checkout: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LatencyUnitArg {
    Ms,
    S,
}

impl From<LatencyUnitArg> for LatencyUnit {
    fn from(arg: LatencyUnitArg) -> Self {
        match arg {
            LatencyUnitArg::Ms => LatencyUnit::Millis,
            LatencyUnitArg::S => LatencyUnit::Seconds,
        }
    }
}

/// Build-time version info.
mod version {
    /// Release version string (set at build time).
    pub const RELEASE: &str = env!("CARGO_PKG_VERSION");

    /// Full version string with platform info.
    pub fn full() -> String {
        format!(
            "{} ({}/{})",
            RELEASE,
            std::env::consts::OS,
            std::env::consts::ARCH,
        )
    }
}

fn main() {
    let cli = Cli::parse();

    // Handle version subcommand before anything else.
    if let Command::Version = &cli.command {
        println!("rcaprobe {}", version::full());
        return;
    }

    if let Err(e) = init_tracing(&cli.log_level) {
        eprintln!("error: {e:#}");
        std::process::exit(EXIT_FAILURE);
    }

    let result = run(cli.command);

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        let code = e
            .downcast_ref::<ExportError>()
            .map(ExportError::exit_code)
            .unwrap_or(EXIT_FAILURE);
        std::process::exit(code);
    }
}

fn init_tracing(log_level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(log_level)
        .with_context(|| format!("invalid log level: {log_level}"))?;

    fmt().with_env_filter(filter).with_target(true).init();
    Ok(())
}

fn run(command: Command) -> Result<()> {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    match command {
        Command::Export(args) => {
            let cfg = export_config(args)?;
            cfg.validate()?;
            rt.block_on(run_export(cfg))
        }
        Command::Load(args) => {
            let cfg = load_config(args);
            cfg.validate()?;
            rt.block_on(run_load(cfg))
        }
        Command::Version => unreachable!("handled before runtime setup"),
    }
}

fn export_config(args: ExportArgs) -> Result<ExportConfig> {
    let window = TimeWindow::resolve(
        args.start.as_deref(),
        args.end.as_deref(),
        args.inject,
        args.window_minutes,
    )?;

    let services = args
        .services
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    Ok(ExportConfig {
        prom_url: args.prom,
        services,
        namespace: args.namespace,
        window,
        step: args.step,
        rate_window: args.rate_window,
        out: args.out,
        timeout: args.timeout,
        latency_unit: args.lat_histogram.into(),
        collect_nodes: args.nodes,
        controlplane_re: args.controlplane_re,
    })
}

fn load_config(args: LoadArgs) -> LoadConfig {
    LoadConfig {
        target: args.target,
        users: args.users,
        duration: Duration::from_secs(args.duration),
        ramp: Duration::from_secs(args.ramp),
        wait_min: args.wait_min,
        wait_max: args.wait_max,
        weights: TaskWeights {
            browse: args.browse,
            cart: args.cart,
            login: args.login,
            checkout: args.checkout,
        },
        enable_auth: !args.no_auth,
        enable_checkout: !args.no_checkout && !args.no_auth,
    }
}

async fn run_export(cfg: ExportConfig) -> Result<()> {
    let catalog = EntityCatalog::sock_shop();
    let schema = catalog.fixed_schema();
    let zeroable = catalog.zeroable_columns();

    tracing::info!(
        start = %cfg.window.start,
        end = %cfg.window.end,
        step = %cfg.step,
        services = cfg.services.len(),
        "starting export",
    );

    let out = cfg.out.clone();
    let collector = Collector::new(cfg, catalog)?;
    let table = collector.run().await?;

    let table = table.enforce(&schema, &zeroable);
    if table.is_empty() {
        return Err(ExportError::EmptyTable.into());
    }

    export::write_file(&table, &out)?;
    tracing::info!(
        path = %out.display(),
        rows = table.num_rows(),
        columns = table.columns().len() + 1,
        "wrote output",
    );

    Ok(())
}

async fn run_load(cfg: LoadConfig) -> Result<()> {
    let report = load::run(cfg).await?;

    println!("--- Load Run Report ---");
    println!("Duration:   {:.1}s", report.elapsed.as_secs_f64());
    println!("Users:      {}", report.users);
    println!("Requests:   {}", report.requests);
    println!("Throughput: {:.1} req/s", report.throughput());
    println!("Errors:     {}", report.errors);

    Ok(())
}
