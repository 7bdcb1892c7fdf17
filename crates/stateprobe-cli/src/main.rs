//! stateprobe CLI - stateful, property-based API conformance testing

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use stateprobe_core::{CassetteConfig, CassetteFormat, Config};
use stateprobe_engine::{
    CheckRegistry, Event, EventHandler, ExecutionContext, FilterSet, HandlerError, HttpTransport,
    Interrupt, LoaderConfig, ReportConfig, RunConfig, TargetMetric, build_handlers, execute,
    into_event_stream,
};

#[derive(Parser)]
#[command(name = "stateprobe")]
#[command(about = "Stateful, property-based API conformance testing")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(long, global = true, default_value = "terminal")]
    output: OutputFormat,

    /// Verbose logging (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Run stateful tests against an API
    Run(RunArgs),

    /// Write an example config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the JSON Schema of serialized checks
    Schema,
}

#[derive(Args)]
struct RunArgs {
    /// Schema file or URL (overrides `location` in the config)
    location: Option<String>,

    /// Server to test (defaults to the schema's first server)
    #[arg(long)]
    base_url: Option<String>,

    /// Config file (default: .stateprobe.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Extra request header, `Name: value`
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    #[arg(long)]
    seed: Option<u64>,

    #[arg(long)]
    max_suites: Option<usize>,

    /// Scenarios per suite
    #[arg(long)]
    scenarios: Option<usize>,

    /// Maximum steps per scenario
    #[arg(long)]
    max_steps: Option<usize>,

    /// Checks to run, comma separated (default: all built-ins)
    #[arg(long, value_delimiter = ',')]
    checks: Vec<String>,

    /// Response time limit in seconds
    #[arg(long)]
    max_response_time: Option<f64>,

    /// Request timeout in seconds
    #[arg(long)]
    request_timeout: Option<f64>,

    /// Metric to maximize (response_time, response_size)
    #[arg(long = "target")]
    targets: Vec<String>,

    /// Only test matching operations (`GET /users`, `method:POST`, `path:/a`, `tag:x`)
    #[arg(long)]
    include: Vec<String>,

    /// Skip matching operations
    #[arg(long)]
    exclude: Vec<String>,

    /// Write a JUnit XML report
    #[arg(long)]
    junit_xml: Option<PathBuf>,

    /// Record every request and response
    #[arg(long)]
    cassette: Option<PathBuf>,

    #[arg(long)]
    cassette_format: Option<CassetteFormatArg>,

    /// Stop at the first failing scenario
    #[arg(long)]
    stop_on_failure: bool,

    /// Skip TLS certificate verification
    #[arg(long)]
    insecure: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CassetteFormatArg {
    Vcr,
    Jsonl,
}

impl From<CassetteFormatArg> for CassetteFormat {
    fn from(arg: CassetteFormatArg) -> Self {
        match arg {
            CassetteFormatArg::Vcr => CassetteFormat::Vcr,
            CassetteFormatArg::Jsonl => CassetteFormat::Jsonl,
        }
    }
}

#[derive(Clone, Copy, ValueEnum, PartialEq, Eq)]
enum OutputFormat {
    Terminal,
    /// One JSON event per line
    Json,
    Silent,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(3)
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Run(args) => run_tests(&args, cli.output),

        Commands::Init { force } => {
            let config_path = ".stateprobe.toml";
            if Path::new(config_path).exists() && !force {
                eprintln!("{config_path} already exists (use --force to overwrite)");
                return Ok(1);
            }
            std::fs::write(config_path, Config::example())
                .with_context(|| format!("failed to write {config_path}"))?;
            println!("Created {config_path}");
            println!("\nEdit the file to configure:");
            println!("  - location: path or URL of your OpenAPI schema");
            println!("  - base_url: server to test");
            println!("  - headers: auth tokens, API keys");
            println!("  - [engine]: suites, scenarios and steps per run");
            Ok(0)
        }

        Commands::Schema => {
            println!("{}", stateprobe_core::report::generate_schema());
            Ok(0)
        }
    }
}

fn run_tests(args: &RunArgs, output: OutputFormat) -> Result<i32> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };
    apply_overrides(&mut config, args)?;
    config.validate()?;

    let location = config
        .location
        .clone()
        .ok_or_else(|| anyhow!("no schema location: pass LOCATION or set `location` in the config"))?;
    let timeout = Duration::from_secs_f64(config.engine.request_timeout);
    let checks = CheckRegistry::select(
        &config.checks.enabled,
        config.checks.max_response_time.map(Duration::from_secs_f64),
    )?;
    let targets = config
        .targets
        .iter()
        .map(|name| name.parse::<TargetMetric>().map_err(|e| anyhow!(e)))
        .collect::<Result<Vec<_>>>()?;
    let filters = FilterSet::from_patterns(&config.filters.include, &config.filters.exclude)
        .map_err(|e| anyhow!("invalid filter: {e}"))?;
    let transport = HttpTransport::new(timeout, config.headers.clone(), !args.insecure)?;

    let interrupt = Interrupt::new();
    let on_signal = interrupt.clone();
    ctrlc::set_handler(move || on_signal.trigger())
        .context("failed to register signal handler")?;

    tracing::debug!(
        location = %location,
        checks = ?checks.names(),
        seed = ?config.engine.seed,
        "starting run"
    );
    let run_config = RunConfig {
        loader: LoaderConfig::new(location)
            .with_base_url(config.base_url.clone())
            .with_timeout(timeout),
        filters,
        engine: config.engine.clone(),
        checks,
        targets,
        interrupt,
    };

    let mut custom: Vec<Box<dyn EventHandler>> = Vec::new();
    if output == OutputFormat::Json {
        custom.push(Box::new(JsonLines(std::io::stdout())));
    }
    let mut handlers = build_handlers(ReportConfig {
        junit_xml: config.junit_xml.clone(),
        cassette: config.cassette.clone(),
        output: (output == OutputFormat::Terminal).then(|| config.output.clone()),
        custom,
    });

    let mut ctx = ExecutionContext::new();
    match execute(into_event_stream(run_config, transport), &mut handlers, &mut ctx) {
        Ok(code) => Ok(code),
        Err(e) => {
            if !e.is_quiet() {
                eprintln!("Error: {e}");
            }
            Ok(e.exit_code())
        }
    }
}

/// Command-line values win over the config file.
fn apply_overrides(config: &mut Config, args: &RunArgs) -> Result<()> {
    if let Some(location) = &args.location {
        config.location = Some(location.clone());
    }
    if let Some(base_url) = &args.base_url {
        config.base_url = Some(base_url.clone());
    }
    for header in &args.headers {
        let (name, value) = header
            .split_once(':')
            .ok_or_else(|| anyhow!("invalid header `{header}`, expected `Name: value`"))?;
        config
            .headers
            .insert(name.trim().to_string(), value.trim().to_string());
    }

    let engine = &mut config.engine;
    if args.seed.is_some() {
        engine.seed = args.seed;
    }
    if let Some(n) = args.max_suites {
        engine.max_suites = n;
    }
    if let Some(n) = args.scenarios {
        engine.scenarios_per_suite = n;
    }
    if let Some(n) = args.max_steps {
        engine.max_steps = n;
    }
    if let Some(secs) = args.request_timeout {
        engine.request_timeout = secs;
    }
    if args.stop_on_failure {
        engine.stop_on_failure = true;
    }

    if !args.checks.is_empty() {
        config.checks.enabled = args.checks.clone();
    }
    if args.max_response_time.is_some() {
        config.checks.max_response_time = args.max_response_time;
    }
    if !args.targets.is_empty() {
        config.targets = args.targets.clone();
    }
    if !args.include.is_empty() {
        config.filters.include = args.include.clone();
    }
    if !args.exclude.is_empty() {
        config.filters.exclude = args.exclude.clone();
    }
    if args.junit_xml.is_some() {
        config.junit_xml = args.junit_xml.clone();
    }

    if let Some(path) = &args.cassette {
        let mut cassette = config.cassette.take().unwrap_or(CassetteConfig {
            path: path.clone(),
            format: CassetteFormat::default(),
            mask_sensitive_headers: true,
        });
        cassette.path = path.clone();
        config.cassette = Some(cassette);
    }
    if let Some(format) = args.cassette_format {
        match config.cassette.as_mut() {
            Some(cassette) => cassette.format = format.into(),
            None => return Err(anyhow!("--cassette-format needs --cassette or a [cassette] section")),
        }
    }
    Ok(())
}

/// Every event as a JSON line on stdout
struct JsonLines<W: Write>(W);

impl<W: Write> EventHandler for JsonLines<W> {
    fn name(&self) -> &str {
        "json"
    }

    fn handle_event(&mut self, _ctx: &ExecutionContext, event: &Event) -> Result<(), HandlerError> {
        let line = event
            .to_json()
            .map_err(|e| HandlerError::Failed(format!("cannot serialize {}: {e}", event.name())))?;
        writeln!(self.0, "{line}")?;
        self.0.flush()?;
        Ok(())
    }
}
