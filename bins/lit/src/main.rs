use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use lit::docker::DockerRuntime;
use lit::orchestrator::{Orchestrator, RunOptions};
use lit::store::HttpDataStore;
use lit_common::environment::RuntimeEnvironment;
use lit_common::fixture::Fixture;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser)]
#[command(name = "lit")]
#[command(about = "Logstash Integration Test - run pipeline tests against throwaway containers", long_about = None)]
struct Cli {
    /// Test name to run (runs every test when omitted)
    #[arg(long)]
    testname: Option<String>,

    /// Directory holding logstash_tests.yml (defaults to the current directory)
    #[arg(long)]
    testpath: Option<PathBuf>,

    /// Runtime configuration file (images, credentials, network)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Give up waiting for Elasticsearch after this many seconds (waits forever by default)
    #[arg(long)]
    readiness_timeout: Option<u64>,

    /// Kill a Logstash container still running after this many seconds
    #[arg(long)]
    processor_timeout: Option<u64>,

    /// Use local images only
    #[arg(long, default_value = "false")]
    skip_pull: bool,

    /// List the tests in the fixture and exit
    #[arg(long, default_value = "false")]
    list: bool,

    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let test_dir = match cli.testpath {
        Some(path) => path,
        None => std::env::current_dir().context("Failed to read current directory")?,
    };

    let fixture = Fixture::load(&test_dir)
        .with_context(|| format!("Failed to load fixture from {}", test_dir.display()))?;

    if cli.list {
        for name in fixture.names() {
            println!("{}", name);
        }
        return Ok(());
    }

    let entries = fixture.select(cli.testname.as_deref())?;

    let mut environment = RuntimeEnvironment::resolve(cli.config.as_deref())?;
    if let Ok(url) = std::env::var("LIT_ES_URL") {
        environment = environment.with_data_store_url(url);
    }
    if let Ok(network) = std::env::var("LIT_NETWORK") {
        environment = environment.with_network_name(network);
    }

    let runtime = DockerRuntime::connect()?;
    let store = HttpDataStore::new(&environment.data_store_url, environment.credentials.clone())
        .context("Failed to build data store client")?;

    let options = RunOptions {
        pull_images: !cli.skip_pull,
        readiness_deadline: cli.readiness_timeout.map(Duration::from_secs),
        processor_deadline: cli.processor_timeout.map(Duration::from_secs),
    };

    info!(tests = entries.len(), test_dir = %test_dir.display(), "lit booting");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, tearing down before exit");
            let _ = shutdown_tx.send(true);
        }
    });

    let orchestrator = Orchestrator::new(Arc::new(runtime), Arc::new(store), environment, options)
        .with_shutdown(shutdown_rx);
    let report = orchestrator.run(entries).await;

    print!("{}", report.render());
    std::process::exit(report.exit_code());
}
