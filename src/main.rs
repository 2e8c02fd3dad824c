use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use coastie_operator::config::{DEFAULT_IMAGE_REGISTRY, DEFAULT_SLACK_API_URL};
use coastie_operator::controller::{
    self, AlertDispatcher, KubeClusterClient, NetworkProber, SlackSink, TestDriver,
};
use coastie_operator::crd::Coastie;
use coastie_operator::leader::{holder_identity, LeaderElection};
use coastie_operator::{Error, OperatorConfig, Timings};
use kube::ResourceExt;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the operator
    Run(RunArgs),
    /// Show version and build information
    Version,
    /// List Coastie resources and their latest results
    Info(InfoArgs),
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Namespace holding the leader election lease
    #[arg(long, env = "OPERATOR_NAMESPACE", default_value = "default")]
    namespace: String,

    /// Registry serving the tcpserver, udpserver and httpserver images
    #[arg(long, env = "COASTIE_IMAGE_REGISTRY", default_value = DEFAULT_IMAGE_REGISTRY)]
    image_registry: String,

    /// Slack Web API base URL
    #[arg(long, env = "SLACK_API_URL", default_value = DEFAULT_SLACK_API_URL)]
    slack_api_url: String,

    /// Keep probe workloads between test passes instead of recreating them
    #[arg(long, env = "KEEP_WORKLOADS")]
    keep_workloads: bool,

    /// Emit logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Seconds between complete test passes
    #[arg(long, env = "REQUEUE_INTERVAL_SECS", default_value_t = 300)]
    requeue_interval_secs: u64,

    /// Rollout polls before a DaemonSet is reported as stuck
    #[arg(long, env = "READINESS_ATTEMPTS", default_value_t = 5)]
    readiness_attempts: u32,

    /// Seconds between rollout polls
    #[arg(long, env = "READINESS_INTERVAL_SECS", default_value_t = 60)]
    readiness_interval_secs: u64,

    /// Probe attempts per test
    #[arg(long, env = "PROBE_ATTEMPTS", default_value_t = 5)]
    probe_attempts: u32,
}

impl RunArgs {
    fn operator_config(&self) -> Result<OperatorConfig, Error> {
        if self.readiness_attempts == 0 || self.probe_attempts == 0 {
            return Err(Error::ConfigError(
                "readiness and probe attempts must be at least 1".to_string(),
            ));
        }
        if self.requeue_interval_secs == 0 {
            return Err(Error::ConfigError(
                "requeue interval must be at least one second".to_string(),
            ));
        }

        Ok(OperatorConfig {
            image_registry: self.image_registry.clone(),
            slack_api_url: self.slack_api_url.clone(),
            keep_workloads: self.keep_workloads,
            timings: Timings {
                requeue_interval: Duration::from_secs(self.requeue_interval_secs),
                readiness_attempts: self.readiness_attempts,
                readiness_interval: Duration::from_secs(self.readiness_interval_secs),
                probe_attempts: self.probe_attempts,
                ..Default::default()
            },
        })
    }
}

#[derive(Parser, Debug)]
struct InfoArgs {
    /// Namespace to list; all namespaces when omitted
    #[arg(long)]
    namespace: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    match args.command {
        Commands::Version => {
            println!("Coastie Operator v{}", env!("CARGO_PKG_VERSION"));
            println!("Build Date: {}", env!("BUILD_DATE"));
            println!("Git SHA: {}", env!("GIT_SHA"));
            println!("Rust Version: {}", env!("RUST_VERSION"));
            Ok(())
        }
        Commands::Info(info_args) => run_info(info_args).await,
        Commands::Run(run_args) => run_operator(run_args).await,
    }
}

async fn run_info(args: InfoArgs) -> Result<(), Error> {
    let client = kube::Client::try_default()
        .await
        .map_err(Error::KubeError)?;

    let api: kube::Api<Coastie> = match &args.namespace {
        Some(ns) => kube::Api::namespaced(client, ns),
        None => kube::Api::all(client),
    };
    let coasties = api
        .list(&Default::default())
        .await
        .map_err(Error::KubeError)?;

    println!("Coastie resources: {}", coasties.items.len());
    for coastie in &coasties.items {
        println!(
            "  {}/{} tests={:?}",
            coastie.namespace().unwrap_or_default(),
            coastie.name_any(),
            coastie.spec.tests
        );
        if let Some(status) = &coastie.status {
            for (protocol, outcome) in &status.test_results {
                println!(
                    "    {}: {} (provisioned {})",
                    protocol, outcome.status, outcome.provisioned_at
                );
            }
        }
    }
    Ok(())
}

fn init_tracing(json: bool) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().with_target(true)).init();
    }
}

async fn run_operator(args: RunArgs) -> Result<(), Error> {
    init_tracing(args.log_json);

    info!("Starting Coastie Operator v{}", env!("CARGO_PKG_VERSION"));

    let config = args.operator_config()?;
    info!(
        "Probe images from {}, test pass every {:?}, keep workloads: {}",
        config.image_registry, config.timings.requeue_interval, config.keep_workloads
    );

    let client = kube::Client::try_default()
        .await
        .map_err(Error::KubeError)?;

    info!("Connected to Kubernetes cluster");

    // Leader election
    let leader_namespace =
        std::env::var("POD_NAMESPACE").unwrap_or_else(|_| args.namespace.clone());
    let is_leader = Arc::new(AtomicBool::new(false));
    let election = LeaderElection::new(
        client.clone(),
        &leader_namespace,
        holder_identity(),
        Arc::clone(&is_leader),
    );
    tokio::spawn(election.run());

    let sink = SlackSink::new(config.slack_api_url.clone())
        .map_err(|e| Error::ConfigError(format!("cannot build Slack client: {e}")))?;
    let prober = NetworkProber::new(&config.timings)?;
    let driver = TestDriver::new(
        KubeClusterClient::new(client.clone()),
        AlertDispatcher::new(Arc::new(sink)),
        Arc::new(prober),
        config,
    );

    let state = Arc::new(controller::ControllerState {
        client,
        driver,
        is_leader,
    });

    controller::run_controller(state).await
}
