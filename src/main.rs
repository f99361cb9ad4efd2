//! Tellar node binary

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};

use tellar::agent::{self, Agent};
use tellar::cli::{Cli, Commands, ConfigSubcommand, NodeArgs};
use tellar::config::{self, TellarConfig};
use tellar::discovery::{Advertisement, DiscoveryService};
use tellar::error::{Error, Result};
use tellar::initiator::Initiator;
use tellar::logging::{self, LogGuards};
use tellar::net;
use tellar::server::{self, HttpFetcher, NodeState};

fn main() {
    if let Err(e) = run() {
        eprint!("{}", e.format_for_terminal());
        std::process::exit(e.exit_code());
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let (node, mode) = match cli.command {
        Commands::Config { subcommand } => {
            logging::init_simple(tracing::Level::WARN)?;
            return handle_config_command(subcommand);
        }
        Commands::Serve { node, converse } => (node, Mode::Serve { converse }),
        Commands::Auto { node } => (node, Mode::Auto),
    };

    let config = load_node_config(&node)?;
    let _log_guards: LogGuards = logging::init_logging(&config.logging, cli.verbose, cli.quiet)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        character = %config.character.name,
        language = %config.character.language,
        "Starting Tellar"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(num_cpus::get().min(8))
        .thread_name("tellar")
        .build()
        .map_err(|e| Error::Internal(format!("Failed to create async runtime: {}", e)))?;

    runtime.block_on(async move {
        match mode {
            Mode::Serve { converse } => run_server(config, converse).await,
            Mode::Auto => run_auto(config).await,
        }
    })
}

enum Mode {
    Serve { converse: bool },
    Auto,
}

/// Config file + env, then `--name` / `--language`
fn load_node_config(node: &NodeArgs) -> Result<TellarConfig> {
    let mut config = TellarConfig::load(node.config.as_deref())?;
    config.apply_cli_overrides(node.name.clone(), node.language.clone());
    config.character_name()?;
    Ok(config)
}

/// Gateway + advertiser + discoverer, optionally the initiator too
async fn run_server(config: TellarConfig, converse: bool) -> Result<()> {
    let agent = agent::build_agent(&config)?;

    let http_port = net::find_free_tcp_port(net::HTTP_PORT_START)?;
    let udp_port = net::find_free_udp_port(net::UDP_PORT_START)?;
    let base_url = net::base_url(net::local_ip(), http_port);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", http_port)).await?;
    let fetcher = Arc::new(HttpFetcher::new(Duration::from_secs(config.agent.timeout_secs))?);
    let state = Arc::new(NodeState::new(agent.clone(), base_url.clone(), fetcher));

    let discovery = DiscoveryService::start(
        config.discovery.clone(),
        Some(Advertisement { udp_port, base_url }),
    )?;

    let conversation = converse.then(|| {
        let initiator = Initiator::new(agent.clone(), discovery.directory(), config.initiator.clone());
        tokio::spawn(async move { report_initiator(initiator.run().await) })
    });

    let served = server::serve(listener, state, shutdown_signal()).await;

    if let Some(task) = conversation {
        task.abort();
    }
    stop_discovery(discovery).await;
    served
}

/// Discoverer + initiator only; nothing is served or advertised
async fn run_auto(config: TellarConfig) -> Result<()> {
    let agent: Arc<dyn Agent> = agent::build_agent(&config)?;
    let discovery = DiscoveryService::start(config.discovery.clone(), None)?;
    let initiator = Initiator::new(agent, discovery.directory(), config.initiator.clone());

    tokio::select! {
        result = initiator.run() => report_initiator(result),
        _ = shutdown_signal() => {}
    }

    stop_discovery(discovery).await;
    Ok(())
}

fn report_initiator(result: Result<()>) {
    if let Err(e) = result {
        error!(code = %e.code(), error = %e, "Conversation aborted");
    }
}

async fn stop_discovery(discovery: DiscoveryService) {
    if tokio::task::spawn_blocking(move || discovery.stop()).await.is_err() {
        warn!("Discovery shutdown task failed");
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Could not listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Handle configuration subcommands
fn handle_config_command(subcommand: ConfigSubcommand) -> Result<()> {
    match subcommand {
        ConfigSubcommand::Show { config } => {
            let cfg = TellarConfig::load(config.as_deref())?;
            println!("{}", toml::to_string_pretty(&cfg)?);
        }
        ConfigSubcommand::Init { path, force } => {
            let path = config::init_config(path.as_deref(), force)?;
            println!("Configuration file created: {}", path.display());
        }
        ConfigSubcommand::Validate { config } => {
            TellarConfig::load(config.as_deref())?;
            println!("Configuration is valid.");
        }
    }

    Ok(())
}
