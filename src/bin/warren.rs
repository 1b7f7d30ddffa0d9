//! Warren control plane and bastion.
//!
//! ```text
//! warren serve
//! warren provision-node --name edge-1 --address 10.1.0.5
//! warren hash-password --password hunter2
//! ```
//!
//! `serve` runs the HTTP API, the liveness monitor and the SSH bastion in one
//! process until Ctrl-C or SIGTERM. `provision-node` works on the registry
//! snapshot directly and prints the new node's token once.

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use clap::{Parser, Subcommand};
use mockable::DefaultClock;
use tokio::net::TcpListener;
use tracing::{info, warn};

use warren::api::{self, ApiState};
use warren::bastion::{
    adapters::{
        JsonFileUserDirectory,
        ssh::{HostKey, SshBackendConnector, SshGateway},
    },
    services::{Authenticator, SessionBroker},
};
use warren::config::WarrenConfig;
use warren::fleet::{
    adapters::{HttpNodeAgent, memory::InMemoryFleetRepository},
    domain::Resources,
    services::{
        ContainerLifecycleService, FleetRegistryService, LivenessMonitor, ProvisionNodeRequest,
    },
};
use warren::{shutdown, telemetry};

/// Boxed error type for the main result.
type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Parser)]
#[command(name = "warren", version, about = "Container fleet control plane and SSH bastion")]
struct Cli {
    /// Configuration file.
    #[arg(long, short, env = "WARREN_CONFIG", default_value = "warren.toml")]
    config: Utf8PathBuf,

    /// Log filter used when `RUST_LOG` is unset; overrides `log.level`.
    #[arg(long, env = "WARREN_LOG")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the API server, liveness monitor and SSH bastion.
    Serve,
    /// Add a node to the registry snapshot and print its token.
    ProvisionNode {
        /// Node name (lowercase letters, digits and hyphens).
        #[arg(long)]
        name: String,
        /// `host` or `host:port` reachable from the bastion.
        #[arg(long)]
        address: String,
        /// Memory in MB.
        #[arg(long, requires_all = ["cpu_cores", "storage_gb"])]
        memory_mb: Option<u64>,
        /// CPU cores.
        #[arg(long, requires_all = ["memory_mb", "storage_gb"])]
        cpu_cores: Option<u32>,
        /// Storage in GB.
        #[arg(long, requires_all = ["memory_mb", "cpu_cores"])]
        storage_gb: Option<u64>,
    },
    /// Print a bcrypt hash for the user directory.
    HashPassword {
        /// Password to hash; read from standard input when omitted.
        #[arg(long)]
        password: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let cli = Cli::parse();
    let config = WarrenConfig::load(&cli.config)?;
    telemetry::init(cli.log_level.as_deref().unwrap_or(&config.log.level));

    match cli.command {
        Command::Serve => serve(config).await,
        Command::ProvisionNode {
            name,
            address,
            memory_mb,
            cpu_cores,
            storage_gb,
        } => {
            let capacity = match (memory_mb, cpu_cores, storage_gb) {
                (Some(memory), Some(cpu), Some(storage)) => {
                    Some(Resources::new(memory, cpu, storage))
                }
                _ => None,
            };
            let request = ProvisionNodeRequest {
                name,
                address,
                capacity,
            };
            provision_node(&config, request).await
        }
        Command::HashPassword { password } => hash_password(password),
    }
}

fn open_repository(path: Option<&Utf8Path>) -> Result<InMemoryFleetRepository, BoxError> {
    Ok(match path {
        Some(snapshot) => InMemoryFleetRepository::with_snapshot(snapshot)?,
        None => InMemoryFleetRepository::new(),
    })
}

async fn serve(config: WarrenConfig) -> Result<(), BoxError> {
    let shutdown = shutdown::install_shutdown_handler();
    let repository = Arc::new(open_repository(config.registry.snapshot_path.as_deref())?);
    let clock = Arc::new(DefaultClock);

    let registry = FleetRegistryService::new(Arc::clone(&repository), Arc::clone(&clock))
        .with_strategy(config.registry.placement.strategy())
        .with_heartbeat_timeout(config.registry.heartbeat_timeout());
    let agent = Arc::new(HttpNodeAgent::new(
        config.agent.port,
        config.agent.request_timeout(),
    )?);
    let lifecycle = ContainerLifecycleService::new(registry.clone(), agent, clock);

    let monitor = LivenessMonitor::new(registry.clone(), config.registry.sweep_interval())
        .spawn(shutdown.clone());

    let base = ApiState::new(registry, lifecycle)
        .with_default_allocation(config.registry.default_allocation)
        .with_heartbeat_interval_secs(config.registry.heartbeat_interval_secs);
    let state = match &config.api.admin_token {
        Some(token) => base.with_admin_token(token.clone()),
        None => {
            warn!("api.admin_token is not set, admin routes are disabled");
            base
        }
    };
    let api_listener = TcpListener::bind(config.api.listen).await?;
    let api_task = tokio::spawn(api::serve(api_listener, api::router(state), shutdown.clone()));

    let host_key = HostKey::load_or_generate(&config.bastion.host_key_path)?;
    let directory = Arc::new(JsonFileUserDirectory::new(&config.bastion.users_path)?);
    let authenticator = Authenticator::new(directory, Arc::clone(&repository));
    let connector = Arc::new(SshBackendConnector::new(host_key.key_pair()?));
    let broker = SessionBroker::new(
        connector,
        config.bastion.dial_timeout(),
        config.bastion.backend_ssh_port,
    )
    .with_banner(config.bastion.banner.clone());
    let gateway = SshGateway::new(authenticator, broker, &host_key)?;
    let ssh_listener = TcpListener::bind(config.bastion.listen).await?;
    let bastion_shutdown = shutdown.clone();
    let bastion_task =
        tokio::spawn(async move { gateway.serve(ssh_listener, bastion_shutdown).await });

    let api_result = api_task.await;
    shutdown.cancel();
    if let Err(err) = bastion_task.await {
        warn!(%err, "bastion task failed");
    }
    if let Err(err) = monitor.await {
        warn!(%err, "liveness monitor task failed");
    }
    repository.save_snapshot()?;
    info!("stopped");
    api_result??;
    Ok(())
}

async fn provision_node(
    config: &WarrenConfig,
    request: ProvisionNodeRequest,
) -> Result<(), BoxError> {
    let Some(snapshot) = config.registry.snapshot_path.as_deref() else {
        return Err("registry.snapshot_path must be set to provision nodes offline".into());
    };
    let repository = Arc::new(InMemoryFleetRepository::with_snapshot(snapshot)?);
    let registry = FleetRegistryService::new(Arc::clone(&repository), Arc::new(DefaultClock));
    let (node, token) = registry.provision_node(request).await?;
    repository.save_snapshot()?;

    let mut out = io::stdout().lock();
    writeln!(out, "node_id: {}", node.id())?;
    writeln!(out, "token:   {}", token.expose())?;
    Ok(())
}

fn hash_password(password: Option<String>) -> Result<(), BoxError> {
    let plaintext = match password {
        Some(value) => value,
        None => {
            let mut line = String::new();
            io::stdin().lock().read_line(&mut line)?;
            line.trim_end_matches(['\r', '\n']).to_owned()
        }
    };
    if plaintext.is_empty() {
        return Err("password must not be empty".into());
    }
    let hash = bcrypt::hash(plaintext, bcrypt::DEFAULT_COST)?;
    writeln!(io::stdout().lock(), "{hash}")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provision_node_arguments_parse() {
        let cli = Cli::try_parse_from([
            "warren",
            "provision-node",
            "--name",
            "edge-1",
            "--address",
            "10.1.0.5:2222",
        ])
        .expect("arguments parse");

        assert!(matches!(
            cli.command,
            Command::ProvisionNode { ref name, memory_mb: None, .. } if name == "edge-1"
        ));
        assert_eq!(cli.config, Utf8PathBuf::from("warren.toml"));
    }

    #[test]
    fn partial_capacity_is_rejected() {
        let parsed = Cli::try_parse_from([
            "warren",
            "provision-node",
            "--name",
            "edge-1",
            "--address",
            "10.1.0.5",
            "--memory-mb",
            "2048",
        ]);

        assert!(parsed.is_err());
    }
}
