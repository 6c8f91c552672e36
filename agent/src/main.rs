//! The Paradrop edge agent.
//!
//! Wires the confd reconciler and the chute update pipeline together behind
//! a small line-delimited JSON intake socket. The HTTP API, reverse proxy,
//! and friends live elsewhere and talk to this process.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::Parser;
use ip_network::Ipv4Network;
use paradrop_chute::container::RegistryAuth;
use paradrop_chute::docker::DockerEngine;
use paradrop_chute::{AgentContext, Settings, Update};
use tokio::net::UnixListener;
use tokio::sync::mpsc;

mod intake;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory of UCI configuration files to reconcile.
    #[arg(
        long,
        env = "PARADROP_CONFIG_DIR",
        default_value = "/var/lib/paradrop/config"
    )]
    config_dir: PathBuf,

    /// Directory for derived daemon configs and PID files.
    #[arg(long, env = "PARADROP_WRITE_DIR", default_value = "/var/run/paradrop")]
    write_dir: PathBuf,

    /// Root for per-chute data directories.
    #[arg(long, env = "PARADROP_DATA_ROOT", default_value = "/var/lib/paradrop")]
    data_dir: PathBuf,

    /// Supernet to lease per-chute /24 subnets from.
    #[arg(
        long,
        env = "DYNAMIC_NETWORK_POOL",
        default_value = "192.168.128.0/17"
    )]
    dynamic_network_pool: Ipv4Network,

    #[arg(long, env = "REGISTRY_USERNAME")]
    registry_username: Option<String>,

    #[arg(long, env = "REGISTRY_PASSWORD", hide_env_values = true)]
    registry_password: Option<String>,

    /// Identity reported to chutes as PARADROP_ROUTER_ID.
    #[arg(long, env = "PARADROP_ROUTER_ID", default_value = "router")]
    router_id: String,

    /// The veth glue tool invoked after a chute starts.
    #[arg(long, env = "PARADROP_PIPEWORK", default_value = "/usr/bin/pipework")]
    pipework: PathBuf,

    #[arg(long, default_value = "/sys/class/net", hide = true)]
    sys_net_dir: PathBuf,

    /// Physical interface treated as the WAN uplink.
    #[arg(long, env = "PARADROP_WAN_INTERFACE", default_value = "eth0")]
    wan_interface: String,

    /// Unix socket accepting newline-delimited JSON update requests.
    #[arg(
        long,
        env = "PARADROP_SOCKET",
        default_value = "/var/run/paradrop/agent.sock"
    )]
    socket: PathBuf,

    /// Plan host commands without executing them.
    #[arg(long)]
    dry_run: bool,

    /// Attach the response log to update results.
    #[arg(long, env = "PARADROP_DEBUG")]
    debug: bool,

    #[arg(long, env = "RUST_LOG", default_value = "info")]
    log_filter: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    paradrop_logging::setup_global_subscriber(&cli.log_filter)?;

    let settings = Settings {
        config_dir: cli.config_dir,
        write_dir: cli.write_dir,
        data_dir: cli.data_dir,
        dynamic_network_pool: cli.dynamic_network_pool,
        registry_auth: match (cli.registry_username, cli.registry_password) {
            (Some(username), Some(password)) => Some(RegistryAuth { username, password }),
            _ => None,
        },
        router_id: cli.router_id,
        pipework: cli.pipework,
        sys_net_dir: cli.sys_net_dir,
        wan_interface: cli.wan_interface,
        apply_commands: !cli.dry_run,
        debug_mode: cli.debug,
    };

    std::fs::create_dir_all(&settings.config_dir).context("Failed to create config dir")?;
    std::fs::create_dir_all(&settings.write_dir).context("Failed to create write dir")?;
    std::fs::create_dir_all(&settings.data_dir).context("Failed to create data dir")?;

    let engine = DockerEngine::connect().context("Failed to set up the container engine")?;
    let ctx = Arc::new(AgentContext::new(settings, Arc::new(engine))?);

    // Bring the host in line with the declared configuration before taking
    // any updates.
    {
        let mut confd = ctx.confd.lock().await;
        confd
            .load_config(&ctx.settings.config_dir, ctx.settings.apply_commands)
            .await
            .context("Initial configuration load failed")?;
        tracing::info!(
            commands = confd.previous_commands().len(),
            "Initial configuration loaded"
        );
    }

    let socket = cli.socket;
    let _ = std::fs::remove_file(&socket);
    let listener = UnixListener::bind(&socket).context("Failed to bind intake socket")?;
    tracing::info!(socket = %socket.display(), "Listening for updates");

    let (tx, rx) = mpsc::channel::<Update>(16);

    tokio::spawn(intake::serve(listener, tx));

    tokio::select! {
        () = intake::dispatch(rx, ctx.clone()) => {}
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for interrupt")?;
            tracing::info!("Shutting down");
        }
    }

    Ok(())
}
