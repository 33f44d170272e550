//! AWG Admin - Peer Lifecycle Manager for AmneziaWG
//!
//! Serves the HTTP API and offers direct command line access to the peer
//! roster of one AmneziaWG interface.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use awg_admin::api::HttpServer;
use awg_admin::config::{AwgAdminConfig, ControllerKind};
use awg_admin::error::{Error, Result};
use awg_admin::interface::{controller_from_config, InterfaceController};
use awg_admin::orchestrator::PeerOrchestrator;
use awg_admin::settings::SettingsService;
use awg_admin::store::{Database, PeerUpdate, SettingsStore, SqlitePeerRepository};

/// AWG Admin - Peer Lifecycle Manager for AmneziaWG
#[derive(Parser)]
#[command(name = "awg-admin")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/awg-admin/awg-admin.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); defaults to [logging] level
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API and background maintenance
    Serve,

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "awg-admin.toml")]
        output: PathBuf,

        /// Public host name or IP clients connect to
        #[arg(long, default_value = "vpn.example.com")]
        endpoint: String,
    },

    /// Validate configuration file
    Validate,

    /// Show configuration summary
    Info,

    /// Show interface status and peer activity
    Status,

    /// Push the durable peer roster onto the interface
    Reconcile,

    /// Manage peers
    Peers {
        #[command(subcommand)]
        command: PeerCommands,
    },
}

#[derive(Subcommand)]
enum PeerCommands {
    /// List peers with their runtime status
    List,

    /// Create a peer
    Create {
        /// Peer name
        name: String,

        /// Expiry time (RFC 3339)
        #[arg(long)]
        expires_at: Option<DateTime<Utc>>,
    },

    /// Update a peer
    Update {
        /// Peer id
        id: String,

        /// New name
        #[arg(long)]
        name: Option<String>,

        /// New expiry time (RFC 3339)
        #[arg(long)]
        expires_at: Option<DateTime<Utc>>,

        /// Enable the peer
        #[arg(long, conflicts_with = "disable")]
        enable: bool,

        /// Disable the peer
        #[arg(long)]
        disable: bool,
    },

    /// Delete a peer
    Delete {
        /// Peer id
        id: String,
    },

    /// Print a peer's client configuration
    Config {
        /// Peer id
        id: String,

        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = cli
        .log_level
        .clone()
        .or_else(|| {
            AwgAdminConfig::from_file(&cli.config)
                .ok()
                .map(|c| c.logging.level)
        })
        .unwrap_or_else(|| "info".to_string());
    init_logging(&level);

    match cli.command {
        Commands::Serve => run_serve(&cli.config).await,
        Commands::Init { output, endpoint } => run_init(output, endpoint),
        Commands::Validate => run_validate(&cli.config),
        Commands::Info => run_info(&cli.config),
        Commands::Status => run_status(&cli.config).await,
        Commands::Reconcile => run_reconcile(&cli.config).await,
        Commands::Peers { command } => run_peers(&cli.config, command).await,
    }
}

/// Initialize logging
fn init_logging(level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wired-up services shared by every command that touches peers
struct Services {
    config: AwgAdminConfig,
    controller: Arc<dyn InterfaceController>,
    orchestrator: Arc<PeerOrchestrator>,
    settings: Arc<SettingsService>,
}

fn load_services(config_path: &Path) -> Result<Services> {
    let config = match AwgAdminConfig::from_file(config_path) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to load configuration from {:?}: {}", config_path, e);
            return Err(e);
        }
    };

    if config.interface.controller == ControllerKind::Process && !nix::unistd::Uid::effective().is_root() {
        tracing::warn!("Not running as root; interface commands will likely fail");
    }

    let db = match Database::open(&config.database.path) {
        Ok(db) => db,
        Err(e) => {
            tracing::error!("Failed to open database {:?}: {}", config.database.path, e);
            return Err(e);
        }
    };

    let controller = controller_from_config(&config)?;
    let store = SettingsStore::new(db.clone());
    let orchestrator = Arc::new(PeerOrchestrator::from_config(
        &config,
        Arc::new(SqlitePeerRepository::new(db)),
        Arc::clone(&controller),
        store.clone(),
    )?);
    let settings = Arc::new(SettingsService::from_config(
        &config,
        Arc::clone(&orchestrator),
        store,
    ));

    Ok(Services {
        config,
        controller,
        orchestrator,
        settings,
    })
}

/// Run the server
async fn run_serve(config_path: &Path) -> Result<()> {
    tracing::info!("Starting AWG Admin...");
    let services = load_services(config_path)?;
    let config = &services.config;

    if config.peers.reconcile_on_start {
        match services.orchestrator.reconcile().await {
            Ok(report) if report.failed > 0 => {
                tracing::warn!("{} peers could not be reconciled", report.failed)
            }
            Ok(_) => {}
            Err(e) => tracing::error!("Startup reconciliation failed: {}", e),
        }
    }

    if let Some(interval) = config.expiry_check_interval() {
        let orchestrator = Arc::clone(&services.orchestrator);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match orchestrator.disable_expired(Utc::now()).await {
                    Ok(report) if !report.disabled.is_empty() || report.failed > 0 => {
                        tracing::info!(
                            "Disabled {} expired peers, {} interface removals failed",
                            report.disabled.len(),
                            report.failed
                        )
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!("Expiry sweep failed: {}", e),
                }
            }
        });
    }

    let http_server = HttpServer::new(
        config.api.clone(),
        Arc::clone(&services.orchestrator),
        Arc::clone(&services.settings),
    );

    if config.api.enabled {
        tokio::select! {
            result = http_server.start() => {
                if let Err(e) = result {
                    tracing::error!("HTTP server error: {}", e);
                    return Err(e);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received shutdown signal");
            }
        }
    } else {
        tracing::info!("HTTP API disabled; running maintenance only");
        tokio::signal::ctrl_c().await?;
        tracing::info!("Received shutdown signal");
    }

    tracing::info!("AWG Admin stopped");
    Ok(())
}

/// Initialize configuration file
fn run_init(output: PathBuf, endpoint: String) -> Result<()> {
    if output.exists() {
        return Err(Error::Config(format!(
            "{} already exists; refusing to overwrite",
            output.display()
        )));
    }

    let config_content = format!(r#"# AWG Admin Configuration
# Generated configuration file

[interface]
name = "awg0"
# process drives awg/wg; simulated keeps peers in memory
controller = "process"
# process uses `wg genkey`; local generates keys in-process
keygen = "process"
awg_binary = "awg"
wg_binary = "wg"
endpoint = "{endpoint}"
listen_port = 51820
address = "10.8.0.1/24"
dns = ["1.1.1.1", "8.8.8.8"]
command_timeout_secs = 10

# Uncomment to pin the obfuscation parameters handed to clients
# [obfuscation]
# jc = 4
# jmin = 40
# jmax = 70
# s1 = 55
# s2 = 55
# h1 = 1234567891
# h2 = 1234567892
# h3 = 1234567893
# h4 = 1234567894

[database]
path = "/var/lib/awg-admin/awg-admin.db"

[api]
enabled = true
bind_address = "127.0.0.1:8080"
cors_enabled = false

[peers]
expiry_check_interval_secs = 60
reconcile_on_start = true

[logging]
level = "info"
"#);

    AwgAdminConfig::from_str(&config_content)?;
    std::fs::write(&output, config_content)?;
    println!("Configuration file created: {}", output.display());
    println!("\nEdit the file to match your interface.");
    println!("Then start with: awg-admin --config {} serve", output.display());

    Ok(())
}

/// Validate configuration
fn run_validate(config_path: &Path) -> Result<()> {
    match AwgAdminConfig::from_file(config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  Interface:  {} ({})", config.interface.name, config.interface.controller);
            println!("  Endpoint:   {}:{}", config.interface.endpoint, config.interface.listen_port);
            println!("  Address:    {}", config.interface.address);
            println!("  Database:   {}", config.database.path.display());
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e)
        }
    }
}

/// Show configuration summary
fn run_info(config_path: &Path) -> Result<()> {
    let config = AwgAdminConfig::from_file(config_path)?;
    let obfuscation = config.fallback_obfuscation();

    println!("AWG Admin Information");
    println!("=====================");
    println!();
    println!("Interface:        {}", config.interface.name);
    println!("Controller:       {}", config.interface.controller);
    println!("Endpoint:         {}:{}", config.interface.endpoint, config.interface.listen_port);
    println!("Address:          {}", config.interface.address);
    println!("Address Pool:     {}.2 - {}.254", config.subnet_prefix()?, config.subnet_prefix()?);
    println!("DNS:              {}", config.interface.dns.join(", "));
    println!("Command Timeout:  {} s", config.interface.command_timeout_secs);
    println!();
    println!("Obfuscation ({}):", if config.obfuscation.is_some() { "configured" } else { "defaults" });
    println!("  Jc/Jmin/Jmax:   {}/{}/{}", obfuscation.jc, obfuscation.jmin, obfuscation.jmax);
    println!("  S1/S2:          {}/{}", obfuscation.s1, obfuscation.s2);
    println!(
        "  H1-H4:          {} {} {} {}",
        obfuscation.h1, obfuscation.h2, obfuscation.h3, obfuscation.h4
    );
    println!();
    println!("Database:         {}", config.database.path.display());
    println!("API:              {} (enabled: {})", config.api.bind_address, config.api.enabled);
    match config.expiry_check_interval() {
        Some(interval) => println!("Expiry Sweep:     every {} s", interval.as_secs()),
        None => println!("Expiry Sweep:     disabled"),
    }

    Ok(())
}

/// Show interface and peer status
async fn run_status(config_path: &Path) -> Result<()> {
    let services = load_services(config_path)?;
    let status = services.settings.server_status().await;

    println!("Interface {} ({})", status.interface_name, services.controller.kind());
    println!("  Running:        {}", if status.running { "yes" } else { "no" });
    println!("  Live Peers:     {}", status.peer_count);
    println!("  Received:       {} bytes", status.transfer_rx);
    println!("  Sent:           {} bytes", status.transfer_tx);
    println!(
        "  Last Handshake: {}",
        status
            .last_handshake
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string())
    );

    if status.running {
        println!();
        print_peers(&services).await?;
    }
    Ok(())
}

/// Push every durable peer onto the interface
async fn run_reconcile(config_path: &Path) -> Result<()> {
    let services = load_services(config_path)?;
    let report = services.orchestrator.reconcile().await?;
    println!(
        "Reconciled: {} added, {} removed, {} failed",
        report.added, report.removed, report.failed
    );
    if report.failed > 0 {
        return Err(Error::InterfaceCommand(format!(
            "{} peers could not be reconciled",
            report.failed
        )));
    }
    Ok(())
}

async fn print_peers(services: &Services) -> Result<()> {
    let peers = services.orchestrator.list_with_status().await?;
    if peers.is_empty() {
        println!("No peers");
        return Ok(());
    }

    println!(
        "{:<36}  {:<20}  {:<15}  {:<8}  {:<7}  {:>12}  {:>12}",
        "ID", "NAME", "ADDRESS", "ENABLED", "ONLINE", "RX", "TX"
    );
    for (peer, status) in peers {
        println!(
            "{:<36}  {:<20}  {:<15}  {:<8}  {:<7}  {:>12}  {:>12}",
            peer.id,
            peer.name,
            peer.address,
            peer.enabled,
            status.online,
            status.transfer_rx,
            status.transfer_tx
        );
    }
    Ok(())
}

/// Peer management commands
async fn run_peers(config_path: &Path, command: PeerCommands) -> Result<()> {
    let services = load_services(config_path)?;
    let orchestrator = &services.orchestrator;

    match command {
        PeerCommands::List => print_peers(&services).await,
        PeerCommands::Create { name, expires_at } => {
            let peer = orchestrator.create(&name, expires_at).await?;
            println!("Created peer {} ({}) at {}", peer.name, peer.id, peer.address);
            Ok(())
        }
        PeerCommands::Update {
            id,
            name,
            expires_at,
            enable,
            disable,
        } => {
            let update = PeerUpdate {
                name,
                expires_at,
                enabled: match (enable, disable) {
                    (true, _) => Some(true),
                    (_, true) => Some(false),
                    _ => None,
                },
            };
            if update.is_empty() {
                return Err(Error::Validation("nothing to update".into()));
            }

            let peer = orchestrator
                .update(&id, update)
                .await?
                .ok_or_else(|| Error::NotFound(id.clone()))?;
            println!(
                "Updated peer {} ({}), enabled: {}",
                peer.name, peer.id, peer.enabled
            );
            Ok(())
        }
        PeerCommands::Delete { id } => {
            if !orchestrator.delete(&id).await? {
                return Err(Error::NotFound(id));
            }
            println!("Deleted peer {}", id);
            Ok(())
        }
        PeerCommands::Config { id, output } => {
            let config = orchestrator
                .render_client_config(&id)
                .await?
                .ok_or_else(|| Error::NotFound(id.clone()))?;
            match output {
                Some(path) => {
                    std::fs::write(&path, config)?;
                    // Contains the peer's private key
                    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
                    println!("Client configuration written to {}", path.display());
                }
                None => print!("{}", config),
            }
            Ok(())
        }
    }
}
