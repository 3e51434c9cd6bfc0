use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pib_core::logging::{init_logging_with_config, LogConfig};
use pib_core::{Face, LogLevel, MemoryFace, Pib, PibConfig, PibDb};
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "pib")]
#[command(author, version, about = "Public-key Information Base administration", long_about = None)]
struct Args {
    /// Path to the PIB configuration file
    #[arg(short, long)]
    config: String,

    /// Set the log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable JSON formatted logging
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Bootstrap the service: open the store, bind the TPM, issue the
    /// management certificate
    Init {
        /// Owner name the service runs as
        #[arg(short, long)]
        owner: String,
    },

    /// Install the configured root-user management certificate
    InstallRoot,

    /// Show the store's bindings and registered users
    Status,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level: LogLevel = args
        .log_level
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;
    init_logging_with_config(LogConfig::new(level).json_format(args.json_logs))?;

    let config = PibConfig::load(&args.config)
        .with_context(|| format!("loading configuration from {}", args.config))?;

    match args.command {
        Command::Init { owner } => init(&config, &owner),
        Command::InstallRoot => install_root(&config),
        Command::Status => status(&config),
    }
}

fn init(config: &PibConfig, owner: &str) -> Result<()> {
    let face: Arc<dyn Face> = Arc::new(MemoryFace::new());
    let pib = Pib::new(face, config.db_dir(), &config.tpm_locator(), owner)
        .context("bootstrapping the PIB service")?;

    info!(owner, "service bootstrapped");
    println!("owner:           {}", pib.owner());
    println!("management cert: {}", pib.mgmt_certificate().name());
    Ok(())
}

fn install_root(config: &PibConfig) -> Result<()> {
    let db = PibDb::open(config.db_dir()).context("opening the store")?;
    db.add_root_user(config.root_cert())
        .context("installing the root management certificate")?;
    println!("root certificate installed: {}", config.root_cert().name());
    Ok(())
}

fn status(config: &PibConfig) -> Result<()> {
    let db = PibDb::open(config.db_dir()).context("opening the store")?;

    println!(
        "owner:       {}",
        db.owner_name()?.unwrap_or_else(|| "(unset)".into())
    );
    println!(
        "tpm locator: {}",
        db.tpm_locator()?.unwrap_or_else(|| "(unset)".into())
    );

    let users = db.list_users()?;
    println!("users:       {}", users.len());
    for user in users {
        match db.get_user_mgmt_certificate(&user)? {
            Some(cert) => println!("  {:12} {}", user, cert.name()),
            None => println!("  {:12} (no certificate)", user),
        }
    }
    Ok(())
}
