mod cli;

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use xo_machine::{Driver, Error, MachineConfig, MachineStore, Result, create_flags};

use crate::cli::{Cli, Commands, CreateArgs};

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env if present, before clap reads env fallbacks
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let store = MachineStore::new(cli.storage_path);

    match run(cli.command, &store).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            ExitCode::FAILURE
        }
    }
}

async fn load(store: &MachineStore, name: &str) -> Result<Driver> {
    Ok(Driver::new(store.load(name).await?))
}

async fn run(command: Commands, store: &MachineStore) -> Result<()> {
    match command {
        Commands::Create(args) => create(args, store).await,
        Commands::Start(m) => load(store, &m.name).await?.start().await,
        Commands::Stop(m) => load(store, &m.name).await?.stop().await,
        Commands::Kill(m) => load(store, &m.name).await?.kill().await,
        Commands::Restart(m) => load(store, &m.name).await?.restart().await,
        Commands::Rm(m) => {
            let mut driver = load(store, &m.name).await?;
            driver.remove().await?;
            store.remove(&m.name).await
        }
        Commands::Status(m) => {
            let driver = load(store, &m.name).await?;
            match driver.state().await {
                Ok(state) => {
                    println!("{state}");
                    Ok(())
                }
                Err(failure) => {
                    println!("{}", failure.state);
                    Err(failure.error)
                }
            }
        }
        Commands::Url(m) => {
            println!("{}", load(store, &m.name).await?.url()?);
            Ok(())
        }
        Commands::Ip(m) => {
            println!("{}", load(store, &m.name).await?.ip()?);
            Ok(())
        }
        Commands::SshHostname(m) => {
            println!("{}", load(store, &m.name).await?.ssh_hostname()?);
            Ok(())
        }
        Commands::Ls => {
            for name in store.list().await? {
                println!("{name}");
            }
            Ok(())
        }
        Commands::Flags => {
            for flag in create_flags() {
                println!("--{:<18} {:<16} {}", flag.name, flag.env_var, flag.usage);
            }
            Ok(())
        }
    }
}

async fn create(args: CreateArgs, store: &MachineStore) -> Result<()> {
    if store.exists(&args.name).await? {
        return Err(Error::Configuration {
            field: "machine-name",
            reason: format!("machine {} already exists", args.name),
        });
    }

    let config = MachineConfig::from_options(&args.name, store.root(), &args.options)?;
    let mut driver = Driver::new(config);
    let created = driver.create().await;

    // A VM that exists remotely keeps its record so it can be removed later.
    let saved = if driver.config().vm_id().is_some() {
        store.save(driver.config()).await
    } else {
        store.remove(&args.name).await
    };
    created?;
    saved?;

    let url = driver.url()?;
    tracing::info!(machine = %args.name, %url, "machine ready");
    println!("{url}");
    Ok(())
}
