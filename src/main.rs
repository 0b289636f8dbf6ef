//! pcd-cache - network-first offline cache for a web app's static assets
//!
//! Drives the interception policy from the command line: install and
//! activate cache versions, fetch through the policy, and inspect caches.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use pcd_cache::cache::{CacheStorage, DiskCacheStorage};
use pcd_cache::cli::{build_request, Cli, CliError, Command, StartupConfig};
use pcd_cache::data::{HttpNetwork, Network, OfflineNetwork};
use pcd_cache::policy::InterceptionPolicy;
use pcd_cache::registration::Registration;

/// Sets up tracing output on stderr, filtered by `RUST_LOG` (default: warn)
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Resolves the cache root from the CLI or the XDG cache directory
fn cache_root(config: &StartupConfig) -> Result<PathBuf, CliError> {
    match &config.cache_dir {
        Some(dir) => Ok(dir.clone()),
        None => DiskCacheStorage::new()
            .map(|storage| storage.root().to_path_buf())
            .ok_or(CliError::NoCacheDir),
    }
}

/// Builds the network the policy talks to
fn build_network(config: &StartupConfig, offline: bool) -> Result<Arc<dyn Network>, Box<dyn std::error::Error>> {
    if offline {
        return Ok(Arc::new(OfflineNetwork));
    }
    let network = match config.timeout {
        Some(timeout) => HttpNetwork::with_timeout(timeout)?,
        None => HttpNetwork::new(),
    };
    Ok(Arc::new(network))
}

async fn run(cli: Cli) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let config = StartupConfig::from_cli(&cli)?;
    let root = cache_root(&config)?;
    let storage = Arc::new(DiskCacheStorage::with_dir(root.clone()));
    let offline = matches!(cli.command, Command::Fetch { offline: true, .. });
    let network = build_network(&config, offline)?;
    let policy = InterceptionPolicy::new(config.policy.clone(), storage.clone(), network);

    match cli.command {
        Command::Install => {
            let mut registration = Registration::load(&root);
            registration.install(&policy).await?;
            eprintln!("Installed and activated {}", config.policy.cache_name);
        }
        Command::Activate => {
            let mut registration = Registration::load(&root);
            registration.activate(&policy).await?;
            eprintln!("Activated {}", config.policy.cache_name);
        }
        Command::Fetch {
            path,
            method,
            headers,
            output,
            ..
        } => {
            let request = build_request(&config.policy.origin, &path, &method, &headers)?;
            let result = policy.on_fetch(&request).await;
            // The CLI exits right after, so wait for the background cache write
            policy.settle().await;

            match result {
                Ok(Some(response)) => {
                    eprintln!("HTTP {} {}", response.status, request.url);
                    match output {
                        Some(file) => std::fs::write(file, &response.body)?,
                        None => std::io::stdout().write_all(&response.body)?,
                    }
                    if !response.ok() {
                        return Ok(ExitCode::from(1));
                    }
                }
                Ok(None) => {
                    eprintln!("Network unavailable and {} is not cached", request.url);
                    return Ok(ExitCode::from(2));
                }
                Err(e) => {
                    eprintln!("{}", e);
                    return Ok(ExitCode::from(2));
                }
            }
        }
        Command::Caches => {
            let current = &config.policy.cache_name;
            for name in storage.keys().await? {
                let marker = if &name == current { "*" } else { " " };
                let entries = storage.entries(&name).await?;
                println!("{} {} ({} entries)", marker, name, entries.len());
                for entry in entries {
                    println!(
                        "    {} {} {} bytes, cached {}",
                        entry.status,
                        entry.key.url,
                        entry.size,
                        entry.cached_at.format("%Y-%m-%d %H:%M:%S UTC")
                    );
                }
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
