use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use ngx_manager::{Daemon, GenerateOptions, Manager, SystemRunner};
use tracing::error;

mod config;

#[derive(Parser)]
#[command(name = "ngx-manager", version, about = "nginx certificate and vhost manager")]
struct Args {
    /// Extra configuration file, layered on top of the defaults.
    #[arg(short, long)]
    config: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate certificates and nginx configuration for all sites.
    Generate {
        /// Do not reload nginx after writing.
        #[arg(long)]
        no_reload: bool,
        /// Do not remove conf files for vanished sites.
        #[arg(long)]
        no_clean: bool,
        /// Print the outcome as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Renew installed certificates that are close to expiry.
    Renew {
        /// Renew only this domain.
        domain: Option<String>,
        /// Renew even when not due.
        #[arg(long)]
        force: bool,
        #[arg(long)]
        json: bool,
    },
    /// List configured sites and their certificate state.
    List,
    /// Remove a site's configuration and, by default, its certificate.
    Remove {
        name: String,
        #[arg(long)]
        keep_cert: bool,
    },
    /// Show nginx and certificate status.
    Status,
    /// Run in the foreground: watch vhosts.yml and renew on schedule.
    Run,
    /// Print the effective configuration.
    Cfg,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();
    if let Err(err) = run().await {
        error!("{err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let args = Args::parse();
    let figment = config::load_config_figment(args.config.as_deref());
    let file_config = config::Config::extract(&figment)?;

    if matches!(args.command, Command::Cfg) {
        println!("{file_config:#?}");
        return Ok(());
    }

    let config = file_config.into_manager_config()?;
    let manager = Manager::new(config.clone(), Arc::new(SystemRunner))?;

    match args.command {
        Command::Generate {
            no_reload,
            no_clean,
            json,
        } => {
            let outcome = manager
                .generate(GenerateOptions {
                    reload: !no_reload,
                    clean: !no_clean,
                })
                .await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                println!(
                    "issued {}, valid {}, downgraded {}, written {}, removed {}{}",
                    outcome.issued.len(),
                    outcome.valid.len(),
                    outcome.downgraded.len(),
                    outcome.written.len(),
                    outcome.removed.len(),
                    if outcome.reloaded { ", reloaded" } else { "" },
                );
                for (domain, err) in &outcome.downgraded {
                    println!("  {domain}: HTTP only ({err})");
                }
            }
        }
        Command::Renew {
            domain,
            force,
            json,
        } => {
            let report = manager.renew(domain.as_deref(), force).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "renewed {}, skipped {}, failed {}",
                    report.renewed.len(),
                    report.skipped.len(),
                    report.failed.len(),
                );
                for (domain, err) in &report.failed {
                    println!("  {domain}: {err}");
                }
            }
        }
        Command::List => {
            for site in manager.list_sites()? {
                let cert = match (site.cert_installed, site.cert_expires) {
                    (true, Some(exp)) => format!("cert until {exp}"),
                    (true, None) => "cert unreadable".to_string(),
                    (false, _) if site.ssl => "cert missing".to_string(),
                    (false, _) => "http only".to_string(),
                };
                println!("{:<20} {:<40} {cert}", site.name, site.domains.join(", "));
            }
        }
        Command::Remove { name, keep_cert } => {
            manager.remove_site(&name, keep_cert).await?;
        }
        Command::Status => {
            let status = manager.status()?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Command::Run => {
            let daemon = Daemon::new(
                manager,
                config.renew_check_interval,
                config.renew_timeout,
            );
            daemon.run(&config.vhosts_file).await?;
        }
        Command::Cfg => unreachable!(),
    }
    Ok(())
}
