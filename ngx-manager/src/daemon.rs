use std::{path::Path, time::Duration};

use anyhow::{Context, Result};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::manager::{GenerateOptions, Manager};

const LIVENESS_INTERVAL: Duration = Duration::from_secs(30);

/// Long-running mode: keep certificates fresh, regenerate on vhosts.yml
/// edits, and keep nginx alive, until SIGTERM or ctrl-c.
pub struct Daemon {
    manager: Manager,
    renew_check_interval: Duration,
    renew_timeout: Duration,
}

impl Daemon {
    pub fn new(manager: Manager, check_interval: Duration, renew_timeout: Duration) -> Self {
        Self {
            manager,
            renew_check_interval: check_interval,
            renew_timeout,
        }
    }

    pub async fn run(self, vhosts_file: &Path) -> Result<()> {
        // First pass before anything is scheduled. A failure here is not
        // fatal; the watcher and ticker will retry.
        self.regenerate().await;
        if !self.manager.nginx().is_running() {
            if let Err(err) = self.manager.nginx().start() {
                error!("failed to start nginx: {err}");
            }
        }

        let (tx, mut file_events) = mpsc::channel(1);
        let _watcher = watch_vhosts(vhosts_file, tx)?;

        let mut renew_tick = tokio::time::interval(self.renew_check_interval);
        renew_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        renew_tick.tick().await; // immediate first tick
        let mut liveness_tick = tokio::time::interval(LIVENESS_INTERVAL);
        liveness_tick.tick().await;

        // One arm runs at a time, so passes never overlap.
        loop {
            tokio::select! {
                _ = renew_tick.tick() => {
                    self.renew_pass().await;
                }
                Some(()) = file_events.recv() => {
                    info!("{} changed, regenerating", vhosts_file.display());
                    self.regenerate().await;
                }
                _ = liveness_tick.tick() => {
                    if !self.manager.nginx().is_running() {
                        warn!("nginx is not running, restarting");
                        if let Err(err) = self.manager.nginx().start() {
                            error!("failed to restart nginx: {err}");
                        }
                    }
                }
                _ = shutdown_signal() => {
                    info!("shutting down");
                    break;
                }
            }
        }
        self.manager.nginx().stop().await?;
        Ok(())
    }

    async fn regenerate(&self) {
        let opts = GenerateOptions {
            reload: true,
            clean: true,
        };
        match self.manager.generate(opts).await {
            Ok(outcome) => {
                if !outcome.downgraded.is_empty() {
                    warn!("{} sites degraded to HTTP", outcome.downgraded.len());
                }
            }
            Err(err) => error!("generation pass failed: {err}"),
        }
    }

    async fn renew_pass(&self) {
        match tokio::time::timeout(self.renew_timeout, self.manager.renew(None, false)).await {
            Ok(Ok(report)) => {
                if !report.renewed.is_empty() {
                    info!("renewed {} certificates", report.renewed.len());
                }
                for (domain, err) in &report.failed {
                    warn!("renewal of {domain} failed: {err}");
                }
            }
            Ok(Err(err)) => error!("renewal pass failed: {err:#}"),
            Err(_) => error!("renewal pass timed out"),
        }
    }
}

/// Watch the directory containing the vhosts file. Editors typically
/// replace the file, so watching the file itself would lose the inode.
fn watch_vhosts(vhosts_file: &Path, tx: mpsc::Sender<()>) -> Result<RecommendedWatcher> {
    let dir = vhosts_file
        .parent()
        .context("vhosts file has no parent directory")?
        .to_path_buf();
    let mut watcher = notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
        match event {
            Ok(event) => {
                let relevant = event.paths.iter().any(|p| {
                    matches!(
                        p.extension().and_then(|e| e.to_str()),
                        Some("yml") | Some("yaml")
                    )
                });
                if relevant {
                    // A full channel already has a pending regeneration.
                    let _ = tx.try_send(());
                }
            }
            Err(err) => warn!("vhosts watcher error: {err}"),
        }
    })
    .context("failed to create file watcher")?;
    watcher
        .watch(&dir, RecursiveMode::NonRecursive)
        .with_context(|| format!("failed to watch {}", dir.display()))?;
    Ok(watcher)
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut term =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(term) => term,
                Err(err) => {
                    error!("failed to install SIGTERM handler: {err}");
                    let _ = ctrl_c.await;
                    return;
                }
            };
        tokio::select! {
            _ = ctrl_c => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
