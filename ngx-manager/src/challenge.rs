use std::path::PathBuf;

use fs_err as fs;
use tracing::{debug, info, warn};

use crate::{
    acme::{AcmeShClient, CaError, Challenge},
    config::ManagerConfig,
    nginx::NginxController,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeStrategy {
    Webroot,
    Standalone,
}

#[derive(Debug, thiserror::Error)]
pub enum ChallengeError {
    #[error(transparent)]
    Ca(#[from] CaError),
    #[error("failed to restore nginx after standalone challenge: {0}")]
    Restart(String),
}

/// Obtains certificates by trying the webroot challenge first and falling
/// back to a standalone listener, which needs port 80 and therefore stops
/// nginx for the duration of the challenge.
#[derive(Clone)]
pub struct ChallengeExecutor {
    acme: AcmeShClient,
    nginx: NginxController,
    webroot: PathBuf,
    standalone_port: u16,
}

impl ChallengeExecutor {
    pub fn new(config: &ManagerConfig, acme: AcmeShClient, nginx: NginxController) -> Self {
        Self {
            acme,
            nginx,
            webroot: config.webroot.clone(),
            standalone_port: config.standalone_port,
        }
    }

    /// Issue and install a certificate for `domain`, reporting which
    /// strategy ended up succeeding.
    ///
    /// The webroot attempt gets the full retry budget; the standalone
    /// fallback is a single attempt so nginx downtime stays bounded. If
    /// nginx was running before the fallback it is restarted no matter how
    /// the issuance went.
    pub async fn obtain(&self, domain: &str) -> Result<ChallengeStrategy, ChallengeError> {
        if self.webroot_usable() {
            let challenge = Challenge::Webroot {
                root: self.webroot.clone(),
            };
            match self.acme.issue_with_retry(domain, &challenge).await {
                Ok(()) => {
                    self.acme.install(domain)?;
                    return Ok(ChallengeStrategy::Webroot);
                }
                Err(err) => {
                    warn!("webroot challenge for {domain} failed, trying standalone: {err}");
                }
            }
        } else {
            info!("webroot {} not usable, using standalone challenge", self.webroot.display());
        }
        self.obtain_standalone(domain).await?;
        Ok(ChallengeStrategy::Standalone)
    }

    async fn obtain_standalone(&self, domain: &str) -> Result<(), ChallengeError> {
        let was_running = self.nginx.is_running();
        if was_running {
            info!("stopping nginx to free port {} for {domain}", self.standalone_port);
            if let Err(err) = self.nginx.stop().await {
                warn!("graceful nginx stop failed: {err}");
            }
        }

        let result = self.acme.issue(
            domain,
            &Challenge::Standalone {
                port: self.standalone_port,
            },
        );

        // nginx comes back before the issuance result is even inspected.
        if was_running {
            if let Err(err) = self.nginx.start() {
                // Losing the web server is worse than losing one issuance.
                result?;
                return Err(ChallengeError::Restart(err.to_string()));
            }
        }

        result?;
        self.acme.install(domain)?;
        Ok(())
    }

    /// Whether the webroot challenge directory can be written. acme.sh
    /// needs to drop token files under .well-known/acme-challenge.
    fn webroot_usable(&self) -> bool {
        let challenge_dir = self.webroot.join(".well-known").join("acme-challenge");
        if let Err(err) = fs::create_dir_all(&challenge_dir) {
            debug!("cannot create {}: {err}", challenge_dir.display());
            return false;
        }
        let probe = challenge_dir.join(".probe");
        match fs::write(&probe, b"ok") {
            Ok(()) => {
                let _ = fs::remove_file(&probe);
                true
            }
            Err(err) => {
                debug!("cannot write to {}: {err}", challenge_dir.display());
                false
            }
        }
    }
}
