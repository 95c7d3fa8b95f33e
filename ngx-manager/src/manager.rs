use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::{Context, Result};
use fs_err as fs;
use serde::Serialize;
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::{
    acme::{AcmeShClient, RenewOutcome},
    cert_store::{CertStore, RenewalPolicy, RenewalReason},
    challenge::{ChallengeExecutor, ChallengeStrategy},
    cmd::CommandRunner,
    config::ManagerConfig,
    generator::ConfGenerator,
    nginx::{NginxController, NginxStatus},
    vhost::{load_sites, SiteSpec},
};

#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    /// The freshly written configuration failed `nginx -t`; nginx was left
    /// running on its previous configuration.
    #[error("generated configuration rejected by nginx: {0}")]
    Validation(String),
    #[error("configuration written but reload failed: {0}")]
    Reload(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GenerateOptions {
    /// Reload nginx when any conf file changed or a certificate was issued.
    pub reload: bool,
    /// Remove conf files for sites no longer declared.
    pub clean: bool,
}

/// What one generation pass did, per concern.
#[derive(Debug, Default, Serialize)]
pub struct GenerateOutcome {
    /// Domains that got a new certificate, with the strategy that worked.
    pub issued: Vec<(String, ChallengeStrategy)>,
    /// Domains whose existing certificate was still valid.
    pub valid: Vec<String>,
    /// Sites rendered HTTP-only because issuance failed.
    pub downgraded: Vec<(String, String)>,
    /// Conf files written or rewritten.
    pub written: Vec<String>,
    /// Stale conf files removed.
    pub removed: Vec<String>,
    pub reloaded: bool,
}

#[derive(Debug, Serialize)]
pub struct RenewReport {
    pub renewed: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<(String, String)>,
    pub reloaded: bool,
}

#[derive(Debug, Serialize)]
pub struct SiteStatus {
    pub name: String,
    pub domains: Vec<String>,
    pub ssl: bool,
    pub conf_written: bool,
    pub cert_installed: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub cert_expires: Option<OffsetDateTime>,
}

#[derive(Debug, Serialize)]
pub struct ManagerStatus {
    pub nginx: NginxStatus,
    pub sites: Vec<SiteStatus>,
}

/// Ties the pieces together: site definitions in, certificates and nginx
/// configuration out.
///
/// Generation is two-phase. Certificates are settled first, then every
/// server block is rendered against the material that actually exists, so
/// nginx is never pointed at files that are not there.
#[derive(Clone)]
pub struct Manager {
    config: ManagerConfig,
    store: CertStore,
    policy: RenewalPolicy,
    acme: AcmeShClient,
    nginx: NginxController,
    challenge: ChallengeExecutor,
    generator: ConfGenerator,
    account_ready: Arc<AtomicBool>,
}

impl Manager {
    pub fn new(config: ManagerConfig, runner: Arc<dyn CommandRunner>) -> Result<Self> {
        for dir in [
            &config.conf_dir,
            &config.certs_dir,
            &config.logs_dir,
            &config.webroot,
        ] {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        let store = CertStore::new(&config.certs_dir);
        let policy = RenewalPolicy::new(store.clone(), config.renew_days_before);
        let acme = AcmeShClient::new(&config, store.clone(), runner.clone());
        let nginx = NginxController::new(&config, runner);
        let challenge = ChallengeExecutor::new(&config, acme.clone(), nginx.clone());
        let generator = ConfGenerator::new(&config, store.clone());
        Ok(Self {
            config,
            store,
            policy,
            acme,
            nginx,
            challenge,
            generator,
            account_ready: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn nginx(&self) -> &NginxController {
        &self.nginx
    }

    fn sites(&self) -> Result<Vec<SiteSpec>> {
        load_sites(&self.config.vhosts_file)
    }

    /// Account registration is deferred until the first site actually needs
    /// a certificate, so cert-less deployments never talk to the CA.
    fn ensure_account_once(&self) -> Result<()> {
        if self.account_ready.load(Ordering::Relaxed) {
            return Ok(());
        }
        self.acme.ensure_account()?;
        self.account_ready.store(true, Ordering::Relaxed);
        Ok(())
    }

    /// One full generation pass over the vhosts file.
    ///
    /// Per-site certificate failures downgrade that one site to HTTP and
    /// are reported in the outcome; they never abort the pass. Validation
    /// and reload failures do fail the pass, after all files are written.
    pub async fn generate(&self, opts: GenerateOptions) -> Result<GenerateOutcome, GenerateError> {
        let sites = self.sites()?;
        info!("generating configuration for {} sites", sites.len());
        let mut outcome = GenerateOutcome::default();

        // Phase 1: settle certificates.
        let mut effective_ssl = vec![];
        for site in &sites {
            if !site.ssl {
                effective_ssl.push(false);
                continue;
            }
            let domain = site.primary_domain().to_string();
            let decision = self.policy.decide(&domain);
            if !decision.needs_renewal {
                outcome.valid.push(domain);
                effective_ssl.push(true);
                continue;
            }
            if decision.reason != RenewalReason::Absent {
                info!("certificate for {domain} is due for renewal, reissuing");
            }
            let obtained = match self.ensure_account_once() {
                Ok(()) => self.challenge.obtain(&domain).await.map_err(|e| e.to_string()),
                Err(err) => Err(err.to_string()),
            };
            match obtained {
                Ok(strategy) => {
                    outcome.issued.push((domain, strategy));
                    effective_ssl.push(true);
                }
                Err(err) => {
                    warn!("certificate for {domain} unavailable, serving HTTP only: {err}");
                    outcome.downgraded.push((domain, err));
                    effective_ssl.push(false);
                }
            }
        }

        // Phase 2: render everything against the material that exists.
        for (site, with_ssl) in sites.iter().zip(&effective_ssl) {
            if self
                .generator
                .write_site(site, *with_ssl)
                .map_err(GenerateError::Other)?
            {
                outcome.written.push(site.name.clone());
            }
        }
        if opts.clean {
            outcome.removed = self.generator.clean_stale(&sites).map_err(GenerateError::Other)?;
        }

        // Written files are validated even when no reload was requested;
        // generation must never leave a broken configuration undetected.
        let conf_changed = !outcome.written.is_empty() || !outcome.removed.is_empty();
        if conf_changed {
            self.nginx
                .test()
                .map_err(|e| GenerateError::Validation(e.to_string()))?;
        }
        // A reissued certificate needs a reload even when its rendered conf
        // is byte-identical: nginx keeps serving the old one from memory.
        if opts.reload && (conf_changed || !outcome.issued.is_empty()) {
            if self.nginx.is_running() {
                self.nginx
                    .reload()
                    .map_err(|e| GenerateError::Reload(e.to_string()))?;
            } else {
                self.nginx
                    .start()
                    .map_err(|e| GenerateError::Reload(e.to_string()))?;
            }
            outcome.reloaded = true;
        }
        Ok(outcome)
    }

    /// Renew installed certificates, or one specific domain when given.
    /// nginx is reloaded once at the end iff anything was actually renewed.
    pub async fn renew(&self, domain: Option<&str>, force: bool) -> Result<RenewReport> {
        let domains = match domain {
            Some(d) => vec![d.to_string()],
            None => self.store.list()?,
        };
        let mut report = RenewReport {
            renewed: vec![],
            skipped: vec![],
            failed: vec![],
            reloaded: false,
        };
        for domain in domains {
            if !force && !self.policy.decide(&domain).needs_renewal {
                info!("certificate for {domain} is not due, skipping");
                report.skipped.push(domain);
                continue;
            }
            match self.renew_one(&domain) {
                Ok(RenewOutcome::Renewed) => report.renewed.push(domain),
                Ok(RenewOutcome::Skipped) => report.skipped.push(domain),
                Err(err) => {
                    warn!("renewal of {domain} failed: {err:#}");
                    report.failed.push((domain, format!("{err:#}")));
                }
            }
        }
        if !report.renewed.is_empty() {
            match self.nginx.reload() {
                Ok(()) => report.reloaded = true,
                Err(err) => {
                    report
                        .failed
                        .push(("nginx reload".to_string(), err.to_string()));
                }
            }
        }
        Ok(report)
    }

    fn renew_one(&self, domain: &str) -> Result<RenewOutcome> {
        // Forced at the client level; due-ness was already decided here.
        let outcome = self.acme.renew(domain, true)?;
        if outcome == RenewOutcome::Renewed {
            self.acme.install(domain)?;
        }
        Ok(outcome)
    }

    /// Drop a site: its conf file goes away immediately, the certificate
    /// only when `keep_cert` is false.
    pub async fn remove_site(&self, name: &str, keep_cert: bool) -> Result<()> {
        let conf = self.generator.conf_path(name);
        let mut changed = false;
        if conf.exists() {
            fs::remove_file(&conf)
                .with_context(|| format!("failed to remove {}", conf.display()))?;
            info!("removed {}", conf.display());
            changed = true;
        }
        if !keep_cert {
            // Best guess at the domain: sites usually certify their primary
            // domain, but the site may already be gone from vhosts.yml, so
            // fall back to the site name itself.
            let domain = self
                .sites()
                .ok()
                .and_then(|sites| {
                    sites
                        .iter()
                        .find(|s| s.name == name)
                        .map(|s| s.primary_domain().to_string())
                })
                .unwrap_or_else(|| name.to_string());
            if self.store.exists(&domain) {
                self.acme.deregister(&domain);
                self.store.remove(&domain)?;
            }
        }
        if changed && self.nginx.is_running() {
            // A stray fragment referencing the removed site should surface
            // here, not as a failed reload.
            self.nginx.test()?;
            self.nginx.reload()?;
        }
        Ok(())
    }

    pub fn list_sites(&self) -> Result<Vec<SiteStatus>> {
        let sites = self.sites()?;
        Ok(sites
            .into_iter()
            .map(|site| {
                let domain = site.primary_domain().to_string();
                SiteStatus {
                    conf_written: self.generator.conf_path(&site.name).exists(),
                    cert_installed: self.store.exists(&domain),
                    cert_expires: self.store.read_expiry(&domain),
                    name: site.name,
                    domains: site.domains,
                    ssl: site.ssl,
                }
            })
            .collect())
    }

    pub fn status(&self) -> Result<ManagerStatus> {
        Ok(ManagerStatus {
            nginx: self.nginx.status(),
            sites: self.list_sites()?,
        })
    }
}
