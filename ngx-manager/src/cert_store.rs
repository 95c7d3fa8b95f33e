use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs_err as fs;
use time::OffsetDateTime;
use tracing::{debug, warn};
use x509_parser::prelude::Pem;

/// On-disk certificate layout: `<certs_dir>/<domain>/{cert.pem, privkey.pem,
/// fullchain.pem, chain.pem}`.
///
/// Deliberately holds no in-memory state; every query re-reads the
/// filesystem so out-of-band rotation is observed immediately.
#[derive(Debug, Clone)]
pub struct CertStore {
    certs_dir: PathBuf,
}

impl CertStore {
    pub fn new(certs_dir: impl AsRef<Path>) -> Self {
        Self {
            certs_dir: certs_dir.as_ref().to_path_buf(),
        }
    }

    pub fn domain_dir(&self, domain: &str) -> PathBuf {
        self.certs_dir.join(domain)
    }

    pub fn cert_path(&self, domain: &str) -> PathBuf {
        self.domain_dir(domain).join("cert.pem")
    }

    pub fn key_path(&self, domain: &str) -> PathBuf {
        self.domain_dir(domain).join("privkey.pem")
    }

    pub fn fullchain_path(&self, domain: &str) -> PathBuf {
        self.domain_dir(domain).join("fullchain.pem")
    }

    pub fn chain_path(&self, domain: &str) -> PathBuf {
        self.domain_dir(domain).join("chain.pem")
    }

    /// True iff the full chain and the private key are both present and
    /// non-empty. Partial material counts as absent.
    pub fn exists(&self, domain: &str) -> bool {
        non_empty(&self.fullchain_path(domain)) && non_empty(&self.key_path(domain))
    }

    /// The certificate's notAfter, or `None` when the full chain is missing
    /// or does not parse.
    pub fn read_expiry(&self, domain: &str) -> Option<OffsetDateTime> {
        let pem_text = fs::read_to_string(self.fullchain_path(domain)).ok()?;
        match parse_not_after(&pem_text) {
            Ok(not_after) => Some(not_after),
            Err(err) => {
                warn!("failed to parse certificate for {domain}: {err:#}");
                None
            }
        }
    }

    /// Delete the domain's certificate directory. Removing a domain that has
    /// no material succeeds.
    pub fn remove(&self, domain: &str) -> Result<()> {
        let dir = self.domain_dir(domain);
        if dir.exists() {
            fs::remove_dir_all(&dir)
                .with_context(|| format!("failed to remove certificates for {domain}"))?;
        }
        Ok(())
    }

    /// Domains that have installed certificate material.
    pub fn list(&self) -> Result<Vec<String>> {
        let mut domains = vec![];
        if !self.certs_dir.exists() {
            return Ok(domains);
        }
        for entry in fs::read_dir(&self.certs_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() && path.join("fullchain.pem").exists() {
                domains.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        domains.sort();
        Ok(domains)
    }
}

fn non_empty(path: &Path) -> bool {
    fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false)
}

fn parse_not_after(pem_text: &str) -> Result<OffsetDateTime> {
    let pem = Pem::iter_from_buffer(pem_text.as_bytes())
        .next()
        .transpose()
        .context("invalid pem")?
        .context("no certificate in pem")?;
    let cert = pem.parse_x509().context("invalid x509 certificate")?;
    Ok(cert.validity().not_after.to_datetime())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RenewalReason {
    Absent,
    ExpiringWithinThreshold,
    Valid,
}

/// Computed fresh on every check; never persisted.
#[derive(Debug, Clone)]
pub struct RenewalDecision {
    pub domain: String,
    pub needs_renewal: bool,
    pub reason: RenewalReason,
}

/// Decides whether a certificate is due based on its expiry and a
/// days-before-expiry threshold.
#[derive(Debug, Clone)]
pub struct RenewalPolicy {
    store: CertStore,
    threshold_days: u64,
}

impl RenewalPolicy {
    pub fn new(store: CertStore, threshold_days: u64) -> Self {
        Self {
            store,
            threshold_days,
        }
    }

    pub fn decide(&self, domain: &str) -> RenewalDecision {
        let reason = if !self.store.exists(domain) {
            RenewalReason::Absent
        } else {
            match self.store.read_expiry(domain) {
                Some(not_after) => {
                    let days_left = (not_after - OffsetDateTime::now_utc()).whole_days();
                    debug!("certificate for {domain} expires in {days_left} days");
                    // Expiring in exactly threshold_days is renewed.
                    if days_left <= self.threshold_days as i64 {
                        RenewalReason::ExpiringWithinThreshold
                    } else {
                        RenewalReason::Valid
                    }
                }
                // Present but unreadable: renew rather than risk serving an
                // expired certificate.
                None => RenewalReason::ExpiringWithinThreshold,
            }
        };
        RenewalDecision {
            domain: domain.to_string(),
            needs_renewal: !matches!(reason, RenewalReason::Valid),
            reason,
        }
    }
}
