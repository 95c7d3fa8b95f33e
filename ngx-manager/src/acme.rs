use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Result;
use fs_err as fs;
use tracing::{info, warn};

use crate::{
    cert_store::CertStore,
    cmd::{CommandOutput, CommandRunner},
    config::ManagerConfig,
};

/// How a pending issuance proves domain ownership.
#[derive(Debug, Clone)]
pub enum Challenge {
    /// Serve the token from the running web server's document root.
    Webroot { root: PathBuf },
    /// Bind a dedicated listener; requires the port to be free.
    Standalone { port: u16 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewOutcome {
    Renewed,
    /// The CA client decided the certificate is not due yet.
    Skipped,
}

#[derive(Debug, thiserror::Error)]
pub enum CaError {
    #[error("acme.sh {operation} failed for {domain}: {stderr}")]
    Command {
        operation: &'static str,
        domain: String,
        stderr: String,
    },
    #[error("issuance for {domain} failed after {attempts} attempts: {last_error}")]
    Exhausted {
        domain: String,
        attempts: u32,
        last_error: String,
    },
    #[error("failed to run acme.sh: {0}")]
    Spawn(String),
}

/// Adapter around the acme.sh binary. Issues, installs, renews and removes
/// certificates; installed material lands in the [`CertStore`] layout.
#[derive(Clone)]
pub struct AcmeShClient {
    bin: PathBuf,
    ca_url: String,
    email: String,
    staging: bool,
    retry_attempts: u32,
    retry_interval: Duration,
    store: CertStore,
    runner: Arc<dyn CommandRunner>,
}

impl AcmeShClient {
    pub fn new(config: &ManagerConfig, store: CertStore, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            bin: config.acme_bin.clone(),
            ca_url: config.ca_url.clone(),
            email: config.email.clone(),
            staging: config.staging,
            retry_attempts: config.retry_attempts.max(1),
            retry_interval: config.retry_interval,
            store,
            runner,
        }
    }

    fn run(
        &self,
        operation: &'static str,
        domain: &str,
        args: &[String],
    ) -> Result<CommandOutput, CaError> {
        let argv: Vec<&str> = args.iter().map(String::as_str).collect();
        self.runner
            .run(&self.bin.to_string_lossy(), &argv)
            .map_err(|e| CaError::Spawn(format!("{e:#}")))
            .and_then(|out| {
                if out.success() {
                    Ok(out)
                } else {
                    Err(CaError::Command {
                        operation,
                        domain: domain.to_string(),
                        stderr: pick_detail(&out),
                    })
                }
            })
    }

    /// Register the ACME account and pin the default CA. Safe to repeat.
    pub fn ensure_account(&self) -> Result<(), CaError> {
        self.run(
            "set-default-ca",
            "",
            &[
                "--set-default-ca".into(),
                "--server".into(),
                self.ca_url.clone(),
            ],
        )?;
        self.run(
            "register-account",
            "",
            &[
                "--register-account".into(),
                "-m".into(),
                self.email.clone(),
                "--server".into(),
                self.ca_url.clone(),
            ],
        )?;
        Ok(())
    }

    /// One issuance attempt for `domain` using the given challenge.
    pub fn issue(&self, domain: &str, challenge: &Challenge) -> Result<(), CaError> {
        let mut args = vec!["--issue".to_string(), "-d".into(), domain.into()];
        match challenge {
            Challenge::Webroot { root } => {
                args.push("--webroot".into());
                args.push(root.to_string_lossy().into_owned());
            }
            Challenge::Standalone { port } => {
                args.push("--standalone".into());
                args.push("--httpport".into());
                args.push(port.to_string());
            }
        }
        args.push("--server".into());
        args.push(self.ca_url.clone());
        args.push("--email".into());
        args.push(self.email.clone());
        if self.staging {
            args.push("--staging".into());
        }
        self.run("issue", domain, &args)?;
        Ok(())
    }

    /// Issue with the configured retry budget. CA rate limits and transient
    /// network failures usually clear on their own, so failed attempts wait
    /// out the retry interval before trying again.
    pub async fn issue_with_retry(
        &self,
        domain: &str,
        challenge: &Challenge,
    ) -> Result<(), CaError> {
        let mut last_error = String::new();
        for attempt in 1..=self.retry_attempts {
            info!(
                "issuing certificate for {domain} (attempt {attempt}/{})",
                self.retry_attempts
            );
            match self.issue(domain, challenge) {
                Ok(()) => return Ok(()),
                Err(err) => {
                    warn!("issuance attempt {attempt} for {domain} failed: {err}");
                    last_error = err.to_string();
                    if attempt < self.retry_attempts {
                        tokio::time::sleep(self.retry_interval).await;
                    }
                }
            }
        }
        Err(CaError::Exhausted {
            domain: domain.to_string(),
            attempts: self.retry_attempts,
            last_error,
        })
    }

    /// Copy issued material into the store layout. Required after every
    /// successful issue or renew; issuance alone leaves the consumable
    /// layout unpopulated.
    pub fn install(&self, domain: &str) -> Result<(), CaError> {
        let dir = self.store.domain_dir(domain);
        fs::create_dir_all(&dir).map_err(|e| CaError::Spawn(format!("{e}")))?;
        let args = vec![
            "--install-cert".to_string(),
            "-d".into(),
            domain.into(),
            "--cert-file".into(),
            self.store.cert_path(domain).to_string_lossy().into_owned(),
            "--key-file".into(),
            self.store.key_path(domain).to_string_lossy().into_owned(),
            "--fullchain-file".into(),
            self.store
                .fullchain_path(domain)
                .to_string_lossy()
                .into_owned(),
            "--ca-file".into(),
            self.store.chain_path(domain).to_string_lossy().into_owned(),
        ];
        self.run("install-cert", domain, &args)?;
        restrict_key_mode(&self.store.key_path(domain));
        Ok(())
    }

    /// Ask the CA client to renew. A not-yet-due response is `Skipped`,
    /// not an error.
    pub fn renew(&self, domain: &str, force: bool) -> Result<RenewOutcome, CaError> {
        let mut args = vec!["--renew".to_string(), "-d".into(), domain.into()];
        if force {
            args.push("--force".into());
        }
        let argv: Vec<&str> = args.iter().map(String::as_str).collect();
        let out = self
            .runner
            .run(&self.bin.to_string_lossy(), &argv)
            .map_err(|e| CaError::Spawn(format!("{e:#}")))?;
        if out.success() {
            return Ok(RenewOutcome::Renewed);
        }
        if out.stdout.contains("Skip") || out.stdout.contains("skipped") {
            return Ok(RenewOutcome::Skipped);
        }
        Err(CaError::Command {
            operation: "renew",
            domain: domain.to_string(),
            stderr: pick_detail(&out),
        })
    }

    /// Deregister the domain from the CA client. Best-effort: the local file
    /// removal is the authoritative deletion, so failures are only logged.
    pub fn deregister(&self, domain: &str) {
        let args = ["--remove", "-d", domain];
        match self.runner.run(&self.bin.to_string_lossy(), &args) {
            Ok(out) if !out.success() => {
                warn!("acme.sh --remove for {domain} failed: {}", pick_detail(&out));
            }
            Err(err) => warn!("acme.sh --remove for {domain} failed: {err:#}"),
            Ok(_) => {}
        }
    }
}

fn pick_detail(out: &CommandOutput) -> String {
    let stderr = out.stderr.trim();
    if stderr.is_empty() {
        format!("exit code {}", out.code)
    } else {
        stderr.to_string()
    }
}

#[cfg(unix)]
fn restrict_key_mode(path: &std::path::Path) {
    use std::os::unix::fs::PermissionsExt;
    if path.exists() {
        if let Err(err) = fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)) {
            warn!("failed to restrict key permissions on {}: {err}", path.display());
        }
    }
}

#[cfg(not(unix))]
fn restrict_key_mode(_path: &std::path::Path) {}
