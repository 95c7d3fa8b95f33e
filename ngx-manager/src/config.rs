use std::{path::PathBuf, time::Duration};

use anyhow::{bail, Result};

/// Everything the manager needs to know about its environment.
///
/// Constructed once by the caller (CLI, daemon, tests) and passed into
/// [`crate::Manager::new`]. There is no global settings object; every
/// component receives the paths and knobs it needs from here.
#[allow(clippy::duplicated_attributes)]
#[derive(Clone, Debug, bon::Builder)]
#[builder(on(String, into))]
#[builder(on(PathBuf, into))]
pub struct ManagerConfig {
    /// Virtual host definitions (vhosts.yml).
    pub vhosts_file: PathBuf,
    /// Where rendered server blocks are written (nginx include directory).
    pub conf_dir: PathBuf,
    /// Root of the per-domain certificate layout.
    pub certs_dir: PathBuf,
    /// Per-site access/error logs.
    pub logs_dir: PathBuf,
    /// Document root served on port 80; also the webroot challenge directory.
    pub webroot: PathBuf,
    /// Path to the acme.sh executable.
    pub acme_bin: PathBuf,
    /// ACME directory URL of the CA.
    pub ca_url: String,
    /// Contact email registered with the CA.
    pub email: String,
    pub staging: bool,
    /// Renew certificates expiring within this many days (inclusive).
    pub renew_days_before: u64,
    /// Issuance attempts per challenge before giving up on a domain.
    pub retry_attempts: u32,
    /// Fixed delay between issuance attempts.
    pub retry_interval: Duration,
    /// Port the standalone challenge listener binds to.
    pub standalone_port: u16,
    /// How long to wait for nginx to exit gracefully before a forced kill.
    pub stop_grace_period: Duration,
    /// Overall timeout for one renewal pass in the daemon.
    pub renew_timeout: Duration,
    /// How often the daemon re-checks certificate expiry.
    pub renew_check_interval: Duration,
    /// nginx pid file, consulted when pgrep is unavailable.
    pub pid_file: PathBuf,
}

/// Resolve a CA shorthand name to its ACME directory URL.
pub fn ca_directory_url(ca: &str, staging: bool) -> Result<String> {
    let url = match (ca, staging) {
        ("letsencrypt", false) => "https://acme-v02.api.letsencrypt.org/directory",
        ("letsencrypt", true) => "https://acme-staging-v02.api.letsencrypt.org/directory",
        // ZeroSSL has no separate staging environment.
        ("zerossl", _) => "https://acme.zerossl.com/v2/DV90",
        ("buypass", false) => "https://api.buypass.com/acme/directory",
        ("buypass", true) => "https://api.test4.buypass.no/acme/directory",
        _ => bail!("unsupported CA server: {ca}"),
    };
    Ok(url.to_string())
}
