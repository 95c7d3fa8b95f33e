use std::{path::PathBuf, time::Duration};

use anyhow::{bail, Context, Result};
use figment::{
    providers::{Format, Toml},
    Figment,
};
use ngx_manager::{config::ca_directory_url, ManagerConfig};
use serde::Deserialize;

pub const CONFIG_FILENAME: &str = "ngx-manager.toml";
pub const SYSTEM_CONFIG_FILENAME: &str = "/etc/ngx-manager/ngx-manager.toml";
pub const DEFAULT_CONFIG: &str = include_str!("../ngx-manager.toml");

pub fn load_config_figment(config_file: Option<&str>) -> Figment {
    let figment = Figment::from(Toml::string(DEFAULT_CONFIG))
        .merge(Toml::file(SYSTEM_CONFIG_FILENAME))
        .merge(Toml::file(CONFIG_FILENAME));
    match config_file {
        Some(path) => figment.merge(Toml::file(path)),
        None => figment,
    }
}

/// The on-disk configuration shape. Flattened into [`ManagerConfig`] after
/// resolving the CA shorthand and second-based durations.
#[derive(Debug, Deserialize)]
pub struct Config {
    pub vhosts_file: PathBuf,
    pub conf_dir: PathBuf,
    pub certs_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub webroot: PathBuf,
    pub pid_file: PathBuf,
    pub acme_bin: PathBuf,
    pub ca: String,
    #[serde(default)]
    pub ca_url: Option<String>,
    pub email: String,
    pub staging: bool,
    pub renew_days_before: u64,
    pub retry_attempts: u32,
    pub retry_interval_secs: u64,
    pub standalone_port: u16,
    pub stop_grace_secs: u64,
    pub renew_timeout_secs: u64,
    pub renew_check_interval_secs: u64,
}

impl Config {
    pub fn extract(figment: &Figment) -> Result<Self> {
        figment.extract().context("failed to load configuration")
    }

    pub fn into_manager_config(self) -> Result<ManagerConfig> {
        if self.email.is_empty() {
            bail!("no contact email configured; set `email` in {CONFIG_FILENAME}");
        }
        let ca_url = match self.ca_url {
            Some(url) => url,
            None => ca_directory_url(&self.ca, self.staging)?,
        };
        Ok(ManagerConfig::builder()
            .vhosts_file(self.vhosts_file)
            .conf_dir(self.conf_dir)
            .certs_dir(self.certs_dir)
            .logs_dir(self.logs_dir)
            .webroot(self.webroot)
            .acme_bin(self.acme_bin)
            .ca_url(ca_url)
            .email(self.email)
            .staging(self.staging)
            .renew_days_before(self.renew_days_before)
            .retry_attempts(self.retry_attempts)
            .retry_interval(Duration::from_secs(self.retry_interval_secs))
            .standalone_port(self.standalone_port)
            .stop_grace_period(Duration::from_secs(self.stop_grace_secs))
            .renew_timeout(Duration::from_secs(self.renew_timeout_secs))
            .renew_check_interval(Duration::from_secs(self.renew_check_interval_secs))
            .pid_file(self.pid_file)
            .build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_parses() {
        let figment = Figment::from(Toml::string(DEFAULT_CONFIG));
        let config = Config::extract(&figment).unwrap();
        assert_eq!(config.ca, "letsencrypt");
        assert_eq!(config.retry_attempts, 3);
        assert!(config.ca_url.is_none());
    }

    #[test]
    fn default_config_requires_an_email() {
        let figment = Figment::from(Toml::string(DEFAULT_CONFIG));
        let config = Config::extract(&figment).unwrap();
        assert!(config.into_manager_config().is_err());
    }

    #[test]
    fn overlay_wins_and_ca_resolves() {
        let figment = Figment::from(Toml::string(DEFAULT_CONFIG)).merge(Toml::string(
            r#"
email = "ops@example.com"
staging = true
"#,
        ));
        let config = Config::extract(&figment).unwrap();
        let manager = config.into_manager_config().unwrap();
        assert_eq!(
            manager.ca_url,
            "https://acme-staging-v02.api.letsencrypt.org/directory"
        );
        assert_eq!(manager.retry_interval, Duration::from_secs(300));
    }

    #[test]
    fn explicit_ca_url_overrides_shorthand() {
        let figment = Figment::from(Toml::string(DEFAULT_CONFIG)).merge(Toml::string(
            r#"
email = "ops@example.com"
ca_url = "https://acme.internal/directory"
"#,
        ));
        let manager = Config::extract(&figment)
            .unwrap()
            .into_manager_config()
            .unwrap();
        assert_eq!(manager.ca_url, "https://acme.internal/directory");
    }
}
