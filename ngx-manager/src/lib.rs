//! Certificate lifecycle and nginx configuration management.
//!
//! Declarative site definitions in, ACME certificates and rendered nginx
//! server blocks out. All external tools (acme.sh, nginx, the init system)
//! are driven through the [`cmd::CommandRunner`] seam.

pub mod acme;
pub mod cert_store;
pub mod challenge;
pub mod cmd;
pub mod config;
pub mod daemon;
pub mod generator;
pub mod manager;
pub mod nginx;
pub mod vhost;

#[cfg(test)]
mod testing;

pub use cert_store::{CertStore, RenewalDecision, RenewalPolicy, RenewalReason};
pub use cmd::{CommandRunner, SystemRunner};
pub use config::ManagerConfig;
pub use daemon::Daemon;
pub use manager::{GenerateOptions, GenerateOutcome, Manager, RenewReport};
pub use nginx::NginxController;
