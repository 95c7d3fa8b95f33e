use std::path::PathBuf;

use anyhow::{Context, Result};
use fs_err as fs;
use rinja::Template;
use tracing::{debug, info};

use crate::{
    cert_store::CertStore,
    config::ManagerConfig,
    vhost::{SiteKind, SiteSpec},
};

#[derive(Template)]
#[template(path = "vhost.conf", escape = "none")]
struct ServerBlock {
    name: String,
    server_names: String,
    webroot: String,
    ssl: bool,
    cert_path: String,
    key_path: String,
    access_log: String,
    error_log: String,
    is_proxy: bool,
    upstream: String,
    root: String,
}

/// Renders per-site nginx server blocks into the include directory.
///
/// Output depends only on the site definition and the certificate paths, never on
/// the clock, so regenerating an unchanged site produces identical bytes.
#[derive(Clone)]
pub struct ConfGenerator {
    conf_dir: PathBuf,
    logs_dir: PathBuf,
    webroot: PathBuf,
    store: CertStore,
}

/// Hand-written fragments that live in the include directory alongside the
/// generated ones and must survive a clean pass.
const PRESERVED_CONFS: [&str; 2] = ["default.conf", "ssl.conf"];

impl ConfGenerator {
    pub fn new(config: &ManagerConfig, store: CertStore) -> Self {
        Self {
            conf_dir: config.conf_dir.clone(),
            logs_dir: config.logs_dir.clone(),
            webroot: config.webroot.clone(),
            store,
        }
    }

    pub fn conf_path(&self, site_name: &str) -> PathBuf {
        self.conf_dir.join(format!("{site_name}.conf"))
    }

    /// Render the server block for `site`. `with_ssl` is the effective TLS
    /// state: a site that wants TLS but has no certificate yet is rendered
    /// HTTP-only rather than pointing nginx at missing files.
    pub fn render(&self, site: &SiteSpec, with_ssl: bool) -> Result<String> {
        let domain = site.primary_domain();
        let block = ServerBlock {
            name: site.name.clone(),
            server_names: site.domains.join(" "),
            webroot: self.webroot.display().to_string(),
            ssl: with_ssl,
            cert_path: self.store.fullchain_path(domain).display().to_string(),
            key_path: self.store.key_path(domain).display().to_string(),
            access_log: self
                .logs_dir
                .join(format!("{}.access.log", site.name))
                .display()
                .to_string(),
            error_log: self
                .logs_dir
                .join(format!("{}.error.log", site.name))
                .display()
                .to_string(),
            is_proxy: site.kind == SiteKind::Proxy,
            upstream: site.upstream.clone().unwrap_or_default(),
            root: site
                .root
                .clone()
                .unwrap_or_else(|| self.webroot.display().to_string()),
        };
        block
            .render()
            .with_context(|| format!("failed to render server block for {}", site.name))
    }

    /// Render and write the site's conf file. Returns `true` when the file
    /// changed on disk.
    pub fn write_site(&self, site: &SiteSpec, with_ssl: bool) -> Result<bool> {
        let rendered = self.render(site, with_ssl)?;
        let path = self.conf_path(&site.name);
        if let Ok(existing) = fs::read_to_string(&path) {
            if existing == rendered {
                debug!("{} is up to date", path.display());
                return Ok(false);
            }
        }
        fs::create_dir_all(&self.conf_dir)?;
        fs::write(&path, rendered)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!("wrote {}", path.display());
        Ok(true)
    }

    /// Delete generated conf files whose site no longer exists. Preserved
    /// fragments and anything that is not a .conf file are left alone.
    pub fn clean_stale(&self, live_sites: &[SiteSpec]) -> Result<Vec<String>> {
        let mut removed = vec![];
        if !self.conf_dir.exists() {
            return Ok(removed);
        }
        for entry in fs::read_dir(&self.conf_dir)? {
            let entry = entry?;
            let file_name = entry.file_name().to_string_lossy().into_owned();
            let Some(stem) = file_name.strip_suffix(".conf") else {
                continue;
            };
            if PRESERVED_CONFS.contains(&file_name.as_str()) {
                continue;
            }
            if live_sites.iter().any(|s| s.name == stem) {
                continue;
            }
            fs::remove_file(entry.path())
                .with_context(|| format!("failed to remove stale {file_name}"))?;
            info!("removed stale {file_name}");
            removed.push(file_name);
        }
        removed.sort();
        Ok(removed)
    }
}

#[cfg(test)]
mod tests;
