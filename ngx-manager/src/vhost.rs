use std::path::Path;

use anyhow::{bail, Context, Result};
use fs_err as fs;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// One virtual host as declared in vhosts.yml.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteSpec {
    pub name: String,
    pub domains: Vec<String>,
    #[serde(rename = "type", default)]
    pub kind: SiteKind,
    /// Backend URL for proxy sites, e.g. `http://127.0.0.1:3000`.
    #[serde(default)]
    pub upstream: Option<String>,
    /// Document root for static sites.
    #[serde(default)]
    pub root: Option<String>,
    #[serde(default)]
    pub ssl: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteKind {
    #[default]
    Static,
    Proxy,
}

impl SiteSpec {
    /// The domain certificates are issued for and log files are named after.
    pub fn primary_domain(&self) -> &str {
        &self.domains[0]
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            bail!("site has an empty name");
        }
        if self.name.contains(['/', '\\']) || self.name.starts_with('.') {
            bail!("site name {:?} is not a valid file name", self.name);
        }
        if self.domains.is_empty() {
            bail!("site {} declares no domains", self.name);
        }
        if self.kind == SiteKind::Proxy && self.upstream.is_none() {
            bail!("proxy site {} declares no upstream", self.name);
        }
        if self.kind == SiteKind::Static && self.root.is_none() {
            bail!("static site {} declares no document root", self.name);
        }
        Ok(())
    }
}

/// The file accepts either a bare list of sites or a `vhosts:` wrapped
/// mapping. Malformed entries are skipped with a warning instead of
/// failing the whole file.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum VhostsFile {
    Bare(Vec<serde_yaml::Value>),
    Wrapped { vhosts: Vec<serde_yaml::Value> },
}

pub fn load_sites(path: &Path) -> Result<Vec<SiteSpec>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let raw: VhostsFile = serde_yaml::from_str(&text)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    let entries = match raw {
        VhostsFile::Bare(entries) => entries,
        VhostsFile::Wrapped { vhosts } => vhosts,
    };

    let mut sites = vec![];
    for (idx, entry) in entries.into_iter().enumerate() {
        let site: SiteSpec = match serde_yaml::from_value(entry) {
            Ok(site) => site,
            Err(err) => {
                warn!("skipping vhost entry {idx}: {err}");
                continue;
            }
        };
        match site.validate() {
            Ok(()) => sites.push(site),
            Err(err) => warn!("skipping vhost entry {idx}: {err}"),
        }
    }
    Ok(sites)
}

#[cfg(test)]
mod tests;
