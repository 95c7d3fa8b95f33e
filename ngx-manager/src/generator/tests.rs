use tempfile::TempDir;

use super::*;
use crate::vhost::SiteKind;

fn generator(tmp: &TempDir) -> ConfGenerator {
    let cfg = crate::testing::test_config(tmp.path());
    let store = CertStore::new(&cfg.certs_dir);
    ConfGenerator::new(&cfg, store)
}

fn static_site(name: &str, domain: &str, ssl: bool) -> SiteSpec {
    SiteSpec {
        name: name.to_string(),
        domains: vec![domain.to_string()],
        kind: SiteKind::Static,
        upstream: None,
        root: Some("/srv/site".to_string()),
        ssl,
    }
}

fn proxy_site(name: &str, domain: &str) -> SiteSpec {
    SiteSpec {
        name: name.to_string(),
        domains: vec![domain.to_string()],
        kind: SiteKind::Proxy,
        upstream: Some("http://127.0.0.1:3000".to_string()),
        root: None,
        ssl: true,
    }
}

#[test]
fn http_only_static_site() {
    let tmp = TempDir::new().unwrap();
    let gen = generator(&tmp);

    let conf = gen.render(&static_site("blog", "blog.example.com", false), false).unwrap();

    assert!(conf.contains("listen 80;"));
    assert!(conf.contains("server_name blog.example.com;"));
    assert!(conf.contains("location /.well-known/acme-challenge/"));
    assert!(conf.contains("root /srv/site;"));
    assert!(conf.contains("try_files $uri $uri/ =404;"));
    assert!(!conf.contains("listen 443"));
    assert!(!conf.contains("ssl_certificate"));
    assert!(!conf.contains("proxy_pass"));
}

#[test]
fn ssl_site_redirects_and_terminates_tls() {
    let tmp = TempDir::new().unwrap();
    let gen = generator(&tmp);

    let conf = gen.render(&proxy_site("api", "api.example.com"), true).unwrap();

    assert!(conf.contains("return 301 https://$host$request_uri;"));
    assert!(conf.contains("listen 443 ssl;"));
    let certs = tmp.path().join("certs").join("api.example.com");
    assert!(conf.contains(&format!(
        "ssl_certificate {};",
        certs.join("fullchain.pem").display()
    )));
    assert!(conf.contains(&format!(
        "ssl_certificate_key {};",
        certs.join("privkey.pem").display()
    )));
    assert!(conf.contains("proxy_pass http://127.0.0.1:3000;"));
    assert!(conf.contains("proxy_set_header Host $host;"));
}

#[test]
fn acme_challenge_location_survives_tls_redirect() {
    let tmp = TempDir::new().unwrap();
    let gen = generator(&tmp);

    let conf = gen.render(&static_site("blog", "blog.example.com", true), true).unwrap();

    // The challenge location must precede the catch-all redirect.
    let challenge = conf.find("location /.well-known/acme-challenge/").unwrap();
    let redirect = conf.find("return 301").unwrap();
    assert!(challenge < redirect);
}

#[test]
fn static_site_defaults_root_to_webroot() {
    let tmp = TempDir::new().unwrap();
    let gen = generator(&tmp);
    let mut site = static_site("blog", "blog.example.com", false);
    site.root = None;

    let conf = gen.render(&site, false).unwrap();
    assert!(conf.contains(&format!("root {};", tmp.path().join("www").display())));
}

#[test]
fn multiple_domains_share_one_server_name() {
    let tmp = TempDir::new().unwrap();
    let gen = generator(&tmp);
    let mut site = static_site("blog", "blog.example.com", false);
    site.domains.push("www.blog.example.com".to_string());

    let conf = gen.render(&site, false).unwrap();
    assert!(conf.contains("server_name blog.example.com www.blog.example.com;"));
}

#[test]
fn rewrite_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let gen = generator(&tmp);
    let site = static_site("blog", "blog.example.com", false);

    assert!(gen.write_site(&site, false).unwrap());
    // Unchanged input renders identical bytes, so nothing is written.
    assert!(!gen.write_site(&site, false).unwrap());
}

#[test]
fn clean_stale_preserves_shared_fragments() {
    let tmp = TempDir::new().unwrap();
    let gen = generator(&tmp);
    let live = vec![static_site("blog", "blog.example.com", false)];
    gen.write_site(&live[0], false).unwrap();

    let conf_dir = tmp.path().join("conf.d");
    fs::write(conf_dir.join("gone.conf"), "server {}").unwrap();
    fs::write(conf_dir.join("default.conf"), "server {}").unwrap();
    fs::write(conf_dir.join("ssl.conf"), "ssl_session_cache shared:SSL:10m;").unwrap();
    fs::write(conf_dir.join("notes.txt"), "not a conf").unwrap();

    let removed = gen.clean_stale(&live).unwrap();

    assert_eq!(removed, vec!["gone.conf"]);
    assert!(conf_dir.join("blog.conf").exists());
    assert!(conf_dir.join("default.conf").exists());
    assert!(conf_dir.join("ssl.conf").exists());
    assert!(conf_dir.join("notes.txt").exists());
}
