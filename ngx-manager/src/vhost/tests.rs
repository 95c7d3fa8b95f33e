use tempfile::TempDir;

use super::*;

fn write_and_load(yaml: &str) -> Vec<SiteSpec> {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("vhosts.yml");
    fs::write(&path, yaml).unwrap();
    load_sites(&path).unwrap()
}

#[test]
fn parses_bare_list() {
    let sites = write_and_load(
        r#"
- name: blog
  domains: [blog.example.com, www.blog.example.com]
  type: static
  root: /srv/blog
- name: api
  domains: [api.example.com]
  type: proxy
  upstream: http://127.0.0.1:3000
  ssl: true
"#,
    );
    assert_eq!(sites.len(), 2);
    assert_eq!(sites[0].primary_domain(), "blog.example.com");
    assert!(!sites[0].ssl);
    assert_eq!(sites[1].kind, SiteKind::Proxy);
    assert!(sites[1].ssl);
}

#[test]
fn parses_wrapped_mapping() {
    let sites = write_and_load(
        r#"
vhosts:
  - name: plain
    domains: [plain.example.com]
    root: /srv/plain
"#,
    );
    assert_eq!(sites.len(), 1);
    assert_eq!(sites[0].kind, SiteKind::Static);
    assert!(!sites[0].ssl);
}

#[test]
fn malformed_entries_are_skipped_not_fatal() {
    let sites = write_and_load(
        r#"
- name: good
  domains: [good.example.com]
  root: /srv/good
- domains: [nameless.example.com]
- name: no-domains
  domains: []
  root: /srv/empty
- name: half-proxy
  domains: [half.example.com]
  type: proxy
- name: rootless
  domains: [rootless.example.com]
"#,
    );
    assert_eq!(sites.len(), 1);
    assert_eq!(sites[0].name, "good");
}

#[test]
fn rejects_names_that_escape_the_conf_dir() {
    let sites = write_and_load(
        r#"
- name: ../../etc/cron.d/evil
  domains: [evil.example.com]
  root: /srv/evil
"#,
    );
    assert!(sites.is_empty());
}

#[test]
fn unparsable_file_is_an_error() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("vhosts.yml");
    fs::write(&path, "{{ not yaml").unwrap();
    assert!(load_sites(&path).is_err());
}

#[test]
fn missing_file_is_an_error() {
    let tmp = TempDir::new().unwrap();
    assert!(load_sites(&tmp.path().join("vhosts.yml")).is_err());
}
