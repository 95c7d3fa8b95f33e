//! Shared test doubles and fixtures.

use std::path::Path;
use std::sync::Mutex;

use anyhow::{bail, Result};
use fs_err as fs;
use time::OffsetDateTime;

use crate::cmd::{CommandOutput, CommandRunner};

struct Rule {
    program: String,
    needle: String,
    remaining: Option<u32>,
    response: Response,
}

enum Response {
    Output(CommandOutput),
    ExecError,
}

/// A `CommandRunner` that answers from scripted rules and records every
/// invocation for later assertions.
#[derive(Default)]
pub(crate) struct ScriptedRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, program: &str, needle: &str, remaining: Option<u32>, response: Response) {
        self.rules.lock().unwrap().push(Rule {
            program: program.to_string(),
            needle: needle.to_string(),
            remaining,
            response,
        });
    }

    /// Succeed with the given stdout whenever `program` is invoked with an
    /// argument list containing `needle`.
    pub fn on_ok(&self, program: &str, needle: &str, stdout: &str) {
        self.push(
            program,
            needle,
            None,
            Response::Output(CommandOutput {
                code: 0,
                stdout: stdout.to_string(),
                stderr: String::new(),
            }),
        );
    }

    /// Fail with the given exit code and stderr.
    pub fn on_fail(&self, program: &str, needle: &str, code: i32, stderr: &str) {
        self.push(
            program,
            needle,
            None,
            Response::Output(CommandOutput {
                code,
                stdout: String::new(),
                stderr: stderr.to_string(),
            }),
        );
    }

    /// Like `on_fail`, but the rule expires after `times` matches.
    pub fn on_fail_times(&self, program: &str, needle: &str, times: u32, stderr: &str) {
        self.push(
            program,
            needle,
            Some(times),
            Response::Output(CommandOutput {
                code: 1,
                stdout: String::new(),
                stderr: stderr.to_string(),
            }),
        );
    }

    /// Fail with a non-zero exit but the given stdout (acme.sh prints its
    /// "Skipping" notice to stdout).
    pub fn on_fail_stdout(&self, program: &str, needle: &str, stdout: &str) {
        self.push(
            program,
            needle,
            None,
            Response::Output(CommandOutput {
                code: 2,
                stdout: stdout.to_string(),
                stderr: String::new(),
            }),
        );
    }

    /// Simulate the program not being installed.
    pub fn on_missing(&self, program: &str, needle: &str) {
        self.push(program, needle, None, Response::ExecError);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count_calls(&self, needle: &str) -> usize {
        self.calls().iter().filter(|c| c.contains(needle)).count()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        let call = format!("{program} {}", args.join(" "));
        self.calls.lock().unwrap().push(call.clone());

        let mut rules = self.rules.lock().unwrap();
        for rule in rules.iter_mut() {
            if rule.program != program || !call.contains(&rule.needle) {
                continue;
            }
            if let Some(remaining) = &mut rule.remaining {
                if *remaining == 0 {
                    continue;
                }
                *remaining -= 1;
            }
            return match &rule.response {
                Response::Output(out) => Ok(out.clone()),
                Response::ExecError => bail!("failed to execute {program}"),
            };
        }
        // Anything unscripted succeeds quietly.
        Ok(CommandOutput {
            code: 0,
            stdout: String::new(),
            stderr: String::new(),
        })
    }
}

/// A full configuration rooted under a test-owned directory.
pub(crate) fn test_config(root: &Path) -> crate::config::ManagerConfig {
    use std::time::Duration;

    crate::config::ManagerConfig::builder()
        .vhosts_file(root.join("vhosts.yml"))
        .conf_dir(root.join("conf.d"))
        .certs_dir(root.join("certs"))
        .logs_dir(root.join("logs"))
        .webroot(root.join("www"))
        .acme_bin("/usr/local/bin/acme.sh")
        .ca_url("https://acme.test/directory")
        .email("ops@example.com")
        .staging(false)
        .renew_days_before(30)
        .retry_attempts(3)
        .retry_interval(Duration::ZERO)
        .standalone_port(80)
        .stop_grace_period(Duration::from_millis(50))
        .renew_timeout(Duration::from_secs(60))
        .renew_check_interval(Duration::from_secs(3600))
        .pid_file(root.join("nginx.pid"))
        .build()
}

/// Write a freshly minted self-signed certificate (and key) for `domain`
/// into `dir/<domain>/` using the live layout.
pub(crate) fn mint_cert(dir: &Path, domain: &str, not_after: OffsetDateTime) {
    use rcgen::{CertificateParams, KeyPair};

    let key = KeyPair::generate().unwrap();
    let mut params = CertificateParams::new(vec![domain.to_string()]).unwrap();
    params.not_after = not_after;
    let cert = params.self_signed(&key).unwrap();

    let domain_dir = dir.join(domain);
    fs::create_dir_all(&domain_dir).unwrap();
    fs::write(domain_dir.join("fullchain.pem"), cert.pem()).unwrap();
    fs::write(domain_dir.join("privkey.pem"), key.serialize_pem()).unwrap();
    fs::write(domain_dir.join("cert.pem"), cert.pem()).unwrap();
    fs::write(domain_dir.join("chain.pem"), cert.pem()).unwrap();
}
