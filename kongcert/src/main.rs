//! Kong certificate installer.
//!
//! Deploys certificates to SNIs, forces HTTPS on routes and answers HTTP-01
//! challenges through the Kong admin API. Every save is checkpointed so it
//! can be rolled back with `kongcert rollback`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use kongcert::exit_codes;
use kongcert::installer::{Http01Challenge, Installer, InstallerOptions};
use kongcert::io::admin_api::KongAdminApi;
use kongcert::io::config::{DEFAULT_CONFIG_PATH, KongcertConfig, load_config, write_config};
use kongcert::logging;

#[derive(Parser)]
#[command(
    name = "kongcert",
    version,
    about = "Transactional certificate installer for the Kong admin API"
)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Override `admin_url` from the config file.
    #[arg(long, global = true)]
    admin_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default config file if missing.
    Init {
        /// Overwrite an existing config file.
        #[arg(short, long)]
        force: bool,
    },
    /// Print every SNI and route host known to the gateway.
    Names,
    /// Print gateway certificates and routes.
    Show,
    /// Deploy a certificate to one or more domains.
    Deploy {
        /// Domain to bind; `*.example.com` expands to matching known names.
        #[arg(long = "domain", required = true)]
        domains: Vec<String>,
        #[arg(long)]
        key_path: PathBuf,
        #[arg(long)]
        fullchain_path: PathBuf,
        /// Also force HTTPS on the routes serving each domain.
        #[arg(long)]
        redirect: bool,
        /// Print the planned changes without applying them.
        #[arg(long)]
        dry_run: bool,
    },
    /// Force HTTPS on the routes serving a domain.
    Redirect {
        #[arg(long)]
        domain: String,
    },
    /// Answer HTTP-01 challenges until `recover` or `rollback` removes them.
    ///
    /// Repeat `--domain`, `--token` and `--validation` once per challenge.
    Challenge {
        #[arg(long = "domain", required = true)]
        domains: Vec<String>,
        #[arg(long = "token", required = true)]
        tokens: Vec<String>,
        /// Key authorization to serve.
        #[arg(long = "validation", required = true)]
        validations: Vec<String>,
    },
    /// Undo the latest checkpoint.
    Rollback,
    /// Undo the latest checkpoint if it is temporary (challenge leftovers).
    Recover,
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(()) => exit_codes::OK,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::for_error(&err)
        }
    };
    std::process::exit(code);
}

fn run() -> Result<()> {
    let Cli {
        config,
        admin_url,
        command,
    } = Cli::parse();
    let open = || -> Result<Installer<KongAdminApi>> {
        let cfg = load_settings(&config, admin_url.as_deref())?;
        connect(&cfg)
    };

    match command {
        Command::Init { force } => cmd_init(&config, admin_url.as_deref(), force),
        Command::Names => {
            for name in open()?.all_names() {
                println!("{name}");
            }
            Ok(())
        }
        Command::Show => {
            cmd_show(&open()?);
            Ok(())
        }
        Command::Deploy {
            domains,
            key_path,
            fullchain_path,
            redirect,
            dry_run,
        } => cmd_deploy(
            &mut open()?,
            &domains,
            &key_path,
            &fullchain_path,
            redirect,
            dry_run,
        ),
        Command::Redirect { domain } => {
            let mut installer = open()?;
            let routes = installer.enhance_redirect(&domain)?;
            print_notes(&installer);
            installer.save(Some("redirect"), false)?;
            println!("redirected {} route(s)", routes.len());
            Ok(())
        }
        Command::Challenge {
            domains,
            tokens,
            validations,
        } => {
            let challenges = challenges_from_args(domains, tokens, validations)?;
            let services = open()?.perform_http01(&challenges)?;
            for (challenge, service) in challenges.iter().zip(services) {
                println!(
                    "serving {} for {} via service {} (plugin {}, route {})",
                    challenge.validation_path(),
                    challenge.domain,
                    service.service_id,
                    service.plugin_id,
                    service.route_id
                );
            }
            Ok(())
        }
        Command::Rollback => {
            let count = open()?.rollback_checkpoint()?;
            println!("undid {count} change(s)");
            Ok(())
        }
        Command::Recover => {
            let count = open()?.recover()?;
            println!("undid {count} change(s)");
            Ok(())
        }
    }
}

/// Pair repeated challenge flags positionally.
fn challenges_from_args(
    domains: Vec<String>,
    tokens: Vec<String>,
    validations: Vec<String>,
) -> Result<Vec<Http01Challenge>> {
    if domains.len() != tokens.len() || domains.len() != validations.len() {
        bail!(
            "--domain, --token and --validation must be repeated the same number of times \
             (got {}, {} and {})",
            domains.len(),
            tokens.len(),
            validations.len()
        );
    }
    Ok(domains
        .into_iter()
        .zip(tokens)
        .zip(validations)
        .map(|((domain, token), validation)| Http01Challenge {
            domain,
            token,
            validation,
        })
        .collect())
}

fn cmd_init(path: &Path, admin_url: Option<&str>, force: bool) -> Result<()> {
    if !force && path.exists() {
        println!("{} already exists", path.display());
        return Ok(());
    }
    let mut cfg = KongcertConfig::default();
    if let Some(url) = admin_url {
        cfg.admin_url = url.to_string();
    }
    write_config(path, &cfg).with_context(|| format!("write {}", path.display()))?;
    println!("wrote {}", path.display());
    Ok(())
}

fn load_settings(path: &Path, admin_url: Option<&str>) -> Result<KongcertConfig> {
    let mut cfg = load_config(path)?;
    if let Some(url) = admin_url {
        cfg.admin_url = url.to_string();
        cfg.validate().context("validate --admin-url")?;
    }
    Ok(cfg)
}

fn connect(cfg: &KongcertConfig) -> Result<Installer<KongAdminApi>> {
    let api = KongAdminApi::new(
        &cfg.admin_url,
        cfg.http.connect_timeout(),
        cfg.http.read_timeout(),
    );
    Installer::new(api, InstallerOptions::from_config(cfg))
        .with_context(|| format!("connect to {}", cfg.admin_url))
}

fn cmd_show(installer: &Installer<KongAdminApi>) {
    for cert in installer.invoker().certificates() {
        let snis: Vec<&str> = cert.snis.iter().map(String::as_str).collect();
        println!("certificate {} snis={}", cert.id, snis.join(","));
    }
    for route in installer.invoker().routes() {
        println!(
            "route {} hosts={} protocols={}",
            route.id,
            route.hosts.join(","),
            route.protocols.join(",")
        );
    }
}

fn cmd_deploy(
    installer: &mut Installer<KongAdminApi>,
    domains: &[String],
    key_path: &Path,
    fullchain_path: &Path,
    redirect: bool,
    dry_run: bool,
) -> Result<()> {
    for domain in domains {
        installer.deploy_cert_files(domain, key_path, fullchain_path)?;
        if redirect {
            installer.enhance_redirect(domain)?;
        }
    }
    print_notes(installer);
    if dry_run {
        println!("dry run: no changes applied");
        return Ok(());
    }
    installer.save(Some("deploy"), false)
}

fn print_notes(installer: &Installer<KongAdminApi>) {
    for note in installer.notes() {
        println!("{note}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["kongcert", "init", "--force"]);
        assert!(matches!(cli.command, Command::Init { force: true }));
        assert_eq!(cli.config, PathBuf::from("kongcert.toml"));
    }

    #[test]
    fn parse_deploy_with_many_domains() {
        let cli = Cli::parse_from([
            "kongcert",
            "--admin-url",
            "http://kong:8001",
            "deploy",
            "--domain",
            "*.example.com",
            "--domain",
            "test.com",
            "--key-path",
            "privkey.pem",
            "--fullchain-path",
            "fullchain.pem",
            "--dry-run",
        ]);
        assert_eq!(cli.admin_url.as_deref(), Some("http://kong:8001"));
        let Command::Deploy {
            domains,
            redirect,
            dry_run,
            ..
        } = cli.command
        else {
            panic!("expected deploy");
        };
        assert_eq!(domains, vec!["*.example.com", "test.com"]);
        assert!(!redirect);
        assert!(dry_run);
    }

    #[test]
    fn deploy_requires_a_domain() {
        let result = Cli::try_parse_from([
            "kongcert",
            "deploy",
            "--key-path",
            "k",
            "--fullchain-path",
            "f",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn global_config_after_subcommand() {
        let cli = Cli::parse_from(["kongcert", "rollback", "--config", "/etc/kongcert.toml"]);
        assert!(matches!(cli.command, Command::Rollback));
        assert_eq!(cli.config, PathBuf::from("/etc/kongcert.toml"));
    }

    #[test]
    fn parse_challenge_with_repeated_values() {
        let cli = Cli::parse_from([
            "kongcert",
            "challenge",
            "--domain",
            "a.example.com",
            "--token",
            "tok-a",
            "--validation",
            "tok-a.thumb",
            "--domain",
            "b.example.com",
            "--token",
            "tok-b",
            "--validation",
            "tok-b.thumb",
        ]);
        let Command::Challenge {
            domains,
            tokens,
            validations,
        } = cli.command
        else {
            panic!("expected challenge");
        };
        let challenges = challenges_from_args(domains, tokens, validations).expect("pair");
        assert_eq!(challenges.len(), 2);
        assert_eq!(challenges[1].domain, "b.example.com");
        assert_eq!(challenges[1].token, "tok-b");
        assert_eq!(challenges[1].validation, "tok-b.thumb");
    }

    #[test]
    fn challenge_values_must_pair_up() {
        let err = challenges_from_args(
            vec!["a.example.com".to_string(), "b.example.com".to_string()],
            vec!["tok-a".to_string()],
            vec!["tok-a.thumb".to_string()],
        )
        .unwrap_err();
        assert!(err.to_string().contains("same number of times"));
    }

    #[test]
    fn init_writes_config_with_admin_url_override() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("kongcert.toml");
        cmd_init(&path, Some("https://kong:8444"), false).expect("init");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.admin_url, "https://kong:8444");

        cmd_init(&path, None, false).expect("init again");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.admin_url, "https://kong:8444");
    }
}
