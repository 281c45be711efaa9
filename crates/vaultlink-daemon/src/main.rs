//! `VaultLink` broker CLI
//!
//! One-shot operator commands against the local configuration store and the
//! bound PAM appliance. Results are printed as JSON on stdout.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use vaultlink_crypto::{BearerToken, CertificateRole, CsrOptions};
use vaultlink_daemon::Broker;
use vaultlink_daemon::appliance::{AccountRef, RegistrationKind, RetrievableAccount};
use vaultlink_daemon::bootstrap::ApplianceRequest;
use vaultlink_daemon::restart::RestartPolicy;

#[derive(Parser, Debug)]
#[command(name = "vaultlink")]
#[command(version, about = "VaultLink broker - PAM appliance trust and A2A registrations")]
struct Cli {
    /// Configuration file layered over the global settings
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Configuration store path
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Log level filter (e.g. "info", "debug", "warn")
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Output logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    /// Appliance bearer token for commands that need a session
    #[arg(long, global = true, env = "VAULTLINK_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the instance id, appliance binding and appliance availability
    Status,
    /// Bind to an appliance, establishing trust in its signing certificate
    Bootstrap {
        #[arg(long)]
        address: String,
        #[arg(long)]
        api_version: Option<u32>,
        /// Skip TLS certificate validation when talking to the appliance
        #[arg(long)]
        ignore_ssl: Option<bool>,
    },
    /// Validate the token against the bound appliance
    Login,
    /// Create or repair the machine identity and both registrations
    Configure,
    /// Show the configuration held on the appliance
    Configuration,
    /// Generate a certificate signing request
    Csr(CsrArgs),
    /// Install a certificate (PEM, DER or PKCS#12)
    InstallCert {
        #[arg(long, default_value = "client")]
        role: CertificateRole,
        #[arg(long)]
        file: PathBuf,
        #[arg(long, env = "VAULTLINK_CERT_PASSPHRASE", hide_env_values = true)]
        passphrase: Option<String>,
    },
    /// Show an installed certificate
    CertInfo {
        #[arg(long, default_value = "client")]
        role: CertificateRole,
    },
    /// Remove an installed certificate
    RemoveCert {
        #[arg(long, default_value = "client")]
        role: CertificateRole,
    },
    /// Manage trusted certificates
    #[command(subcommand)]
    Trusted(TrustedCommand),
    /// Inspect or delete an A2A registration
    #[command(subcommand)]
    Registration(RegistrationCommand),
    /// Manage the retrievable accounts of a registration
    #[command(subcommand)]
    Accounts(AccountsCommand),
    /// Delete the local configuration
    Reset {
        /// Also delete the appliance-side identity and registrations
        #[arg(long)]
        service: bool,
    },
}

#[derive(Args, Debug)]
struct CsrArgs {
    #[arg(long, default_value = "client")]
    role: CertificateRole,
    #[arg(long)]
    subject: Option<String>,
    #[arg(long)]
    key_size: Option<usize>,
    /// Comma-separated DNS names
    #[arg(long)]
    san_dns: Option<String>,
    /// Comma-separated IP addresses
    #[arg(long)]
    san_ip: Option<String>,
}

#[derive(Subcommand, Debug)]
enum TrustedCommand {
    List,
    Get { thumbprint: String },
    /// Add a certificate from a PEM or base64 DER file
    Add { file: PathBuf },
    Delete { thumbprint: String },
    DeleteAll,
    /// Import the appliance's trusted certificates
    Import,
}

#[derive(Subcommand, Debug)]
enum RegistrationCommand {
    Show { kind: RegistrationKind },
    Delete { kind: RegistrationKind },
}

#[derive(Subcommand, Debug)]
enum AccountsCommand {
    List {
        kind: RegistrationKind,
    },
    Get {
        kind: RegistrationKind,
        account_id: i64,
    },
    Add {
        kind: RegistrationKind,
        #[arg(required = true)]
        account_ids: Vec<i64>,
    },
    Remove {
        kind: RegistrationKind,
        #[arg(required = true)]
        account_ids: Vec<i64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = vaultlink_core::config::load_config(cli.config.as_deref())?;
    if let Some(path) = &cli.db_path {
        config.broker.database_path = Some(path.clone());
    }
    if let Some(level) = &cli.log_level {
        config.broker.log_level.clone_from(level);
    }
    config.broker.log_json |= cli.log_json;

    vaultlink_core::tracing_init::init_tracing(
        "vaultlink_daemon=warn",
        Some(&config.broker.log_level),
        config.broker.log_json,
    );
    info!(version = env!("CARGO_PKG_VERSION"), "Starting vaultlink");

    let restart = RestartPolicy::from_config(&config.broker);
    let broker = Broker::open(config, restart).await?;
    run(&cli, &broker).await?;
    broker.wait_for_restart().await;
    Ok(())
}

#[allow(clippy::too_many_lines)]
async fn run(cli: &Cli, broker: &Broker) -> anyhow::Result<()> {
    match &cli.command {
        Command::Status => {
            let appliance = match broker.appliance().await {
                Ok(appliance) => appliance,
                Err(e) => {
                    tracing::warn!(error = %e, "appliance availability unknown");
                    None
                }
            };
            print_json(&serde_json::json!({
                "instance_id": broker.instance_id().await?,
                "binding": broker.binding().await?,
                "appliance": appliance,
            }))
        }
        Command::Bootstrap {
            address,
            api_version,
            ignore_ssl,
        } => {
            let request = ApplianceRequest {
                address: address.clone(),
                api_version: *api_version,
                ignore_ssl: *ignore_ssl,
            };
            print_json(&broker.set_appliance(token(cli)?, &request).await?)
        }
        Command::Login => print_json(&broker.login(token(cli)?).await?),
        Command::Configure => {
            login(cli, broker).await?;
            print_json(&broker.configure_service().await?)
        }
        Command::Configuration => {
            login(cli, broker).await?;
            print_json(&broker.configuration().await?)
        }
        Command::Csr(args) => {
            let mut options = CsrOptions::new(args.role);
            if let Some(bits) = args.key_size {
                options.key_size_bits = bits;
            }
            options.subject.clone_from(&args.subject);
            options.san_dns.clone_from(&args.san_dns);
            options.san_ip.clone_from(&args.san_ip);
            let pem = broker.generate_csr(&options).await?;
            print_text(&pem);
            Ok(())
        }
        Command::InstallCert {
            role,
            file,
            passphrase,
        } => {
            let data = read_file(file).await?;
            print_json(
                &broker
                    .install_certificate(&data, passphrase.as_deref(), *role)
                    .await?,
            )
        }
        Command::CertInfo { role } => print_json(&broker.certificate_info(*role).await?),
        Command::RemoveCert { role } => {
            broker.remove_certificate(*role).await?;
            Ok(())
        }
        Command::Trusted(cmd) => match cmd {
            TrustedCommand::List => print_json(&broker.trusted_certificates().await?),
            TrustedCommand::Get { thumbprint } => {
                print_json(&broker.trusted_certificate(thumbprint).await?)
            }
            TrustedCommand::Add { file } => {
                let data = String::from_utf8(read_file(file).await?)
                    .context("Certificate file is not text")?;
                print_json(&broker.add_trusted_certificate(&data).await?)
            }
            TrustedCommand::Delete { thumbprint } => {
                broker.delete_trusted_certificate(thumbprint).await?;
                Ok(())
            }
            TrustedCommand::DeleteAll => {
                let removed = broker.delete_all_trusted_certificates().await?;
                print_json(&serde_json::json!({ "removed": removed }))
            }
            TrustedCommand::Import => {
                login(cli, broker).await?;
                print_json(&broker.import_trusted_certificates().await?)
            }
        },
        Command::Registration(cmd) => {
            login(cli, broker).await?;
            match cmd {
                RegistrationCommand::Show { kind } => {
                    print_json(&broker.registration(*kind).await?)
                }
                RegistrationCommand::Delete { kind } => {
                    print_json(&broker.delete_registration(*kind).await?)
                }
            }
        }
        Command::Accounts(cmd) => {
            login(cli, broker).await?;
            match cmd {
                AccountsCommand::List { kind } => {
                    print_json(&broker.retrievable_accounts(*kind).await?)
                }
                AccountsCommand::Get { kind, account_id } => {
                    print_json(&broker.retrievable_account(*kind, *account_id).await?)
                }
                AccountsCommand::Add { kind, account_ids } => {
                    let accounts: Vec<AccountRef> = account_ids
                        .iter()
                        .map(|&id| AccountRef { id, name: None })
                        .collect();
                    print_json(&broker.add_retrievable_accounts(*kind, &accounts).await?)
                }
                AccountsCommand::Remove { kind, account_ids } => {
                    let accounts: Vec<RetrievableAccount> = account_ids
                        .iter()
                        .map(|&account_id| RetrievableAccount {
                            account_id,
                            ..RetrievableAccount::default()
                        })
                        .collect();
                    broker.remove_retrievable_accounts(*kind, &accounts).await?;
                    Ok(())
                }
            }
        }
        Command::Reset { service } => {
            if *service {
                login(cli, broker).await?;
                let reports = broker.delete_service_configuration().await?;
                print_json(&reports)
            } else {
                broker.delete_configuration().await?;
                Ok(())
            }
        }
    }
}

fn token(cli: &Cli) -> anyhow::Result<BearerToken> {
    cli.token
        .as_deref()
        .map(BearerToken::new)
        .context("A bearer token is required (--token or VAULTLINK_TOKEN)")
}

async fn login(cli: &Cli, broker: &Broker) -> anyhow::Result<()> {
    broker.login(token(cli)?).await?;
    Ok(())
}

async fn read_file(path: &Path) -> anyhow::Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))
}

#[allow(clippy::print_stdout)]
fn print_text(text: &str) {
    println!("{text}");
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    print_text(&serde_json::to_string_pretty(value)?);
    Ok(())
}
