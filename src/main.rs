//! # provisionctl
//!
//! Provisions, verifies and rotates the database credential pipeline of one
//! application.
//!
//! ## Usage
//!
//! ```bash
//! # Create or converge every resource, then verify the cluster copy
//! DB_URL=postgres://... provisionctl --cluster tiles --namespace tiles provision --value-env DB_URL
//!
//! # Show what would change without touching anything
//! provisionctl --cluster tiles provision --dry-run
//!
//! # Rotate to a new value and restart the consumer once it is synced
//! provisionctl --cluster tiles --consumer tile-server rotate --value-file ./new-url
//!
//! # Read-only checks
//! provisionctl --cluster tiles verify
//! provisionctl --cluster tiles status --output json
//! ```
//!
//! Exit codes: `0` success, `2` partial or timed out (resumable), `3` resource
//! conflict, `4` precondition unmet, `1` anything else. The reached state is
//! always printed on stdout.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use secret_provisioner::config::{load_dotenv, ConfigOverrides, ProvisionerConfig};
use secret_provisioner::descriptor::{DescriptorSet, SecretValue};
use secret_provisioner::observability::{self, metrics};
use secret_provisioner::orchestrator::{Orchestrator, ProvisionState};
use secret_provisioner::provider::aws::{create_sdk_config, AwsAccount, AwsIam, AwsSecretsManager};
use secret_provisioner::provider::cluster::KubeCluster;
use secret_provisioner::provider::{AccountResolver, Providers};
use secret_provisioner::reconciler::Reconciler;
use secret_provisioner::rotation::{RefreshMode, RotationController, RotationOutcome};
use secret_provisioner::verifier::Verifier;
use secret_provisioner::ProvisionError;
use serde::Serialize;
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Parser, Debug)]
#[command(name = "provisionctl")]
#[command(about = "Provision and rotate a database credential from AWS Secrets Manager into Kubernetes", long_about = None)]
#[command(version)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Flags shared by every subcommand; each falls back to `PROVISION_*` then the default
#[derive(Args, Debug)]
struct GlobalArgs {
    /// EKS cluster name
    #[arg(long, global = true)]
    cluster: Option<String>,

    /// AWS region
    #[arg(long, global = true)]
    region: Option<String>,

    /// Namespace of the consumer and its service account
    #[arg(short, long, global = true)]
    namespace: Option<String>,

    /// Logical secret name in the form <app>/<resource>
    #[arg(long, global = true)]
    secret_name: Option<String>,

    /// Service account the SecretStore authenticates as
    #[arg(long, global = true)]
    service_account: Option<String>,

    /// Name of the synced Kubernetes Secret
    #[arg(long, global = true)]
    cluster_secret: Option<String>,

    /// Key inside the synced Secret
    #[arg(long, global = true)]
    secret_key: Option<String>,

    /// Deployment restarted after a successful rotation
    #[arg(long, global = true)]
    consumer: Option<String>,

    /// Cluster OIDC issuer (looked up from EKS when omitted)
    #[arg(long, global = true)]
    oidc_issuer: Option<String>,

    /// Sync refresh interval, e.g. 1h
    #[arg(long, global = true)]
    refresh_interval: Option<String>,

    /// Overall deadline for the invocation, e.g. 15m
    #[arg(long, global = true)]
    timeout: Option<String>,

    /// Load the descriptor set from YAML instead of deriving it
    #[arg(long, global = true)]
    descriptors: Option<PathBuf>,

    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,

    /// Write Prometheus metrics to this file on exit
    #[arg(long, global = true)]
    metrics_out: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Reconcile and verify every resource in order
    Provision {
        /// Plan only; report what would be created or updated
        #[arg(long)]
        dry_run: bool,

        #[command(flatten)]
        value: ValueSource,
    },
    /// Write a new secret value and propagate it to the consumer
    Rotate {
        /// How the cluster copy picks up the value
        #[arg(long, value_enum, default_value_t = RefreshArg::Forced)]
        refresh: RefreshArg,

        #[command(flatten)]
        value: ValueSource,
    },
    /// Check every state without mutating anything
    Verify,
    /// Probe every layer once and print the reached state
    Status,
}

/// Where the secret value comes from; it is never accepted as a plain flag
#[derive(Args, Debug, Default)]
struct ValueSource {
    /// Read the value from this environment variable
    #[arg(long, conflicts_with_all = ["value_file", "value_stdin"])]
    value_env: Option<String>,

    /// Read the value from this file
    #[arg(long, conflicts_with = "value_stdin")]
    value_file: Option<PathBuf>,

    /// Read the value from standard input
    #[arg(long)]
    value_stdin: bool,
}

impl ValueSource {
    fn read(&self) -> Result<Option<SecretValue>> {
        let raw = if let Some(var) = &self.value_env {
            std::env::var(var).with_context(|| format!("environment variable {var} is not set"))?
        } else if let Some(path) = &self.value_file {
            std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read secret value from {}", path.display()))?
        } else if self.value_stdin {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("Failed to read secret value from stdin")?;
            buffer
        } else {
            return Ok(None);
        };
        Ok(Some(SecretValue::new(raw.trim_end_matches(['\r', '\n']))))
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum RefreshArg {
    Forced,
    Passive,
}

impl From<RefreshArg> for RefreshMode {
    fn from(arg: RefreshArg) -> Self {
        match arg {
            RefreshArg::Forced => RefreshMode::Forced,
            RefreshArg::Passive => RefreshMode::Passive,
        }
    }
}

impl GlobalArgs {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            cluster: self.cluster.clone(),
            region: self.region.clone(),
            namespace: self.namespace.clone(),
            secret_name: self.secret_name.clone(),
            service_account: self.service_account.clone(),
            cluster_secret: self.cluster_secret.clone(),
            secret_key: self.secret_key.clone(),
            consumer: self.consumer.clone(),
            oidc_issuer: self.oidc_issuer.clone(),
            refresh_interval: self.refresh_interval.clone(),
            invocation_timeout: self.timeout.clone(),
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    observability::init_tracing();
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        debug!("rustls crypto provider already installed");
    }
    metrics::register_metrics().context("Failed to register metrics")?;

    let cli = Cli::parse();
    let output = cli.global.output;
    load_dotenv();
    let config = match ProvisionerConfig::resolve([ConfigOverrides::from_env(), cli.global.overrides()]) {
        Ok(config) => config,
        Err(e) => return report_setup_failure(output, &e),
    };

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; stopping after the current call");
            on_signal.cancel();
        }
    });

    let code = match run(&cli, &config, cancel).await {
        Ok(code) => code,
        Err(e) => return report_setup_failure(output, &e),
    };

    if let Some(path) = &cli.global.metrics_out {
        metrics::write_textfile(path)?;
    }
    Ok(ExitCode::from(code))
}

async fn run(cli: &Cli, config: &ProvisionerConfig, cancel: CancellationToken) -> Result<u8> {
    let sdk_config = create_sdk_config(&config.region).await;
    let account = AwsAccount::new(&sdk_config);

    let mut set = match &cli.global.descriptors {
        Some(path) => DescriptorSet::from_yaml_file(path)?,
        None => {
            let account_id = account.account_id().await?;
            let issuer = match &config.oidc_issuer {
                Some(issuer) => issuer.clone(),
                None => account.oidc_issuer(&config.cluster).await?,
            };
            DescriptorSet::from_config(config, &account_id, &issuer)?
        }
    };
    info!(
        "Working on {} for {}/{} in {}",
        set.secret.name, set.identity.namespace, set.identity.service_account, set.secret.region
    );

    let cluster = KubeCluster::try_default().await?;
    let providers = Providers {
        secrets: Arc::new(AwsSecretsManager::new(&sdk_config)),
        policies: Arc::new(AwsIam::new(&sdk_config, &set.identity.account_id)),
        identities: Arc::new(AwsIam::new(&sdk_config, &set.identity.account_id)),
        cluster: Arc::new(cluster),
    };

    let dry_run = matches!(cli.command, Commands::Provision { dry_run: true, .. });
    let reconciler = Reconciler::new(providers).with_dry_run(dry_run);
    let verifier = Verifier::new(cancel).with_invocation_timeout(config.invocation_timeout);
    let orchestrator = Orchestrator::new(reconciler, verifier, config);
    let output = cli.global.output;

    match &cli.command {
        Commands::Provision { value, .. } => {
            if let Some(value) = value.read()? {
                set.secret = set.secret.with_value(value);
            }
            let report = orchestrator.provision(&set).await;
            print(output, &report, || report.render_text())?;
            Ok(report
                .failure
                .as_ref()
                .map_or(0, |failure| failure.error.exit_code()))
        }
        Commands::Verify => {
            let report = orchestrator.verify(&set).await;
            print(output, &report, || report.render_text())?;
            Ok(report
                .failure
                .as_ref()
                .map_or(0, |failure| failure.error.exit_code()))
        }
        Commands::Status => {
            let status = orchestrator.observe(&set).await?;
            print(output, &status, || status.render_text())?;
            Ok(if status.reached == ProvisionState::Verified {
                0
            } else {
                2
            })
        }
        Commands::Rotate { refresh, value } => {
            let Some(new_value) = value.read()? else {
                bail!("rotate needs a value: pass --value-env, --value-file or --value-stdin");
            };
            let controller = RotationController::new(orchestrator, config.consumer.clone());
            match controller.rotate(&set, &new_value, (*refresh).into()).await {
                Ok(outcome) => {
                    let completed = outcome.is_completed();
                    print(output, &outcome, || match &outcome {
                        RotationOutcome::Completed {
                            hash,
                            reload_signaled,
                        } => format!(
                            "rotation completed: hash {hash}, consumer restarted: {reload_signaled}\nreached: {}\n",
                            ProvisionState::Verified
                        ),
                        RotationOutcome::Incomplete {
                            last_observed,
                            hash,
                            restored,
                        } => format!(
                            "rotation incomplete: {last_observed}\ncluster still holds hash {hash} (restored: {restored})\nreached: {}\n",
                            ProvisionState::SecretSynced
                        ),
                    })?;
                    Ok(if completed { 0 } else { 2 })
                }
                Err(e) => {
                    let reached = controller.reached_after(&set, &e).await;
                    print_failure(output, reached, &format!("rotation failed: {e}"), &e.remediation())?;
                    Ok(e.exit_code())
                }
            }
        }
    }
}

/// Failure before any pipeline step ran: nothing was confirmed by this invocation
fn report_setup_failure(format: OutputFormat, error: &anyhow::Error) -> Result<ExitCode> {
    let code = error
        .downcast_ref::<ProvisionError>()
        .map_or(1, ProvisionError::exit_code);
    let remediation = error
        .downcast_ref::<ProvisionError>()
        .map_or_else(String::new, ProvisionError::remediation);
    print_failure(
        format,
        Some(ProvisionState::Unprovisioned),
        &format!("provisionctl failed before any step ran: {error:#}"),
        &remediation,
    )?;
    Ok(ExitCode::from(code))
}

fn print_failure(
    format: OutputFormat,
    reached: Option<ProvisionState>,
    message: &str,
    remediation: &str,
) -> Result<()> {
    let reached_name = reached.map_or("unknown", ProvisionState::as_str);
    let report = serde_json::json!({
        "reached": reached_name,
        "error": message,
        "remediation": remediation,
    });
    print(format, &report, || {
        let mut text = format!("{message}\n");
        if !remediation.is_empty() {
            text.push_str(remediation);
            text.push('\n');
        }
        text.push_str(&format!("reached: {reached_name}\n"));
        text
    })
}

fn print<T: Serialize>(format: OutputFormat, value: &T, text: impl FnOnce() -> String) -> Result<()> {
    match format {
        OutputFormat::Text => print!("{}", text()),
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(value).context("Failed to serialize report")?
        ),
    }
    Ok(())
}
