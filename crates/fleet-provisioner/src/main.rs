//! provisioner - phased site provisioning CLI
//!
//! Entry point for the `provisioner` binary.
//!
//! Exit status: 0 on normal completion, 1 when a phase fails or is
//! interrupted, 2 on configuration, credential or ledger trust problems.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use fleet_dashboard::{
    ActionBatch, ActionBatchApi, BlinkRequest, CancellationToken, HttpDashboardClient, NetworkApi,
};
use fleet_provisioner::{
    load_inventory, BuildContext, Ledger, Orchestrator, OrchestratorOptions, PhaseReport,
    ProvisionError, ProvisionerConfig, SettingsMode,
};

const EXIT_PHASE_FAILED: u8 = 1;
const EXIT_CONFIGURATION: u8 = 2;

/// Provision branch sites through dashboard action batches
#[derive(Parser, Debug)]
#[command(name = "provisioner")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long, default_value = "provisioner.toml")]
    config: PathBuf,

    /// Organization id (overrides the config file)
    #[arg(long)]
    org: Option<String>,

    /// Ledger file (overrides the config file)
    #[arg(long)]
    ledger: Option<PathBuf>,

    /// Inventory file (overrides the config file)
    #[arg(long)]
    inventory: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// Dashboard API key
    #[arg(long, env = "DASHBOARD_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create one network per inventory site
    Networks,
    /// Claim every site's devices
    Devices,
    /// Configure sites that have their devices
    Settings {
        /// Re-apply device and port settings to already configured sites
        #[arg(long)]
        resync: bool,
    },
    /// Run every phase that still has work to do
    Run,
    /// Delete every recorded network and the ledger
    Teardown {
        /// Confirm deletion
        #[arg(long)]
        yes: bool,
    },
    /// Show ledger progress per site
    Status,
    /// Inspect or manage action batches
    Batches {
        #[command(subcommand)]
        action: BatchCommand,
    },
    /// Blink the LEDs of one site's devices
    Blink {
        /// Site number
        site: String,
        /// Blink duration in seconds
        #[arg(long, default_value_t = 20)]
        duration: u32,
    },
}

#[derive(Subcommand, Debug)]
enum BatchCommand {
    /// List the organization's batches
    List,
    /// Show one batch
    Show { id: String },
    /// Cancel a batch that has not run
    Cancel { id: String },
    /// Confirm an unconfirmed batch
    Confirm { id: String },
}

/// Initializes tracing with `RUST_LOG` or the given default level
fn init_logging(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .with_context(|| format!("invalid log level '{}'", level))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to set tracing subscriber: {}", e))?;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = init_logging(&args.log_level) {
        eprintln!("provisioner: {:#}", e);
        return ExitCode::from(EXIT_CONFIGURATION);
    }

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(exit_code(&e))
        }
    }
}

fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<ProvisionError>() {
        Some(e) if e.is_configuration() => EXIT_CONFIGURATION,
        _ => EXIT_PHASE_FAILED,
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = ProvisionerConfig::load_or_default(&args.config)?;
    if let Some(org) = args.org {
        config.dashboard.organization_id = org;
    }
    if let Some(ledger) = args.ledger {
        config.provisioning.ledger_path = ledger;
    }
    if let Some(inventory) = args.inventory {
        config.provisioning.inventory_path = inventory;
    }

    let ledger = Ledger::load(&config.provisioning.ledger_path)?;

    if matches!(args.command, Command::Status) {
        print_status(&ledger);
        return Ok(());
    }

    config.validate()?;
    let api_key = args
        .api_key
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| {
            ProvisionError::config("api_key", "pass --api-key or set DASHBOARD_API_KEY")
        })?;
    let client = Arc::new(
        HttpDashboardClient::new(config.client_config(api_key))
            .map_err(ProvisionError::from)?,
    );
    let org = config.dashboard.organization_id.clone();
    check_organization_access(client.as_ref(), &org).await?;

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after in-flight batches");
            signal_cancel.cancel();
        }
    });

    let command = match args.command {
        Command::Batches { action } => {
            return run_batch_command(client.as_ref(), &org, action).await;
        }
        other => other,
    };

    let needs_inventory = matches!(
        command,
        Command::Networks | Command::Devices | Command::Settings { .. } | Command::Run
    );
    let sites = if needs_inventory {
        load_inventory(&config.provisioning.inventory_path)?
    } else {
        Vec::new()
    };

    let mut orchestrator = Orchestrator::new(
        client,
        BuildContext::from_config(&config),
        sites,
        ledger,
    )
    .with_options(OrchestratorOptions::from_config(&config))
    .with_cancellation(cancel.clone());

    let reports = match command {
        Command::Networks => vec![orchestrator.run_networks().await?],
        Command::Devices => vec![orchestrator.run_devices().await?],
        Command::Settings { resync } => {
            let mode = if resync {
                SettingsMode::Resync
            } else {
                SettingsMode::Initial
            };
            vec![orchestrator.run_settings(mode).await?]
        }
        Command::Run => orchestrator.run_all().await?,
        Command::Teardown { yes } => {
            if !yes {
                return Err(ProvisionError::config(
                    "--yes",
                    "teardown deletes every recorded network; pass --yes to confirm",
                )
                .into());
            }
            vec![orchestrator.run_teardown().await?]
        }
        Command::Blink { site, duration } => {
            let request = BlinkRequest {
                duration,
                ..BlinkRequest::default()
            };
            let serials = orchestrator.blink(&site, &request).await?;
            info!(site = %site, devices = serials.len(), "Devices should now be blinking");
            Vec::new()
        }
        Command::Status | Command::Batches { .. } => Vec::new(),
    };

    for report in &reports {
        print_report(report);
    }

    if cancel.is_cancelled() {
        return Err(ProvisionError::Cancelled.into());
    }
    Ok(())
}

/// Verifies the configured organization is visible to the API key
async fn check_organization_access(client: &dyn NetworkApi, org: &str) -> anyhow::Result<()> {
    let orgs = client
        .list_organizations()
        .await
        .map_err(ProvisionError::from)
        .context("checking API key access")?;

    if orgs.iter().any(|o| o.id == org) {
        info!(organization_id = %org, "API key has access to organization");
        Ok(())
    } else {
        let visible: Vec<String> = orgs
            .iter()
            .map(|o| format!("{} ({})", o.id, o.name))
            .collect();
        Err(ProvisionError::config(
            "dashboard.organization_id",
            format!(
                "organization {} is not accessible; visible: {}",
                org,
                visible.join(", ")
            ),
        )
        .into())
    }
}

async fn run_batch_command(
    client: &dyn ActionBatchApi,
    org: &str,
    action: BatchCommand,
) -> anyhow::Result<()> {
    match action {
        BatchCommand::List => {
            let batches = client.list_batches(org).await.map_err(ProvisionError::from)?;
            for batch in &batches {
                print_batch(batch);
            }
            info!(count = batches.len(), "Listed action batches");
        }
        BatchCommand::Show { id } => {
            let batch = client
                .get_batch(org, &id)
                .await
                .map_err(ProvisionError::from)?;
            print_batch(&batch);
            for error in &batch.status.errors {
                println!("    error: {}", error);
            }
        }
        BatchCommand::Cancel { id } => {
            client
                .cancel_batch(org, &id)
                .await
                .map_err(ProvisionError::from)?;
            info!(batch_id = %id, "Cancelled action batch");
        }
        BatchCommand::Confirm { id } => {
            let batch = client
                .confirm_batch(org, &id)
                .await
                .map_err(ProvisionError::from)?;
            info!(batch_id = %batch.id, "Confirmed action batch");
        }
    }
    Ok(())
}

fn print_batch(batch: &ActionBatch) {
    println!(
        "{:<20} {:<10} confirmed={:<5} synchronous={:<5} actions={}",
        batch.id,
        batch.state(),
        batch.confirmed,
        batch.synchronous,
        batch.actions.len()
    );
}

fn print_status(ledger: &Ledger) {
    if ledger.is_empty() {
        println!("No sites recorded in {}", ledger.path().display());
        return;
    }
    println!(
        "{:<8} {:<28} {:<14} {:<10} {}",
        "SITE", "LOCATION", "NETWORK", "DEVICES", "SETTINGS"
    );
    for record in ledger.records() {
        let devices = record
            .devices
            .as_ref()
            .map(|d| d.len().to_string())
            .unwrap_or_else(|| "-".to_string());
        let settings = if record.settings_created {
            "created".to_string()
        } else if !record.last_errors.is_empty() {
            format!("failed ({} error(s))", record.last_errors.len())
        } else {
            "pending".to_string()
        };
        println!(
            "{:<8} {:<28} {:<14} {:<10} {}",
            record.site_number,
            record.location,
            record.network_id.as_deref().unwrap_or("-"),
            devices,
            settings
        );
    }
}

fn print_report(report: &PhaseReport) {
    info!("{}", report);
    for (site, reason) in &report.skipped {
        info!(site = %site, reason = %reason, "Skipped");
    }
    for failure in &report.failed {
        warn!(site = %failure.site, errors = ?failure.errors, "Failed");
    }
}
