use std::{sync::Arc, time::Duration};

use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use kube::Client;

use azure_disk_mitigator::{
    azure::ComputeClient,
    config::{AzureConfig, RemediationConfig},
    message::DetachConflict,
    reconciler::{self, DEFAULT_FIELD_SELECTOR, ReconcilerCtx},
};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone, Subcommand)]
enum Commands {
    /// Watch attach-failure events and detach conflicting disks
    Reconcile(ReconcileArgs),
    /// Detach the disk named in a single event message
    Detach {
        message: String,
        #[command(flatten)]
        azure: AzureConfig,
        #[command(flatten)]
        remediation: RemediationConfig,
    },
    /// Print the identifiers found in an event message
    Parse { message: String },
}

#[derive(Debug, Clone, Args)]
struct ReconcileArgs {
    #[command(flatten)]
    azure: AzureConfig,
    #[command(flatten)]
    remediation: RemediationConfig,
    /// Field selector for the watched events
    #[arg(long, default_value = DEFAULT_FIELD_SELECTOR)]
    field_selector: String,
    /// Requeue delay after a retryable failure, in seconds
    #[arg(long = "retry-delay-secs", default_value_t = 10)]
    retry_delay: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_file(true)
                .with_line_number(true),
        )
        .with(EnvFilter::from_default_env())
        .try_init()?;

    let cli = Cli::parse();
    match cli.command {
        Some(Commands::Reconcile(args)) => run_controller(args).await?,
        Some(Commands::Detach {
            message,
            azure,
            remediation,
        }) => {
            let inventory = ComputeClient::new(&azure)?;
            let conflict = reconciler::remediate(&message, &inventory, &remediation).await?;
            println!("{}", serde_yaml_ng::to_string(&conflict)?);
        }
        Some(Commands::Parse { message }) => {
            let conflict = DetachConflict::parse(&message)?;
            println!("{}", serde_yaml_ng::to_string(&conflict)?);
        }
        None => {}
    }

    Ok(())
}

async fn run_controller(args: ReconcileArgs) -> anyhow::Result<()> {
    let inventory = Arc::new(ComputeClient::new(&args.azure)?);
    let client = Client::try_default().await?;

    let context = ReconcilerCtx {
        inventory,
        remediation: args.remediation,
        retry_delay: Duration::from_secs(args.retry_delay),
    };

    reconciler::control_loop(client, args.field_selector, context)
        .for_each(|res| async move {
            match res {
                Ok((event, _)) => tracing::info!("Remediated event {}", event),
                Err(e) => tracing::error!("Event reconcile failed: {:?}", e),
            }
        })
        .await;

    tracing::info!("controller terminated");
    Ok(())
}
