//! cvmdeploy command line.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use cvmdeploy::control::{AzureCli, ControlPlane, ProcessRunner};
use cvmdeploy::db::{Database, DeploymentRecord, DeploymentStore};
use cvmdeploy::deploy::DeploymentBuilder;
use cvmdeploy::disk::{DiskUploader, drain_pending_revocations};
use cvmdeploy::layout::HomeLayout;
use cvmdeploy::logging::init_logging;
use cvmdeploy::options::{DEFAULT_REGION, DeployOptions, discover_source_ip};
use cvmdeploy::preflight::{DEPLOY_TOOLS, TEARDOWN_TOOLS, check_tools};
use cvmdeploy::teardown::delete_deployment;
use cvmdeploy::{DeployError, DeploymentDescriptor};

#[derive(Parser, Debug)]
#[command(
    name = "cvmdeploy",
    author,
    version,
    about = "Deploy devnet node images as Azure confidential VMs",
    long_about = None
)]
struct Cli {
    /// State directory [default: ~/.cvmdeploy]
    #[arg(long, global = true, env = "CVMDEPLOY_HOME")]
    home: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Deploy an image as a confidential VM
    Deploy {
        #[command(flatten)]
        options: DeployOptions,

        /// JSON file with the same fields as the flags
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Upload an image as an OS disk into an existing resource group
    UploadDisk {
        #[arg(long)]
        image: PathBuf,

        #[arg(long)]
        disk_name: String,

        #[arg(long)]
        resource_group: String,

        #[arg(short = 'r', long, default_value = DEFAULT_REGION)]
        region: String,

        /// Stream azcopy output
        #[arg(short = 'v', long = "logs")]
        show_logs: bool,
    },

    /// Show recorded deployments, newest first
    List,

    /// Delete a recorded deployment's VM and OS disk
    Delete {
        name: String,

        /// Do not ask for confirmation
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let home = match cli.home {
        Some(home) => home,
        None => HomeLayout::default_home()?,
    };
    let layout = HomeLayout::new(home);
    layout.prepare()?;
    let _log_guard = init_logging(&layout.logs_dir());

    let store = DeploymentStore::new(Database::open(&layout.db_path())?);

    let result = match cli.command {
        Command::Deploy { options, config } => deploy(&store, options, config).await,
        Command::UploadDisk {
            image,
            disk_name,
            resource_group,
            region,
            show_logs,
        } => upload_disk(image, disk_name, resource_group, region, show_logs).await,
        Command::List => list(&store),
        Command::Delete { name, yes } => delete(&store, &name, yes).await,
    };

    // Revokes scheduled by grants dropped on interrupt.
    drain_pending_revocations().await;
    result
}

fn azure(show_logs: bool) -> Arc<dyn ControlPlane> {
    Arc::new(AzureCli::new(Arc::new(ProcessRunner), show_logs))
}

async fn deploy(
    store: &DeploymentStore,
    options: DeployOptions,
    config: Option<PathBuf>,
) -> anyhow::Result<()> {
    let options = match config {
        Some(path) => options.merge(DeployOptions::from_file(&path)?),
        None => options,
    };

    let discovered = if options.source_ip.is_none() {
        check_tools(&["curl"])?;
        Some(discover_source_ip(&ProcessRunner).await?)
    } else {
        None
    };
    let descriptor: DeploymentDescriptor = options.into_descriptor(discovered)?;
    let name = descriptor.name.clone();
    let control = azure(descriptor.show_logs);

    let run = tokio::select! {
        run = DeploymentBuilder::new(descriptor, control).run() => run,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!(deployment = %name, "Interrupted, no further steps issued");
            anyhow::bail!("deployment {name} interrupted");
        }
    };

    store.record_run(DeploymentRecord::from_run(&run))?;

    let failed_task = run.failed_task.clone();
    let summary = run.into_result().with_context(|| match &failed_task {
        Some(task) => format!("deployment {name} failed at {task}"),
        None => format!("deployment {name} failed"),
    })?;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn upload_disk(
    image: PathBuf,
    disk_name: String,
    resource_group: String,
    region: String,
    show_logs: bool,
) -> anyhow::Result<()> {
    check_tools(DEPLOY_TOOLS)?;
    let disk = DiskUploader::new(azure(show_logs))
        .upload(&image, &disk_name, &resource_group, &region)
        .await
        .with_context(|| format!("upload of {} failed", image.display()))?;

    println!("{}", serde_json::to_string_pretty(&disk)?);
    Ok(())
}

fn list(store: &DeploymentStore) -> anyhow::Result<()> {
    let records = store.list()?;
    if records.is_empty() {
        println!("No deployments recorded");
        return Ok(());
    }

    println!(
        "{:<24} {:<10} {:<16} {:<20} URL",
        "NAME", "STATUS", "PUBLIC IP", "LAST STEP"
    );
    for record in records {
        let ip = record
            .public_ip
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "-".into());
        let step = record
            .last_state
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".into());
        println!(
            "{:<24} {:<10} {:<16} {:<20} {}",
            record.name,
            record.status.as_str(),
            ip,
            step,
            record.url
        );
    }
    Ok(())
}

async fn delete(store: &DeploymentStore, name: &str, yes: bool) -> anyhow::Result<()> {
    let record = store
        .get(name)?
        .ok_or_else(|| DeployError::NotFound(format!("no recorded deployment named {name}")))?;

    if !yes && !confirm(&record)? {
        println!("Aborted");
        return Ok(());
    }

    check_tools(TEARDOWN_TOOLS)?;
    let control = azure(false);
    let report = delete_deployment(store, control.as_ref(), name)
        .await
        .with_context(|| format!("delete of {name} failed"))?;

    if report.vm_deleted {
        println!("Deleted VM {}", report.record.vm.name);
    }
    if report.disk_deleted {
        println!("Deleted disk {}", report.record.disk_name);
    }
    println!("Removed record {name}");
    Ok(())
}

fn confirm(record: &DeploymentRecord) -> anyhow::Result<bool> {
    print!(
        "Delete VM {} and disk {} in resource group {}? [y/N] ",
        record.vm.name, record.disk_name, record.vm.resource_group
    );
    std::io::stdout().flush()?;

    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}
