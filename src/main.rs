//! k0sbox - throwaway single-node k0s clusters for CI jobs

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Args, Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use k0sbox::install::Installer;
use k0sbox::launch::Launcher;
use k0sbox::outputs::JobOutputs;
use k0sbox::platform::Arch;
use k0sbox::readiness::{self, K0sObserver, ReadinessConfig};
use k0sbox::release::{self, InstallRequest};
use k0sbox::state::{Phase, PhaseStore};
use k0sbox::teardown::{self, K0sHost};
use k0sbox::{dnscheck, DEFAULT_STATE_FILE};

/// Provision and tear down throwaway single-node k0s clusters for CI jobs
#[derive(Parser, Debug)]
#[command(name = "k0sbox", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Install k0s, launch a single-node cluster, and wait until it is usable
    ///
    /// This is the job's main phase. With --cleanup (the default) it records
    /// that setup ran, so the paired `post` invocation knows a reversal is
    /// owed - the hosting system fires `post` unconditionally, even when the
    /// job fails.
    Up(UpArgs),

    /// Reverse every host mutation the paired `up` invocation performed
    ///
    /// Runs as the job's post phase. A no-op when `up` never ran or ran with
    /// --cleanup false. Individual cleanup failures are warnings; this
    /// command only fails when its own dispatch breaks.
    Post(PostArgs),
}

/// Main phase arguments
#[derive(Args, Debug)]
struct UpArgs {
    /// k0s version to install: "latest" or an explicit release tag
    #[arg(long, env = "K0SBOX_VERSION", default_value = release::LATEST)]
    version: String,

    /// Wait for the cluster to become ready before exiting
    #[arg(
        long,
        env = "K0SBOX_WAIT_FOR_READY",
        default_value_t = true,
        action = ArgAction::Set
    )]
    wait_for_ready: bool,

    /// Seconds the readiness engine may spend polling
    #[arg(long, env = "K0SBOX_TIMEOUT", default_value_t = 300)]
    timeout: u64,

    /// Seconds between readiness poll cycles
    #[arg(long, env = "K0SBOX_POLL_INTERVAL", default_value_t = 5)]
    poll_interval: u64,

    /// Also verify in-cluster DNS resolution after the cluster is ready
    #[arg(
        long,
        env = "K0SBOX_DNS_READINESS",
        default_value_t = false,
        action = ArgAction::Set
    )]
    dns_readiness: bool,

    /// Record setup so the paired `post` invocation reverses it
    #[arg(
        long,
        env = "K0SBOX_CLEANUP",
        default_value_t = true,
        action = ArgAction::Set
    )]
    cleanup: bool,

    /// Path of the persisted phase record
    #[arg(long, env = "K0SBOX_STATE_FILE", default_value = DEFAULT_STATE_FILE)]
    state_file: PathBuf,

    /// File to append structured outputs to (key=value per line)
    #[arg(long, env = "K0SBOX_OUTPUT_FILE")]
    output_file: Option<PathBuf>,

    /// File to append exported environment variables to
    #[arg(long, env = "K0SBOX_ENV_FILE")]
    env_file: Option<PathBuf>,
}

/// Post phase arguments
#[derive(Args, Debug)]
struct PostArgs {
    /// Path of the persisted phase record
    #[arg(long, env = "K0SBOX_STATE_FILE", default_value = DEFAULT_STATE_FILE)]
    state_file: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Up(args) => run_up(args).await,
        Commands::Post(args) => run_post(args).await,
    }
}

/// Main phase: probe, resolve, install, launch, wait.
async fn run_up(args: UpArgs) -> anyhow::Result<()> {
    let arch = Arch::detect().await?;
    tracing::info!(%arch, version = %args.version, "Provisioning single-node k0s cluster");

    let request = InstallRequest {
        requested_version: args.version.clone(),
        arch,
    };
    let release = release::resolve(&request).await?;

    // Recorded before the first host mutation: the post hook fires even when
    // this phase fails partway, and teardown is safe after a partial launch.
    if args.cleanup {
        PhaseStore::new(&args.state_file)
            .record(Phase::SetupDone)
            .await?;
    }

    Installer::new(release).run().await?;

    let outputs = JobOutputs::new(args.output_file.clone(), args.env_file.clone());
    let handle = Launcher::new().run(&outputs).await?;

    if !args.wait_for_ready {
        if args.dns_readiness {
            tracing::warn!("--dns-readiness has no effect without --wait-for-ready");
        }
        tracing::info!("Readiness wait disabled, cluster left starting up");
        return Ok(());
    }

    let config = ReadinessConfig {
        timeout: Duration::from_secs(args.timeout),
        poll_interval: Duration::from_secs(args.poll_interval.max(1)),
        dns_check: args.dns_readiness,
    };
    let observer = K0sObserver::connect(&handle.kubeconfig).await?;
    readiness::wait_for_ready(&observer, &config).await?;

    if config.dns_check {
        dnscheck::verify_dns(&observer.client()).await?;
    }

    tracing::info!(kubeconfig = %handle.kubeconfig.display(), "Cluster is up and usable");
    Ok(())
}

/// Post phase: reverse setup if the phase record says one is owed.
async fn run_post(args: PostArgs) -> anyhow::Result<()> {
    let store = PhaseStore::new(&args.state_file);

    match store.load().await {
        Phase::SetupDone => {
            tracing::info!("Setup phase recorded, reversing host mutations");
            let report = teardown::run(&K0sHost::new()).await;
            for warning in &report.warnings {
                tracing::warn!(warning = %warning, "Cleanup step did not complete");
            }
            // A failure to advance the record must not fail the post phase.
            if let Err(e) = store.record(Phase::Reversed).await {
                tracing::warn!(error = %e, "Could not record reversal completion");
            }
            Ok(())
        }
        Phase::NotStarted => {
            tracing::info!("No setup recorded, nothing to reverse");
            Ok(())
        }
        Phase::Reversed => {
            tracing::info!("Reversal already completed, nothing to do");
            Ok(())
        }
    }
}
