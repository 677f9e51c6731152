mod alert;
mod config;
mod device;
mod orchestrator;
mod readiness;
mod relay;
mod shutdown;
mod transport;

#[cfg(test)]
mod testing;

use alert::{AlertSink, WebhookAlerter};
use anyhow::{Context, Result};
use clap::Parser;
use config::RigConfig;
use device::AdbDriver;
use orchestrator::{Orchestrator, SystemPing, Termination};
use readiness::ReadinessMonitor;
use relay::{RelayCommandClient, RelayConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use transport::{MqttTransport, PubSubTransport};

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Power-cycle endurance test rig
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Path to the rig configuration
    #[arg(short, long, default_value = "rig.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();

    match run(args).await {
        Ok(Termination::Interrupted) => ExitCode::SUCCESS,
        Ok(Termination::AbortedFatal { reason }) => {
            error!("[MAIN] Test aborted: {}", reason);
            ExitCode::FAILURE
        }
        Ok(Termination::AbortedTimeout { elapsed }) => {
            error!("[MAIN] Test timed out after {:?}", elapsed);
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("[MAIN] {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<Termination> {
    let config = RigConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    info!("Power-cycle rig starting");
    info!("  Broker: {}:{}", config.mqtt.broker, config.mqtt.port);
    info!("  Hosts: {:?}", config.rig.hosts);

    let alerts: Arc<dyn AlertSink> = Arc::new(WebhookAlerter::new(config.alert.clone()));

    // Ctrl-C flips the shutdown flag; the orchestrator checks it between phases
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("[MAIN] Interrupt received, stopping after the current phase");
            let _ = shutdown_tx.send(true);
        }
    });

    let transport = Arc::new(MqttTransport::new(&config.mqtt));
    if !connect_until_up(transport.as_ref(), &config, shutdown_rx.clone()).await {
        transport.close().await;
        return Ok(Termination::Interrupted);
    }

    let relay = RelayCommandClient::new(transport.clone(), RelayConfig::from_mqtt(&config.mqtt));
    let monitor = config.rig.readiness_enabled.then(|| {
        ReadinessMonitor::new(
            AdbDriver::new(config.adb.clone()),
            config.rig.hosts.clone(),
            config.readiness.clone(),
        )
    });

    let mut orchestrator = Orchestrator::new(
        config.rig.clone(),
        relay,
        monitor,
        SystemPing::default(),
        alerts,
        shutdown_rx,
    );
    let termination = orchestrator.run().await;

    info!(
        "[MAIN] Finished after {} successful cycles: {:?}",
        orchestrator.successes(),
        termination
    );
    transport.close().await;

    Ok(termination)
}

/// Retry the initial broker connection until it succeeds or shutdown is requested
async fn connect_until_up(
    transport: &dyn PubSubTransport,
    config: &RigConfig,
    mut shutdown: watch::Receiver<bool>,
) -> bool {
    let retry = Duration::from_secs(config.mqtt.connect_retry_secs.max(1));
    loop {
        match transport.connect().await {
            Ok(()) => {
                info!("[MAIN] Connected via {}", transport.name());
                return true;
            }
            Err(e) => warn!("[MAIN] Broker connect failed: {}, retrying in {:?}", e, retry),
        }

        tokio::select! {
            _ = tokio::time::sleep(retry) => {}
            _ = shutdown.changed() => return false,
        }
        if *shutdown.borrow() {
            return false;
        }
    }
}

