use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use device_shim::domain::ports::{ExponentialBackoff, StatusReporter};
use device_shim::infrastructure::http::{self, GatewayState};
use device_shim::{
    load_profile, BridgeChannel, BridgeKind, CommandRouter, Config, ConnectionManager,
    HealthReconciler, KubeStatusClient, LoggingStatusReporter, MqttBridge, PrometheusReporter,
    RosbridgeChannel, SimulatedBridge, TelemetryCache,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse configuration
    let config = Config::parse();
    config.validate()?;

    // Initialize logging
    let filter = if config.verbose { "debug" } else { "info" };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    // Initialize metrics
    PrometheusReporter::init_metrics()?;

    let profile = load_profile(&config.instructions_path, config.preset())?;
    let backoff_policy = config.to_backoff_policy()?;
    info!(
        initial = ?backoff_policy.initial_delay(),
        max = ?backoff_policy.max_delay(),
        multiplier = backoff_policy.multiplier(),
        "Reconnect backoff"
    );

    // Control plane, or log-only when the shim runs outside a cluster
    let control_plane = match config.to_control_plane_settings() {
        Some(settings) => {
            info!(
                namespace = %settings.namespace,
                device = %settings.device_name,
                "Reporting phases to EdgeDevice"
            );
            Some(Arc::new(KubeStatusClient::new(&settings)?))
        }
        None => {
            warn!("No EdgeDevice identity configured, phases will only be logged");
            None
        }
    };
    let status_reporter: Arc<dyn StatusReporter> = match &control_plane {
        Some(client) => client.clone(),
        None => Arc::new(LoggingStatusReporter),
    };

    let address = match (config.bridge_address(), &control_plane) {
        (Some(address), _) => address,
        (None, Some(client)) => match client.fetch_device_address().await {
            Ok(Some(address)) => {
                info!(address = %address, "Using EdgeDevice address");
                address
            }
            Ok(None) => config.default_bridge_address(),
            Err(e) => {
                warn!(error = %e, "Could not read EdgeDevice address");
                config.default_bridge_address()
            }
        },
        (None, None) => config.default_bridge_address(),
    };

    info!("Starting device shim");
    info!("  Bridge: {:?} at {}", config.bridge, address);
    info!("  Gateway: {}", config.server_addr());
    info!("  Commands: {}", profile.commands.len());

    // Create infrastructure implementations (dependency injection)
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let bridge: Arc<dyn BridgeChannel> = match config.bridge {
        BridgeKind::Mqtt => Arc::new(MqttBridge::new(config.to_mqtt_settings(&address)?, events_tx)),
        BridgeKind::Rosbridge => Arc::new(RosbridgeChannel::new(address, events_tx)),
        BridgeKind::Sim => Arc::new(SimulatedBridge::new(events_tx)),
    };
    let metrics_reporter = Arc::new(PrometheusReporter::new());

    // Create application services
    let manager = Arc::new(ConnectionManager::new(
        bridge,
        metrics_reporter.clone(),
        config.to_manager_settings(),
    ));

    let telemetry = Arc::new(TelemetryCache::new(metrics_reporter.clone()));
    for binding in &profile.telemetry {
        telemetry.register_channel(&binding.channel);
        manager
            .subscribe(&binding.topic, binding.qos, telemetry.handler_for(binding))
            .await?;
    }

    let router = Arc::new(CommandRouter::new(profile.commands.clone(), manager.clone()));
    router.bind_notifications(&profile.notifications).await?;

    let reconciler = HealthReconciler::new(
        manager.clone(),
        status_reporter,
        metrics_reporter,
        config.reconcile_interval(),
        config.report_timeout(),
    );
    let reported_phase = reconciler.watch_reported();

    // Set up graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let manager_handle = tokio::spawn(manager.clone().run(
        events_rx,
        Box::new(ExponentialBackoff::new(backoff_policy)),
        shutdown_rx.clone(),
    ));
    let reconciler_handle = tokio::spawn(reconciler.run(shutdown_rx.clone()));

    let state = GatewayState {
        router,
        telemetry,
        connection: manager,
        reported_phase,
        shutdown: shutdown_rx,
    };
    let (_, server) = http::serve(state, config.server_addr())?;
    let server_handle = tokio::spawn(server);

    // Handle Ctrl+C
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for ctrl+c: {}", e);
    }
    info!("Received shutdown signal");
    let _ = shutdown_tx.send(true);

    server_handle.await?;
    reconciler_handle.await?;
    manager_handle.await?;

    info!("Device shim shutdown complete");
    Ok(())
}
