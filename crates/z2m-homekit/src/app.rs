//! Process lifecycle: load settings, wire the bridge to MQTT and HTTP,
//! run until Ctrl-C, then stop everything in order.

use std::path::{Path, PathBuf};

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use z2m_homekit_config::{AppConfig, config_path};
use z2m_homekit_core::{Bridge, Registry, Role};

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::metrics::MetricsCollector;
use crate::mqtt::{self, MqttLink};
use crate::web::{self, AppState};

/// Validated configuration plus the registry path it resolves to.
pub struct Settings {
    pub config: AppConfig,
    pub config_path: PathBuf,
    pub devices_path: PathBuf,
}

pub fn load_settings(global: &GlobalOpts) -> Result<Settings, CliError> {
    let path = global.config.clone().unwrap_or_else(config_path);
    let config =
        AppConfig::load(Some(&path)).map_err(|e| CliError::from_config(e, &path))?;
    let devices_path = global
        .devices
        .clone()
        .unwrap_or_else(|| config.devices_config.clone());
    Ok(Settings {
        config,
        config_path: path,
        devices_path,
    })
}

pub fn load_registry(path: &Path) -> Result<Registry, CliError> {
    Registry::load_file(path).map_err(|source| CliError::Registry {
        path: path.to_path_buf(),
        source,
    })
}

/// Run the bridge until interrupted.
pub async fn run(settings: Settings) -> Result<(), CliError> {
    let Settings {
        config,
        config_path,
        devices_path,
    } = settings;
    let registry = load_registry(&devices_path)?;
    info!(
        path = %devices_path.display(),
        devices = registry.len(),
        "device registry loaded"
    );

    let (transport, eventloop) = mqtt::client(&config);
    let bridge = Bridge::new(&config.bridge_config(), registry, transport.clone())?;

    // Subscribers must exist before the bridge broadcasts initial states.
    let metrics = MetricsCollector::new(bridge.fabric())?;
    let link = MqttLink::new(
        transport,
        eventloop,
        bridge.ingestion().clone(),
        bridge.fabric().handle(Role::Bus),
    );

    let web_addr = config
        .web_addr()
        .map_err(|e| CliError::from_config(e, &config_path))?;
    let listener = TcpListener::bind(web_addr)
        .await
        .map_err(|source| CliError::Bind {
            addr: web_addr,
            source,
        })?;

    metrics.start().await;
    bridge.start().await;
    link.start().await;

    let cancel = CancellationToken::new();
    let router = web::router(AppState {
        bridge: bridge.clone(),
        metrics: metrics.clone(),
    });
    let server = tokio::spawn(web::serve(listener, router, cancel.clone()));

    info!(
        bridge = %config.bridge_name,
        mqtt = %format!("{}:{}", config.mqtt_host, config.mqtt_port),
        web = %web_addr,
        accessories = bridge.adapter().len(),
        "z2m-homekit running"
    );

    let signal = tokio::signal::ctrl_c().await;
    info!("shutting down");

    cancel.cancel();
    link.shutdown().await;
    metrics.shutdown().await;
    // Closing the hub ends open event streams, which lets the server drain.
    bridge.shutdown().await;

    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "web server failed"),
        Err(e) => error!(error = %e, "web server task panicked"),
    }
    signal?;
    info!("shutdown complete");
    Ok(())
}
