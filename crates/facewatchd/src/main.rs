use anyhow::{Context, Result};
use facewatch_core::OnnxAnalyzer;
use facewatch_store::Store;
use tracing_subscriber::EnvFilter;

mod alerts;
mod capability;
mod config;
mod dbus_interface;
mod engine;
mod recent;
mod registry;
mod settings;

use alerts::{spawn_alert_task, AlertConfig};
use capability::{TraceOverlay, V4lOpener};
use config::{BusKind, Config};
use engine::{spawn_engine, EngineDeps};

const BUS_NAME: &str = "org.facewatch.Facewatch1";
const OBJECT_PATH: &str = "/org/facewatch/Facewatch1";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("facewatchd starting");
    let config = Config::from_env();

    let store = Store::open(&config.db_path)
        .await
        .with_context(|| format!("failed to open database {}", config.db_path.display()))?;

    let models = config.analyzer_models();
    let analyzer = OnnxAnalyzer::load(&models).context("failed to load models")?;
    tracing::info!(dir = %config.model_dir.display(), "models loaded");

    let alerts = match &config.alert_command {
        Some(command) if config.alert_phone.is_some() || config.alert_email.is_some() => {
            let (sender, _task) = spawn_alert_task(AlertConfig {
                command: command.clone(),
                phone: config.alert_phone.clone(),
                email: config.alert_email.clone(),
                camera_label: config.camera_label.clone(),
            });
            tracing::info!("alert delivery enabled");
            Some(sender)
        }
        _ => {
            tracing::info!("alert delivery disabled");
            None
        }
    };

    let engine = spawn_engine(EngineDeps {
        store,
        opener: Box::new(V4lOpener {
            device: config.camera_device.clone(),
            warmup_frames: config.warmup_frames,
        }),
        analyzer: Box::new(analyzer),
        overlay: Box::new(TraceOverlay),
        alerts,
        unknown_policy: config.unknown_policy,
    })
    .await?;

    let builder = match config.bus {
        BusKind::Session => zbus::connection::Builder::session()?,
        BusKind::System => zbus::connection::Builder::system()?,
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, dbus_interface::FacewatchService::new(engine.clone()))?
        .build()
        .await
        .context("failed to register on D-Bus")?;

    tracing::info!(bus = ?config.bus, name = BUS_NAME, "facewatchd ready");

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("facewatchd shutting down");
    if let Err(e) = engine.stop().await {
        tracing::warn!(error = %e, "engine stop failed");
    }

    Ok(())
}
