pub mod check;
pub mod config;
pub mod frame;
pub mod gif;
pub mod mirror;
pub mod record;
pub mod screenshot;
pub mod wireless;

use std::sync::Arc;

use tabsnap_capture_engine::{CaptureConfig, CaptureController};
use tabsnap_common::config::AppConfig;
use tabsnap_device_core::DeviceSession;
use tabsnap_device_host::AdbConnector;

/// Connect to the configured device and put a controller on it.
pub async fn connect(config: &AppConfig) -> anyhow::Result<CaptureController> {
    let connector = AdbConnector::new(&config.adb);
    let session: Arc<DeviceSession> = DeviceSession::connect(&connector)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to device: {e}"))?;
    println!("Connected: {}", session.name());
    Ok(CaptureController::new(session, CaptureConfig::from_app(config)))
}

/// Release the device, reporting but not failing on teardown errors.
pub async fn finish(controller: &mut CaptureController) {
    if let Err(e) = controller.shutdown().await {
        tracing::warn!(error = %e, "Shutdown incomplete");
    }
}
