use std::{io::ErrorKind, path::Path};

use anyhow::Context;
use tracing::{info, warn};

use fanctl_common::{FirmwareImage, SessionConfig, SlotProtocol};

use crate::session::Session;

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut config = load_config().await.unwrap_or_else(|err| {
        warn!("failed to load session config: {err:#}");
        SessionConfig::default()
    });
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());

    let mut session = Session::connect(config).context("failed to create device session")?;
    info!(
        device = %session.config().device_url,
        slots = session.config().slot_protocol.as_str(),
        "session started"
    );
    session.start().await;

    if let Ok(path) = std::env::var("FANCTL_FIRMWARE") {
        let image = read_firmware(Path::new(&path)).await?;
        match session.update_firmware(&[image]).await {
            Ok(phase) => info!(phase = phase.as_str(), "firmware update finished"),
            Err(err) => warn!("firmware update failed: {err}"),
        }
    }

    let mut status = session.subscribe_status();
    loop {
        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let latest = *status.borrow_and_update();
                if let Some(status) = latest {
                    info!(
                        temperature = status.temperature,
                        presence = status.presence,
                        mode = ?status.mode,
                        output = status.output_level,
                        "device status"
                    );
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
        }
    }

    session.stop();
    Ok(())
}

/// Reads the JSON file named by `FANCTL_CONFIG`. No variable or no file
/// means defaults.
async fn load_config() -> anyhow::Result<SessionConfig> {
    let Ok(path) = std::env::var("FANCTL_CONFIG") else {
        return Ok(SessionConfig::default());
    };

    match tokio::fs::read(&path).await {
        Ok(raw) => serde_json::from_slice::<SessionConfig>(&raw)
            .with_context(|| format!("invalid session config in {path}")),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(SessionConfig::default()),
        Err(err) => Err(err).with_context(|| format!("failed to read {path}")),
    }
}

fn apply_env_overrides(config: &mut SessionConfig, var: impl Fn(&str) -> Option<String>) {
    if let Some(url) = var("DEVICE_URL") {
        config.device_url = url;
    }

    if let Some(raw) = var("POLL_INTERVAL_MS") {
        match raw.parse::<u64>() {
            Ok(ms) => config.poll_interval_ms = ms,
            Err(err) => warn!("ignoring POLL_INTERVAL_MS={raw}: {err}"),
        }
    }

    if let Some(raw) = var("SLOT_PROTOCOL") {
        match raw.parse::<SlotProtocol>() {
            Ok(protocol) => config.slot_protocol = protocol,
            Err(err) => warn!("ignoring SLOT_PROTOCOL: {err}"),
        }
    }

    config.sanitize();
}

async fn read_firmware(path: &Path) -> anyhow::Result<FirmwareImage> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read firmware image {}", path.display()))?;
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "firmware.bin".to_string());
    Ok(FirmwareImage::new(name, bytes))
}
