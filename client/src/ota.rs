use std::{future, sync::Arc, time::Duration};

use tokio::{
    sync::mpsc,
    time::{self, Instant, Interval},
};
use tracing::{debug, info, warn};

use fanctl_common::{
    FirmwareImage, FirmwareMeta, OtaEvent, OtaPhase, OtaSession, ProgressAction, UploadProgress,
};

use crate::{error::SessionError, transport::DeviceApi};

/// Drives one firmware update against the device: upload, status polling
/// and the reboot countdown.
pub struct OtaController {
    device: Arc<dyn DeviceApi>,
    session: OtaSession,
    tick: Duration,
}

impl OtaController {
    pub fn new(device: Arc<dyn DeviceApi>, countdown_start: u32, tick: Duration) -> Self {
        Self {
            device,
            session: OtaSession::new(countdown_start),
            tick,
        }
    }

    pub fn phase(&self) -> OtaPhase {
        self.session.phase()
    }

    pub fn firmware_meta(&self) -> Option<&FirmwareMeta> {
        self.session.firmware_meta()
    }

    /// Back to `Idle` after a finished or failed update. Refused while the
    /// device is rebooting.
    pub fn reset(&mut self) -> bool {
        self.session.reset()
    }

    /// Runs an update to completion and returns the final phase:
    /// `Succeeded` once the countdown has emitted its reload, `Failed` when
    /// the device rejected the image, or `Polling` when the upload ended
    /// without a verdict. A failed upload request with no verdict fails the
    /// update and returns the request's error. Every event is forwarded on
    /// `events`.
    pub async fn run(
        &mut self,
        files: &[FirmwareImage],
        events: mpsc::UnboundedSender<OtaEvent>,
    ) -> Result<OtaPhase, SessionError> {
        let (image, started) = self.session.submit(files)?;
        info!(
            name = %image.name,
            bytes = image.len(),
            sha256 = %image.sha256_hex(),
            "firmware upload started"
        );
        emit(&events, started);

        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let device = Arc::clone(&self.device);
        let mut upload = device.upload_firmware(image, progress_tx);
        let mut upload_done = false;
        let mut upload_error = None;
        let mut progress_open = true;
        let mut countdown: Option<Interval> = None;

        loop {
            tokio::select! {
                result = &mut upload, if !upload_done => {
                    upload_done = true;
                    match result {
                        Ok(()) => info!("firmware upload finished"),
                        Err(err) => {
                            warn!("firmware upload request failed: {err}");
                            upload_error = Some(err);
                        }
                    }
                    // One last look at the device once the body is out.
                    let total = image.len() as u64;
                    self.handle_progress(UploadProgress { sent: total, total: Some(total) }, &events)
                        .await;
                }
                progress = progress_rx.recv(), if progress_open => match progress {
                    Some(mut latest) => {
                        while let Ok(newer) = progress_rx.try_recv() {
                            latest = newer;
                        }
                        self.handle_progress(latest, &events).await;
                    }
                    None => progress_open = false,
                },
                _ = next_tick(&mut countdown), if countdown.is_some() => {
                    let tick_events = self.session.tick();
                    let reload = tick_events.contains(&OtaEvent::Reload);
                    emit(&events, tick_events);
                    if reload {
                        info!("firmware update complete");
                        return Ok(self.session.phase());
                    }
                }
            }

            if countdown.is_none() && self.session.phase() == OtaPhase::Rebooting {
                info!("device flashed, rebooting");
                countdown = Some(time::interval_at(Instant::now() + self.tick, self.tick));
            }

            if upload_done && !progress_open && countdown.is_none() {
                if let Some(err) = upload_error.take() {
                    if self.session.accepts_reports() {
                        emit(&events, self.session.on_upload_error());
                        return Err(err);
                    }
                }

                let phase = self.session.phase();
                if phase == OtaPhase::Failed {
                    warn!("device rejected the firmware image");
                }
                return Ok(phase);
            }
        }
    }

    async fn handle_progress(
        &mut self,
        progress: UploadProgress,
        events: &mpsc::UnboundedSender<OtaEvent>,
    ) {
        match self.session.on_progress(progress) {
            ProgressAction::QueryStatus => match self.device.ota_status().await {
                Ok(report) => emit(events, self.session.on_report(report)),
                Err(err) => debug!("ota status query missed: {err}"),
            },
            ProgressAction::UnknownSize => {
                warn!(sent = progress.sent, "upload progress without a known size");
            }
            ProgressAction::Ignore => {}
        }
    }
}

async fn next_tick(countdown: &mut Option<Interval>) {
    match countdown {
        Some(interval) => {
            interval.tick().await;
        }
        None => future::pending().await,
    }
}

fn emit(events: &mpsc::UnboundedSender<OtaEvent>, batch: Vec<OtaEvent>) {
    for event in batch {
        // Nobody listening is fine; the phase still advances.
        let _ = events.send(event);
    }
}
