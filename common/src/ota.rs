use std::fmt::{self, Write as _};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ValidationError;

pub const DEFAULT_REBOOT_COUNTDOWN: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtaPhase {
    Idle,
    Uploading,
    Polling,
    Rebooting,
    Succeeded,
    Failed,
}

impl OtaPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Uploading => "UPLOADING",
            Self::Polling => "POLLING",
            Self::Rebooting => "REBOOTING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
        }
    }
}

/// Body of `POST /OTAstatus`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtaStatusPayload {
    pub ota_update_status: i32,
    #[serde(default)]
    pub compile_date: String,
    #[serde(default)]
    pub compile_time: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareMeta {
    pub compile_date: String,
    pub compile_time: String,
}

impl fmt::Display for FirmwareMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.compile_date, self.compile_time)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashStatus {
    Failed,
    Pending,
    Complete,
}

impl FlashStatus {
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => Self::Complete,
            -1 => Self::Failed,
            _ => Self::Pending,
        }
    }

    pub fn code(self) -> i32 {
        match self {
            Self::Failed => -1,
            Self::Pending => 0,
            Self::Complete => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtaReport {
    pub status: FlashStatus,
    pub meta: FirmwareMeta,
}

impl From<OtaStatusPayload> for OtaReport {
    fn from(payload: OtaStatusPayload) -> Self {
        Self {
            status: FlashStatus::from_code(payload.ota_update_status),
            meta: FirmwareMeta {
                compile_date: payload.compile_date,
                compile_time: payload.compile_time,
            },
        }
    }
}

/// One upload-progress notification. `total` is `None` when the body size is
/// not known up front.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadProgress {
    pub sent: u64,
    pub total: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl FirmwareImage {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn sha256_hex(&self) -> String {
        let digest = Sha256::digest(&self.bytes);
        let mut hex = String::with_capacity(64);
        for byte in digest {
            let _ = write!(&mut hex, "{byte:02x}");
        }
        hex
    }
}

/// What the session wants shown (or done) after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OtaEvent {
    Uploading,
    FirmwareInfo(FirmwareMeta),
    UploadFailed,
    Rebooting(u32),
    Reload,
}

impl fmt::Display for OtaEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uploading => f.write_str("Uploading... Firmware Update in Progress..."),
            Self::FirmwareInfo(meta) => write!(f, "{meta}"),
            Self::UploadFailed => f.write_str("!!! Upload Error !!!"),
            Self::Rebooting(seconds) => write!(f, "OTA complete. Rebooting in: {seconds}"),
            Self::Reload => f.write_str("reloading"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressAction {
    QueryStatus,
    UnknownSize,
    Ignore,
}

/// Firmware update lifecycle, free of I/O.
///
/// `Idle -> Uploading -> Polling -> {Failed | Rebooting -> Succeeded}`. No
/// phase can be skipped: reports are only honoured while polling, and the
/// countdown only runs while rebooting.
#[derive(Debug, Clone)]
pub struct OtaSession {
    countdown_start: u32,
    phase: OtaPhase,
    countdown: Option<u32>,
    firmware_meta: Option<FirmwareMeta>,
}

impl Default for OtaSession {
    fn default() -> Self {
        Self::new(DEFAULT_REBOOT_COUNTDOWN)
    }
}

impl OtaSession {
    pub fn new(countdown_start: u32) -> Self {
        Self {
            countdown_start: countdown_start.max(1),
            phase: OtaPhase::Idle,
            countdown: None,
            firmware_meta: None,
        }
    }

    pub fn phase(&self) -> OtaPhase {
        self.phase
    }

    pub fn countdown(&self) -> Option<u32> {
        self.countdown
    }

    pub fn firmware_meta(&self) -> Option<&FirmwareMeta> {
        self.firmware_meta.as_ref()
    }

    pub fn accepts_reports(&self) -> bool {
        matches!(self.phase, OtaPhase::Uploading | OtaPhase::Polling)
    }

    /// Starts an update. Exactly one image must be selected.
    pub fn submit<'a>(
        &mut self,
        files: &'a [FirmwareImage],
    ) -> Result<(&'a FirmwareImage, Vec<OtaEvent>), ValidationError> {
        if self.phase != OtaPhase::Idle {
            return Err(ValidationError::UpdateInProgress);
        }

        let [image] = files else {
            return Err(ValidationError::NoFileSelected);
        };

        self.phase = OtaPhase::Uploading;
        self.countdown = None;
        self.firmware_meta = None;
        Ok((image, vec![OtaEvent::Uploading]))
    }

    pub fn on_progress(&mut self, progress: UploadProgress) -> ProgressAction {
        if !self.accepts_reports() {
            return ProgressAction::Ignore;
        }

        if progress.total.is_none() {
            return ProgressAction::UnknownSize;
        }

        self.phase = OtaPhase::Polling;
        ProgressAction::QueryStatus
    }

    pub fn on_report(&mut self, report: OtaReport) -> Vec<OtaEvent> {
        if self.phase != OtaPhase::Polling {
            return Vec::new();
        }

        let mut events = vec![OtaEvent::FirmwareInfo(report.meta.clone())];
        self.firmware_meta = Some(report.meta);

        match report.status {
            FlashStatus::Failed => {
                self.phase = OtaPhase::Failed;
                events.push(OtaEvent::UploadFailed);
            }
            FlashStatus::Complete => {
                self.phase = OtaPhase::Rebooting;
                self.countdown = Some(self.countdown_start);
            }
            FlashStatus::Pending => {}
        }

        events
    }

    /// One countdown tick: shows the current count, then decrements. The
    /// step from 1 to 0 completes the update and emits the single reload.
    pub fn tick(&mut self) -> Vec<OtaEvent> {
        let (OtaPhase::Rebooting, Some(remaining)) = (self.phase, self.countdown) else {
            return Vec::new();
        };

        let mut events = vec![OtaEvent::Rebooting(remaining)];
        let next = remaining.saturating_sub(1);
        self.countdown = Some(next);

        if next == 0 {
            self.phase = OtaPhase::Succeeded;
            events.push(OtaEvent::Reload);
        }

        events
    }

    /// The upload request failed and the device never gave a verdict.
    /// Fails the update so it can be reset and retried; a verdict already
    /// received wins.
    pub fn on_upload_error(&mut self) -> Vec<OtaEvent> {
        if !self.accepts_reports() {
            return Vec::new();
        }

        self.phase = OtaPhase::Failed;
        vec![OtaEvent::UploadFailed]
    }

    /// Returns to `Idle` so the user can retry. Refused while rebooting.
    pub fn reset(&mut self) -> bool {
        if self.phase == OtaPhase::Rebooting {
            return false;
        }

        self.phase = OtaPhase::Idle;
        self.countdown = None;
        true
    }
}
