pub mod codec;
pub mod config;
pub mod control;
pub mod dashboard;
pub mod endpoints;
pub mod error;
pub mod form;
pub mod ota;
pub mod reconciler;
pub mod schedule;
pub mod types;

pub use codec::SlotProtocol;
pub use config::SessionConfig;
pub use dashboard::{Dashboard, Notice};
pub use endpoints::*;
pub use error::{CodecError, ValidationError};
pub use form::{AutoForm, ManualForm, SlotForm};
pub use ota::{
    FirmwareImage, FirmwareMeta, FlashStatus, OtaEvent, OtaPhase, OtaReport, OtaSession,
    OtaStatusPayload, ProgressAction, UploadProgress,
};
pub use reconciler::ModeReconciler;
pub use schedule::{ScheduleSlot, SlotId};
pub use types::{
    AutoConfig, AutoConfigPayload, DeviceMode, DeviceStatus, Flag, ManualConfig,
    ManualConfigPayload, PwmUpdate, ReportedMode, StatusPayload, WifiConnectRequest,
    WifiConnectStatus, WifiStatusPayload,
};
