use crate::types::{DeviceMode, DeviceStatus, ReportedMode};

/// Tracks the device's authoritative mode and which configuration panel is
/// on screen.
///
/// The mode only ever comes from status reports. Selecting a panel changes
/// what is shown but never the mode, and saving a panel does not flip the
/// mode either: the next status report confirms it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModeReconciler {
    mode: Option<DeviceMode>,
    visible: Option<DeviceMode>,
}

impl ModeReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Device-confirmed mode; `None` until a recognized mode is reported.
    pub fn mode(&self) -> Option<DeviceMode> {
        self.mode
    }

    pub fn visible_panel(&self) -> Option<DeviceMode> {
        self.visible
    }

    pub fn is_visible(&self, panel: DeviceMode) -> bool {
        self.visible == Some(panel)
    }

    pub fn visible_count(&self) -> usize {
        DeviceMode::ALL
            .iter()
            .filter(|panel| self.is_visible(**panel))
            .count()
    }

    /// Returns `true` when the authoritative mode changed.
    pub fn apply_status(&mut self, status: &DeviceStatus) -> bool {
        let previous = self.mode;

        match status.mode {
            Some(ReportedMode::Known(mode)) => {
                self.mode = Some(mode);
                self.visible = Some(mode);
            }
            Some(ReportedMode::Unrecognized(_)) => {
                self.mode = None;
                self.visible = None;
            }
            None => {}
        }

        previous != self.mode
    }

    pub fn select_panel(&mut self, panel: DeviceMode) {
        self.visible = Some(panel);
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
