use std::fmt;

use crate::{
    ota::OtaEvent,
    reconciler::ModeReconciler,
    types::{DeviceMode, DeviceStatus, ReportedMode},
};

/// Per-panel status line shown next to a save/load/erase action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Saving,
    PwmApplied(u8),
    PwmFailed,
    ConfigSaved,
    SaveFailed,
    Reading,
    SlotLoaded,
    SlotMissing,
    SlotSaved,
    Erasing,
    SlotErased,
    EraseFailed,
    ApplyingMode(DeviceMode),
    SelectModeFirst,
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Saving => f.write_str("Guardando..."),
            Self::PwmApplied(pwm) => write!(f, "PWM aplicado: {pwm}%"),
            Self::PwmFailed => f.write_str("Error enviando PWM"),
            Self::ConfigSaved => f.write_str("Configuración guardada."),
            Self::SaveFailed => f.write_str("Error al guardar."),
            Self::Reading => f.write_str("Leyendo..."),
            Self::SlotLoaded => f.write_str("Registro cargado."),
            Self::SlotMissing => f.write_str("No existe el registro."),
            Self::SlotSaved => f.write_str("Registro guardado."),
            Self::Erasing => f.write_str("Borrando..."),
            Self::SlotErased => f.write_str("Registro borrado."),
            Self::EraseFailed => f.write_str("Error al borrar."),
            Self::ApplyingMode(mode) => write!(f, "Aplicando modo {}...", mode.label()),
            Self::SelectModeFirst => f.write_str("Selecciona un modo primero."),
        }
    }
}

/// Text projection of the session: what a status page would show.
#[derive(Debug, Clone, Default)]
pub struct Dashboard {
    reconciler: ModeReconciler,
    temperature: Option<String>,
    presence: Option<String>,
    mode_label: Option<String>,
    output: Option<String>,
    notices: [Option<Notice>; 3],
    mode_notice: Option<Notice>,
    ota_message: Option<String>,
    firmware: Option<String>,
}

impl Dashboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reconciler(&self) -> &ModeReconciler {
        &self.reconciler
    }

    /// Applies one poll result. Fields the device omitted keep their previous
    /// text. Returns `true` when the authoritative mode changed.
    pub fn apply_status(&mut self, status: &DeviceStatus) -> bool {
        if let Some(temp) = status.temperature {
            self.temperature = Some(format!("{temp:.1} °C"));
        }

        if let Some(presence) = status.presence {
            let text = if presence { "Presencia" } else { "Sin presencia" };
            self.presence = Some(text.to_string());
        }

        if let Some(mode) = status.mode {
            let label = match mode {
                ReportedMode::Known(mode) => mode.label(),
                ReportedMode::Unrecognized(_) => "Desconocido",
            };
            self.mode_label = Some(label.to_string());
        }

        if let Some(level) = status.output_level {
            self.output = Some(format!("{level} %"));
        }

        self.reconciler.apply_status(status)
    }

    pub fn select_panel(&mut self, panel: DeviceMode) {
        self.reconciler.select_panel(panel);
    }

    pub fn set_notice(&mut self, panel: DeviceMode, notice: Notice) {
        self.notices[panel.index()] = Some(notice);
    }

    pub fn notice(&self, panel: DeviceMode) -> Option<&Notice> {
        self.notices[panel.index()].as_ref()
    }

    pub fn set_mode_notice(&mut self, notice: Notice) {
        self.mode_notice = Some(notice);
    }

    pub fn mode_notice(&self) -> Option<&Notice> {
        self.mode_notice.as_ref()
    }

    pub fn apply_ota_event(&mut self, event: &OtaEvent) {
        match event {
            OtaEvent::FirmwareInfo(meta) => self.firmware = Some(meta.to_string()),
            OtaEvent::Reload => {}
            other => self.ota_message = Some(other.to_string()),
        }
    }

    /// Message for an update that never started, such as a missing file.
    pub fn set_ota_message(&mut self, message: impl Into<String>) {
        self.ota_message = Some(message.into());
    }

    pub fn temperature(&self) -> Option<&str> {
        self.temperature.as_deref()
    }

    pub fn presence(&self) -> Option<&str> {
        self.presence.as_deref()
    }

    pub fn mode_label(&self) -> Option<&str> {
        self.mode_label.as_deref()
    }

    pub fn output(&self) -> Option<&str> {
        self.output.as_deref()
    }

    pub fn ota_message(&self) -> Option<&str> {
        self.ota_message.as_deref()
    }

    pub fn firmware(&self) -> Option<&str> {
        self.firmware.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ota::FirmwareMeta, types::StatusPayload};
    use pretty_assertions::assert_eq;

    fn poll(body: &str) -> DeviceStatus {
        serde_json::from_str::<StatusPayload>(body).unwrap().into()
    }

    #[test]
    fn auto_report_projects_labels_and_panel() {
        let mut dashboard = Dashboard::new();
        dashboard.apply_status(&poll(r#"{"mode":1,"temp":21.3,"pwm":40}"#));

        assert_eq!(dashboard.mode_label(), Some("Automático"));
        assert_eq!(dashboard.temperature(), Some("21.3 °C"));
        assert_eq!(dashboard.output(), Some("40 %"));
        assert!(dashboard.reconciler().is_visible(DeviceMode::Auto));
        assert!(!dashboard.reconciler().is_visible(DeviceMode::Manual));
        assert!(!dashboard.reconciler().is_visible(DeviceMode::Scheduled));
    }

    #[test]
    fn omitted_fields_keep_previous_text() {
        let mut dashboard = Dashboard::new();
        dashboard.apply_status(&poll(r#"{"mode":0,"temp":19.04,"pir":1,"pwm":10}"#));
        dashboard.apply_status(&poll(r#"{"pwm":55}"#));

        assert_eq!(dashboard.temperature(), Some("19.0 °C"));
        assert_eq!(dashboard.presence(), Some("Presencia"));
        assert_eq!(dashboard.mode_label(), Some("Manual"));
        assert_eq!(dashboard.output(), Some("55 %"));
    }

    #[test]
    fn unknown_mode_is_labelled_and_hides_panels() {
        let mut dashboard = Dashboard::new();
        dashboard.apply_status(&poll(r#"{"mode":5,"pir":0}"#));

        assert_eq!(dashboard.mode_label(), Some("Desconocido"));
        assert_eq!(dashboard.presence(), Some("Sin presencia"));
        assert_eq!(dashboard.reconciler().visible_count(), 0);
    }

    #[test]
    fn notices_are_scoped_to_their_panel() {
        let mut dashboard = Dashboard::new();
        dashboard.set_notice(DeviceMode::Manual, Notice::PwmApplied(40));
        dashboard.set_notice(DeviceMode::Scheduled, Notice::SlotMissing);

        assert_eq!(
            dashboard.notice(DeviceMode::Manual).map(ToString::to_string),
            Some("PWM aplicado: 40%".to_string())
        );
        assert_eq!(dashboard.notice(DeviceMode::Auto), None);
        assert_eq!(
            dashboard.notice(DeviceMode::Scheduled).map(ToString::to_string),
            Some("No existe el registro.".to_string())
        );
    }

    #[test]
    fn ota_events_update_messages() {
        let mut dashboard = Dashboard::new();
        dashboard.apply_ota_event(&OtaEvent::FirmwareInfo(FirmwareMeta {
            compile_date: "Jan 1".to_string(),
            compile_time: "00:00".to_string(),
        }));
        dashboard.apply_ota_event(&OtaEvent::Rebooting(3));

        assert_eq!(dashboard.firmware(), Some("Jan 1 - 00:00"));
        assert_eq!(dashboard.ota_message(), Some("OTA complete. Rebooting in: 3"));
    }
}
