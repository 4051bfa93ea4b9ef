use std::sync::Arc;

use tokio::{
    sync::{mpsc, watch, Mutex},
    task::JoinHandle,
};
use tracing::{info, warn};

use fanctl_common::{
    AutoConfig, AutoForm, Dashboard, DeviceMode, DeviceStatus, FirmwareImage, ManualConfig,
    ManualForm, Notice, OtaPhase, ScheduleSlot, SessionConfig, SlotForm, SlotId,
    ValidationError, WifiConnectRequest, WifiConnectStatus,
};

use crate::{
    error::SessionError,
    ota::OtaController,
    poller::StatusPoller,
    stores::{AutoStore, ManualStore, SlotStore},
    transport::{DeviceApi, HttpDevice},
};

/// One operator's control session with a device.
///
/// Owns the status poller, the dashboard it feeds, the three config stores
/// with their edit forms and the firmware updater. Every user action
/// reports its outcome on the dashboard and returns it; none of them end
/// the session.
pub struct Session {
    config: SessionConfig,
    device: Arc<dyn DeviceApi>,
    poller: StatusPoller<dyn DeviceApi>,
    reconcile: Option<JoinHandle<()>>,
    dashboard: Arc<Mutex<Dashboard>>,
    manual: ManualStore,
    auto: AutoStore,
    slots: SlotStore,
    ota: OtaController,
    selected_slot: SlotId,
    pub manual_form: ManualForm,
    pub auto_form: AutoForm,
    pub slot_form: SlotForm,
}

impl Session {
    pub fn new(config: SessionConfig, device: Arc<dyn DeviceApi>) -> Self {
        Self {
            poller: StatusPoller::new(Arc::clone(&device)),
            reconcile: None,
            dashboard: Arc::new(Mutex::new(Dashboard::new())),
            manual: ManualStore::new(Arc::clone(&device)),
            auto: AutoStore::new(Arc::clone(&device)),
            slots: SlotStore::new(Arc::clone(&device)),
            ota: OtaController::new(
                Arc::clone(&device),
                config.ota_countdown_secs,
                config.ota_tick(),
            ),
            selected_slot: SlotId::FIRST,
            manual_form: ManualForm::default(),
            auto_form: AutoForm::default(),
            slot_form: SlotForm::default(),
            device,
            config,
        }
    }

    /// Session over HTTP to `config.device_url`.
    pub fn connect(mut config: SessionConfig) -> Result<Self, SessionError> {
        config.sanitize();
        let device = HttpDevice::new(&config)?;
        Ok(Self::new(config, Arc::new(device)))
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Starts polling and loads the three panels, slot 1 for the schedule.
    /// Load failures are logged and leave the forms as they were. Starting
    /// again replaces the running tasks.
    pub async fn start(&mut self) {
        self.stop();
        self.reconcile = Some(spawn_reconcile_loop(
            self.poller.subscribe(),
            Arc::clone(&self.dashboard),
        ));
        self.poller.start(self.config.poll_interval());

        if let Err(err) = self.load_manual().await {
            warn!("failed to load manual config: {err}");
        }
        if let Err(err) = self.load_auto().await {
            warn!("failed to load auto config: {err}");
        }
        if let Err(err) = self.load_slot().await {
            warn!("failed to load schedule slot {}: {err}", self.selected_slot);
        }
    }

    pub fn stop(&mut self) {
        self.poller.stop();
        if let Some(task) = self.reconcile.take() {
            task.abort();
        }
    }

    pub fn is_polling(&self) -> bool {
        self.poller.is_running()
    }

    /// Latest successful poll, as it arrives.
    pub fn subscribe_status(&self) -> watch::Receiver<Option<DeviceStatus>> {
        self.poller.subscribe()
    }

    /// Copy of what the dashboard currently shows.
    pub async fn dashboard(&self) -> Dashboard {
        self.dashboard.lock().await.clone()
    }

    /// Shows `panel` without touching the device's mode.
    pub async fn select_panel(&self, panel: DeviceMode) {
        self.dashboard.lock().await.select_panel(panel);
    }

    pub fn selected_slot(&self) -> SlotId {
        self.selected_slot
    }

    pub fn select_slot(&mut self, id: SlotId) {
        self.selected_slot = id;
    }

    pub async fn load_manual(&mut self) -> Result<ManualConfig, SessionError> {
        let config = self.manual.load().await?;
        self.manual_form.fill(&config);
        Ok(config)
    }

    pub async fn save_manual(&self) -> Result<ManualConfig, SessionError> {
        let config = self.manual_form.to_config();
        self.notify(DeviceMode::Manual, Notice::Saving).await;

        match self.manual.save(config).await {
            Ok(()) => {
                self.notify(DeviceMode::Manual, Notice::PwmApplied(config.pwm))
                    .await;
                Ok(config)
            }
            Err(err) => {
                warn!("failed to save manual config: {err}");
                self.notify(DeviceMode::Manual, Notice::PwmFailed).await;
                Err(err)
            }
        }
    }

    pub async fn load_auto(&mut self) -> Result<AutoConfig, SessionError> {
        let config = self.auto.load(self.auto_form.to_config()).await?;
        self.auto_form.fill(&config);
        Ok(config)
    }

    pub async fn save_auto(&self) -> Result<AutoConfig, SessionError> {
        let config = self.auto_form.to_config();
        self.notify(DeviceMode::Auto, Notice::Saving).await;

        match self.auto.save(config).await {
            Ok(()) => {
                self.notify(DeviceMode::Auto, Notice::ConfigSaved).await;
                Ok(config)
            }
            Err(err) => {
                warn!("failed to save auto config: {err}");
                self.notify(DeviceMode::Auto, Notice::SaveFailed).await;
                Err(err)
            }
        }
    }

    /// Loads the selected slot into the slot form. A missing slot leaves
    /// the form untouched.
    pub async fn load_slot(&mut self) -> Result<ScheduleSlot, SessionError> {
        self.notify(DeviceMode::Scheduled, Notice::Reading).await;

        match self.slots.load(self.selected_slot).await {
            Ok(slot) => {
                self.slot_form.fill(&slot);
                self.notify(DeviceMode::Scheduled, Notice::SlotLoaded).await;
                Ok(slot)
            }
            Err(err) => {
                self.notify(DeviceMode::Scheduled, Notice::SlotMissing).await;
                Err(err)
            }
        }
    }

    pub async fn save_slot(&self) -> Result<ScheduleSlot, SessionError> {
        let slot = self.slot_form.to_slot(self.selected_slot);
        self.notify(DeviceMode::Scheduled, Notice::Saving).await;

        match self.slots.save(&slot).await {
            Ok(()) => {
                self.notify(DeviceMode::Scheduled, Notice::SlotSaved).await;
                Ok(slot)
            }
            Err(err) => {
                warn!("failed to save schedule slot {}: {err}", slot.id);
                self.notify(DeviceMode::Scheduled, Notice::SaveFailed).await;
                Err(err)
            }
        }
    }

    /// Erases the selected slot and clears the form's active flag.
    pub async fn erase_slot(&mut self) -> Result<(), SessionError> {
        let id = self.selected_slot;
        self.notify(DeviceMode::Scheduled, Notice::Erasing).await;

        match self.slots.erase(id).await {
            Ok(()) => {
                self.slot_form.active = false;
                self.notify(DeviceMode::Scheduled, Notice::SlotErased).await;
                Ok(())
            }
            Err(err) => {
                warn!("failed to erase schedule slot {id}: {err}");
                self.notify(DeviceMode::Scheduled, Notice::EraseFailed).await;
                Err(err)
            }
        }
    }

    /// Saves the panel on screen, which is how the device is told to switch
    /// to that panel's mode. The mode shown only changes once a poll
    /// confirms it.
    pub async fn apply_selected_mode(&self) -> Result<DeviceMode, SessionError> {
        let panel = {
            let mut dashboard = self.dashboard.lock().await;
            let panel = dashboard.reconciler().visible_panel();
            match panel {
                Some(mode) => dashboard.set_mode_notice(Notice::ApplyingMode(mode)),
                None => dashboard.set_mode_notice(Notice::SelectModeFirst),
            }
            panel
        };

        let Some(mode) = panel else {
            return Err(ValidationError::NoModeSelected.into());
        };
        info!(mode = mode.label(), "applying mode");

        match mode {
            DeviceMode::Manual => self.save_manual().await.map(|_| mode),
            DeviceMode::Auto => self.save_auto().await.map(|_| mode),
            DeviceMode::Scheduled => self.save_slot().await.map(|_| mode),
        }
    }

    pub fn ota_phase(&self) -> OtaPhase {
        self.ota.phase()
    }

    pub fn reset_ota(&mut self) -> bool {
        self.ota.reset()
    }

    /// Uploads the single selected image and follows the device through
    /// flashing. On success the session reloads: polling restarts and the
    /// panels are read again. A rejected image is a [`SessionError::Device`];
    /// a failed upload request returns its transport error. Either way the
    /// dashboard shows the upload error.
    pub async fn update_firmware(
        &mut self,
        files: &[FirmwareImage],
    ) -> Result<OtaPhase, SessionError> {
        let (events, mut received) = mpsc::unbounded_channel();
        let dashboard = Arc::clone(&self.dashboard);
        let forward = async move {
            while let Some(event) = received.recv().await {
                dashboard.lock().await.apply_ota_event(&event);
            }
        };

        let (result, ()) = tokio::join!(self.ota.run(files, events), forward);
        if let Err(SessionError::Validation(err)) = &result {
            self.dashboard.lock().await.set_ota_message(err.to_string());
        }
        match result? {
            OtaPhase::Succeeded => {
                self.reload().await;
                Ok(OtaPhase::Succeeded)
            }
            OtaPhase::Failed => Err(SessionError::Device(
                "firmware image rejected (ota_update_status -1)".to_string(),
            )),
            phase => Ok(phase),
        }
    }

    pub async fn connect_wifi(&self, ssid: &str, password: &str) -> Result<(), SessionError> {
        if ssid.is_empty() {
            return Err(ValidationError::EmptyField("SSID").into());
        }
        if password.is_empty() {
            return Err(ValidationError::EmptyField("Password").into());
        }

        let request = WifiConnectRequest {
            selected_ssid: ssid.to_string(),
            pwd: password.to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        };
        self.device.connect_wifi(&request).await?;
        info!(ssid, "wifi credentials sent");
        Ok(())
    }

    pub async fn wifi_status(&self) -> Result<WifiConnectStatus, SessionError> {
        self.device.wifi_status().await
    }

    async fn notify(&self, panel: DeviceMode, notice: Notice) {
        self.dashboard.lock().await.set_notice(panel, notice);
    }

    /// Fresh start after the device rebooted into new firmware.
    async fn reload(&mut self) {
        info!("reloading session");
        self.stop();
        *self.dashboard.lock().await = Dashboard::new();
        self.manual_form = ManualForm::default();
        self.auto_form = AutoForm::default();
        self.slot_form = SlotForm::default();
        self.selected_slot = SlotId::FIRST;
        self.ota.reset();
        self.start().await;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn_reconcile_loop(
    mut updates: watch::Receiver<Option<DeviceStatus>>,
    dashboard: Arc<Mutex<Dashboard>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let latest = *updates.borrow_and_update();
            let Some(status) = latest else {
                continue;
            };

            let mut dashboard = dashboard.lock().await;
            if dashboard.apply_status(&status) {
                let mode = dashboard.mode_label().unwrap_or("Desconocido");
                info!(mode, "device mode changed");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use fanctl_common::{FlashStatus, SlotProtocol};
    use fanctl_device_sim::{spawn, DeviceState, RunningSim, SimState};
    use pretty_assertions::assert_eq;

    use super::*;

    async fn session_with(device: DeviceState, config: SessionConfig) -> (RunningSim, Session) {
        let sim = spawn(([127, 0, 0, 1], 0).into(), SimState::new(device))
            .await
            .unwrap();
        let config = SessionConfig {
            device_url: sim.base_url(),
            ..config
        };
        let session = Session::connect(config).unwrap();
        (sim, session)
    }

    fn fast_config() -> SessionConfig {
        SessionConfig {
            poll_interval_ms: 20,
            ota_countdown_secs: 3,
            ota_tick_ms: 10,
            ..SessionConfig::default()
        }
    }

    async fn wait_for(session: &Session, check: impl Fn(&Dashboard) -> bool) -> Dashboard {
        for _ in 0..200 {
            let dashboard = session.dashboard().await;
            if check(&dashboard) {
                return dashboard;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("dashboard never reached the expected state");
    }

    #[tokio::test]
    async fn poll_projects_device_status() {
        let device = DeviceState {
            mode_code: 1,
            temp_c: Some(21.3),
            presence: Some(true),
            ..DeviceState::default()
        };
        let (_sim, mut session) = session_with(device, fast_config()).await;
        session.start().await;

        let dashboard = wait_for(&session, |d| d.mode_label().is_some()).await;
        assert_eq!(dashboard.mode_label(), Some("Automático"));
        assert_eq!(dashboard.temperature(), Some("21.3 °C"));
        assert_eq!(dashboard.presence(), Some("Presencia"));
        assert!(dashboard.reconciler().is_visible(DeviceMode::Auto));
        assert_eq!(dashboard.reconciler().visible_count(), 1);
    }

    #[tokio::test]
    async fn unknown_device_mode_hides_all_panels() {
        let device = DeviceState {
            mode_code: 9,
            ..DeviceState::default()
        };
        let (_sim, mut session) = session_with(device, fast_config()).await;
        session.start().await;

        let dashboard = wait_for(&session, |d| d.mode_label().is_some()).await;
        assert_eq!(dashboard.mode_label(), Some("Desconocido"));
        assert_eq!(dashboard.reconciler().visible_count(), 0);
    }

    #[tokio::test]
    async fn start_loads_forms_from_device() {
        let mut device = DeviceState {
            manual: ManualConfig::new(55),
            auto: AutoConfig { tmin: 19, tmax: 27 },
            ..DeviceState::default()
        };
        let mut slot = ScheduleSlot::inactive(SlotId::FIRST);
        slot.active = true;
        slot.end_hour = 8;
        device.slots[0] = Some(slot);

        let (_sim, mut session) = session_with(device, fast_config()).await;
        session.start().await;

        assert_eq!(session.manual_form.pwm, "55");
        assert_eq!(session.auto_form.tmin, "19");
        assert_eq!(session.auto_form.tmax, "27");
        assert!(session.slot_form.active);
        assert_eq!(session.slot_form.end_hour, "8");
        assert_eq!(
            session.dashboard().await.notice(DeviceMode::Scheduled),
            Some(&Notice::SlotLoaded)
        );
    }

    #[tokio::test]
    async fn saving_does_not_flip_mode_until_a_poll_confirms_it() {
        let config = SessionConfig {
            poll_interval_ms: 60_000,
            ..SessionConfig::default()
        };
        let (sim, mut session) = session_with(DeviceState::default(), config).await;
        session.start().await;
        wait_for(&session, |d| d.reconciler().mode() == Some(DeviceMode::Manual)).await;

        session.auto_form.tmin = "18".to_string();
        session.auto_form.tmax = "24".to_string();
        session.save_auto().await.unwrap();

        assert_eq!(sim.state.snapshot().await.mode(), Some(DeviceMode::Auto));
        let dashboard = session.dashboard().await;
        assert_eq!(dashboard.reconciler().mode(), Some(DeviceMode::Manual));
        assert_eq!(dashboard.notice(DeviceMode::Auto), Some(&Notice::ConfigSaved));
    }

    #[tokio::test]
    async fn next_poll_confirms_saved_mode() {
        let (_sim, mut session) = session_with(DeviceState::default(), fast_config()).await;
        session.start().await;

        session.slot_form.active = true;
        session.slot_form.start_hour = "6".to_string();
        session.slot_form.end_hour = "18".to_string();
        session.save_slot().await.unwrap();

        let dashboard =
            wait_for(&session, |d| d.reconciler().mode() == Some(DeviceMode::Scheduled)).await;
        assert!(dashboard.reconciler().is_visible(DeviceMode::Scheduled));
    }

    #[tokio::test]
    async fn invalid_numbers_are_sent_as_zero() {
        let (sim, mut session) = session_with(DeviceState::default(), fast_config()).await;
        session.auto_form.tmin = String::new();
        session.auto_form.tmax = "abc".to_string();

        let sent = session.save_auto().await.unwrap();

        assert_eq!(sent, AutoConfig { tmin: 0, tmax: 0 });
        assert_eq!(sim.state.snapshot().await.auto, AutoConfig { tmin: 0, tmax: 0 });
    }

    #[tokio::test]
    async fn slot_round_trip_through_session_on_legacy_protocol() {
        let config = SessionConfig {
            slot_protocol: SlotProtocol::Program,
            ..fast_config()
        };
        let (_sim, mut session) = session_with(DeviceState::default(), config).await;
        session.select_slot(SlotId::new(2).unwrap());
        session.slot_form = SlotForm {
            active: true,
            start_hour: "6".to_string(),
            start_minute: "0".to_string(),
            end_hour: "18".to_string(),
            end_minute: "0".to_string(),
            output_at_0: "20".to_string(),
            output_at_100: "80".to_string(),
        };
        let saved = session.save_slot().await.unwrap();

        session.slot_form = SlotForm::default();
        let loaded = session.load_slot().await.unwrap();

        assert_eq!(loaded, saved);
        assert_eq!(session.slot_form.output_at_100, "80");
    }

    #[tokio::test]
    async fn erase_clears_active_and_slot_is_then_missing() {
        let (_sim, mut session) = session_with(DeviceState::default(), fast_config()).await;
        session.slot_form.active = true;
        session.save_slot().await.unwrap();

        session.erase_slot().await.unwrap();
        assert!(!session.slot_form.active);

        let err = session.load_slot().await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(
            session.dashboard().await.notice(DeviceMode::Scheduled),
            Some(&Notice::SlotMissing)
        );
    }

    #[tokio::test]
    async fn apply_without_a_panel_is_rejected() {
        let (sim, session) = session_with(DeviceState::default(), fast_config()).await;

        let err = session.apply_selected_mode().await.unwrap_err();

        assert_eq!(err.validation(), Some(&ValidationError::NoModeSelected));
        assert_eq!(
            session.dashboard().await.mode_notice(),
            Some(&Notice::SelectModeFirst)
        );
        assert_eq!(sim.state.snapshot().await, DeviceState::default());
    }

    #[tokio::test]
    async fn apply_saves_the_visible_panel() {
        let (sim, mut session) = session_with(DeviceState::default(), fast_config()).await;
        session.select_panel(DeviceMode::Manual).await;
        session.manual_form.pwm = "70".to_string();

        assert_eq!(session.apply_selected_mode().await.unwrap(), DeviceMode::Manual);
        assert_eq!(sim.state.snapshot().await.manual, ManualConfig::new(70));
        assert_eq!(
            session.dashboard().await.notice(DeviceMode::Manual),
            Some(&Notice::PwmApplied(70))
        );
    }

    #[tokio::test]
    async fn firmware_update_counts_down_and_reloads() {
        let (sim, mut session) = session_with(DeviceState::default(), fast_config()).await;
        session.start().await;
        session.manual_form.pwm = "12".to_string();

        let image = FirmwareImage::new("fw.bin", vec![0x11; 10_000]);
        let phase = session.update_firmware(&[image]).await.unwrap();

        assert_eq!(phase, OtaPhase::Succeeded);
        assert_eq!(session.ota_phase(), OtaPhase::Idle);
        assert!(session.is_polling());
        // The reload read the forms back from the device.
        assert_eq!(session.manual_form.pwm, "0");

        let device = sim.state.snapshot().await;
        assert_eq!(device.ota_status, FlashStatus::Complete);
        assert_eq!(device.firmware_uploads, 1);
    }

    #[tokio::test]
    async fn empty_image_is_reported_as_device_failure() {
        let (_sim, mut session) = session_with(DeviceState::default(), fast_config()).await;

        let err = session
            .update_firmware(&[FirmwareImage::new("empty.bin", Vec::new())])
            .await
            .unwrap_err();

        assert!(matches!(err, SessionError::Device(_)));
        assert_eq!(session.ota_phase(), OtaPhase::Failed);
        let dashboard = session.dashboard().await;
        assert_eq!(dashboard.ota_message(), Some("!!! Upload Error !!!"));
        assert_eq!(dashboard.firmware(), Some("Oct 14 2026 - 09:30:00"));
        assert!(session.reset_ota());
    }

    #[tokio::test]
    async fn update_without_file_stays_idle() {
        let (sim, mut session) = session_with(DeviceState::default(), fast_config()).await;

        let err = session.update_firmware(&[]).await.unwrap_err();

        assert_eq!(err.validation(), Some(&ValidationError::NoFileSelected));
        assert_eq!(session.ota_phase(), OtaPhase::Idle);
        assert_eq!(
            session.dashboard().await.ota_message(),
            Some("Selecciona un archivo primero")
        );
        assert_eq!(sim.state.snapshot().await.firmware_uploads, 0);
    }

    #[tokio::test]
    async fn unreachable_device_fails_the_update() {
        let config = SessionConfig {
            device_url: "http://127.0.0.1:1".to_string(),
            ..fast_config()
        };
        let mut session = Session::connect(config).unwrap();

        let err = session
            .update_firmware(&[FirmwareImage::new("fw.bin", vec![1; 100])])
            .await
            .unwrap_err();

        assert!(matches!(err, SessionError::Transport(_)));
        assert_eq!(session.ota_phase(), OtaPhase::Failed);
        assert_eq!(
            session.dashboard().await.ota_message(),
            Some("!!! Upload Error !!!")
        );
        assert!(session.reset_ota());
    }

    #[tokio::test]
    async fn restarting_replaces_the_reconcile_task() {
        let (_sim, mut session) = session_with(DeviceState::default(), fast_config()).await;
        session.start().await;
        session.start().await;
        session.stop();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(!session.is_polling());
        assert_eq!(Arc::strong_count(&session.dashboard), 1);
    }

    #[tokio::test]
    async fn wifi_credentials_must_not_be_empty() {
        let (sim, session) = session_with(DeviceState::default(), fast_config()).await;

        let err = session.connect_wifi("", "secret").await.unwrap_err();
        assert_eq!(err.validation(), Some(&ValidationError::EmptyField("SSID")));
        let err = session.connect_wifi("lab", "").await.unwrap_err();
        assert_eq!(err.validation(), Some(&ValidationError::EmptyField("Password")));

        session.connect_wifi("lab", "secret").await.unwrap();
        assert_eq!(session.wifi_status().await.unwrap(), WifiConnectStatus::Connecting);
        assert_eq!(sim.state.snapshot().await.wifi_ssid.as_deref(), Some("lab"));
    }
}
