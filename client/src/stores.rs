use std::sync::Arc;

use tracing::{debug, info};

use fanctl_common::{AutoConfig, AutoConfigPayload, ManualConfig, ScheduleSlot, SlotId};

use crate::{error::SessionError, transport::DeviceApi};

/// Manual PWM setting on the device.
#[derive(Clone)]
pub struct ManualStore {
    device: Arc<dyn DeviceApi>,
}

impl ManualStore {
    pub fn new(device: Arc<dyn DeviceApi>) -> Self {
        Self { device }
    }

    /// A device that omits `manual_pwm` is read as 0.
    pub async fn load(&self) -> Result<ManualConfig, SessionError> {
        let payload = self.device.load_manual().await?;
        let config = ManualConfig::new(payload.manual_pwm.unwrap_or_default());
        debug!(pwm = config.pwm, "manual config loaded");
        Ok(config)
    }

    pub async fn save(&self, config: ManualConfig) -> Result<(), SessionError> {
        self.device.save_manual(config).await?;
        info!(pwm = config.pwm, "manual config saved");
        Ok(())
    }
}

/// Automatic temperature band on the device.
#[derive(Clone)]
pub struct AutoStore {
    device: Arc<dyn DeviceApi>,
}

impl AutoStore {
    pub fn new(device: Arc<dyn DeviceApi>) -> Self {
        Self { device }
    }

    /// Bounds the device omitted are taken from `current`.
    pub async fn load(&self, current: AutoConfig) -> Result<AutoConfig, SessionError> {
        let AutoConfigPayload { tmin, tmax, .. } = self.device.load_auto().await?;
        let narrow = |value: i64| value.clamp(i32::MIN as i64, i32::MAX as i64) as i32;
        let config = AutoConfig {
            tmin: tmin.map(narrow).unwrap_or(current.tmin),
            tmax: tmax.map(narrow).unwrap_or(current.tmax),
        };
        debug!(tmin = config.tmin, tmax = config.tmax, "auto config loaded");
        Ok(config)
    }

    pub async fn save(&self, config: AutoConfig) -> Result<(), SessionError> {
        self.device.save_auto(config).await?;
        info!(tmin = config.tmin, tmax = config.tmax, "auto config saved");
        Ok(())
    }
}

/// The three schedule slots on the device.
#[derive(Clone)]
pub struct SlotStore {
    device: Arc<dyn DeviceApi>,
}

impl SlotStore {
    pub fn new(device: Arc<dyn DeviceApi>) -> Self {
        Self { device }
    }

    pub async fn load(&self, id: SlotId) -> Result<ScheduleSlot, SessionError> {
        let slot = self.device.load_slot(id).await?;
        debug!(slot = %id, active = slot.active, "schedule slot loaded");
        Ok(slot)
    }

    pub async fn save(&self, slot: &ScheduleSlot) -> Result<(), SessionError> {
        self.device.save_slot(slot).await?;
        info!(
            slot = %slot.id,
            active = slot.active,
            start = slot.start_minutes(),
            end = slot.end_minutes(),
            "schedule slot saved"
        );
        Ok(())
    }

    pub async fn erase(&self, id: SlotId) -> Result<(), SessionError> {
        self.device.erase_slot(id).await?;
        info!(slot = %id, "schedule slot erased");
        Ok(())
    }
}
