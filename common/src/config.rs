use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{codec::SlotProtocol, ota::DEFAULT_REBOOT_COUNTDOWN};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub device_url: String,
    pub poll_interval_ms: u64,
    pub request_timeout_ms: u64,
    pub upload_timeout_ms: u64,
    pub slot_protocol: SlotProtocol,
    pub ota_countdown_secs: u32,
    pub ota_tick_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            device_url: "http://192.168.4.1".to_string(),
            poll_interval_ms: 2_500,
            request_timeout_ms: 5_000,
            upload_timeout_ms: 120_000,
            slot_protocol: SlotProtocol::default(),
            ota_countdown_secs: DEFAULT_REBOOT_COUNTDOWN,
            ota_tick_ms: 1_000,
        }
    }
}

impl SessionConfig {
    pub fn sanitize(&mut self) {
        let defaults = Self::default();

        self.device_url = self.device_url.trim().trim_end_matches('/').to_string();
        if self.device_url.is_empty() {
            self.device_url = defaults.device_url;
        }

        if self.poll_interval_ms == 0 {
            self.poll_interval_ms = defaults.poll_interval_ms;
        }
        if self.request_timeout_ms == 0 {
            self.request_timeout_ms = defaults.request_timeout_ms;
        }
        if self.upload_timeout_ms == 0 {
            self.upload_timeout_ms = defaults.upload_timeout_ms;
        }
        if self.ota_countdown_secs == 0 {
            self.ota_countdown_secs = defaults.ota_countdown_secs;
        }
        if self.ota_tick_ms == 0 {
            self.ota_tick_ms = defaults.ota_tick_ms;
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_millis(self.upload_timeout_ms)
    }

    pub fn ota_tick(&self) -> Duration {
        Duration::from_millis(self.ota_tick_ms)
    }
}
