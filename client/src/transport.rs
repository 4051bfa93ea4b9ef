use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{stream, StreamExt};
use reqwest::{
    multipart::{Form, Part},
    Body, Client, StatusCode,
};
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use fanctl_common::{
    AutoConfig, AutoConfigPayload, DeviceStatus, FirmwareImage, ManualConfig, ManualConfigPayload,
    OtaReport, OtaStatusPayload, PwmUpdate, ScheduleSlot, SessionConfig, SlotId, SlotProtocol,
    StatusPayload, UploadProgress, WifiConnectRequest, WifiConnectStatus, WifiStatusPayload,
    OTA_STATUS_QUERY, OTA_UPLOAD_FIELD, PATH_AUTO_GET, PATH_AUTO_SET, PATH_MANUAL_GET,
    PATH_MANUAL_SET, PATH_OTA_STATUS, PATH_OTA_UPDATE, PATH_STATUS, PATH_WIFI_CONNECT,
    PATH_WIFI_STATUS,
};

use crate::error::{SessionError, TransportError};

const UPLOAD_CHUNK_SIZE: usize = 4096;

/// The one call the status poller needs.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn fetch_status(&self) -> Result<DeviceStatus, SessionError>;
}

/// Every request the session makes of the device.
#[async_trait]
pub trait DeviceApi: StatusSource {
    async fn load_manual(&self) -> Result<ManualConfigPayload, SessionError>;
    async fn save_manual(&self, config: ManualConfig) -> Result<(), SessionError>;

    async fn load_auto(&self) -> Result<AutoConfigPayload, SessionError>;
    async fn save_auto(&self, config: AutoConfig) -> Result<(), SessionError>;

    /// Absent slots yield [`SessionError::NotFound`].
    async fn load_slot(&self, id: SlotId) -> Result<ScheduleSlot, SessionError>;
    async fn save_slot(&self, slot: &ScheduleSlot) -> Result<(), SessionError>;
    async fn erase_slot(&self, id: SlotId) -> Result<(), SessionError>;

    async fn ota_status(&self) -> Result<OtaReport, SessionError>;
    /// Streams `image` to the device, reporting each chunk handed to the
    /// connection on `progress`.
    async fn upload_firmware(
        &self,
        image: &FirmwareImage,
        progress: mpsc::UnboundedSender<UploadProgress>,
    ) -> Result<(), SessionError>;

    async fn connect_wifi(&self, request: &WifiConnectRequest) -> Result<(), SessionError>;
    async fn wifi_status(&self) -> Result<WifiConnectStatus, SessionError>;
}

/// [`DeviceApi`] over the device's JSON/HTTP interface.
#[derive(Clone)]
pub struct HttpDevice {
    client: Client,
    upload_client: Client,
    base_url: String,
    slots: SlotProtocol,
}

impl HttpDevice {
    pub fn new(config: &SessionConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(TransportError::Client)?;
        let upload_client = Client::builder()
            .timeout(config.upload_timeout())
            .build()
            .map_err(TransportError::Client)?;

        Ok(Self {
            client,
            upload_client,
            base_url: config.device_url.trim_end_matches('/').to_string(),
            slots: config.slot_protocol,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn slot_protocol(&self) -> SlotProtocol {
        self.slots
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn get_raw(&self, path: &str) -> Result<(StatusCode, Bytes), TransportError> {
        let response = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(|source| request_error(path, source))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|source| request_error(path, source))?;
        Ok((status, body))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, TransportError> {
        let (status, body) = self.get_raw(path).await?;
        if !status.is_success() {
            return Err(status_error(path, status));
        }
        decode(path, &body)
    }

    async fn post_json<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<(), TransportError> {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|source| request_error(path, source))?;
        ensure_success(path, response.status())
    }
}

#[async_trait]
impl StatusSource for HttpDevice {
    async fn fetch_status(&self) -> Result<DeviceStatus, SessionError> {
        let payload: StatusPayload = self.get_json(PATH_STATUS).await?;
        Ok(payload.into())
    }
}

#[async_trait]
impl DeviceApi for HttpDevice {
    async fn load_manual(&self) -> Result<ManualConfigPayload, SessionError> {
        Ok(self.get_json(PATH_MANUAL_GET).await?)
    }

    async fn save_manual(&self, config: ManualConfig) -> Result<(), SessionError> {
        let body = PwmUpdate {
            pwm: i64::from(config.pwm),
        };
        Ok(self.post_json(PATH_MANUAL_SET, &body).await?)
    }

    async fn load_auto(&self) -> Result<AutoConfigPayload, SessionError> {
        Ok(self.get_json(PATH_AUTO_GET).await?)
    }

    async fn save_auto(&self, config: AutoConfig) -> Result<(), SessionError> {
        Ok(self.post_json(PATH_AUTO_SET, &config).await?)
    }

    async fn load_slot(&self, id: SlotId) -> Result<ScheduleSlot, SessionError> {
        let path = self.slots.get_path(id);
        let (status, body) = self.get_raw(&path).await?;
        if status == StatusCode::NOT_FOUND {
            return Err(SessionError::NotFound(id));
        }
        if !status.is_success() {
            return Err(status_error(&path, status).into());
        }

        self.slots
            .decode_loaded(id, &body)
            .map_err(|err| SessionError::Transport(err.into()))
    }

    async fn save_slot(&self, slot: &ScheduleSlot) -> Result<(), SessionError> {
        let body = self.slots.encode_set(slot);
        Ok(self.post_json(self.slots.set_path(), &body).await?)
    }

    async fn erase_slot(&self, id: SlotId) -> Result<(), SessionError> {
        let body = self.slots.encode_erase(id);
        Ok(self.post_json(self.slots.erase_path(), &body).await?)
    }

    async fn ota_status(&self) -> Result<OtaReport, SessionError> {
        let response = self
            .client
            .post(self.url(PATH_OTA_STATUS))
            .body(OTA_STATUS_QUERY)
            .send()
            .await
            .map_err(|source| request_error(PATH_OTA_STATUS, source))?;
        ensure_success(PATH_OTA_STATUS, response.status())?;
        let body = response
            .bytes()
            .await
            .map_err(|source| request_error(PATH_OTA_STATUS, source))?;

        let payload: OtaStatusPayload = decode(PATH_OTA_STATUS, &body)?;
        Ok(payload.into())
    }

    async fn upload_firmware(
        &self,
        image: &FirmwareImage,
        progress: mpsc::UnboundedSender<UploadProgress>,
    ) -> Result<(), SessionError> {
        let total = image.len() as u64;
        let chunks: Vec<Bytes> = image
            .bytes
            .chunks(UPLOAD_CHUNK_SIZE)
            .map(Bytes::copy_from_slice)
            .collect();

        let mut sent = 0u64;
        let body = stream::iter(chunks).map(move |chunk| {
            sent += chunk.len() as u64;
            // The receiver is gone once the session has stopped listening.
            let _ = progress.send(UploadProgress {
                sent,
                total: Some(total),
            });
            Ok::<Bytes, std::io::Error>(chunk)
        });

        let part = Part::stream_with_length(Body::wrap_stream(body), total)
            .file_name(image.name.clone())
            .mime_str("application/octet-stream")
            .map_err(|source| request_error(PATH_OTA_UPDATE, source))?;
        let form = Form::new().part(OTA_UPLOAD_FIELD, part);

        debug!(bytes = total, "posting firmware image");
        let response = self
            .upload_client
            .post(self.url(PATH_OTA_UPDATE))
            .multipart(form)
            .send()
            .await
            .map_err(|source| request_error(PATH_OTA_UPDATE, source))?;
        Ok(ensure_success(PATH_OTA_UPDATE, response.status())?)
    }

    async fn connect_wifi(&self, request: &WifiConnectRequest) -> Result<(), SessionError> {
        Ok(self.post_json(PATH_WIFI_CONNECT, request).await?)
    }

    async fn wifi_status(&self) -> Result<WifiConnectStatus, SessionError> {
        let payload: WifiStatusPayload = self.get_json(PATH_WIFI_STATUS).await?;
        Ok(WifiConnectStatus::from_code(payload.wifi_connect_status))
    }
}

fn request_error(path: &str, source: reqwest::Error) -> TransportError {
    TransportError::Request {
        path: path.to_string(),
        source,
    }
}

fn status_error(path: &str, status: StatusCode) -> TransportError {
    TransportError::Status {
        path: path.to_string(),
        status,
    }
}

fn ensure_success(path: &str, status: StatusCode) -> Result<(), TransportError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(status_error(path, status))
    }
}

fn decode<T: DeserializeOwned>(path: &str, body: &[u8]) -> Result<T, TransportError> {
    serde_json::from_slice(body).map_err(|source| TransportError::Decode {
        path: path.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use fanctl_common::{DeviceMode, FlashStatus};
    use fanctl_device_sim::{spawn, RunningSim, SimState};
    use pretty_assertions::assert_eq;

    async fn device_for(protocol: SlotProtocol) -> (RunningSim, HttpDevice) {
        let sim = spawn(([127, 0, 0, 1], 0).into(), SimState::default())
            .await
            .unwrap();
        let config = SessionConfig {
            device_url: sim.base_url(),
            slot_protocol: protocol,
            ..SessionConfig::default()
        };
        let device = HttpDevice::new(&config).unwrap();
        (sim, device)
    }

    fn sample_slot(id: i64) -> ScheduleSlot {
        ScheduleSlot {
            id: SlotId::new(id).unwrap(),
            active: true,
            start_hour: 6,
            start_minute: 0,
            end_hour: 18,
            end_minute: 0,
            output_at_0: 20,
            output_at_100: 80,
        }
    }

    #[tokio::test]
    async fn saved_slot_loads_back_identically_on_both_protocols() {
        for protocol in [SlotProtocol::Program, SlotProtocol::ProgramSlot] {
            let (_sim, device) = device_for(protocol).await;
            let slot = sample_slot(2);

            device.save_slot(&slot).await.unwrap();
            assert_eq!(device.load_slot(slot.id).await.unwrap(), slot);
        }
    }

    #[tokio::test]
    async fn erased_slots_are_not_found_whether_saved_or_not() {
        let (_sim, device) = device_for(SlotProtocol::default()).await;
        device.save_slot(&sample_slot(1)).await.unwrap();

        for id in SlotId::ALL {
            device.erase_slot(id).await.unwrap();
            let err = device.load_slot(id).await.unwrap_err();
            assert!(err.is_not_found(), "slot {id}: {err}");
        }
    }

    #[tokio::test]
    async fn saving_a_slot_switches_device_to_scheduled() {
        let (sim, device) = device_for(SlotProtocol::Program).await;
        device.save_slot(&sample_slot(3)).await.unwrap();

        let status = device.fetch_status().await.unwrap();
        assert_eq!(
            status.mode.and_then(|mode| mode.known()),
            Some(DeviceMode::Scheduled)
        );
        assert_eq!(sim.state.snapshot().await.slots[2], Some(sample_slot(3)));
    }

    #[tokio::test]
    async fn manual_and_auto_round_trip_through_device() {
        let (_sim, device) = device_for(SlotProtocol::default()).await;

        device.save_manual(ManualConfig::new(65)).await.unwrap();
        assert_eq!(device.load_manual().await.unwrap().manual_pwm, Some(65));

        device
            .save_auto(AutoConfig { tmin: 18, tmax: 26 })
            .await
            .unwrap();
        let loaded = device.load_auto().await.unwrap();
        assert_eq!((loaded.tmin, loaded.tmax), (Some(18), Some(26)));
    }

    #[tokio::test]
    async fn unreachable_device_is_a_transport_error() {
        let config = SessionConfig {
            device_url: "http://127.0.0.1:1".to_string(),
            request_timeout_ms: 500,
            ..SessionConfig::default()
        };
        let device = HttpDevice::new(&config).unwrap();

        let err = device.fetch_status().await.unwrap_err();
        assert!(matches!(err, SessionError::Transport(TransportError::Request { .. })));
    }

    #[tokio::test]
    async fn upload_reports_progress_up_to_image_size() {
        let (sim, device) = device_for(SlotProtocol::default()).await;
        let image = FirmwareImage::new("fw.bin", vec![0xA5; UPLOAD_CHUNK_SIZE * 2 + 10]);
        let (tx, mut rx) = mpsc::unbounded_channel();

        device.upload_firmware(&image, tx).await.unwrap();

        let mut last = None;
        while let Ok(progress) = rx.try_recv() {
            last = Some(progress);
        }
        let total = image.len() as u64;
        assert_eq!(
            last,
            Some(UploadProgress {
                sent: total,
                total: Some(total),
            })
        );

        let report = device.ota_status().await.unwrap();
        assert_eq!(report.status, FlashStatus::Complete);
        assert_eq!(sim.state.snapshot().await.firmware_uploads, 1);
    }

    #[tokio::test]
    async fn wifi_request_is_recorded_by_device() {
        let (sim, device) = device_for(SlotProtocol::default()).await;
        let request = WifiConnectRequest {
            selected_ssid: "lab".to_string(),
            pwd: "secret".to_string(),
            timestamp: 1,
        };

        device.connect_wifi(&request).await.unwrap();

        assert_eq!(device.wifi_status().await.unwrap(), WifiConnectStatus::Connecting);
        assert_eq!(sim.state.snapshot().await.wifi_ssid.as_deref(), Some("lab"));
    }
}
