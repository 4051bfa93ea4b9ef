use std::{collections::HashMap, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{
    extract::{DefaultBodyLimit, Multipart, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Local;
use serde::Serialize;
use serde_json::Value;
use tokio::{net::TcpListener, sync::Mutex, task::JoinHandle};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use fanctl_common::{
    control::{self, ControlInputs},
    schedule::{self, SLOT_COUNT},
    AutoConfig, AutoConfigPayload, DeviceMode, Flag, FlashStatus, ManualConfig,
    ManualConfigPayload, OtaStatusPayload, ScheduleSlot, SlotId, SlotProtocol, StatusPayload,
    WifiConnectRequest, WifiConnectStatus, WifiStatusPayload, OTA_UPLOAD_FIELD, PATH_AUTO_GET,
    PATH_AUTO_SET, PATH_MANUAL_GET, PATH_MANUAL_SET, PATH_OTA_STATUS, PATH_OTA_UPDATE,
    PATH_STATUS, PATH_WIFI_CONNECT, PATH_WIFI_STATUS,
};

const MAX_FIRMWARE_BYTES: usize = 8 * 1024 * 1024;
const BUILD_DATE: &str = "Oct 14 2026";
const BUILD_TIME: &str = "09:30:00";

/// Everything the simulated device remembers. Lost on restart.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceState {
    /// Raw mode code; values outside `0..=2` are served as-is.
    pub mode_code: i64,
    pub manual: ManualConfig,
    pub auto: AutoConfig,
    pub slots: [Option<ScheduleSlot>; SLOT_COUNT as usize],
    /// `None` until the sensor has produced a reading.
    pub temp_c: Option<f32>,
    pub presence: Option<bool>,
    pub ota_status: FlashStatus,
    pub compile_date: String,
    pub compile_time: String,
    pub firmware_uploads: usize,
    pub wifi_status: WifiConnectStatus,
    pub wifi_ssid: Option<String>,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            mode_code: DeviceMode::Manual.code() as i64,
            manual: ManualConfig::default(),
            auto: AutoConfig { tmin: 20, tmax: 30 },
            slots: [None; SLOT_COUNT as usize],
            temp_c: Some(22.0),
            presence: Some(true),
            ota_status: FlashStatus::Pending,
            compile_date: BUILD_DATE.to_string(),
            compile_time: BUILD_TIME.to_string(),
            firmware_uploads: 0,
            wifi_status: WifiConnectStatus::Idle,
            wifi_ssid: None,
        }
    }
}

impl DeviceState {
    pub fn mode(&self) -> Option<DeviceMode> {
        DeviceMode::from_code(self.mode_code)
    }

    pub fn output_level(&self, minute_of_day: u16) -> u8 {
        let slots: Vec<ScheduleSlot> = self.slots.iter().flatten().copied().collect();
        control::output_level(&ControlInputs {
            mode: self.mode(),
            temp_c: self.temp_c.unwrap_or_default(),
            presence: self.presence.unwrap_or(false),
            minute_of_day,
            manual: self.manual,
            auto: self.auto,
            slots: &slots,
        })
    }

    pub fn status_payload(&self, minute_of_day: u16) -> StatusPayload {
        StatusPayload {
            temp: self.temp_c,
            pir: self.presence.map(|present| Flag::Int(i64::from(present))),
            mode: Some(self.mode_code),
            pwm: Some(i64::from(self.output_level(minute_of_day))),
        }
    }

    fn set_mode(&mut self, mode: DeviceMode) {
        self.mode_code = mode.code() as i64;
    }
}

#[derive(Clone, Default)]
pub struct SimState {
    device: Arc<Mutex<DeviceState>>,
}

impl SimState {
    pub fn new(device: DeviceState) -> Self {
        Self {
            device: Arc::new(Mutex::new(device)),
        }
    }

    pub async fn snapshot(&self) -> DeviceState {
        self.device.lock().await.clone()
    }

    pub async fn update(&self, apply: impl FnOnce(&mut DeviceState)) {
        apply(&mut *self.device.lock().await);
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// A simulator bound to a local socket. The server stops when this is dropped.
pub struct RunningSim {
    pub addr: SocketAddr,
    pub state: SimState,
    task: JoinHandle<()>,
}

impl RunningSim {
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

impl Drop for RunningSim {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub fn router(state: SimState) -> Router {
    Router::new()
        .route(PATH_STATUS, get(handle_get_status))
        .route(PATH_MANUAL_GET, get(handle_get_manual))
        .route(PATH_MANUAL_SET, post(handle_set_manual))
        .route(PATH_AUTO_GET, get(handle_get_auto))
        .route(PATH_AUTO_SET, post(handle_set_auto))
        .route(
            SlotProtocol::Program.get_base_path(),
            get(
                |State(state): State<SimState>,
                 Query(params): Query<HashMap<String, String>>| async move {
                    handle_get_slot(state, params, SlotProtocol::Program).await
                },
            ),
        )
        .route(
            SlotProtocol::Program.set_path(),
            post(
                |State(state): State<SimState>, Json(body): Json<Value>| async move {
                    handle_set_slot(state, body, SlotProtocol::Program).await
                },
            ),
        )
        .route(
            SlotProtocol::Program.erase_path(),
            post(
                |State(state): State<SimState>, Json(body): Json<Value>| async move {
                    handle_erase_slot(state, body, SlotProtocol::Program).await
                },
            ),
        )
        .route(
            SlotProtocol::ProgramSlot.get_base_path(),
            get(
                |State(state): State<SimState>,
                 Query(params): Query<HashMap<String, String>>| async move {
                    handle_get_slot(state, params, SlotProtocol::ProgramSlot).await
                },
            ),
        )
        .route(
            SlotProtocol::ProgramSlot.set_path(),
            post(
                |State(state): State<SimState>, Json(body): Json<Value>| async move {
                    handle_set_slot(state, body, SlotProtocol::ProgramSlot).await
                },
            ),
        )
        .route(
            SlotProtocol::ProgramSlot.erase_path(),
            post(
                |State(state): State<SimState>, Json(body): Json<Value>| async move {
                    handle_erase_slot(state, body, SlotProtocol::ProgramSlot).await
                },
            ),
        )
        .route(
            PATH_OTA_UPDATE,
            post(handle_ota_update).layer(DefaultBodyLimit::max(MAX_FIRMWARE_BYTES)),
        )
        .route(PATH_OTA_STATUS, post(handle_ota_status))
        .route(PATH_WIFI_CONNECT, post(handle_wifi_connect))
        .route(PATH_WIFI_STATUS, get(handle_wifi_status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Binds `addr` (port 0 picks a free port) and serves the simulator in the
/// background.
pub async fn spawn(addr: SocketAddr, state: SimState) -> anyhow::Result<RunningSim> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind device simulator at {addr}"))?;
    let addr = listener
        .local_addr()
        .context("failed to read simulator address")?;

    let app = router(state.clone());
    let task = tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            warn!("device simulator stopped: {err}");
        }
    });

    Ok(RunningSim { addr, state, task })
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let port = std::env::var("DEVICE_SIM_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind device simulator at {addr}"))?;

    info!("device simulator listening on http://{addr}");
    axum::serve(listener, router(SimState::default())).await?;
    Ok(())
}

async fn handle_get_status(State(state): State<SimState>) -> impl IntoResponse {
    let device = state.device.lock().await;
    Json(device.status_payload(schedule::minute_of_day(&Local::now())))
}

async fn handle_get_manual(State(state): State<SimState>) -> impl IntoResponse {
    let device = state.device.lock().await;
    Json(ManualConfigPayload {
        manual_pwm: Some(i64::from(device.manual.pwm)),
        mode: Some(device.mode_code),
    })
}

async fn handle_set_manual(State(state): State<SimState>, Json(body): Json<Value>) -> Response {
    let Some(pwm) = body.get("pwm").and_then(Value::as_i64) else {
        return error_response(StatusCode::BAD_REQUEST, "Missing or invalid 'pwm'");
    };

    let mut device = state.device.lock().await;
    device.manual = ManualConfig::new(pwm);
    device.set_mode(DeviceMode::Manual);
    info!(pwm = device.manual.pwm, "manual output stored");
    ok_response()
}

async fn handle_get_auto(State(state): State<SimState>) -> impl IntoResponse {
    let device = state.device.lock().await;
    Json(AutoConfigPayload {
        tmin: Some(i64::from(device.auto.tmin)),
        tmax: Some(i64::from(device.auto.tmax)),
        mode: Some(device.mode_code),
    })
}

async fn handle_set_auto(State(state): State<SimState>, Json(body): Json<Value>) -> Response {
    let bound = |key: &str| {
        body.get(key)
            .and_then(Value::as_i64)
            .map(|value| value.clamp(i32::MIN as i64, i32::MAX as i64) as i32)
    };
    let (Some(tmin), Some(tmax)) = (bound("tmin"), bound("tmax")) else {
        return error_response(StatusCode::BAD_REQUEST, "Missing or invalid 'tmin'/'tmax'");
    };

    let mut device = state.device.lock().await;
    device.auto = AutoConfig { tmin, tmax };
    device.set_mode(DeviceMode::Auto);
    info!(tmin, tmax, "auto band stored");
    ok_response()
}

async fn handle_get_slot(
    state: SimState,
    params: HashMap<String, String>,
    protocol: SlotProtocol,
) -> Response {
    let id = match params
        .get(protocol.selector_key())
        .and_then(|raw| raw.trim().parse::<i64>().ok())
        .map(SlotId::new)
    {
        Some(Ok(id)) => id,
        _ => return error_response(StatusCode::BAD_REQUEST, "Invalid slot id"),
    };

    let slot = state.device.lock().await.slots[id.index()];
    match slot {
        Some(slot) => Json(protocol.encode_loaded(&slot)).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "Slot not found"),
    }
}

async fn handle_set_slot(state: SimState, body: Value, protocol: SlotProtocol) -> Response {
    let slot = match protocol.decode_set(body) {
        Ok(slot) => slot,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, &err.to_string()),
    };

    let mut device = state.device.lock().await;
    device.slots[slot.id.index()] = Some(slot);
    device.set_mode(DeviceMode::Scheduled);
    info!(slot = %slot.id, active = slot.active, "schedule slot stored");
    ok_response()
}

async fn handle_erase_slot(state: SimState, body: Value, protocol: SlotProtocol) -> Response {
    let id = match protocol.decode_selector(&body) {
        Ok(id) => id,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, &err.to_string()),
    };

    state.device.lock().await.slots[id.index()] = None;
    info!(slot = %id, "schedule slot erased");
    ok_response()
}

async fn handle_ota_update(State(state): State<SimState>, mut multipart: Multipart) -> Response {
    let mut image_len = None;
    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                if field.name() != Some(OTA_UPLOAD_FIELD) {
                    continue;
                }
                match field.bytes().await {
                    Ok(bytes) => image_len = Some(bytes.len()),
                    Err(err) => return error_response(StatusCode::BAD_REQUEST, &err.body_text()),
                }
            }
            Ok(None) => break,
            Err(err) => {
                warn!("rejected firmware upload: {err}");
                return error_response(StatusCode::BAD_REQUEST, &err.body_text());
            }
        }
    }

    let status = match image_len {
        Some(len) if len > 0 => FlashStatus::Complete,
        _ => FlashStatus::Failed,
    };

    let mut device = state.device.lock().await;
    device.ota_status = status;
    device.firmware_uploads += 1;
    info!(
        bytes = image_len.unwrap_or_default(),
        status = status.code(),
        "firmware image received"
    );
    ok_response()
}

async fn handle_ota_status(State(state): State<SimState>) -> impl IntoResponse {
    let device = state.device.lock().await;
    Json(OtaStatusPayload {
        ota_update_status: device.ota_status.code(),
        compile_date: device.compile_date.clone(),
        compile_time: device.compile_time.clone(),
    })
}

async fn handle_wifi_connect(
    State(state): State<SimState>,
    Json(request): Json<WifiConnectRequest>,
) -> Response {
    if request.selected_ssid.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'selectedSSID'");
    }

    let mut device = state.device.lock().await;
    info!(ssid = %request.selected_ssid, "wifi credentials received");
    device.wifi_ssid = Some(request.selected_ssid);
    device.wifi_status = WifiConnectStatus::Connecting;
    ok_response()
}

async fn handle_wifi_status(State(state): State<SimState>) -> impl IntoResponse {
    let device = state.device.lock().await;
    Json(WifiStatusPayload {
        wifi_connect_status: device.wifi_status.code(),
    })
}

fn ok_response() -> Response {
    Json(serde_json::json!({ "status": "ok" })).into_response()
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}
