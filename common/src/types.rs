use serde::{Deserialize, Serialize};

/// Operating mode as the device encodes it on the wire (`0`, `1`, `2`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceMode {
    Manual,
    Auto,
    Scheduled,
}

impl DeviceMode {
    pub const ALL: [DeviceMode; 3] = [Self::Manual, Self::Auto, Self::Scheduled];

    pub fn code(self) -> u8 {
        match self {
            Self::Manual => 0,
            Self::Auto => 1,
            Self::Scheduled => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Manual),
            1 => Some(Self::Auto),
            2 => Some(Self::Scheduled),
            _ => None,
        }
    }

    pub fn index(self) -> usize {
        self.code() as usize
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Manual => "Manual",
            Self::Auto => "Automático",
            Self::Scheduled => "Programado",
        }
    }
}

/// Mode field of a status report. Codes outside the known set are kept so
/// the reconciler can fall back to an unknown state instead of guessing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportedMode {
    Known(DeviceMode),
    Unrecognized(i64),
}

impl ReportedMode {
    pub fn from_code(code: i64) -> Self {
        DeviceMode::from_code(code)
            .map(Self::Known)
            .unwrap_or(Self::Unrecognized(code))
    }

    pub fn known(self) -> Option<DeviceMode> {
        match self {
            Self::Known(mode) => Some(mode),
            Self::Unrecognized(_) => None,
        }
    }
}

/// Boolean the firmware sends either as a JSON literal or as `0/1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Flag {
    Bool(bool),
    Int(i64),
}

impl Flag {
    pub fn as_bool(self) -> bool {
        match self {
            Self::Bool(value) => value,
            Self::Int(value) => value != 0,
        }
    }
}

/// Body of `GET /status.json`. Sensors that are not ready are omitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pir: Option<Flag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pwm: Option<i64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DeviceStatus {
    pub temperature: Option<f32>,
    pub presence: Option<bool>,
    pub mode: Option<ReportedMode>,
    pub output_level: Option<u8>,
}

impl From<StatusPayload> for DeviceStatus {
    fn from(payload: StatusPayload) -> Self {
        Self {
            temperature: payload.temp.filter(|temp| temp.is_finite()),
            presence: payload.pir.map(Flag::as_bool),
            mode: payload.mode.map(ReportedMode::from_code),
            output_level: payload.pwm.map(|pwm| pwm.clamp(0, 100) as u8),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ManualConfig {
    pub pwm: u8,
}

impl ManualConfig {
    pub fn new(pwm: i64) -> Self {
        Self {
            pwm: pwm.clamp(0, 100) as u8,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoConfig {
    pub tmin: i32,
    pub tmax: i32,
}

/// Body of `GET /get_manual_config.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManualConfigPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual_pwm: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<i64>,
}

/// Body of `POST /manual_pwm.json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PwmUpdate {
    pub pwm: i64,
}

/// Body of `GET /auto_config.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutoConfigPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tmin: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tmax: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WifiConnectRequest {
    #[serde(rename = "selectedSSID")]
    pub selected_ssid: String,
    pub pwd: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WifiStatusPayload {
    pub wifi_connect_status: i32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WifiConnectStatus {
    #[default]
    Idle,
    Connecting,
    Failed,
    Connected,
}

impl WifiConnectStatus {
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => Self::Connecting,
            2 => Self::Failed,
            3 => Self::Connected,
            _ => Self::Idle,
        }
    }

    pub fn code(self) -> i32 {
        match self {
            Self::Idle => 0,
            Self::Connecting => 1,
            Self::Failed => 2,
            Self::Connected => 3,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Idle => "Sin conexión",
            Self::Connecting => "Conectando...",
            Self::Failed => "Error de conexión",
            Self::Connected => "Conectado",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn status_accepts_integer_and_boolean_presence() {
        let numeric: StatusPayload =
            serde_json::from_str(r#"{"temp":21.3,"pir":1,"mode":1,"pwm":40}"#).unwrap();
        let literal: StatusPayload = serde_json::from_str(r#"{"pir":false}"#).unwrap();

        assert_eq!(
            DeviceStatus::from(numeric),
            DeviceStatus {
                temperature: Some(21.3),
                presence: Some(true),
                mode: Some(ReportedMode::Known(DeviceMode::Auto)),
                output_level: Some(40),
            }
        );
        assert_eq!(DeviceStatus::from(literal).presence, Some(false));
    }

    #[test]
    fn missing_fields_stay_absent() {
        let payload: StatusPayload = serde_json::from_str("{}").unwrap();
        assert_eq!(DeviceStatus::from(payload), DeviceStatus::default());
    }

    #[test]
    fn unknown_mode_code_is_preserved() {
        let payload: StatusPayload = serde_json::from_str(r#"{"mode":7}"#).unwrap();
        let status = DeviceStatus::from(payload);

        assert_eq!(status.mode, Some(ReportedMode::Unrecognized(7)));
        assert_eq!(status.mode.and_then(ReportedMode::known), None);
    }

    #[test]
    fn manual_config_clamps_pwm() {
        assert_eq!(ManualConfig::new(140).pwm, 100);
        assert_eq!(ManualConfig::new(-3).pwm, 0);
    }

    #[test]
    fn wifi_request_uses_device_field_names() {
        let body = serde_json::to_value(WifiConnectRequest {
            selected_ssid: "casa".to_string(),
            pwd: "secret".to_string(),
            timestamp: 1_700_000_000_000,
        })
        .unwrap();

        assert_eq!(
            body,
            serde_json::json!({"selectedSSID": "casa", "pwd": "secret", "timestamp": 1_700_000_000_000i64})
        );
    }
}
