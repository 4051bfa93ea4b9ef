use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    endpoints::{
        PATH_PROGRAM_ERASE, PATH_PROGRAM_GET, PATH_PROGRAM_SET, PATH_PROGRAM_SLOT_ERASE,
        PATH_PROGRAM_SLOT_GET, PATH_PROGRAM_SLOT_SET,
    },
    error::CodecError,
    schedule::{ScheduleSlot, SlotId},
    types::Flag,
};

/// Wire dialect of the schedule slot endpoints. Fixed per firmware build, so
/// it is chosen in configuration and never probed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotProtocol {
    /// `/get_program.json?id=N`, selector `id`, `active` as `0/1`.
    Program,
    /// `/program_slot_get.json?slot=N`, selector `slot`, `active` as a boolean.
    #[default]
    ProgramSlot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveEncoding {
    Integer,
    Boolean,
}

#[derive(Debug, Deserialize)]
struct SlotFields {
    active: Flag,
    h_start: i64,
    m_start: i64,
    h_end: i64,
    m_end: i64,
    t0: i64,
    t100: i64,
}

impl SlotFields {
    fn into_slot(self, id: SlotId) -> ScheduleSlot {
        let mut slot = ScheduleSlot {
            id,
            active: self.active.as_bool(),
            start_hour: saturate(self.h_start),
            start_minute: saturate(self.m_start),
            end_hour: saturate(self.h_end),
            end_minute: saturate(self.m_end),
            output_at_0: saturate(self.t0),
            output_at_100: saturate(self.t100),
        };
        slot.sanitize();
        slot
    }
}

fn saturate(value: i64) -> u8 {
    value.clamp(0, u8::MAX as i64) as u8
}

impl SlotProtocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Program => "program",
            Self::ProgramSlot => "program_slot",
        }
    }

    pub fn selector_key(self) -> &'static str {
        match self {
            Self::Program => "id",
            Self::ProgramSlot => "slot",
        }
    }

    pub fn active_encoding(self) -> ActiveEncoding {
        match self {
            Self::Program => ActiveEncoding::Integer,
            Self::ProgramSlot => ActiveEncoding::Boolean,
        }
    }

    pub fn get_base_path(self) -> &'static str {
        match self {
            Self::Program => PATH_PROGRAM_GET,
            Self::ProgramSlot => PATH_PROGRAM_SLOT_GET,
        }
    }

    pub fn get_path(self, id: SlotId) -> String {
        format!("{}?{}={}", self.get_base_path(), self.selector_key(), id)
    }

    pub fn set_path(self) -> &'static str {
        match self {
            Self::Program => PATH_PROGRAM_SET,
            Self::ProgramSlot => PATH_PROGRAM_SLOT_SET,
        }
    }

    pub fn erase_path(self) -> &'static str {
        match self {
            Self::Program => PATH_PROGRAM_ERASE,
            Self::ProgramSlot => PATH_PROGRAM_SLOT_ERASE,
        }
    }

    fn encode_active(self, active: bool) -> Value {
        match self.active_encoding() {
            ActiveEncoding::Integer => Value::from(u8::from(active)),
            ActiveEncoding::Boolean => Value::from(active),
        }
    }

    fn slot_fields(self, slot: &ScheduleSlot) -> Map<String, Value> {
        let mut body = Map::new();
        body.insert("active".into(), self.encode_active(slot.active));
        body.insert("h_start".into(), slot.start_hour.into());
        body.insert("m_start".into(), slot.start_minute.into());
        body.insert("h_end".into(), slot.end_hour.into());
        body.insert("m_end".into(), slot.end_minute.into());
        body.insert("t0".into(), slot.output_at_0.into());
        body.insert("t100".into(), slot.output_at_100.into());
        body
    }

    /// Body of a slot-set request: the selector plus every slot field.
    pub fn encode_set(self, slot: &ScheduleSlot) -> Value {
        let mut body = self.slot_fields(slot);
        body.insert(self.selector_key().into(), slot.id.get().into());
        Value::Object(body)
    }

    /// Body the device answers a slot-get request with.
    pub fn encode_loaded(self, slot: &ScheduleSlot) -> Value {
        Value::Object(self.slot_fields(slot))
    }

    pub fn encode_erase(self, id: SlotId) -> Value {
        let mut body = Map::new();
        body.insert(self.selector_key().into(), id.get().into());
        Value::Object(body)
    }

    pub fn decode_loaded(self, id: SlotId, body: &[u8]) -> Result<ScheduleSlot, CodecError> {
        let fields: SlotFields = serde_json::from_slice(body)?;
        Ok(fields.into_slot(id))
    }

    pub fn decode_selector(self, body: &Value) -> Result<SlotId, CodecError> {
        let key = self.selector_key();
        let id = body
            .get(key)
            .and_then(Value::as_i64)
            .ok_or(CodecError::MissingSelector(key))?;
        Ok(SlotId::new(id)?)
    }

    pub fn decode_set(self, body: Value) -> Result<ScheduleSlot, CodecError> {
        let id = self.decode_selector(&body)?;
        let fields: SlotFields = serde_json::from_value(body)?;
        Ok(fields.into_slot(id))
    }
}

impl FromStr for SlotProtocol {
    type Err = CodecError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "program" => Ok(Self::Program),
            "program_slot" => Ok(Self::ProgramSlot),
            other => Err(CodecError::UnknownProtocol(other.to_string())),
        }
    }
}
