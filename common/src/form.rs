//! Editable form state for the three configuration panels.
//!
//! Fields hold raw user input. Converting a form into a config never fails:
//! numeric text that does not start with an integer becomes `0`, so the
//! device never receives an empty or non-numeric value.

use crate::{
    schedule::{ScheduleSlot, SlotId},
    types::{AutoConfig, ManualConfig},
};

/// Leading-integer parse: optional sign followed by digits, anything after
/// the digits is ignored. Input without leading digits yields `0`.
pub fn parse_int_field(raw: &str) -> i64 {
    let trimmed = raw.trim_start();
    let (negative, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };

    let end = digits
        .bytes()
        .position(|byte| !byte.is_ascii_digit())
        .unwrap_or(digits.len());

    let magnitude = digits[..end]
        .bytes()
        .fold(0i64, |acc, byte| {
            acc.saturating_mul(10).saturating_add((byte - b'0') as i64)
        });

    if negative {
        -magnitude
    } else {
        magnitude
    }
}

fn parse_clamped(raw: &str, max: i64) -> u8 {
    parse_int_field(raw).clamp(0, max) as u8
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManualForm {
    pub pwm: String,
}

impl ManualForm {
    pub fn to_config(&self) -> ManualConfig {
        ManualConfig::new(parse_int_field(&self.pwm))
    }

    pub fn fill(&mut self, config: &ManualConfig) {
        self.pwm = config.pwm.to_string();
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AutoForm {
    pub tmin: String,
    pub tmax: String,
}

impl AutoForm {
    /// No ordering between `tmin` and `tmax` is imposed here; the device
    /// decides what to do with an inverted band.
    pub fn to_config(&self) -> AutoConfig {
        let narrow = |raw: &str| parse_int_field(raw).clamp(i32::MIN as i64, i32::MAX as i64) as i32;
        AutoConfig {
            tmin: narrow(&self.tmin),
            tmax: narrow(&self.tmax),
        }
    }

    pub fn fill(&mut self, config: &AutoConfig) {
        self.tmin = config.tmin.to_string();
        self.tmax = config.tmax.to_string();
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotForm {
    pub active: bool,
    pub start_hour: String,
    pub start_minute: String,
    pub end_hour: String,
    pub end_minute: String,
    pub output_at_0: String,
    pub output_at_100: String,
}

impl SlotForm {
    pub fn to_slot(&self, id: SlotId) -> ScheduleSlot {
        ScheduleSlot {
            id,
            active: self.active,
            start_hour: parse_clamped(&self.start_hour, 23),
            start_minute: parse_clamped(&self.start_minute, 59),
            end_hour: parse_clamped(&self.end_hour, 23),
            end_minute: parse_clamped(&self.end_minute, 59),
            output_at_0: parse_clamped(&self.output_at_0, 100),
            output_at_100: parse_clamped(&self.output_at_100, 100),
        }
    }

    pub fn fill(&mut self, slot: &ScheduleSlot) {
        self.active = slot.active;
        self.start_hour = slot.start_hour.to_string();
        self.start_minute = slot.start_minute.to_string();
        self.end_hour = slot.end_hour.to_string();
        self.end_minute = slot.end_minute.to_string();
        self.output_at_0 = slot.output_at_0.to_string();
        self.output_at_100 = slot.output_at_100.to_string();
    }
}
