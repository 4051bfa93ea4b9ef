use std::fmt;

use chrono::Timelike;

use crate::error::ValidationError;

pub const SLOT_COUNT: u8 = 3;

/// Minutes since local midnight for a wall-clock time.
pub fn minute_of_day<T: Timelike>(now: &T) -> u16 {
    (now.hour() * 60 + now.minute()) as u16
}

/// Selector for one of the device's schedule slots (1-3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotId(u8);

impl SlotId {
    pub const FIRST: SlotId = SlotId(1);
    pub const ALL: [SlotId; SLOT_COUNT as usize] = [SlotId(1), SlotId(2), SlotId(3)];

    pub fn new(id: i64) -> Result<Self, ValidationError> {
        if (1..=SLOT_COUNT as i64).contains(&id) {
            Ok(Self(id as u8))
        } else {
            Err(ValidationError::InvalidSlotId(id))
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }

    pub fn index(self) -> usize {
        (self.0 - 1) as usize
    }
}

impl Default for SlotId {
    fn default() -> Self {
        Self::FIRST
    }
}

impl TryFrom<i64> for SlotId {
    type Error = ValidationError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One time-of-day window with a linear output ramp between two temperatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleSlot {
    pub id: SlotId,
    pub active: bool,
    pub start_hour: u8,
    pub start_minute: u8,
    pub end_hour: u8,
    pub end_minute: u8,
    /// Temperature (°C) at which output starts rising from 0 %.
    pub output_at_0: u8,
    /// Temperature (°C) at which output reaches 100 %.
    pub output_at_100: u8,
}

impl ScheduleSlot {
    pub fn inactive(id: SlotId) -> Self {
        Self {
            id,
            active: false,
            start_hour: 0,
            start_minute: 0,
            end_hour: 0,
            end_minute: 0,
            output_at_0: 0,
            output_at_100: 0,
        }
    }

    pub fn sanitize(&mut self) {
        self.start_hour = self.start_hour.min(23);
        self.start_minute = self.start_minute.min(59);
        self.end_hour = self.end_hour.min(23);
        self.end_minute = self.end_minute.min(59);
        self.output_at_0 = self.output_at_0.min(100);
        self.output_at_100 = self.output_at_100.min(100);
    }

    pub fn start_minutes(&self) -> u16 {
        self.start_hour as u16 * 60 + self.start_minute as u16
    }

    pub fn end_minutes(&self) -> u16 {
        self.end_hour as u16 * 60 + self.end_minute as u16
    }

    /// Whether `minute_of_day` falls inside `[start, end)`. A window whose
    /// start is after its end wraps midnight; an empty window never matches.
    pub fn contains_minute(&self, minute_of_day: u16) -> bool {
        let start = self.start_minutes();
        let end = self.end_minutes();

        if start == end {
            false
        } else if start < end {
            (start..end).contains(&minute_of_day)
        } else {
            minute_of_day >= start || minute_of_day < end
        }
    }

    pub fn is_open_at<T: Timelike>(&self, now: &T) -> bool {
        self.active && self.contains_minute(minute_of_day(now))
    }
}
