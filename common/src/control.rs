use crate::{
    schedule::ScheduleSlot,
    types::{AutoConfig, DeviceMode, ManualConfig},
};

/// Everything the device's fan law looks at on one control cycle.
#[derive(Debug, Clone, Copy)]
pub struct ControlInputs<'a> {
    pub mode: Option<DeviceMode>,
    pub temp_c: f32,
    pub presence: bool,
    pub minute_of_day: u16,
    pub manual: ManualConfig,
    pub auto: AutoConfig,
    pub slots: &'a [ScheduleSlot],
}

/// Output percentage for a temperature ramped linearly from 0 % at `low` to
/// 100 % at `high`. A band with `high <= low` saturates at 100 %.
pub fn ramp_percent(temp_c: f32, low: i32, high: i32) -> u8 {
    if high <= low {
        100
    } else if temp_c <= low as f32 {
        0
    } else if temp_c >= high as f32 {
        100
    } else {
        // Widths past i32::MAX are fine in f32.
        let width = high as f32 - low as f32;
        ((temp_c - low as f32) * 100.0 / width) as u8
    }
}

/// Output level the device drives for the given inputs.
pub fn output_level(inputs: &ControlInputs<'_>) -> u8 {
    match inputs.mode {
        Some(DeviceMode::Manual) => inputs.manual.pwm,
        Some(DeviceMode::Auto) if inputs.presence => {
            ramp_percent(inputs.temp_c, inputs.auto.tmin, inputs.auto.tmax)
        }
        Some(DeviceMode::Scheduled) if inputs.presence => inputs
            .slots
            .iter()
            .filter(|slot| slot.active)
            .find(|slot| slot.contains_minute(inputs.minute_of_day))
            .map(|slot| {
                ramp_percent(
                    inputs.temp_c,
                    slot.output_at_0 as i32,
                    slot.output_at_100 as i32,
                )
            })
            .unwrap_or(0),
        // No presence, or an unknown mode: fan off.
        _ => 0,
    }
}
