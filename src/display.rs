// Display setting shared by the gamma and brightness controllers

use serde::{Deserialize, Serialize};

/// Lowest colour temperature the ramp generator accepts (Kelvin)
pub const MIN_TEMPERATURE: u32 = 1000;
/// Highest colour temperature the ramp generator accepts (Kelvin)
pub const MAX_TEMPERATURE: u32 = 10000;
/// Neutral white point, produces gains of 1.0 on every channel
pub const NEUTRAL_TEMPERATURE: u32 = 6500;
/// Step used by the warmer/cooler hotkeys
pub const TEMPERATURE_STEP: u32 = 250;

pub const MAX_BRIGHTNESS: u8 = 100;

/// Colour temperature and brightness pair.
/// Values are clamped with [`DisplaySetting::clamped`] before any OS call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplaySetting {
    pub temperature: u32,
    pub brightness: u8,
}

impl Default for DisplaySetting {
    fn default() -> Self {
        Self {
            temperature: NEUTRAL_TEMPERATURE,
            brightness: 80,
        }
    }
}

impl DisplaySetting {
    pub fn new(temperature: u32, brightness: u8) -> Self {
        Self {
            temperature,
            brightness,
        }
    }

    pub fn clamped(self) -> Self {
        Self {
            temperature: clamp_temperature(self.temperature),
            brightness: clamp_brightness(self.brightness as i64),
        }
    }
}

pub fn clamp_temperature(kelvin: u32) -> u32 {
    kelvin.clamp(MIN_TEMPERATURE, MAX_TEMPERATURE)
}

/// Clamp any integer percentage into 0..=100
pub fn clamp_brightness(percent: i64) -> u8 {
    percent.clamp(0, MAX_BRIGHTNESS as i64) as u8
}
