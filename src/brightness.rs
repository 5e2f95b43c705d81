// Monitor brightness through the DDC/CI monitor configuration API (Dxva2)

use crate::display::clamp_brightness;
use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Brightness as the monitor reports it, in its own units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeLevel {
    pub min: u32,
    pub current: u32,
    pub max: u32,
}

/// Map a 0-100 percentage onto the monitor's native range
pub fn percent_to_native(percent: u8, min: u32, max: u32) -> u32 {
    if max <= min {
        return min;
    }
    let span = (max - min) as f64;
    min + (percent.min(100) as f64 * span / 100.0).round() as u32
}

pub fn native_to_percent(level: &NativeLevel) -> u8 {
    if level.max <= level.min {
        return 100;
    }
    let pos = level.current.clamp(level.min, level.max) - level.min;
    let span = (level.max - level.min) as f64;
    (pos as f64 * 100.0 / span).round() as u8
}

/// Intermediate percentages for a stepped transition, ending exactly on `to`
pub fn fade_steps(from: u8, to: u8, steps: u32) -> Vec<u8> {
    if steps <= 1 || from == to {
        return vec![to];
    }
    let delta = to as f64 - from as f64;
    (1..=steps)
        .map(|i| (from as f64 + delta * i as f64 / steps as f64).round() as u8)
        .collect()
}

/// Something whose brightness can be read and written in native units
pub trait BrightnessDevice {
    fn level(&mut self) -> Result<NativeLevel>;
    fn set_level(&mut self, value: u32) -> Result<()>;
}

pub struct BrightnessController<D: BrightnessDevice> {
    device: Option<D>,
}

impl<D: BrightnessDevice> BrightnessController<D> {
    pub fn new(device: D) -> Self {
        Self {
            device: Some(device),
        }
    }

    /// Controller for a system without a brightness-capable monitor.
    /// Every call fails without touching the OS.
    pub fn unsupported() -> Self {
        Self { device: None }
    }

    pub fn is_supported(&self) -> bool {
        self.device.is_some()
    }

    fn device(&mut self) -> Result<&mut D> {
        self.device
            .as_mut()
            .context("No brightness-capable monitor detected")
    }

    #[cfg(test)]
    pub(crate) fn device_ref(&self) -> Option<&D> {
        self.device.as_ref()
    }

    /// Set brightness. Out-of-range values are clamped before the OS call.
    /// Returns the percentage actually requested from the monitor.
    pub fn apply(&mut self, percent: i64) -> Result<u8> {
        let percent = clamp_brightness(percent);
        let device = self.device()?;
        let level = device.level().context("Failed to query monitor brightness")?;
        let native = percent_to_native(percent, level.min, level.max);
        device
            .set_level(native)
            .with_context(|| format!("Failed to set brightness to {}%", percent))?;
        info!("Brightness set to {}% (native {})", percent, native);
        Ok(percent)
    }

    /// Current brightness as a percentage
    pub fn current(&mut self) -> Result<u8> {
        let level = self
            .device()?
            .level()
            .context("Failed to query monitor brightness")?;
        Ok(native_to_percent(&level))
    }

    /// Walk from the current level to `percent` in `steps` increments.
    /// Falls back to a direct set when the current level can't be read.
    pub fn fade_to(&mut self, percent: i64, steps: u32, step_delay: Duration) -> Result<u8> {
        let target = clamp_brightness(percent);
        let from = match self.current() {
            Ok(p) => p,
            Err(e) => {
                warn!("{:#}; setting brightness directly", e);
                return self.apply(target as i64);
            }
        };

        debug!("Fading brightness {}% -> {}% in {} steps", from, target, steps);
        let plan = fade_steps(from, target, steps);
        let last = plan.len() - 1;
        for (i, p) in plan.into_iter().enumerate() {
            self.apply(p as i64)?;
            if i < last && !step_delay.is_zero() {
                std::thread::sleep(step_delay);
            }
        }
        Ok(target)
    }
}

#[cfg(windows)]
pub use self::win::PrimaryMonitor;

#[cfg(windows)]
mod win {
    use super::{BrightnessDevice, NativeLevel};
    use anyhow::{bail, Context, Result};
    use windows::Win32::Devices::Display::{
        DestroyPhysicalMonitors, GetMonitorBrightness, GetNumberOfPhysicalMonitorsFromHMONITOR,
        GetPhysicalMonitorsFromHMONITOR, SetMonitorBrightness, PHYSICAL_MONITOR,
    };
    use windows::Win32::Foundation::POINT;
    use windows::Win32::Graphics::Gdi::{MonitorFromPoint, MONITOR_DEFAULTTOPRIMARY};

    /// Physical monitors behind the primary display, destroyed on drop
    pub struct PrimaryMonitor {
        monitors: Vec<PHYSICAL_MONITOR>,
    }

    impl PrimaryMonitor {
        pub fn open() -> Result<Self> {
            unsafe {
                let hmonitor = MonitorFromPoint(POINT { x: 0, y: 0 }, MONITOR_DEFAULTTOPRIMARY);

                let mut count = 0u32;
                GetNumberOfPhysicalMonitorsFromHMONITOR(hmonitor, &mut count)
                    .context("Failed to count physical monitors")?;
                if count == 0 {
                    bail!("No physical monitor behind the primary display");
                }

                let mut monitors = vec![PHYSICAL_MONITOR::default(); count as usize];
                GetPhysicalMonitorsFromHMONITOR(hmonitor, &mut monitors)
                    .context("Failed to open physical monitors")?;

                let mut device = Self { monitors };
                // DDC/CI is optional; probe once so unsupported panels are rejected up front
                device
                    .level()
                    .context("Primary monitor does not support brightness control")?;
                Ok(device)
            }
        }
    }

    impl BrightnessDevice for PrimaryMonitor {
        fn level(&mut self) -> Result<NativeLevel> {
            let mut level = NativeLevel {
                min: 0,
                current: 0,
                max: 0,
            };
            let ok = unsafe {
                GetMonitorBrightness(
                    self.monitors[0].hPhysicalMonitor,
                    &mut level.min,
                    &mut level.current,
                    &mut level.max,
                )
            };
            if ok == 0 {
                bail!("GetMonitorBrightness failed");
            }
            Ok(level)
        }

        fn set_level(&mut self, value: u32) -> Result<()> {
            let ok = unsafe { SetMonitorBrightness(self.monitors[0].hPhysicalMonitor, value) };
            if ok == 0 {
                bail!("SetMonitorBrightness failed");
            }
            Ok(())
        }
    }

    impl Drop for PrimaryMonitor {
        fn drop(&mut self) {
            unsafe {
                let _ = DestroyPhysicalMonitors(&self.monitors);
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use anyhow::bail;

    /// Monitor with a configurable native range that records every write
    pub(crate) struct FakeMonitor {
        pub min: u32,
        pub current: u32,
        pub max: u32,
        pub writes: Vec<u32>,
        pub fail_reads: bool,
    }

    impl FakeMonitor {
        pub fn new(min: u32, current: u32, max: u32) -> Self {
            Self {
                min,
                current,
                max,
                writes: Vec::new(),
                fail_reads: false,
            }
        }
    }

    impl BrightnessDevice for FakeMonitor {
        fn level(&mut self) -> Result<NativeLevel> {
            if self.fail_reads {
                bail!("read failed");
            }
            Ok(NativeLevel {
                min: self.min,
                current: self.current,
                max: self.max,
            })
        }

        fn set_level(&mut self, value: u32) -> Result<()> {
            self.current = value;
            self.writes.push(value);
            Ok(())
        }
    }

    #[test]
    fn converts_percent_into_native_range() {
        assert_eq!(percent_to_native(0, 10, 60), 10);
        assert_eq!(percent_to_native(50, 10, 60), 35);
        assert_eq!(percent_to_native(100, 10, 60), 60);
        assert_eq!(percent_to_native(40, 5, 5), 5);
    }

    #[test]
    fn native_percent_roundtrip_on_standard_range() {
        let level = NativeLevel {
            min: 0,
            current: 73,
            max: 100,
        };
        assert_eq!(native_to_percent(&level), 73);
    }

    #[test]
    fn out_of_range_percent_is_clamped_before_os_call() {
        let mut controller = BrightnessController::new(FakeMonitor::new(0, 50, 100));
        assert_eq!(controller.apply(150).unwrap(), 100);
        assert_eq!(controller.apply(-30).unwrap(), 0);
        assert_eq!(controller.device_ref().unwrap().writes, vec![100, 0]);
    }

    #[test]
    fn unsupported_monitor_fails_without_panicking() {
        let mut controller: BrightnessController<FakeMonitor> = BrightnessController::unsupported();
        assert!(!controller.is_supported());
        assert!(controller.apply(50).is_err());
        assert!(controller.current().is_err());
    }

    #[test]
    fn fade_ends_on_target() {
        assert_eq!(fade_steps(20, 80, 4), vec![35, 50, 65, 80]);
        assert_eq!(fade_steps(80, 80, 10), vec![80]);

        let mut controller = BrightnessController::new(FakeMonitor::new(0, 20, 100));
        controller.fade_to(60, 4, Duration::ZERO).unwrap();
        assert_eq!(controller.device_ref().unwrap().writes, vec![30, 40, 50, 60]);
    }

    #[test]
    fn fade_on_unreadable_monitor_is_reported() {
        let mut monitor = FakeMonitor::new(0, 20, 100);
        monitor.fail_reads = true;
        let mut controller = BrightnessController::new(monitor);
        assert!(controller.fade_to(60, 4, Duration::ZERO).is_err());
        assert!(controller.device_ref().unwrap().writes.is_empty());
    }
}
