// Colour temperature via the display gamma ramp (GDI SetDeviceGammaRamp)

use crate::display::{clamp_temperature, MAX_TEMPERATURE, MIN_TEMPERATURE, NEUTRAL_TEMPERATURE};
use anyhow::{Context, Result};
use tracing::{debug, info};

const RAMP_SIZE: usize = 256;
const DISPLAY_GAMMA: f64 = 2.2;

/// Per-channel lookup table in the layout GDI expects (3 x 256 WORDs)
#[repr(C)]
#[derive(Clone, PartialEq, Eq)]
pub struct GammaRamp {
    pub red: [u16; RAMP_SIZE],
    pub green: [u16; RAMP_SIZE],
    pub blue: [u16; RAMP_SIZE],
}

impl std::fmt::Debug for GammaRamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GammaRamp")
            .field("red_max", &self.red[RAMP_SIZE - 1])
            .field("green_max", &self.green[RAMP_SIZE - 1])
            .field("blue_max", &self.blue[RAMP_SIZE - 1])
            .finish()
    }
}

impl GammaRamp {
    /// Identity ramp the driver uses when nothing is tinting the screen
    pub fn linear() -> Self {
        let mut ramp = Self::zeroed();
        for i in 0..RAMP_SIZE {
            let v = to_word(i as f64 / 255.0);
            ramp.red[i] = v;
            ramp.green[i] = v;
            ramp.blue[i] = v;
        }
        ramp
    }

    pub fn for_temperature(kelvin: u32) -> Self {
        let (r_gain, g_gain, b_gain) = color_gains(kelvin);
        let mut ramp = Self::zeroed();

        for i in 0..RAMP_SIZE {
            // Linearize, scale by the channel gain, then re-encode
            let linear = (i as f64 / 255.0).powf(DISPLAY_GAMMA);
            ramp.red[i] = to_word(encode(linear * r_gain));
            ramp.green[i] = to_word(encode(linear * g_gain));
            ramp.blue[i] = to_word(encode(linear * b_gain));
        }
        ramp
    }

    fn zeroed() -> Self {
        Self {
            red: [0; RAMP_SIZE],
            green: [0; RAMP_SIZE],
            blue: [0; RAMP_SIZE],
        }
    }
}

fn encode(v: f64) -> f64 {
    v.powf(1.0 / DISPLAY_GAMMA).clamp(0.0, 1.0)
}

fn to_word(v: f64) -> u16 {
    (v * 65535.0 + 0.5) as u16
}

/// RGB gains for a colour temperature. Below 6500K blue and green are
/// attenuated, above it red and green are.
pub fn color_gains(kelvin: u32) -> (f64, f64, f64) {
    let k = clamp_temperature(kelvin) as f64;
    let neutral = NEUTRAL_TEMPERATURE as f64;

    let gains = if k <= neutral {
        let t = (k - MIN_TEMPERATURE as f64) / (neutral - MIN_TEMPERATURE as f64);
        (
            1.0,
            (0.8 + 0.2 * t).clamp(0.8, 1.0),
            (0.6 + 0.4 * t).clamp(0.6, 1.0),
        )
    } else {
        let u = (k - neutral) / (MAX_TEMPERATURE as f64 - neutral);
        (
            (1.0 - 0.2 * u).clamp(0.8, 1.0),
            (1.0 - 0.1 * u).clamp(0.9, 1.0),
            1.0,
        )
    };

    debug!(
        "Gains for {}K: R={:.2} G={:.2} B={:.2}",
        k, gains.0, gains.1, gains.2
    );
    gains
}

/// Something that accepts a gamma ramp (the screen DC on Windows)
pub trait GammaDevice {
    fn set_ramp(&mut self, ramp: &GammaRamp) -> Result<()>;
}

pub struct GammaController<D: GammaDevice> {
    device: Option<D>,
    temperature: Option<u32>,
}

impl<D: GammaDevice> GammaController<D> {
    pub fn new(device: D) -> Self {
        Self {
            device: Some(device),
            temperature: None,
        }
    }

    /// Controller without a screen device; every call fails
    pub fn unsupported() -> Self {
        Self {
            device: None,
            temperature: None,
        }
    }

    fn device(&mut self) -> Result<&mut D> {
        self.device
            .as_mut()
            .context("Gamma control is unavailable on this display")
    }

    #[cfg(test)]
    pub(crate) fn device_ref(&self) -> Option<&D> {
        self.device.as_ref()
    }

    /// Apply a colour temperature. Failures are returned, not retried.
    pub fn apply(&mut self, kelvin: u32) -> Result<()> {
        let kelvin = clamp_temperature(kelvin);
        let ramp = GammaRamp::for_temperature(kelvin);
        self.device()?
            .set_ramp(&ramp)
            .with_context(|| format!("Failed to apply colour temperature {}K", kelvin))?;
        self.temperature = Some(kelvin);
        info!("Colour temperature set to {}K", kelvin);
        Ok(())
    }

    /// Restore the linear ramp. Must run before exit so the screen is not left tinted.
    pub fn reset(&mut self) -> Result<()> {
        self.device()?
            .set_ramp(&GammaRamp::linear())
            .context("Failed to reset gamma ramp")?;
        self.temperature = None;
        info!("Gamma ramp reset to linear");
        Ok(())
    }

    /// Last temperature applied successfully, `None` when the ramp is linear
    pub fn temperature(&self) -> Option<u32> {
        self.temperature
    }
}

#[cfg(windows)]
pub use self::win::ScreenGamma;

#[cfg(windows)]
mod win {
    use super::{GammaDevice, GammaRamp};
    use anyhow::{bail, Result};
    use windows::Win32::Graphics::Gdi::{GetDC, ReleaseDC, HDC};
    use windows::Win32::UI::ColorSystem::SetDeviceGammaRamp;

    /// Device context for the whole screen, released on drop
    pub struct ScreenGamma {
        hdc: HDC,
    }

    impl ScreenGamma {
        pub fn open() -> Result<Self> {
            let hdc = unsafe { GetDC(None) };
            if hdc.is_invalid() {
                bail!("Could not get the screen device context");
            }
            Ok(Self { hdc })
        }
    }

    impl GammaDevice for ScreenGamma {
        fn set_ramp(&mut self, ramp: &GammaRamp) -> Result<()> {
            let ok = unsafe {
                SetDeviceGammaRamp(self.hdc, ramp as *const GammaRamp as *const core::ffi::c_void)
            };
            if !ok.as_bool() {
                bail!("SetDeviceGammaRamp rejected the ramp");
            }
            Ok(())
        }
    }

    impl Drop for ScreenGamma {
        fn drop(&mut self) {
            unsafe {
                ReleaseDC(None, self.hdc);
            }
        }
    }
}
