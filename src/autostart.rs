// Registry-based autostart for Windows
// Uses HKCU\Software\Microsoft\Windows\CurrentVersion\Run

use anyhow::Result;
use std::path::Path;

#[cfg(windows)]
pub use self::win::{disable, enable, is_enabled};

#[cfg(windows)]
const RUN_KEY: &str = "Software\\Microsoft\\Windows\\CurrentVersion\\Run";
#[cfg(windows)]
const VALUE_NAME: &str = crate::config::APP_NAME;

/// Command line stored in the Run key: quoted exe path plus background flag
pub fn run_command(exe: &Path) -> String {
    format!("\"{}\" run --background", exe.display())
}

/// Which autostart state to trust when the settings file and the registry
/// disagree. The registry is what Windows actually acts on.
pub fn reconcile(setting: bool, registry: bool) -> bool {
    if setting != registry {
        tracing::warn!(
            "Settings say autostart={} but registry says {}; using registry",
            setting,
            registry
        );
    }
    registry
}

pub fn set_enabled(enabled: bool) -> Result<()> {
    if enabled {
        enable()
    } else {
        disable()
    }
}

#[cfg(windows)]
mod win {
    use super::{run_command, RUN_KEY, VALUE_NAME};
    use anyhow::{bail, Context, Result};
    use tracing::info;
    use windows::core::PCWSTR;
    use windows::Win32::Foundation::ERROR_FILE_NOT_FOUND;
    use windows::Win32::System::Registry::{
        RegCloseKey, RegDeleteValueW, RegOpenKeyExW, RegQueryValueExW, RegSetValueExW, HKEY,
        HKEY_CURRENT_USER, KEY_READ, KEY_WRITE, REG_SAM_FLAGS, REG_SZ,
    };

    fn wide_string(s: &str) -> Vec<u16> {
        s.encode_utf16().chain(std::iter::once(0)).collect()
    }

    /// Open handle to the Run key, closed on drop
    struct RunKey(HKEY);

    impl RunKey {
        fn open(access: REG_SAM_FLAGS) -> Result<Self> {
            let key_path = wide_string(RUN_KEY);
            let mut hkey = HKEY::default();
            unsafe {
                RegOpenKeyExW(
                    HKEY_CURRENT_USER,
                    PCWSTR(key_path.as_ptr()),
                    Some(0),
                    access,
                    &mut hkey,
                )
                .ok()
                .context("Failed to open the Run registry key")?;
            }
            Ok(Self(hkey))
        }
    }

    impl Drop for RunKey {
        fn drop(&mut self) {
            unsafe {
                let _ = RegCloseKey(self.0);
            }
        }
    }

    /// Enable autostart by setting registry value to current executable path
    pub fn enable() -> Result<()> {
        let key = RunKey::open(KEY_WRITE)?;
        let exe_path = std::env::current_exe().context("Could not locate the running executable")?;
        let command = run_command(&exe_path);
        let value_name = wide_string(VALUE_NAME);
        let data = wide_string(&command);
        let data_bytes =
            unsafe { std::slice::from_raw_parts(data.as_ptr() as *const u8, data.len() * 2) };

        unsafe {
            RegSetValueExW(
                key.0,
                PCWSTR(value_name.as_ptr()),
                Some(0),
                REG_SZ,
                Some(data_bytes),
            )
            .ok()
            .context("Failed to write the autostart registry value")?;
        }
        info!("Autostart enabled: {}", command);
        Ok(())
    }

    /// Disable autostart by removing the registry value.
    /// A value that was never there counts as success.
    pub fn disable() -> Result<()> {
        let key = RunKey::open(KEY_WRITE)?;
        let value_name = wide_string(VALUE_NAME);
        let result = unsafe { RegDeleteValueW(key.0, PCWSTR(value_name.as_ptr())) };
        if result.is_err() && result != ERROR_FILE_NOT_FOUND {
            bail!("Failed to remove the autostart registry value ({:?})", result);
        }
        info!("Autostart disabled");
        Ok(())
    }

    /// Check if autostart is currently enabled
    pub fn is_enabled() -> bool {
        let Ok(key) = RunKey::open(KEY_READ) else {
            return false;
        };
        let value_name = wide_string(VALUE_NAME);
        unsafe {
            RegQueryValueExW(key.0, PCWSTR(value_name.as_ptr()), None, None, None, None).is_ok()
        }
    }
}

#[cfg(not(windows))]
pub fn enable() -> Result<()> {
    anyhow::bail!("Autostart registration is only available on Windows")
}

#[cfg(not(windows))]
pub fn disable() -> Result<()> {
    anyhow::bail!("Autostart registration is only available on Windows")
}

#[cfg(not(windows))]
pub fn is_enabled() -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn run_command_quotes_path_with_spaces() {
        let exe = PathBuf::from("C:/Program Files/Eye Protector/eyeprotector.exe");
        assert_eq!(
            run_command(&exe),
            "\"C:/Program Files/Eye Protector/eyeprotector.exe\" run --background"
        );
    }

    #[test]
    fn registry_state_wins() {
        assert!(reconcile(false, true));
        assert!(!reconcile(true, false));
        assert!(reconcile(true, true));
    }
}
