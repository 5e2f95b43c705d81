// Global hotkeys using Win32 RegisterHotKey, serviced by a listener thread
//
// The listener thread owns the registrations and forwards WM_HOTKEY to the
// host window with PostMessageW, so actions always run on the UI thread.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::{info, warn};

// Modifier flags as RegisterHotKey expects them. Plain copies so key strings
// parse and print on any target; `mod win` checks them against windows-rs.
pub const MOD_ALT: u32 = 0x0001;
pub const MOD_CONTROL: u32 = 0x0002;
pub const MOD_SHIFT: u32 = 0x0004;
pub const MOD_WIN: u32 = 0x0008;

/// What a hotkey does when pressed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HotkeyAction {
    /// Apply a named display profile
    Profile(String),
    ToggleReminder,
    ResetDisplay,
    Warmer,
    Cooler,
}

impl fmt::Display for HotkeyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HotkeyAction::Profile(name) => write!(f, "profile '{}'", name),
            HotkeyAction::ToggleReminder => f.write_str("toggle reminder"),
            HotkeyAction::ResetDisplay => f.write_str("reset display"),
            HotkeyAction::Warmer => f.write_str("warmer"),
            HotkeyAction::Cooler => f.write_str("cooler"),
        }
    }
}

/// Key combination string bound to an action, as stored in settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotkeyBinding {
    pub keys: String,
    pub action: HotkeyAction,
}

impl HotkeyBinding {
    pub fn new(keys: &str, action: HotkeyAction) -> Self {
        Self {
            keys: keys.to_string(),
            action,
        }
    }
}

/// Parsed key combination: modifier mask plus a virtual-key code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyCombo {
    pub modifiers: u32,
    pub vk: u32,
}

impl FromStr for KeyCombo {
    type Err = anyhow::Error;

    /// Accepts `Ctrl+Alt+1` as well as the `<ctrl>+<alt>+1` form.
    fn from_str(s: &str) -> Result<Self> {
        let mut modifiers = 0;
        let mut vk = None;

        for raw in s.split('+') {
            let part = raw.trim();
            let part = part
                .strip_prefix('<')
                .and_then(|p| p.strip_suffix('>'))
                .unwrap_or(part)
                .to_ascii_lowercase();

            let modifier = match part.as_str() {
                "ctrl" | "control" => Some(MOD_CONTROL),
                "alt" => Some(MOD_ALT),
                "shift" => Some(MOD_SHIFT),
                "win" | "super" | "cmd" => Some(MOD_WIN),
                _ => None,
            };
            if let Some(m) = modifier {
                modifiers |= m;
                continue;
            }

            let code = key_code(&part)
                .with_context(|| format!("Unknown key '{}' in hotkey '{}'", raw.trim(), s))?;
            if vk.replace(code).is_some() {
                bail!("Hotkey '{}' has more than one non-modifier key", s);
            }
        }

        let Some(vk) = vk else {
            bail!("Hotkey '{}' has no key", s);
        };
        if modifiers == 0 {
            bail!("Hotkey '{}' needs at least one modifier", s);
        }
        Ok(Self { modifiers, vk })
    }
}

impl fmt::Display for KeyCombo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = Vec::new();
        if self.modifiers & MOD_CONTROL != 0 {
            parts.push("Ctrl".into());
        }
        if self.modifiers & MOD_ALT != 0 {
            parts.push("Alt".into());
        }
        if self.modifiers & MOD_SHIFT != 0 {
            parts.push("Shift".into());
        }
        if self.modifiers & MOD_WIN != 0 {
            parts.push("Win".into());
        }
        parts.push(key_name(self.vk));
        f.write_str(&parts.join("+"))
    }
}

const NAMED_KEYS: &[(&str, u32)] = &[
    ("space", 0x20),
    ("pageup", 0x21),
    ("pagedown", 0x22),
    ("end", 0x23),
    ("home", 0x24),
    ("left", 0x25),
    ("up", 0x26),
    ("right", 0x27),
    ("down", 0x28),
    ("insert", 0x2D),
    ("delete", 0x2E),
];

/// Virtual-key code for a lower-case key name
fn key_code(name: &str) -> Option<u32> {
    let bytes = name.as_bytes();
    if bytes.len() == 1 {
        let c = bytes[0];
        if c.is_ascii_digit() || c.is_ascii_lowercase() {
            return Some(c.to_ascii_uppercase() as u32);
        }
    }
    if let Some(n) = name.strip_prefix('f').and_then(|n| n.parse::<u32>().ok()) {
        if (1..=24).contains(&n) {
            return Some(0x70 + n - 1);
        }
    }
    let alias = match name {
        "pgup" | "prior" => "pageup",
        "pgdn" | "next" => "pagedown",
        "del" => "delete",
        "ins" => "insert",
        other => other,
    };
    NAMED_KEYS
        .iter()
        .find(|(n, _)| *n == alias)
        .map(|(_, code)| *code)
}

fn key_name(vk: u32) -> String {
    match vk {
        0x30..=0x39 | 0x41..=0x5A => char::from(vk as u8).to_string(),
        0x70..=0x87 => format!("F{}", vk - 0x70 + 1),
        _ => match NAMED_KEYS.iter().find(|(_, code)| *code == vk) {
            Some((name, _)) => {
                let mut chars = name.chars();
                match chars.next() {
                    Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                    None => String::new(),
                }
            }
            None => format!("0x{:02X}", vk),
        },
    }
}

/// Registers combinations with the OS on the manager's behalf
pub trait HotkeyBackend {
    fn register(&mut self, id: i32, combo: KeyCombo) -> Result<()>;
    fn unregister(&mut self, id: i32) -> Result<()>;
}

struct Registered {
    combo: KeyCombo,
    action: HotkeyAction,
}

pub struct HotkeyManager<B: HotkeyBackend> {
    backend: B,
    registered: BTreeMap<i32, Registered>,
    next_id: i32,
}

impl<B: HotkeyBackend> HotkeyManager<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            registered: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Register one binding. Parse errors and conflicts are returned as errors.
    pub fn register(&mut self, binding: &HotkeyBinding) -> Result<i32> {
        let combo: KeyCombo = binding.keys.parse()?;
        if self.registered.values().any(|r| r.combo == combo) {
            bail!("Hotkey {} is bound twice", combo);
        }

        let id = self.next_id;
        self.backend
            .register(id, combo)
            .with_context(|| format!("Hotkey {} is unavailable", combo))?;
        self.next_id += 1;

        info!("Registered hotkey {} -> {}", combo, binding.action);
        self.registered.insert(
            id,
            Registered {
                combo,
                action: binding.action.clone(),
            },
        );
        Ok(id)
    }

    /// Register every binding, logging the ones that fail.
    /// Returns how many were registered.
    pub fn register_all(&mut self, bindings: &[HotkeyBinding]) -> usize {
        let mut ok = 0;
        for binding in bindings {
            match self.register(binding) {
                Ok(_) => ok += 1,
                Err(e) => warn!("{:#}", e),
            }
        }
        ok
    }

    pub fn unregister(&mut self, id: i32) {
        if let Some(r) = self.registered.remove(&id) {
            if let Err(e) = self.backend.unregister(id) {
                warn!("Failed to unregister hotkey {}: {:#}", r.combo, e);
            }
        }
    }

    pub fn unregister_all(&mut self) {
        let ids: Vec<i32> = self.registered.keys().copied().collect();
        for id in ids {
            self.unregister(id);
        }
    }

    /// Action bound to a hotkey id delivered by the OS
    pub fn action_for(&self, id: i32) -> Option<&HotkeyAction> {
        self.registered.get(&id).map(|r| &r.action)
    }

    pub fn len(&self) -> usize {
        self.registered.len()
    }
}

#[cfg(windows)]
pub use self::win::{HotkeyListener, WM_APP_HOTKEY};

#[cfg(windows)]
mod win {
    use super::{HotkeyBackend, KeyCombo};
    use anyhow::{anyhow, Context, Result};
    use std::sync::mpsc::{self, Receiver, Sender};
    use std::thread::JoinHandle;
    use tracing::debug;
    use windows::Win32::Foundation::{HWND, LPARAM, WPARAM};
    use windows::Win32::System::Threading::GetCurrentThreadId;
    use windows::Win32::UI::Input::KeyboardAndMouse::{
        RegisterHotKey, UnregisterHotKey, HOT_KEY_MODIFIERS, MOD_ALT, MOD_CONTROL, MOD_NOREPEAT,
        MOD_SHIFT, MOD_WIN,
    };
    use windows::Win32::UI::WindowsAndMessaging::{
        GetMessageW, PeekMessageW, PostMessageW, PostThreadMessageW, MSG, PM_NOREMOVE, WM_APP,
        WM_HOTKEY, WM_QUIT, WM_USER,
    };

    /// Posted to the host window when a hotkey fires; wparam carries the hotkey id
    pub const WM_APP_HOTKEY: u32 = WM_APP + 2;

    /// Thread message telling the listener to drain its command channel
    const WM_LISTENER_COMMAND: u32 = WM_APP + 1;

    /// Portable modifier mask to windows-rs flags, always with MOD_NOREPEAT
    fn to_os_modifiers(mask: u32) -> HOT_KEY_MODIFIERS {
        [
            (super::MOD_ALT, MOD_ALT),
            (super::MOD_CONTROL, MOD_CONTROL),
            (super::MOD_SHIFT, MOD_SHIFT),
            (super::MOD_WIN, MOD_WIN),
        ]
        .into_iter()
        .filter(|(bit, _)| mask & bit != 0)
        .fold(MOD_NOREPEAT, |acc, (_, flag)| acc | flag)
    }

    enum Command {
        Register {
            id: i32,
            combo: KeyCombo,
            reply: Sender<Result<()>>,
        },
        Unregister {
            id: i32,
        },
    }

    // HWND is a raw pointer; only its value crosses the thread boundary
    struct HwndWrapper(isize);
    unsafe impl Send for HwndWrapper {}

    /// Background thread that owns all hotkey registrations
    pub struct HotkeyListener {
        thread_id: u32,
        commands: Sender<Command>,
        handle: Option<JoinHandle<()>>,
    }

    impl HotkeyListener {
        pub fn spawn(target: HWND) -> Result<Self> {
            let (commands, command_rx) = mpsc::channel();
            let (ready_tx, ready_rx) = mpsc::channel();
            let target = HwndWrapper(target.0 as isize);

            let handle = std::thread::Builder::new()
                .name("hotkey-listener".into())
                .spawn(move || run(target, command_rx, ready_tx))
                .context("Failed to spawn hotkey listener thread")?;
            let thread_id = ready_rx
                .recv()
                .context("Hotkey listener exited during startup")?;

            Ok(Self {
                thread_id,
                commands,
                handle: Some(handle),
            })
        }

        fn send(&self, command: Command) -> Result<()> {
            self.commands
                .send(command)
                .map_err(|_| anyhow!("Hotkey listener is not running"))?;
            unsafe {
                PostThreadMessageW(self.thread_id, WM_LISTENER_COMMAND, WPARAM(0), LPARAM(0))
            }
            .context("Failed to wake hotkey listener")
        }
    }

    impl HotkeyBackend for HotkeyListener {
        fn register(&mut self, id: i32, combo: KeyCombo) -> Result<()> {
            let (reply, reply_rx) = mpsc::channel();
            self.send(Command::Register { id, combo, reply })?;
            reply_rx
                .recv()
                .context("Hotkey listener dropped the request")?
        }

        fn unregister(&mut self, id: i32) -> Result<()> {
            self.send(Command::Unregister { id })
        }
    }

    impl Drop for HotkeyListener {
        fn drop(&mut self) {
            unsafe {
                let _ = PostThreadMessageW(self.thread_id, WM_QUIT, WPARAM(0), LPARAM(0));
            }
            if let Some(handle) = self.handle.take() {
                let _ = handle.join();
            }
        }
    }

    fn run(target: HwndWrapper, commands: Receiver<Command>, ready: Sender<u32>) {
        let target = HWND(target.0 as *mut core::ffi::c_void);
        let mut owned: Vec<i32> = Vec::new();

        unsafe {
            let mut msg = MSG::default();
            // Create the thread's message queue before anyone posts to it
            let _ = PeekMessageW(&mut msg, None, WM_USER, WM_USER, PM_NOREMOVE);
            if ready.send(GetCurrentThreadId()).is_err() {
                return;
            }
            debug!("Hotkey listener started");

            while GetMessageW(&mut msg, None, 0, 0).as_bool() {
                match msg.message {
                    WM_HOTKEY => {
                        let _ = PostMessageW(Some(target), WM_APP_HOTKEY, msg.wParam, LPARAM(0));
                    }
                    WM_LISTENER_COMMAND => {
                        for command in commands.try_iter() {
                            match command {
                                Command::Register { id, combo, reply } => {
                                    let mods = to_os_modifiers(combo.modifiers);
                                    let result = RegisterHotKey(None, id, mods, combo.vk)
                                        .map_err(|e| anyhow!("RegisterHotKey failed: {}", e));
                                    if result.is_ok() {
                                        owned.push(id);
                                    }
                                    let _ = reply.send(result);
                                }
                                Command::Unregister { id } => {
                                    owned.retain(|&o| o != id);
                                    let _ = UnregisterHotKey(None, id);
                                }
                            }
                        }
                    }
                    _ => {}
                }
            }

            for id in owned {
                let _ = UnregisterHotKey(None, id);
            }
        }
        debug!("Hotkey listener stopped");
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    /// Backend that refuses combinations "owned by another application"
    #[derive(Default)]
    struct FakeBackend {
        taken: Vec<KeyCombo>,
        active: BTreeMap<i32, KeyCombo>,
    }

    impl HotkeyBackend for FakeBackend {
        fn register(&mut self, id: i32, combo: KeyCombo) -> Result<()> {
            if self.taken.contains(&combo) {
                bail!("already registered by another application");
            }
            self.active.insert(id, combo);
            Ok(())
        }

        fn unregister(&mut self, id: i32) -> Result<()> {
            self.active.remove(&id);
            Ok(())
        }
    }

    #[test]
    fn parses_both_notations_to_same_combo() {
        let a: KeyCombo = "Ctrl+Alt+1".parse().unwrap();
        let b: KeyCombo = "<ctrl>+<alt>+1".parse().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.modifiers, MOD_CONTROL | MOD_ALT);
        assert_eq!(a.vk, 0x31);
    }

    #[test]
    fn parses_named_and_function_keys() {
        let combo: KeyCombo = "control + shift + f5".parse().unwrap();
        assert_eq!(combo.vk, 0x74);
        assert_eq!(combo.to_string(), "Ctrl+Shift+F5");

        let combo: KeyCombo = "Ctrl+Alt+End".parse().unwrap();
        assert_eq!(combo.vk, 0x23);
        assert_eq!(combo.to_string(), "Ctrl+Alt+End");

        let combo: KeyCombo = "Win+PgUp".parse().unwrap();
        assert_eq!(combo.to_string(), "Win+Pageup");
    }

    #[test]
    fn rejects_malformed_combinations() {
        assert!("Ctrl+Alt".parse::<KeyCombo>().is_err());
        assert!("1".parse::<KeyCombo>().is_err());
        assert!("Ctrl+Banana".parse::<KeyCombo>().is_err());
        assert!("Ctrl+A+B".parse::<KeyCombo>().is_err());
        assert!("Ctrl+F25".parse::<KeyCombo>().is_err());
    }

    #[test]
    fn registration_failures_are_reported_not_fatal() {
        let backend = FakeBackend {
            taken: vec!["Ctrl+Alt+2".parse().unwrap()],
            ..Default::default()
        };
        let mut manager = HotkeyManager::new(backend);

        let bindings = vec![
            HotkeyBinding::new("Ctrl+Alt+1", HotkeyAction::Profile("Night Mode".into())),
            HotkeyBinding::new("Ctrl+Alt+2", HotkeyAction::Profile("Reading".into())),
            HotkeyBinding::new("Ctrl+Nope", HotkeyAction::ResetDisplay),
            HotkeyBinding::new("<ctrl>+<alt>+1", HotkeyAction::ToggleReminder),
            HotkeyBinding::new("Ctrl+Alt+R", HotkeyAction::ToggleReminder),
        ];
        assert_eq!(manager.register_all(&bindings), 2);
        assert_eq!(manager.len(), 2);
        assert_eq!(manager.backend.active.len(), 2);
    }

    #[test]
    fn dispatches_by_id_and_unregisters() {
        let mut manager = HotkeyManager::new(FakeBackend::default());
        let id = manager
            .register(&HotkeyBinding::new("Ctrl+Alt+0", HotkeyAction::Cooler))
            .unwrap();
        assert_eq!(manager.action_for(id), Some(&HotkeyAction::Cooler));
        assert_eq!(manager.action_for(id + 1), None);

        manager.unregister_all();
        assert_eq!(manager.action_for(id), None);
        assert!(manager.backend.active.is_empty());
    }

    #[test]
    fn failed_registration_does_not_consume_id() {
        let backend = FakeBackend {
            taken: vec!["Ctrl+Alt+1".parse().unwrap()],
            ..Default::default()
        };
        let mut manager = HotkeyManager::new(backend);
        assert!(manager
            .register(&HotkeyBinding::new("Ctrl+Alt+1", HotkeyAction::Warmer))
            .is_err());
        let id = manager
            .register(&HotkeyBinding::new("Ctrl+Alt+2", HotkeyAction::Warmer))
            .unwrap();
        assert_eq!(id, 1);
    }
}
