// Tray host: hidden window, message loop, and the glue between Win32
// messages and the application state

use crate::app::{App, DataFiles};
use crate::brightness::{BrightnessController, PrimaryMonitor};
use crate::config::{self, AppConfig, APP_NAME};
use crate::gamma::{GammaController, ScreenGamma};
use crate::hotkeys::{HotkeyListener, HotkeyManager, WM_APP_HOTKEY};
use crate::{autostart, tray};
use anyhow::{Context, Result};
use std::cell::RefCell;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;
use tracing::{info, warn};
use windows::core::PCWSTR;
use windows::Win32::Foundation::{CloseHandle, HANDLE, HWND, LPARAM, LRESULT, WPARAM};
use windows::Win32::System::LibraryLoader::GetModuleHandleW;
use windows::Win32::System::Threading::{CreateMutexW, OpenMutexW, SYNCHRONIZATION_ACCESS_RIGHTS};
use windows::Win32::UI::WindowsAndMessaging::*;

const CLASS_NAME: &str = "EyeProtectorHostWnd";
const SINGLE_INSTANCE_MUTEX: &str = "EyeProtectorMutex";
const TICK_TIMER_ID: usize = 1;
const TICK_MS: u32 = 1000;

/// Posted by the reminder callback; the balloon is shown outside the state borrow
const WM_APP_REMINDER: u32 = WM_APP + 4;

pub type DesktopApp = App<ScreenGamma, PrimaryMonitor>;

struct HostState {
    app: DesktopApp,
    hotkeys: Option<HotkeyManager<HotkeyListener>>,
}

thread_local! {
    static HOST: RefCell<Option<HostState>> = const { RefCell::new(None) };
}

// Broadcast when Explorer restarts; the tray icon must be added again
static TASKBAR_CREATED: AtomicU32 = AtomicU32::new(0);

fn wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

/// Run `f` against the host state. Returns `None` before startup, after
/// teardown, or when re-entered from inside another handler.
fn with_host<R>(f: impl FnOnce(&mut HostState) -> R) -> Option<R> {
    HOST.with(|cell| {
        let mut guard = cell.try_borrow_mut().ok()?;
        guard.as_mut().map(f)
    })
}

/// Open the screen and the primary monitor. Either may be missing; the
/// matching controller then reports every call as unavailable.
pub fn open_devices() -> (
    GammaController<ScreenGamma>,
    BrightnessController<PrimaryMonitor>,
) {
    let gamma = match ScreenGamma::open() {
        Ok(device) => GammaController::new(device),
        Err(e) => {
            warn!("{:#}", e);
            GammaController::unsupported()
        }
    };
    let brightness = match PrimaryMonitor::open() {
        Ok(device) => BrightnessController::new(device),
        Err(e) => {
            warn!("{:#}; brightness control disabled", e);
            BrightnessController::unsupported()
        }
    };
    (gamma, brightness)
}

/// Application without a tray, for one-shot commands
pub fn open_app(config: AppConfig) -> Result<DesktopApp> {
    let (gamma, brightness) = open_devices();
    App::new(config, DataFiles::user(), gamma, brightness, || {}, Instant::now())
}

/// Named mutex held for the lifetime of the tray host
struct SingleInstance(HANDLE);

impl SingleInstance {
    /// `None` when another instance already holds the mutex
    fn acquire() -> Result<Option<Self>> {
        let name = wide(SINGLE_INSTANCE_MUTEX);
        unsafe {
            // MUTEX_ALL_ACCESS
            let access = SYNCHRONIZATION_ACCESS_RIGHTS(0x001F0001);
            if let Ok(existing) = OpenMutexW(access, false, PCWSTR(name.as_ptr())) {
                let _ = CloseHandle(existing);
                return Ok(None);
            }
            let handle = CreateMutexW(None, true, PCWSTR(name.as_ptr()))
                .context("Failed to create the single-instance mutex")?;
            Ok(Some(Self(handle)))
        }
    }
}

impl Drop for SingleInstance {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.0);
        }
    }
}

/// Run the tray host until the user quits or the session ends
pub fn run(background: bool) -> Result<()> {
    let Some(_instance) = SingleInstance::acquire()? else {
        info!("{} is already running", APP_NAME);
        return Ok(());
    };

    let mut cfg = config::load_config();
    let registry = autostart::reconcile(cfg.launch_on_login, autostart::is_enabled());
    if registry != cfg.launch_on_login {
        cfg.launch_on_login = registry;
        if let Err(e) = config::save_config(&cfg) {
            warn!("{:#}", e);
        }
    }

    let hwnd = create_window()?;
    let (gamma, brightness) = open_devices();
    let mut app = App::new(
        cfg,
        DataFiles::user(),
        gamma,
        brightness,
        move || unsafe {
            let _ = PostMessageW(Some(hwnd), WM_APP_REMINDER, WPARAM(0), LPARAM(0));
        },
        Instant::now(),
    )?;
    app.restore_display();

    let hotkeys = match HotkeyListener::spawn(hwnd) {
        Ok(listener) => {
            let mut manager = HotkeyManager::new(listener);
            manager.register_all(&app.config().hotkeys);
            info!(
                "{} of {} hotkeys registered",
                manager.len(),
                app.config().hotkeys.len()
            );
            Some(manager)
        }
        Err(e) => {
            warn!("{:#}; hotkeys disabled", e);
            None
        }
    };

    if !tray::add_tray_icon(hwnd, &app.tooltip(Instant::now())) {
        warn!("Failed to add the tray icon");
    }
    if !background {
        tray::show_info(hwnd, APP_NAME, "Running in the notification area");
    }

    HOST.with(|cell| *cell.borrow_mut() = Some(HostState { app, hotkeys }));

    unsafe {
        SetTimer(Some(hwnd), TICK_TIMER_ID, TICK_MS, None);

        let mut msg = MSG::default();
        while GetMessageW(&mut msg, None, 0, 0).as_bool() {
            let _ = TranslateMessage(&msg);
            DispatchMessageW(&msg);
        }
    }

    teardown(hwnd);
    info!("{} stopped", APP_NAME);
    Ok(())
}

fn create_window() -> Result<HWND> {
    let class_name = wide(CLASS_NAME);
    let title = wide(APP_NAME);
    let taskbar_created = wide("TaskbarCreated");

    unsafe {
        let hinstance = GetModuleHandleW(PCWSTR::null()).context("GetModuleHandleW failed")?;

        let wc = WNDCLASSW {
            lpfnWndProc: Some(wnd_proc),
            hInstance: hinstance.into(),
            lpszClassName: PCWSTR(class_name.as_ptr()),
            hIcon: tray::app_icon(),
            ..Default::default()
        };
        RegisterClassW(&wc);

        TASKBAR_CREATED.store(
            RegisterWindowMessageW(PCWSTR(taskbar_created.as_ptr())),
            Ordering::Relaxed,
        );

        // Never shown; exists to own the tray icon, timer and hotkey messages
        CreateWindowExW(
            WINDOW_EX_STYLE::default(),
            PCWSTR(class_name.as_ptr()),
            PCWSTR(title.as_ptr()),
            WS_OVERLAPPED,
            0,
            0,
            0,
            0,
            None,
            None,
            Some(hinstance.into()),
            None,
        )
        .context("Failed to create the host window")
    }
}

/// Unregister hotkeys, drop the tray icon, untint the screen and record usage.
/// Safe to call twice; the second call finds no state.
fn teardown(hwnd: HWND) {
    let state = HOST.with(|cell| cell.try_borrow_mut().ok().and_then(|mut s| s.take()));
    let Some(mut state) = state else {
        return;
    };

    unsafe {
        let _ = KillTimer(Some(hwnd), TICK_TIMER_ID);
    }
    if let Some(mut hotkeys) = state.hotkeys.take() {
        hotkeys.unregister_all();
    }
    tray::remove_tray_icon(hwnd);
    if let Err(e) = state.app.shutdown(Instant::now()) {
        warn!("{:#}", e);
    }
}

fn refresh_tooltip(hwnd: HWND) {
    if let Some(tip) = with_host(|h| h.app.tooltip(Instant::now())) {
        tray::set_tooltip(hwnd, &tip);
    }
}

fn on_command(hwnd: HWND, cmd: u32) {
    let now = Instant::now();
    match cmd {
        tray::IDM_TOGGLE_REMINDER => {
            with_host(|h| h.app.toggle_reminder(now));
        }
        tray::IDM_RESET => {
            with_host(|h| {
                if let Err(e) = h.app.reset_display() {
                    warn!("{:#}", e);
                }
            });
        }
        tray::IDM_QUIT => unsafe {
            let _ = DestroyWindow(hwnd);
        },
        id if (tray::IDM_PROFILE_BASE..tray::IDM_INTERVAL_BASE).contains(&id) => {
            let index = (id - tray::IDM_PROFILE_BASE) as usize;
            with_host(|h| {
                if let Some(name) = h.app.profile_names().get(index) {
                    if let Err(e) = h.app.apply_profile(name) {
                        warn!("{:#}", e);
                    }
                }
            });
        }
        id if id >= tray::IDM_INTERVAL_BASE => {
            let index = (id - tray::IDM_INTERVAL_BASE) as usize;
            if let Some(minutes) = tray::INTERVAL_CHOICES.get(index) {
                with_host(|h| {
                    if let Err(e) = h.app.set_reminder_interval(minutes * 60, now) {
                        warn!("{:#}", e);
                    }
                });
            }
        }
        _ => {}
    }
    refresh_tooltip(hwnd);
}

unsafe extern "system" fn wnd_proc(
    hwnd: HWND,
    msg: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    match msg {
        WM_TIMER if wparam.0 == TICK_TIMER_ID => {
            let now = Instant::now();
            if let Some(tip) = with_host(|h| {
                h.app.tick(now);
                h.app.tooltip(now)
            }) {
                tray::set_tooltip(hwnd, &tip);
            }
            LRESULT(0)
        }

        WM_APP_HOTKEY => {
            let id = wparam.0 as i32;
            with_host(|h| {
                let action = h.hotkeys.as_ref().and_then(|m| m.action_for(id)).cloned();
                match action {
                    Some(action) => h.app.handle_hotkey(&action, Instant::now()),
                    None => warn!("Unknown hotkey id {}", id),
                }
            });
            refresh_tooltip(hwnd);
            LRESULT(0)
        }

        WM_APP_REMINDER => {
            tray::show_break_balloon(hwnd);
            LRESULT(0)
        }

        tray::WM_TRAY_ICON => {
            let event = (lparam.0 & 0xFFFF) as u32;
            if event == WM_RBUTTONUP || event == WM_LBUTTONUP {
                // Build the menu state first; the menu runs a modal loop that
                // dispatches timer ticks, so no borrow may be held across it
                let state = with_host(|h| tray::MenuState {
                    reminder_enabled: h.app.reminder_enabled(),
                    interval_minutes: h.app.config().reminder.interval_seconds / 60,
                    profiles: h.app.profile_names(),
                });
                if let Some(state) = state {
                    tray::show_context_menu(hwnd, &state);
                }
            }
            LRESULT(0)
        }

        WM_COMMAND => {
            on_command(hwnd, (wparam.0 & 0xFFFF) as u32);
            LRESULT(0)
        }

        WM_ENDSESSION => {
            if wparam.0 != 0 {
                info!("Session ending");
                teardown(hwnd);
            }
            LRESULT(0)
        }

        WM_DESTROY => {
            PostQuitMessage(0);
            LRESULT(0)
        }

        x if x != 0 && x == TASKBAR_CREATED.load(Ordering::Relaxed) => {
            if let Some(tip) = with_host(|h| h.app.tooltip(Instant::now())) {
                tray::add_tray_icon(hwnd, &tip);
            }
            LRESULT(0)
        }

        _ => DefWindowProcW(hwnd, msg, wparam, lparam),
    }
}
