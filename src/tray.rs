// System tray icon, context menu and break balloon

use windows::core::PCWSTR;
use windows::Win32::Foundation::{HWND, POINT};
use windows::Win32::System::LibraryLoader::GetModuleHandleW;
use windows::Win32::UI::Shell::{
    Shell_NotifyIconW, NIF_ICON, NIF_INFO, NIF_MESSAGE, NIF_TIP, NIIF_INFO, NIM_ADD, NIM_DELETE,
    NIM_MODIFY, NOTIFYICONDATAW,
};
use windows::Win32::UI::WindowsAndMessaging::{
    AppendMenuW, CreatePopupMenu, DestroyMenu, GetCursorPos, LoadIconW, SetForegroundWindow,
    TrackPopupMenu, HICON, HMENU, IDI_APPLICATION, MENU_ITEM_FLAGS, MF_CHECKED, MF_POPUP,
    MF_SEPARATOR, MF_STRING, TPM_BOTTOMALIGN, TPM_LEFTALIGN, WM_APP,
};

/// Custom message ID for tray icon callbacks
pub const WM_TRAY_ICON: u32 = WM_APP + 3;

/// Menu item IDs
pub const IDM_TOGGLE_REMINDER: u32 = 1001;
pub const IDM_RESET: u32 = 1002;
pub const IDM_QUIT: u32 = 1003;
/// Profile `n` (in menu order) is `IDM_PROFILE_BASE + n`
pub const IDM_PROFILE_BASE: u32 = 1100;
/// Interval choice `n` of [`INTERVAL_CHOICES`] is `IDM_INTERVAL_BASE + n`
pub const IDM_INTERVAL_BASE: u32 = 1200;

/// Reminder intervals offered in the menu, in minutes
pub const INTERVAL_CHOICES: [u64; 4] = [20, 30, 45, 60];

const BALLOON_TITLE: &str = "Time for a break";
const BALLOON_TEXT: &str = "Look at something 20 feet away for 20 seconds.";

fn wide_str(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

/// Copy `s` into a fixed NOTIFYICONDATAW buffer, truncating and keeping the terminator
fn fill(buf: &mut [u16], s: &str) {
    let text: Vec<u16> = s.encode_utf16().take(buf.len() - 1).collect();
    buf[..text.len()].copy_from_slice(&text);
    buf[text.len()] = 0;
}

/// Resource ID of the icon embedded by app.rc
const APP_ICON_ID: u16 = 1;

/// Embedded application icon, or the stock one if the resource is missing
pub fn app_icon() -> HICON {
    unsafe {
        let hinstance = GetModuleHandleW(PCWSTR::null()).unwrap_or_default();
        LoadIconW(Some(hinstance.into()), PCWSTR(APP_ICON_ID as usize as *const u16))
            .or_else(|_| LoadIconW(None, IDI_APPLICATION))
            .unwrap_or_default()
    }
}

fn base_data(hwnd: HWND) -> NOTIFYICONDATAW {
    NOTIFYICONDATAW {
        cbSize: std::mem::size_of::<NOTIFYICONDATAW>() as u32,
        hWnd: hwnd,
        uID: 1,
        ..Default::default()
    }
}

/// Add the system tray icon
pub fn add_tray_icon(hwnd: HWND, tip: &str) -> bool {
    unsafe {
        let mut nid = base_data(hwnd);
        nid.uFlags = NIF_ICON | NIF_MESSAGE | NIF_TIP;
        nid.uCallbackMessage = WM_TRAY_ICON;
        nid.hIcon = app_icon();
        fill(&mut nid.szTip, tip);

        Shell_NotifyIconW(NIM_ADD, &nid).as_bool()
    }
}

pub fn set_tooltip(hwnd: HWND, tip: &str) {
    unsafe {
        let mut nid = base_data(hwnd);
        nid.uFlags = NIF_TIP;
        fill(&mut nid.szTip, tip);
        let _ = Shell_NotifyIconW(NIM_MODIFY, &nid);
    }
}

pub fn show_info(hwnd: HWND, title: &str, text: &str) -> bool {
    unsafe {
        let mut nid = base_data(hwnd);
        nid.uFlags = NIF_INFO;
        nid.dwInfoFlags = NIIF_INFO;
        fill(&mut nid.szInfoTitle, title);
        fill(&mut nid.szInfo, text);
        Shell_NotifyIconW(NIM_MODIFY, &nid).as_bool()
    }
}

/// Balloon notification asking the user to rest their eyes
pub fn show_break_balloon(hwnd: HWND) -> bool {
    show_info(hwnd, BALLOON_TITLE, BALLOON_TEXT)
}

/// Remove the system tray icon
pub fn remove_tray_icon(hwnd: HWND) {
    unsafe {
        let nid = base_data(hwnd);
        let _ = Shell_NotifyIconW(NIM_DELETE, &nid);
    }
}

unsafe fn append(menu: HMENU, flags: MENU_ITEM_FLAGS, id: usize, text: &str) {
    let text = wide_str(text);
    let _ = AppendMenuW(menu, flags, id, PCWSTR(text.as_ptr()));
}

/// What the context menu needs to know about the current state
pub struct MenuState {
    pub reminder_enabled: bool,
    pub interval_minutes: u64,
    pub profiles: Vec<String>,
}

/// Show the tray context menu. Selections arrive later as WM_COMMAND.
pub fn show_context_menu(hwnd: HWND, state: &MenuState) {
    unsafe {
        let Ok(menu) = CreatePopupMenu() else {
            return;
        };

        let toggle = if state.reminder_enabled {
            "Pause reminders"
        } else {
            "Resume reminders"
        };
        append(menu, MF_STRING, IDM_TOGGLE_REMINDER as usize, toggle);

        if let Ok(intervals) = CreatePopupMenu() {
            for (i, minutes) in INTERVAL_CHOICES.iter().enumerate() {
                let mut flags = MF_STRING;
                if *minutes == state.interval_minutes {
                    flags |= MF_CHECKED;
                }
                let id = IDM_INTERVAL_BASE as usize + i;
                append(intervals, flags, id, &format!("Every {} minutes", minutes));
            }
            append(menu, MF_POPUP, intervals.0 as usize, "Break interval");
        }

        append(menu, MF_SEPARATOR, 0, "");
        for (i, name) in state.profiles.iter().enumerate() {
            append(menu, MF_STRING, IDM_PROFILE_BASE as usize + i, name);
        }
        append(menu, MF_STRING, IDM_RESET as usize, "Reset display");
        append(menu, MF_SEPARATOR, 0, "");
        append(menu, MF_STRING, IDM_QUIT as usize, "Quit");

        let mut pt = POINT::default();
        let _ = GetCursorPos(&mut pt);

        // Required for TrackPopupMenu to work correctly with tray icons
        let _ = SetForegroundWindow(hwnd);

        let _ = TrackPopupMenu(
            menu,
            TPM_LEFTALIGN | TPM_BOTTOMALIGN,
            pt.x,
            pt.y,
            Some(0),
            hwnd,
            None,
        );

        // Destroys the interval submenu too
        let _ = DestroyMenu(menu);
    }
}
