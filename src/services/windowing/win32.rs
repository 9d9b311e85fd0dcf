// Win32 window access
//
// EnumWindows collects the handles of one pass; titles and flags are read as the
// iterator advances.

use super::{DesktopControl, Hotkey, WindowEnumerator, WindowId, WindowInfo};
use std::mem;
use windows::Win32::Foundation::{BOOL, HWND, LPARAM, TRUE};
use windows::Win32::UI::Input::KeyboardAndMouse::{
    INPUT, INPUT_0, INPUT_KEYBOARD, KEYBD_EVENT_FLAGS, KEYBDINPUT, KEYEVENTF_KEYUP, SendInput,
    VIRTUAL_KEY, VK_CONTROL, VK_LWIN,
};
use windows::Win32::UI::WindowsAndMessaging::{
    BringWindowToTop, EnumWindows, GetForegroundWindow, GetWindowTextW, IsIconic,
    IsWindowVisible, SW_RESTORE, SetForegroundWindow, ShowWindow,
};

#[derive(Debug, Default, Clone, Copy)]
pub struct Win32Windows;

fn hwnd(id: WindowId) -> HWND {
    HWND(id as isize as *mut _)
}

unsafe extern "system" fn collect_handle(window: HWND, lparam: LPARAM) -> BOOL {
    // SAFETY: lparam carries the Vec passed by collect_handles for the duration of EnumWindows.
    let handles = unsafe { &mut *(lparam.0 as *mut Vec<isize>) };
    handles.push(window.0 as isize);
    TRUE
}

fn collect_handles() -> Vec<isize> {
    let mut handles: Vec<isize> = Vec::new();
    // SAFETY: the callback only touches `handles`, which outlives the call.
    let result = unsafe {
        EnumWindows(
            Some(collect_handle),
            LPARAM(&mut handles as *mut Vec<isize> as isize),
        )
    };
    if let Err(e) = result {
        tracing::debug!("EnumWindows failed: {}", e);
    }
    handles
}

fn describe(id: WindowId) -> Option<WindowInfo> {
    let window = hwnd(id);
    // SAFETY: read-only queries on a handle; a stale handle just yields empty results.
    unsafe {
        let visible = IsWindowVisible(window).as_bool();
        let mut buf = [0u16; 512];
        let len = GetWindowTextW(window, &mut buf);
        if len <= 0 {
            return None;
        }
        Some(WindowInfo {
            id,
            title: String::from_utf16_lossy(&buf[..len as usize]),
            visible,
            minimized: IsIconic(window).as_bool(),
        })
    }
}

impl WindowEnumerator for Win32Windows {
    fn is_available(&self) -> bool {
        true
    }

    fn windows(&self) -> Box<dyn Iterator<Item = WindowInfo> + '_> {
        Box::new(
            collect_handles()
                .into_iter()
                .filter_map(|raw| describe(raw as WindowId))
                .filter(|w| w.visible && !w.title.trim().is_empty()),
        )
    }
}

fn key_input(vk: VIRTUAL_KEY, up: bool) -> INPUT {
    INPUT {
        r#type: INPUT_KEYBOARD,
        Anonymous: INPUT_0 {
            ki: KEYBDINPUT {
                wVk: vk,
                wScan: 0,
                dwFlags: if up { KEYEVENTF_KEYUP } else { KEYBD_EVENT_FLAGS(0) },
                time: 0,
                dwExtraInfo: 0,
            },
        },
    }
}

impl DesktopControl for Win32Windows {
    fn is_available(&self) -> bool {
        true
    }

    fn active_window(&self) -> Option<WindowInfo> {
        // SAFETY: no arguments, returns a possibly null handle.
        let window = unsafe { GetForegroundWindow() };
        if window.0.is_null() {
            return None;
        }
        describe(window.0 as isize as WindowId)
    }

    fn restore(&self, id: WindowId) -> bool {
        let window = hwnd(id);
        // SAFETY: ShowWindow/IsIconic tolerate stale handles.
        unsafe {
            if IsIconic(window).as_bool() {
                let _ = ShowWindow(window, SW_RESTORE);
            }
        }
        true
    }

    fn activate(&self, id: WindowId) -> bool {
        let window = hwnd(id);
        // SAFETY: focus calls on a window handle; failures are reported, not UB.
        unsafe {
            let _ = BringWindowToTop(window);
            SetForegroundWindow(window).as_bool()
        }
    }

    fn press_hotkey(&self, hotkey: Hotkey) -> bool {
        let (modifier, digit) = match hotkey {
            Hotkey::SwitchTab(n) => (VK_CONTROL, n),
            Hotkey::TaskbarSlot(n) => (VK_LWIN, n),
        };
        let key = VIRTUAL_KEY(u16::from(b'0' + digit.min(9)));
        let inputs = [
            key_input(modifier, false),
            key_input(key, false),
            key_input(key, true),
            key_input(modifier, true),
        ];
        // SAFETY: inputs is a valid array of keyboard INPUT records.
        let sent = unsafe { SendInput(&inputs, mem::size_of::<INPUT>() as i32) };
        sent as usize == inputs.len()
    }
}
