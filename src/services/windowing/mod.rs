//! Desktop window access behind capability traits.
//!
//! [`WindowEnumerator`] lists visible top-level windows and [`DesktopControl`]
//! acts on them. Each platform backend implements both; where no backend is
//! usable the null objects report "unavailable" and every action fails softly.
//!
//! Backends probe their tooling through an injected [`CapabilityCache`], so a
//! missing tool is detected once per TTL instead of on every focus attempt.

#[cfg(target_os = "windows")]
pub mod win32;
#[cfg(all(unix, not(target_os = "macos")))]
pub mod xdotool;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Opaque platform window handle
pub type WindowId = u64;

/// Snapshot of one top-level window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowInfo {
    pub id: WindowId,
    pub title: String,
    pub visible: bool,
    pub minimized: bool,
}

impl WindowInfo {
    pub fn new(id: WindowId, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            visible: true,
            minimized: false,
        }
    }

    /// Case-insensitive match of the title against any keyword
    pub fn title_matches<S: AsRef<str>>(&self, keywords: &[S]) -> bool {
        let title = self.title.to_lowercase();
        !title.is_empty()
            && keywords.iter().any(|k| {
                let k = k.as_ref().trim().to_lowercase();
                !k.is_empty() && title.contains(&k)
            })
    }
}

/// Source of visible top-level windows.
pub trait WindowEnumerator: Send {
    fn is_available(&self) -> bool;

    /// A fresh, lazily evaluated pass over the current windows. Calling it
    /// again restarts from the top.
    fn windows(&self) -> Box<dyn Iterator<Item = WindowInfo> + '_>;
}

/// Keyboard shortcuts the focus logic sends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hotkey {
    /// Ctrl+N in the focused browser
    SwitchTab(u8),
    /// Super+N on the taskbar
    TaskbarSlot(u8),
}

/// Actions on desktop windows.
#[cfg_attr(test, mockall::automock)]
pub trait DesktopControl: Send {
    fn is_available(&self) -> bool;
    fn active_window(&self) -> Option<WindowInfo>;
    fn restore(&self, id: WindowId) -> bool;
    fn activate(&self, id: WindowId) -> bool;
    fn press_hotkey(&self, hotkey: Hotkey) -> bool;
}

/// Enumerator used when the platform offers none
#[derive(Debug, Default, Clone, Copy)]
pub struct NullWindowEnumerator;

impl WindowEnumerator for NullWindowEnumerator {
    fn is_available(&self) -> bool {
        false
    }

    fn windows(&self) -> Box<dyn Iterator<Item = WindowInfo> + '_> {
        Box::new(std::iter::empty())
    }
}

/// Desktop control used when the platform offers none
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDesktop;

impl DesktopControl for NullDesktop {
    fn is_available(&self) -> bool {
        false
    }

    fn active_window(&self) -> Option<WindowInfo> {
        None
    }

    fn restore(&self, _id: WindowId) -> bool {
        false
    }

    fn activate(&self, _id: WindowId) -> bool {
        false
    }

    fn press_hotkey(&self, _hotkey: Hotkey) -> bool {
        false
    }
}

/// Remembers the outcome of availability probes for a limited time.
#[derive(Debug)]
pub struct CapabilityCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, (bool, Instant)>>,
}

impl CapabilityCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Cached result for `key`, running `probe` when absent or expired.
    pub fn get_or_probe<F>(&self, key: &str, probe: F) -> bool
    where
        F: FnOnce() -> bool,
    {
        if let Some(available) = self.cached(key) {
            return available;
        }
        let available = probe();
        tracing::debug!("Capability '{}' probed: available={}", key, available);
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), (available, Instant::now()));
        available
    }

    pub fn cached(&self, key: &str) -> Option<bool> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(key)
            .filter(|(_, probed_at)| probed_at.elapsed() < self.ttl)
            .map(|(available, _)| *available)
    }

    pub fn invalidate(&self, key: &str) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}

/// Window access for the current platform, or the null pair.
pub fn platform_backends(
    cache: Arc<CapabilityCache>,
) -> (Box<dyn WindowEnumerator>, Box<dyn DesktopControl>) {
    #[cfg(target_os = "windows")]
    {
        let _ = cache;
        (Box::new(win32::Win32Windows), Box::new(win32::Win32Windows))
    }

    #[cfg(all(unix, not(target_os = "macos")))]
    {
        let backend = xdotool::Xdotool::new(cache);
        (Box::new(backend.clone()), Box::new(backend))
    }

    #[cfg(not(any(target_os = "windows", all(unix, not(target_os = "macos")))))]
    {
        let _ = cache;
        tracing::info!("No window backend for this platform, focus control disabled");
        (Box::new(NullWindowEnumerator), Box::new(NullDesktop))
    }
}
