//! Keeps the automated target window in the foreground.
//!
//! [`FocusController::ensure_focus`] walks a fixed escalation:
//!
//! 1. the active window already is the target: remember it, optionally switch tab
//! 2. activate a matching window from the enumerator (last known one first,
//!    title-hint matches before plain keyword matches)
//! 3. press the pinned taskbar slot, rate limited, and retry step 2 once
//!
//! Every step fails softly. Without a window enumerator only step 1 runs.
//! The controller is not internally synchronized; the automation service
//! shares it behind a mutex.

use crate::models::{FocusConfig, normalize_slot, normalize_tab};
use crate::services::windowing::{
    DesktopControl, Hotkey, WindowEnumerator, WindowId, WindowInfo,
};
use std::thread;
use std::time::{Duration, Instant};

/// The window the controller is trying to keep frontmost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FocusTarget {
    pub title_hint: Option<String>,
    /// Tab to switch to after activation, 0 leaves it unchanged
    pub target_tab: u8,
    pub taskbar_slot: u8,
    /// Handle seen last time the target was found. Only used as a lookup key.
    pub last_known: Option<WindowId>,
}

pub struct FocusController {
    enumerator: Box<dyn WindowEnumerator>,
    desktop: Box<dyn DesktopControl>,
    config: FocusConfig,
    last_known: Option<WindowId>,
    last_launch: Option<Instant>,
    launch_attempts: u32,
    launched: bool,
}

impl std::fmt::Debug for FocusController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FocusController")
            .field("target", &self.target())
            .field("launch_attempts", &self.launch_attempts)
            .field("launched", &self.launched)
            .finish_non_exhaustive()
    }
}

impl FocusController {
    pub fn new(
        enumerator: Box<dyn WindowEnumerator>,
        desktop: Box<dyn DesktopControl>,
        mut config: FocusConfig,
    ) -> Self {
        config.normalize();
        Self {
            enumerator,
            desktop,
            config,
            last_known: None,
            last_launch: None,
            launch_attempts: 0,
            launched: false,
        }
    }

    pub fn target(&self) -> FocusTarget {
        FocusTarget {
            title_hint: self.config.title_hint.clone(),
            target_tab: self.config.target_tab,
            taskbar_slot: self.config.taskbar_slot,
            last_known: self.last_known,
        }
    }

    pub fn config(&self) -> &FocusConfig {
        &self.config
    }

    /// Whether anything beyond the active-window check can work.
    pub fn can_enumerate(&self) -> bool {
        self.enumerator.is_available()
    }

    /// Retarget the controller for the next run.
    pub fn configure(&mut self, target_tab: i64, taskbar_slot: i64, title_hint: Option<&str>) {
        self.config.target_tab = normalize_tab(target_tab);
        self.config.taskbar_slot = normalize_slot(taskbar_slot);
        self.config.title_hint = title_hint
            .map(str::trim)
            .filter(|hint| !hint.is_empty())
            .map(str::to_string);
        self.last_known = None;
        tracing::debug!(
            "Focus target configured: tab={} slot={} hint={:?}",
            self.config.target_tab,
            self.config.taskbar_slot,
            self.config.title_hint
        );
    }

    /// Forget launch attempts before a new run starts.
    pub fn prepare_for_execution(&mut self) {
        self.reset_launch_state();
    }

    /// Allow taskbar launches again, but only while the control center itself
    /// holds the foreground (the operator just interacted with it).
    pub fn prepare_taskbar_retry(&mut self) {
        if self.is_gui_active() {
            self.reset_launch_state();
        }
    }

    fn reset_launch_state(&mut self) {
        self.last_launch = None;
        self.launch_attempts = 0;
        self.launched = false;
    }

    pub fn is_gui_window(&self, window: &WindowInfo) -> bool {
        window.title_matches(&self.config.gui_keywords)
    }

    pub fn is_target_window(&self, window: &WindowInfo) -> bool {
        if self.is_gui_window(window) {
            return false;
        }
        window.title_matches(&self.config.target_keywords) || self.matches_hint(window)
    }

    fn matches_hint(&self, window: &WindowInfo) -> bool {
        self.config
            .title_hint
            .as_deref()
            .is_some_and(|hint| window.title_matches(&[hint]))
    }

    pub fn is_target_active(&self) -> bool {
        self.desktop
            .active_window()
            .is_some_and(|w| self.is_target_window(&w))
    }

    pub fn is_gui_active(&self) -> bool {
        self.desktop
            .active_window()
            .is_some_and(|w| self.is_gui_window(&w))
    }

    /// Bring the target window to the front.
    ///
    /// Returns true only if the active window matches the target when this
    /// returns. Never panics; false means "try again later".
    pub fn ensure_focus(&mut self, allow_fallback_launch: bool, switch_tab: bool) -> bool {
        if let Some(active) = self.desktop.active_window()
            && self.is_target_window(&active)
        {
            self.last_known = Some(active.id);
            if switch_tab {
                self.switch_tab();
            }
            return self.is_target_active();
        }

        if !self.enumerator.is_available() {
            tracing::debug!("Window enumeration unavailable, cannot search for target");
            return false;
        }

        if self.activate_candidates(switch_tab) {
            return true;
        }

        if allow_fallback_launch && self.launch_from_taskbar() {
            pause(self.config.launch_settle_ms);
            if self.activate_candidates(switch_tab) {
                return true;
            }
        }

        tracing::debug!("Target window not focused");
        false
    }

    /// Focus the target only when the control center is in front, e.g. right
    /// after a dialog closed. No taskbar launch, no tab switch.
    pub fn ensure_focus_if_gui_active(&mut self) -> bool {
        if !self.is_gui_active() {
            return false;
        }
        let timeout = Duration::from_millis(self.config.wait_active_timeout_ms);
        self.ensure_focus(false, false) && self.wait_until_active(timeout)
    }

    /// Poll the active window until it is the target or `timeout` elapses.
    pub fn wait_until_active(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let poll = Duration::from_millis(self.config.poll_interval_ms.max(1));
        loop {
            if self.is_target_active() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep(poll.min(deadline - now));
        }
    }

    fn candidates(&mut self) -> Vec<WindowInfo> {
        let mut found: Vec<WindowInfo> = self
            .enumerator
            .windows()
            .filter(|w| self.is_target_window(w))
            .collect();

        // Hint matches ahead of keyword matches, then the last known window first.
        found.sort_by_key(|w| !self.matches_hint(w));
        if let Some(id) = self.last_known {
            match found.iter().position(|w| w.id == id) {
                Some(pos) => {
                    let known = found.remove(pos);
                    found.insert(0, known);
                }
                None => self.last_known = None,
            }
        }
        found
    }

    fn activate_candidates(&mut self, switch_tab: bool) -> bool {
        for window in self.candidates() {
            if window.minimized {
                self.desktop.restore(window.id);
            }
            if !self.desktop.activate(window.id) {
                tracing::debug!("Activation refused for '{}'", window.title);
                continue;
            }
            pause(self.config.activation_settle_ms);
            if !self.is_target_active() {
                continue;
            }

            tracing::debug!("Focused '{}'", window.title);
            self.last_known = Some(window.id);
            if switch_tab {
                self.switch_tab();
            }
            return self.is_target_active();
        }
        false
    }

    fn switch_tab(&self) {
        let tab = self.config.target_tab;
        if tab == 0 {
            return;
        }
        if self.desktop.press_hotkey(Hotkey::SwitchTab(tab)) {
            pause(self.config.tab_settle_ms);
        } else {
            tracing::debug!("Could not switch to tab {}", tab);
        }
    }

    fn launch_from_taskbar(&mut self) -> bool {
        if self.launch_attempts >= self.config.max_launch_attempts {
            tracing::debug!(
                "Taskbar launch skipped: {} attempts used",
                self.launch_attempts
            );
            return false;
        }
        let cooldown = Duration::from_millis(self.config.launch_cooldown_ms);
        if self.last_launch.is_some_and(|at| at.elapsed() < cooldown) {
            tracing::debug!("Taskbar launch skipped: cooling down");
            return false;
        }

        let slot = self.config.taskbar_slot;
        self.last_launch = Some(Instant::now());
        self.launch_attempts += 1;
        self.launched = self.desktop.press_hotkey(Hotkey::TaskbarSlot(slot));
        tracing::info!(
            "Taskbar slot {} launch attempt {} ({})",
            slot,
            self.launch_attempts,
            if self.launched { "sent" } else { "failed" }
        );
        self.launched
    }

    pub fn launch_attempts(&self) -> u32 {
        self.launch_attempts
    }
}

fn pause(ms: u64) {
    if ms > 0 {
        thread::sleep(Duration::from_millis(ms));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::windowing::{MockDesktopControl, NullDesktop, NullWindowEnumerator};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Desk {
        windows: Vec<WindowInfo>,
        active: Option<WindowId>,
        hotkeys: Vec<Hotkey>,
        refuse_activation: bool,
        // Window that appears when the taskbar slot is pressed
        launches: Option<WindowInfo>,
    }

    #[derive(Clone, Default)]
    struct FakeDesktop(Arc<Mutex<Desk>>);

    impl FakeDesktop {
        fn with_windows(windows: Vec<WindowInfo>, active: Option<WindowId>) -> Self {
            let desk = Desk {
                windows,
                active,
                ..Default::default()
            };
            Self(Arc::new(Mutex::new(desk)))
        }

        fn active(&self) -> Option<WindowId> {
            self.0.lock().unwrap().active
        }

        fn hotkeys(&self) -> Vec<Hotkey> {
            self.0.lock().unwrap().hotkeys.clone()
        }
    }

    impl WindowEnumerator for FakeDesktop {
        fn is_available(&self) -> bool {
            true
        }

        fn windows(&self) -> Box<dyn Iterator<Item = WindowInfo> + '_> {
            Box::new(self.0.lock().unwrap().windows.clone().into_iter())
        }
    }

    impl DesktopControl for FakeDesktop {
        fn is_available(&self) -> bool {
            true
        }

        fn active_window(&self) -> Option<WindowInfo> {
            let desk = self.0.lock().unwrap();
            let id = desk.active?;
            desk.windows.iter().find(|w| w.id == id).cloned()
        }

        fn restore(&self, id: WindowId) -> bool {
            let mut desk = self.0.lock().unwrap();
            for w in desk.windows.iter_mut().filter(|w| w.id == id) {
                w.minimized = false;
            }
            true
        }

        fn activate(&self, id: WindowId) -> bool {
            let mut desk = self.0.lock().unwrap();
            if desk.refuse_activation {
                return false;
            }
            desk.active = Some(id);
            true
        }

        fn press_hotkey(&self, hotkey: Hotkey) -> bool {
            let mut desk = self.0.lock().unwrap();
            desk.hotkeys.push(hotkey);
            if let Hotkey::TaskbarSlot(_) = hotkey
                && let Some(window) = desk.launches.take()
            {
                desk.windows.push(window);
            }
            true
        }
    }

    fn quick_config() -> FocusConfig {
        FocusConfig {
            launch_settle_ms: 0,
            activation_settle_ms: 0,
            tab_settle_ms: 0,
            poll_interval_ms: 5,
            launch_cooldown_ms: 60_000,
            ..FocusConfig::default()
        }
    }

    fn controller(desk: &FakeDesktop) -> FocusController {
        FocusController::new(
            Box::new(desk.clone()),
            Box::new(desk.clone()),
            quick_config(),
        )
    }

    fn gui() -> WindowInfo {
        WindowInfo::new(1, "AutoMDF Control Center")
    }

    #[test]
    fn test_already_active_target_switches_tab() {
        let desk = FakeDesktop::with_windows(
            vec![gui(), WindowInfo::new(7, "Portal - Google Chrome")],
            Some(7),
        );
        let mut focus = controller(&desk);
        focus.configure(3, 2, None);

        assert!(focus.ensure_focus(false, true));
        assert_eq!(focus.target().last_known, Some(7));
        assert_eq!(desk.hotkeys(), vec![Hotkey::SwitchTab(3)]);
    }

    #[test]
    fn test_activates_matching_window_and_restores_minimized() {
        let mut browser = WindowInfo::new(9, "Mozilla Firefox");
        browser.minimized = true;
        let desk = FakeDesktop::with_windows(
            vec![gui(), WindowInfo::new(4, "Notes"), browser],
            Some(1),
        );
        let mut focus = controller(&desk);

        assert!(focus.ensure_focus(false, false));
        assert_eq!(desk.active(), Some(9));
        assert!(!desk.0.lock().unwrap().windows[2].minimized);
        assert!(desk.hotkeys().is_empty());
    }

    #[test]
    fn test_title_hint_wins_over_plain_keyword() {
        let desk = FakeDesktop::with_windows(
            vec![
                WindowInfo::new(2, "Mail - Microsoft Edge"),
                WindowInfo::new(3, "MDF Portal - Microsoft Edge"),
            ],
            None,
        );
        let mut focus = controller(&desk);
        focus.configure(0, 1, Some("mdf portal"));

        assert!(focus.ensure_focus(false, false));
        assert_eq!(desk.active(), Some(3));
    }

    #[test]
    fn test_gui_window_is_never_a_target() {
        let desk = FakeDesktop::with_windows(
            vec![WindowInfo::new(1, "AutoMDF Control Center - Google Chrome")],
            Some(1),
        );
        let mut focus = controller(&desk);
        assert!(!focus.ensure_focus(false, false));
        assert!(focus.is_gui_active());
    }

    #[test]
    fn test_taskbar_launch_then_retry() {
        let desk = FakeDesktop::with_windows(vec![gui()], Some(1));
        desk.0.lock().unwrap().launches = Some(WindowInfo::new(5, "New Tab - Brave"));
        let mut focus = controller(&desk);
        focus.configure(2, 4, None);

        assert!(focus.ensure_focus(true, true));
        assert_eq!(desk.active(), Some(5));
        assert_eq!(
            desk.hotkeys(),
            vec![Hotkey::TaskbarSlot(4), Hotkey::SwitchTab(2)]
        );
        assert_eq!(focus.launch_attempts(), 1);
    }

    #[test]
    fn test_taskbar_launch_is_rate_limited() {
        let desk = FakeDesktop::with_windows(vec![gui()], Some(1));
        let mut focus = controller(&desk);

        assert!(!focus.ensure_focus(true, false));
        assert!(!focus.ensure_focus(true, false));
        assert_eq!(desk.hotkeys(), vec![Hotkey::TaskbarSlot(1)]);
    }

    #[test]
    fn test_taskbar_attempts_are_bounded() {
        let desk = FakeDesktop::with_windows(vec![gui()], Some(1));
        let mut config = quick_config();
        config.launch_cooldown_ms = 0;
        config.max_launch_attempts = 2;
        let mut focus =
            FocusController::new(Box::new(desk.clone()), Box::new(desk.clone()), config);

        for _ in 0..5 {
            assert!(!focus.ensure_focus(true, false));
        }
        assert_eq!(desk.hotkeys().len(), 2);

        // GUI is in front, so a retry is allowed again
        focus.prepare_taskbar_retry();
        assert_eq!(focus.launch_attempts(), 0);
    }

    #[test]
    fn test_refused_activation_returns_false() {
        let desk = FakeDesktop::with_windows(
            vec![gui(), WindowInfo::new(8, "Opera")],
            Some(1),
        );
        desk.0.lock().unwrap().refuse_activation = true;
        let mut focus = controller(&desk);
        assert!(!focus.ensure_focus(false, false));
    }

    #[test]
    fn test_degraded_mode_never_panics() {
        let mut focus = FocusController::new(
            Box::new(NullWindowEnumerator),
            Box::new(NullDesktop),
            quick_config(),
        );
        assert!(!focus.ensure_focus(true, true));
        assert!(!focus.ensure_focus_if_gui_active());
        assert!(!focus.wait_until_active(Duration::from_millis(20)));
    }

    #[test]
    fn test_degraded_mode_still_accepts_active_target() {
        let mut desktop = MockDesktopControl::new();
        desktop
            .expect_active_window()
            .returning(|| Some(WindowInfo::new(3, "Work - Microsoft Edge")));
        desktop.expect_press_hotkey().never();

        let mut focus =
            FocusController::new(Box::new(NullWindowEnumerator), Box::new(desktop), quick_config());
        assert!(focus.ensure_focus(true, true));
    }

    #[test]
    fn test_enumerator_missing_skips_launch() {
        let mut desktop = MockDesktopControl::new();
        desktop.expect_active_window().returning(|| None);
        desktop.expect_press_hotkey().never();
        desktop.expect_activate().never();

        let mut focus =
            FocusController::new(Box::new(NullWindowEnumerator), Box::new(desktop), quick_config());
        assert!(!focus.ensure_focus(true, false));
    }

    #[test]
    fn test_wait_until_active_times_out() {
        let desk = FakeDesktop::with_windows(vec![gui()], Some(1));
        let focus = controller(&desk);
        let started = Instant::now();
        assert!(!focus.wait_until_active(Duration::from_millis(30)));
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_focus_restored_only_when_gui_active() {
        let desk = FakeDesktop::with_windows(
            vec![gui(), WindowInfo::new(6, "Google Chrome")],
            None,
        );
        let mut focus = controller(&desk);
        assert!(!focus.ensure_focus_if_gui_active());
        assert_eq!(desk.active(), None);

        desk.0.lock().unwrap().active = Some(1);
        assert!(focus.ensure_focus_if_gui_active());
        assert_eq!(desk.active(), Some(6));
    }
}
