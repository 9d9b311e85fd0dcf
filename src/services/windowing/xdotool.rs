// X11 window access through the `xdotool` command-line tool
//
// Each call is a short-lived child process. Titles are fetched per window as the
// enumeration is consumed, so a caller that stops at the first match pays only
// for the windows it looked at.

use super::{CapabilityCache, DesktopControl, Hotkey, WindowEnumerator, WindowId, WindowInfo};
use std::process::{Command, Stdio};
use std::sync::Arc;

const PROBE_KEY: &str = "xdotool";

#[derive(Debug, Clone)]
pub struct Xdotool {
    program: String,
    cache: Arc<CapabilityCache>,
}

impl Xdotool {
    pub fn new(cache: Arc<CapabilityCache>) -> Self {
        Self::with_program("xdotool", cache)
    }

    pub fn with_program(program: impl Into<String>, cache: Arc<CapabilityCache>) -> Self {
        Self {
            program: program.into(),
            cache,
        }
    }

    fn probe(&self) -> bool {
        std::env::var_os("DISPLAY").is_some()
            && Command::new(&self.program)
                .arg("version")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .map(|status| status.success())
                .unwrap_or(false)
    }

    fn available(&self) -> bool {
        self.cache.get_or_probe(PROBE_KEY, || self.probe())
    }

    /// Run xdotool, returning trimmed stdout on success.
    fn run(&self, args: &[&str]) -> Option<String> {
        let output = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output();

        match output {
            Ok(output) if output.status.success() => {
                Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
            }
            Ok(_) => None,
            Err(e) => {
                tracing::debug!("xdotool {:?} failed: {}", args, e);
                // The tool vanished; probe again next time.
                self.cache.invalidate(PROBE_KEY);
                None
            }
        }
    }

    fn window_title(&self, id: WindowId) -> Option<String> {
        self.run(&["getwindowname", &id.to_string()])
    }

    fn describe(&self, id: WindowId) -> Option<WindowInfo> {
        let title = self.window_title(id)?;
        Some(WindowInfo::new(id, title))
    }
}

impl WindowEnumerator for Xdotool {
    fn is_available(&self) -> bool {
        self.available()
    }

    fn windows(&self) -> Box<dyn Iterator<Item = WindowInfo> + '_> {
        if !self.available() {
            return Box::new(std::iter::empty());
        }

        let ids: Vec<WindowId> = self
            .run(&["search", "--onlyvisible", "--name", "."])
            .map(|out| parse_window_ids(&out))
            .unwrap_or_default();

        Box::new(
            ids.into_iter()
                .filter_map(move |id| self.describe(id))
                .filter(|w| !w.title.trim().is_empty()),
        )
    }
}

impl DesktopControl for Xdotool {
    fn is_available(&self) -> bool {
        self.available()
    }

    fn active_window(&self) -> Option<WindowInfo> {
        if !self.available() {
            return None;
        }
        let id = self.run(&["getactivewindow"])?.parse().ok()?;
        self.describe(id)
    }

    fn restore(&self, id: WindowId) -> bool {
        self.available() && self.run(&["windowmap", &id.to_string()]).is_some()
    }

    fn activate(&self, id: WindowId) -> bool {
        self.available()
            && self
                .run(&["windowactivate", "--sync", &id.to_string()])
                .is_some()
    }

    fn press_hotkey(&self, hotkey: Hotkey) -> bool {
        if !self.available() {
            return false;
        }
        let combo = match hotkey {
            Hotkey::SwitchTab(n) => format!("ctrl+{}", n),
            Hotkey::TaskbarSlot(n) => format!("super+{}", n),
        };
        self.run(&["key", "--clearmodifiers", &combo]).is_some()
    }
}

fn parse_window_ids(output: &str) -> Vec<WindowId> {
    output
        .lines()
        .filter_map(|line| line.trim().parse().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_parse_window_ids() {
        assert_eq!(parse_window_ids("123\n 456 \nbogus\n\n"), vec![123, 456]);
    }

    #[test]
    fn test_missing_tool_is_unavailable() {
        let cache = Arc::new(CapabilityCache::new(Duration::from_secs(60)));
        let tool = Xdotool::with_program("/nonexistent/xdotool-automdf", cache.clone());

        assert!(!WindowEnumerator::is_available(&tool));
        assert_eq!(tool.windows().count(), 0);
        assert!(tool.active_window().is_none());
        assert!(!tool.press_hotkey(Hotkey::SwitchTab(2)));
        assert_eq!(cache.cached(PROBE_KEY), Some(false));
    }
}
