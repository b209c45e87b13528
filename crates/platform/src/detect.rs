//! Display-server / compositor detection (spec §6 "Platform-detection
//! signals"). Read-only environment-variable sniffing plus a best-effort
//! portal-availability probe, cached process-wide with a clear-cache entry
//! point for tests.

use std::process::Command;
use std::sync::{Mutex, OnceLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayServer {
    X11,
    Wayland,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositorFamily {
    Gnome,
    Kde,
    Wlroots,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct PlatformInfo {
    pub display_server: DisplayServer,
    pub compositor: CompositorFamily,
    pub portal_global_shortcuts_available: bool,
    pub is_linux: bool,
}

static CACHE: OnceLock<Mutex<Option<PlatformInfo>>> = OnceLock::new();

fn cache() -> &'static Mutex<Option<PlatformInfo>> {
    CACHE.get_or_init(|| Mutex::new(None))
}

/// Caches `detect()`'s result process-wide, with a real clear-cache entry
/// point for tests.
pub struct PlatformDetector;

impl PlatformDetector {
    pub fn detect() -> PlatformInfo {
        let mut guard = cache().lock().unwrap();
        if let Some(info) = guard.as_ref() {
            return info.clone();
        }
        let info = Self::probe();
        *guard = Some(info.clone());
        info
    }

    /// Clears the cached detection result (spec §6: "a clear-cache entry
    /// point for tests"), matching the original's
    /// `@functools.lru_cache(maxsize=1)` + `cache_clear()` semantics: the
    /// next `detect()` call re-probes instead of returning a stale value.
    pub fn clear_cache() {
        *cache().lock().unwrap() = None;
        tracing::debug!("platform detection cache cleared");
    }

    fn probe() -> PlatformInfo {
        let is_linux = cfg!(target_os = "linux");

        let display_server = if !is_linux {
            DisplayServer::Other
        } else if std::env::var("WAYLAND_DISPLAY").is_ok()
            || std::env::var("XDG_SESSION_TYPE").map(|v| v == "wayland").unwrap_or(false)
        {
            DisplayServer::Wayland
        } else if std::env::var("DISPLAY").is_ok() {
            DisplayServer::X11
        } else {
            DisplayServer::Other
        };

        let desktop = std::env::var("XDG_CURRENT_DESKTOP").unwrap_or_default().to_lowercase();
        let compositor = if desktop.contains("gnome") {
            CompositorFamily::Gnome
        } else if desktop.contains("kde") || desktop.contains("plasma") {
            CompositorFamily::Kde
        } else if is_wlroots_compositor(&desktop) {
            CompositorFamily::Wlroots
        } else {
            CompositorFamily::Unknown
        };

        let portal_global_shortcuts_available =
            display_server == DisplayServer::Wayland && is_portal_available();

        PlatformInfo {
            display_server,
            compositor,
            portal_global_shortcuts_available,
            is_linux,
        }
    }
}

fn is_wlroots_compositor(desktop: &str) -> bool {
    ["sway", "wlroots", "hyprland", "river", "labwc"]
        .iter()
        .any(|name| desktop.contains(name))
}

/// Best-effort introspection of the session bus for a `GlobalShortcuts`
/// portal interface, grounded on the original's `is_portal_available`
/// subprocess-based probe (`busctl`/`dbus-send` introspection).
fn is_portal_available() -> bool {
    for (cmd, args) in [
        (
            "busctl",
            vec![
                "--user",
                "introspect",
                "org.freedesktop.portal.Desktop",
                "/org/freedesktop/portal/desktop",
            ],
        ),
        (
            "dbus-send",
            vec![
                "--session",
                "--print-reply",
                "--dest=org.freedesktop.portal.Desktop",
                "/org/freedesktop/portal/desktop",
                "org.freedesktop.DBus.Introspectable.Introspect",
            ],
        ),
    ] {
        if let Ok(output) = Command::new(cmd).args(&args).output() {
            if output.status.success() {
                let text = String::from_utf8_lossy(&output.stdout);
                if text.contains("GlobalShortcuts") {
                    return true;
                }
            }
        }
    }
    false
}
