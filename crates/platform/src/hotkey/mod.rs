//! Hotkey listener abstraction (spec §4.6): a direct-grab listener for
//! X11/Windows/macOS and an XDG Desktop Portal `GlobalShortcuts` listener
//! for Wayland, behind one trait.

pub mod direct;
pub mod grammar;
pub mod portal;

use std::sync::Arc;

pub type OnPress = Arc<dyn Fn(&str) + Send + Sync>;
pub type OnRelease = Arc<dyn Fn(&str) + Send + Sync>;

/// Abstract contract every listener implementation satisfies. Both
/// callbacks are set at construction and receive the hotkey string that
/// was acted upon; a listener can drive any of its registered hotkeys'
/// callbacks.
pub trait HotkeyListener: Send {
    fn add_hotkey(&mut self, hotkey: &str, label: Option<&str>) -> anyhow::Result<()>;
    fn clear_hotkeys(&mut self);
    fn start(&mut self) -> anyhow::Result<()>;
    fn stop(&mut self);
}

pub use direct::DirectGrabListener;
pub use portal::PortalHotkeyListener;
