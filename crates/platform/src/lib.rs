//! Platform detection and the two hotkey-listener front ends (spec §4.6).

pub mod detect;
pub mod hotkey;

pub use detect::{CompositorFamily, DisplayServer, PlatformDetector, PlatformInfo};
pub use hotkey::grammar::{parse_hotkey, to_portal_string, HotkeyToken};
pub use hotkey::{HotkeyListener, OnPress, OnRelease};
