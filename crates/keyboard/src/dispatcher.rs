//! Back-end selection (spec §4.7 dispatch table), grounded on
//! `original_source`'s `_create_auto_backend` priority chain.

use std::time::Duration;

use platform::{CompositorFamily, DisplayServer, PlatformInfo};

use crate::{DirectInjectionBackend, EiPortalBackend, KeyboardBackend, WlrootsTextInputBackend};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendChoice {
    Direct,
    EiPortal,
    WlrootsTextInput,
}

/// Chooses a back end from platform detection, honoring an explicit
/// config override (`auto` lets the platform decide).
pub fn select_backend(info: &PlatformInfo, configured: Option<&str>) -> BackendChoice {
    match configured {
        Some("direct") | Some("pynput-equivalent") => return BackendChoice::Direct,
        Some("wlroots-text") => return BackendChoice::WlrootsTextInput,
        Some("extended-input-portal") => return BackendChoice::EiPortal,
        _ => {}
    }

    if !info.is_linux {
        return BackendChoice::Direct;
    }
    match info.display_server {
        DisplayServer::X11 | DisplayServer::Other => BackendChoice::Direct,
        DisplayServer::Wayland => match info.compositor {
            CompositorFamily::Gnome | CompositorFamily::Kde => {
                if info.portal_global_shortcuts_available {
                    BackendChoice::EiPortal
                } else {
                    BackendChoice::WlrootsTextInput
                }
            }
            CompositorFamily::Wlroots => BackendChoice::WlrootsTextInput,
            CompositorFamily::Unknown => {
                if info.portal_global_shortcuts_available {
                    BackendChoice::EiPortal
                } else {
                    tracing::warn!("unrecognized Wayland compositor, falling back to wlroots text-input");
                    BackendChoice::WlrootsTextInput
                }
            }
        },
    }
}

pub fn build_backend(choice: BackendChoice, char_delay: Duration) -> Box<dyn KeyboardBackend> {
    match choice {
        BackendChoice::Direct => Box::new(DirectInjectionBackend::new(char_delay)),
        BackendChoice::EiPortal => Box::new(EiPortalBackend::default()),
        BackendChoice::WlrootsTextInput => Box::new(WlrootsTextInputBackend::default()),
    }
}
