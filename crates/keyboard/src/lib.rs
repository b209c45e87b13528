//! Virtual-keyboard back ends (spec §4.7): a platform-dispatched typing
//! surface with an injection protocol for Wayland (Extended Input via the
//! RemoteDesktop portal, or wlroots text-input) and character-by-character
//! injection elsewhere.

pub mod dispatcher;
pub mod error;
pub mod portal_ei;
pub mod wlroots;

mod direct;

pub use dispatcher::{build_backend, select_backend, BackendChoice};
pub use error::KeyboardError;

/// One call every back end exposes.
pub trait KeyboardBackend: Send {
    fn type_text(&mut self, text: &str) -> Result<(), KeyboardError>;
}

pub use direct::DirectInjectionBackend;
pub use portal_ei::EiPortalBackend;
pub use wlroots::WlrootsTextInputBackend;
