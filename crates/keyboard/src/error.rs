use thiserror::Error;

#[derive(Error, Debug)]
pub enum KeyboardError {
    #[error("direct-injection back end failed: {0}")]
    DirectInjection(String),

    #[error("wlroots text-input tool exited non-zero: {0}")]
    WlrootsToolFailed(String),

    #[error("wlroots text-input tool timed out after {0:?}")]
    WlrootsTimeout(std::time::Duration),

    #[error("EI-portal session failed: {0}")]
    EiPortal(String),

    #[error("EI-portal retry also failed: {0}")]
    EiPortalRetryFailed(String),
}
