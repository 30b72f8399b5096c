use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum RouterError {
    #[error("hardware error: {0}")]
    Hardware(String),
    #[error("hardware fault: {0}")]
    HardwareFault(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("invalid channel index {0}")]
    Channel(usize),
    #[error("mode rejected: {0}")]
    ModeRejected(&'static str),
    #[error("invalid state: {0}")]
    State(String),
}

/// Initialization failures are the one fatal class: a router without its
/// dimmer has no actuator, so callers must halt startup on these.
#[derive(Debug, Error, Clone)]
pub enum BeginError {
    #[error("no dimmer channels configured")]
    NoChannels,
    #[error("gate {index} failed to initialize: {reason}")]
    Gate { index: usize, reason: String },
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;

// Map any boxed hardware error to a typed RouterError, with special handling
// for router_hardware faults when the downcast is available.
pub(crate) fn map_hw_error(e: &(dyn std::error::Error + 'static)) -> RouterError {
    #[cfg(feature = "hardware-errors")]
    if let Some(hw) = e.downcast_ref::<router_hardware::error::HwError>() {
        return match hw {
            router_hardware::error::HwError::Timeout => {
                RouterError::Hardware("acquisition timeout".into())
            }
            other => RouterError::HardwareFault(other.to_string()),
        };
    }
    RouterError::Hardware(e.to_string())
}
