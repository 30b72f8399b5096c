use thiserror::Error;

/// Hardware-level failures surfaced through the trait seams.
#[derive(Debug, Error)]
pub enum HwError {
    #[error("acquisition timeout")]
    Timeout,
    #[error("adc error: {0}")]
    Adc(String),
    #[error("gpio error: {0}")]
    Gpio(String),
}
