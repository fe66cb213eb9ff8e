use thiserror::Error;

/// Error type returned by the driver layer (§6 `OutputDriver`/`InputDriver`).
///
/// A `DriverError` never unwinds a tick: components log it (see [`crate::driver`])
/// and move on to the next component, per the propagation policy in §7.
#[derive(Error, Debug)]
pub enum DriverError {
    /// The driver could not be opened (port missing, already claimed, ...).
    #[error("failed to open {0}")]
    Open(&'static str),
    /// A send was attempted on a closed driver.
    #[error("driver {0} is not open")]
    NotOpen(&'static str),
    /// The underlying transport rejected the message after retrying.
    #[error("send failed on {0} after retrying")]
    SendFailed(&'static str),
}

/// Crate-wide error type.
///
/// Per §7, most mutators return `bool` (invalid-argument / invalid-state are not
/// exceptional here, they're rejected input) and only constructors or composite
/// operations that have no sensible fallback return `Result<_, SeqError>`.
#[derive(Error, Debug)]
pub enum SeqError {
    /// A constructor argument was out of range or otherwise invalid.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// The operation is not legal in the component's current state.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
    /// No usable MIDI ports of the requested direction exist on this host.
    #[error("no {0} ports available")]
    NoPortsAvailable(&'static str),
    /// A driver failed irrecoverably during a resource-unavailable path.
    #[error(transparent)]
    Driver(#[from] DriverError),
}
