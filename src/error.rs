//! Errors returned by endpoint, frame clock, and deferred call operations

use usb_device::UsbError;

/// An error from a `usbd-core` operation.
///
/// State machine violations are always returned to the caller. Nothing in
/// this crate reports an error asynchronously, except for the deferred call
/// overflow counter; see [`DeferredQueue::dropped`](crate::DeferredQueue::dropped).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum Error {
    /// The endpoint is already open.
    AlreadyOpen,
    /// There's no free endpoint slot, physical endpoint, or memory.
    ResourceExhausted,
    /// The operation isn't valid in the endpoint's (or clock's) current state.
    InvalidState,
    /// Release without a claim.
    NotClaimed,
    /// The deferred call queue is full.
    QueueFull,
    /// Another party claimed the endpoint, or a transfer is in flight.
    Busy,
    /// A descriptor couldn't be parsed, or it doesn't describe what's expected.
    InvalidDescriptor,
}

/// The `usbd-core` result type.
pub type Result<T> = core::result::Result<T, Error>;

impl From<Error> for UsbError {
    fn from(err: Error) -> Self {
        match err {
            Error::AlreadyOpen => UsbError::InvalidEndpoint,
            Error::ResourceExhausted => UsbError::EndpointOverflow,
            Error::InvalidState | Error::NotClaimed => UsbError::InvalidState,
            Error::QueueFull => UsbError::BufferOverflow,
            Error::Busy => UsbError::WouldBlock,
            Error::InvalidDescriptor => UsbError::ParseError,
        }
    }
}
