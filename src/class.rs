//! Class driver callbacks, and the events that reach them

use crate::{endpoint::TransferResult, sof::LockState};
use usb_device::endpoint::EndpointAddress;

/// A class driver's callback table
///
/// Each callback runs from [`DeferredQueue::run`](crate::DeferredQueue::run),
/// never from the controller interrupt. The `u8` argument is the controller
/// port number.
#[derive(Clone, Copy)]
pub struct ClassDriver {
    /// Shows up in logs.
    pub name: &'static str,
    /// Called once, from [`Device::init`](crate::Device::init).
    pub init: fn(),
    /// Called after a bus reset closed every endpoint.
    pub reset: fn(u8),
    /// Called when a transfer completes on one of the driver's endpoints.
    ///
    /// Receives the endpoint, the transfer result, and the number of bytes
    /// transferred. Return `false` if the driver didn't expect the completion.
    pub xfer: fn(u8, EndpointAddress, TransferResult, u16) -> bool,
    /// Called on every frame, if present.
    pub sof: Option<fn(u8)>,
}

/// Work deferred from the controller interrupt
#[derive(Clone, Copy)]
pub enum Event {
    /// A transfer completed.
    Transfer {
        driver: &'static ClassDriver,
        rhport: u8,
        ep_addr: EndpointAddress,
        result: TransferResult,
        bytes: u16,
    },
    /// A start of frame.
    Frame {
        driver: &'static ClassDriver,
        rhport: u8,
    },
    /// A bus reset.
    Reset {
        driver: &'static ClassDriver,
        rhport: u8,
    },
    /// The frame clock locked, or unlocked.
    Lock {
        handler: fn(LockState),
        state: LockState,
    },
    /// A plain function call.
    Call { func: fn(usize), arg: usize },
}

impl Event {
    /// Deliver the event to its driver, or handler
    pub fn dispatch(self) {
        match self {
            Event::Transfer {
                driver,
                rhport,
                ep_addr,
                result,
                bytes,
            } => {
                if !(driver.xfer)(rhport, ep_addr, result, bytes) {
                    warn!(
                        "{=str} UNEXPECTED XFER EP{} {}",
                        driver.name,
                        ep_addr.index(),
                        ep_addr.direction()
                    );
                }
            }
            Event::Frame { driver, rhport } => {
                if let Some(sof) = driver.sof {
                    sof(rhport);
                }
            }
            Event::Reset { driver, rhport } => {
                debug!("{=str} RESET", driver.name);
                (driver.reset)(rhport);
            }
            Event::Lock { handler, state } => handler(state),
            Event::Call { func, arg } => func(arg),
        }
    }
}
