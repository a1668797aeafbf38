//! Interfaces to the USB device controller and its clock

use crate::{endpoint::EndpointDescriptor, Result};
use usb_device::endpoint::EndpointAddress;

/// A USB device controller driver
///
/// The controller performs the physical transfers. `usbd-core` calls these
/// primitives while it holds a critical section, so keep them short; they
/// should program the hardware and return, never wait for the bus.
///
/// The controller signals events back to `usbd-core` by calling
/// [`Device::on_transfer_complete`](crate::Device::on_transfer_complete) and
/// [`Device::on_sof`](crate::Device::on_sof) from its interrupt handler.
pub trait Controller {
    /// Configure and enable the physical endpoint described by `descriptor`.
    ///
    /// Return [`Error::ResourceExhausted`](crate::Error::ResourceExhausted) if
    /// there's no physical endpoint, or no endpoint memory, available.
    fn open_endpoint(&mut self, descriptor: &EndpointDescriptor) -> Result<()>;

    /// Disable the physical endpoint, and abort any transfer in flight.
    ///
    /// As with [`stall_endpoint`](Self::stall_endpoint), the controller must
    /// be done with the aborted transfer's buffer once this returns.
    fn close_endpoint(&mut self, ep_addr: EndpointAddress);

    /// Start a transfer of `len` bytes.
    ///
    /// For IN endpoints, the controller sends `len` bytes from `buffer`. For OUT
    /// endpoints, it receives at most `len` bytes into `buffer`. `buffer` may be
    /// null when `len` is zero.
    ///
    /// # Safety
    ///
    /// The caller guarantees that `buffer` is valid for `len` bytes until the
    /// controller reports completion, or until the endpoint is closed or stalled.
    unsafe fn submit_transfer(
        &mut self,
        ep_addr: EndpointAddress,
        buffer: *mut u8,
        len: u16,
    ) -> Result<()>;

    /// Halt the endpoint, and abort any transfer in flight.
    ///
    /// Once this returns, the controller must not read or write the buffer of
    /// the aborted transfer, and must not report its completion. The caller
    /// may reuse that buffer right away.
    fn stall_endpoint(&mut self, ep_addr: EndpointAddress);

    /// Clear the endpoint halt, and reset its data toggle.
    fn clear_stall(&mut self, ep_addr: EndpointAddress);
}

/// A free-running microsecond counter
///
/// The counter wraps at `u32::MAX`. It's the same timebase used for the
/// `frame_us` values given to [`Device::on_sof`](crate::Device::on_sof).
pub trait TimeSource {
    /// Returns the current time, in microseconds.
    fn now_us(&self) -> u32;
}

impl<T: TimeSource + ?Sized> TimeSource for &T {
    fn now_us(&self) -> u32 {
        (**self).now_us()
    }
}
