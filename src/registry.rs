//! Endpoint registry, and the per-endpoint transfer state machine
//!
//! ```text
//!            open                claim              submit_transfer
//! Closed ----------> Idle ---------------> Claimed ----------------> Busy
//!                     ^  <---------------          |                 |
//!                     |      release               | submit_transfer |
//!                     |                            v                 |
//!                     +-------------------------- Busy <-------------+
//!                          on_transfer_complete
//!
//! stall: {Idle, Claimed, Busy} -> Stalled (aborts the transfer, drops the claim)
//! clear_stall: Stalled -> Idle
//! close: any -> Closed (invalidates the transfer)
//! ```

use crate::{
    controller::Controller,
    endpoint::{EndpointDescriptor, EndpointState, Status, Transfer, TransferResult},
    Error, Result,
};
use core::cell::RefCell;
use critical_section::Mutex;
use usb_device::{endpoint::EndpointAddress, UsbDirection};

/// The maximum supported number of endpoints.
///
/// Eight endpoints, two directions. Any endpoints allocated
/// beyond this are wasted.
pub const MAX_ENDPOINTS: usize = 8 * 2;

/// Produces an index into the endpoint slots
fn index(ep_addr: EndpointAddress) -> usize {
    (ep_addr.index() * 2) + (UsbDirection::In == ep_addr.direction()) as usize
}

/// Inverse of [`index`]
fn address(index: usize) -> EndpointAddress {
    let direction = if index % 2 == 1 {
        UsbDirection::In
    } else {
        UsbDirection::Out
    };
    EndpointAddress::from_parts(index / 2, direction)
}

/// A finished transfer, to be reported to the owning class driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub ep_addr: EndpointAddress,
    pub result: TransferResult,
    /// Bytes transferred, never more than requested
    pub bytes: u16,
    /// Index of the class driver that opened the endpoint
    pub driver: Option<u8>,
}

struct Slots<C, const COUNT: usize> {
    controller: C,
    endpoints: [EndpointState; COUNT],
}

/// Tracks the state of every endpoint on one controller port.
///
/// The registry exclusively owns all endpoint state. Class drivers refer to
/// endpoints by their [`EndpointAddress`], and nothing else.
///
/// Use `COUNT` to reduce memory when you know you'll need fewer endpoints.
/// Like the endpoint index, slots are allocated in pairs; even slots are OUT,
/// and odd slots are IN. Any slots beyond [`MAX_ENDPOINTS`] are wasted.
///
/// Every operation runs in one short critical section, so it's safe to call
/// from both task and interrupt contexts. No operation waits. In particular,
/// [`claim()`](EndpointRegistry::claim) is a try-lock: it fails with
/// [`Error::Busy`] instead of queueing the caller.
pub struct EndpointRegistry<C, const COUNT: usize = MAX_ENDPOINTS> {
    slots: Mutex<RefCell<Slots<C, COUNT>>>,
}

impl<C: Controller, const COUNT: usize> EndpointRegistry<C, COUNT> {
    /// Create a registry that drives `controller`
    ///
    /// All endpoints start closed.
    pub const fn new(controller: C) -> Self {
        Self {
            slots: Mutex::new(RefCell::new(Slots {
                controller,
                endpoints: [EndpointState::CLOSED; COUNT],
            })),
        }
    }

    /// Interrupt-safe, mutable access to the controller and endpoints
    ///
    /// The controller must not call back into the registry from within its
    /// primitives.
    fn with_slots<R>(&self, func: impl FnOnce(&mut Slots<C, COUNT>) -> R) -> R {
        critical_section::with(|cs| {
            let mut slots = self.slots.borrow_ref_mut(cs);
            func(&mut *slots)
        })
    }

    /// Interrupt-safe, mutable access to the controller
    pub fn with_controller<R>(&self, func: impl FnOnce(&mut C) -> R) -> R {
        self.with_slots(|slots| func(&mut slots.controller))
    }

    /// Returns the total number of endpoint slots
    pub fn capacity(&self) -> usize {
        COUNT.min(MAX_ENDPOINTS)
    }

    /// Open the endpoint described by `descriptor`
    ///
    /// Returns
    ///
    /// - [`Error::AlreadyOpen`] if the endpoint is open.
    /// - [`Error::ResourceExhausted`] if there's no slot for this address, or
    ///   if the controller can't open another physical endpoint.
    pub fn open(&self, descriptor: &EndpointDescriptor) -> Result<()> {
        self.open_for(descriptor, None)
    }

    /// Open an endpoint on behalf of the class driver at index `driver`.
    ///
    /// Completions on this endpoint will name `driver`. See [`open()`](Self::open)
    /// for the errors.
    pub fn open_for(&self, descriptor: &EndpointDescriptor, driver: Option<u8>) -> Result<()> {
        let ep_addr = descriptor.address();
        self.with_slots(|slots| {
            let ep = slots
                .endpoints
                .get_mut(index(ep_addr))
                .filter(|_| index(ep_addr) < MAX_ENDPOINTS)
                .ok_or(Error::ResourceExhausted)?;
            if ep.is_open() {
                return Err(Error::AlreadyOpen);
            }
            slots.controller.open_endpoint(descriptor)?;
            *ep = EndpointState::opened(descriptor, driver);
            debug!(
                "OPEN EP{} {} {}",
                ep_addr.index(),
                ep_addr.direction(),
                descriptor.kind()
            );
            Ok(())
        })
    }

    /// Close the endpoint, from any state
    ///
    /// Any pending transfer is invalidated before this call returns; a late
    /// completion from the controller is ignored. Closing a closed endpoint
    /// does nothing.
    pub fn close(&self, ep_addr: EndpointAddress) {
        self.with_slots(|slots| {
            if let Some(ep) = slots.endpoints.get_mut(index(ep_addr)) {
                if ep.is_open() {
                    slots.controller.close_endpoint(ep_addr);
                    *ep = EndpointState::CLOSED;
                    debug!("CLOSE EP{} {}", ep_addr.index(), ep_addr.direction());
                }
            }
        })
    }

    /// Close every open endpoint
    ///
    /// Use this when the bus resets.
    pub fn close_all(&self) {
        self.with_slots(|slots| {
            for (idx, ep) in slots.endpoints.iter_mut().enumerate() {
                if ep.is_open() {
                    slots.controller.close_endpoint(address(idx));
                    *ep = EndpointState::CLOSED;
                }
            }
        })
    }

    /// Claim the right to submit the next transfer
    ///
    /// Returns [`Error::Busy`] if someone else holds the claim, or if a transfer
    /// is in flight. Returns [`Error::InvalidState`] if the endpoint is closed
    /// or stalled.
    ///
    /// If you don't submit a transfer, you must [`release()`](Self::release) the
    /// claim for others.
    pub fn claim(&self, ep_addr: EndpointAddress) -> Result<()> {
        self.with_endpoint(ep_addr, |ep| {
            if ep.status.intersects(Status::CLAIMED | Status::BUSY) {
                return Err(Error::Busy);
            }
            if ep.is_stalled() {
                return Err(Error::InvalidState);
            }
            ep.status.insert(Status::CLAIMED);
            Ok(())
        })
    }

    /// Release a claim without submitting a transfer
    ///
    /// Only the party that claimed the endpoint may release it. The registry
    /// can't check that; it only checks that the endpoint is claimed.
    pub fn release(&self, ep_addr: EndpointAddress) -> Result<()> {
        self.with_slots(|slots| {
            let ep = slots
                .endpoints
                .get_mut(index(ep_addr))
                .filter(|ep| ep.is_claimed())
                .ok_or(Error::NotClaimed)?;
            ep.status.remove(Status::CLAIMED);
            Ok(())
        })
    }

    /// Submit a transfer of `len` bytes using `buffer`
    ///
    /// The endpoint may be idle, or claimed by the caller; submission consumes
    /// the claim. Returns [`Error::InvalidState`] if the endpoint is closed or
    /// stalled, and [`Error::Busy`] if a transfer is already in flight. In both
    /// cases, the endpoint state doesn't change. If the controller rejects the
    /// transfer, the endpoint returns to the state it had before the call.
    ///
    /// # Safety
    ///
    /// `buffer` must be valid for reads (IN) or writes (OUT) of `len` bytes,
    /// and must not be otherwise accessed, until the transfer completes, or
    /// until the endpoint is stalled or closed. `buffer` may be null if `len`
    /// is zero.
    pub unsafe fn submit_transfer(
        &self,
        ep_addr: EndpointAddress,
        buffer: *mut u8,
        len: u16,
    ) -> Result<()> {
        self.with_slots(|slots| {
            let ep = slots
                .endpoints
                .get_mut(index(ep_addr))
                .filter(|ep| ep.is_open() && !ep.is_stalled())
                .ok_or(Error::InvalidState)?;
            if ep.is_busy() {
                return Err(Error::Busy);
            }

            let before = *ep;
            ep.status.remove(Status::CLAIMED);
            ep.status.insert(Status::BUSY);
            ep.transfer = Some(Transfer::new(buffer, len));

            // Safety: caller upholds the buffer contract.
            let submitted = unsafe { slots.controller.submit_transfer(ep_addr, buffer, len) };
            if let Err(err) = submitted {
                *ep = before;
                warn!("EP{} {} SUBMIT {}", ep_addr.index(), ep_addr.direction(), err);
                return Err(err);
            }

            trace!("EP{} {} XFER {}", ep_addr.index(), ep_addr.direction(), len);
            Ok(())
        })
    }

    /// Record a transfer completion reported by the controller
    ///
    /// Call this from the controller's interrupt handler. The endpoint becomes
    /// idle, and the returned [`Completion`] describes what to tell the class
    /// driver. Don't notify the driver from the interrupt; defer it.
    ///
    /// Returns `None` for a completion that's no longer wanted, because the
    /// endpoint was closed or stalled after the transfer was submitted.
    pub fn on_transfer_complete(
        &self,
        ep_addr: EndpointAddress,
        bytes: u32,
        result: TransferResult,
    ) -> Option<Completion> {
        self.with_slots(|slots| {
            let Some(ep) = slots
                .endpoints
                .get_mut(index(ep_addr))
                .filter(|ep| ep.is_busy())
            else {
                warn!("EP{} {} STALE COMPLETION", ep_addr.index(), ep_addr.direction());
                return None;
            };

            ep.status.remove(Status::BUSY);
            ep.result = Some(result);
            let transfer = ep.transfer.as_mut()?;
            transfer.set_transferred(bytes);

            trace!(
                "EP{} {} DONE {} {}",
                ep_addr.index(),
                ep_addr.direction(),
                transfer.transferred(),
                result
            );
            Some(Completion {
                ep_addr,
                result,
                bytes: transfer.transferred(),
                driver: ep.driver,
            })
        })
    }

    /// Stall the endpoint
    ///
    /// Stalling a busy endpoint aborts its transfer, and the caller may reuse
    /// the transfer's buffer once this returns. Stalling always drops the
    /// claim. Returns [`Error::InvalidState`] if the endpoint is closed.
    pub fn stall(&self, ep_addr: EndpointAddress) -> Result<()> {
        self.with_slots(|slots| {
            let ep = slots
                .endpoints
                .get_mut(index(ep_addr))
                .filter(|ep| ep.is_open())
                .ok_or(Error::InvalidState)?;
            if ep.is_busy() {
                ep.transfer = None;
            }
            ep.status.remove(Status::BUSY | Status::CLAIMED);
            ep.status.insert(Status::STALLED);
            slots.controller.stall_endpoint(ep_addr);
            debug!("STALL EP{} {}", ep_addr.index(), ep_addr.direction());
            Ok(())
        })
    }

    /// Clear the endpoint stall
    ///
    /// Does nothing if the endpoint isn't stalled. Returns [`Error::InvalidState`]
    /// if the endpoint is closed.
    pub fn clear_stall(&self, ep_addr: EndpointAddress) -> Result<()> {
        self.with_slots(|slots| {
            let ep = slots
                .endpoints
                .get_mut(index(ep_addr))
                .filter(|ep| ep.is_open())
                .ok_or(Error::InvalidState)?;
            if ep.is_stalled() {
                ep.status.remove(Status::STALLED);
                slots.controller.clear_stall(ep_addr);
                debug!("UNSTALL EP{} {}", ep_addr.index(), ep_addr.direction());
            }
            Ok(())
        })
    }

    /// Returns a snapshot of the endpoint state
    ///
    /// Addresses without a slot look closed.
    pub fn state(&self, ep_addr: EndpointAddress) -> EndpointState {
        self.with_slots(|slots| {
            slots
                .endpoints
                .get(index(ep_addr))
                .copied()
                .unwrap_or(EndpointState::CLOSED)
        })
    }

    pub fn is_open(&self, ep_addr: EndpointAddress) -> bool {
        self.state(ep_addr).is_open()
    }

    pub fn is_claimed(&self, ep_addr: EndpointAddress) -> bool {
        self.state(ep_addr).is_claimed()
    }

    /// Check if a transfer is in flight
    pub fn is_busy(&self, ep_addr: EndpointAddress) -> bool {
        self.state(ep_addr).is_busy()
    }

    pub fn is_stalled(&self, ep_addr: EndpointAddress) -> bool {
        self.state(ep_addr).is_stalled()
    }

    /// Returns `true` if the endpoint is neither busy nor stalled
    pub fn is_ready(&self, ep_addr: EndpointAddress) -> bool {
        self.state(ep_addr).is_ready()
    }

    /// Run `func` on an open endpoint, or return [`Error::InvalidState`]
    fn with_endpoint<R>(
        &self,
        ep_addr: EndpointAddress,
        func: impl FnOnce(&mut EndpointState) -> Result<R>,
    ) -> Result<R> {
        self.with_slots(|slots| {
            let ep = slots
                .endpoints
                .get_mut(index(ep_addr))
                .filter(|ep| ep.is_open())
                .ok_or(Error::InvalidState)?;
            func(ep)
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::endpoint::TransferType;

    /// Counts controller calls, and fails on demand
    #[derive(Default)]
    pub struct MockController {
        /// Number of physical endpoints that can still be opened
        pub free: usize,
        pub opened: usize,
        pub closed: usize,
        pub submitted: usize,
        pub stalled: usize,
        pub unstalled: usize,
        pub reject_submit: bool,
        /// Endpoints with a transfer in flight, one bit per slot index
        pub in_flight: u32,
    }

    impl MockController {
        pub fn with_free(free: usize) -> Self {
            MockController {
                free,
                ..Default::default()
            }
        }
    }

    impl Controller for MockController {
        fn open_endpoint(&mut self, _: &EndpointDescriptor) -> Result<()> {
            self.free = self.free.checked_sub(1).ok_or(Error::ResourceExhausted)?;
            self.opened += 1;
            Ok(())
        }
        fn close_endpoint(&mut self, ep_addr: EndpointAddress) {
            self.free += 1;
            self.closed += 1;
            self.in_flight &= !(1 << index(ep_addr));
        }
        unsafe fn submit_transfer(
            &mut self,
            ep_addr: EndpointAddress,
            _: *mut u8,
            _: u16,
        ) -> Result<()> {
            if self.reject_submit {
                return Err(Error::ResourceExhausted);
            }
            self.submitted += 1;
            self.in_flight |= 1 << index(ep_addr);
            Ok(())
        }
        fn stall_endpoint(&mut self, ep_addr: EndpointAddress) {
            self.stalled += 1;
            self.in_flight &= !(1 << index(ep_addr));
        }
        fn clear_stall(&mut self, _: EndpointAddress) {
            self.unstalled += 1;
        }
    }

    pub fn bulk(addr: u8) -> EndpointDescriptor {
        EndpointDescriptor::new(EndpointAddress::from(addr), TransferType::Bulk, 64, 0)
    }

    fn registry() -> EndpointRegistry<MockController> {
        EndpointRegistry::new(MockController::with_free(MAX_ENDPOINTS))
    }

    fn submit(registry: &EndpointRegistry<MockController>, addr: EndpointAddress) -> Result<()> {
        static mut BUFFER: [u8; 64] = [0; 64];
        // Safety: tests never read or write the buffer.
        unsafe {
            let buffer = core::ptr::addr_of_mut!(BUFFER).cast::<u8>();
            registry.submit_transfer(addr, buffer, 64)
        }
    }

    const EP1_IN: u8 = 0x81;

    #[test]
    fn index_address_inverse() {
        for idx in 0..MAX_ENDPOINTS {
            assert_eq!(index(address(idx)), idx);
        }
        assert_eq!(index(EndpointAddress::from(0x00)), 0);
        assert_eq!(index(EndpointAddress::from(0x80)), 1);
        assert_eq!(index(EndpointAddress::from(0x87)), 15);
    }

    #[test]
    fn open_endpoint() {
        let registry = registry();
        let addr = EndpointAddress::from(EP1_IN);
        assert!(!registry.is_open(addr));

        registry.open(&bulk(EP1_IN)).unwrap();
        let state = registry.state(addr);
        assert!(state.is_open());
        assert!(state.is_ready());
        assert_eq!(state.kind(), TransferType::Bulk);
        assert_eq!(state.max_packet_size(), 64);

        assert_eq!(registry.open(&bulk(EP1_IN)), Err(Error::AlreadyOpen));
        assert_eq!(registry.with_controller(|ctrl| ctrl.opened), 1);
    }

    #[test]
    fn open_beyond_slots() {
        let registry: EndpointRegistry<_, 4> =
            EndpointRegistry::new(MockController::with_free(MAX_ENDPOINTS));
        assert_eq!(registry.capacity(), 4);
        registry.open(&bulk(0x01)).unwrap();
        registry.open(&bulk(0x81)).unwrap();
        assert_eq!(registry.open(&bulk(0x02)), Err(Error::ResourceExhausted));
        assert!(!registry.is_open(EndpointAddress::from(0x02)));
    }

    #[test]
    fn open_without_physical_endpoint() {
        let registry: EndpointRegistry<_> = EndpointRegistry::new(MockController::with_free(1));
        registry.open(&bulk(0x01)).unwrap();
        assert_eq!(registry.open(&bulk(0x81)), Err(Error::ResourceExhausted));
        assert_eq!(registry.state(EndpointAddress::from(0x81)), EndpointState::CLOSED);
    }

    #[test]
    fn claim_release() {
        let registry = registry();
        let addr = EndpointAddress::from(EP1_IN);
        assert_eq!(registry.claim(addr), Err(Error::InvalidState));

        registry.open(&bulk(EP1_IN)).unwrap();
        registry.claim(addr).unwrap();
        assert!(registry.is_claimed(addr));
        assert_eq!(registry.claim(addr), Err(Error::Busy));

        registry.release(addr).unwrap();
        assert_eq!(registry.release(addr), Err(Error::NotClaimed));
        registry.claim(addr).unwrap();
    }

    #[test]
    fn release_closed() {
        let registry = registry();
        assert_eq!(
            registry.release(EndpointAddress::from(EP1_IN)),
            Err(Error::NotClaimed)
        );
    }

    #[test]
    fn submit_consumes_claim() {
        let registry = registry();
        let addr = EndpointAddress::from(EP1_IN);
        registry.open(&bulk(EP1_IN)).unwrap();

        registry.claim(addr).unwrap();
        submit(&registry, addr).unwrap();
        let state = registry.state(addr);
        assert!(state.is_busy());
        assert!(!state.is_claimed());
        assert!(!state.is_ready());
        assert_eq!(state.transfer().unwrap().total(), 64);

        assert_eq!(submit(&registry, addr), Err(Error::Busy));
        assert_eq!(registry.claim(addr), Err(Error::Busy));
        assert_eq!(registry.with_controller(|ctrl| ctrl.submitted), 1);
    }

    #[test]
    fn submit_unclaimed() {
        let registry = registry();
        let addr = EndpointAddress::from(EP1_IN);
        registry.open(&bulk(EP1_IN)).unwrap();
        submit(&registry, addr).unwrap();
        assert!(registry.is_busy(addr));
    }

    #[test]
    fn submit_closed_or_stalled() {
        let registry = registry();
        let addr = EndpointAddress::from(EP1_IN);
        assert_eq!(submit(&registry, addr), Err(Error::InvalidState));
        assert_eq!(registry.state(addr), EndpointState::CLOSED);

        registry.open(&bulk(EP1_IN)).unwrap();
        registry.stall(addr).unwrap();
        let before = registry.state(addr);
        assert_eq!(submit(&registry, addr), Err(Error::InvalidState));
        assert_eq!(registry.state(addr), before);
        assert_eq!(registry.with_controller(|ctrl| ctrl.submitted), 0);
    }

    #[test]
    fn rejected_submit_restores_claim() {
        let registry = registry();
        let addr = EndpointAddress::from(EP1_IN);
        registry.open(&bulk(EP1_IN)).unwrap();
        registry.claim(addr).unwrap();
        let before = registry.state(addr);

        registry.with_controller(|ctrl| ctrl.reject_submit = true);
        assert_eq!(submit(&registry, addr), Err(Error::ResourceExhausted));
        assert_eq!(registry.state(addr), before);
    }

    #[test]
    fn complete_transfer() {
        let registry = registry();
        let addr = EndpointAddress::from(EP1_IN);
        registry.open_for(&bulk(EP1_IN), Some(3)).unwrap();
        submit(&registry, addr).unwrap();

        let completion = registry
            .on_transfer_complete(addr, 13, TransferResult::Success)
            .unwrap();
        assert_eq!(
            completion,
            Completion {
                ep_addr: addr,
                result: TransferResult::Success,
                bytes: 13,
                driver: Some(3),
            }
        );

        let state = registry.state(addr);
        assert!(state.is_ready());
        assert_eq!(state.result(), Some(TransferResult::Success));
        assert_eq!(state.transfer().unwrap().transferred(), 13);

        // Nothing in flight
        assert!(registry
            .on_transfer_complete(addr, 13, TransferResult::Success)
            .is_none());
    }

    #[test]
    fn late_completion_after_close() {
        let registry = registry();
        let addr = EndpointAddress::from(EP1_IN);
        registry.open(&bulk(EP1_IN)).unwrap();
        submit(&registry, addr).unwrap();

        registry.close(addr);
        assert_eq!(registry.state(addr), EndpointState::CLOSED);
        assert_eq!(registry.with_controller(|ctrl| ctrl.in_flight), 0);
        assert!(registry
            .on_transfer_complete(addr, 64, TransferResult::Success)
            .is_none());
        assert_eq!(registry.state(addr), EndpointState::CLOSED);
        assert_eq!(registry.with_controller(|ctrl| ctrl.closed), 1);
    }

    #[test]
    fn stall_aborts_transfer() {
        let registry = registry();
        let addr = EndpointAddress::from(EP1_IN);
        registry.open(&bulk(EP1_IN)).unwrap();
        registry.claim(addr).unwrap();
        submit(&registry, addr).unwrap();

        assert_eq!(registry.with_controller(|ctrl| ctrl.in_flight), 1 << index(addr));

        registry.stall(addr).unwrap();
        let state = registry.state(addr);
        assert!(state.is_stalled());
        assert!(!state.is_busy());
        assert!(!state.is_claimed());
        assert!(state.transfer().is_none());
        // The controller let go of the buffer, too.
        assert_eq!(registry.with_controller(|ctrl| ctrl.in_flight), 0);
        assert!(registry
            .on_transfer_complete(addr, 64, TransferResult::Success)
            .is_none());
        assert_eq!(registry.claim(addr), Err(Error::InvalidState));

        registry.clear_stall(addr).unwrap();
        assert!(registry.is_ready(addr));
        registry.clear_stall(addr).unwrap();
        assert_eq!(registry.with_controller(|ctrl| (ctrl.stalled, ctrl.unstalled)), (1, 1));
    }

    #[test]
    fn stall_releases_claim() {
        let registry = registry();
        let addr = EndpointAddress::from(EP1_IN);
        registry.open(&bulk(EP1_IN)).unwrap();
        registry.claim(addr).unwrap();
        registry.stall(addr).unwrap();
        registry.clear_stall(addr).unwrap();
        registry.claim(addr).unwrap();
    }

    #[test]
    fn stall_closed() {
        let registry = registry();
        let addr = EndpointAddress::from(EP1_IN);
        assert_eq!(registry.stall(addr), Err(Error::InvalidState));
        assert_eq!(registry.clear_stall(addr), Err(Error::InvalidState));
    }

    #[test]
    fn reopen_is_fresh() {
        let registry = registry();
        let addr = EndpointAddress::from(EP1_IN);
        registry.open(&bulk(EP1_IN)).unwrap();
        let fresh = registry.state(addr);

        registry.claim(addr).unwrap();
        submit(&registry, addr).unwrap();
        registry.stall(addr).unwrap();
        registry.close(addr);

        registry.open(&bulk(EP1_IN)).unwrap();
        assert_eq!(registry.state(addr), fresh);
    }

    #[test]
    fn close_all_endpoints() {
        let registry = registry();
        registry.open(&bulk(0x01)).unwrap();
        registry.open(&bulk(0x81)).unwrap();
        registry.open(&bulk(0x87)).unwrap();
        registry.close_all();
        for addr in [0x01, 0x81, 0x87] {
            assert!(!registry.is_open(EndpointAddress::from(addr)));
        }
        assert_eq!(registry.with_controller(|ctrl| ctrl.closed), 3);
        assert_eq!(registry.with_controller(|ctrl| ctrl.free), MAX_ENDPOINTS);
    }
}
