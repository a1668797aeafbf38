//! One USB controller port, with its endpoints, frame clock, and class drivers

use crate::{
    class::{ClassDriver, Event},
    controller::{Controller, TimeSource},
    deferred::{DeferredQueue, Origin},
    endpoint::{EndpointDescriptor, EndpointState, TransferResult, TransferType},
    registry::{Completion, EndpointRegistry, MAX_ENDPOINTS},
    sof::{FrameClock, FrameClockConfig, LockState},
    Error, Result,
};
use usb_device::{endpoint::EndpointAddress, UsbDirection};

/// Where a frame came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum FrameSource {
    /// The controller detected a start of frame.
    Hardware,
    /// A timer stood in for a missing start of frame.
    Synthetic,
}

/// Endpoints opened by [`Device::open_endpoint_pair`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EndpointPair {
    pub ep_out: Option<EndpointAddress>,
    pub ep_in: Option<EndpointAddress>,
}

fn origin(in_isr: bool) -> Origin {
    if in_isr {
        Origin::Isr
    } else {
        Origin::Task
    }
}

/// A USB device controller port
///
/// `Device` connects the controller interrupt, the class drivers, and the task
/// that drains the deferred queue. All methods take `&self`; you may share a
/// `Device` between an interrupt handler and tasks.
///
/// `COUNT` is the number of endpoint slots (see [`EndpointRegistry`]), and
/// `DEPTH` is the deferred queue capacity.
pub struct Device<'a, C, T, const COUNT: usize = MAX_ENDPOINTS, const DEPTH: usize = 8> {
    rhport: u8,
    clock: FrameClock,
    endpoints: EndpointRegistry<C, COUNT>,
    queue: &'a DeferredQueue<Event, DEPTH>,
    drivers: &'static [ClassDriver],
    time: T,
    lock_handler: Option<fn(LockState)>,
}

impl<'a, C, T, const COUNT: usize, const DEPTH: usize> Device<'a, C, T, COUNT, DEPTH>
where
    C: Controller,
    T: TimeSource,
{
    /// Create a device for port 0
    ///
    /// Driver indices, as given to [`open_endpoint`](Self::open_endpoint),
    /// index into `drivers`.
    pub fn new(
        controller: C,
        time: T,
        queue: &'a DeferredQueue<Event, DEPTH>,
        drivers: &'static [ClassDriver],
        config: FrameClockConfig,
    ) -> Self {
        Device {
            rhport: 0,
            clock: FrameClock::new(config),
            endpoints: EndpointRegistry::new(controller),
            queue,
            drivers,
            time,
            lock_handler: None,
        }
    }

    /// Set the port number passed to class drivers
    pub fn with_rhport(mut self, rhport: u8) -> Self {
        self.rhport = rhport;
        self
    }

    /// Call `handler` from the deferred queue when the frame clock locks, or
    /// unlocks
    pub fn set_lock_handler(&mut self, handler: fn(LockState)) {
        self.lock_handler = Some(handler);
    }

    /// Initialize every class driver
    pub fn init(&self) {
        for driver in self.drivers {
            debug!("{=str} INIT", driver.name);
            (driver.init)();
        }
    }

    pub fn rhport(&self) -> u8 {
        self.rhport
    }

    /// Returns the frame clock
    pub fn clock(&self) -> &FrameClock {
        &self.clock
    }

    /// Returns the endpoint registry
    pub fn endpoints(&self) -> &EndpointRegistry<C, COUNT> {
        &self.endpoints
    }

    /// Returns [`Error::QueueFull`] if the event is lost. The queue counts
    /// lost ISR events; task callers get the error.
    fn defer_event(&self, event: Event, origin: Origin) -> Result<()> {
        self.queue.defer(Event::dispatch, event, origin)
    }

    fn notify_lock(&self, transition: Option<LockState>, origin: Origin) -> Result<()> {
        if let Some(state) = transition {
            debug!("SOF {}", state);
            if let Some(handler) = self.lock_handler {
                return self.defer_event(Event::Lock { handler, state }, origin);
            }
        }
        Ok(())
    }

    //
    // Frame timing
    //

    /// Seed the frame time; see [`FrameClock::set_sof`]
    ///
    /// Returns [`Error::QueueFull`] if the lock handler couldn't hear about
    /// the unlock. The clock is still seeded.
    pub fn set_sof(&self, sof_us: u32, in_isr: bool) -> Result<()> {
        self.notify_lock(self.clock.set_sof(sof_us), origin(in_isr))
    }

    /// Reset the frame interval; see [`FrameClock::set_interval`]
    ///
    /// A direct sample that falls outside of the new availability window
    /// expires. Returns [`Error::QueueFull`] if the lock handler couldn't hear
    /// about it; the interval still changed.
    pub fn set_sof_interval(&self, interval_us: u16, in_isr: bool) -> Result<()> {
        self.clock.set_interval(interval_us)?;
        self.expire_now(origin(in_isr))
    }

    /// Set the availability margin; see [`FrameClock::set_margin`]
    pub fn set_sof_margin(&self, margin_us: u8, in_isr: bool) -> Result<()> {
        self.clock.set_margin(margin_us)?;
        self.expire_now(origin(in_isr))
    }

    fn expire_now(&self, origin: Origin) -> Result<()> {
        let now = self.time.now_us();
        self.notify_lock(self.clock.expire(now), origin)
    }

    /// Handle a start of frame, from the controller interrupt
    ///
    /// `frame_us` is the time of the frame. Class drivers with a `sof` callback
    /// hear about hardware frames only.
    pub fn on_sof(&self, frame_us: u32, source: FrameSource) {
        let transition = match source {
            FrameSource::Hardware => self.clock.record_direct_sample(frame_us),
            FrameSource::Synthetic => self.clock.record_synthetic_tick(frame_us),
        };
        // The queue counts what an interrupt can't deliver.
        self.notify_lock(transition, Origin::Isr).ok();

        if source == FrameSource::Hardware {
            for driver in self.drivers.iter().filter(|driver| driver.sof.is_some()) {
                self.defer_event(
                    Event::Frame {
                        driver,
                        rhport: self.rhport,
                    },
                    Origin::Isr,
                )
                .ok();
            }
        }
    }

    /// Check the frame clock, from a mid-frame timer interrupt
    pub fn on_mid_frame(&self) {
        self.expire_now(Origin::Isr).ok();
    }

    /// Returns the frame time estimate for the current time
    ///
    /// If the read unlocks the frame clock, the lock handler notification
    /// counts as an interrupt's. When the queue is full, it's lost, and the
    /// queue's [`dropped()`](DeferredQueue::dropped) count increments. Use
    /// [`frame_time_32_from()`](Self::frame_time_32_from) from a task that
    /// should see the error instead.
    pub fn frame_time_32(&self) -> u32 {
        let now = self.time.now_us();
        self.notify_lock(self.clock.expire(now), Origin::Isr).ok();
        self.clock.frame_time_32(now)
    }

    /// Returns the frame time estimate for the current time, from a known
    /// context
    ///
    /// From a task (`in_isr` is false), this returns [`Error::QueueFull`] if
    /// the lock handler couldn't hear about an unlock. Read again for the
    /// frame time; the clock already unlocked.
    pub fn frame_time_32_from(&self, in_isr: bool) -> Result<u32> {
        let now = self.time.now_us();
        let notified = self.notify_lock(self.clock.expire(now), origin(in_isr));
        let frame_time = self.clock.frame_time_32(now);
        match notified {
            Err(err) if !in_isr => Err(err),
            _ => Ok(frame_time),
        }
    }

    /// Returns the low 16 bits of [`frame_time_32()`](Self::frame_time_32)
    pub fn frame_time_16(&self) -> u16 {
        self.frame_time_32() as u16
    }

    //
    // Endpoints
    //

    /// Handle a transfer completion, from the controller interrupt
    ///
    /// If a class driver owns the endpoint, this defers its `xfer` callback.
    /// The completion is returned for endpoints without a driver, like the
    /// control endpoints. Stale completions return `None`.
    pub fn on_transfer_complete(
        &self,
        ep_addr: EndpointAddress,
        bytes: u32,
        result: TransferResult,
    ) -> Option<Completion> {
        let completion = self
            .endpoints
            .on_transfer_complete(ep_addr, bytes, result)?;
        let driver = completion
            .driver
            .and_then(|idx| self.drivers.get(usize::from(idx)));
        if let Some(driver) = driver {
            self.defer_event(
                Event::Transfer {
                    driver,
                    rhport: self.rhport,
                    ep_addr: completion.ep_addr,
                    result: completion.result,
                    bytes: completion.bytes,
                },
                Origin::Isr,
            )
            .ok();
        }
        Some(completion)
    }

    /// Close every endpoint, and tell every class driver about the reset
    ///
    /// Returns [`Error::QueueFull`] if a driver couldn't hear about the reset.
    /// The endpoints are closed regardless, and the remaining drivers are
    /// still notified.
    pub fn bus_reset(&self, in_isr: bool) -> Result<()> {
        debug!("BUS RESET");
        self.endpoints.close_all();
        let mut result = Ok(());
        for driver in self.drivers {
            let deferred = self.defer_event(
                Event::Reset {
                    driver,
                    rhport: self.rhport,
                },
                origin(in_isr),
            );
            result = result.and(deferred);
        }
        result
    }

    /// Open the OUT / IN endpoints described by the first `ep_count`
    /// descriptors of `descriptors`
    ///
    /// Every endpoint must have transfer type `kind`, and there can be at most
    /// one endpoint per direction. Otherwise, this returns
    /// [`Error::InvalidDescriptor`]. Either every endpoint opens, or none do.
    ///
    /// Returns [`Error::InvalidState`] if there's no class driver at index
    /// `driver`.
    pub fn open_endpoint_pair(
        &self,
        descriptors: &[u8],
        ep_count: usize,
        kind: TransferType,
        driver: Option<u8>,
    ) -> Result<EndpointPair> {
        self.check_driver(driver)?;
        let mut pair = EndpointPair::default();
        let mut remaining = descriptors;
        for _ in 0..ep_count {
            let opened = EndpointDescriptor::parse(remaining).and_then(|descriptor| {
                let slot = match descriptor.direction() {
                    UsbDirection::Out => &mut pair.ep_out,
                    UsbDirection::In => &mut pair.ep_in,
                };
                if descriptor.kind() != kind || slot.is_some() {
                    return Err(Error::InvalidDescriptor);
                }
                self.endpoints.open_for(&descriptor, driver)?;
                *slot = Some(descriptor.address());
                Ok(())
            });

            if let Err(err) = opened {
                warn!("OPEN PAIR {}", err);
                for ep_addr in [pair.ep_out, pair.ep_in].into_iter().flatten() {
                    self.endpoints.close(ep_addr);
                }
                return Err(err);
            }
            // parse() checked that bLength is in bounds.
            remaining = &remaining[usize::from(remaining[0])..];
        }
        Ok(pair)
    }

    /// Open an endpoint for the class driver at index `driver`
    ///
    /// Returns [`Error::InvalidState`] if there's no such class driver.
    pub fn open_endpoint(
        &self,
        descriptor: &EndpointDescriptor,
        driver: Option<u8>,
    ) -> Result<()> {
        self.check_driver(driver)?;
        self.endpoints.open_for(descriptor, driver)
    }

    fn check_driver(&self, driver: Option<u8>) -> Result<()> {
        match driver {
            Some(idx) if usize::from(idx) >= self.drivers.len() => Err(Error::InvalidState),
            _ => Ok(()),
        }
    }

    /// See [`EndpointRegistry::close`]
    pub fn close_endpoint(&self, ep_addr: EndpointAddress) {
        self.endpoints.close(ep_addr)
    }

    /// See [`EndpointRegistry::claim`]
    pub fn claim(&self, ep_addr: EndpointAddress) -> Result<()> {
        self.endpoints.claim(ep_addr)
    }

    /// See [`EndpointRegistry::release`]
    pub fn release(&self, ep_addr: EndpointAddress) -> Result<()> {
        self.endpoints.release(ep_addr)
    }

    /// Submit a transfer; see [`EndpointRegistry::submit_transfer`]
    ///
    /// # Safety
    ///
    /// See [`EndpointRegistry::submit_transfer`].
    pub unsafe fn submit_transfer(
        &self,
        ep_addr: EndpointAddress,
        buffer: *mut u8,
        len: u16,
    ) -> Result<()> {
        // Safety: caller upholds the buffer contract.
        unsafe { self.endpoints.submit_transfer(ep_addr, buffer, len) }
    }

    pub fn stall(&self, ep_addr: EndpointAddress) -> Result<()> {
        self.endpoints.stall(ep_addr)
    }

    pub fn clear_stall(&self, ep_addr: EndpointAddress) -> Result<()> {
        self.endpoints.clear_stall(ep_addr)
    }

    pub fn is_ready(&self, ep_addr: EndpointAddress) -> bool {
        self.endpoints.is_ready(ep_addr)
    }

    pub fn is_busy(&self, ep_addr: EndpointAddress) -> bool {
        self.endpoints.is_busy(ep_addr)
    }

    pub fn is_stalled(&self, ep_addr: EndpointAddress) -> bool {
        self.endpoints.is_stalled(ep_addr)
    }

    pub fn endpoint_state(&self, ep_addr: EndpointAddress) -> EndpointState {
        self.endpoints.state(ep_addr)
    }

    /// Defer `func(arg)` to the task that drains the queue
    pub fn defer(&self, func: fn(usize), arg: usize, in_isr: bool) -> Result<()> {
        self.queue
            .defer(Event::dispatch, Event::Call { func, arg }, origin(in_isr))
    }
}
