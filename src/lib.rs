//! Endpoint transfers and USB frame timing for device-side USB stacks
//!
//! `usbd-core` sits between an interrupt-driven USB device controller and the
//! class drivers (CDC, HID, mass storage, ...) of your USB stack. It provides
//!
//! - an [`EndpointRegistry`] that tracks each endpoint's open / claimed / busy /
//!   stalled state, and arbitrates transfer submission between task code and
//!   the controller interrupt,
//! - a [`FrameClock`] that turns hardware start-of-frame (SOF) samples into a
//!   frame time estimate, and keeps that estimate alive when SOF interrupts
//!   are missed,
//! - a [`DeferredQueue`] that moves work out of the interrupt handler, so that
//!   class driver callbacks never run with interrupts masked.
//!
//! [`Device`] ties the three together for one controller port. To use it,
//! implement [`Controller`] for your USB peripheral, and [`TimeSource`] for a
//! free-running 1us counter.
//!
//! # Example
//!
//! ```
//! use usbd_core::{
//!     ClassDriver, Controller, DeferredQueue, Device, EndpointAddress, EndpointDescriptor,
//!     FrameClockConfig, FrameSource, Speed, TimeSource, TransferResult,
//! };
//!
//! struct MyController;
//!
//! impl Controller for MyController {
//!     fn open_endpoint(&mut self, _: &EndpointDescriptor) -> usbd_core::Result<()> {
//!         Ok(())
//!     }
//!     fn close_endpoint(&mut self, _: EndpointAddress) {}
//!     unsafe fn submit_transfer(
//!         &mut self,
//!         _: EndpointAddress,
//!         _: *mut u8,
//!         _: u16,
//!     ) -> usbd_core::Result<()> {
//!         Ok(())
//!     }
//!     fn stall_endpoint(&mut self, _: EndpointAddress) {}
//!     fn clear_stall(&mut self, _: EndpointAddress) {}
//! }
//!
//! struct Gpt;
//! impl TimeSource for Gpt {
//!     fn now_us(&self) -> u32 {
//!         1_125
//!     }
//! }
//!
//! static DRIVERS: [ClassDriver; 0] = [];
//!
//! let queue = DeferredQueue::<_, 8>::new();
//! let device: Device<'_, _, _> = Device::new(
//!     MyController,
//!     Gpt,
//!     &queue,
//!     &DRIVERS,
//!     FrameClockConfig::from(Speed::High),
//! );
//!
//! // From the USB interrupt handler...
//! device.on_sof(1_000, FrameSource::Hardware);
//! device.on_sof(1_125, FrameSource::Hardware);
//! assert_eq!(device.frame_time_32(), 1_125);
//!
//! // From the task that services deferred work...
//! queue.run();
//! ```

#![no_std]

// Let `defmt` paths resolve from our derives and logging macros.
#[cfg(feature = "defmt-03")]
extern crate defmt_03 as defmt;

#[macro_use]
mod log;

mod class;
mod controller;
mod deferred;
mod device;
mod endpoint;
mod error;
mod registry;
pub mod sof;

pub use class::{ClassDriver, Event};
pub use controller::{Controller, TimeSource};
pub use deferred::{DeferredCall, DeferredQueue, Origin};
pub use device::{Device, EndpointPair, FrameSource};
pub use endpoint::{EndpointDescriptor, EndpointState, Status, Transfer, TransferResult, TransferType};
pub use error::{Error, Result};
pub use registry::{Completion, EndpointRegistry, MAX_ENDPOINTS};
pub use sof::{FrameClock, FrameClockConfig, LockState, Speed};

pub use usb_device::{endpoint::EndpointAddress, UsbDirection};
