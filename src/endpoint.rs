//! Endpoint descriptors, transfers, and per-endpoint state

use crate::{Error, Result};
use usb_device::{endpoint::EndpointAddress, UsbDirection};

/// `bDescriptorType` of an endpoint descriptor
const DESCRIPTOR_TYPE_ENDPOINT: u8 = 0x05;
/// `bLength` of an endpoint descriptor
const DESCRIPTOR_LEN_ENDPOINT: usize = 7;

/// Endpoint transfer type, as encoded in `bmAttributes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[repr(u8)]
pub enum TransferType {
    Control = 0,
    Isochronous = 1,
    Bulk = 2,
    Interrupt = 3,
}

impl TransferType {
    fn from_attributes(bm_attributes: u8) -> Self {
        match bm_attributes & 0b11 {
            0 => TransferType::Control,
            1 => TransferType::Isochronous,
            2 => TransferType::Bulk,
            _ => TransferType::Interrupt,
        }
    }
}

/// The outcome of a transfer, reported by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum TransferResult {
    Success,
    Failed,
    Stalled,
    Timeout,
    Invalid,
}

/// A USB endpoint descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointDescriptor {
    address: EndpointAddress,
    kind: TransferType,
    max_packet_size: u16,
    interval: u8,
}

impl EndpointDescriptor {
    /// Describe an endpoint.
    ///
    /// `max_packet_size` is clamped to the 11 bits allowed by `wMaxPacketSize`.
    pub fn new(
        address: EndpointAddress,
        kind: TransferType,
        max_packet_size: u16,
        interval: u8,
    ) -> Self {
        EndpointDescriptor {
            address,
            kind,
            max_packet_size: max_packet_size & 0x7FF,
            interval,
        }
    }

    /// Parse the endpoint descriptor at the front of `bytes`.
    ///
    /// Trailing bytes, like the next descriptor in a configuration, are ignored.
    /// Returns [`Error::InvalidDescriptor`] if `bytes` doesn't start with an
    /// endpoint descriptor.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let len = *bytes.first().ok_or(Error::InvalidDescriptor)? as usize;
        if len < DESCRIPTOR_LEN_ENDPOINT
            || bytes.len() < len
            || bytes[1] != DESCRIPTOR_TYPE_ENDPOINT
        {
            return Err(Error::InvalidDescriptor);
        }
        Ok(EndpointDescriptor {
            address: EndpointAddress::from(bytes[2]),
            kind: TransferType::from_attributes(bytes[3]),
            // Bits 12..11 describe additional high-speed transactions.
            max_packet_size: u16::from_le_bytes([bytes[4], bytes[5]]) & 0x7FF,
            interval: bytes[6],
        })
    }

    /// Returns the endpoint address
    pub fn address(&self) -> EndpointAddress {
        self.address
    }

    /// Returns the transfer type
    pub fn kind(&self) -> TransferType {
        self.kind
    }

    /// Returns the maximum packet size, in bytes
    pub fn max_packet_size(&self) -> u16 {
        self.max_packet_size
    }

    /// Returns the polling interval (`bInterval`)
    pub fn interval(&self) -> u8 {
        self.interval
    }

    /// Returns the direction of the endpoint
    pub fn direction(&self) -> UsbDirection {
        self.address.direction()
    }
}

bitflags::bitflags! {
    /// Endpoint status flags
    ///
    /// `READY` isn't stored; see [`EndpointState::is_ready`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Status : u8 {
        /// The endpoint is open.
        const OPEN = 1 << 0;
        /// A caller holds the right to submit the next transfer.
        const CLAIMED = 1 << 1;
        /// A transfer is in flight.
        const BUSY = 1 << 2;
        /// The endpoint is halted.
        const STALLED = 1 << 3;
    }
}

/// A pending, or completed, transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transfer {
    buffer: *mut u8,
    total: u16,
    transferred: u16,
}

// Safety: the buffer pointer is only handed to the controller, and only
// while the submitter's lifetime contract holds. We never dereference it.
unsafe impl Send for Transfer {}

impl Transfer {
    pub(crate) const fn new(buffer: *mut u8, total: u16) -> Self {
        Transfer {
            buffer,
            total,
            transferred: 0,
        }
    }

    /// Returns the buffer supplied by the submitter
    pub fn buffer(&self) -> *mut u8 {
        self.buffer
    }

    /// Returns the number of bytes requested
    pub fn total(&self) -> u16 {
        self.total
    }

    /// Returns the number of bytes the controller reported
    pub fn transferred(&self) -> u16 {
        self.transferred
    }

    pub(crate) fn set_transferred(&mut self, bytes: u32) {
        self.transferred = bytes.min(self.total.into()) as u16;
    }
}

/// A snapshot of an endpoint's state.
///
/// A closed endpoint has no status flags, and no transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointState {
    pub(crate) status: Status,
    pub(crate) kind: TransferType,
    pub(crate) max_packet_size: u16,
    pub(crate) transfer: Option<Transfer>,
    pub(crate) result: Option<TransferResult>,
    pub(crate) driver: Option<u8>,
}

impl EndpointState {
    pub(crate) const CLOSED: Self = EndpointState {
        status: Status::empty(),
        kind: TransferType::Control,
        max_packet_size: 0,
        transfer: None,
        result: None,
        driver: None,
    };

    pub(crate) fn opened(descriptor: &EndpointDescriptor, driver: Option<u8>) -> Self {
        EndpointState {
            status: Status::OPEN,
            kind: descriptor.kind(),
            max_packet_size: descriptor.max_packet_size(),
            driver,
            ..Self::CLOSED
        }
    }

    /// Returns the raw status flags
    pub fn status(&self) -> Status {
        self.status
    }

    pub fn is_open(&self) -> bool {
        self.status.contains(Status::OPEN)
    }

    pub fn is_claimed(&self) -> bool {
        self.status.contains(Status::CLAIMED)
    }

    pub fn is_busy(&self) -> bool {
        self.status.contains(Status::BUSY)
    }

    pub fn is_stalled(&self) -> bool {
        self.status.contains(Status::STALLED)
    }

    /// Returns `true` if the endpoint is neither busy nor stalled
    pub fn is_ready(&self) -> bool {
        !self.status.intersects(Status::BUSY | Status::STALLED)
    }

    /// Returns the transfer type negotiated when the endpoint was opened
    pub fn kind(&self) -> TransferType {
        self.kind
    }

    /// Returns the maximum packet size negotiated when the endpoint was opened
    pub fn max_packet_size(&self) -> u16 {
        self.max_packet_size
    }

    /// Returns the pending (when busy) or last completed transfer
    pub fn transfer(&self) -> Option<&Transfer> {
        self.transfer.as_ref()
    }

    /// Returns the result of the last completed transfer
    pub fn result(&self) -> Option<TransferResult> {
        self.result
    }

    /// Returns the index of the class driver that owns this endpoint
    pub fn driver(&self) -> Option<u8> {
        self.driver
    }
}
