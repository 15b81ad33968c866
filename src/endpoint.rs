use crate::UsbDirection;
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// USB endpoint address that contains a direction and number.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EndpointAddress(u8);

impl From<u8> for EndpointAddress {
    #[inline]
    fn from(addr: u8) -> EndpointAddress {
        EndpointAddress(addr)
    }
}

impl From<EndpointAddress> for u8 {
    #[inline]
    fn from(addr: EndpointAddress) -> u8 {
        addr.0
    }
}

impl EndpointAddress {
    const INBITS: u8 = UsbDirection::In as u8;

    /// Endpoint 0 OUT, the control endpoint receiving SETUP and OUT data packets.
    pub const EP0_OUT: EndpointAddress = EndpointAddress(0x00);

    /// Endpoint 0 IN, the control endpoint sending IN data and status packets.
    pub const EP0_IN: EndpointAddress = EndpointAddress(0x80);

    /// Constructs an EndpointAddress from its raw byte form in a const context.
    #[inline]
    pub const fn from_u8(addr: u8) -> Self {
        EndpointAddress(addr)
    }

    /// Constructs a new EndpointAddress with the given number and direction.
    #[inline]
    pub fn from_parts(number: u8, dir: UsbDirection) -> Self {
        EndpointAddress((number & 0x0f) | dir as u8)
    }

    /// Gets the direction part of the address.
    #[inline]
    pub fn direction(&self) -> UsbDirection {
        if (self.0 & Self::INBITS) != 0 {
            UsbDirection::In
        } else {
            UsbDirection::Out
        }
    }

    /// Returns true if the direction is IN, otherwise false.
    #[inline]
    pub fn is_in(&self) -> bool {
        (self.0 & Self::INBITS) != 0
    }

    /// Gets the number part of the endpoint address.
    #[inline]
    pub fn number(&self) -> u8 {
        self.0 & !Self::INBITS
    }

    /// Returns true if this is one of the two halves of control endpoint 0.
    #[inline]
    pub fn is_control_zero(&self) -> bool {
        self.number() == 0
    }
}

/// Synchronization type of an isochronous endpoint (bmAttributes bits 3..2).
#[repr(u8)]
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IsochronousSynchronizationType {
    /// Synchronization is not implemented for this endpoint.
    NoSynchronization = 0,
    /// Source and Sink sample clocks are free running.
    Asynchronous = 1,
    /// Source sample clock is locked to Sink, Sink sample clock is locked to data flow.
    Adaptive = 2,
    /// Source and Sink sample clocks are locked to USB SOF.
    Synchronous = 3,
}

/// Intended use of an isochronous endpoint (bmAttributes bits 5..4).
#[repr(u8)]
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IsochronousUsageType {
    /// Endpoint is used for isochronous data.
    Data = 0,
    /// Feedback for synchronization.
    Feedback = 1,
    /// Endpoint is data and provides implicit feedback for synchronization.
    ImplicitFeedbackData = 2,
}

/// Maximum packet size of a control endpoint. Full-speed control endpoints only allow these four
/// values, so the type makes any other size unrepresentable.
#[repr(u8)]
#[derive(Copy, Clone, Eq, PartialEq, Debug, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ControlPacketSize {
    /// 8 bytes
    Size8 = 8,
    /// 16 bytes
    Size16 = 16,
    /// 32 bytes
    Size32 = 32,
    /// 64 bytes
    Size64 = 64,
}

impl ControlPacketSize {
    /// Gets the packet size in bytes.
    pub fn bytes(self) -> u16 {
        u8::from(self) as u16
    }
}

/// USB endpoint transfer type.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EndpointType {
    /// Control endpoint. Used for device management. Only the host can initiate requests. Usually
    /// used only endpoint 0.
    Control(ControlPacketSize),
    /// Isochronous endpoint. Used for time-critical unreliable data. The stack can describe these
    /// endpoints but does not run isochronous transfers.
    Isochronous {
        /// Synchronization model used for the data stream that this endpoint relates to.
        synchronization: IsochronousSynchronizationType,
        /// Endpoint's role in the synchronization model selected by `synchronization`.
        usage: IsochronousUsageType,
    },
    /// Bulk endpoint. Used for large amounts of best-effort reliable data.
    Bulk,
    /// Interrupt endpoint. Used for small amounts of time-critical reliable data.
    Interrupt,
}

impl EndpointType {
    /// Format EndpointType for use in bmAttributes transfer type field USB 2.0 spec section 9.6.6
    pub fn to_bm_attributes(&self) -> u8 {
        match self {
            EndpointType::Control(_) => 0b00,
            EndpointType::Isochronous {
                synchronization,
                usage,
            } => {
                let sync_bits = (*synchronization as u8) << 2;
                let usage_bits = (*usage as u8) << 4;
                0b01 | sync_bits | usage_bits
            }
            EndpointType::Bulk => 0b10,
            EndpointType::Interrupt => 0b11,
        }
    }
}
