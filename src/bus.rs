use crate::endpoint::{EndpointAddress, EndpointType};
use crate::{Result, UsbError};
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Selects who moves the endpoint 0 buffer cursor forward between packets of a multi-packet
/// control transfer.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CursorOwner {
    /// The control pipe advances the cursor by one max packet per completed packet. IN packets are
    /// handed to [`UsbBus::write`] one at a time and OUT packets are pulled with [`UsbBus::read`].
    Engine,

    /// The peripheral driver advances the cursor itself, usually because a DMA engine or a FIFO
    /// interrupt moves the data. IN data is handed to [`UsbBus::write`] as the whole remaining
    /// transfer, and the driver reports how far it got with
    /// [`UsbDevice::ep0_in_advanced`](crate::device::UsbDevice::ep0_in_advanced). OUT data is
    /// delivered with
    /// [`UsbDevice::ep0_out_received`](crate::device::UsbDevice::ep0_out_received). The control
    /// pipe never advances the cursor in this mode.
    Peripheral,
}

/// Test mode selector from the high byte of `wIndex` in a SET_FEATURE(TEST_MODE) request. USB 2.0
/// section 7.1.20.
#[repr(u8)]
#[derive(Copy, Clone, Eq, PartialEq, Debug, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TestMode {
    /// Test_J
    J = 1,
    /// Test_K
    K = 2,
    /// Test_SE0_NAK
    Se0Nak = 3,
    /// Test_Packet
    Packet = 4,
    /// Test_Force_Enable
    ForceEnable = 5,
}

/// A trait for device-specific USB peripherals. Implement this to add support for a new hardware
/// platform.
///
/// The UsbBus is shared by reference between the [`UsbDevice`](crate::device::UsbDevice) and its
/// [`UsbClass`](crate::class::UsbClass), and therefore any required mutability must be implemented
/// using interior mutability. None of the methods may block: they are called from the USB
/// interrupt context.
pub trait UsbBus {
    /// Opens an endpoint with the given transfer type and maximum packet size. Called for endpoint
    /// 0 on every bus reset and by classes when a configuration is selected.
    ///
    /// # Errors
    ///
    /// * [`EndpointOverflow`](crate::UsbError::EndpointOverflow) - Available total number of
    ///   endpoints, endpoints of the specified type, or endpoint packet memory has been exhausted.
    /// * [`InvalidEndpoint`](crate::UsbError::InvalidEndpoint) - The endpoint number is not
    ///   supported by the peripheral.
    fn open_endpoint(
        &self,
        ep_addr: EndpointAddress,
        ep_type: EndpointType,
        max_packet_size: u16,
    ) -> Result<()>;

    /// Closes a previously opened endpoint.
    fn close_endpoint(&self, ep_addr: EndpointAddress) -> Result<()>;

    /// Sets or clears the STALL condition for an endpoint. If the endpoint is an OUT endpoint, it
    /// should be prepared to receive data again.
    fn set_stalled(&self, ep_addr: EndpointAddress, stalled: bool);

    /// Gets whether the STALL condition is set for an endpoint.
    fn is_stalled(&self, ep_addr: EndpointAddress) -> bool;

    /// Starts transmitting `buf` on the specified endpoint and returns the number of bytes
    /// accepted. An empty slice sends a zero-length packet.
    ///
    /// # Errors
    ///
    /// * [`InvalidEndpoint`](crate::UsbError::InvalidEndpoint) - The `ep_addr` does not point to a
    ///   valid endpoint that was previously opened.
    /// * [`WouldBlock`](crate::UsbError::WouldBlock) - A previously written packet is still pending
    ///   to be sent.
    /// * [`BufferOverflow`](crate::UsbError::BufferOverflow) - The packet is too long to fit in the
    ///   transmission buffer.
    fn write(&self, ep_addr: EndpointAddress, buf: &[u8]) -> Result<usize>;

    /// Arms an OUT endpoint to accept up to `len` bytes. A `len` of zero arms it for a zero-length
    /// status packet.
    fn prepare_read(&self, ep_addr: EndpointAddress, len: usize) -> Result<()>;

    /// Reads a single received packet from the specified endpoint and returns its length.
    ///
    /// # Errors
    ///
    /// * [`WouldBlock`](crate::UsbError::WouldBlock) - There is no packet to be read. Note that
    ///   this is different from a received zero-length packet, which is valid in USB. A zero-length
    ///   packet will return `Ok(0)`.
    /// * [`BufferOverflow`](crate::UsbError::BufferOverflow) - The received packet is too long to
    ///   fit in `buf`.
    fn read(&self, ep_addr: EndpointAddress, buf: &mut [u8]) -> Result<usize>;

    /// Sets the device USB address to `addr`.
    fn set_device_address(&self, addr: u8);

    /// Discards any data queued for transmission on an IN endpoint.
    fn flush(&self, ep_addr: EndpointAddress);

    /// Puts the transceiver into one of the electrical test modes.
    ///
    /// The default implementation just returns `Unsupported`.
    fn set_test_mode(&self, mode: TestMode) -> Result<()> {
        let _ = mode;
        Err(UsbError::Unsupported)
    }

    /// Re-arms endpoint 0 OUT to receive the next SETUP packet.
    fn ep0_out_start(&self);

    /// Called when the host resets the device. This method should reset the state of all
    /// endpoints and peripheral flags back to a state suitable for enumeration.
    fn reset(&self);

    /// Causes the USB peripheral to enter USB suspend mode, lowering power consumption and
    /// preparing to detect a USB wakeup event.
    fn suspend(&self);

    /// Resumes from suspend mode. This may only be called after the peripheral has been previously
    /// suspended.
    fn resume(&self);

    /// Gets information about events and incoming data. Usually called in a loop or from an
    /// interrupt handler. See the [`PollResult`] struct for more information.
    fn poll(&self) -> PollResult;

    /// Indicates that `set_device_address` must be called before accepting the corresponding
    /// control transfer, not after.
    ///
    /// The default value for this constant is `false`, which corresponds to the USB 2.0 spec, 9.4.6
    const QUIRK_SET_ADDRESS_BEFORE_STATUS: bool = false;

    /// Who advances the endpoint 0 buffer cursor between packets.
    const EP0_CURSOR: CursorOwner = CursorOwner::Engine;
}

/// Event and incoming packet information returned by [`UsbBus::poll`].
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PollResult {
    /// No events or packets to report.
    None,

    /// The USB reset condition has been detected.
    Reset,

    /// USB packets have been received or sent. Each data field is a bit-field where the least
    /// significant bit represents endpoint 0 etc., and a set bit signifies the event has occurred
    /// for the corresponding endpoint.
    Data {
        /// An OUT packet has been received. This event should continue to be reported until the
        /// packet is read.
        ep_out: u16,

        /// An IN packet has finished transmitting. This event should only be reported once for each
        /// completed transfer.
        ep_in_complete: u16,

        /// A SETUP packet has been received. This event should continue to be reported until the
        /// packet is read. The corresponding bit in `ep_out` may also be set but is ignored.
        ep_setup: u16,
    },

    /// A USB suspend request has been detected or, in the case of self-powered devices, the device
    /// has been disconnected from the USB bus.
    Suspend,

    /// A USB resume request has been detected after being suspended or, in the case of self-powered
    /// devices, the device has been connected to the USB bus.
    Resume,
}

/// Inbound events from the peripheral driver. Implemented by
/// [`UsbDevice`](crate::device::UsbDevice); a driver that is interrupt driven calls these directly
/// from its interrupt handler instead of going through [`UsbBus::poll`].
pub trait UsbEventHandler {
    /// A SETUP packet was received on endpoint 0.
    fn setup_stage(&mut self, packet: &[u8]);

    /// An OUT transfer completed on endpoint `ep_number`.
    fn data_out_stage(&mut self, ep_number: u8);

    /// An IN transfer completed on endpoint `ep_number`.
    fn data_in_stage(&mut self, ep_number: u8);

    /// The host reset the bus.
    fn reset(&mut self);

    /// The bus went idle.
    fn suspend(&mut self);

    /// Bus activity resumed.
    fn resume(&mut self);
}
