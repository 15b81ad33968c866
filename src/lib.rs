//! A full-speed USB device stack for microcontrollers.
//!
//! The crate implements the control transfer protocol on endpoint 0 (USB 2.0 chapter 9 standard
//! requests), a descriptor tree builder that derives every length, count, offset and endpoint
//! address from structure, and a pluggable class driver interface with a HID mouse class.
//!
//! Register-level peripheral access is not part of this crate. A peripheral driver implements
//! [`bus::UsbBus`] and forwards its interrupt events to a [`device::UsbDevice`] through
//! [`bus::UsbEventHandler`] (or lets [`device::UsbDevice::poll`] pull them).
//!
//! ```ignore
//! let descriptors = hid::mouse_descriptors().expect("descriptors");
//! let mut device = UsbDevice::new(&bus, &descriptors, HidClass::mouse());
//!
//! loop {
//!     device.poll();
//!
//!     if device.state() == UsbDeviceState::Configured {
//!         device.send_report(&[0, 1, 0, 0]).ok();
//!     }
//! }
//! ```

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

/// A USB stack error.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UsbError {
    /// An operation would block because the device is currently busy or there is no data available.
    WouldBlock,

    /// Parsing failed due to invalid input.
    ParseError,

    /// A buffer too short for the data to read was passed, or provided data cannot fit within
    /// length constraints.
    BufferOverflow,

    /// The endpoint address is invalid or already used.
    InvalidEndpoint,

    /// Operation is not valid in the current state of the object.
    InvalidState,

    /// Operation is not supported by device or configuration.
    Unsupported,

    /// Available total number of endpoints or endpoint memory has been exhausted.
    EndpointOverflow,
}

/// Direction of USB traffic. Note that in the USB standard the direction is always indicated from
/// the perspective of the host, which is backward for devices, but the standard directions are used
/// for consistency.
///
/// The values of the enum also match the direction bit used in endpoint addresses and control
/// request types.
#[repr(u8)]
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UsbDirection {
    /// Host to device (OUT)
    Out = 0x00,
    /// Device to host (IN)
    In = 0x80,
}

impl From<u8> for UsbDirection {
    fn from(value: u8) -> Self {
        if value & 0x80 == 0 {
            UsbDirection::Out
        } else {
            UsbDirection::In
        }
    }
}

/// Result for USB operations.
pub type Result<T> = core::result::Result<T, UsbError>;

#[macro_use]
mod macros;

/// USB peripheral driver interface and event dispatch.
pub mod bus;

/// USB class driver interface.
pub mod class;

/// USB control transfers and the SETUP packet format.
pub mod control;

/// USB descriptor model: the serialized descriptor tree and string table.
pub mod descriptor;

/// Descriptor tree builders.
pub mod descriptor_builder;

/// USB endpoints.
pub mod endpoint;

/// USB device and its lifecycle state.
pub mod device;

/// HID class driver.
pub mod hid;

mod control_pipe;

mod control_transfer;

mod device_standard_control;

/// Prelude for device implementors.
pub mod prelude {
    pub use crate::bus::UsbEventHandler;
    pub use crate::descriptor::Descriptors;
    pub use crate::descriptor_builder::{
        AlternateSetting, ClassDescriptor, Configuration, DeviceDescriptorBuilder, Endpoint,
        HidDescriptor, Interface, StringTable,
    };
    pub use crate::device::{UsbDevice, UsbDeviceState, UsbVidPid};
    pub use crate::hid::HidClass;
    pub use crate::UsbError;
}

/// Prelude for class implementors.
pub mod class_prelude {
    pub use crate::bus::{CursorOwner, PollResult, TestMode, UsbBus};
    pub use crate::class::UsbClass;
    pub use crate::control;
    pub use crate::control_transfer::ControlSetup;
    pub use crate::descriptor::{descriptor_type, lang_id, Descriptors};
    pub use crate::endpoint::{EndpointAddress, EndpointType};
    pub use crate::{UsbDirection, UsbError};
}
