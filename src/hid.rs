use crate::bus::UsbBus;
use crate::class::UsbClass;
use crate::control::{Recipient, Request, RequestType};
use crate::control_transfer::ControlSetup;
use crate::descriptor::{BuilderError, Descriptors};
use crate::descriptor_builder::{
    AlternateSetting, ClassDescriptor, Configuration, DeviceDescriptorBuilder, Endpoint,
    HidDescriptor, Interface, StringTable, UsbVidPid,
};
use crate::device::{UsbDevice, UsbDeviceState};
use crate::endpoint::{EndpointAddress, EndpointType};
use crate::{Result, UsbDirection, UsbError};
use core::cmp::min;

/// HID interface class code.
pub const INTERFACE_CLASS_HID: u8 = 0x03;

/// HID boot interface subclass.
pub const SUBCLASS_BOOT: u8 = 0x01;

/// HID boot protocol code for a mouse.
pub const PROTOCOL_MOUSE: u8 = 0x02;

/// Descriptor type of the HID class descriptor.
pub const HID_DESCRIPTOR_TYPE: u8 = 0x21;

/// Descriptor type of a HID report descriptor.
pub const HID_REPORT_DESCRIPTOR_TYPE: u8 = 0x22;

/// Length of the HID class descriptor.
pub const HID_DESCRIPTOR_LEN: usize = 9;

/// Interrupt IN endpoint carrying input reports.
pub const HID_IN_EP: EndpointAddress = EndpointAddress::from_u8(0x81);

/// Interrupt OUT endpoint carrying output reports.
pub const HID_OUT_EP: EndpointAddress = EndpointAddress::from_u8(0x01);

/// Packet size of the interrupt IN endpoint.
pub const HID_IN_PACKET: u16 = 4;

/// Packet size of the interrupt OUT endpoint.
pub const HID_OUT_PACKET: u16 = 4;

/// HID class request codes (HID 1.11 section 7.2).
#[allow(missing_docs)]
pub mod request {
    pub const GET_REPORT: u8 = 0x01;
    pub const GET_IDLE: u8 = 0x02;
    pub const GET_PROTOCOL: u8 = 0x03;
    pub const SET_REPORT: u8 = 0x09;
    pub const SET_IDLE: u8 = 0x0a;
    pub const SET_PROTOCOL: u8 = 0x0b;
}

/// Three-button wheel mouse with relative X/Y/wheel axes and a motion wakeup feature.
#[rustfmt::skip]
pub const MOUSE_REPORT_DESCRIPTOR: [u8; 74] = [
    0x05, 0x01, // Usage Page (Generic Desktop)
    0x09, 0x02, // Usage (Mouse)
    0xa1, 0x01, // Collection (Application)
    0x09, 0x01, //   Usage (Pointer)
    0xa1, 0x00, //   Collection (Physical)
    0x05, 0x09, //     Usage Page (Button)
    0x19, 0x01, //     Usage Minimum (1)
    0x29, 0x03, //     Usage Maximum (3)
    0x15, 0x00, //     Logical Minimum (0)
    0x25, 0x01, //     Logical Maximum (1)
    0x95, 0x03, //     Report Count (3)
    0x75, 0x01, //     Report Size (1)
    0x81, 0x02, //     Input (Data, Var, Abs)
    0x95, 0x01, //     Report Count (1)
    0x75, 0x05, //     Report Size (5)
    0x81, 0x01, //     Input (Const)
    0x05, 0x01, //     Usage Page (Generic Desktop)
    0x09, 0x30, //     Usage (X)
    0x09, 0x31, //     Usage (Y)
    0x09, 0x38, //     Usage (Wheel)
    0x15, 0x81, //     Logical Minimum (-127)
    0x25, 0x7f, //     Logical Maximum (127)
    0x75, 0x08, //     Report Size (8)
    0x95, 0x03, //     Report Count (3)
    0x81, 0x06, //     Input (Data, Var, Rel)
    0xc0,       //   End Collection
    0x09, 0x3c, //   Usage (Motion Wakeup)
    0x05, 0xff, //   Usage Page (Reserved 0xFF)
    0x09, 0x01, //   Usage (1)
    0x15, 0x00, //   Logical Minimum (0)
    0x25, 0x01, //   Logical Maximum (1)
    0x75, 0x01, //   Report Size (1)
    0x95, 0x02, //   Report Count (2)
    0xb1, 0x22, //   Feature (Data, Var, Abs, No Preferred)
    0x75, 0x06, //   Report Size (6)
    0x95, 0x01, //   Report Count (1)
    0xb1, 0x01, //   Feature (Const)
    0xc0,       // End Collection
];

/// Builds the descriptor set of the reference HID mouse: one configuration with one HID boot
/// mouse interface and a 4-byte interrupt IN endpoint.
pub fn mouse_descriptors() -> core::result::Result<Descriptors, BuilderError> {
    let strings = StringTable::new()
        .add("manufacturer", "GrumpyCoders")
        .add("product", "Custom HID device")
        .add("serial", "00000000011C")
        .add("config", "HID Config")
        .add("interface", "HID Interface");

    let mut builder = DeviceDescriptorBuilder::new(UsbVidPid(0x0483, 0x5710));

    builder
        .max_packet_size_0(64)
        .device_release(0x0200)
        .manufacturer("manufacturer")
        .product("product")
        .serial_number("serial")
        .configuration(
            Configuration::new()
                .remote_wakeup(true)
                .self_powered(true)
                .max_power(100)
                .string("config")
                .interface(
                    Interface::new().alternate(
                        AlternateSetting::new(INTERFACE_CLASS_HID, SUBCLASS_BOOT, PROTOCOL_MOUSE)
                            .string("interface")
                            .class_descriptor(ClassDescriptor::Hid(HidDescriptor::new(
                                MOUSE_REPORT_DESCRIPTOR.len() as u16,
                            )))
                            .endpoint(Endpoint::interrupt(
                                UsbDirection::In,
                                HID_IN_PACKET,
                                10,
                            )),
                    ),
                ),
        );

    builder.build(&strings)
}

/// HID class driver with a single report descriptor.
pub struct HidClass {
    report_descriptor: &'static [u8],
    protocol: u8,
    idle: u8,
    alt_setting: u8,
    out_report: [u8; HID_OUT_PACKET as usize],
    out_report_len: usize,
}

impl HidClass {
    /// Creates a HID class serving `report_descriptor`.
    pub fn new(report_descriptor: &'static [u8]) -> HidClass {
        HidClass {
            report_descriptor,
            protocol: 0,
            idle: 0,
            alt_setting: 0,
            out_report: [0; HID_OUT_PACKET as usize],
            out_report_len: 0,
        }
    }

    /// Creates a HID class serving [`MOUSE_REPORT_DESCRIPTOR`].
    pub fn mouse() -> HidClass {
        Self::new(&MOUSE_REPORT_DESCRIPTOR)
    }

    /// Protocol selected with SET_PROTOCOL (0 boot, 1 report).
    pub fn protocol(&self) -> u8 {
        self.protocol
    }

    /// Idle rate set with SET_IDLE, in 4 ms units.
    pub fn idle(&self) -> u8 {
        self.idle
    }

    /// Alternate setting selected with SET_INTERFACE.
    pub fn alt_setting(&self) -> u8 {
        self.alt_setting
    }

    /// Last output report received on the interrupt OUT endpoint.
    pub fn out_report(&self) -> &[u8] {
        &self.out_report[..self.out_report_len]
    }

    /// Transmits one input report on the interrupt IN endpoint.
    pub fn send_report<B: UsbBus>(&self, bus: &B, report: &[u8]) -> Result<usize> {
        if report.len() > usize::from(HID_IN_PACKET) {
            return Err(UsbError::BufferOverflow);
        }

        bus.write(HID_IN_EP, report)
    }

    fn class_request<B: UsbBus>(&mut self, xfer: ControlSetup<'_, '_, B>) {
        let req = *xfer.request();

        match req.request {
            request::SET_PROTOCOL => {
                self.protocol = req.value as u8;
                xfer.accept().ok();
            }
            request::GET_PROTOCOL => {
                xfer.accept_with(&[self.protocol]).ok();
            }
            request::SET_IDLE => {
                self.idle = (req.value >> 8) as u8;
                xfer.accept().ok();
            }
            request::GET_IDLE => {
                xfer.accept_with(&[self.idle]).ok();
            }
            _ => {
                usb_debug!("unsupported HID request {}", req.request);
                xfer.reject().ok();
            }
        }
    }

    fn standard_request<B: UsbBus>(&mut self, xfer: ControlSetup<'_, '_, B>) {
        let req = *xfer.request();

        if req.recipient != Recipient::Interface {
            return;
        }

        match req.request {
            Request::GET_DESCRIPTOR => match req.descriptor_type_index().0 {
                HID_REPORT_DESCRIPTOR_TYPE => {
                    xfer.accept_with_static(self.report_descriptor).ok();
                }
                HID_DESCRIPTOR_TYPE => {
                    let class_descriptors = xfer
                        .descriptors()
                        .first_interface_descriptor(xfer.configuration());

                    match class_descriptors {
                        Some(desc) => {
                            let len = min(HID_DESCRIPTOR_LEN, desc.len());
                            xfer.accept_with(&desc[..len]).ok();
                        }
                        None => {
                            xfer.reject().ok();
                        }
                    }
                }
                _ => {
                    xfer.reject().ok();
                }
            },
            Request::GET_INTERFACE => {
                xfer.accept_with(&[self.alt_setting]).ok();
            }
            Request::SET_INTERFACE => {
                self.alt_setting = req.value as u8;
                xfer.accept().ok();
            }
            _ => {}
        }
    }
}

impl<B: UsbBus> UsbClass<B> for HidClass {
    fn init(&mut self, bus: &B, config_value: u8) -> Result<()> {
        let _ = config_value;

        bus.open_endpoint(HID_IN_EP, EndpointType::Interrupt, HID_IN_PACKET)?;
        bus.open_endpoint(HID_OUT_EP, EndpointType::Interrupt, HID_OUT_PACKET)?;
        bus.prepare_read(HID_OUT_EP, usize::from(HID_OUT_PACKET))
    }

    fn deinit(&mut self, bus: &B, config_value: u8) -> Result<()> {
        let _ = config_value;

        let closed_in = bus.close_endpoint(HID_IN_EP);
        let closed_out = bus.close_endpoint(HID_OUT_EP);

        closed_in.and(closed_out)
    }

    fn setup(&mut self, xfer: ControlSetup<'_, '_, B>) {
        match xfer.request().request_type {
            RequestType::Class => self.class_request(xfer),
            RequestType::Standard => self.standard_request(xfer),
            _ => {}
        }
    }

    fn data_in(&mut self, bus: &B, ep_addr: EndpointAddress) {
        if ep_addr == HID_IN_EP {
            bus.flush(HID_IN_EP);
        }
    }

    fn data_out(&mut self, bus: &B, ep_addr: EndpointAddress) {
        if ep_addr != HID_OUT_EP {
            return;
        }

        match bus.read(HID_OUT_EP, &mut self.out_report) {
            Ok(count) => {
                self.out_report_len = count;
                bus.prepare_read(HID_OUT_EP, usize::from(HID_OUT_PACKET)).ok();
            }
            Err(UsbError::WouldBlock) => {}
            Err(_err) => {
                usb_warn!("HID OUT read failed: {:?}", _err);
            }
        }
    }
}

impl<'a, B: UsbBus> UsbDevice<'a, B, HidClass> {
    /// Sends an input report if the device is configured. Returns `Ok(false)` without touching the
    /// peripheral in any other state.
    ///
    /// There is no queueing: a report sent before the host has collected the previous one is
    /// subject to whatever the peripheral does with a busy endpoint.
    pub fn send_report(&self, report: &[u8]) -> Result<bool> {
        if self.state() != UsbDeviceState::Configured {
            return Ok(false);
        }

        self.class().send_report(self.bus(), report).map(|_| true)
    }
}
