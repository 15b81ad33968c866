use crate::bus::{PollResult, TestMode, UsbBus, UsbEventHandler};
use crate::class::UsbClass;
use crate::control_pipe::{ControlPipe, Ep0Event};
use crate::descriptor::Descriptors;
use crate::endpoint::{ControlPacketSize, EndpointAddress, EndpointType};
use crate::{UsbDirection, UsbError};
use core::convert::TryFrom;
use num_enum::{FromPrimitive, IntoPrimitive};
use portable_atomic::{AtomicU8, Ordering};

pub use crate::descriptor_builder::UsbVidPid;

/// The global state of the USB device.
///
/// In general class traffic is only possible in the `Configured` state.
#[repr(u8)]
#[derive(PartialEq, Eq, Copy, Clone, Debug, FromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UsbDeviceState {
    /// The USB device has just been created or reset.
    #[num_enum(default)]
    Default = 0,

    /// The USB device has received an address from the host.
    Addressed = 1,

    /// The USB device has been configured and is fully functional.
    Configured = 2,

    /// The USB device has been suspended by the host or it has been unplugged from the USB bus.
    Suspend = 3,
}

// Maximum number of endpoints in one direction. Specified by the USB specification.
const MAX_ENDPOINTS: usize = 16;

/// A USB device driving one class.
///
/// The device owns the endpoint 0 control pipe and the device lifecycle state. A peripheral driver
/// feeds it events either through [`poll`](UsbDevice::poll) or by calling the
/// [`UsbEventHandler`] methods from its interrupt handler.
pub struct UsbDevice<'a, B: UsbBus, C: UsbClass<B>> {
    pub(crate) bus: &'a B,
    pub(crate) descriptors: &'a Descriptors,
    pub(crate) class: C,
    pub(crate) control: ControlPipe<'a, B>,
    device_state: AtomicU8,
    suspended_state: UsbDeviceState,
    pub(crate) config_value: u8,
    pub(crate) address: u8,
    pub(crate) remote_wakeup_enabled: bool,
    pub(crate) pending_address: Option<u8>,
    pub(crate) pending_test_mode: Option<TestMode>,
}

impl<'a, B: UsbBus, C: UsbClass<B>> UsbDevice<'a, B, C> {
    /// Creates a device in the `Default` state. Endpoint 0 is opened on the first bus reset.
    pub fn new(bus: &'a B, descriptors: &'a Descriptors, class: C) -> UsbDevice<'a, B, C> {
        UsbDevice {
            bus,
            descriptors,
            class,
            control: ControlPipe::new(bus, descriptors.max_packet_size_0()),
            device_state: AtomicU8::new(UsbDeviceState::Default.into()),
            suspended_state: UsbDeviceState::Default,
            config_value: 0,
            address: 0,
            remote_wakeup_enabled: false,
            pending_address: None,
            pending_test_mode: None,
        }
    }

    /// Gets the current state of the device.
    ///
    /// In general class traffic is only possible in the `Configured` state.
    pub fn state(&self) -> UsbDeviceState {
        UsbDeviceState::from_primitive(self.device_state.load(Ordering::Relaxed))
    }

    pub(crate) fn set_state(&self, state: UsbDeviceState) {
        let old = self.device_state.load(Ordering::Relaxed);
        self.device_state.store(state.into(), Ordering::Relaxed);

        if old != u8::from(state) {
            usb_debug!("device state {:?} -> {:?}", UsbDeviceState::from_primitive(old), state);
        }
    }

    /// Gets the address assigned by the host.
    pub fn address(&self) -> u8 {
        self.address
    }

    /// Gets the active configuration value, 0 if unconfigured.
    pub fn configuration(&self) -> u8 {
        self.config_value
    }

    /// Gets whether host remote wakeup has been enabled by the host.
    pub fn remote_wakeup_enabled(&self) -> bool {
        self.remote_wakeup_enabled
    }

    /// Gets the peripheral.
    pub fn bus(&self) -> &'a B {
        self.bus
    }

    /// Gets the class.
    pub fn class(&self) -> &C {
        &self.class
    }

    /// Gets the class mutably.
    pub fn class_mut(&mut self) -> &mut C {
        &mut self.class
    }

    /// Gets the device's descriptor set.
    pub fn descriptors(&self) -> &'a Descriptors {
        self.descriptors
    }

    /// Reports that the peripheral loaded `count` more bytes of the current endpoint 0 IN data
    /// stage. Only used with [`CursorOwner::Peripheral`](crate::bus::CursorOwner::Peripheral).
    pub fn ep0_in_advanced(&mut self, count: usize) {
        self.control.in_advanced(count);
    }

    /// Delivers bytes of the current endpoint 0 OUT data stage, before the matching
    /// [`data_out_stage`](UsbEventHandler::data_out_stage). Only used with
    /// [`CursorOwner::Peripheral`](crate::bus::CursorOwner::Peripheral).
    pub fn ep0_out_received(&mut self, data: &[u8]) {
        self.control.out_received(data);
    }

    /// Polls the [`UsbBus`] for new events and dispatches them. Returns true if the class may have
    /// data available for reading or be ready for writing, false otherwise. This should be called
    /// periodically as often as possible for the best data rate, or preferably from an interrupt
    /// handler. Must be called at least one every 10 milliseconds while connected to the USB host
    /// to be USB compliant.
    pub fn poll(&mut self) -> bool {
        let pr = self.bus.poll();

        if self.state() == UsbDeviceState::Suspend {
            match pr {
                PollResult::Suspend | PollResult::None => {
                    return false;
                }
                _ => self.resume(),
            }
        }

        match pr {
            PollResult::None => {}
            PollResult::Reset => self.reset(),
            PollResult::Data {
                ep_out,
                ep_in_complete,
                ep_setup,
            } => {
                // Combine bit fields for quick tests
                let mut eps = ep_out | ep_in_complete | ep_setup;

                // Pending events for endpoint 0?
                if (eps & 1) != 0 {
                    if (ep_setup & 1) != 0 {
                        let mut packet = [0u8; 8];

                        match self.bus.read(EndpointAddress::EP0_OUT, &mut packet) {
                            Ok(count) => self.setup_stage(&packet[..count]),
                            Err(UsbError::WouldBlock) => {}
                            Err(_) => self.setup_stage(&[]),
                        }
                    } else if (ep_out & 1) != 0 {
                        self.data_out_stage(0);
                    }

                    if (ep_in_complete & 1) != 0 {
                        self.data_in_stage(0);
                    }

                    eps &= !1;
                }

                // Pending events for other endpoints?
                if eps != 0 {
                    let mut bit = 2u16;

                    for i in 1..MAX_ENDPOINTS {
                        if (ep_out & bit) != 0 {
                            self.data_out_stage(i as u8);
                        }

                        if (ep_in_complete & bit) != 0 {
                            self.data_in_stage(i as u8);
                        }

                        eps &= !bit;

                        if eps == 0 {
                            // No more pending events for higher endpoints
                            break;
                        }

                        bit <<= 1;
                    }
                }

                return true;
            }
            PollResult::Resume => {}
            PollResult::Suspend => self.suspend(),
        }

        false
    }

    fn complete_status_in(&mut self) {
        if let Some(addr) = self.pending_address.take() {
            self.bus.set_device_address(addr);
        }

        if let Some(mode) = self.pending_test_mode.take() {
            if let Err(_err) = self.bus.set_test_mode(mode) {
                usb_warn!("test mode {:?} failed: {:?}", mode, _err);
            }
        }
    }
}

impl<'a, B: UsbBus, C: UsbClass<B>> UsbEventHandler for UsbDevice<'a, B, C> {
    fn setup_stage(&mut self, packet: &[u8]) {
        use crate::control::Recipient;

        if self.state() == UsbDeviceState::Suspend {
            self.resume();
        }

        let req = match self.control.handle_setup(packet) {
            Some(req) => req,
            None => return,
        };

        match req.recipient {
            Recipient::Device => self.device_request(req),
            Recipient::Interface => self.interface_request(req),
            Recipient::Endpoint => self.endpoint_request(req),
            _ => self.ctl_error(),
        }
    }

    fn data_out_stage(&mut self, ep_number: u8) {
        let configured = self.state() == UsbDeviceState::Configured;

        if ep_number != 0 {
            if configured {
                self.class.data_out(
                    self.bus,
                    EndpointAddress::from_parts(ep_number, UsbDirection::Out),
                );
            }
            return;
        }

        if self.control.handle_out_complete() == Ep0Event::DataOutDone {
            if configured {
                self.class.ep0_rx_ready(self.bus, self.control.data());
            }

            self.control.send_status().ok();
        }
    }

    fn data_in_stage(&mut self, ep_number: u8) {
        let configured = self.state() == UsbDeviceState::Configured;

        if ep_number != 0 {
            if configured {
                self.class.data_in(
                    self.bus,
                    EndpointAddress::from_parts(ep_number, UsbDirection::In),
                );
            }
            return;
        }

        match self.control.handle_in_complete() {
            Ep0Event::DataInDone if configured => self.class.ep0_tx_sent(self.bus),
            Ep0Event::StatusInDone => self.complete_status_in(),
            _ => {}
        }
    }

    fn reset(&mut self) {
        usb_debug!("bus reset");

        if self.state() == UsbDeviceState::Configured
            || (self.state() == UsbDeviceState::Suspend
                && self.suspended_state == UsbDeviceState::Configured)
        {
            if let Err(_err) = self.class.deinit(self.bus, self.config_value) {
                usb_warn!("class deinit failed: {:?}", _err);
            }
        }

        self.bus.reset();

        let mps = self.descriptors.max_packet_size_0();
        let ep_type = EndpointType::Control(
            ControlPacketSize::try_from(mps).unwrap_or(ControlPacketSize::Size8),
        );

        for ep in [EndpointAddress::EP0_OUT, EndpointAddress::EP0_IN].iter() {
            if let Err(_err) = self.bus.open_endpoint(*ep, ep_type, u16::from(mps)) {
                usb_warn!("failed to open {:?}: {:?}", *ep, _err);
            }
        }

        self.control.reset();
        self.config_value = 0;
        self.address = 0;
        self.remote_wakeup_enabled = false;
        self.pending_address = None;
        self.pending_test_mode = None;
        self.suspended_state = UsbDeviceState::Default;
        self.set_state(UsbDeviceState::Default);

        self.bus.ep0_out_start();
    }

    fn suspend(&mut self) {
        let state = self.state();

        usb_debug!("suspend");

        if state != UsbDeviceState::Suspend {
            self.suspended_state = state;
            self.set_state(UsbDeviceState::Suspend);
        }

        self.bus.suspend();
    }

    fn resume(&mut self) {
        usb_debug!("resume");

        if self.state() == UsbDeviceState::Suspend {
            self.set_state(self.suspended_state);
        }

        self.bus.resume();
    }
}
