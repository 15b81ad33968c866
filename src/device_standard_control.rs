use crate::bus::{TestMode, UsbBus};
use crate::class::UsbClass;
use crate::control::{Request, RequestType};
use crate::control_transfer::ControlSetup;
use crate::descriptor::descriptor_type;
use crate::device::{UsbDevice, UsbDeviceState};
use crate::endpoint::EndpointAddress;
use core::convert::TryFrom;

impl<'a, B: UsbBus, C: UsbClass<B>> UsbDevice<'a, B, C> {
    pub(crate) fn ctl_error(&mut self) {
        self.control.reject().ok();
    }

    /// Hands the request to the class. If the class did not respond, requests without a data stage
    /// are acknowledged, GET_STATUS reports all zeroes and the rest are stalled.
    fn class_setup(&mut self, req: Request) {
        self.class.setup(ControlSetup::new(
            &mut self.control,
            req,
            self.descriptors,
            self.config_value,
        ));

        if self.control.waiting_for_response() {
            if req.length == 0 {
                self.control.send_status().ok();
            } else if req.request_type == RequestType::Standard && req.request == Request::GET_STATUS
            {
                self.control.send_data(&0u16.to_le_bytes()).ok();
            } else {
                self.ctl_error();
            }
        }
    }

    pub(crate) fn device_request(&mut self, req: Request) {
        if req.request_type != RequestType::Standard {
            self.ctl_error();
            return;
        }

        match req.request {
            Request::GET_DESCRIPTOR => self.get_descriptor(req),
            Request::SET_ADDRESS => self.set_address(req),
            Request::SET_CONFIGURATION => self.set_configuration(req),
            Request::GET_CONFIGURATION => self.get_configuration(req),
            Request::GET_STATUS => self.get_status(),
            Request::SET_FEATURE => self.set_feature(req),
            Request::CLEAR_FEATURE => self.clear_feature(req),
            _ => self.ctl_error(),
        }
    }

    fn get_descriptor(&mut self, req: Request) {
        let (dtype, index) = req.descriptor_type_index();
        let descriptors = self.descriptors;

        let data = match dtype {
            descriptor_type::DEVICE => {
                let buf = descriptors.device_descriptor();
                buf.first().and_then(|&len| buf.get(..usize::from(len)))
            }
            descriptor_type::CONFIGURATION => self
                .class
                .config_descriptor(descriptors, index.wrapping_add(1)),
            descriptor_type::OTHER_SPEED_CONFIGURATION => self
                .class
                .other_speed_config_descriptor(descriptors, index.wrapping_add(1)),
            descriptor_type::STRING => self.class.string_descriptor(descriptors, index),
            _ => None,
        };

        match data {
            Some(_) if req.length == 0 => {
                self.control.send_status().ok();
            }
            Some(data) => {
                self.control.send_borrowed(data).ok();
            }
            None => {
                usb_debug!("no descriptor {}:{}", dtype, index);
                self.ctl_error();
            }
        }
    }

    fn set_address(&mut self, req: Request) {
        if req.index != 0 || req.length != 0 || self.state() == UsbDeviceState::Configured {
            self.ctl_error();
            return;
        }

        let addr = (req.value as u8) & 0x7f;
        self.address = addr;

        if B::QUIRK_SET_ADDRESS_BEFORE_STATUS {
            self.bus.set_device_address(addr);
        } else {
            self.pending_address = Some(addr);
        }

        self.control.send_status().ok();

        self.set_state(if addr != 0 {
            UsbDeviceState::Addressed
        } else {
            UsbDeviceState::Default
        });
    }

    fn set_configuration(&mut self, req: Request) {
        let value = req.value as u8;

        if req.value > u16::from(self.descriptors.num_configurations()) {
            self.ctl_error();
            return;
        }

        match self.state() {
            UsbDeviceState::Addressed => {
                if value != 0 && !self.enter_configuration(value) {
                    return;
                }
            }
            UsbDeviceState::Configured => {
                if value == 0 {
                    self.leave_configuration();
                    self.set_state(UsbDeviceState::Addressed);
                } else if value != self.config_value {
                    self.leave_configuration();

                    if !self.enter_configuration(value) {
                        return;
                    }
                }
            }
            _ => {
                self.ctl_error();
                return;
            }
        }

        self.control.send_status().ok();
    }

    fn enter_configuration(&mut self, value: u8) -> bool {
        self.config_value = value;
        self.set_state(UsbDeviceState::Configured);

        usb_debug!("class init, configuration {}", value);

        match self.class.init(self.bus, value) {
            Ok(()) => true,
            Err(_err) => {
                usb_warn!("class init failed: {:?}", _err);
                self.config_value = 0;
                self.set_state(UsbDeviceState::Addressed);
                self.ctl_error();
                false
            }
        }
    }

    fn leave_configuration(&mut self) {
        usb_debug!("class deinit, configuration {}", self.config_value);

        if let Err(_err) = self.class.deinit(self.bus, self.config_value) {
            usb_warn!("class deinit failed: {:?}", _err);
        }

        self.config_value = 0;
    }

    fn get_configuration(&mut self, req: Request) {
        if req.length != 1 {
            self.ctl_error();
            return;
        }

        match self.state() {
            UsbDeviceState::Addressed => {
                self.control.send_data(&[0]).ok();
            }
            UsbDeviceState::Configured => {
                let value = self.config_value;
                self.control.send_data(&[value]).ok();
            }
            _ => self.ctl_error(),
        }
    }

    fn get_status(&mut self) {
        match self.state() {
            UsbDeviceState::Addressed | UsbDeviceState::Configured => {
                let status: u16 = 0x0001
                    | if self.remote_wakeup_enabled {
                        0x0002
                    } else {
                        0x0000
                    };

                self.control.send_data(&status.to_le_bytes()).ok();
            }
            _ => self.ctl_error(),
        }
    }

    fn set_feature(&mut self, req: Request) {
        match req.value {
            Request::FEATURE_DEVICE_REMOTE_WAKEUP => {
                self.remote_wakeup_enabled = true;
                self.control.send_status().ok();
            }
            Request::FEATURE_TEST_MODE if req.index & 0xff == 0 => {
                match TestMode::try_from((req.index >> 8) as u8) {
                    Ok(mode) => {
                        // Entered once the status stage is done.
                        self.pending_test_mode = Some(mode);
                        self.control.send_status().ok();
                    }
                    Err(_) => self.ctl_error(),
                }
            }
            _ => self.ctl_error(),
        }
    }

    fn clear_feature(&mut self, req: Request) {
        match self.state() {
            UsbDeviceState::Addressed | UsbDeviceState::Configured
                if req.value == Request::FEATURE_DEVICE_REMOTE_WAKEUP =>
            {
                self.remote_wakeup_enabled = false;
                self.control.send_status().ok();
            }
            _ => self.ctl_error(),
        }
    }

    pub(crate) fn interface_request(&mut self, req: Request) {
        let interface = req.index as u8;

        if self.state() != UsbDeviceState::Configured
            || interface >= self.descriptors.num_interfaces(self.config_value)
        {
            self.ctl_error();
            return;
        }

        self.class_setup(req);
    }

    pub(crate) fn endpoint_request(&mut self, req: Request) {
        let state = self.state();

        if req.request_type != RequestType::Standard {
            if state == UsbDeviceState::Configured {
                self.class_setup(req);
            } else {
                self.ctl_error();
            }
            return;
        }

        let ep_addr = EndpointAddress::from((req.index as u8) & 0x8f);

        // Only endpoint 0 exists before configuration.
        if state == UsbDeviceState::Addressed && !ep_addr.is_control_zero() {
            match req.request {
                Request::SET_FEATURE | Request::CLEAR_FEATURE | Request::GET_STATUS => {
                    self.bus.set_stalled(ep_addr, true);
                }
                _ => {}
            }

            self.ctl_error();
            return;
        }

        if state != UsbDeviceState::Addressed && state != UsbDeviceState::Configured {
            self.ctl_error();
            return;
        }

        match req.request {
            Request::SET_FEATURE => {
                if req.value == Request::FEATURE_ENDPOINT_HALT && !ep_addr.is_control_zero() {
                    self.bus.set_stalled(ep_addr, true);
                }

                if state == UsbDeviceState::Configured {
                    self.class_setup(req);
                } else {
                    self.control.send_status().ok();
                }
            }
            Request::CLEAR_FEATURE if req.value == Request::FEATURE_ENDPOINT_HALT => {
                if !ep_addr.is_control_zero() {
                    self.bus.set_stalled(ep_addr, false);
                    self.class_setup(req);
                } else {
                    self.control.send_status().ok();
                }
            }
            Request::GET_STATUS => {
                let status: u16 = if self.bus.is_stalled(ep_addr) { 0x0001 } else { 0x0000 };

                self.control.send_data(&status.to_le_bytes()).ok();
            }
            _ => self.ctl_error(),
        }
    }
}
