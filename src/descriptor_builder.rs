use crate::descriptor::{
    descriptor_type, lang_id, BuilderError, DescriptorWriter, Descriptors, DESCRIPTOR_BUF_LEN,
    MAX_ALTERNATE_SETTINGS, MAX_CLASS_DESCRIPTORS, MAX_CONFIGURATIONS, MAX_ENDPOINTS,
    MAX_INTERFACES, MAX_STRINGS,
};
use crate::endpoint::{
    ControlPacketSize, EndpointAddress, EndpointType, IsochronousSynchronizationType,
    IsochronousUsageType,
};
use crate::UsbDirection;
use core::convert::TryFrom;
use heapless::Vec;

type BuildResult<T> = core::result::Result<T, BuilderError>;

/// A USB vendor ID and product ID pair.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct UsbVidPid(pub u16, pub u16);

/// Table of string descriptors looked up by label.
///
/// Index 0 is always the language ID list (English US). Strings added with [`add`](Self::add) get
/// indices 1, 2, ... in insertion order.
#[derive(Clone, Debug, Default)]
pub struct StringTable {
    entries: Vec<(&'static str, &'static str), MAX_STRINGS>,
    error: Option<BuilderError>,
}

impl StringTable {
    /// Creates an empty string table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a string under `label`. The text must be printable ASCII.
    pub fn add(mut self, label: &'static str, text: &'static str) -> Self {
        if let Err(err) = self.try_add(label, text) {
            self.error.get_or_insert(err);
        }
        self
    }

    fn try_add(&mut self, label: &'static str, text: &'static str) -> BuildResult<()> {
        if !text.bytes().all(|c| (32..=126).contains(&c)) {
            return Err(BuilderError::InvalidCharacter);
        }

        if text.len() > 126 {
            return Err(BuilderError::StringTooLong);
        }

        if self.entries.iter().any(|(l, _)| *l == label) {
            return Err(BuilderError::DuplicateString(label));
        }

        self.entries
            .push((label, text))
            .map_err(|_| BuilderError::CapacityExceeded)
    }

    /// Resolves a label to its string descriptor index.
    pub fn index_of(&self, label: &'static str) -> core::result::Result<u8, BuilderError> {
        self.entries
            .iter()
            .position(|(l, _)| *l == label)
            .map(|i| (i + 1) as u8)
            .ok_or(BuilderError::MissingString(label))
    }

    fn resolve(&self, label: Option<&'static str>) -> BuildResult<u8> {
        label.map_or(Ok(0), |l| self.index_of(l))
    }

    fn write(&self, descriptors: &mut Descriptors) -> BuildResult<()> {
        if let Some(err) = self.error {
            return Err(err);
        }

        let mut w = DescriptorWriter::new(&mut descriptors.strings);

        descriptors.string_offsets.push(0).map_err(|_| BuilderError::CapacityExceeded)?;
        w.write(descriptor_type::STRING, &lang_id::ENGLISH_US.to_le_bytes())?;

        for (_, text) in self.entries.iter() {
            descriptors
                .string_offsets
                .push(w.position() as u16)
                .map_err(|_| BuilderError::CapacityExceeded)?;
            w.write_string(text)?;
        }

        Ok(())
    }
}

/// HID class descriptor (HID 1.11 section 6.2.1) announcing a single report descriptor.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct HidDescriptor {
    /// bcdHID
    pub bcd_hid: u16,
    /// bCountryCode
    pub country_code: u8,
    /// wDescriptorLength of the report descriptor.
    pub report_descriptor_len: u16,
}

impl HidDescriptor {
    /// HID 1.11, not localized, with a report descriptor of `report_descriptor_len` bytes.
    pub fn new(report_descriptor_len: u16) -> Self {
        HidDescriptor {
            bcd_hid: 0x0111,
            country_code: 0,
            report_descriptor_len,
        }
    }
}

/// Class-specific descriptor placed between an interface descriptor and its endpoints.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ClassDescriptor {
    /// HID descriptor.
    Hid(HidDescriptor),
    /// Any other class descriptor, written as length, type and body.
    Raw {
        /// bDescriptorType
        descriptor_type: u8,
        /// Descriptor body after the two header bytes.
        body: &'static [u8],
    },
}

impl ClassDescriptor {
    fn write<const N: usize>(&self, w: &mut DescriptorWriter<'_, N>) -> BuildResult<()> {
        match *self {
            ClassDescriptor::Hid(hid) => {
                let bcd = hid.bcd_hid.to_le_bytes();
                let len = hid.report_descriptor_len.to_le_bytes();

                w.write(
                    crate::hid::HID_DESCRIPTOR_TYPE,
                    &[
                        bcd[0],
                        bcd[1],
                        hid.country_code,
                        1, // bNumDescriptors
                        crate::hid::HID_REPORT_DESCRIPTOR_TYPE,
                        len[0],
                        len[1],
                    ],
                )
            }
            ClassDescriptor::Raw {
                descriptor_type,
                body,
            } => w.write(descriptor_type, body),
        }
    }
}

/// An endpoint descriptor. The endpoint address is not given here: it is derived from the direction
/// and the endpoint's position in its alternate setting.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct Endpoint {
    direction: UsbDirection,
    ep_type: EndpointType,
    max_packet_size: u16,
    interval: u8,
}

impl Endpoint {
    /// Creates an endpoint of any type. Control endpoints take their packet size from
    /// [`ControlPacketSize`] and ignore `max_packet_size`.
    pub fn new(
        direction: UsbDirection,
        ep_type: EndpointType,
        max_packet_size: u16,
        interval: u8,
    ) -> Self {
        let max_packet_size = match ep_type {
            EndpointType::Control(size) => size.bytes(),
            _ => max_packet_size,
        };

        Endpoint {
            direction,
            ep_type,
            max_packet_size,
            interval,
        }
    }

    /// Control endpoint.
    pub fn control(direction: UsbDirection, size: ControlPacketSize) -> Self {
        Self::new(direction, EndpointType::Control(size), 0, 0)
    }

    /// Interrupt endpoint polled every `interval` frames.
    pub fn interrupt(direction: UsbDirection, max_packet_size: u16, interval: u8) -> Self {
        Self::new(direction, EndpointType::Interrupt, max_packet_size, interval)
    }

    /// Bulk endpoint.
    pub fn bulk(direction: UsbDirection, max_packet_size: u16) -> Self {
        Self::new(direction, EndpointType::Bulk, max_packet_size, 0)
    }

    /// Isochronous endpoint.
    pub fn isochronous(
        direction: UsbDirection,
        synchronization: IsochronousSynchronizationType,
        usage: IsochronousUsageType,
        payload_size: u16,
        interval: u8,
    ) -> Self {
        Self::new(
            direction,
            EndpointType::Isochronous {
                synchronization,
                usage,
            },
            payload_size,
            interval,
        )
    }

    /// Gets the transfer type.
    pub fn ep_type(&self) -> EndpointType {
        self.ep_type
    }

    /// Gets the maximum packet size.
    pub fn max_packet_size(&self) -> u16 {
        self.max_packet_size
    }

    /// Gets the address of this endpoint when it is at 0-based `position` in its list.
    pub fn address_at(&self, position: usize) -> EndpointAddress {
        EndpointAddress::from_parts((position + 1) as u8, self.direction)
    }

    fn validate(&self) -> BuildResult<()> {
        let limit = match self.ep_type {
            EndpointType::Control(_) => return Ok(()),
            EndpointType::Isochronous { .. } => 1023,
            EndpointType::Bulk | EndpointType::Interrupt => 64,
        };

        if self.max_packet_size > limit {
            Err(BuilderError::InvalidPacketSize)
        } else {
            Ok(())
        }
    }

    fn write<const N: usize>(
        &self,
        w: &mut DescriptorWriter<'_, N>,
        position: usize,
    ) -> BuildResult<()> {
        self.validate()?;

        let mps = self.max_packet_size.to_le_bytes();

        w.write(
            descriptor_type::ENDPOINT,
            &[
                self.address_at(position).into(), // bEndpointAddress
                self.ep_type.to_bm_attributes(), // bmAttributes
                mps[0],
                mps[1], // wMaxPacketSize
                self.interval, // bInterval
            ],
        )
    }
}

/// One alternate setting of an interface: its class codes, class-specific descriptors and
/// endpoints.
#[derive(Clone, Debug)]
pub struct AlternateSetting {
    class: u8,
    sub_class: u8,
    protocol: u8,
    string: Option<&'static str>,
    class_descriptors: Vec<ClassDescriptor, MAX_CLASS_DESCRIPTORS>,
    endpoints: Vec<Endpoint, MAX_ENDPOINTS>,
    error: Option<BuilderError>,
}

impl AlternateSetting {
    /// Creates an alternate setting with the given class, sub-class and protocol codes.
    pub fn new(class: u8, sub_class: u8, protocol: u8) -> Self {
        AlternateSetting {
            class,
            sub_class,
            protocol,
            string: None,
            class_descriptors: Vec::new(),
            endpoints: Vec::new(),
            error: None,
        }
    }

    /// Sets the label of the interface string.
    pub fn string(mut self, label: &'static str) -> Self {
        self.string = Some(label);
        self
    }

    /// Appends a class-specific descriptor.
    pub fn class_descriptor(mut self, descriptor: ClassDescriptor) -> Self {
        if self.class_descriptors.push(descriptor).is_err() {
            self.error.get_or_insert(BuilderError::CapacityExceeded);
        }
        self
    }

    /// Appends an endpoint. Its number is its 1-based position among this setting's endpoints.
    pub fn endpoint(mut self, endpoint: Endpoint) -> Self {
        if self.endpoints.push(endpoint).is_err() {
            self.error.get_or_insert(BuilderError::CapacityExceeded);
        }
        self
    }

    fn write<const N: usize>(
        &self,
        w: &mut DescriptorWriter<'_, N>,
        strings: &StringTable,
        number: u8,
        alternate: u8,
    ) -> BuildResult<Option<usize>> {
        if let Some(err) = self.error {
            return Err(err);
        }

        w.write(
            descriptor_type::INTERFACE,
            &[
                number, // bInterfaceNumber
                alternate, // bAlternateSetting
                self.endpoints.len() as u8, // bNumEndpoints
                self.class, // bInterfaceClass
                self.sub_class, // bInterfaceSubClass
                self.protocol, // bInterfaceProtocol
                strings.resolve(self.string)?, // iInterface
            ],
        )?;

        let class_start = if self.class_descriptors.is_empty() {
            None
        } else {
            Some(w.position())
        };

        for d in self.class_descriptors.iter() {
            d.write(w)?;
        }

        for (i, ep) in self.endpoints.iter().enumerate() {
            ep.write(w, i)?;
        }

        Ok(class_start)
    }
}

/// An interface made of one or more alternate settings. The interface number is its position in
/// the configuration.
#[derive(Clone, Debug, Default)]
pub struct Interface {
    alternates: Vec<AlternateSetting, MAX_ALTERNATE_SETTINGS>,
    error: Option<BuilderError>,
}

impl Interface {
    /// Creates an interface with no alternate settings yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an alternate setting. The first one is alternate setting 0.
    pub fn alternate(mut self, setting: AlternateSetting) -> Self {
        if self.alternates.push(setting).is_err() {
            self.error.get_or_insert(BuilderError::CapacityExceeded);
        }
        self
    }
}

/// A configuration. Its configuration value is its 1-based position in the device.
#[derive(Clone, Debug)]
pub struct Configuration {
    self_powered: bool,
    remote_wakeup: bool,
    max_power_ma: u16,
    string: Option<&'static str>,
    interfaces: Vec<Interface, MAX_INTERFACES>,
    error: Option<BuilderError>,
}

impl Default for Configuration {
    fn default() -> Self {
        Configuration {
            self_powered: false,
            remote_wakeup: false,
            max_power_ma: 100,
            string: None,
            interfaces: Vec::new(),
            error: None,
        }
    }
}

impl Configuration {
    /// Creates a bus powered configuration drawing 100 mA.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether the device may have an external power source.
    pub fn self_powered(mut self, self_powered: bool) -> Self {
        self.self_powered = self_powered;
        self
    }

    /// Sets whether the device supports remotely waking up the host.
    pub fn remote_wakeup(mut self, remote_wakeup: bool) -> Self {
        self.remote_wakeup = remote_wakeup;
        self
    }

    /// Sets the maximum current drawn from the USB bus in milliamps. Must be below 511 mA.
    pub fn max_power(mut self, max_power_ma: u16) -> Self {
        self.max_power_ma = max_power_ma;
        self
    }

    /// Sets the label of the configuration string.
    pub fn string(mut self, label: &'static str) -> Self {
        self.string = Some(label);
        self
    }

    /// Appends an interface.
    pub fn interface(mut self, interface: Interface) -> Self {
        if self.interfaces.push(interface).is_err() {
            self.error.get_or_insert(BuilderError::CapacityExceeded);
        }
        self
    }

    fn attributes(&self) -> u8 {
        let mut attributes = 0x80;

        if self.self_powered {
            attributes |= 0x40;
        }

        if self.remote_wakeup {
            attributes |= 0x20;
        }

        attributes
    }

    fn write<const N: usize>(
        &self,
        w: &mut DescriptorWriter<'_, N>,
        strings: &StringTable,
        value: u8,
    ) -> BuildResult<Option<u16>> {
        if let Some(err) = self.error {
            return Err(err);
        }

        if self.max_power_ma > 510 {
            return Err(BuilderError::MaxPowerOutOfRange);
        }

        let start = w.position();

        w.write(
            descriptor_type::CONFIGURATION,
            &[
                0,
                0, // wTotalLength, patched below
                self.interfaces.len() as u8, // bNumInterfaces
                value, // bConfigurationValue
                strings.resolve(self.string)?, // iConfiguration
                self.attributes(), // bmAttributes
                ((self.max_power_ma + 1) >> 1) as u8, // bMaxPower
            ],
        )?;

        let mut first_interface = None;

        for (number, iface) in self.interfaces.iter().enumerate() {
            if let Some(err) = iface.error {
                return Err(err);
            }

            if iface.alternates.is_empty() {
                return Err(BuilderError::NoAlternateSettings);
            }

            for (alternate, setting) in iface.alternates.iter().enumerate() {
                let class_start = setting.write(w, strings, number as u8, alternate as u8)?;

                if number == 0 && alternate == 0 {
                    first_interface = class_start.map(|pos| (pos - start) as u16);
                }
            }
        }

        let total = w.position() - start;

        if total > usize::from(u16::MAX) {
            return Err(BuilderError::ConfigurationTooLong);
        }

        w.insert(start + 2, &(total as u16).to_le_bytes());

        Ok(first_interface)
    }
}

#[derive(Clone, Debug)]
struct DeviceConfig {
    usb_version: u16,
    device_class: u8,
    device_sub_class: u8,
    device_protocol: u8,
    max_packet_size_0: ControlPacketSize,
    vendor_id: u16,
    product_id: u16,
    device_release: u16,
    manufacturer: Option<&'static str>,
    product: Option<&'static str>,
    serial_number: Option<&'static str>,
}

/// Used to build a [`Descriptors`] set: the device descriptor, its configurations and the string
/// table. Every length, count, index and endpoint address is computed from the structure.
#[derive(Clone, Debug)]
pub struct DeviceDescriptorBuilder {
    config: DeviceConfig,
    configurations: Vec<Configuration, MAX_CONFIGURATIONS>,
    error: Option<BuilderError>,
}

macro_rules! builder_fields {
    ( $( $(#[$meta:meta])* $name:ident: $type:ty, )* ) => {
        $(
            $(#[$meta])*
            pub fn $name(&mut self, $name: $type) -> &mut Self {
                self.config.$name = $name;
                self
            }
        )*
    }
}

impl DeviceDescriptorBuilder {
    /// Creates a new builder for a device with the given vendor and product ID.
    pub fn new(vid_pid: UsbVidPid) -> DeviceDescriptorBuilder {
        DeviceDescriptorBuilder {
            config: DeviceConfig {
                usb_version: 0x0200,
                device_class: 0x00,
                device_sub_class: 0x00,
                device_protocol: 0x00,
                max_packet_size_0: ControlPacketSize::Size8,
                vendor_id: vid_pid.0,
                product_id: vid_pid.1,
                device_release: 0x0010,
                manufacturer: None,
                product: None,
                serial_number: None,
            },
            configurations: Vec::new(),
            error: None,
        }
    }

    builder_fields! {
        /// Sets bcdUSB.
        ///
        /// Default: `0x0200` (USB 2.0)
        usb_version: u16,

        /// Sets the device class code assigned by USB.org. Set to `0xff` for vendor-specific
        /// devices that do not conform to any class.
        ///
        /// Default: `0x00` (class code specified by interfaces)
        device_class: u8,

        /// Sets the device sub-class code. Depends on class.
        ///
        /// Default: `0x00`
        device_sub_class: u8,

        /// Sets the device protocol code. Depends on class and sub-class.
        ///
        /// Default: `0x00`
        device_protocol: u8,

        /// Sets the device release version in BCD.
        ///
        /// Default: `0x0010` ("0.1")
        device_release: u16,
    }

    /// Sets the maximum packet size in bytes for the control endpoint 0.
    ///
    /// Valid values are 8, 16, 32 and 64; anything else makes [`build`](Self::build) fail with
    /// [`BuilderError::InvalidPacketSize`].
    ///
    /// Default: 8 bytes
    pub fn max_packet_size_0(&mut self, max_packet_size_0: u8) -> &mut Self {
        match ControlPacketSize::try_from(max_packet_size_0) {
            Ok(size) => self.config.max_packet_size_0 = size,
            Err(_) => {
                self.error.get_or_insert(BuilderError::InvalidPacketSize);
            }
        }
        self
    }

    /// Sets the label of the manufacturer string.
    pub fn manufacturer(&mut self, label: &'static str) -> &mut Self {
        self.config.manufacturer = Some(label);
        self
    }

    /// Sets the label of the product string.
    pub fn product(&mut self, label: &'static str) -> &mut Self {
        self.config.product = Some(label);
        self
    }

    /// Sets the label of the serial number string.
    pub fn serial_number(&mut self, label: &'static str) -> &mut Self {
        self.config.serial_number = Some(label);
        self
    }

    /// Appends a configuration. The first one gets configuration value 1.
    pub fn configuration(&mut self, configuration: Configuration) -> &mut Self {
        if self.configurations.push(configuration).is_err() {
            self.error.get_or_insert(BuilderError::CapacityExceeded);
        }
        self
    }

    /// Serializes the descriptor tree and `strings` into a [`Descriptors`] set.
    pub fn build(
        &self,
        strings: &StringTable,
    ) -> core::result::Result<Descriptors, BuilderError> {
        if let Some(err) = self.error {
            return Err(err);
        }

        if self.configurations.is_empty() {
            return Err(BuilderError::NoConfigurations);
        }

        let mut descriptors = Descriptors {
            device: Vec::new(),
            config_offsets: Vec::new(),
            first_interface_offsets: Vec::new(),
            strings: Vec::new(),
            string_offsets: Vec::new(),
        };

        strings.write(&mut descriptors)?;

        let c = &self.config;
        let mut w: DescriptorWriter<'_, DESCRIPTOR_BUF_LEN> =
            DescriptorWriter::new(&mut descriptors.device);

        let bcd_usb = c.usb_version.to_le_bytes();
        let vid = c.vendor_id.to_le_bytes();
        let pid = c.product_id.to_le_bytes();
        let release = c.device_release.to_le_bytes();

        w.write(
            descriptor_type::DEVICE,
            &[
                bcd_usb[0],
                bcd_usb[1], // bcdUSB
                c.device_class, // bDeviceClass
                c.device_sub_class, // bDeviceSubClass
                c.device_protocol, // bDeviceProtocol
                c.max_packet_size_0.into(), // bMaxPacketSize0
                vid[0],
                vid[1], // idVendor
                pid[0],
                pid[1], // idProduct
                release[0],
                release[1], // bcdDevice
                strings.resolve(c.manufacturer)?, // iManufacturer
                strings.resolve(c.product)?, // iProduct
                strings.resolve(c.serial_number)?, // iSerialNumber
                self.configurations.len() as u8, // bNumConfigurations
            ],
        )?;

        let mut config_offsets: Vec<u16, MAX_CONFIGURATIONS> = Vec::new();
        let mut first_interface_offsets: Vec<Option<u16>, MAX_CONFIGURATIONS> = Vec::new();

        for (i, config) in self.configurations.iter().enumerate() {
            let offset = w.position();
            let first = config.write(&mut w, strings, (i + 1) as u8)?;

            // Capacities match MAX_CONFIGURATIONS, so these cannot overflow.
            config_offsets.push(offset as u16).ok();
            first_interface_offsets.push(first).ok();
        }

        descriptors.config_offsets = config_offsets;
        descriptors.first_interface_offsets = first_interface_offsets;

        Ok(descriptors)
    }
}
