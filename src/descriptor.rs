use heapless::Vec;

/// Standard descriptor types
#[allow(missing_docs)]
pub mod descriptor_type {
    pub const DEVICE: u8 = 1;
    pub const CONFIGURATION: u8 = 2;
    pub const STRING: u8 = 3;
    pub const INTERFACE: u8 = 4;
    pub const ENDPOINT: u8 = 5;
    pub const DEVICE_QUALIFIER: u8 = 6;
    pub const OTHER_SPEED_CONFIGURATION: u8 = 7;
    pub const BOS: u8 = 15;
}

/// String descriptor language IDs.
pub mod lang_id {
    /// English (US)
    pub const ENGLISH_US: u16 = 0x0409;
}

/// Maximum number of configurations in a descriptor tree.
pub const MAX_CONFIGURATIONS: usize = 4;

/// Maximum number of interfaces in one configuration.
pub const MAX_INTERFACES: usize = 8;

/// Maximum number of alternate settings of one interface.
pub const MAX_ALTERNATE_SETTINGS: usize = 4;

/// Maximum number of endpoints in one alternate setting, excluding endpoint 0.
pub const MAX_ENDPOINTS: usize = 15;

/// Maximum number of class-specific descriptors in one alternate setting.
pub const MAX_CLASS_DESCRIPTORS: usize = 4;

/// Maximum number of strings in a string table, excluding the language ID list at index 0.
pub const MAX_STRINGS: usize = 16;

/// Capacity of the buffer holding the device descriptor with all configurations inlined.
pub const DESCRIPTOR_BUF_LEN: usize = 512;

/// Capacity of the buffer holding all string descriptors.
pub const STRING_BUF_LEN: usize = 512;

pub(crate) const DEVICE_DESCRIPTOR_LEN: usize = 18;
pub(crate) const CONFIGURATION_DESCRIPTOR_LEN: usize = 9;

/// An invalid descriptor tree. Building descriptors either succeeds completely or reports the first
/// of these errors; a partially written buffer is never returned.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BuilderError {
    /// A string contains a character outside printable ASCII (32..=126).
    InvalidCharacter,

    /// A string is longer than fits in a single string descriptor.
    StringTooLong,

    /// The same label was registered twice in a string table.
    DuplicateString(&'static str),

    /// A label was referenced that is not in the string table.
    MissingString(&'static str),

    /// Configured maximum power does not fit in bMaxPower.
    MaxPowerOutOfRange,

    /// A maximum packet size is not valid for the endpoint type.
    InvalidPacketSize,

    /// A fixed-capacity list or buffer is full.
    CapacityExceeded,

    /// A configuration's total length does not fit in wTotalLength.
    ConfigurationTooLong,

    /// A single descriptor body does not fit in bLength.
    DescriptorTooLong,

    /// An interface has no alternate settings.
    NoAlternateSettings,

    /// A device has no configurations.
    NoConfigurations,
}

/// Writes length-prefixed descriptors into a fixed-capacity buffer.
pub(crate) struct DescriptorWriter<'a, const N: usize> {
    buf: &'a mut Vec<u8, N>,
}

impl<'a, const N: usize> DescriptorWriter<'a, N> {
    pub(crate) fn new(buf: &'a mut Vec<u8, N>) -> Self {
        DescriptorWriter { buf }
    }

    /// Gets the current position in the buffer, i.e. the number of bytes written.
    pub fn position(&self) -> usize {
        self.buf.len()
    }

    /// Writes an arbitrary (usually class-specific) descriptor.
    pub fn write(&mut self, descriptor_type: u8, descriptor: &[u8]) -> Result<(), BuilderError> {
        let length = descriptor.len() + 2;

        if length > 255 {
            return Err(BuilderError::DescriptorTooLong);
        }

        self.push(&[length as u8, descriptor_type])?;
        self.push(descriptor)
    }

    /// Writes a string descriptor from printable ASCII text.
    pub fn write_string(&mut self, string: &str) -> Result<(), BuilderError> {
        let length = string.len() * 2 + 2;

        if length > 255 {
            return Err(BuilderError::StringTooLong);
        }

        self.push(&[length as u8, descriptor_type::STRING])?;

        for c in string.bytes() {
            self.push(&u16::from(c).to_le_bytes())?;
        }

        Ok(())
    }

    pub(crate) fn insert(&mut self, index: usize, data: &[u8]) {
        if let Some(dst) = self.buf.get_mut(index..index + data.len()) {
            dst.copy_from_slice(data);
        }
    }

    fn push(&mut self, data: &[u8]) -> Result<(), BuilderError> {
        self.buf
            .extend_from_slice(data)
            .map_err(|_| BuilderError::CapacityExceeded)
    }
}

/// Serialized, immutable descriptor set of a device.
///
/// The device descriptor is stored with every configuration descriptor inlined after it, so
/// [`device_descriptor`](Descriptors::device_descriptor) returns the whole buffer. Configurations
/// and strings are found through offset tables without walking the buffer.
#[derive(Clone, Debug)]
pub struct Descriptors {
    pub(crate) device: Vec<u8, DESCRIPTOR_BUF_LEN>,
    pub(crate) config_offsets: Vec<u16, MAX_CONFIGURATIONS>,
    pub(crate) first_interface_offsets: Vec<Option<u16>, MAX_CONFIGURATIONS>,
    pub(crate) strings: Vec<u8, STRING_BUF_LEN>,
    pub(crate) string_offsets: Vec<u16, { MAX_STRINGS + 1 }>,
}

impl Descriptors {
    /// Gets the device descriptor buffer. The first byte is the 18-byte device descriptor's own
    /// length; the configurations follow it.
    pub fn device_descriptor(&self) -> &[u8] {
        &self.device
    }

    /// Gets a configuration descriptor with all of its interface, class-specific and endpoint
    /// descriptors, by its 1-based configuration value. Returns `None` for 0 or a value past the
    /// last configuration.
    pub fn configuration_descriptor(&self, index: u8) -> Option<&[u8]> {
        let start = *self.config_offsets.get(usize::from(index).checked_sub(1)?)? as usize;
        let header = self.device.get(start..start + CONFIGURATION_DESCRIPTOR_LEN)?;
        let total = u16::from_le_bytes([header[2], header[3]]) as usize;

        self.device.get(start..start + total)
    }

    /// Gets a string descriptor. Index 0 is the language ID list.
    pub fn string_descriptor(&self, index: u8) -> Option<&[u8]> {
        let start = *self.string_offsets.get(usize::from(index))? as usize;
        let len = *self.strings.get(start)? as usize;

        self.strings.get(start..start + len)
    }

    /// Gets the class-specific descriptors that follow the first interface descriptor of a
    /// configuration, up to the end of that configuration. Returns `None` if that interface has
    /// none.
    pub fn first_interface_descriptor(&self, config_value: u8) -> Option<&[u8]> {
        let idx = usize::from(config_value).checked_sub(1)?;
        let offset = (*self.first_interface_offsets.get(idx)?)? as usize;

        self.configuration_descriptor(config_value)?.get(offset..)
    }

    /// Gets bNumConfigurations.
    pub fn num_configurations(&self) -> u8 {
        self.device[DEVICE_DESCRIPTOR_LEN - 1]
    }

    /// Gets bNumInterfaces of a configuration, or 0 if it does not exist.
    pub fn num_interfaces(&self, config_value: u8) -> u8 {
        self.configuration_descriptor(config_value)
            .map_or(0, |c| c[4])
    }

    /// Gets bMaxPacketSize0.
    pub fn max_packet_size_0(&self) -> u8 {
        self.device[7]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_prefixes_length_and_type() {
        let mut buf: Vec<u8, 16> = Vec::new();
        let mut w = DescriptorWriter::new(&mut buf);

        w.write(0x21, &[0x11, 0x01]).unwrap();

        assert_eq!(w.position(), 4);
        assert_eq!(&buf[..], &[4, 0x21, 0x11, 0x01]);
    }

    #[test]
    fn writer_encodes_utf16le() {
        let mut buf: Vec<u8, 16> = Vec::new();
        DescriptorWriter::new(&mut buf).write_string("Hi").unwrap();

        assert_eq!(&buf[..], &[6, 3, b'H', 0, b'i', 0]);
    }

    #[test]
    fn writer_reports_full_buffer() {
        let mut buf: Vec<u8, 4> = Vec::new();
        let mut w = DescriptorWriter::new(&mut buf);

        assert_eq!(w.write(0x24, &[1, 2, 3]), Err(BuilderError::CapacityExceeded));
    }

    #[test]
    fn writer_insert_patches_in_place() {
        let mut buf: Vec<u8, 8> = Vec::new();
        let mut w = DescriptorWriter::new(&mut buf);

        w.write(2, &[0, 0, 7]).unwrap();
        w.insert(2, &5u16.to_le_bytes());

        assert_eq!(&buf[..], &[5, 2, 5, 0, 7]);
    }
}
