mod test_helpers;

use crate::test_helpers::*;
use usb_hid_device::class_prelude::*;
use usb_hid_device::descriptor::BuilderError;
use usb_hid_device::descriptor_builder::{ClassDescriptor, UsbVidPid};
use usb_hid_device::prelude::*;

/// Splits a configuration descriptor into its (bLength, bDescriptorType, body) parts.
fn walk(config: &[u8]) -> Vec<(u8, u8, &[u8])> {
    let mut parts = Vec::new();
    let mut rest = config;

    while !rest.is_empty() {
        let len = rest[0] as usize;
        parts.push((rest[0], rest[1], &rest[2..len]));
        rest = &rest[len..];
    }

    parts
}

#[test]
fn language_id_string() {
    let descriptors = test_descriptors(8);

    assert_eq!(descriptors.string_descriptor(0), Some(&[4, 3, 0x09, 0x04][..]));
}

#[test]
fn string_lengths() {
    let descriptors = test_descriptors(8);

    for (i, text) in [MANUFACTURER, PRODUCT, SERIAL_NUMBER, CUSTOM_STRING]
        .iter()
        .enumerate()
    {
        let desc = descriptors.string_descriptor(i as u8 + 1).expect("string");

        assert_eq!(desc.len(), 2 + 2 * text.len());
        assert_eq!(desc[0] as usize, desc.len());
        assert_eq!(desc[1], descriptor_type::STRING);
    }

    assert!(descriptors.string_descriptor(5).is_none());
}

#[test]
fn total_length_matches_tree() {
    let descriptors = test_descriptors(8);

    for value in 1..=descriptors.num_configurations() {
        let config = descriptors.configuration_descriptor(value).expect("configuration");
        let total = u16::from_le_bytes([config[2], config[3]]) as usize;
        let summed: usize = walk(config).iter().map(|(len, _, _)| *len as usize).sum();

        assert_eq!(total, config.len());
        assert_eq!(summed, total);
        assert_eq!(config[5], value);
    }
}

#[test]
fn endpoint_addresses_follow_position() {
    let descriptors = test_descriptors(8);
    let config = descriptors.configuration_descriptor(1).unwrap();

    let endpoints: Vec<(u8, u8)> = walk(config)
        .iter()
        .filter(|(_, ty, _)| *ty == descriptor_type::ENDPOINT)
        .map(|(_, _, body)| (body[0], body[1]))
        .collect();

    assert_eq!(endpoints, vec![(0x81, 0x02), (0x02, 0x02)]);
    assert_eq!(u8::from(BULK_IN), 0x81);
    assert_eq!(u8::from(BULK_OUT), 0x02);
}

#[test]
fn second_configuration_by_index() {
    let bus = EngineBus::new();
    let descriptors = test_descriptors(64);
    let mut dev = UsbDevice::new(&bus, &descriptors, TestClass::default());

    dev.reset();

    let config = get_descriptor(&mut dev, descriptor_type::CONFIGURATION, 1, 255).expect("config");

    assert_eq!(config[5], 2);
    assert_eq!(config[8], 250);
    assert_eq!(
        get_descriptor(&mut dev, descriptor_type::CONFIGURATION, 2, 255),
        Err(HostError::Stall)
    );
}

#[test]
fn unsupported_descriptor_types_stall() {
    let bus = EngineBus::new();
    let descriptors = test_descriptors(64);
    let mut dev = UsbDevice::new(&bus, &descriptors, TestClass::default());

    dev.reset();

    for ty in [
        descriptor_type::DEVICE_QUALIFIER,
        descriptor_type::OTHER_SPEED_CONFIGURATION,
        descriptor_type::BOS,
        0x42,
    ]
    .iter()
    {
        assert_eq!(get_descriptor(&mut dev, *ty, 0, 10), Err(HostError::Stall));
    }

    assert_eq!(
        get_descriptor(&mut dev, descriptor_type::STRING, 9, 255),
        Err(HostError::Stall)
    );
}

#[test]
fn zero_wlength_descriptor_request_only_acknowledges() {
    let bus = EngineBus::new();
    let descriptors = test_descriptors(64);
    let mut dev = UsbDevice::new(&bus, &descriptors, TestClass::default());

    dev.reset();
    bus.clear_history();

    assert_eq!(
        get_descriptor(&mut dev, descriptor_type::DEVICE, 0, 0),
        Ok(vec![])
    );
    assert_eq!(bus.written_lengths(EndpointAddress::EP0_IN), vec![0]);
}

#[test]
fn raw_class_descriptor_is_placed_after_interface() {
    const FUNCTIONAL: &[u8] = &[0x00, 0x10, 0x01];

    let mut builder = DeviceDescriptorBuilder::new(UsbVidPid(1, 2));
    builder.configuration(
        Configuration::new().interface(
            Interface::new().alternate(
                AlternateSetting::new(0x02, 0x02, 0x00)
                    .class_descriptor(ClassDescriptor::Raw {
                        descriptor_type: 0x24,
                        body: FUNCTIONAL,
                    })
                    .endpoint(Endpoint::interrupt(UsbDirection::In, 8, 255)),
            ),
        ),
    );

    let descriptors = builder.build(&StringTable::new()).unwrap();
    let class = descriptors.first_interface_descriptor(1).expect("class descriptor");

    assert_eq!(&class[..5], &[5, 0x24, 0x00, 0x10, 0x01]);
    assert_eq!(&class[5..], &[7, 5, 0x81, 0x03, 8, 0, 255]);
}

#[test]
fn alternate_settings_share_interface_number() {
    let mut builder = DeviceDescriptorBuilder::new(UsbVidPid(1, 2));
    builder.configuration(
        Configuration::new().interface(
            Interface::new()
                .alternate(AlternateSetting::new(0xff, 0, 0))
                .alternate(
                    AlternateSetting::new(0xff, 0, 0)
                        .endpoint(Endpoint::bulk(UsbDirection::Out, 64)),
                ),
        ),
    );

    let descriptors = builder.build(&StringTable::new()).unwrap();
    let config = descriptors.configuration_descriptor(1).unwrap();
    let interfaces: Vec<&[u8]> = walk(config)
        .iter()
        .filter(|(_, ty, _)| *ty == descriptor_type::INTERFACE)
        .map(|(_, _, body)| *body)
        .collect();

    assert_eq!(config[4], 1);
    assert_eq!(&interfaces[0][..3], &[0, 0, 0]);
    assert_eq!(&interfaces[1][..3], &[0, 1, 1]);
}

#[test]
fn builder_errors_surface_from_build() {
    let long = "x".repeat(127);
    let long: &'static str = Box::leak(long.into_boxed_str());

    let mut builder = DeviceDescriptorBuilder::new(UsbVidPid(1, 2));
    builder.configuration(Configuration::new());

    assert_eq!(
        builder.build(&StringTable::new().add("long", long)).err(),
        Some(BuilderError::StringTooLong)
    );

    let mut too_many = Interface::new();
    for _ in 0..5 {
        too_many = too_many.alternate(AlternateSetting::new(0xff, 0, 0));
    }

    let mut builder = DeviceDescriptorBuilder::new(UsbVidPid(1, 2));
    builder.configuration(Configuration::new().interface(too_many));

    assert_eq!(
        builder.build(&StringTable::new()).err(),
        Some(BuilderError::CapacityExceeded)
    );
}
