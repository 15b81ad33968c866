#![allow(dead_code)]

use std::cell::RefCell;
use std::cmp::min;
use std::collections::{HashMap, HashSet, VecDeque};
use std::marker::PhantomData;

use usb_hid_device::class_prelude::*;
use usb_hid_device::control::{Recipient, Request, RequestType};
use usb_hid_device::descriptor_builder::{
    AlternateSetting, Configuration, DeviceDescriptorBuilder, Endpoint, Interface, StringTable,
};
use usb_hid_device::device::{UsbDevice, UsbVidPid};
use usb_hid_device::prelude::UsbEventHandler;

pub const VID: u16 = 0x16c0;
pub const PID: u16 = 0x05dc;
pub const MANUFACTURER: &str = "TestClass Manufacturer";
pub const PRODUCT: &str = "usb-hid-device TestClass";
pub const SERIAL_NUMBER: &str = "TestClass Serial";
pub const CUSTOM_STRING: &str = "TestClass Custom String";

pub const REQ_SET_VALUE: u8 = 1;
pub const REQ_GET_VALUE: u8 = 2;
pub const REQ_WRITE_BUFFER: u8 = 3;
pub const REQ_READ_BUFFER: u8 = 4;
pub const REQ_REJECT: u8 = 5;
pub const REQ_UNKNOWN: u8 = 42;

pub const BULK_IN: EndpointAddress = EndpointAddress::from_u8(0x81);
pub const BULK_OUT: EndpointAddress = EndpointAddress::from_u8(0x02);

/// Selects how the mock peripheral behaves on endpoint 0.
pub trait BusMode {
    const CURSOR: CursorOwner;
    const EARLY_ADDRESS: bool = false;
}

pub struct Engine;

impl BusMode for Engine {
    const CURSOR: CursorOwner = CursorOwner::Engine;
}

pub struct Peripheral;

impl BusMode for Peripheral {
    const CURSOR: CursorOwner = CursorOwner::Peripheral;
}

pub struct EarlyAddress;

impl BusMode for EarlyAddress {
    const CURSOR: CursorOwner = CursorOwner::Engine;
    const EARLY_ADDRESS: bool = true;
}

#[derive(Default)]
pub struct BusState {
    pub opened: Vec<(EndpointAddress, EndpointType, u16)>,
    pub closed: Vec<EndpointAddress>,
    pub stalled: HashSet<u8>,
    pub pending_writes: HashMap<u8, VecDeque<Vec<u8>>>,
    pub history: Vec<(EndpointAddress, Vec<u8>)>,
    pub out_packets: HashMap<u8, VecDeque<Vec<u8>>>,
    pub prepared: Vec<(EndpointAddress, usize)>,
    pub flushed: Vec<EndpointAddress>,
    pub address: Option<u8>,
    pub test_mode: Option<TestMode>,
    pub events: VecDeque<PollResult>,
    pub ep0_out_starts: usize,
    pub resets: usize,
    pub suspends: usize,
    pub resumes: usize,
}

/// In-memory peripheral that records everything the stack asks of it.
pub struct MockBus<M: BusMode> {
    pub state: RefCell<BusState>,
    _mode: PhantomData<M>,
}

pub type EngineBus = MockBus<Engine>;
pub type PeripheralBus = MockBus<Peripheral>;
pub type EarlyAddressBus = MockBus<EarlyAddress>;

impl<M: BusMode> MockBus<M> {
    pub fn new() -> Self {
        MockBus {
            state: RefCell::new(BusState::default()),
            _mode: PhantomData,
        }
    }

    pub fn queue_out(&self, ep_addr: EndpointAddress, data: &[u8]) {
        self.state
            .borrow_mut()
            .out_packets
            .entry(ep_addr.into())
            .or_default()
            .push_back(data.to_vec());
    }

    pub fn queue_event(&self, event: PollResult) {
        self.state.borrow_mut().events.push_back(event);
    }

    pub fn pop_write(&self, ep_addr: EndpointAddress) -> Option<Vec<u8>> {
        self.state
            .borrow_mut()
            .pending_writes
            .get_mut(&u8::from(ep_addr))
            .and_then(|q| q.pop_front())
    }

    /// Lengths of every packet written to `ep_addr` so far.
    pub fn written_lengths(&self, ep_addr: EndpointAddress) -> Vec<usize> {
        self.state
            .borrow()
            .history
            .iter()
            .filter(|(ep, _)| *ep == ep_addr)
            .map(|(_, data)| data.len())
            .collect()
    }

    pub fn clear_history(&self) {
        self.state.borrow_mut().history.clear();
    }

    pub fn stalled(&self, ep_addr: EndpointAddress) -> bool {
        self.state.borrow().stalled.contains(&u8::from(ep_addr))
    }

    pub fn ep0_stalled(&self) -> bool {
        self.stalled(EndpointAddress::EP0_IN) || self.stalled(EndpointAddress::EP0_OUT)
    }

    pub fn is_open(&self, ep_addr: EndpointAddress) -> bool {
        let state = self.state.borrow();
        let opens = state.opened.iter().filter(|(ep, _, _)| *ep == ep_addr).count();
        let closes = state.closed.iter().filter(|ep| **ep == ep_addr).count();

        opens > closes
    }
}

impl<M: BusMode> UsbBus for MockBus<M> {
    const QUIRK_SET_ADDRESS_BEFORE_STATUS: bool = M::EARLY_ADDRESS;
    const EP0_CURSOR: CursorOwner = M::CURSOR;

    fn open_endpoint(
        &self,
        ep_addr: EndpointAddress,
        ep_type: EndpointType,
        max_packet_size: u16,
    ) -> usb_hid_device::Result<()> {
        self.state
            .borrow_mut()
            .opened
            .push((ep_addr, ep_type, max_packet_size));
        Ok(())
    }

    fn close_endpoint(&self, ep_addr: EndpointAddress) -> usb_hid_device::Result<()> {
        self.state.borrow_mut().closed.push(ep_addr);
        Ok(())
    }

    fn set_stalled(&self, ep_addr: EndpointAddress, stalled: bool) {
        let mut state = self.state.borrow_mut();

        if stalled {
            state.stalled.insert(ep_addr.into());
        } else {
            state.stalled.remove(&u8::from(ep_addr));
        }
    }

    fn is_stalled(&self, ep_addr: EndpointAddress) -> bool {
        self.stalled(ep_addr)
    }

    fn write(&self, ep_addr: EndpointAddress, buf: &[u8]) -> usb_hid_device::Result<usize> {
        let mut state = self.state.borrow_mut();

        state.history.push((ep_addr, buf.to_vec()));
        state
            .pending_writes
            .entry(ep_addr.into())
            .or_default()
            .push_back(buf.to_vec());

        Ok(buf.len())
    }

    fn prepare_read(&self, ep_addr: EndpointAddress, len: usize) -> usb_hid_device::Result<()> {
        self.state.borrow_mut().prepared.push((ep_addr, len));
        Ok(())
    }

    fn read(&self, ep_addr: EndpointAddress, buf: &mut [u8]) -> usb_hid_device::Result<usize> {
        let mut state = self.state.borrow_mut();
        let queue = state
            .out_packets
            .get_mut(&u8::from(ep_addr))
            .ok_or(UsbError::WouldBlock)?;

        let packet = match queue.front() {
            Some(packet) => packet,
            None => return Err(UsbError::WouldBlock),
        };

        if packet.len() > buf.len() {
            return Err(UsbError::BufferOverflow);
        }

        let len = packet.len();
        buf[..len].copy_from_slice(packet);
        queue.pop_front();

        Ok(len)
    }

    fn set_device_address(&self, addr: u8) {
        self.state.borrow_mut().address = Some(addr);
    }

    fn flush(&self, ep_addr: EndpointAddress) {
        self.state.borrow_mut().flushed.push(ep_addr);
    }

    fn set_test_mode(&self, mode: TestMode) -> usb_hid_device::Result<()> {
        self.state.borrow_mut().test_mode = Some(mode);
        Ok(())
    }

    fn ep0_out_start(&self) {
        self.state.borrow_mut().ep0_out_starts += 1;
    }

    fn reset(&self) {
        let mut state = self.state.borrow_mut();

        state.resets += 1;
        state.stalled.clear();
        state.pending_writes.clear();
        state.out_packets.clear();
        state.address = None;
    }

    fn suspend(&self) {
        self.state.borrow_mut().suspends += 1;
    }

    fn resume(&self) {
        self.state.borrow_mut().resumes += 1;
    }

    fn poll(&self) -> PollResult {
        self.state
            .borrow_mut()
            .events
            .pop_front()
            .unwrap_or(PollResult::None)
    }
}

/// Class that answers a handful of vendor requests on interface 0 and records its callbacks.
#[derive(Default)]
pub struct TestClass {
    pub value: u16,
    pub buffer: Vec<u8>,
    pub init_calls: Vec<u8>,
    pub deinit_calls: Vec<u8>,
    pub tx_sent: usize,
    pub rx_ready: usize,
    pub fail_init: bool,
    pub data_in: Vec<EndpointAddress>,
    pub data_out: Vec<EndpointAddress>,
    pub setups: Vec<Request>,
}

impl<B: UsbBus> UsbClass<B> for TestClass {
    fn init(&mut self, bus: &B, config_value: u8) -> usb_hid_device::Result<()> {
        self.init_calls.push(config_value);

        if self.fail_init {
            return Err(UsbError::EndpointOverflow);
        }

        bus.open_endpoint(BULK_IN, EndpointType::Bulk, 64)?;
        bus.open_endpoint(BULK_OUT, EndpointType::Bulk, 64)
    }

    fn deinit(&mut self, bus: &B, config_value: u8) -> usb_hid_device::Result<()> {
        self.deinit_calls.push(config_value);

        bus.close_endpoint(BULK_IN)?;
        bus.close_endpoint(BULK_OUT)
    }

    fn setup(&mut self, xfer: ControlSetup<'_, '_, B>) {
        let req = *xfer.request();
        self.setups.push(req);

        if req.request_type != RequestType::Vendor {
            return;
        }

        match req.request {
            REQ_SET_VALUE => {
                self.value = req.value;
                xfer.accept().unwrap();
            }
            REQ_GET_VALUE => {
                xfer.accept_with(&self.value.to_le_bytes()).unwrap();
            }
            REQ_WRITE_BUFFER => {
                xfer.receive().ok();
            }
            REQ_READ_BUFFER => {
                xfer.accept_with(&self.buffer).ok();
            }
            REQ_REJECT => {
                xfer.reject().unwrap();
            }
            _ => {}
        }
    }

    fn ep0_tx_sent(&mut self, _bus: &B) {
        self.tx_sent += 1;
    }

    fn ep0_rx_ready(&mut self, _bus: &B, data: &[u8]) {
        self.rx_ready += 1;
        self.buffer = data.to_vec();
    }

    fn data_in(&mut self, _bus: &B, ep_addr: EndpointAddress) {
        self.data_in.push(ep_addr);
    }

    fn data_out(&mut self, _bus: &B, ep_addr: EndpointAddress) {
        self.data_out.push(ep_addr);
    }
}

fn vendor_interface() -> Interface {
    Interface::new().alternate(
        AlternateSetting::new(0xff, 0x00, 0x00)
            .string("custom")
            .endpoint(Endpoint::bulk(UsbDirection::In, 64))
            .endpoint(Endpoint::bulk(UsbDirection::Out, 64)),
    )
}

/// Two configurations with one vendor interface each. Every configuration descriptor is 32 bytes.
pub fn test_descriptors(max_packet_size_0: u8) -> Descriptors {
    let strings = StringTable::new()
        .add("manufacturer", MANUFACTURER)
        .add("product", PRODUCT)
        .add("serial", SERIAL_NUMBER)
        .add("custom", CUSTOM_STRING);

    let mut builder = DeviceDescriptorBuilder::new(UsbVidPid(VID, PID));

    builder
        .max_packet_size_0(max_packet_size_0)
        .manufacturer("manufacturer")
        .product("product")
        .serial_number("serial")
        .configuration(Configuration::new().remote_wakeup(true).interface(vendor_interface()))
        .configuration(Configuration::new().max_power(500).interface(vendor_interface()));

    builder.build(&strings).expect("build descriptors")
}

#[derive(Debug, PartialEq, Eq)]
pub enum HostError {
    Stall,
    NoResponse,
    UnexpectedData(Vec<u8>),
}

pub fn request_type(direction: UsbDirection, request_type: RequestType, recipient: Recipient) -> u8 {
    direction as u8 | (u8::from(request_type) << 5) | u8::from(recipient)
}

pub fn setup(request_type: u8, request: u8, value: u16, index: u16, length: u16) -> [u8; 8] {
    let value = value.to_le_bytes();
    let index = index.to_le_bytes();
    let length = length.to_le_bytes();

    [
        request_type,
        request,
        value[0],
        value[1],
        index[0],
        index[1],
        length[0],
        length[1],
    ]
}

pub type Device<'a, M, C> = UsbDevice<'a, MockBus<M>, C>;

/// Runs a control transfer with an IN data stage the way a host would: reads packets until a short
/// one arrives or wLength bytes are in, then completes the OUT status stage.
pub fn control_in<M, C>(dev: &mut Device<'_, M, C>, packet: [u8; 8]) -> Result<Vec<u8>, HostError>
where
    M: BusMode,
    C: UsbClass<MockBus<M>>,
{
    let length = usize::from(u16::from_le_bytes([packet[6], packet[7]]));

    if length == 0 {
        return control_out(dev, packet, &[]).map(|_| Vec::new());
    }

    let bus = dev.bus();
    let mps = usize::from(dev.descriptors().max_packet_size_0());

    dev.setup_stage(&packet);

    let mut data = Vec::new();

    loop {
        if bus.stalled(EndpointAddress::EP0_IN) {
            return Err(HostError::Stall);
        }

        let written = bus.pop_write(EndpointAddress::EP0_IN).ok_or(HostError::NoResponse)?;
        let count = min(written.len(), mps);

        data.extend_from_slice(&written[..count]);

        if M::CURSOR == CursorOwner::Peripheral {
            dev.ep0_in_advanced(count);
        }

        dev.data_in_stage(0);

        if count < mps || data.len() >= length {
            break;
        }
    }

    if M::CURSOR == CursorOwner::Engine {
        bus.queue_out(EndpointAddress::EP0_OUT, &[]);
    }

    dev.data_out_stage(0);

    Ok(data)
}

/// Runs a control transfer with an optional OUT data stage followed by the IN status stage.
pub fn control_out<M, C>(
    dev: &mut Device<'_, M, C>,
    packet: [u8; 8],
    data: &[u8],
) -> Result<(), HostError>
where
    M: BusMode,
    C: UsbClass<MockBus<M>>,
{
    let bus = dev.bus();
    let mps = usize::from(dev.descriptors().max_packet_size_0());

    dev.setup_stage(&packet);

    for chunk in data.chunks(mps) {
        if bus.ep0_stalled() {
            return Err(HostError::Stall);
        }

        match M::CURSOR {
            CursorOwner::Engine => bus.queue_out(EndpointAddress::EP0_OUT, chunk),
            CursorOwner::Peripheral => dev.ep0_out_received(chunk),
        }

        dev.data_out_stage(0);
    }

    if bus.ep0_stalled() {
        return Err(HostError::Stall);
    }

    let status = bus.pop_write(EndpointAddress::EP0_IN).ok_or(HostError::NoResponse)?;

    if !status.is_empty() {
        return Err(HostError::UnexpectedData(status));
    }

    dev.data_in_stage(0);

    Ok(())
}

pub fn get_descriptor<M, C>(
    dev: &mut Device<'_, M, C>,
    descriptor_type: u8,
    index: u8,
    length: u16,
) -> Result<Vec<u8>, HostError>
where
    M: BusMode,
    C: UsbClass<MockBus<M>>,
{
    control_in(
        dev,
        setup(
            request_type(UsbDirection::In, RequestType::Standard, Recipient::Device),
            Request::GET_DESCRIPTOR,
            (u16::from(descriptor_type) << 8) | u16::from(index),
            0,
            length,
        ),
    )
}

pub fn set_address<M, C>(dev: &mut Device<'_, M, C>, addr: u8) -> Result<(), HostError>
where
    M: BusMode,
    C: UsbClass<MockBus<M>>,
{
    control_out(
        dev,
        setup(
            request_type(UsbDirection::Out, RequestType::Standard, Recipient::Device),
            Request::SET_ADDRESS,
            u16::from(addr),
            0,
            0,
        ),
        &[],
    )
}

pub fn set_configuration<M, C>(dev: &mut Device<'_, M, C>, value: u8) -> Result<(), HostError>
where
    M: BusMode,
    C: UsbClass<MockBus<M>>,
{
    control_out(
        dev,
        setup(
            request_type(UsbDirection::Out, RequestType::Standard, Recipient::Device),
            Request::SET_CONFIGURATION,
            u16::from(value),
            0,
            0,
        ),
        &[],
    )
}

pub fn get_configuration<M, C>(dev: &mut Device<'_, M, C>) -> Result<Vec<u8>, HostError>
where
    M: BusMode,
    C: UsbClass<MockBus<M>>,
{
    control_in(
        dev,
        setup(
            request_type(UsbDirection::In, RequestType::Standard, Recipient::Device),
            Request::GET_CONFIGURATION,
            0,
            0,
            1,
        ),
    )
}

/// Bus reset, SET_ADDRESS(5) and SET_CONFIGURATION(1).
pub fn enumerate<M, C>(dev: &mut Device<'_, M, C>)
where
    M: BusMode,
    C: UsbClass<MockBus<M>>,
{
    dev.reset();
    set_address(dev, 5).expect("set address");
    set_configuration(dev, 1).expect("set configuration");
}
