use crate::bus::{CursorOwner, UsbBus};
use crate::control::Request;
use crate::endpoint::EndpointAddress;
use crate::{Result, UsbDirection, UsbError};
use core::cmp::min;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum ControlState {
    Idle,
    Setup,
    DataIn,
    DataOut,
    StatusIn,
    StatusOut,
}

/// What a completed endpoint 0 packet finished.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub(crate) enum Ep0Event {
    Pending,
    DataInDone,
    DataOutDone,
    StatusInDone,
    StatusOutDone,
}

// Maximum length of control transfer data stage in bytes. 128 bytes by default. You can define the
// feature "control-buffer-256" to make it 256 bytes if you have larger control transfers.
#[cfg(not(feature = "control-buffer-256"))]
const CONTROL_BUF_LEN: usize = 128;
#[cfg(feature = "control-buffer-256")]
const CONTROL_BUF_LEN: usize = 256;

/// Progress of one direction of the endpoint 0 data stage.
#[derive(Copy, Clone, Default, Debug)]
pub(crate) struct Ep0Transfer {
    pub cursor: usize,
    pub rem_data_len: usize,
    pub total_data_len: usize,
    pub ctl_data_len: usize,
    pub max_packet: usize,
}

impl Ep0Transfer {
    fn start(&mut self, len: usize) {
        self.cursor = 0;
        self.rem_data_len = len;
        self.total_data_len = len;
    }

    // Bytes the next packet (or, when the peripheral owns the cursor, the rest of the transfer)
    // covers.
    fn window(&self, owner: CursorOwner) -> (usize, usize) {
        let start = min(self.cursor, self.total_data_len);
        let len = match owner {
            CursorOwner::Engine => min(self.rem_data_len, self.max_packet),
            CursorOwner::Peripheral => self.rem_data_len,
        };

        (start, min(start + len, self.total_data_len))
    }
}

/// Drives SETUP, DATA and STATUS stages of control transfers on endpoint 0.
pub(crate) struct ControlPipe<'a, B: UsbBus> {
    bus: &'a B,
    state: ControlState,
    request: Option<Request>,
    in_xfer: Ep0Transfer,
    out_xfer: Ep0Transfer,
    buf: [u8; CONTROL_BUF_LEN],
    static_in_buf: Option<&'a [u8]>,
}

impl<'a, B: UsbBus> ControlPipe<'a, B> {
    pub fn new(bus: &'a B, max_packet_size: u8) -> ControlPipe<'a, B> {
        let xfer = Ep0Transfer {
            max_packet: usize::from(max_packet_size),
            ..Ep0Transfer::default()
        };

        ControlPipe {
            bus,
            state: ControlState::Idle,
            request: None,
            in_xfer: xfer,
            out_xfer: xfer,
            buf: [0; CONTROL_BUF_LEN],
            static_in_buf: None,
        }
    }

    /// True between a SETUP packet and the first response to it.
    pub fn waiting_for_response(&self) -> bool {
        self.state == ControlState::Setup
    }

    /// Data received in the OUT data stage.
    pub fn data(&self) -> &[u8] {
        &self.buf[..min(self.out_xfer.total_data_len, CONTROL_BUF_LEN)]
    }

    pub fn reset(&mut self) {
        let max_packet = self.in_xfer.max_packet;

        self.in_xfer = Ep0Transfer {
            max_packet,
            ..Ep0Transfer::default()
        };
        self.out_xfer = self.in_xfer;
        self.request = None;
        self.static_in_buf = None;
        self.state = ControlState::Idle;
    }

    pub fn handle_setup(&mut self, packet: &[u8]) -> Option<Request> {
        let req = match Request::parse(packet) {
            Ok(req) => req,
            Err(_) => {
                usb_warn!("malformed SETUP packet");
                self.request = None;
                self.set_error();
                return None;
            }
        };

        usb_trace!(
            "SETUP {:?} {:?} {:?} req:{} val:{} idx:{} len:{} {:?}",
            req.direction,
            req.request_type,
            req.recipient,
            req.request,
            req.value,
            req.index,
            req.length,
            self.state
        );

        // A new SETUP always clears a protocol stall on endpoint 0.
        for ep in [EndpointAddress::EP0_OUT, EndpointAddress::EP0_IN].iter() {
            if self.bus.is_stalled(*ep) {
                self.bus.set_stalled(*ep, false);
            }
        }

        self.in_xfer.ctl_data_len = usize::from(req.length);
        self.static_in_buf = None;
        self.request = Some(req);
        self.state = ControlState::Setup;

        Some(req)
    }

    /// Starts an IN data stage with a copy of `data`, truncated to wLength.
    pub fn send_data(&mut self, data: &[u8]) -> Result<()> {
        let len = min(data.len(), self.in_xfer.ctl_data_len);

        if len > self.buf.len() {
            self.set_error();
            return Err(UsbError::BufferOverflow);
        }

        self.buf[..len].copy_from_slice(&data[..len]);
        self.static_in_buf = None;
        self.start_in(len)
    }

    /// Starts an IN data stage directly from `data`, truncated to wLength.
    pub fn send_borrowed(&mut self, data: &'a [u8]) -> Result<()> {
        let len = min(data.len(), self.in_xfer.ctl_data_len);

        self.static_in_buf = Some(&data[..len]);
        self.start_in(len)
    }

    fn start_in(&mut self, len: usize) -> Result<()> {
        if self.state != ControlState::Setup {
            return Err(UsbError::InvalidState);
        }

        self.in_xfer.start(len);
        self.state = ControlState::DataIn;
        self.write_in_packet();

        Ok(())
    }

    fn write_in_packet(&mut self) {
        let (start, end) = self.in_xfer.window(B::EP0_CURSOR);
        let source = self.static_in_buf.unwrap_or(&self.buf[..]);

        if let Err(_err) = self.bus.write(EndpointAddress::EP0_IN, &source[start..end]) {
            // There isn't much we can do if the write fails, except to wait for the host to resend
            // the request.
            usb_warn!("EP0 IN write failed: {:?}", _err);
        }
    }

    /// Arms the OUT data stage for wLength bytes.
    pub fn prepare_rx(&mut self) -> Result<()> {
        if self.state != ControlState::Setup {
            return Err(UsbError::InvalidState);
        }

        let len = self.request.map_or(0, |r| usize::from(r.length));

        if len > self.buf.len() {
            // Data stage won't fit in buffer
            self.set_error();
            return Err(UsbError::BufferOverflow);
        }

        self.out_xfer.start(len);
        self.state = ControlState::DataOut;
        self.arm_out()
    }

    fn arm_out(&self) -> Result<()> {
        let (start, end) = self.out_xfer.window(CursorOwner::Engine);
        self.bus.prepare_read(EndpointAddress::EP0_OUT, end - start)
    }

    /// Sends the zero-length IN status packet.
    pub fn send_status(&mut self) -> Result<()> {
        self.state = ControlState::StatusIn;
        self.bus.write(EndpointAddress::EP0_IN, &[]).map(|_| ())
    }

    /// Arms endpoint 0 OUT for the host's zero-length status packet.
    pub fn receive_status(&mut self) -> Result<()> {
        self.state = ControlState::StatusOut;
        self.bus.prepare_read(EndpointAddress::EP0_OUT, 0)
    }

    /// The peripheral loaded `count` more bytes of the IN data stage.
    pub fn in_advanced(&mut self, count: usize) {
        if B::EP0_CURSOR != CursorOwner::Peripheral || self.state != ControlState::DataIn {
            usb_warn!("unexpected EP0 IN cursor report");
            return;
        }

        self.in_xfer.cursor = min(self.in_xfer.cursor + count, self.in_xfer.total_data_len);
    }

    /// The peripheral delivered OUT data stage bytes.
    pub fn out_received(&mut self, data: &[u8]) {
        if B::EP0_CURSOR != CursorOwner::Peripheral || self.state != ControlState::DataOut {
            usb_warn!("unexpected EP0 OUT data");
            return;
        }

        let start = min(self.out_xfer.cursor, self.out_xfer.total_data_len);
        let count = min(data.len(), self.out_xfer.total_data_len - start);

        self.buf[start..start + count].copy_from_slice(&data[..count]);
        self.out_xfer.cursor = start + count;
    }

    pub fn handle_in_complete(&mut self) -> Ep0Event {
        match self.state {
            ControlState::DataIn => {
                let xfer = &mut self.in_xfer;

                if xfer.rem_data_len > xfer.max_packet {
                    xfer.rem_data_len -= xfer.max_packet;

                    if B::EP0_CURSOR == CursorOwner::Engine {
                        xfer.cursor += xfer.max_packet;
                    }

                    self.write_in_packet();
                    Ep0Event::Pending
                } else if xfer.total_data_len % xfer.max_packet == 0
                    && xfer.total_data_len >= xfer.max_packet
                    && xfer.total_data_len < xfer.ctl_data_len
                {
                    // Last packet was full and the host asked for more: terminate with a ZLP.
                    xfer.ctl_data_len = 0;
                    self.bus.write(EndpointAddress::EP0_IN, &[]).ok();
                    Ep0Event::Pending
                } else {
                    self.receive_status().ok();
                    Ep0Event::DataInDone
                }
            }
            ControlState::StatusIn => {
                self.finish();
                Ep0Event::StatusInDone
            }
            _ => Ep0Event::Pending,
        }
    }

    pub fn handle_out_complete(&mut self) -> Ep0Event {
        match self.state {
            ControlState::DataOut => {
                if B::EP0_CURSOR == CursorOwner::Engine {
                    let (start, end) = self.out_xfer.window(CursorOwner::Engine);

                    match self.bus.read(EndpointAddress::EP0_OUT, &mut self.buf[start..end]) {
                        Ok(_) => {}
                        Err(UsbError::WouldBlock) => return Ep0Event::Pending,
                        Err(_) => {
                            // Failed to read or buffer overflow (overflow is only possible if the
                            // host sends more data than it indicated in the SETUP request)
                            self.set_error();
                            return Ep0Event::Pending;
                        }
                    }
                }

                let xfer = &mut self.out_xfer;

                if xfer.rem_data_len > xfer.max_packet {
                    xfer.rem_data_len -= xfer.max_packet;

                    if B::EP0_CURSOR == CursorOwner::Engine {
                        xfer.cursor += xfer.max_packet;
                    }

                    self.arm_out().ok();
                    Ep0Event::Pending
                } else {
                    xfer.rem_data_len = 0;
                    Ep0Event::DataOutDone
                }
            }
            ControlState::StatusOut => {
                self.discard_out();
                self.finish();
                Ep0Event::StatusOutDone
            }
            _ => {
                self.discard_out();
                Ep0Event::Pending
            }
        }
    }

    fn discard_out(&mut self) {
        if B::EP0_CURSOR == CursorOwner::Engine {
            self.bus.read(EndpointAddress::EP0_OUT, &mut []).ok();
        }
    }

    fn finish(&mut self) {
        self.state = ControlState::Idle;
        self.bus.ep0_out_start();
    }

    /// Fails the current request: stalls endpoint 0 in the direction the host is waiting on and
    /// re-arms for the next SETUP.
    pub fn reject(&mut self) -> Result<()> {
        match self.state {
            ControlState::Idle => Err(UsbError::InvalidState),
            _ => {
                self.set_error();
                Ok(())
            }
        }
    }

    fn set_error(&mut self) {
        match self.request {
            Some(req) if req.direction == UsbDirection::Out && req.length != 0 => {
                self.bus.set_stalled(EndpointAddress::EP0_OUT, true);
            }
            Some(_) => self.bus.set_stalled(EndpointAddress::EP0_IN, true),
            None => {
                self.bus.set_stalled(EndpointAddress::EP0_OUT, true);
                self.bus.set_stalled(EndpointAddress::EP0_IN, true);
            }
        }

        usb_debug!("EP0 stalled in state {:?}", self.state);

        self.static_in_buf = None;
        self.state = ControlState::Idle;
        self.bus.ep0_out_start();
    }
}
