use crate::bus::UsbBus;
use crate::control;
use crate::control_pipe::ControlPipe;
use crate::descriptor::Descriptors;
use crate::Result;

/// Handle for a control transfer that reached a class. When implementing a class, use the methods
/// of this object to respond to the transfer with data, an acknowledgement or an error (STALL
/// condition). To ignore the request, simply don't call any method; the device then acknowledges
/// requests without a data stage and stalls the rest.
pub struct ControlSetup<'p, 'a, B: UsbBus> {
    pipe: &'p mut ControlPipe<'a, B>,
    req: control::Request,
    descriptors: &'a Descriptors,
    configuration: u8,
}

impl<'p, 'a, B: UsbBus> ControlSetup<'p, 'a, B> {
    pub(crate) fn new(
        pipe: &'p mut ControlPipe<'a, B>,
        req: control::Request,
        descriptors: &'a Descriptors,
        configuration: u8,
    ) -> Self {
        ControlSetup {
            pipe,
            req,
            descriptors,
            configuration,
        }
    }

    /// Gets the request from the SETUP packet.
    pub fn request(&self) -> &control::Request {
        &self.req
    }

    /// Gets the device's descriptor set.
    pub fn descriptors(&self) -> &'a Descriptors {
        self.descriptors
    }

    /// Gets the active configuration value, 0 if the device is not configured.
    pub fn configuration(&self) -> u8 {
        self.configuration
    }

    /// Accepts an IN transfer with the supplied buffer. At most wLength bytes are sent.
    pub fn accept_with(self, data: &[u8]) -> Result<()> {
        self.pipe.send_data(data)
    }

    /// Accepts an IN transfer with the supplied static buffer without copying it. At most wLength
    /// bytes are sent.
    pub fn accept_with_static(self, data: &'static [u8]) -> Result<()> {
        self.pipe.send_borrowed(data)
    }

    /// Accepts an OUT transfer that has a data stage. The data is handed to
    /// [`UsbClass::ep0_rx_ready`](crate::class::UsbClass::ep0_rx_ready) once it has arrived.
    pub fn receive(self) -> Result<()> {
        self.pipe.prepare_rx()
    }

    /// Accepts a transfer without a data stage by sending the status packet.
    pub fn accept(self) -> Result<()> {
        self.pipe.send_status()
    }

    /// Rejects the transfer by stalling the pipe.
    pub fn reject(self) -> Result<()> {
        self.pipe.reject()
    }
}
