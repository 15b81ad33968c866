use crate::bus::UsbBus;
use crate::control_transfer::ControlSetup;
use crate::descriptor::Descriptors;
use crate::endpoint::EndpointAddress;
use crate::Result;

/// A USB class implementation. The device dispatches class-specific requests, interface requests
/// and non-zero endpoint events to exactly one class.
///
/// All methods run in the USB interrupt context and must not block.
pub trait UsbClass<B: UsbBus> {
    /// Called when the host selects configuration `config_value`. Typically opens the class's
    /// endpoints.
    fn init(&mut self, bus: &B, config_value: u8) -> Result<()>;

    /// Called when configuration `config_value` is left, either by selecting another one or by a
    /// bus reset. Typically closes the class's endpoints.
    fn deinit(&mut self, bus: &B, config_value: u8) -> Result<()>;

    /// Called for interface requests, class requests and endpoint feature requests. Respond
    /// through `xfer`, or leave it untouched to let the device apply its default handling.
    fn setup(&mut self, xfer: ControlSetup<'_, '_, B>) {
        let _ = xfer;
    }

    /// Called when the data stage of an IN control transfer has been sent. Only called while the
    /// device is configured.
    fn ep0_tx_sent(&mut self, bus: &B) {
        let _ = bus;
    }

    /// Called when the data stage of an OUT control transfer accepted with
    /// [`ControlSetup::receive`] has arrived. Only called while the device is configured.
    fn ep0_rx_ready(&mut self, bus: &B, data: &[u8]) {
        let _ = (bus, data);
    }

    /// Called when an IN transfer completed on a non-zero endpoint.
    fn data_in(&mut self, bus: &B, ep_addr: EndpointAddress) {
        let _ = (bus, ep_addr);
    }

    /// Called when an OUT packet was received on a non-zero endpoint.
    fn data_out(&mut self, bus: &B, ep_addr: EndpointAddress) {
        let _ = (bus, ep_addr);
    }

    /// Gets a configuration descriptor by its 1-based configuration value.
    fn config_descriptor<'d>(
        &self,
        descriptors: &'d Descriptors,
        config_value: u8,
    ) -> Option<&'d [u8]> {
        descriptors.configuration_descriptor(config_value)
    }

    /// Gets the configuration descriptor for the other speed. Full-speed only devices have none.
    fn other_speed_config_descriptor<'d>(
        &self,
        descriptors: &'d Descriptors,
        config_value: u8,
    ) -> Option<&'d [u8]> {
        let _ = (descriptors, config_value);
        None
    }

    /// Gets a string descriptor by index.
    fn string_descriptor<'d>(&self, descriptors: &'d Descriptors, index: u8) -> Option<&'d [u8]> {
        descriptors.string_descriptor(index)
    }
}
