use super::{io, DeviceLink, HardwareVersion};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rusb::{DeviceHandle, GlobalContext};
use tracing::{debug, info, warn};

/// USB Vendor ID for Brother printers
const VENDOR_ID: u16 = 0x04f9;

const IO_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Copy, Clone, thiserror::Error)]
pub enum Error {
    #[error("An USB error has occurred: {0}")]
    USBError(#[from] rusb::Error),

    #[error("No printer has been found.")]
    NoPrinter,

    #[error("The USB device for the printer offers no interface.")]
    NoInterface,

    #[error("The USB interface for the printer offers no descriptor.")]
    NoInterfaceDescriptor,

    #[error("The USB interface for the printer offers no bulk input endpoint.")]
    NoInEndpoint,

    #[error("The USB interface for the printer offers no bulk output endpoint.")]
    NoOutEndpoint,
}

fn select_device<F>(
    mut f: F,
) -> Result<Option<(HardwareVersion, rusb::Device<GlobalContext>)>, rusb::Error>
where
    F: FnMut(HardwareVersion) -> bool,
{
    Ok(rusb::DeviceList::new()?.iter().find_map(|device| {
        // Obtain the device descriptor.
        // Skip devices where this step fails.
        let device_desc = device.device_descriptor().ok()?;

        // Skip devices that don't match the vendor ID.
        if device_desc.vendor_id() != VENDOR_ID {
            return None;
        }

        // Brother makes plenty of other USB devices. Only P-touch models we know are of interest.
        let product_id = device_desc.product_id();
        let model = HardwareVersion::from_product_id(product_id);

        if model.is_none() {
            debug!(product_id, "skipping unknown Brother device");
        }

        // Evaluate the user-defined predicate.
        model.filter(|&model| f(model)).map(|model| (model, device))
    }))
}

fn select_interface(device: &rusb::Device<GlobalContext>) -> Result<(u8, u8, u8), Error> {
    // Query the interface from the device. There should be exactly one.
    let config_desc = device.active_config_descriptor()?;
    let interface = config_desc.interfaces().next().ok_or(Error::NoInterface)?;

    // That interface should again have exactly one descriptor.
    let interface_desc = interface
        .descriptors()
        .next()
        .ok_or(Error::NoInterfaceDescriptor)?;

    // Walk the endpoints provided by the interface to find input and output.
    // We are only interested in bulk endpoints.
    let (mut in_addr, mut out_addr) = (None, None);

    for endpoint_desc in interface_desc
        .endpoint_descriptors()
        .filter(|desc| desc.transfer_type() == rusb::TransferType::Bulk)
    {
        match endpoint_desc.direction() {
            rusb::Direction::In => in_addr = Some(endpoint_desc.address()),
            rusb::Direction::Out => out_addr = Some(endpoint_desc.address()),
        }
    }

    // Return the interface number and the endpoint addresses if found.
    Ok((
        interface.number(),
        in_addr.ok_or(Error::NoInEndpoint)?,
        out_addr.ok_or(Error::NoOutEndpoint)?,
    ))
}

/// A P-touch printer claimed directly on the USB bus.
///
/// rusb only offers blocking transfers, so every transfer runs on tokio's blocking pool.
pub struct UsbLink {
    handle: Arc<DeviceHandle<GlobalContext>>,
    in_addr: u8,
    out_addr: u8,
}

impl UsbLink {
    /// Try to find and attach a P-touch printer.
    /// If `model_filter` is given, we search for the first printer of this model.
    /// Otherwise, the first printer at all is returned.
    pub fn attach(model_filter: Option<HardwareVersion>) -> Result<Self, Error> {
        // Try to select a device.
        let (model, device) = select_device(|m1| model_filter.map_or(true, |m2| m1 == m2))?
            .ok_or(Error::NoPrinter)?;

        // Try to open the USB device, giving us a handle.
        // Ensure that a potential kernel driver is automatically detached and later reattached.
        let handle = device.open()?;

        if let Err(err) = handle.set_auto_detach_kernel_driver(true) {
            // Not supported on every platform. Claiming may still work.
            warn!(error = %err, "unable to auto-detach the kernel driver");
        }

        // Select the correct interface for the printer and claim it.
        let (interface_number, in_addr, out_addr) = select_interface(&device)?;
        handle.claim_interface(interface_number)?;

        info!(
            model = %model,
            bus = device.bus_number(),
            address = device.address(),
            "attached USB printer"
        );

        Ok(Self {
            handle: Arc::new(handle),
            in_addr,
            out_addr,
        })
    }
}

#[async_trait]
impl DeviceLink for UsbLink {
    async fn write(&mut self, data: &[u8]) -> Result<usize, io::Error> {
        let handle = Arc::clone(&self.handle);
        let out_addr = self.out_addr;
        let data = data.to_vec();

        let written =
            tokio::task::spawn_blocking(move || handle.write_bulk(out_addr, &data, IO_TIMEOUT))
                .await??;

        Ok(written)
    }

    async fn read(&mut self, data: &mut [u8]) -> Result<usize, io::Error> {
        let handle = Arc::clone(&self.handle);
        let in_addr = self.in_addr;
        let mut buf = vec![0u8; data.len()];

        let result = tokio::task::spawn_blocking(move || {
            handle
                .read_bulk(in_addr, &mut buf, IO_TIMEOUT)
                .map(|read| (read, buf))
        })
        .await?;

        match result {
            Ok((read, buf)) => {
                data[..read].copy_from_slice(&buf[..read]);
                Ok(read)
            }

            // Nothing arrived in time.
            // That is the USB flavour of the printer's spurious end-of-stream.
            Err(rusb::Error::Timeout) => Ok(0),

            Err(err) => Err(err.into()),
        }
    }
}
