//! USB device enumeration for the ADB interface: vendor allow-list plus the
//! `bInterfaceClass=0xff, bInterfaceSubClass=0x42, bInterfaceProtocol=0x01`
//! interface filter with exactly one bulk IN and one bulk OUT endpoint.

use crate::error::AdbError;
use rusb::{
    Device, DeviceHandle, DeviceList, Devices, Direction, GlobalContext, InterfaceDescriptor,
    TransferType, UsbContext,
};
use std::time::Duration;

/// Vendor IDs of the canonical Android-partner list (mirrors the upstream
/// `adb_usb.ini` entries).
pub const ANDROID_VENDOR_IDS: &[u16] = &[
    0x0502, // Acer
    0x0b05, // Asus
    0x413c, // Dell
    0x0489, // Foxconn
    0x04c5, // Fujitsu
    0x091e, // Garmin-Asus
    0x18d1, // Google
    0x0bb4, // HTC
    0x12d1, // Huawei
    0x8087, // Intel
    0x24e3, // K-Touch
    0x2116, // KT Tech
    0x0482, // Kyocera
    0x17ef, // Lenovo
    0x1004, // LG
    0x22b8, // Motorola
    0x0955, // Nvidia
    0x0bb4, // Qualcomm (shared with HTC in practice)
    0x2a45, // Meizu
    0x04e8, // Samsung
    0x04dd, // Sharp
    0x054c, // Sony
    0x0fce, // Sony Ericsson
    0x2340, // Teleepoch
    0x0930, // Toshiba
    0x19d2, // ZTE
    0x1949, // Amazon
    0x2717, // Xiaomi
    0x2d95, // Vivo
    0x2a70, // OnePlus
];

const ADB_CLASS: u8 = 0xff;
const ADB_SUBCLASS: u8 = 0x42;
const ADB_PROTOCOL: u8 = 0x01;

fn classify(err: rusb::Error) -> AdbError {
    if err == rusb::Error::Busy {
        log::error!("usb: device busy");
        AdbError::ProtocolError(
            "device busy, is the Android adb server running? try `adb kill-server`".into(),
        )
    } else if err == rusb::Error::Timeout {
        AdbError::Timeout
    } else {
        log::error!("usb: {err}");
        AdbError::Usb(err)
    }
}

fn is_adb_interface(desc: &InterfaceDescriptor) -> bool {
    (desc.class_code(), desc.sub_class_code(), desc.protocol_code())
        == (ADB_CLASS, ADB_SUBCLASS, ADB_PROTOCOL)
}

pub fn usb_devices() -> Result<UsbDeviceList, AdbError> {
    let context = GlobalContext::default();
    Ok(UsbDeviceList(context.devices().map_err(classify)?))
}

pub struct UsbDeviceList(DeviceList<GlobalContext>);

impl UsbDeviceList {
    pub fn iter(&self) -> UsbDevices<'_> {
        UsbDevices(self.0.iter())
    }
}

pub struct UsbDevices<'a>(Devices<'a, GlobalContext>);

impl<'a> Iterator for UsbDevices<'a> {
    type Item = Result<UsbDevice, AdbError>;

    fn next(&mut self) -> Option<Self::Item> {
        for device in self.0.by_ref() {
            if let Some(res) = UsbDevice::probe(device).transpose() {
                return Some(res);
            }
        }
        None
    }
}

/// A USB device with a claimed ADB interface, ready for bulk I/O.
#[derive(Debug)]
pub struct UsbDevice {
    handle: DeviceHandle<GlobalContext>,
    serial: String,
    iface: u8,
    setting: u8,
    ep_read: u8,
    ep_write: u8,
}

impl UsbDevice {
    /// Inspects `device`; returns `Ok(None)` if it isn't an allow-listed
    /// vendor exposing the ADB interface, `Err` on a USB I/O failure.
    fn probe(device: Device<GlobalContext>) -> Result<Option<Self>, AdbError> {
        let device_desc = device.device_descriptor().map_err(classify)?;
        if !ANDROID_VENDOR_IDS.contains(&device_desc.vendor_id()) {
            return Ok(None);
        }
        let config_desc = match device.active_config_descriptor() {
            Ok(desc) => desc,
            Err(_) => return Ok(None),
        };
        for iface in config_desc.interfaces() {
            for iface_desc in iface.descriptors() {
                if !is_adb_interface(&iface_desc) {
                    continue;
                }
                let endpoints: Vec<_> = iface_desc
                    .endpoint_descriptors()
                    .filter(|ep| ep.transfer_type() == TransferType::Bulk)
                    .collect();
                let ep_read = endpoints
                    .iter()
                    .find(|ep| ep.direction() == Direction::In)
                    .map(|ep| ep.address());
                let ep_write = endpoints
                    .iter()
                    .find(|ep| ep.direction() == Direction::Out)
                    .map(|ep| ep.address());
                let (Some(ep_read), Some(ep_write)) = (ep_read, ep_write) else {
                    continue;
                };
                let handle = device.open().map_err(classify)?;
                let serial = handle
                    .read_serial_number_string_ascii(&device_desc)
                    .unwrap_or_default();
                return Ok(Some(Self {
                    handle,
                    serial,
                    iface: iface_desc.interface_number(),
                    setting: iface_desc.setting_number(),
                    ep_read,
                    ep_write,
                }));
            }
        }
        Ok(None)
    }

    /// Opens the device with the given serial (or the sole device, if
    /// `serial` is `None`) and claims its ADB interface.
    pub fn open(serial: Option<&str>) -> Result<Self, AdbError> {
        let mut candidates: Vec<Self> = usb_devices()?
            .iter()
            .filter_map(|res| res.ok())
            .filter(|dev| serial.is_none_or(|s| dev.serial == s))
            .collect();

        let device = match serial {
            Some(serial) => candidates
                .into_iter()
                .next()
                .ok_or_else(|| AdbError::ProtocolError(format!("device {serial} not found")))?,
            None => {
                if candidates.len() > 1 {
                    return Err(AdbError::ProtocolError(
                        "multiple ADB devices attached; specify a serial".into(),
                    ));
                }
                candidates.pop().ok_or(AdbError::NoDevice)?
            }
        };

        device.handle.detach_kernel_driver(device.iface).ok();
        device.handle.claim_interface(device.iface).map_err(classify)?;
        device
            .handle
            .set_alternate_setting(device.iface, device.setting)
            .map_err(classify)?;
        log::debug!("usb: claimed interface {} on device {:?}", device.iface, device.serial);
        Ok(device)
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn send(&self, buf: &[u8], timeout: Duration) -> Result<usize, AdbError> {
        self.handle.write_bulk(self.ep_write, buf, timeout).map_err(classify)
    }

    pub fn recv(&self, buf: &mut [u8], timeout: Duration) -> Result<usize, AdbError> {
        self.handle.read_bulk(self.ep_read, buf, timeout).map_err(classify)
    }
}
