use std::fmt;

use crate::audio::error::{CaptureError, CaptureResult};
use crate::audio::subsystem::AudioSubsystem;
use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Device, Host};
use serde::{Deserialize, Serialize};

/// An input device as presented to the operator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Position in the host's device table
    pub index: usize,
    /// Human-readable device name
    pub name: String,
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.index, self.name)
    }
}

/// List all devices that can capture audio
///
/// # Returns
/// Every device with at least one input configuration, in host order. The
/// index of each entry is its position in the host's full device table, so
/// indices are stable but not necessarily contiguous.
///
/// # Errors
/// Returns `CaptureError::CpalError` if the host cannot enumerate devices.
///
/// # Example
/// ```no_run
/// use micstream_lib::audio::{list_input_devices, AudioSubsystem};
///
/// let devices = list_input_devices(&AudioSubsystem::shared()).unwrap();
/// for device in devices {
///     println!("{}", device);
/// }
/// ```
pub fn list_input_devices(subsystem: &AudioSubsystem) -> CaptureResult<Vec<DeviceDescriptor>> {
    subsystem.with_host(|host| {
        let devices = host.devices()?;

        Ok(devices
            .enumerate()
            .filter(|(_, device)| has_input(device))
            .map(|(index, device)| DeviceDescriptor {
                index,
                name: device.name().unwrap_or_else(|_| "Unknown".to_string()),
            })
            .collect())
    })
}

/// Parse an operator's device selection
///
/// Accepts a bare index (`"3"`) or a rendered descriptor (`"3: USB Mic"`).
/// Anything else, including an empty selection or a placeholder such as
/// `"No Microphone Found"`, selects the platform default device.
pub fn parse_device_selection(selection: &str) -> Option<usize> {
    let index = match selection.split_once(':') {
        Some((index, _)) => index,
        None => selection,
    };

    index.trim().parse().ok()
}

/// Resolve an index (or the default device) to a capture-capable device
///
/// Must be called with the subsystem guard held.
pub(crate) fn find_input_device(host: &Host, device_index: Option<usize>) -> CaptureResult<Device> {
    let device = match device_index {
        Some(index) => host
            .devices()?
            .nth(index)
            .ok_or(CaptureError::InvalidIndex(index))?,
        None => host
            .default_input_device()
            .ok_or(CaptureError::DeviceNotFound)?,
    };

    if !has_input(&device) {
        return Err(match device_index {
            Some(index) => CaptureError::InvalidIndex(index),
            None => CaptureError::DeviceNotFound,
        });
    }

    Ok(device)
}

fn has_input(device: &Device) -> bool {
    device
        .supported_input_configs()
        .map(|mut configs| configs.next().is_some())
        .unwrap_or(false)
}
