//! Output device descriptions and identifier resolution

use serde::{Deserialize, Serialize};
use std::fmt;

/// An output-capable device as reported by the audio layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputDevice {
    pub name: String,
    pub index: usize,
    pub max_output_channels: u16,
    pub default_sample_rate: u32,
}

/// Concrete device reference accepted by the audio layer
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeviceHandle {
    Index(usize),
    Name(String),
    SystemDefault,
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceHandle::Index(i) => write!(f, "#{}", i),
            DeviceHandle::Name(name) => f.write_str(name),
            DeviceHandle::SystemDefault => f.write_str("system default"),
        }
    }
}

/// A user-supplied identifier paired with what it resolved to
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedDevice {
    pub requested: String,
    pub handle: DeviceHandle,
}

impl fmt::Display for ResolvedDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.handle {
            DeviceHandle::Name(name) if *name == self.requested => f.write_str(name),
            handle => write!(f, "{} ({})", self.requested, handle),
        }
    }
}

/// Maps identifiers to device handles against a snapshot of the device list
pub struct DeviceResolver<'a> {
    devices: &'a [OutputDevice],
    preferred_default: &'a str,
}

impl<'a> DeviceResolver<'a> {
    pub fn new(devices: &'a [OutputDevice], preferred_default: &'a str) -> Self {
        Self {
            devices,
            preferred_default,
        }
    }

    /// Resolve one identifier.
    ///
    /// Order: numeric index, exact name, first case-insensitive substring,
    /// system default for the preferred-default name, else the identifier
    /// unchanged so playback reports the missing device.
    pub fn resolve(&self, identifier: &str) -> DeviceHandle {
        let trimmed = identifier.trim();
        if let Ok(index) = trimmed.parse::<usize>() {
            return DeviceHandle::Index(index);
        }

        if let Some(device) = self.devices.iter().find(|d| d.name == identifier) {
            return DeviceHandle::Name(device.name.clone());
        }

        let needle = identifier.to_lowercase();
        if let Some(device) = self
            .devices
            .iter()
            .find(|d| d.name.to_lowercase().contains(&needle))
        {
            return DeviceHandle::Name(device.name.clone());
        }

        if identifier == self.preferred_default {
            return DeviceHandle::SystemDefault;
        }

        DeviceHandle::Name(identifier.to_string())
    }

    pub fn resolve_all(&self, identifiers: &[String]) -> Vec<ResolvedDevice> {
        identifiers
            .iter()
            .map(|requested| ResolvedDevice {
                requested: requested.clone(),
                handle: self.resolve(requested),
            })
            .collect()
    }
}
