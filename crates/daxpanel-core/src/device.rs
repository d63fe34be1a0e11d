//! Local audio device enumeration.

use crate::error::Result;
use crate::types::{DeviceRef, StreamDirection};

/// A local audio device as reported by an [`AudioDeviceDirectory`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioDevice {
    pub id: DeviceRef,
    pub name: String,
    pub is_input: bool,
    pub is_output: bool,
}

impl AudioDevice {
    pub fn output(id: impl Into<String>, name: impl Into<String>) -> Self {
        AudioDevice {
            id: DeviceRef::new(id),
            name: name.into(),
            is_input: false,
            is_output: true,
        }
    }

    pub fn input(id: impl Into<String>, name: impl Into<String>) -> Self {
        AudioDevice {
            id: DeviceRef::new(id),
            name: name.into(),
            is_input: true,
            is_output: false,
        }
    }

    /// Whether this device can serve a channel with the given direction.
    ///
    /// Inbound streams play on output devices; outbound streams capture from
    /// input devices.
    pub fn supports(&self, direction: StreamDirection) -> bool {
        match direction {
            StreamDirection::Inbound => self.is_output,
            StreamDirection::Outbound => self.is_input,
        }
    }
}

/// Read-only view of the local audio devices.
pub trait AudioDeviceDirectory: Send + Sync {
    fn list(&self) -> Result<Vec<AudioDevice>>;

    /// Find a device by id.
    fn find(&self, id: &DeviceRef) -> Result<Option<AudioDevice>> {
        Ok(self.list()?.into_iter().find(|d| &d.id == id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Vec<AudioDevice>);

    impl AudioDeviceDirectory for Fixed {
        fn list(&self) -> Result<Vec<AudioDevice>> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn supports_direction() {
        let out = AudioDevice::output("spk", "Speakers");
        let mic = AudioDevice::input("mic", "Headset Mic");
        assert!(out.supports(StreamDirection::Inbound));
        assert!(!out.supports(StreamDirection::Outbound));
        assert!(mic.supports(StreamDirection::Outbound));
        assert!(!mic.supports(StreamDirection::Inbound));
    }

    #[test]
    fn find_by_id() {
        let dir = Fixed(vec![
            AudioDevice::output("spk", "Speakers"),
            AudioDevice::input("mic", "Headset Mic"),
        ]);
        let found = dir.find(&DeviceRef::new("mic")).unwrap().unwrap();
        assert_eq!(found.name, "Headset Mic");
        assert!(dir.find(&DeviceRef::new("nope")).unwrap().is_none());
    }
}
