//! Audio mixer collaborator.
//!
//! Exposes device and per-application session volume/mute as get/set
//! operations. The bundled [`MemoryMixer`] keeps its state in process and is
//! seeded from configuration.

use serde::{Deserialize, Serialize};
use std::sync::{PoisonError, RwLock};
use thiserror::Error;
use tracing::debug;

/// Mixer errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MixerError {
    /// No device at that index.
    #[error("Device not found")]
    DeviceNotFound,

    /// No session at that index on the device.
    #[error("Session not found")]
    SessionNotFound,
}

/// Clamp a volume into `[0, 1]`. NaN becomes 0.
#[must_use]
pub fn clamp_volume(volume: f64) -> f64 {
    if volume.is_nan() {
        0.0
    } else {
        volume.clamp(0.0, 1.0)
    }
}

/// A device as reported to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceInfo {
    /// Position in the device list.
    pub id: usize,
    /// Display name.
    pub name: String,
    /// Device kind, e.g. `render` or `capture`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Volume in `[0, 1]`.
    pub volume: f64,
    /// Mute flag.
    pub mute: bool,
    /// Application sessions on this device.
    pub sessions: Vec<SessionInfo>,
}

/// An application session as reported to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionInfo {
    /// `<device>-<session>`.
    pub id: String,
    /// Application name.
    pub name: String,
    /// Volume in `[0, 1]`.
    pub volume: f64,
    /// Mute flag.
    pub mute: bool,
}

/// Device entry in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSeed {
    /// Display name.
    pub name: String,
    /// Device kind.
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
    /// Initial volume.
    #[serde(default = "default_volume")]
    pub volume: f64,
    /// Initial mute flag.
    #[serde(default)]
    pub mute: bool,
    /// Application sessions.
    #[serde(default)]
    pub sessions: Vec<SessionSeed>,
}

/// Session entry in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSeed {
    /// Application name.
    pub name: String,
    /// Initial volume.
    #[serde(default = "default_volume")]
    pub volume: f64,
    /// Initial mute flag.
    #[serde(default)]
    pub mute: bool,
}

fn default_kind() -> String {
    "render".to_string()
}

fn default_volume() -> f64 {
    1.0
}

/// Volume and mute control over a set of devices.
pub trait Mixer: Send + Sync {
    /// All devices with their sessions.
    fn devices(&self) -> Vec<DeviceInfo>;

    /// Set a device's volume. Returns the clamped value applied.
    fn set_device_volume(&self, device: usize, volume: f64) -> Result<f64, MixerError>;

    /// Set a device's mute flag.
    fn set_device_mute(&self, device: usize, mute: bool) -> Result<bool, MixerError>;

    /// Set a session's volume. Returns the clamped value applied.
    fn set_session_volume(
        &self,
        device: usize,
        session: usize,
        volume: f64,
    ) -> Result<f64, MixerError>;

    /// Set a session's mute flag.
    fn set_session_mute(
        &self,
        device: usize,
        session: usize,
        mute: bool,
    ) -> Result<bool, MixerError>;
}

/// In-process mixer.
#[derive(Debug, Default)]
pub struct MemoryMixer {
    devices: RwLock<Vec<DeviceSeed>>,
}

impl MemoryMixer {
    /// Create a mixer with the given devices. Volumes are clamped.
    #[must_use]
    pub fn new(mut devices: Vec<DeviceSeed>) -> Self {
        for device in &mut devices {
            device.volume = clamp_volume(device.volume);
            for session in &mut device.sessions {
                session.volume = clamp_volume(session.volume);
            }
        }
        Self {
            devices: RwLock::new(devices),
        }
    }

    fn with_device<T>(
        &self,
        device: usize,
        f: impl FnOnce(&mut DeviceSeed) -> Result<T, MixerError>,
    ) -> Result<T, MixerError> {
        let mut devices = self.devices.write().unwrap_or_else(PoisonError::into_inner);
        let entry = devices.get_mut(device).ok_or(MixerError::DeviceNotFound)?;
        f(entry)
    }

    fn with_session<T>(
        &self,
        device: usize,
        session: usize,
        f: impl FnOnce(&mut SessionSeed) -> T,
    ) -> Result<T, MixerError> {
        self.with_device(device, |d| {
            d.sessions
                .get_mut(session)
                .map(f)
                .ok_or(MixerError::SessionNotFound)
        })
    }
}

impl Mixer for MemoryMixer {
    fn devices(&self) -> Vec<DeviceInfo> {
        let devices = self.devices.read().unwrap_or_else(PoisonError::into_inner);
        devices
            .iter()
            .enumerate()
            .map(|(i, d)| DeviceInfo {
                id: i,
                name: d.name.clone(),
                kind: d.kind.clone(),
                volume: d.volume,
                mute: d.mute,
                sessions: d
                    .sessions
                    .iter()
                    .enumerate()
                    .map(|(j, s)| SessionInfo {
                        id: format!("{i}-{j}"),
                        name: s.name.clone(),
                        volume: s.volume,
                        mute: s.mute,
                    })
                    .collect(),
            })
            .collect()
    }

    fn set_device_volume(&self, device: usize, volume: f64) -> Result<f64, MixerError> {
        self.with_device(device, |d| {
            d.volume = clamp_volume(volume);
            debug!(device, volume = d.volume, "Device volume set");
            Ok(d.volume)
        })
    }

    fn set_device_mute(&self, device: usize, mute: bool) -> Result<bool, MixerError> {
        self.with_device(device, |d| {
            d.mute = mute;
            debug!(device, mute, "Device mute set");
            Ok(d.mute)
        })
    }

    fn set_session_volume(
        &self,
        device: usize,
        session: usize,
        volume: f64,
    ) -> Result<f64, MixerError> {
        self.with_session(device, session, |s| {
            s.volume = clamp_volume(volume);
            debug!(device, session, volume = s.volume, "Session volume set");
            s.volume
        })
    }

    fn set_session_mute(
        &self,
        device: usize,
        session: usize,
        mute: bool,
    ) -> Result<bool, MixerError> {
        self.with_session(device, session, |s| {
            s.mute = mute;
            debug!(device, session, mute, "Session mute set");
            s.mute
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mixer() -> MemoryMixer {
        MemoryMixer::new(vec![DeviceSeed {
            name: "Speakers".to_string(),
            kind: "render".to_string(),
            volume: 1.5,
            mute: false,
            sessions: vec![SessionSeed {
                name: "Spotify".to_string(),
                volume: 0.6,
                mute: false,
            }],
        }])
    }

    #[test]
    fn test_clamp_volume() {
        assert_eq!(clamp_volume(-0.2), 0.0);
        assert_eq!(clamp_volume(0.4), 0.4);
        assert_eq!(clamp_volume(3.0), 1.0);
        assert_eq!(clamp_volume(f64::NAN), 0.0);
    }

    #[test]
    fn test_devices_listing() {
        let devices = mixer().devices();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].id, 0);
        assert_eq!(devices[0].volume, 1.0);
        assert_eq!(devices[0].sessions[0].id, "0-0");
    }

    #[test]
    fn test_device_set() {
        let mixer = mixer();
        assert_eq!(mixer.set_device_volume(0, 0.25), Ok(0.25));
        assert_eq!(mixer.set_device_volume(0, -1.0), Ok(0.0));
        assert_eq!(mixer.set_device_mute(0, true), Ok(true));
        assert_eq!(mixer.set_device_volume(3, 0.5), Err(MixerError::DeviceNotFound));

        let device = &mixer.devices()[0];
        assert_eq!(device.volume, 0.0);
        assert!(device.mute);
    }

    #[test]
    fn test_session_set() {
        let mixer = mixer();
        assert_eq!(mixer.set_session_volume(0, 0, 2.0), Ok(1.0));
        assert_eq!(mixer.set_session_mute(0, 0, true), Ok(true));
        assert_eq!(
            mixer.set_session_mute(0, 5, true),
            Err(MixerError::SessionNotFound)
        );
        assert_eq!(
            mixer.set_session_volume(1, 0, 0.5),
            Err(MixerError::DeviceNotFound)
        );
        assert!(mixer.devices()[0].sessions[0].mute);
    }
}
