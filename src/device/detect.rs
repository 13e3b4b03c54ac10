//! Platform-specific camera enumeration. No side effects; must not block
//! longer than a couple of seconds; returns an empty list plus a
//! last-error string on failure rather than propagating an error, per §4.2.

use std::time::Duration;

use tracing::warn;

/// One detected capture device: its enumeration index and a display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedDevice {
    pub index: u32,
    pub name: String,
}

pub trait DeviceDetector: Send + Sync {
    /// Detect all currently connected cameras, ordered by enumeration index.
    fn detect(&self) -> Vec<DetectedDevice>;

    fn last_error(&self) -> Option<String> {
        None
    }
}

/// Linux backend: lists `/dev/video*`, matching the V4L2 convention used
/// by the original source's device detection tooling.
#[cfg(target_os = "linux")]
pub struct V4l2DeviceDetector;

#[cfg(target_os = "linux")]
impl Default for V4l2DeviceDetector {
    fn default() -> Self {
        Self
    }
}

#[cfg(target_os = "linux")]
impl DeviceDetector for V4l2DeviceDetector {
    fn detect(&self) -> Vec<DetectedDevice> {
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        let mut devices = Vec::new();
        let Ok(entries) = std::fs::read_dir("/dev") else {
            warn!("Could not read /dev to enumerate cameras");
            return devices;
        };

        let mut paths: Vec<String> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|name| name.starts_with("video"))
            .collect();
        paths.sort();

        for name in paths {
            if std::time::Instant::now() > deadline {
                warn!("Camera enumeration exceeded its time budget, returning partial list");
                break;
            }
            if let Some(idx) = name.strip_prefix("video").and_then(|n| n.parse::<u32>().ok()) {
                devices.push(DetectedDevice { index: idx, name: format!("Camera ({})", name) });
            }
        }
        devices
    }
}

/// Non-Linux fallback: returns an empty list, as §4.2 specifies for
/// platforms without a working backend.
#[cfg(not(target_os = "linux"))]
pub struct UnsupportedDeviceDetector;

#[cfg(not(target_os = "linux"))]
impl Default for UnsupportedDeviceDetector {
    fn default() -> Self {
        Self
    }
}

#[cfg(not(target_os = "linux"))]
impl DeviceDetector for UnsupportedDeviceDetector {
    fn detect(&self) -> Vec<DetectedDevice> {
        Vec::new()
    }

    fn last_error(&self) -> Option<String> {
        Some("camera detection is not implemented on this platform".to_string())
    }
}

/// Construct the detector appropriate for the current platform.
pub fn platform_detector() -> Box<dyn DeviceDetector> {
    #[cfg(target_os = "linux")]
    {
        Box::new(V4l2DeviceDetector)
    }
    #[cfg(not(target_os = "linux"))]
    {
        Box::new(UnsupportedDeviceDetector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeDetector(Vec<DetectedDevice>);
    impl DeviceDetector for FakeDetector {
        fn detect(&self) -> Vec<DetectedDevice> {
            self.0.clone()
        }
    }

    #[test]
    fn fake_detector_returns_configured_devices() {
        let detector = FakeDetector(vec![DetectedDevice { index: 0, name: "Camera (video0)".into() }]);
        let devices = detector.detect();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].index, 0);
    }
}
