//! Merges detected local cameras with persisted network cameras under one
//! stable `io_id` namespace (§4.3).

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::info;

use crate::device::detect::DeviceDetector;
use crate::device::url_normalize::derive_pull_url;
use crate::error::Result;
use crate::model::{Device, DeviceSource};
use crate::store::TaskStore;

pub struct IoManager {
    detector: Box<dyn DeviceDetector>,
    rtsp_pull_port: u16,
    local: RwLock<HashMap<String, Device>>,
    store: std::sync::Arc<TaskStore>,
}

impl IoManager {
    pub fn new(detector: Box<dyn DeviceDetector>, store: std::sync::Arc<TaskStore>, rtsp_pull_port: u16) -> Self {
        let manager = Self {
            detector,
            rtsp_pull_port,
            local: RwLock::new(HashMap::new()),
            store,
        };
        manager.refresh();
        manager
    }

    /// Re-enumerate local cameras. Local `io_id` is the decimal enumeration
    /// index as text; a reconnected camera at the same index gets the same
    /// `io_id`. Network entries are untouched.
    pub fn refresh(&self) {
        let detected = self.detector.detect();
        let mut local = self.local.write();
        local.clear();
        for d in detected {
            let io_id = d.index.to_string();
            local.insert(io_id.clone(), Device::local(io_id, d.name));
        }
        info!(count = local.len(), "Local camera enumeration refreshed");
    }

    /// Register a new network camera, deriving `pull_url` from `url` per
    /// §6's normalization table. Allocates the lowest unused `netN` id.
    pub fn add_network_camera(&self, url: &str, name: Option<&str>) -> Result<Device> {
        let io_id = self.store.get_next_network_camera_id()?;
        let pull_url = derive_pull_url(url, self.rtsp_pull_port);
        let device = Device {
            io_id: io_id.clone(),
            category: "camera".to_string(),
            name: name.unwrap_or(&io_id).to_string(),
            source: DeviceSource::Network,
            url: Some(url.to_string()),
            pull_url: Some(pull_url),
        };
        self.store.save_network_camera(&device)?;
        info!(io_id = %device.io_id, url, "Network camera registered");
        Ok(device)
    }

    pub fn remove_network_camera(&self, io_id: &str) -> Result<bool> {
        self.store.delete_network_camera(io_id)
    }

    /// Look up a device by `io_id`, checking local first then network.
    pub fn get(&self, io_id: &str) -> Option<Device> {
        if let Some(d) = self.local.read().get(io_id).cloned() {
            return Some(d);
        }
        self.store
            .load_network_cameras()
            .ok()
            .and_then(|devices| devices.into_iter().find(|d| d.io_id == io_id))
    }

    /// List all known devices, local first then network. Pass
    /// `skip_refresh = true` to avoid re-enumerating local hardware.
    pub fn list(&self, skip_refresh: bool) -> Vec<Device> {
        if !skip_refresh {
            self.refresh();
        }
        let mut devices: Vec<Device> = self.local.read().values().cloned().collect();
        devices.sort_by(|a, b| a.io_id.cmp(&b.io_id));
        if let Ok(network) = self.store.load_network_cameras() {
            devices.extend(network);
        }
        devices
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::detect::DetectedDevice;

    struct FakeDetector(Vec<DetectedDevice>);
    impl DeviceDetector for FakeDetector {
        fn detect(&self) -> Vec<DetectedDevice> {
            self.0.clone()
        }
    }

    fn manager(devices: Vec<DetectedDevice>) -> IoManager {
        let store = std::sync::Arc::new(TaskStore::open_in_memory().unwrap());
        IoManager::new(Box::new(FakeDetector(devices)), store, 8554)
    }

    #[test]
    fn local_io_id_is_decimal_index() {
        let mgr = manager(vec![DetectedDevice { index: 0, name: "Webcam".into() }]);
        let dev = mgr.get("0").expect("device present");
        assert_eq!(dev.io_id, "0");
        assert_eq!(dev.source, DeviceSource::Local);
    }

    #[test]
    fn network_camera_ids_are_allocated_lowest_first() {
        let mgr = manager(vec![]);
        let first = mgr.add_network_camera("rtmp://cam1:1935/live", None).unwrap();
        assert_eq!(first.io_id, "net0");
        let second = mgr.add_network_camera("rtmp://cam2:1935/live", None).unwrap();
        assert_eq!(second.io_id, "net1");
    }

    #[test]
    fn network_camera_derives_pull_url() {
        let mgr = manager(vec![]);
        let dev = mgr.add_network_camera("srt://cam.local:8890?streamid=publish:live/front", Some("front")).unwrap();
        assert_eq!(dev.pull_url.as_deref(), Some("rtsp://cam.local:8554/live/front"));
    }

    #[test]
    fn refresh_is_idempotent_for_stable_enumeration() {
        let mgr = manager(vec![DetectedDevice { index: 0, name: "Webcam".into() }]);
        let before = mgr.list(true);
        mgr.refresh();
        let after = mgr.list(true);
        assert_eq!(before.len(), after.len());
        assert_eq!(before[0].io_id, after[0].io_id);
    }

    #[test]
    fn disappeared_local_device_drops_from_list() {
        let store = std::sync::Arc::new(TaskStore::open_in_memory().unwrap());
        let mgr = IoManager::new(
            Box::new(FakeDetector(vec![DetectedDevice { index: 0, name: "Webcam".into() }])),
            store,
            8554,
        );
        assert!(mgr.get("0").is_some());

        // Simulate the camera disappearing by refreshing against an
        // empty detector result.
        let empty = FakeDetector(vec![]);
        let detected = empty.detect();
        let mut local = mgr.local.write();
        local.clear();
        for d in detected {
            local.insert(d.index.to_string(), Device::local(d.index.to_string(), d.name));
        }
        drop(local);
        assert!(mgr.get("0").is_none());
    }
}
