//! In-memory device registry.
//!
//! One lookup per identification attempt, which for stateless protocols
//! means one per frame, so the map is read-mostly and lock-free on the read
//! path. Administrative writes (registration, removal, snapshot refresh) are
//! rare and go through the same map. The refresh task keeps the cache
//! current from the device file without ever blocking a decode call.

use anyhow::Result;
use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::devices::load_devices;

#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: DashMap<String, Uuid>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a protocol-level identifier to an internal device id.
    pub fn resolve(&self, identifier: &str) -> Option<Uuid> {
        self.devices.get(identifier).map(|entry| *entry.value())
    }

    pub fn insert(&self, identifier: impl Into<String>, device_id: Uuid) {
        self.devices.insert(identifier.into(), device_id);
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Replace the whole mapping with a fresh snapshot. Readers racing the
    /// swap see either the old or the new entry for any key, never a torn
    /// mapping.
    pub fn replace_all(&self, entries: impl IntoIterator<Item = (String, Uuid)>) {
        let fresh: Vec<(String, Uuid)> = entries.into_iter().collect();
        self.devices
            .retain(|identifier, _| fresh.iter().any(|(fresh_id, _)| fresh_id == identifier));
        for (identifier, device_id) in fresh {
            self.devices.insert(identifier, device_id);
        }
    }

    /// Load the device file and swap it in. Disabled devices are dropped
    /// from the mapping so identification fails for them.
    pub fn reload_from_file(&self, path: &std::path::Path) -> Result<usize> {
        let devices = load_devices(path)?;
        let count = devices.len();
        self.replace_all(
            devices
                .into_iter()
                .filter(|device| !device.disabled)
                .map(|device| (device.identifier, device.id)),
        );
        metrics::gauge!("registry.devices").set(self.devices.len() as f64);
        Ok(count)
    }
}

/// Periodically re-read the device file so registry lookups stay current
/// without touching storage on the decode path. A failed reload keeps
/// serving the previous snapshot.
pub async fn refresh_task(registry: Arc<DeviceRegistry>, path: PathBuf, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        match registry.reload_from_file(&path) {
            Ok(count) => {
                debug!(devices = count, "device registry refreshed");
            }
            Err(e) => {
                warn!(error = %e, "device registry refresh failed, keeping previous snapshot");
                metrics::counter!("registry.refresh.failed").increment(1);
            }
        }
    }
}

/// One-time startup load. Missing file is tolerated so the service can come
/// up before the first device is provisioned.
pub fn initial_load(registry: &DeviceRegistry, path: &std::path::Path) {
    match registry.reload_from_file(path) {
        Ok(count) => info!(devices = count, path = %path.display(), "device registry loaded"),
        Err(e) => warn!(error = %e, "device registry not loaded, starting empty"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_known_and_unknown() {
        let registry = DeviceRegistry::new();
        let id = Uuid::new_v4();
        registry.insert("353816053690143", id);

        assert_eq!(registry.resolve("353816053690143"), Some(id));
        assert_eq!(registry.resolve("000000000000000"), None);
    }

    #[test]
    fn replace_all_swaps_snapshot() {
        let registry = DeviceRegistry::new();
        let old = Uuid::new_v4();
        let kept = Uuid::new_v4();
        let added = Uuid::new_v4();
        registry.insert("gone", old);
        registry.insert("kept", old);

        registry.replace_all(vec![("kept".to_string(), kept), ("added".to_string(), added)]);

        assert_eq!(registry.resolve("gone"), None);
        assert_eq!(registry.resolve("kept"), Some(kept));
        assert_eq!(registry.resolve("added"), Some(added));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn reload_skips_disabled_devices() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[
                {{"id": "00000000-0000-0000-0000-000000000001", "identifier": "on"}},
                {{"id": "00000000-0000-0000-0000-000000000002", "identifier": "off", "disabled": true}}
            ]"#
        )
        .unwrap();

        let registry = DeviceRegistry::new();
        let count = registry.reload_from_file(file.path()).unwrap();
        assert_eq!(count, 2);
        assert!(registry.resolve("on").is_some());
        assert!(registry.resolve("off").is_none());
    }
}
