//! Device model.
//!
//! A device is the unit of identity: one tracker unit with its
//! protocol-level identifier (IMEI or vendor serial). The registry keeps the
//! identifier-to-id mapping in memory; this file format is the snapshot the
//! out-of-band refresh reads.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: Uuid,
    /// Protocol-level identifier the hardware sends (IMEI, serial).
    pub identifier: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Disabled devices stay in the file but are not resolvable.
    #[serde(default)]
    pub disabled: bool,
}

/// Load the device snapshot from a JSON file.
pub fn load_devices(path: &Path) -> Result<Vec<Device>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read device file {path:?}"))?;
    let devices: Vec<Device> = serde_json::from_str(&contents)
        .with_context(|| format!("failed to parse device file {path:?}"))?;
    Ok(devices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_device_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[
                {{"id": "00000000-0000-0000-0000-000000000001", "identifier": "353816053690143"}},
                {{"id": "00000000-0000-0000-0000-000000000002", "identifier": "123", "name": "phone", "disabled": true}}
            ]"#
        )
        .unwrap();

        let devices = load_devices(file.path()).unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].identifier, "353816053690143");
        assert!(!devices[0].disabled);
        assert!(devices[1].disabled);
    }

    #[test]
    fn rejects_malformed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(load_devices(file.path()).is_err());
    }
}
