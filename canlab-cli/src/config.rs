//! Lab configuration loading and parsing

use anyhow::{Context, Result};
use canlab_core::bus::DEFAULT_BITRATE;
use canlab_core::{DescriptorTable, FrameDescriptor, NodeConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Main application configuration (loaded from a TOML file)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub frames: Vec<FrameDescriptor>,
    #[serde(default)]
    pub nodes: Vec<NodeEntry>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BusConfig {
    #[serde(default = "default_bitrate")]
    pub bitrate: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            bitrate: default_bitrate(),
        }
    }
}

fn default_bitrate() -> u64 {
    DEFAULT_BITRATE
}

/// A named node with its error-state settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NodeEntry {
    pub name: String,
    /// Id used when broadcasting the counter as a status frame
    pub status_frame_id: Option<u32>,
    #[serde(flatten)]
    pub config: NodeConfig,
}

impl AppConfig {
    /// Build and validate the descriptor table from the configured frames
    pub fn descriptor_table(&self) -> Result<DescriptorTable> {
        DescriptorTable::from_frames(self.frames.iter().cloned())
            .context("Invalid frame definitions in configuration")
    }

    /// Look up a node by name
    pub fn node(&self, name: &str) -> Option<&NodeEntry> {
        self.nodes.iter().find(|n| n.name == name)
    }
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    // Surface layout mistakes at load time rather than on first use
    config
        .descriptor_table()
        .with_context(|| format!("Invalid config file: {:?}", path))?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use canlab_core::{ByteOrder, NodeRole};
    use std::io::Write;
    use std::time::Duration;

    const LAB_CONFIG: &str = r#"
        [bus]
        bitrate = 250000

        [[frames]]
        id = 0x123
        name = "EngineData"

        [[frames.signals]]
        name = "EngineSpeed"
        start_bit = 24
        bit_length = 16
        byte_order = "little_endian"
        factor = 0.125
        offset = 0.0
        unit = "rpm"

        [[frames]]
        id = 0x301
        name = "TecStatus"
        length = 2

        [[frames.signals]]
        name = "TEC"
        start_bit = 0
        bit_length = 16
        byte_order = "big_endian"
        factor = 1.0
        offset = 0.0
        unit = ""

        [[nodes]]
        name = "ecu_a"
        role = "transmitter"
        status_frame_id = 0x301

        [[nodes]]
        name = "ecu_b"
        role = "receiver"
        recovery_delay_ms = 500
    "#;

    #[test]
    fn test_config_deserialization() {
        let config: AppConfig = toml::from_str(LAB_CONFIG).unwrap();
        assert_eq!(config.bus.bitrate, 250_000);
        assert_eq!(config.frames.len(), 2);
        assert_eq!(config.frames[0].length, 8);
        assert_eq!(config.frames[1].signals[0].layout.byte_order, ByteOrder::BigEndian);

        let ecu_a = config.node("ecu_a").unwrap();
        assert_eq!(ecu_a.config.role, NodeRole::Transmitter);
        assert_eq!(ecu_a.status_frame_id, Some(0x301));
        assert_eq!(ecu_a.config.increment(), 8);

        let ecu_b = config.node("ecu_b").unwrap();
        assert_eq!(ecu_b.config.recovery_delay(), Duration::from_millis(500));
        assert_eq!(ecu_b.config.warning_threshold, 128);
        assert!(config.node("ecu_c").is_none());
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.bus.bitrate, DEFAULT_BITRATE);
        assert!(config.frames.is_empty());
        assert_eq!(config.descriptor_table().unwrap().stats().num_frames, 0);
    }

    #[test]
    fn test_signal_fields_are_mandatory() {
        let missing_factor = r#"
            [[frames]]
            id = 0x100
            name = "Broken"

            [[frames.signals]]
            name = "Temp"
            start_bit = 0
            bit_length = 8
            byte_order = "little_endian"
            offset = 0.0
            unit = "C"
        "#;
        assert!(toml::from_str::<AppConfig>(missing_factor).is_err());
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(LAB_CONFIG.as_bytes()).unwrap();

        let config = load_config(file.path()).unwrap();
        let table = config.descriptor_table().unwrap();
        assert_eq!(table.frame_ids(), vec![0x123, 0x301]);
    }

    #[test]
    fn test_load_config_rejects_overlap() {
        let overlapping = r#"
            [[frames]]
            id = 0x100
            name = "Clash"

            [[frames.signals]]
            name = "A"
            start_bit = 0
            bit_length = 12
            byte_order = "little_endian"
            factor = 1.0
            offset = 0.0
            unit = ""

            [[frames.signals]]
            name = "B"
            start_bit = 8
            bit_length = 8
            byte_order = "little_endian"
            factor = 1.0
            offset = 0.0
            unit = ""
        "#;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(overlapping.as_bytes()).unwrap();

        let err = load_config(file.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("overlap"), "{:#}", err);
    }

    #[test]
    fn test_load_config_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(&dir.path().join("absent.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
