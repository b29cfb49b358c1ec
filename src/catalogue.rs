//! YAML resource catalogue parser (§6 "Catalogue file format", §11).
//!
//! Grounded on `original_source/Core/Framework/ResourceProcessor.cpp`:
//! one malformed entry is logged and dropped, never aborting the whole
//! parse; only a malformed root is fatal. The `Name` field doubles as the
//! resource's sysfs node path, mirroring `readFromNode` reading the default
//! value from the path stored in that same field.

use crate::registry::{ApplyType, DescriptorBuilder, ModeSet, Permission, Policy, ResourceDescriptor};
use crate::resource_id::ResourceId;
use log::warn;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug)]
pub enum CatalogueError {
    Io(std::io::Error),
    MalformedRoot(serde_yaml::Error),
}

impl std::fmt::Display for CatalogueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "failed to read catalogue file: {e}"),
            Self::MalformedRoot(e) => write!(f, "catalogue root is malformed: {e}"),
        }
    }
}

impl std::error::Error for CatalogueError {}

#[derive(Deserialize)]
struct CatalogueFile {
    #[serde(rename = "Resources")]
    resources: Vec<RawResourceEntry>,
}

#[derive(Deserialize)]
struct RawResourceEntry {
    #[serde(rename = "ResType", default)]
    res_type: Option<String>,
    #[serde(rename = "ResID", default)]
    res_id: Option<String>,
    #[serde(rename = "Supported", default)]
    supported: bool,
    #[serde(rename = "Name", default)]
    name: String,
    #[serde(rename = "HighThreshold", default)]
    high_threshold: Option<i32>,
    #[serde(rename = "LowThreshold", default)]
    low_threshold: Option<i32>,
    #[serde(rename = "Permissions", default)]
    permissions: String,
    #[serde(rename = "Modes", default)]
    modes: Vec<String>,
    #[serde(rename = "Policy", default)]
    policy: String,
    #[serde(rename = "CoreLevelConflict", default)]
    core_level_conflict: bool,
    #[serde(rename = "ApplyType", default)]
    apply_type: String,
}

/// Parses an already-loaded YAML document into descriptors. A malformed
/// entry (invalid/missing `ResType`, `ResID`, `HighThreshold` or
/// `LowThreshold`) is skipped with a warning; the rest of the catalogue
/// still loads (§6, §7 `MalformedCatalogue`).
#[must_use]
pub fn parse_str(yaml: &str) -> Result<Vec<ResourceDescriptor>, CatalogueError> {
    let file: CatalogueFile = serde_yaml::from_str(yaml).map_err(CatalogueError::MalformedRoot)?;
    Ok(file
        .resources
        .into_iter()
        .enumerate()
        .filter_map(|(index, raw)| match build_descriptor(raw) {
            Ok(descriptor) => Some(descriptor),
            Err(reason) => {
                warn!("catalogue entry {index} is malformed, dropping: {reason}");
                None
            }
        })
        .collect())
}

pub fn parse_file(path: &std::path::Path) -> Result<Vec<ResourceDescriptor>, CatalogueError> {
    let contents = std::fs::read_to_string(path).map_err(CatalogueError::Io)?;
    parse_str(&contents)
}

fn parse_numeric(s: &str) -> Option<u32> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).ok()
    } else {
        s.parse::<u32>().ok()
    }
}

fn build_descriptor(raw: RawResourceEntry) -> Result<ResourceDescriptor, String> {
    let optype = raw
        .res_type
        .as_deref()
        .and_then(parse_numeric)
        .and_then(|v| u8::try_from(v).ok())
        .ok_or("ResType missing or not a valid optype")?;
    let opcode = raw
        .res_id
        .as_deref()
        .and_then(parse_numeric)
        .and_then(|v| u16::try_from(v).ok())
        .ok_or("ResID missing or not a valid opcode")?;
    let high_threshold = raw.high_threshold.ok_or("HighThreshold missing")?;
    let low_threshold = raw.low_threshold.ok_or("LowThreshold missing")?;
    let permission = Permission::from_name(&raw.permissions)
        .ok_or_else(|| format!("unrecognized Permissions value {:?}", raw.permissions))?;
    let policy = Policy::from_name(&raw.policy)
        .ok_or_else(|| format!("unrecognized Policy value {:?}", raw.policy))?;
    let apply_type = ApplyType::from_name(&raw.apply_type)
        .ok_or_else(|| format!("unrecognized ApplyType value {:?}", raw.apply_type))?;
    let modes = if raw.modes.is_empty() {
        ModeSet::default()
    } else {
        raw.modes.iter().try_fold(ModeSet::empty(), |acc, name| {
            ModeSet::from_name(name)
                .map(|m| acc.union(m))
                .ok_or_else(|| format!("unrecognized Modes entry {name:?}"))
        })?
    };

    let sysfs_node = if raw.name.is_empty() {
        None
    } else {
        Some(PathBuf::from(&raw.name))
    };

    Ok(DescriptorBuilder {
        id: ResourceId::new(optype, opcode, false),
        name: raw.name,
        sysfs_node,
        supported: raw.supported,
        default_value: 0,
        high_threshold,
        low_threshold,
        permission,
        modes,
        policy,
        apply_type,
        core_level_conflict: raw.core_level_conflict,
    }
    .build())
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID_YAML: &str = r#"
Resources:
  - ResType: "0"
    ResID: "1"
    Supported: true
    Name: "/sys/class/test/node"
    HighThreshold: 1024
    LowThreshold: 0
    Permissions: "ThirdParty"
    Modes: ["DisplayOn"]
    Policy: "HigherBetter"
    ApplyType: "Global"
"#;

    #[test]
    fn parses_a_well_formed_entry() {
        let descriptors = parse_str(VALID_YAML).unwrap();
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].id, ResourceId::new(0, 1, false));
        assert!(descriptors[0].supported);
        assert_eq!(descriptors[0].high_threshold, 1024);
    }

    #[test]
    fn missing_threshold_drops_entry_not_whole_catalogue() {
        let yaml = r#"
Resources:
  - ResType: "0"
    ResID: "2"
    Supported: true
    Name: "bad"
    LowThreshold: 0
    Permissions: "ThirdParty"
  - ResType: "0"
    ResID: "3"
    Supported: true
    Name: "good"
    HighThreshold: 10
    LowThreshold: 0
    Permissions: "ThirdParty"
"#;
        let descriptors = parse_str(yaml).unwrap();
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].id, ResourceId::new(0, 3, false));
    }

    #[test]
    fn missing_fields_take_documented_defaults() {
        let yaml = r#"
Resources:
  - ResType: "0"
    ResID: "4"
    HighThreshold: 5
    LowThreshold: 0
"#;
        let descriptors = parse_str(yaml).unwrap();
        assert_eq!(descriptors.len(), 1);
        let d = &descriptors[0];
        assert!(!d.supported);
        assert_eq!(d.permission, Permission::ThirdParty);
        assert_eq!(d.policy, Policy::HigherBetter);
        assert_eq!(d.apply_type, ApplyType::Global);
        assert!(d.modes.contains(ModeSet::DISPLAY_ON));
    }

    #[test]
    fn malformed_root_is_fatal() {
        assert!(parse_str("not: [valid, yaml for this schema").is_err());
    }
}
