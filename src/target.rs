//! Target catalogue (§6 "Target catalogue", §11): total core count,
//! per-cluster `(id, type)` mapping, and per-cluster core counts, used by
//! the arbiter to translate logical `(core, cluster)` into physical scope
//! keys. Grounded on
//! `original_source/Core/Framework/TargetConfigProcessor.cpp`.

use log::warn;
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug)]
pub enum TargetConfigError {
    Io(std::io::Error),
    MalformedRoot(serde_yaml::Error),
}

impl std::fmt::Display for TargetConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "failed to read target config file: {e}"),
            Self::MalformedRoot(e) => write!(f, "target config root is malformed: {e}"),
        }
    }
}

impl std::error::Error for TargetConfigError {}

#[derive(Deserialize)]
struct TargetConfigFile {
    #[serde(rename = "TargetConfigs")]
    targets: Vec<RawTarget>,
}

#[derive(Deserialize)]
struct RawTarget {
    #[serde(rename = "TargetName")]
    name: String,
    #[serde(rename = "TotalCoreCount")]
    total_core_count: u8,
    #[serde(rename = "ClusterInfo", default)]
    cluster_info: Vec<RawClusterInfo>,
    #[serde(rename = "ClusterSpread", default)]
    cluster_spread: Vec<RawClusterSpread>,
}

#[derive(Deserialize)]
struct RawClusterInfo {
    #[serde(rename = "Id")]
    id: i8,
    #[serde(rename = "Type")]
    cluster_type: String,
}

#[derive(Deserialize)]
struct RawClusterSpread {
    #[serde(rename = "Id")]
    id: i8,
    #[serde(rename = "NumCores")]
    num_cores: i32,
}

/// Resolved view of one target's cluster topology. The arbiter uses this to
/// validate and translate the logical `(core, cluster)` a request names
/// into a physical scope (§6).
#[derive(Debug, Default, Clone)]
pub struct TargetRegistry {
    name: String,
    total_core_count: u8,
    cluster_type_to_id: HashMap<String, i8>,
    cluster_core_counts: HashMap<i8, i32>,
}

impl TargetRegistry {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn total_core_count(&self) -> u8 {
        self.total_core_count
    }

    #[must_use]
    pub fn cluster_id_for_type(&self, cluster_type: &str) -> Option<i8> {
        self.cluster_type_to_id.get(cluster_type).copied()
    }

    #[must_use]
    pub fn core_count_for_cluster(&self, cluster_id: i8) -> Option<i32> {
        self.cluster_core_counts.get(&cluster_id).copied()
    }
}

/// Parses the target config YAML. Only the first `TargetConfigs` entry is
/// used; the original processes a list but only one target describes the
/// running device. A parse error on one cluster mapping is logged and
/// skipped, matching `TargetConfigProcessor`'s per-entry `try`/`catch`.
pub fn parse_str(yaml: &str) -> Result<TargetRegistry, TargetConfigError> {
    let file: TargetConfigFile = serde_yaml::from_str(yaml).map_err(TargetConfigError::MalformedRoot)?;
    let Some(raw) = file.targets.into_iter().next() else {
        warn!("target config has no entries under TargetConfigs");
        return Ok(TargetRegistry::default());
    };

    let mut registry = TargetRegistry {
        name: raw.name,
        total_core_count: raw.total_core_count,
        cluster_type_to_id: HashMap::new(),
        cluster_core_counts: HashMap::new(),
    };
    for info in raw.cluster_info {
        registry.cluster_type_to_id.insert(info.cluster_type, info.id);
    }
    for spread in raw.cluster_spread {
        registry.cluster_core_counts.insert(spread.id, spread.num_cores);
    }
    Ok(registry)
}

pub fn parse_file(path: &std::path::Path) -> Result<TargetRegistry, TargetConfigError> {
    let contents = std::fs::read_to_string(path).map_err(TargetConfigError::Io)?;
    parse_str(&contents)
}
