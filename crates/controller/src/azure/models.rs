//! Compute API models for scale-set virtual machines.
//!
//! Only the fields this controller edits are typed. Everything else is kept
//! in `extra` so a fetched model can be written back without losing data.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A virtual machine inside a scale set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScaleSetVm {
    /// Resource version, sent back as `If-Match` on update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default)]
    pub properties: ScaleSetVmProperties,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScaleSetVmProperties {
    #[serde(default)]
    pub storage_profile: StorageProfile,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageProfile {
    #[serde(default)]
    pub data_disks: Vec<DataDisk>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A data disk attached to an instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataDisk {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lun: Option<i32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
