use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use thiserror::Error;

use crate::inventory::InstanceRef;

/// Kubelet/attach-detach controller message emitted when a disk is still
/// held by another scale-set instance.
static ATTACH_CONFLICT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r#"(?P<action>[\w.]+) failed for volume "(?P<pvc>.*?)" : "#,
        r"disk\(/subscriptions/(?P<disk_subscription>.*?)/resourceGroups/(?P<disk_resource_group>.*?)",
        r"/providers/Microsoft\.Compute/disks/(?P<disk>.*?)\) ",
        r"already attached to node\(/subscriptions/(?P<node_subscription>.*?)/resourceGroups/(?P<node_resource_group>.*?)",
        r"/providers/Microsoft\.Compute/virtualMachineScaleSets/(?P<vmss>.*?)/virtualMachines/(?P<instance>.*?)\), ",
        r"could not be attached to node\((?P<target_node>.*?)\)",
    ))
    .expect("attach conflict pattern compiles")
});

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("message is not a disk attach conflict: {0:?}")]
    NoMatch(String),
    #[error("field {field} is empty in message: {message:?}")]
    EmptyField {
        field: &'static str,
        message: String,
    },
}

/// Identifiers extracted from an attach-conflict event message.
///
/// The resource group is taken from the disk path; scale set and instance
/// come from the node path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetachConflict {
    pub action: String,
    pub pvc_name: String,
    pub disk_subscription_id: String,
    pub resource_group: String,
    pub disk_name: String,
    pub node_subscription_id: String,
    pub node_resource_group: String,
    pub scale_set_name: String,
    pub instance_id: String,
    pub target_node: String,
}

impl DetachConflict {
    pub fn parse(message: &str) -> Result<Self, ParseError> {
        tracing::debug!(message, "Parsing event message");

        let Some(caps) = ATTACH_CONFLICT.captures(message) else {
            return Err(ParseError::NoMatch(message.to_string()));
        };

        let field = |name: &'static str| caps.name(name).map_or("", |m| m.as_str()).to_string();
        let required = |name: &'static str| {
            let value = field(name);
            if value.is_empty() {
                Err(ParseError::EmptyField {
                    field: name,
                    message: message.to_string(),
                })
            } else {
                Ok(value)
            }
        };

        let conflict = DetachConflict {
            action: field("action"),
            pvc_name: field("pvc"),
            disk_subscription_id: field("disk_subscription"),
            resource_group: required("disk_resource_group")?,
            disk_name: required("disk")?,
            node_subscription_id: field("node_subscription"),
            node_resource_group: field("node_resource_group"),
            scale_set_name: required("vmss")?,
            instance_id: required("instance")?,
            target_node: field("target_node"),
        };

        tracing::info!(
            pvc = %conflict.pvc_name,
            resource_group = %conflict.resource_group,
            disk = %conflict.disk_name,
            scale_set = %conflict.scale_set_name,
            instance = %conflict.instance_id,
            "Found attach conflict"
        );

        Ok(conflict)
    }

    /// The scale-set instance currently holding the disk.
    pub fn instance(&self) -> InstanceRef {
        InstanceRef {
            resource_group: self.resource_group.clone(),
            scale_set_name: self.scale_set_name.clone(),
            instance_id: self.instance_id.clone(),
        }
    }
}
