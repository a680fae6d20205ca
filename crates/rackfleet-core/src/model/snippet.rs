// ── DHCP snippets ──

use rackfleet_api::dhcp::SnippetPayload;
use serde::{Deserialize, Serialize};

use super::ids::{IpRangeId, NodeId, SnippetId, SubnetId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "lowercase")]
pub enum SnippetScope {
    Global,
    Subnet {
        subnet_id: SubnetId,
        #[serde(default)]
        iprange_id: Option<IpRangeId>,
    },
    Node {
        node_id: NodeId,
    },
}

/// Free-form DHCP server configuration fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DhcpSnippet {
    pub id: SnippetId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub value: String,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
    #[serde(flatten)]
    pub scope: SnippetScope,
}

fn enabled_default() -> bool {
    true
}

impl DhcpSnippet {
    pub fn to_payload(&self) -> SnippetPayload {
        SnippetPayload {
            name: self.name.clone(),
            description: self.description.clone(),
            value: self.value.clone(),
        }
    }
}
