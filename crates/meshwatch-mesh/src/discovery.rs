//! Discovery protocol message types
//!
//! Simplified request/response shapes exchanged with proxies. Only the
//! fields the control plane inspects are modeled; wire framing lives with
//! the transport.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// xDS resource types served from registry data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceType {
    Cluster,
    Endpoint,
    Listener,
    Route,
}

impl ResourceType {
    pub fn type_url(&self) -> &'static str {
        match self {
            ResourceType::Cluster => "type.googleapis.com/envoy.config.cluster.v3.Cluster",
            ResourceType::Endpoint => {
                "type.googleapis.com/envoy.config.endpoint.v3.ClusterLoadAssignment"
            }
            ResourceType::Listener => "type.googleapis.com/envoy.config.listener.v3.Listener",
            ResourceType::Route => "type.googleapis.com/envoy.config.route.v3.RouteConfiguration",
        }
    }

    pub fn from_type_url(type_url: &str) -> Option<Self> {
        [
            ResourceType::Cluster,
            ResourceType::Endpoint,
            ResourceType::Listener,
            ResourceType::Route,
        ]
        .into_iter()
        .find(|t| t.type_url() == type_url)
    }
}

/// Identity of the proxy on the other end of a stream
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Unique node identifier
    pub id: String,
    /// Cluster the node belongs to
    pub cluster: String,
    pub metadata: HashMap<String, String>,
}

impl Node {
    pub fn new(id: impl Into<String>, cluster: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            cluster: cluster.into(),
            metadata: HashMap::new(),
        }
    }
}

/// Discovery request (simplified)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryRequest {
    /// Version info from last accepted response (empty on first request)
    pub version_info: String,
    pub node: Option<Node>,
    /// Requested resource names (empty = all)
    pub resource_names: Vec<String>,
    pub type_url: String,
    /// Nonce of the response this request acknowledges
    pub response_nonce: String,
    /// Error detail if this is a NACK
    pub error_detail: Option<String>,
}

impl DiscoveryRequest {
    pub fn new(type_url: impl Into<String>, node: Node) -> Self {
        Self {
            type_url: type_url.into(),
            node: Some(node),
            ..Default::default()
        }
    }

    pub fn with_resource_names(mut self, names: Vec<String>) -> Self {
        self.resource_names = names;
        self
    }

    /// Acknowledge (or reject, with `error_detail`) a previous response
    pub fn acknowledging(mut self, response: &DiscoveryResponse) -> Self {
        self.version_info = response.version_info.clone();
        self.response_nonce = response.nonce.clone();
        self
    }

    pub fn is_nack(&self) -> bool {
        self.error_detail.is_some()
    }
}

/// A named resource in a response, serialized as JSON
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub name: String,
    pub body: String,
}

/// Discovery response (simplified)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryResponse {
    pub version_info: String,
    pub resources: Vec<Resource>,
    pub type_url: String,
    /// Nonce for ACK tracking
    pub nonce: String,
    /// Control plane identifier
    pub control_plane_id: String,
}

/// Identifier of one open discovery stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub u64);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
