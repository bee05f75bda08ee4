//! Answers endpoint discovery requests from the registry snapshot
//!
//! Tracks open streams and hands every lifecycle event to the configured
//! `DiscoveryServerCallbacks`. The transport carrying the messages is not
//! part of this crate.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;
use tracing::warn;

use meshwatch_common::ServiceInstance;

use crate::callbacks::DiscoveryServerCallbacks;
use crate::discovery::{DiscoveryRequest, DiscoveryResponse, Resource, ResourceType, StreamId};
use crate::snapshot::SnapshotSink;

#[derive(Serialize)]
struct EndpointBody<'a> {
    cluster_name: &'a str,
    endpoints: Vec<&'a ServiceInstance>,
}

pub struct DiscoveryResponder {
    control_plane_id: String,
    snapshot: Arc<SnapshotSink>,
    callbacks: Arc<dyn DiscoveryServerCallbacks>,
    streams: DashMap<StreamId, String>,
    next_stream_id: AtomicU64,
    next_nonce: AtomicU64,
}

impl DiscoveryResponder {
    pub fn new(
        control_plane_id: impl Into<String>,
        snapshot: Arc<SnapshotSink>,
        callbacks: Arc<dyn DiscoveryServerCallbacks>,
    ) -> Self {
        Self {
            control_plane_id: control_plane_id.into(),
            snapshot,
            callbacks,
            streams: DashMap::new(),
            next_stream_id: AtomicU64::new(1),
            next_nonce: AtomicU64::new(1),
        }
    }

    pub fn open_stream(&self, type_url: &str) -> StreamId {
        let stream_id = StreamId(self.next_stream_id.fetch_add(1, Ordering::Relaxed));
        self.streams.insert(stream_id, type_url.to_string());
        self.callbacks.on_stream_open(stream_id, type_url);
        stream_id
    }

    /// Close a stream, reporting `error` if it ended abnormally.
    pub fn close_stream(&self, stream_id: StreamId, error: Option<&str>) {
        let Some((_, type_url)) = self.streams.remove(&stream_id) else {
            return;
        };
        match error {
            Some(error) => self
                .callbacks
                .on_stream_close_with_error(stream_id, &type_url, error),
            None => self.callbacks.on_stream_close(stream_id, &type_url),
        }
    }

    pub fn open_streams(&self) -> usize {
        self.streams.len()
    }

    /// Handle one request on an open stream.
    ///
    /// Returns `None` when the request acknowledges the current snapshot
    /// version or asks for a type this responder does not serve.
    pub fn respond(
        &self,
        stream_id: StreamId,
        request: &DiscoveryRequest,
    ) -> Option<DiscoveryResponse> {
        self.callbacks.on_stream_request(stream_id, request);

        if ResourceType::from_type_url(&request.type_url) != Some(ResourceType::Endpoint) {
            warn!(stream_id = %stream_id, type_url = %request.type_url, "Unsupported resource type");
            return None;
        }

        let version = self.snapshot.version().to_string();
        if !request.is_nack() && request.version_info == version {
            return None;
        }

        let names = if request.resource_names.is_empty() {
            self.snapshot.services()
        } else {
            request.resource_names.clone()
        };

        let resources = names
            .iter()
            .filter_map(|name| {
                let service = self.snapshot.get(name)?;
                let body = EndpointBody {
                    cluster_name: name,
                    endpoints: service.instances.iter().filter(|i| i.health.is_healthy()).collect(),
                };
                serde_json::to_string(&body).ok().map(|body| Resource {
                    name: name.clone(),
                    body,
                })
            })
            .collect();

        let response = DiscoveryResponse {
            version_info: version,
            resources,
            type_url: request.type_url.clone(),
            nonce: self.next_nonce.fetch_add(1, Ordering::Relaxed).to_string(),
            control_plane_id: self.control_plane_id.clone(),
        };
        self.callbacks
            .on_stream_response(stream_id, request, &response);
        Some(response)
    }
}
