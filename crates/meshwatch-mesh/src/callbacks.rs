//! Discovery stream lifecycle callbacks

use tracing::debug;

use crate::discovery::{DiscoveryRequest, DiscoveryResponse, StreamId};

/// Hooks invoked by the discovery server over a stream's lifetime.
///
/// All methods default to no-ops so implementations pick what they need.
pub trait DiscoveryServerCallbacks: Send + Sync + 'static {
    fn on_stream_open(&self, _stream_id: StreamId, _type_url: &str) {}

    fn on_stream_close(&self, _stream_id: StreamId, _type_url: &str) {}

    fn on_stream_close_with_error(&self, _stream_id: StreamId, _type_url: &str, _error: &str) {}

    fn on_stream_request(&self, _stream_id: StreamId, _request: &DiscoveryRequest) {}

    fn on_stream_response(
        &self,
        _stream_id: StreamId,
        _request: &DiscoveryRequest,
        _response: &DiscoveryResponse,
    ) {
    }
}

/// Debug-level log of every stream event.
///
/// Requests and responses are summarized unless the matching `log_full_*`
/// flag is set, in which case the whole message is logged.
#[derive(Debug, Clone, Default)]
pub struct LoggingDiscoveryServerCallbacks {
    log_full_request: bool,
    log_full_response: bool,
}

impl LoggingDiscoveryServerCallbacks {
    pub fn new(log_full_request: bool, log_full_response: bool) -> Self {
        Self {
            log_full_request,
            log_full_response,
        }
    }

    pub fn request_data(&self, request: &DiscoveryRequest) -> String {
        if self.log_full_request {
            return format!("{:?}", request);
        }
        let (id, cluster) = request
            .node
            .as_ref()
            .map(|n| (n.id.as_str(), n.cluster.as_str()))
            .unwrap_or_default();
        format!(
            "version: {}, id: {}, cluster: {}, type: {}, responseNonce: {}",
            request.version_info, id, cluster, request.type_url, request.response_nonce
        )
    }

    pub fn response_data(&self, response: &DiscoveryResponse) -> String {
        if self.log_full_response {
            return format!("{:?}", response);
        }
        format!(
            "version: {}, type: {}, responseNonce: {}",
            response.version_info, response.type_url, response.nonce
        )
    }
}

impl DiscoveryServerCallbacks for LoggingDiscoveryServerCallbacks {
    fn on_stream_open(&self, stream_id: StreamId, type_url: &str) {
        debug!(stream_id = %stream_id, type_url, "Discovery stream opened");
    }

    fn on_stream_close(&self, stream_id: StreamId, type_url: &str) {
        debug!(stream_id = %stream_id, type_url, "Discovery stream closed");
    }

    fn on_stream_close_with_error(&self, stream_id: StreamId, type_url: &str, error: &str) {
        debug!(stream_id = %stream_id, type_url, error, "Discovery stream closed with error");
    }

    fn on_stream_request(&self, stream_id: StreamId, request: &DiscoveryRequest) {
        debug!(
            stream_id = %stream_id,
            request = %self.request_data(request),
            "Discovery stream request"
        );
    }

    fn on_stream_response(
        &self,
        stream_id: StreamId,
        request: &DiscoveryRequest,
        response: &DiscoveryResponse,
    ) {
        debug!(
            stream_id = %stream_id,
            request = %self.request_data(request),
            response = %self.response_data(response),
            "Discovery stream response"
        );
    }
}
