use crate::server::descriptor::ServerDescriptor;

use std::sync::Arc;

/// Receives the body of a streamed response, chunk by chunk.
pub type ChunkSink = Box<dyn FnMut(&[u8]) + Send + 'static>;

/// One backend endpoint, local or remote.
///
/// Implementations own their network client and track connectivity. All
/// request methods are fire-and-forget: results are delivered through the
/// connected flag, logs, or the supplied sink, never by blocking the caller.
pub trait ConnectionHandle: Send + Sync + 'static {
    /// Descriptor this handle was created from.
    fn descriptor(&self) -> &ServerDescriptor;

    /// Canonical identity URL.
    fn url(&self) -> String {
        self.descriptor().url()
    }

    fn host(&self) -> &str {
        &self.descriptor().host
    }

    fn port(&self) -> u16 {
        self.descriptor().port
    }

    fn is_local(&self) -> bool;
    fn set_local(&self, local: bool);

    fn connected(&self) -> bool;

    /// Probe the server and mark the handle connected on success.
    fn connect(&self);

    /// Drop the connection and cancel in-flight requests.
    fn close(&self);

    /// Send a POST request, ignoring the outcome.
    fn post(&self, path: &str, body: Option<serde_json::Value>);

    /// Send a GET request with a JSON body and feed the response body to `sink`.
    fn stream(&self, path: &str, body: serde_json::Value, sink: ChunkSink);
}

/// Creates connection handles for descriptors.
///
/// The registry never constructs handles itself so that the transport can
/// be swapped (the HTTP client in production, in-memory handles in tests).
pub trait ServerFactory: Send + Sync + 'static {
    fn create(&self, descriptor: ServerDescriptor) -> Arc<dyn ConnectionHandle>;
}
