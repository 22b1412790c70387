pub mod server;

pub use server::{
    parse_server_string, server_url, ChunkSink, ConnectionHandle, ConnectOptions, Protocol,
    ServerDescriptor, ServerError, ServerFactory, ServerSpec, DEFAULT_SSH_PORT,
};

#[cfg(feature = "client")]
pub use server::{HttpServer, HttpServerFactory};
