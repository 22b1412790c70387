pub mod address;
pub mod descriptor;
pub mod error;
pub mod handle;
#[cfg(feature = "client")]
pub mod http;

pub use address::{parse_server_string, server_url, ServerSpec};
pub use descriptor::{ConnectOptions, Protocol, ServerDescriptor, DEFAULT_SSH_PORT};
pub use error::ServerError;
pub use handle::{ChunkSink, ConnectionHandle, ServerFactory};
#[cfg(feature = "client")]
pub use http::{HttpServer, HttpServerFactory};
