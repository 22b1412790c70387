//! Client-side orchestration of backend servers: the local server process,
//! the pool of remote servers, their persisted settings and packet capture
//! streaming.

pub mod capture;
pub mod process;
pub mod prompt;
pub mod servers;
pub mod settings;

#[cfg(test)]
mod test_support;

pub use capture::{CaptureNode, CapturePort, CaptureSink, PacketCapture};
pub use prompt::{ConsolePrompt, UserPrompt};
pub use servers::{Servers, ServersEvent};
pub use settings::{LocalServerSettings, SettingsStore};
