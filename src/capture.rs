//! Packet capture on node ports.
//!
//! A port on a local node captures straight into the requested file. For a
//! remote node the capture file lives on the remote server, so it is
//! streamed into a local temporary file that the port reads instead.

use netlab_core::ConnectionHandle;

use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A node whose ports can capture packets.
pub trait CaptureNode: Send + Sync + 'static {
    fn id(&self) -> String;
    fn name(&self) -> String;
    /// Server the node runs on.
    fn server(&self) -> Arc<dyn ConnectionHandle>;
    /// Show an error attached to the node `node_id`.
    fn report_error(&self, node_id: &str, message: &str);
    /// The node's capture state changed.
    fn updated(&self);
}

/// A node port that reads a capture file.
pub trait CapturePort {
    /// Stable identifier of the port, unique across nodes.
    fn key(&self) -> String;
    fn name(&self) -> String;
    fn start_packet_capture(&self, path: &Path) -> io::Result<()>;
    fn stop_packet_capture(&self);
}

fn report(node: &dyn CaptureNode, message: &str) {
    let id = node.id();
    log::warn!("{} ({}): {}", node.name(), id, message);
    node.report_error(&id, message);
}

/// Appends streamed capture data to an existing local file until the
/// capture is stopped.
#[derive(Clone)]
pub struct CaptureSink {
    path: PathBuf,
    node: Arc<dyn CaptureNode>,
    active: Arc<AtomicBool>,
}

impl CaptureSink {
    pub fn new(path: PathBuf, node: Arc<dyn CaptureNode>) -> Self {
        Self {
            path,
            node,
            active: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Drop every chunk from now on.
    pub fn cancel(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn write(&self, chunk: &[u8]) {
        if !self.is_active() {
            return;
        }
        // never create: the file is gone once the capture stopped
        let result = std::fs::OpenOptions::new()
            .append(true)
            .open(&self.path)
            .and_then(|mut file| file.write_all(chunk));
        if let Err(e) = result {
            report(
                self.node.as_ref(),
                &format!("could not write packet capture: {}: {}", e, self.path.display()),
            );
        }
    }
}

/// Temporary file of a remote capture and the sink filling it.
struct RemoteCapture {
    file: tempfile::TempPath,
    sink: CaptureSink,
}

/// Starts and stops captures and owns the temporary files of remote ones.
#[derive(Default)]
pub struct PacketCapture {
    capture_files: HashMap<String, RemoteCapture>,
}

impl PacketCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start capturing on `port`. `file_path` is the capture file on the
    /// node's server.
    pub fn start_capture(
        &mut self,
        node: &Arc<dyn CaptureNode>,
        port: &dyn CapturePort,
        file_path: &str,
    ) {
        log::info!(
            "{} has successfully started capturing packets on {}",
            node.name(),
            port.name()
        );

        let server = node.server();
        if server.is_local() {
            if let Err(e) = port.start_packet_capture(Path::new(file_path)) {
                report(
                    node.as_ref(),
                    &format!("could not start the packet capture reader: {}: {}", e, file_path),
                );
            }
        } else if let Err(e) = self.start_remote_capture(node, port, &server, file_path) {
            report(
                node.as_ref(),
                &format!("could not start the packet capture reader: {}", e),
            );
        }
        node.updated();
    }

    fn start_remote_capture(
        &mut self,
        node: &Arc<dyn CaptureNode>,
        port: &dyn CapturePort,
        server: &Arc<dyn ConnectionHandle>,
        file_path: &str,
    ) -> io::Result<()> {
        let temp = tempfile::NamedTempFile::new()?.into_temp_path();
        port.start_packet_capture(&temp)?;

        let sink = CaptureSink::new(temp.to_path_buf(), node.clone());
        let capture = RemoteCapture {
            file: temp,
            sink: sink.clone(),
        };
        if let Some(previous) = self.capture_files.insert(port.key(), capture) {
            log::debug!("Replacing capture file {}", previous.file.display());
            Self::discard(node.as_ref(), previous);
        }

        server.stream(
            "/files/stream",
            serde_json::json!({ "location": file_path }),
            Box::new(move |chunk: &[u8]| sink.write(chunk)),
        );
        Ok(())
    }

    /// Silence the sink, then remove the file it was writing.
    fn discard(node: &dyn CaptureNode, capture: RemoteCapture) {
        capture.sink.cancel();
        let path = capture.file.to_path_buf();
        if let Err(e) = capture.file.close() {
            report(
                node,
                &format!("could not remove packet capture: {}: {}", e, path.display()),
            );
        }
    }

    /// Stop capturing on `port` and remove its temporary file, if any.
    pub fn stop_capture(&mut self, node: &Arc<dyn CaptureNode>, port: &dyn CapturePort) {
        log::info!(
            "{} has successfully stopped capturing packets on {}",
            node.name(),
            port.name()
        );
        port.stop_packet_capture();

        if let Some(capture) = self.capture_files.remove(&port.key()) {
            Self::discard(node.as_ref(), capture);
        }
    }

    /// Local temporary file receiving the capture of a remote port.
    pub fn capture_file(&self, port_key: &str) -> Option<&Path> {
        self.capture_files
            .get(port_key)
            .map(|capture| &*capture.file)
    }
}
