//! In-memory connection handles and scripted prompts for unit tests.

use crate::prompt::UserPrompt;
use netlab_core::{ChunkSink, ConnectionHandle, ServerDescriptor, ServerFactory};

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

pub struct MockServer {
    descriptor: ServerDescriptor,
    local: AtomicBool,
    connected: AtomicBool,
    close_calls: AtomicUsize,
    posts: Mutex<Vec<(String, Option<serde_json::Value>)>>,
    streams: Mutex<Vec<(String, serde_json::Value)>>,
    sinks: Mutex<Vec<ChunkSink>>,
}

impl MockServer {
    pub fn new(descriptor: ServerDescriptor) -> Self {
        Self {
            descriptor,
            local: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            close_calls: AtomicUsize::new(0),
            posts: Mutex::new(Vec::new()),
            streams: Mutex::new(Vec::new()),
            sinks: Mutex::new(Vec::new()),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn posts(&self) -> Vec<(String, Option<serde_json::Value>)> {
        self.posts.lock().clone()
    }

    pub fn streams(&self) -> Vec<(String, serde_json::Value)> {
        self.streams.lock().clone()
    }

    /// Deliver a chunk to every open stream.
    pub fn feed(&self, chunk: &[u8]) {
        for sink in self.sinks.lock().iter_mut() {
            sink(chunk);
        }
    }
}

impl ConnectionHandle for MockServer {
    fn descriptor(&self) -> &ServerDescriptor {
        &self.descriptor
    }

    fn is_local(&self) -> bool {
        self.local.load(Ordering::SeqCst)
    }

    fn set_local(&self, local: bool) {
        self.local.store(local, Ordering::SeqCst);
    }

    fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn connect(&self) {
        self.connected.store(true, Ordering::SeqCst);
    }

    fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
    }

    fn post(&self, path: &str, body: Option<serde_json::Value>) {
        self.posts.lock().push((path.to_string(), body));
    }

    fn stream(&self, path: &str, body: serde_json::Value, sink: ChunkSink) {
        self.streams.lock().push((path.to_string(), body));
        self.sinks.lock().push(sink);
    }
}

/// Records every handle it creates.
#[derive(Default)]
pub struct MockFactory {
    created: Mutex<Vec<Arc<MockServer>>>,
}

impl MockFactory {
    pub fn created(&self) -> Vec<Arc<MockServer>> {
        self.created.lock().clone()
    }

    pub fn find(&self, url: &str) -> Option<Arc<MockServer>> {
        self.created
            .lock()
            .iter()
            .rev()
            .find(|server| server.url() == url)
            .cloned()
    }
}

impl ServerFactory for MockFactory {
    fn create(&self, descriptor: ServerDescriptor) -> Arc<dyn ConnectionHandle> {
        let server = Arc::new(MockServer::new(descriptor));
        self.created.lock().push(server.clone());
        server
    }
}

/// Answers every question the same way and records what was asked.
pub struct ScriptedPrompt {
    answer: bool,
    questions: Mutex<Vec<String>>,
    criticals: Mutex<Vec<String>>,
}

impl ScriptedPrompt {
    pub fn answering(answer: bool) -> Self {
        Self {
            answer,
            questions: Mutex::new(Vec::new()),
            criticals: Mutex::new(Vec::new()),
        }
    }

    pub fn questions(&self) -> Vec<String> {
        self.questions.lock().clone()
    }

    pub fn criticals(&self) -> Vec<String> {
        self.criticals.lock().clone()
    }
}

impl UserPrompt for ScriptedPrompt {
    fn critical(&self, _title: &str, message: &str) {
        self.criticals.lock().push(message.to_string());
    }

    fn question(&self, _title: &str, message: &str) -> bool {
        self.questions.lock().push(message.to_string());
        self.answer
    }
}
