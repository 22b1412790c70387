use crate::server::descriptor::{Protocol, ServerDescriptor};
use crate::server::handle::{ChunkSink, ConnectionHandle, ServerFactory};

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Timeout applied to the connectivity probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection handle speaking HTTP to a backend server.
pub struct HttpServer {
    descriptor: ServerDescriptor,
    runtime: tokio::runtime::Handle,
    client: reqwest::Client,
    local: AtomicBool,
    connected: Arc<AtomicBool>,
    /// Abort handles of in-flight requests, cancelled on close
    tasks: Mutex<Vec<tokio::task::AbortHandle>>,
}

impl HttpServer {
    pub fn new(
        descriptor: ServerDescriptor,
        runtime: tokio::runtime::Handle,
        client: reqwest::Client,
    ) -> Self {
        Self {
            descriptor,
            runtime,
            client,
            local: AtomicBool::new(false),
            connected: Arc::new(AtomicBool::new(false)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Base URL used for requests (the identity URL may differ for ssh).
    pub fn base_url(&self) -> String {
        let scheme = match self.descriptor.protocol {
            Protocol::Https => "https",
            Protocol::Http | Protocol::Ssh => "http",
        };
        let host = if self.descriptor.host.contains(':') {
            format!("[{}]", self.descriptor.host)
        } else {
            self.descriptor.host.clone()
        };
        format!("{}://{}:{}", scheme, host, self.descriptor.port)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.base_url(), path));
        match &self.descriptor.user {
            Some(user) => builder.basic_auth(user, self.descriptor.password.as_ref()),
            None => builder,
        }
    }

    fn track(&self, task: tokio::task::JoinHandle<()>) {
        let mut tasks = self.tasks.lock();
        tasks.retain(|t| !t.is_finished());
        tasks.push(task.abort_handle());
    }

    fn supports_http(&self) -> bool {
        if self.descriptor.protocol == Protocol::Ssh {
            log::warn!(
                "No ssh transport available for {}, request skipped",
                self.url()
            );
            return false;
        }
        true
    }
}

impl ConnectionHandle for HttpServer {
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
        if !self.supports_http() {
            return;
        }
        let request = self
            .request(reqwest::Method::GET, "/version")
            .timeout(PROBE_TIMEOUT);
        let connected = self.connected.clone();
        let url = self.url();

        let task = self.runtime.spawn(async move {
            match request.send().await {
                Ok(resp) if resp.status().is_success() => {
                    log::info!("Connected to server {}", url);
                    connected.store(true, Ordering::SeqCst);
                }
                Ok(resp) => {
                    log::warn!("Server {} answered HTTP {}", url, resp.status());
                }
                Err(e) => {
                    log::warn!("Cannot reach server {}: {}", url, e);
                }
            }
        });
        self.track(task);
    }

    fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        log::debug!("Connection to {} closed", self.url());
    }

    fn post(&self, path: &str, body: Option<serde_json::Value>) {
        if !self.supports_http() {
            return;
        }
        let mut request = self.request(reqwest::Method::POST, path);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let target = format!("{}{}", self.url(), path);

        let task = self.runtime.spawn(async move {
            match request.send().await {
                Ok(resp) if resp.status().is_success() => {}
                Ok(resp) => log::debug!("POST {} returned HTTP {}", target, resp.status()),
                Err(e) => log::debug!("POST {} failed: {}", target, e),
            }
        });
        self.track(task);
    }

    fn stream(&self, path: &str, body: serde_json::Value, mut sink: ChunkSink) {
        if !self.supports_http() {
            return;
        }
        let request = self.request(reqwest::Method::GET, path).json(&body);
        let target = format!("{}{}", self.url(), path);

        let task = self.runtime.spawn(async move {
            let mut resp = match request.send().await {
                Ok(resp) if resp.status().is_success() => resp,
                Ok(resp) => {
                    log::warn!("Stream {} returned HTTP {}", target, resp.status());
                    return;
                }
                Err(e) => {
                    log::warn!("Stream {} failed: {}", target, e);
                    return;
                }
            };
            loop {
                match resp.chunk().await {
                    Ok(Some(chunk)) => sink(chunk.as_ref()),
                    Ok(None) => break,
                    Err(e) => {
                        log::warn!("Stream {} interrupted: {}", target, e);
                        break;
                    }
                }
            }
        });
        self.track(task);
    }
}

/// Builds [`HttpServer`] handles sharing one runtime and one HTTP client.
pub struct HttpServerFactory {
    runtime: Arc<tokio::runtime::Runtime>,
    client: reqwest::Client,
}

impl HttpServerFactory {
    pub fn new() -> std::io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .thread_name("netlab-client")
            .build()?;
        Ok(Self {
            runtime: Arc::new(runtime),
            client: reqwest::Client::new(),
        })
    }

    /// Runtime the handles spawn their requests on.
    pub fn runtime(&self) -> &Arc<tokio::runtime::Runtime> {
        &self.runtime
    }
}

impl ServerFactory for HttpServerFactory {
    fn create(&self, descriptor: ServerDescriptor) -> Arc<dyn ConnectionHandle> {
        Arc::new(HttpServer::new(
            descriptor,
            self.runtime.handle().clone(),
            self.client.clone(),
        ))
    }
}
