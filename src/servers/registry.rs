use crate::servers::round_robin::RoundRobin;
use netlab_core::{server_url, ConnectOptions, ConnectionHandle, Protocol, ServerDescriptor, ServerFactory};

use std::collections::HashSet;
use std::sync::Arc;

/// Remote server connections, in registration order.
///
/// Entries registered through [`RemoteRegistry::add_remote_server`] are keyed
/// by the handle's canonical URL; entries created by
/// [`RemoteRegistry::update_remote_servers`] use the caller's identifier.
/// The local server is never stored here.
pub struct RemoteRegistry {
    servers: Vec<(String, Arc<dyn ConnectionHandle>)>,
    factory: Arc<dyn ServerFactory>,
}

impl RemoteRegistry {
    pub fn new(factory: Arc<dyn ServerFactory>) -> Self {
        Self {
            servers: Vec::new(),
            factory,
        }
    }

    /// Create and register a remote server. Does not check for duplicates;
    /// use [`RemoteRegistry::get_remote_server`] for get-or-create.
    pub fn add_remote_server(
        &mut self,
        protocol: Protocol,
        host: &str,
        port: u16,
        user: Option<&str>,
        ssh_port: Option<u16>,
        ssh_key: Option<&str>,
    ) -> Arc<dyn ConnectionHandle> {
        let descriptor = ServerDescriptor::new(protocol, host, port)
            .with_user(user.map(str::to_string))
            .with_options(ConnectOptions {
                ssh_port,
                ssh_key: ssh_key.map(str::to_string),
            });
        self.register(descriptor)
    }

    /// Create and register a remote server from a stored descriptor.
    pub fn register(&mut self, descriptor: ServerDescriptor) -> Arc<dyn ConnectionHandle> {
        let server = self.factory.create(descriptor);
        server.set_local(false);
        let url = server.url();
        self.insert(url.clone(), server.clone());
        log::info!("New remote server connection {} registered", url);
        server
    }

    /// Return the server matching these parameters, creating it if needed.
    pub fn get_remote_server(
        &mut self,
        protocol: Protocol,
        host: &str,
        port: u16,
        user: Option<&str>,
        options: &ConnectOptions,
    ) -> Arc<dyn ConnectionHandle> {
        let url = server_url(protocol, host, port, user, options.ssh_port);
        if let Some(server) = self.find_by_url(&url) {
            return server;
        }
        self.add_remote_server(
            protocol,
            host,
            port,
            user,
            options.ssh_port,
            options.ssh_key.as_deref(),
        )
    }

    pub fn find_by_url(&self, url: &str) -> Option<Arc<dyn ConnectionHandle>> {
        self.servers
            .iter()
            .find(|(_, server)| server.url() == url)
            .map(|(_, server)| server.clone())
    }

    /// Reconcile with the desired set of servers keyed by identifier.
    ///
    /// Servers whose identifier is gone are closed and dropped, new
    /// identifiers get a fresh handle, and servers present in both sets are
    /// left untouched.
    pub fn update_remote_servers(&mut self, desired: &[(String, ServerDescriptor)]) {
        let wanted: HashSet<&str> = desired.iter().map(|(id, _)| id.as_str()).collect();

        self.servers.retain(|(id, server)| {
            if wanted.contains(id.as_str()) {
                return true;
            }
            if server.connected() {
                server.close();
            }
            log::info!("Remote server connection {} unregistered", server.url());
            false
        });

        for (id, descriptor) in desired {
            if self.contains(id) {
                continue;
            }
            let server = self.factory.create(descriptor.clone());
            server.set_local(false);
            log::info!("New remote server connection {} registered", server.url());
            self.servers.push((id.clone(), server));
        }
    }

    /// Close every connected remote server. Best effort.
    pub fn close_all(&self) {
        for (_, server) in &self.servers {
            if server.connected() {
                server.close();
            }
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.servers.iter().any(|(key, _)| key == id)
    }

    pub fn get(&self, id: &str) -> Option<&Arc<dyn ConnectionHandle>> {
        self.servers
            .iter()
            .find(|(key, _)| key == id)
            .map(|(_, server)| server)
    }

    /// Server at `index` in registration order.
    pub fn nth(&self, index: usize) -> Option<&Arc<dyn ConnectionHandle>> {
        self.servers.get(index).map(|(_, server)| server)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn ConnectionHandle>)> {
        self.servers
            .iter()
            .map(|(id, server)| (id.as_str(), server))
    }

    /// Descriptors of all registered servers, for persistence.
    pub fn descriptors(&self) -> Vec<ServerDescriptor> {
        self.servers
            .iter()
            .map(|(_, server)| server.descriptor().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// A new round-robin cursor over this registry, starting at the first server.
    pub fn round_robin(&self) -> RoundRobin {
        RoundRobin::default()
    }

    /// Same key replaces the handle in place, keeping its position. The
    /// displaced handle is closed since nothing can reach it afterwards.
    fn insert(&mut self, id: String, server: Arc<dyn ConnectionHandle>) {
        match self.servers.iter_mut().find(|(key, _)| *key == id) {
            Some(entry) => {
                let old = std::mem::replace(&mut entry.1, server);
                if !Arc::ptr_eq(&old, &entry.1) && old.connected() {
                    old.close();
                }
            }
            None => self.servers.push((id, server)),
        }
    }
}
