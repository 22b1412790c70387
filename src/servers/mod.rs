//! Backend server connections: the local server and the remote pool.

pub mod discovery;
pub mod launcher;
pub mod registry;
pub mod round_robin;

pub use discovery::PlatformHints;
pub use launcher::{LauncherError, LocalServer, LocalServerState, StopStage, StopTimeouts};
pub use registry::RemoteRegistry;
pub use round_robin::RoundRobin;

use crate::prompt::UserPrompt;
use crate::settings::{LocalServerSettings, SettingsStore};
use netlab_core::{
    parse_server_string, ConnectOptions, ConnectionHandle, Protocol, ServerDescriptor,
    ServerError, ServerFactory, ServerSpec,
};

use anyhow::Result;
use std::sync::Arc;

/// Change notifications sent to subscribers of [`Servers`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServersEvent {
    RemoteServersUpdated,
    LocalServerChanged,
}

/// Owner of every backend server connection.
///
/// Holds the local server (settings, connection handle and process) and the
/// registry of remote servers, and persists both through a
/// [`SettingsStore`].
pub struct Servers {
    settings: LocalServerSettings,
    store: SettingsStore,
    factory: Arc<dyn ServerFactory>,
    local: LocalServer,
    remotes: RemoteRegistry,
    cursor: RoundRobin,
    subscribers: Vec<async_channel::Sender<ServersEvent>>,
}

impl Servers {
    /// Load the stored settings, repair them, register the stored remote
    /// servers and write everything back.
    pub fn load(
        store: SettingsStore,
        factory: Arc<dyn ServerFactory>,
        hints: &PlatformHints,
    ) -> Self {
        let stored = store.load();
        let mut settings = stored.local;
        settings.heal(hints);

        let mut remotes = RemoteRegistry::new(factory.clone());
        for descriptor in stored.remotes {
            remotes.register(descriptor);
        }

        let local = LocalServer::new(factory.create(local_descriptor(&settings, settings.port)));
        log::info!("New local server connection {} registered", local.handle().url());

        let servers = Self {
            settings,
            store,
            factory,
            local,
            remotes,
            cursor: RoundRobin::default(),
            subscribers: Vec::new(),
        };
        // keep the config files in sync
        if let Err(e) = servers.save() {
            log::warn!("Failed to save server settings: {:#}", e);
        }
        servers
    }

    /// Persist the settings and ask a connected local server to reload its
    /// configuration.
    pub fn save(&self) -> Result<()> {
        self.store
            .save(&self.settings, &self.remotes.descriptors())?;
        let local = self.local.handle();
        if local.connected() {
            local.post("/config/reload", None);
        }
        Ok(())
    }

    pub fn store(&self) -> &SettingsStore {
        &self.store
    }

    // --- Local server ---

    pub fn local_server_settings(&self) -> &LocalServerSettings {
        &self.settings
    }

    /// Replace the local server settings. The connection handle is recreated
    /// when the endpoint or the credentials change.
    pub fn set_local_server_settings(&mut self, settings: LocalServerSettings) {
        let endpoint_changed = self.settings.endpoint_changed(&settings);
        self.settings = settings;
        if endpoint_changed {
            self.recreate_local_handle(self.settings.port);
            self.notify(ServersEvent::LocalServerChanged);
        }
    }

    pub fn local_server_auto_start(&self) -> bool {
        self.settings.auto_start
    }

    pub fn local_server_path(&self) -> &str {
        &self.settings.path
    }

    pub fn local_server(&self) -> Arc<dyn ConnectionHandle> {
        self.local.handle().clone()
    }

    pub fn local_server_state(&self) -> &LocalServerState {
        self.local.state()
    }

    pub fn set_stop_timeouts(&mut self, timeouts: StopTimeouts) {
        self.local.set_timeouts(timeouts);
    }

    /// Check that the local server can be started.
    ///
    /// Configuration problems are shown to the user and yield `false`. A
    /// busy port is not a problem: the local connection moves to a free
    /// port instead.
    pub fn init_local_server(&mut self, prompt: &dyn UserPrompt) -> bool {
        let path = match launcher::resolve_path(&self.settings.path) {
            Ok(path) => path,
            Err(LauncherError::NotConfigured) => {
                log::warn!("No local server is configured");
                return false;
            }
            Err(e) => return self.report(prompt, e),
        };
        if let Err(e) = launcher::verify_executable(&path) {
            return self.report(prompt, e);
        }
        self.local.set_state(LocalServerState::PathResolved(path));

        let host = self.local.handle().host().to_string();
        if let Err(e) = launcher::check_bindable(&host) {
            return self.report(prompt, e);
        }

        let current = self.local.handle().port();
        let port = match launcher::check_port_available(&host, current) {
            Ok(port) => port,
            Err(e) => return self.report(prompt, e),
        };
        if port != current {
            self.recreate_local_handle(port);
            self.notify(ServersEvent::LocalServerChanged);
        }
        self.local.set_state(LocalServerState::Bound { host, port });
        true
    }

    /// Spawn the local server process on the current host and port.
    pub fn start_local_server(&mut self) -> bool {
        let handle = self.local.handle().clone();
        let command = launcher::build_command(
            std::path::Path::new(&self.settings.path),
            handle.host(),
            handle.port(),
            self.settings.allow_console_from_anywhere,
            launcher::debug_enabled(),
        );
        self.local.start(&command)
    }

    pub fn local_server_is_running(&mut self) -> bool {
        self.local.is_running()
    }

    pub fn stop_local_server(&mut self, wait: bool, prompt: &dyn UserPrompt) {
        self.local.stop(wait, prompt);
    }

    fn report(&self, prompt: &dyn UserPrompt, error: LauncherError) -> bool {
        log::error!("{}", error);
        prompt.critical(launcher::DIALOG_TITLE, &error.to_string());
        false
    }

    fn recreate_local_handle(&mut self, port: u16) {
        let handle = self.factory.create(local_descriptor(&self.settings, port));
        let old = self.local.handle().clone();
        if old.connected() {
            old.close();
        }
        self.local.set_handle(handle);
    }

    // --- Remote servers ---

    pub fn add_remote_server(
        &mut self,
        protocol: Protocol,
        host: &str,
        port: u16,
        user: Option<&str>,
        ssh_port: Option<u16>,
        ssh_key: Option<&str>,
    ) -> Arc<dyn ConnectionHandle> {
        self.remotes
            .add_remote_server(protocol, host, port, user, ssh_port, ssh_key)
    }

    pub fn get_remote_server(
        &mut self,
        protocol: Protocol,
        host: &str,
        port: u16,
        user: Option<&str>,
        options: &ConnectOptions,
    ) -> Arc<dyn ConnectionHandle> {
        self.remotes
            .get_remote_server(protocol, host, port, user, options)
    }

    /// Resolve `"local"`, a server URL or a bare `host:port`.
    pub fn get_server_from_string(&mut self, spec: &str) -> Result<Arc<dyn ConnectionHandle>, ServerError> {
        match parse_server_string(spec)? {
            ServerSpec::Local => Ok(self.local_server()),
            ServerSpec::Remote(descriptor) => {
                let options = ConnectOptions {
                    ssh_port: descriptor.ssh_port,
                    ssh_key: None,
                };
                Ok(self.remotes.get_remote_server(
                    descriptor.protocol,
                    &descriptor.host,
                    descriptor.port,
                    descriptor.user.as_deref(),
                    &options,
                ))
            }
        }
    }

    /// Reconcile the remote servers with `desired` (identifier, descriptor)
    /// pairs and notify subscribers once.
    pub fn update_remote_servers(&mut self, desired: &[(String, ServerDescriptor)]) {
        self.remotes.update_remote_servers(desired);
        self.notify(ServersEvent::RemoteServersUpdated);
    }

    pub fn remote_servers(&self) -> &RemoteRegistry {
        &self.remotes
    }

    /// A new round-robin cursor over the remote servers.
    pub fn round_robin(&self) -> RoundRobin {
        self.remotes.round_robin()
    }

    /// Next remote server from the cursor owned by `Servers`.
    pub fn next_remote(&mut self) -> Option<Arc<dyn ConnectionHandle>> {
        self.cursor.next(&self.remotes)
    }

    /// Close the local connection and every remote connection.
    pub fn disconnect_all_servers(&self) {
        let local = self.local.handle();
        if local.connected() {
            local.close();
        }
        self.remotes.close_all();
    }

    // --- Notifications ---

    pub fn subscribe(&mut self) -> async_channel::Receiver<ServersEvent> {
        let (tx, rx) = async_channel::bounded(64);
        self.subscribers.push(tx);
        rx
    }

    fn notify(&mut self, event: ServersEvent) {
        self.subscribers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(async_channel::TrySendError::Full(_)) => {
                log::warn!("Servers event {:?} dropped, subscriber is not keeping up", event);
                true
            }
            Err(async_channel::TrySendError::Closed(_)) => false,
        });
    }
}

fn local_descriptor(settings: &LocalServerSettings, port: u16) -> ServerDescriptor {
    ServerDescriptor::new(Protocol::Http, settings.host.clone(), port)
        .with_user(Some(settings.user.clone()))
        .with_password(Some(settings.password.clone()).filter(|p| !p.is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockFactory, ScriptedPrompt};

    fn load(dir: &std::path::Path) -> (Arc<MockFactory>, Servers) {
        let factory = Arc::new(MockFactory::default());
        let servers = Servers::load(
            SettingsStore::in_dir(dir),
            factory.clone(),
            &PlatformHints::default(),
        );
        (factory, servers)
    }

    #[test]
    fn load_creates_local_handle_and_writes_settings() {
        let dir = tempfile::tempdir().unwrap();
        let (factory, servers) = load(dir.path());

        let local = servers.local_server();
        assert!(local.is_local());
        assert_eq!(local.url(), format!("http://{}@127.0.0.1:3080", servers.local_server_settings().user));
        assert!(factory.find(&local.url()).is_some());
        assert!(servers.store().settings_path().exists());
        assert!(servers.store().server_config_path().exists());
        assert!(servers.remote_servers().is_empty());
    }

    #[test]
    fn credentials_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let (_factory, first) = load(dir.path());
        let user = first.local_server_settings().user.clone();
        let password = first.local_server_settings().password.clone();
        assert_eq!(user.len(), 64);
        drop(first);

        let (_factory, second) = load(dir.path());
        assert_eq!(second.local_server_settings().user, user);
        assert_eq!(second.local_server_settings().password, password);
    }

    #[test]
    fn stored_remotes_are_registered_and_saved_back() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("settings.json"),
            r#"{"RemoteServers": [{"host": "198.51.100.4", "port": 3080}, {"protocol": "ssh", "host": "gw", "port": 3080, "user": "alice", "ssh_port": 2222}]}"#,
        )
        .unwrap();

        let (_factory, mut servers) = load(dir.path());
        assert_eq!(servers.remote_servers().len(), 2);
        assert!(servers.remote_servers().iter().all(|(_, s)| !s.is_local()));

        let same = servers.get_server_from_string("ssh://alice@gw:2222:3080").unwrap();
        assert_eq!(servers.remote_servers().len(), 2);
        assert_eq!(same.url(), "ssh://alice@gw:2222:3080");

        let stored = SettingsStore::in_dir(dir.path()).load();
        assert_eq!(stored.remotes.len(), 2);
    }

    #[test]
    fn save_reloads_connected_local_server() {
        let dir = tempfile::tempdir().unwrap();
        let (factory, servers) = load(dir.path());
        let local = factory.find(&servers.local_server().url()).unwrap();
        assert!(local.posts().is_empty());

        local.set_connected(true);
        servers.save().unwrap();
        assert_eq!(local.posts(), vec![("/config/reload".to_string(), None)]);
    }

    #[test]
    fn server_from_string_shapes() {
        let dir = tempfile::tempdir().unwrap();
        let (_factory, mut servers) = load(dir.path());

        let local = servers.get_server_from_string("local").unwrap();
        assert!(Arc::ptr_eq(&local, &servers.local_server()));

        let bare = servers.get_server_from_string("198.51.100.4:8000").unwrap();
        assert_eq!(bare.url(), "http://198.51.100.4:8000");
        let again = servers.get_server_from_string("http://198.51.100.4:8000").unwrap();
        assert!(Arc::ptr_eq(&bare, &again));

        assert!(matches!(
            servers.get_server_from_string("nonsense"),
            Err(ServerError::Parse { .. })
        ));
        assert!(servers.get_server_from_string("ftp://a:1").is_err());
        assert_eq!(servers.remote_servers().len(), 1);
    }

    #[test]
    fn update_notifies_once() {
        let dir = tempfile::tempdir().unwrap();
        let (_factory, mut servers) = load(dir.path());
        let events = servers.subscribe();

        servers.update_remote_servers(&[
            ("a".to_string(), ServerDescriptor::new(Protocol::Http, "a", 1)),
            ("b".to_string(), ServerDescriptor::new(Protocol::Http, "b", 2)),
        ]);

        assert_eq!(events.try_recv().unwrap(), ServersEvent::RemoteServersUpdated);
        assert!(events.try_recv().is_err());
        assert_eq!(servers.remote_servers().len(), 2);
    }

    #[test]
    fn closed_subscribers_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let (_factory, mut servers) = load(dir.path());
        drop(servers.subscribe());
        let live = servers.subscribe();

        servers.update_remote_servers(&[]);
        assert_eq!(servers.subscribers.len(), 1);
        assert_eq!(live.try_recv().unwrap(), ServersEvent::RemoteServersUpdated);
    }

    #[test]
    fn settings_change_recreates_local_handle_only_for_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let (_factory, mut servers) = load(dir.path());
        let events = servers.subscribe();
        let before = servers.local_server();

        let mut settings = servers.local_server_settings().clone();
        settings.auto_start = false;
        servers.set_local_server_settings(settings.clone());
        assert!(Arc::ptr_eq(&before, &servers.local_server()));
        assert!(!servers.local_server_auto_start());
        assert!(events.try_recv().is_err());

        settings.port = 3081;
        servers.set_local_server_settings(settings);
        let after = servers.local_server();
        assert!(!Arc::ptr_eq(&before, &after));
        assert!(after.is_local());
        assert_eq!(after.port(), 3081);
        assert_eq!(events.try_recv().unwrap(), ServersEvent::LocalServerChanged);
    }

    #[test]
    fn round_robin_cycles_remote_servers() {
        let dir = tempfile::tempdir().unwrap();
        let (_factory, mut servers) = load(dir.path());
        assert!(servers.next_remote().is_none());

        servers.add_remote_server(Protocol::Http, "a", 1, None, None, None);
        servers.add_remote_server(Protocol::Http, "b", 2, None, None, None);
        let hosts: Vec<String> = (0..3)
            .map(|_| servers.next_remote().unwrap().host().to_string())
            .collect();
        assert_eq!(hosts, vec!["a", "b", "a"]);
    }

    #[test]
    fn disconnect_all_closes_connected_handles() {
        let dir = tempfile::tempdir().unwrap();
        let (factory, mut servers) = load(dir.path());
        let remote = servers.add_remote_server(Protocol::Http, "a", 1, None, None, None);
        let idle = servers.add_remote_server(Protocol::Http, "b", 2, None, None, None);
        remote.connect();
        servers.local_server().connect();

        servers.disconnect_all_servers();

        assert!(!remote.connected());
        assert!(!servers.local_server().connected());
        assert_eq!(factory.find(&remote.url()).unwrap().close_calls(), 1);
        assert_eq!(factory.find(&idle.url()).unwrap().close_calls(), 0);
    }

    #[test]
    fn init_without_path_does_not_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let (_factory, mut servers) = load(dir.path());
        let mut settings = servers.local_server_settings().clone();
        settings.path = String::new();
        servers.set_local_server_settings(settings);

        let prompt = ScriptedPrompt::answering(true);
        assert!(!servers.init_local_server(&prompt));
        assert!(prompt.criticals().is_empty());
    }

    #[test]
    fn init_reports_missing_executable() {
        let dir = tempfile::tempdir().unwrap();
        let (_factory, mut servers) = load(dir.path());
        let mut settings = servers.local_server_settings().clone();
        settings.path = dir.path().join("missing").to_string_lossy().into_owned();
        servers.set_local_server_settings(settings);

        let prompt = ScriptedPrompt::answering(true);
        assert!(!servers.init_local_server(&prompt));
        let criticals = prompt.criticals();
        assert_eq!(criticals.len(), 1);
        assert!(criticals[0].starts_with("Could not find local server"));
    }

    #[cfg(unix)]
    #[test]
    fn init_moves_local_handle_off_busy_port() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("gns3server");
        std::fs::write(&exe, "#!/bin/sh\nexit 0\n").unwrap();
        std::fs::set_permissions(&exe, std::fs::Permissions::from_mode(0o755)).unwrap();

        let busy = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let busy_port = busy.local_addr().unwrap().port();

        let (_factory, mut servers) = load(dir.path());
        let mut settings = servers.local_server_settings().clone();
        settings.path = exe.to_string_lossy().into_owned();
        settings.port = busy_port;
        servers.set_local_server_settings(settings);

        let prompt = ScriptedPrompt::answering(true);
        assert!(servers.init_local_server(&prompt));
        assert!(prompt.criticals().is_empty());

        let port = servers.local_server().port();
        assert_ne!(port, busy_port);
        assert!(servers.local_server().is_local());
        assert_eq!(servers.local_server_settings().port, busy_port);
        assert_eq!(
            servers.local_server_state(),
            &LocalServerState::Bound {
                host: "127.0.0.1".to_string(),
                port
            }
        );
    }
}
