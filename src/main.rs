use netlab::servers::PlatformHints;
use netlab::{ConsolePrompt, Servers, ServersEvent, SettingsStore};
use netlab_core::HttpServerFactory;

use anyhow::Context;
use parking_lot::Mutex;
use std::sync::Arc;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let factory = Arc::new(HttpServerFactory::new().context("Failed to create tokio runtime")?);
    let runtime = factory.runtime().clone();

    let store = SettingsStore::default_location();
    log::info!("Using settings from {}", store.settings_path().display());
    let mut servers = Servers::load(store, factory, &PlatformHints::current());
    let events = servers.subscribe();

    let prompt = ConsolePrompt;
    if servers.local_server_auto_start() {
        if servers.init_local_server(&prompt) && servers.start_local_server() {
            log::info!("Local server available at {}", servers.local_server().url());
        }
    } else {
        log::info!("Local server auto start is disabled");
    }

    servers.local_server().connect();
    for (_, server) in servers.remote_servers().iter() {
        server.connect();
    }

    let servers = Arc::new(Mutex::new(servers));
    runtime.spawn({
        let servers = servers.clone();
        async move {
            while let Ok(event) = events.recv().await {
                match event {
                    ServersEvent::LocalServerChanged => {
                        let url = servers.lock().local_server().url();
                        log::info!("Local server moved to {}", url);
                    }
                    ServersEvent::RemoteServersUpdated => {
                        let count = servers.lock().remote_servers().len();
                        log::info!("{} remote server(s) registered", count);
                    }
                }
            }
        }
    });

    runtime.block_on(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl-C: {}", e);
        }
    });

    log::info!("Shutting down");
    let mut servers = servers.lock();
    servers.stop_local_server(true, &prompt);
    servers.disconnect_all_servers();
    Ok(())
}
