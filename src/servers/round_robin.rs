use crate::servers::registry::RemoteRegistry;
use netlab_core::ConnectionHandle;

use std::sync::Arc;

/// Round-robin cursor over the remote servers of a [`RemoteRegistry`].
///
/// Each consumer keeps its own cursor, so independent consumers never
/// disturb each other. The cursor survives registry changes: if the set
/// shrank below it, it starts over at the first server.
#[derive(Clone, Debug, Default)]
pub struct RoundRobin {
    position: usize,
}

impl RoundRobin {
    /// Next remote server, or `None` when there are no remote servers.
    pub fn next(&mut self, registry: &RemoteRegistry) -> Option<Arc<dyn ConnectionHandle>> {
        let len = registry.len();
        if len == 0 {
            return None;
        }
        if self.position >= len {
            self.position = 0;
        }
        let server = registry.nth(self.position)?.clone();
        self.position = if self.position + 1 < len {
            self.position + 1
        } else {
            0
        };
        Some(server)
    }

    pub fn position(&self) -> usize {
        self.position
    }
}
