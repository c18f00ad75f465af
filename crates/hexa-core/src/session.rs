// Session coordination.
//
// One session id is shared by the voice channel and the notebook pipeline so
// that both sides of the UI refer to the same conversation. Changes are
// broadcast through a `watch` channel; subscribers always see the latest id.

use tokio::sync::watch;
use tracing::debug;

/// Holds the current session id and notifies subscribers when it changes.
#[derive(Debug)]
pub struct SessionManager {
    tx: watch::Sender<Option<String>>,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionManager {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Start a new session with a fresh UUID v4 and return its id.
    pub fn generate(&self) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.set(id.clone());
        id
    }

    /// The current session id, if a session is active.
    pub fn current(&self) -> Option<String> {
        self.tx.borrow().clone()
    }

    /// Replace the current session id (e.g. when restoring a session).
    pub fn set(&self, id: String) {
        debug!(session_id = %id, "session set");
        self.tx.send_replace(Some(id));
    }

    /// End the current session.
    pub fn clear(&self) {
        debug!("session cleared");
        self.tx.send_replace(None);
    }

    /// Subscribe to session changes. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.tx.subscribe()
    }
}
