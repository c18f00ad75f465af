// Shared state handed to every request handler.

use std::sync::Arc;

use hexa_core::config::Config;
use hexa_core::session::SessionManager;
use hexa_core::store::NotebookStore;
use hexa_llm::LlmClient;

use crate::container::{ContainerClient, ContainerError};
use crate::voice::VoiceGate;

/// Store key holding the current session id across restarts.
const SESSION_KEY: &str = "session_id";

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub llm: Arc<LlmClient>,
    pub store: Arc<NotebookStore>,
    pub sessions: Arc<SessionManager>,
    /// `None` when `[container] enabled = false`.
    pub container: Option<Arc<ContainerClient>>,
}

impl AppState {
    pub fn new(config: Config, llm: LlmClient, store: NotebookStore) -> Result<Self, ContainerError> {
        let container = if config.container.enabled {
            Some(Arc::new(ContainerClient::new(&config.container)?))
        } else {
            None
        };
        Ok(Self {
            config: Arc::new(config),
            llm: Arc::new(llm),
            store: Arc::new(store),
            sessions: Arc::new(SessionManager::new()),
            container,
        })
    }

    /// The container, if requests for unknown paths should be forwarded to it.
    pub fn proxy_target(&self) -> Option<&ContainerClient> {
        self.container
            .as_deref()
            .filter(|_| self.config.container.proxy)
    }

    pub fn voice_gate(&self) -> VoiceGate {
        let has_key = self
            .config
            .credentials
            .openai_api_key
            .as_deref()
            .is_some_and(|k| !k.is_empty());
        let has_model = self
            .config
            .voice
            .realtime_model
            .as_deref()
            .is_some_and(|m| !m.is_empty());
        VoiceGate {
            ready: has_key && has_model,
        }
    }

    /// Load the session id persisted by a previous run, if any, and make it
    /// current.
    pub fn restore_session(&self) -> anyhow::Result<Option<String>> {
        match self.store.load_state(SESSION_KEY)? {
            Some(serde_json::Value::String(id)) if !id.is_empty() => {
                self.sessions.set(id.clone());
                Ok(Some(id))
            }
            _ => Ok(None),
        }
    }

    /// Persist `id` (or its absence) so the next run can restore it.
    pub fn persist_session(&self, id: Option<&str>) -> anyhow::Result<()> {
        let value = id.map_or(serde_json::Value::Null, serde_json::Value::from);
        self.store.save_state(SESSION_KEY, &value)
    }

    /// Absolute form of a container-relative notebook URL, using
    /// `[server] public_url` when set.
    pub fn public_url(&self, url: &str) -> String {
        let base = self.config.server.public_url.trim_end_matches('/');
        if url.starts_with('/') && !base.is_empty() {
            format!("{base}{url}")
        } else {
            url.to_string()
        }
    }
}
