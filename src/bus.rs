//! Change notifications between the engine, its in-window listeners, and
//! every other window sharing the store.
//!
//! Local listeners run synchronously, in subscription order. Envelopes also
//! go out through an [`ExternalPort`]; the pool's receive loop refreshes its
//! caches before handing a remote envelope to the same listeners.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Event {
    GifsUpdated,
    HistoryUpdated,
    FavoritesUpdated,
    SettingsUpdated,
    ConfigUpdated,
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::GifsUpdated => "gifs-updated",
            Event::HistoryUpdated => "history-updated",
            Event::FavoritesUpdated => "favorites-updated",
            Event::SettingsUpdated => "settings-updated",
            Event::ConfigUpdated => "config-updated",
        }
    }

    /// Whether the event is about the gif table rather than settings.
    pub fn touches_gifs(&self) -> bool {
        matches!(
            self,
            Event::GifsUpdated | Event::HistoryUpdated | Event::FavoritesUpdated
        )
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What travels between windows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Id of the window that sent it.
    pub origin: u64,
    pub event: Event,
    #[serde(default)]
    pub payload: Value,
}

/// Host-provided cross-window messaging.
pub trait ExternalPort: Send + Sync {
    /// Deliver `envelope` to every window, the sender included.
    fn post(&self, envelope: Envelope) -> anyhow::Result<()>;
    fn subscribe(&self) -> broadcast::Receiver<Envelope>;
}

/// An in-process port; windows sharing one instance see each other.
#[derive(Clone)]
pub struct LocalChannel {
    tx: broadcast::Sender<Envelope>,
}

impl LocalChannel {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }
}

impl Default for LocalChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl ExternalPort for LocalChannel {
    fn post(&self, envelope: Envelope) -> anyhow::Result<()> {
        // No receivers just means no other window is open.
        let _ = self.tx.send(envelope);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }
}

/// For a lone window: posts go nowhere.
pub struct NullPort {
    tx: broadcast::Sender<Envelope>,
}

impl NullPort {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }
}

impl Default for NullPort {
    fn default() -> Self {
        Self::new()
    }
}

impl ExternalPort for NullPort {
    fn post(&self, _envelope: Envelope) -> anyhow::Result<()> {
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }
}

pub type Handler = Arc<dyn Fn(&Value) + Send + Sync>;

struct BusInner {
    origin: u64,
    listeners: Mutex<HashMap<Event, Vec<Handler>>>,
    port: Arc<dyn ExternalPort>,
}

#[derive(Clone)]
pub struct Bus {
    inner: Arc<BusInner>,
}

impl Bus {
    pub fn new(port: Arc<dyn ExternalPort>) -> Self {
        Self {
            inner: Arc::new(BusInner {
                origin: rand::random(),
                listeners: Mutex::new(HashMap::new()),
                port,
            }),
        }
    }

    /// This window's id, stamped on every outgoing envelope.
    pub fn origin(&self) -> u64 {
        self.inner.origin
    }

    pub fn add_listener(&self, event: Event, handler: impl Fn(&Value) + Send + Sync + 'static) {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(event)
            .or_default()
            .push(Arc::new(handler));
    }

    /// Notify local listeners, then every other window.
    pub fn send(&self, event: Event, payload: Value) {
        self.dispatch(event, &payload);
        let envelope = Envelope {
            origin: self.origin(),
            event,
            payload,
        };
        if let Err(e) = self.inner.port.post(envelope) {
            warn!("failed to post {} to other windows: {}", event, e);
        }
    }

    /// Run local listeners only.
    pub fn dispatch(&self, event: Event, payload: &Value) {
        let handlers = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event)
            .cloned()
            .unwrap_or_default();
        debug!("dispatching {} to {} listeners", event, handlers.len());
        for handler in handlers {
            handler(payload);
        }
    }

    pub(crate) fn is_own(&self, envelope: &Envelope) -> bool {
        envelope.origin == self.origin()
    }

    pub(crate) fn subscribe_remote(&self) -> broadcast::Receiver<Envelope> {
        self.inner.port.subscribe()
    }
}
