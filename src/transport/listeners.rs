//! Transport notifications.

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::TransportError;

type Notify = Arc<dyn Fn() + Send + Sync>;

/// Optional callbacks a transport fires during its lifecycle.
#[derive(Clone, Default)]
pub struct TransportListeners {
    pub on_connecting: Option<Notify>,
    pub on_open: Option<Notify>,
    pub on_close: Option<Notify>,
    pub on_message: Option<Arc<dyn Fn(Value) + Send + Sync>>,
    pub on_message_sent: Option<Arc<dyn Fn(&Value) + Send + Sync>>,
    pub on_error: Option<Arc<dyn Fn(TransportError) + Send + Sync>>,
}

/// Called at most once, the first time a transport needs its listeners.
pub type ListenerProvider = Box<dyn FnOnce() -> TransportListeners + Send>;

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connecting,
    Open,
    Close,
    Message(Value),
    MessageSent(Value),
    Error(TransportError),
}

impl TransportListeners {
    /// Listeners forwarding every notification into one channel.
    pub fn channel(tx: mpsc::UnboundedSender<TransportEvent>) -> Self {
        let forward = move |event: TransportEvent| {
            // receiver gone means the session is shutting down
            let _ = tx.send(event);
        };
        let f = Arc::new(forward);
        Self {
            on_connecting: Some({
                let f = f.clone();
                Arc::new(move || f(TransportEvent::Connecting))
            }),
            on_open: Some({
                let f = f.clone();
                Arc::new(move || f(TransportEvent::Open))
            }),
            on_close: Some({
                let f = f.clone();
                Arc::new(move || f(TransportEvent::Close))
            }),
            on_message: Some({
                let f = f.clone();
                Arc::new(move |v| f(TransportEvent::Message(v)))
            }),
            on_message_sent: Some({
                let f = f.clone();
                Arc::new(move |v: &Value| f(TransportEvent::MessageSent(v.clone())))
            }),
            on_error: Some(Arc::new(move |e| f(TransportEvent::Error(e)))),
        }
    }

    /// Provider handing out [`channel`](Self::channel) listeners.
    pub fn channel_provider(tx: mpsc::UnboundedSender<TransportEvent>) -> ListenerProvider {
        Box::new(move || Self::channel(tx))
    }

    pub(crate) fn connecting(&self) {
        if let Some(f) = &self.on_connecting {
            f();
        }
    }

    pub(crate) fn open(&self) {
        if let Some(f) = &self.on_open {
            f();
        }
    }

    pub(crate) fn close(&self) {
        if let Some(f) = &self.on_close {
            f();
        }
    }

    pub(crate) fn message(&self, value: Value) {
        if let Some(f) = &self.on_message {
            f(value);
        }
    }

    pub(crate) fn message_sent(&self, value: &Value) {
        if let Some(f) = &self.on_message_sent {
            f(value);
        }
    }

    pub(crate) fn error(&self, error: TransportError) {
        log::error!("{}", error);
        if let Some(f) = &self.on_error {
            f(error);
        }
    }
}

/// Resolves a provider into listeners on first use and memoizes them.
pub(crate) struct LazyListeners {
    provider: Mutex<Option<ListenerProvider>>,
    listeners: OnceCell<TransportListeners>,
}

impl LazyListeners {
    pub(crate) fn new(provider: ListenerProvider) -> Self {
        Self {
            provider: Mutex::new(Some(provider)),
            listeners: OnceCell::new(),
        }
    }

    pub(crate) fn get(&self) -> &TransportListeners {
        self.listeners.get_or_init(|| match self.provider.lock().take() {
            Some(provider) => provider(),
            None => TransportListeners::default(),
        })
    }
}
