//! In-process bus.
//!
//! Each subscription gets its own bounded mailbox. Publishing never waits on
//! a slow subscriber: a full mailbox loses the message, which is the same
//! at-most-once contract a networked bus gives.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, trace};

use crate::transport::{Message, Subscription, Transport};
use crate::BusError;

/// Default per-subscription mailbox capacity.
pub const DEFAULT_MAILBOX_SIZE: usize = 1024;

/// Process-local publish/subscribe bus. Cheap to clone.
#[derive(Clone)]
pub struct MemoryBus {
    inner: Arc<MemoryBusInner>,
}

struct MemoryBusInner {
    subscribers: RwLock<HashMap<String, Vec<mpsc::Sender<Message>>>>,
    mailbox_size: usize,
    closed: AtomicBool,
}

impl MemoryBus {
    /// Create a bus with the default mailbox size.
    pub fn new() -> Self {
        Self::with_mailbox_size(DEFAULT_MAILBOX_SIZE)
    }

    /// Create a bus whose subscriptions buffer at most `mailbox_size` messages.
    pub fn with_mailbox_size(mailbox_size: usize) -> Self {
        Self {
            inner: Arc::new(MemoryBusInner {
                subscribers: RwLock::new(HashMap::new()),
                mailbox_size: mailbox_size.max(1),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Number of live subscriptions on `subject`.
    pub async fn subscriber_count(&self, subject: &str) -> usize {
        let subscribers = self.inner.subscribers.read().await;
        subscribers
            .get(subject)
            .map(|txs| txs.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }

    /// Shut the bus down. Every subscription ends and further calls fail.
    pub async fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.subscribers.write().await.clear();
        debug!("Memory bus closed");
    }

    fn ensure_open(&self) -> Result<(), BusError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }
        Ok(())
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_subject(subject: &str) -> Result<(), BusError> {
    if subject.is_empty() || subject.chars().any(char::is_whitespace) {
        return Err(BusError::InvalidSubject(subject.to_string()));
    }
    Ok(())
}

#[async_trait]
impl Transport for MemoryBus {
    async fn publish(
        &self,
        subject: &str,
        payload: Bytes,
        reply_to: Option<&str>,
    ) -> Result<(), BusError> {
        self.ensure_open()?;
        validate_subject(subject)?;

        let msg = Message {
            subject: subject.to_string(),
            reply_to: reply_to.map(str::to_string),
            payload,
        };

        let mut saw_closed = false;
        {
            let subscribers = self.inner.subscribers.read().await;
            let Some(txs) = subscribers.get(subject) else {
                trace!(subject, "No subscribers");
                return Ok(());
            };

            for tx in txs {
                match tx.try_send(msg.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        debug!(subject, "Subscriber mailbox full, message dropped");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => saw_closed = true,
                }
            }
        }

        if saw_closed {
            let mut subscribers = self.inner.subscribers.write().await;
            if let Some(txs) = subscribers.get_mut(subject) {
                txs.retain(|tx| !tx.is_closed());
                if txs.is_empty() {
                    subscribers.remove(subject);
                }
            }
        }

        Ok(())
    }

    async fn subscribe(&self, subject: &str) -> Result<Subscription, BusError> {
        self.ensure_open()?;
        validate_subject(subject)?;

        let (tx, rx) = mpsc::channel(self.inner.mailbox_size);
        self.inner
            .subscribers
            .write()
            .await
            .entry(subject.to_string())
            .or_default()
            .push(tx);

        trace!(subject, "Subscribed");
        Ok(Subscription::new(subject, rx))
    }
}
