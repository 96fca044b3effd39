//! Transport trait and the message/reply types it exchanges.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use svcb_id::InboxId;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::BusError;

/// Prefix for private reply subjects.
pub const INBOX_PREFIX: &str = "_INBOX";

/// A message delivered to a subscriber.
#[derive(Debug, Clone)]
pub struct Message {
    /// Subject the message was published on.
    pub subject: String,

    /// Where the publisher expects replies, if anywhere.
    pub reply_to: Option<String>,

    /// Opaque payload.
    pub payload: Bytes,
}

/// A live subscription to one subject.
///
/// Dropping the subscription unsubscribes; the bus prunes the closed
/// mailbox on its next publish to that subject.
#[derive(Debug)]
pub struct Subscription {
    subject: String,
    rx: mpsc::Receiver<Message>,
}

impl Subscription {
    /// Wrap a mailbox receiver.
    pub fn new(subject: impl Into<String>, rx: mpsc::Receiver<Message>) -> Self {
        Self {
            subject: subject.into(),
            rx,
        }
    }

    /// The subscribed subject.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Wait for the next message. Returns `None` once the bus is closed.
    pub async fn next(&mut self) -> Option<Message> {
        self.rx.recv().await
    }
}

/// Lazy sequence of replies to a request, bounded by a deadline.
#[derive(Debug)]
pub struct Replies {
    inbox: Subscription,
    deadline: Instant,
}

impl Replies {
    /// Collect replies arriving on `inbox` until `deadline`.
    pub fn new(inbox: Subscription, deadline: Instant) -> Self {
        Self { inbox, deadline }
    }

    /// When the sequence completes.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// The next reply payload, or `None` once the deadline has passed.
    pub async fn next(&mut self) -> Option<Bytes> {
        match tokio::time::timeout_at(self.deadline, self.inbox.next()).await {
            Ok(Some(msg)) => Some(msg.payload),
            Ok(None) | Err(_) => None,
        }
    }

    /// Drain every reply that arrives before the deadline.
    pub async fn collect(mut self) -> Vec<Bytes> {
        let mut replies = Vec::new();
        while let Some(payload) = self.next().await {
            replies.push(payload);
        }
        replies
    }
}

/// Publish/subscribe transport with request/reply on top.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Broadcast `payload` to every current subscriber of `subject`.
    async fn publish(
        &self,
        subject: &str,
        payload: Bytes,
        reply_to: Option<&str>,
    ) -> Result<(), BusError>;

    /// Start receiving messages published to `subject`.
    async fn subscribe(&self, subject: &str) -> Result<Subscription, BusError>;

    /// A fresh private reply subject.
    fn new_inbox(&self) -> String {
        format!("{INBOX_PREFIX}.{}", InboxId::new())
    }

    /// Publish with a private reply subject and collect replies for `window`.
    async fn request(
        &self,
        subject: &str,
        payload: Bytes,
        window: Duration,
    ) -> Result<Replies, BusError> {
        let inbox = self.new_inbox();
        let replies = self.subscribe(&inbox).await?;
        self.publish(subject, payload, Some(&inbox)).await?;
        Ok(Replies::new(replies, Instant::now() + window))
    }
}
