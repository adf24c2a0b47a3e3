//! Transient user-visible messages.

use parking_lot::Mutex;
use wamxr_comms::{MessageLevel, MessageSender, UserMessage};

/// Where construction failures and other notices are shown
pub trait MessageSink: Send + Sync {
    fn report(&self, message: UserMessage);

    fn error(&self, text: &str) {
        self.report(UserMessage {
            level: MessageLevel::Error,
            text: text.to_string(),
        });
    }

    fn info(&self, text: &str) {
        self.report(UserMessage {
            level: MessageLevel::Info,
            text: text.to_string(),
        });
    }
}

/// Writes messages to the log only
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMessages;

impl MessageSink for TracingMessages {
    fn report(&self, message: UserMessage) {
        match message.level {
            MessageLevel::Info => tracing::info!("{}", message.text),
            MessageLevel::Warning => tracing::warn!("{}", message.text),
            MessageLevel::Error => tracing::error!("{}", message.text),
        }
    }
}

/// Forwards messages to the UI channel
pub struct ChannelMessages {
    tx: MessageSender,
}

impl ChannelMessages {
    pub fn new(tx: MessageSender) -> Self {
        Self { tx }
    }
}

impl MessageSink for ChannelMessages {
    fn report(&self, message: UserMessage) {
        if let Err(e) = self.tx.try_send(message) {
            tracing::warn!("Dropping user message: {}", e.into_inner().text);
        }
    }
}

/// Keeps every message, for tests and the demo binary
#[derive(Default)]
pub struct CollectingMessages {
    messages: Mutex<Vec<UserMessage>>,
}

impl CollectingMessages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<UserMessage> {
        self.messages.lock().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.messages
            .lock()
            .iter()
            .filter(|m| m.level == MessageLevel::Error)
            .map(|m| m.text.clone())
            .collect()
    }
}

impl MessageSink for CollectingMessages {
    fn report(&self, message: UserMessage) {
        self.messages.lock().push(message);
    }
}
