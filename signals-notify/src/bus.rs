use serde_json::{Map, Value};
use signals_core::types::NotificationEnvelope;
use tokio::sync::mpsc;

use crate::inbound::InboundMessage;

/// Everything that reaches the notification core, whatever the transport.
#[derive(Debug, Clone)]
pub enum BusMessage {
    /// Raw push delivery, not yet classified.
    Inbound(InboundMessage),
    /// Already-classified silent work, e.g. from a background script.
    Silent(NotificationEnvelope),
    /// The user tapped a notification or one of its actions.
    Activated {
        data: Map<String, Value>,
        action: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct BusSender {
    tx: mpsc::Sender<BusMessage>,
}

impl BusSender {
    /// Waits for capacity.
    pub async fn publish(&self, message: BusMessage) -> Result<(), mpsc::error::SendError<BusMessage>> {
        self.tx.send(message).await
    }

    /// Fails instead of waiting when the bus is full.
    pub fn try_publish(&self, message: BusMessage) -> Result<(), mpsc::error::TrySendError<BusMessage>> {
        self.tx.try_send(message)
    }
}

pub fn channel(capacity: usize) -> (BusSender, mpsc::Receiver<BusMessage>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (BusSender { tx }, rx)
}
