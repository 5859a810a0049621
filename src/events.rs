use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

use crate::entities::order::OrderStatus;

/// Domain events emitted by the checkout/settlement pipeline. Consumers are
/// fire-and-forget; a send failure never fails the emitting operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderCreated {
        order_id: Uuid,
        user_id: Uuid,
        total_payable: i64,
    },
    OrderStatusChanged {
        order_id: Uuid,
        old_status: OrderStatus,
        new_status: OrderStatus,
    },
    PaymentCaptured {
        order_id: Uuid,
        gateway_payment_id: String,
        amount: i64,
    },
    PaymentFailed {
        order_id: Uuid,
        gateway_order_id: String,
    },
    RefundRequested {
        order_id: Uuid,
        refund_id: String,
        amount: i64,
    },
    RefundProcessed {
        order_id: Uuid,
        refund_id: String,
    },
    StockDecremented {
        product_id: Uuid,
        quantity: i32,
        remaining: i32,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event, logging and swallowing channel failures.
    pub async fn send(&self, event: Event) {
        if let Err(e) = self.sender.send(event).await {
            tracing::warn!(error = %e, "failed to publish domain event");
        }
    }
}

/// Creates an event channel plus a drain task that logs each event. The
/// handle is returned so callers (tests, shutdown) can await completion.
pub fn spawn_event_logger(buffer: usize) -> (EventSender, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel(buffer);
    let handle = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            info!(?event, "domain event");
        }
    });
    (EventSender::new(tx), handle)
}
