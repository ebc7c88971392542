use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Domain events emitted after a fulfillment transaction commits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Event {
    // Manufacturing events
    ManufacturingOrderCreated {
        order_id: Uuid,
        product_id: Uuid,
        planned_quantity: i32,
    },
    ManufacturingOrderStarted(Uuid),
    ManufacturingOrderPaused(Uuid),
    ManufacturingOrderCompleted {
        order_id: Uuid,
        produced_quantity: i32,
        serial_numbers_issued: usize,
    },
    ManufacturingOrderCancelled(Uuid),
    ManufacturingStepStarted {
        order_id: Uuid,
        step_id: Uuid,
    },
    ManufacturingStepCompleted {
        order_id: Uuid,
        step_id: Uuid,
        quality_check_passed: Option<bool>,
    },
    ManufacturingStepSkipped {
        order_id: Uuid,
        step_id: Uuid,
    },

    // Serial number events
    SerialNumbersIssued {
        manufacturing_order_id: Uuid,
        count: usize,
    },
    SerialNumberStatusChanged {
        serial_number: String,
        old_status: String,
        new_status: String,
    },

    // Inventory events
    InventoryAdjusted {
        product_id: Uuid,
        warehouse_id: Uuid,
        delta: i32,
        new_quantity: i32,
    },
    AssemblyCompleted {
        product_id: Uuid,
        warehouse_id: Uuid,
        quantity: i32,
    },
    DisassemblyCompleted {
        product_id: Uuid,
        warehouse_id: Uuid,
        quantity: i32,
    },

    // Shipment events
    ShipmentCreated {
        shipment_id: Uuid,
        order_id: Uuid,
        total_quantity: i32,
    },
    ShipmentShipped(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::ManufacturingOrderCreated { .. } => "manufacturing_order_created",
            Event::ManufacturingOrderStarted(_) => "manufacturing_order_started",
            Event::ManufacturingOrderPaused(_) => "manufacturing_order_paused",
            Event::ManufacturingOrderCompleted { .. } => "manufacturing_order_completed",
            Event::ManufacturingOrderCancelled(_) => "manufacturing_order_cancelled",
            Event::ManufacturingStepStarted { .. } => "manufacturing_step_started",
            Event::ManufacturingStepCompleted { .. } => "manufacturing_step_completed",
            Event::ManufacturingStepSkipped { .. } => "manufacturing_step_skipped",
            Event::SerialNumbersIssued { .. } => "serial_numbers_issued",
            Event::SerialNumberStatusChanged { .. } => "serial_number_status_changed",
            Event::InventoryAdjusted { .. } => "inventory_adjusted",
            Event::AssemblyCompleted { .. } => "assembly_completed",
            Event::DisassemblyCompleted { .. } => "disassembly_completed",
            Event::ShipmentCreated { .. } => "shipment_created",
            Event::ShipmentShipped(_) => "shipment_shipped",
            Event::OrderStatusChanged { .. } => "order_status_changed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the channel is closed.
    ///
    /// Events are published after commit, so a delivery failure must not
    /// surface as an operation failure.
    pub async fn send_or_log(&self, event: Event) {
        let name = event.name();
        if let Err(e) = self.send(event).await {
            warn!(event = name, error = %e, "Dropping event");
        }
    }
}

// Handlers implementing this trait process events asynchronously.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, event: &Event) -> Result<(), String>;
}

/// Logs every received event until all senders are dropped.
pub async fn process_events(rx: mpsc::Receiver<Event>) {
    process_events_with_handlers(rx, Vec::new()).await
}

/// Fans each received event out to every handler concurrently.
pub async fn process_events_with_handlers(
    mut rx: mpsc::Receiver<Event>,
    handlers: Vec<Arc<dyn EventHandler>>,
) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        info!(event = event.name(), "Received event: {:?}", event);

        let results = join_all(handlers.iter().map(|h| h.handle_event(&event))).await;
        for e in results.into_iter().filter_map(Result::err) {
            error!(event = event.name(), "Event handler failed: {}", e);
        }
    }

    info!("Event channel closed; stopping event processing");
}
