use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use outboxed::{
    impl_aggregate_root, Command, Context, DomainEvent, EventBuffer, Handler, HandlerError,
    InMemoryStore, Query, Record,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLine {
    pub sku: String,
    pub quantity: u32,
    pub unit_price_cents: u32,
}

pub fn line(sku: &str, quantity: u32, unit_price_cents: u32) -> OrderLine {
    OrderLine {
        sku: sku.into(),
        quantity,
        unit_price_cents,
    }
}

/// Order aggregate. Persisted as a row of the `orders` table.
#[derive(Debug, Serialize, Deserialize, Record)]
#[record(table = "orders")]
pub struct Order {
    pub id: String,
    pub customer_id: String,
    pub lines: Vec<OrderLine>,
    pub total_cents: u32,
    #[serde(skip)]
    events: EventBuffer,
}

impl_aggregate_root!(Order, events);

impl Order {
    pub fn create(
        id: String,
        customer_id: String,
        lines: Vec<OrderLine>,
    ) -> Result<Self, HandlerError> {
        if lines.is_empty() {
            return Err(HandlerError::Rejected("order has no lines".into()));
        }
        if lines.iter().any(|line| line.quantity == 0) {
            return Err(HandlerError::Rejected("line quantity must be positive".into()));
        }

        let total_cents = lines
            .iter()
            .map(|line| line.quantity * line.unit_price_cents)
            .sum();
        let mut order = Order {
            id,
            customer_id,
            lines,
            total_cents,
            events: EventBuffer::new(),
        };
        order.events.raise(OrderCreated {
            order_id: order.id.clone(),
            customer_id: order.customer_id.clone(),
            total_cents,
        });
        Ok(order)
    }
}

/// Written by event handlers inside the command's transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Record)]
#[record(table = "audit")]
pub struct AuditEntry {
    #[record(id)]
    pub order_id: String,
    pub note: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Command)]
#[message(name = "CreateOrder", output = String)]
pub struct CreateOrder {
    pub order_id: String,
    pub customer_id: String,
    pub lines: Vec<OrderLine>,
}

pub fn create_order(order_id: &str) -> CreateOrder {
    CreateOrder {
        order_id: order_id.into(),
        customer_id: "customer-1".into(),
        lines: vec![line("WIDGET-001", 2, 1250), line("GADGET-007", 1, 4999)],
    }
}

/// Same as `CreateOrder` but stalls after staging, to exercise deadlines.
#[derive(Debug, Clone, Serialize, Deserialize, Command)]
#[message(name = "SlowCreateOrder", output = String)]
pub struct SlowCreateOrder {
    pub order_id: String,
    pub stall: Duration,
}

/// Imports an order whose events are best-effort: the handler keeps the
/// order even when an event handler refuses it.
#[derive(Debug, Clone, Serialize, Deserialize, Command)]
#[message(name = "ImportOrder", output = String)]
pub struct ImportOrder {
    pub order_id: String,
}

/// Never registered with any dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize, Command)]
#[message(name = "CancelOrder")]
pub struct CancelOrder {
    pub order_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderView {
    pub id: String,
    pub customer_id: String,
    pub total_cents: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Query)]
#[message(name = "GetOrder", output = Option<OrderView>)]
pub struct GetOrder {
    pub order_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, DomainEvent)]
#[message(name = "OrderCreated")]
pub struct OrderCreated {
    pub order_id: String,
    pub customer_id: String,
    pub total_cents: u32,
}

/// Never registered in the type registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, DomainEvent)]
#[message(name = "OrderShipped")]
pub struct OrderShipped {
    pub order_id: String,
}

pub struct CreateOrderHandler;

#[async_trait]
impl Handler<CreateOrder> for CreateOrderHandler {
    async fn handle(&self, ctx: &mut Context, cmd: &CreateOrder) -> Result<String, HandlerError> {
        let mut order = Order::create(
            cmd.order_id.clone(),
            cmd.customer_id.clone(),
            cmd.lines.clone(),
        )?;
        ctx.stage(&order)?;
        ctx.publish_from(&mut order).await?;
        Ok(order.id)
    }
}

pub struct SlowCreateOrderHandler;

#[async_trait]
impl Handler<SlowCreateOrder> for SlowCreateOrderHandler {
    async fn handle(
        &self,
        ctx: &mut Context,
        cmd: &SlowCreateOrder,
    ) -> Result<String, HandlerError> {
        let mut order = Order::create(
            cmd.order_id.clone(),
            "customer-slow".into(),
            vec![line("SLOW-1", 1, 100)],
        )?;
        ctx.stage(&order)?;
        ctx.publish_from(&mut order).await?;
        tokio::time::sleep(cmd.stall).await;
        Ok(order.id)
    }
}

pub struct ImportOrderHandler;

#[async_trait]
impl Handler<ImportOrder> for ImportOrderHandler {
    async fn handle(&self, ctx: &mut Context, cmd: &ImportOrder) -> Result<String, HandlerError> {
        let mut order = Order::create(
            cmd.order_id.clone(),
            "customer-import".into(),
            vec![line("IMPORT-1", 1, 500)],
        )?;
        ctx.stage(&order)?;
        if let Err(error) = ctx.publish_from(&mut order).await {
            tracing::warn!(%error, order_id = %order.id, "import kept without its events");
        }
        Ok(order.id)
    }
}

pub struct GetOrderHandler {
    pub store: InMemoryStore,
}

#[async_trait]
impl Handler<GetOrder> for GetOrderHandler {
    async fn handle(
        &self,
        _ctx: &mut Context,
        query: &GetOrder,
    ) -> Result<Option<OrderView>, HandlerError> {
        let order = self.store.get::<Order>(&query.order_id)?;
        Ok(order.map(|order| OrderView {
            id: order.id,
            customer_id: order.customer_id,
            total_cents: order.total_cents,
        }))
    }
}

/// Appends its label to a shared log on every `OrderCreated`.
pub struct Recorder {
    pub label: &'static str,
    pub log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Handler<OrderCreated> for Recorder {
    async fn handle(&self, _ctx: &mut Context, event: &OrderCreated) -> Result<(), HandlerError> {
        self.log
            .lock()
            .unwrap()
            .push(format!("{}:{}", self.label, event.order_id));
        Ok(())
    }
}

/// Rejects every `OrderCreated`.
pub struct RejectOrderCreated;

#[async_trait]
impl Handler<OrderCreated> for RejectOrderCreated {
    async fn handle(&self, _ctx: &mut Context, event: &OrderCreated) -> Result<(), HandlerError> {
        Err(HandlerError::Rejected(format!(
            "customer {} is blocked",
            event.customer_id
        )))
    }
}

/// Writes an audit row in the transaction of whoever notified the event.
pub struct AuditOrderCreated;

#[async_trait]
impl Handler<OrderCreated> for AuditOrderCreated {
    async fn handle(&self, ctx: &mut Context, event: &OrderCreated) -> Result<(), HandlerError> {
        ctx.stage(&AuditEntry {
            order_id: event.order_id.clone(),
            note: format!("created for {} cents", event.total_cents),
        })
    }
}
