//! Orders service wired to the outbox, with a relay logging what it publishes.
//!
//! Run with `RUST_LOG=info,outboxed=debug` to see the pipeline at work.

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use outboxed::{
    async_trait, impl_aggregate_root, Command, Context, Dispatcher, DomainEvent, EventBuffer,
    Handler, HandlerError, InMemoryStore, LogBroker, OutboxRelay, Record, RelayConfig,
    TypeRegistry,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Record)]
#[record(table = "orders")]
struct Order {
    id: String,
    customer_id: String,
    total_cents: u32,
    #[serde(skip)]
    events: EventBuffer,
}

impl_aggregate_root!(Order, events);

#[derive(Debug, Clone, Serialize, Deserialize, Command)]
#[message(name = "PlaceOrder", output = String)]
struct PlaceOrder {
    order_id: String,
    customer_id: String,
    total_cents: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, DomainEvent)]
#[message(name = "OrderPlaced")]
struct OrderPlaced {
    order_id: String,
    total_cents: u32,
}

struct PlaceOrderHandler;

#[async_trait]
impl Handler<PlaceOrder> for PlaceOrderHandler {
    async fn handle(&self, ctx: &mut Context, cmd: &PlaceOrder) -> Result<String, HandlerError> {
        if cmd.total_cents == 0 {
            return Err(HandlerError::Rejected("empty order".into()));
        }
        let mut order = Order {
            id: cmd.order_id.clone(),
            customer_id: cmd.customer_id.clone(),
            total_cents: cmd.total_cents,
            events: EventBuffer::new(),
        };
        order.events.raise(OrderPlaced {
            order_id: order.id.clone(),
            total_cents: order.total_cents,
        });

        ctx.stage(&order)?;
        ctx.publish_from(&mut order).await?;
        Ok(order.id)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = InMemoryStore::new();
    let registry = Arc::new(
        TypeRegistry::new()
            .register::<PlaceOrder>()?
            .register::<OrderPlaced>()?,
    );

    let dispatcher = Dispatcher::builder()
        .with_tracing()
        .with_outbox(store.clone(), registry.clone())
        .command::<PlaceOrder, _>(PlaceOrderHandler)
        .event::<OrderPlaced>()
        .build()?;

    let config = RelayConfig::from_env()?.with_poll_interval(Duration::from_millis(200));
    let relay = OutboxRelay::new(store.clone(), LogBroker::new(), registry)
        .with_config(config)
        .spawn();

    for (i, total_cents) in [1999, 0, 4500].into_iter().enumerate() {
        let cmd = PlaceOrder {
            order_id: format!("order-{}", i + 1),
            customer_id: "customer-1".into(),
            total_cents,
        };
        match dispatcher.dispatch(cmd).await {
            Ok(id) => println!("placed {}", id),
            Err(err) => println!("refused: {}", err),
        }
    }

    tokio::time::sleep(Duration::from_millis(500)).await;
    let stats = relay.stop().await?;

    println!(
        "relay ran {} cycles and published {} messages",
        stats.cycles, stats.published
    );
    for row in store.outbox_rows()? {
        println!(
            "{} {} processed={}",
            row.event_type, row.id, row.processed
        );
    }
    Ok(())
}
