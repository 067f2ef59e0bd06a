//! Shared test domain: an Orders service built on the outbox pipeline.
#![allow(dead_code)]

pub mod brokers;
pub mod orders;

use std::sync::Arc;

use outboxed::{Dispatcher, DispatcherBuilder, InMemoryStore, TypeRegistry};

use orders::{
    CreateOrder, CreateOrderHandler, GetOrder, GetOrderHandler, ImportOrder, ImportOrderHandler,
    OrderCreated, SlowCreateOrder, SlowCreateOrderHandler,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Registry holding every message type the Orders service writes to the
/// outbox.
pub fn registry() -> Arc<TypeRegistry> {
    Arc::new(
        TypeRegistry::new()
            .register::<CreateOrder>()
            .and_then(|r| r.register::<SlowCreateOrder>())
            .and_then(|r| r.register::<ImportOrder>())
            .and_then(|r| r.register::<OrderCreated>())
            .unwrap(),
    )
}

/// Builder with the outbox installed and the standard Orders handlers.
pub fn orders_builder(store: &InMemoryStore) -> DispatcherBuilder {
    Dispatcher::builder()
        .with_tracing()
        .with_outbox(store.clone(), registry())
        .command::<CreateOrder, _>(CreateOrderHandler)
        .command::<SlowCreateOrder, _>(SlowCreateOrderHandler)
        .command::<ImportOrder, _>(ImportOrderHandler)
        .query::<GetOrder, _>(GetOrderHandler {
            store: store.clone(),
        })
        .event::<OrderCreated>()
}

pub fn orders_dispatcher(store: &InMemoryStore) -> Dispatcher {
    orders_builder(store).build().unwrap()
}
