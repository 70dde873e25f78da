//! Contract-level coverage of the `EventBus` trait: exercised once here
//! against the in-memory fake through `Arc<dyn EventBus>` exactly as
//! production code uses it, so the test doubles as a check that the trait
//! object is actually usable the way callers need it.

use std::sync::Arc;

use qos_pipeline::bus::{EventBus, InMemoryBus};

use crate::common::event;

async fn exercise_contract(bus: Arc<dyn EventBus>) {
    let ev = event("client-a", "example.com", 1_000);
    bus.publish(&ev).await.unwrap();

    let first = bus.fetch_next("agg").await.unwrap().expect("message available");
    assert_eq!(first.delivery_count, 1);
    assert_eq!(first.event.event_id, ev.event_id);

    bus.nack(&first.delivery_id).await.unwrap();

    let redelivered = bus.fetch_next("agg").await.unwrap().expect("redelivered message");
    assert_eq!(redelivered.delivery_count, 2);

    bus.dead_letter(&redelivered, "test dead-letter").await.unwrap();
    // Acking a delivery id that's already been dead-lettered must fail: it
    // is no longer in-flight.
    assert!(bus.ack(&redelivered.delivery_id).await.is_err());
}

#[tokio::test]
async fn in_memory_bus_satisfies_the_event_bus_contract() {
    exercise_contract(Arc::new(InMemoryBus::new())).await;
}
