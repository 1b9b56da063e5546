use criterion::{Criterion, criterion_group, criterion_main};
use message_store::{
    AggregateStore, ChangeSet, InMemoryAggregateStore, InMemoryBroker, MessageEnvelope,
    PublishChannel,
};
use uuid::Uuid;

fn envelope() -> MessageEnvelope {
    MessageEnvelope::builder()
        .event_type("ProductAddedToCart")
        .aggregate_type("Cart")
        .aggregate_id(Uuid::new_v4())
        .payload_raw(serde_json::json!({"quantity": 2, "unit_price": {"cents": 999}}))
        .build()
        .unwrap()
}

fn bench_publish(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let broker = InMemoryBroker::new();
    rt.block_on(broker.bind("cart-summary"));
    let message = envelope();

    c.bench_function("broker_publish_single", |b| {
        b.to_async(&rt).iter(|| async {
            broker.publish(&message).await.unwrap();
        });
    });
}

fn bench_commit(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryAggregateStore::new();

    c.bench_function("commit_ten_outbox_messages", |b| {
        b.to_async(&rt).iter(|| async {
            let changes = ChangeSet {
                records: vec![],
                outbox: (0..10).map(|_| envelope()).collect(),
            };
            store.commit(changes).await.unwrap();
        });
    });
}

criterion_group!(benches, bench_publish, bench_commit);
criterion_main!(benches);
