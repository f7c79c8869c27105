use std::sync::Once;
use std::time::Duration;

use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};
use reactive_engine::config::HubConfig;
use reactive_engine::session::serve;
use reactive_engine::{EngineError, Hub};
use tokio_test::{assert_pending, assert_ready_eq, task};

static INIT: Once = Once::new();

fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .try_init()
            .ok();
    });
}

fn event(n: u32) -> String {
    format!("e{n}")
}

#[tokio::test]
async fn test_late_subscriber_gets_replay_then_live() {
    init_tracing();

    let hub = Hub::new(5, 16);
    for n in 1..=7 {
        hub.publish(event(n));
    }

    let mut late = hub.subscribe();
    let mut replayed = Vec::new();
    while let Some(e) = late.try_recv() {
        replayed.push(e);
    }
    assert_eq!(replayed, vec!["e3", "e4", "e5", "e6", "e7"]);
    assert_eq!(hub.replay_snapshot(), replayed);

    hub.publish(event(8));
    assert_eq!(late.recv().await.as_deref(), Some("e8"));
    assert_eq!(late.dropped(), 0);
    assert_eq!(hub.published(), 8);
}

#[tokio::test]
async fn test_replay_of_short_history() {
    let hub = Hub::new(5, 16);
    hub.publish(event(1));
    hub.publish(event(2));

    let mut subscription = hub.subscribe();
    assert_eq!(subscription.try_recv().as_deref(), Some("e1"));
    assert_eq!(subscription.try_recv().as_deref(), Some("e2"));
    assert_eq!(subscription.try_recv(), None);
}

#[tokio::test]
async fn test_zero_replay_starts_at_live_events() {
    let hub = Hub::new(0, 8);
    hub.publish(event(1));

    let mut subscription = hub.subscribe();
    assert_eq!(subscription.try_recv(), None);
    hub.publish(event(2));
    assert_eq!(subscription.try_recv().as_deref(), Some("e2"));
}

#[tokio::test]
async fn test_slow_subscriber_loses_only_its_own_events() {
    init_tracing();

    let hub = Hub::from_config(&HubConfig { replay: 0, backlog: 4 });
    let mut fast = hub.subscribe();
    let mut slow = hub.subscribe();

    let mut fast_seen = Vec::new();
    for n in 1..=10 {
        hub.publish(event(n));
        fast_seen.push(fast.try_recv().unwrap());
    }

    let mut slow_seen = Vec::new();
    while let Some(e) = slow.try_recv() {
        slow_seen.push(e);
    }

    assert_eq!(fast_seen.len(), 10);
    assert_eq!(fast.dropped(), 0);
    assert_eq!(slow_seen, vec!["e7", "e8", "e9", "e10"]);
    assert_eq!(slow.dropped(), 6);
}

#[tokio::test]
async fn test_dropping_subscription_releases_it() {
    init_tracing();

    let hub: Hub<String> = Hub::new(5, 16);
    let first = hub.subscribe();
    let second = hub.subscribe();
    assert_ne!(first.id(), second.id());
    assert_eq!(hub.subscriber_count(), 2);

    drop(first);
    assert_eq!(hub.subscriber_count(), 1);
    drop(second);
    assert_eq!(hub.subscriber_count(), 0);
}

#[tokio::test]
async fn test_recv_waits_for_publish() {
    init_tracing();

    let hub = Hub::new(5, 16);
    let mut subscription = hub.subscribe();

    let publisher = hub.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        publisher.publish(event(1));
    });

    let received = tokio::time::timeout(Duration::from_secs(5), subscription.recv())
        .await
        .expect("event should arrive");
    assert_eq!(received.as_deref(), Some("e1"));
}

#[test]
fn test_pending_recv_is_woken_by_publish() {
    let hub = Hub::new(5, 16);
    let mut subscription = hub.subscribe();

    let mut next = task::spawn(subscription.recv());
    assert_pending!(next.poll());

    hub.publish(event(1));
    assert!(next.is_woken());
    assert_ready_eq!(next.poll(), Some(event(1)));
}

#[tokio::test]
async fn test_subscription_ends_after_hub_is_gone() {
    let hub = Hub::new(5, 16);
    let subscription = hub.subscribe();
    hub.publish(event(1));
    hub.publish(event(2));
    drop(hub);

    let rest: Vec<String> = subscription.into_stream().collect().await;
    assert_eq!(rest, vec!["e1", "e2"]);
}

#[tokio::test]
async fn test_session_bridges_client_and_hub() {
    init_tracing();

    let hub = Hub::new(5, 64);
    hub.publish("welcome".to_string());
    let mut observer = hub.subscribe();
    assert_eq!(observer.try_recv().as_deref(), Some("welcome"));

    let (mut to_server, incoming) = mpsc::unbounded::<String>();
    let (outgoing, mut from_server) = mpsc::channel::<String>(16);
    let session = tokio::spawn(serve(hub.clone(), incoming, outgoing));

    assert_eq!(from_server.next().await.as_deref(), Some("welcome"));
    to_server.send("hello".to_string()).await.unwrap();
    assert_eq!(from_server.next().await.as_deref(), Some("hello"));
    assert_eq!(observer.recv().await.as_deref(), Some("hello"));

    drop(to_server);
    let stats = session.await.unwrap().unwrap();
    assert_eq!(stats.received, 1);
    assert_eq!(stats.sent, 2);
    assert_eq!(hub.subscriber_count(), 1);
}

#[tokio::test]
async fn test_session_ends_when_client_unreachable() {
    init_tracing();

    let hub = Hub::new(5, 64);
    hub.publish("welcome".to_string());

    let (_to_server, incoming) = mpsc::unbounded::<String>();
    let (outgoing, from_server) = mpsc::channel::<String>(16);
    drop(from_server);

    let served = serve(hub.clone(), incoming, outgoing).await;
    assert!(matches!(served, Err(EngineError::SubscriberUnreachable(_))));
    assert_eq!(hub.subscriber_count(), 0);

    hub.publish("still here".to_string());
    assert_eq!(hub.published(), 2);
}

#[tokio::test]
async fn test_huge_replay_allocates_only_what_is_published() {
    let hub = Hub::new(usize::MAX, 1);
    hub.publish(event(1));
    hub.publish(event(2));

    let mut subscription = hub.subscribe();
    assert_eq!(subscription.try_recv().as_deref(), Some("e1"));
    assert_eq!(subscription.try_recv().as_deref(), Some("e2"));
    assert_eq!(hub.replay_snapshot(), vec!["e1", "e2"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_subscribers_joining_during_publishing_see_contiguous_events() {
    init_tracing();

    const EVENTS: u64 = 20_000;
    let hub = Hub::<u64>::new(5, EVENTS as usize);

    let publisher = hub.clone();
    let producer = tokio::spawn(async move {
        for n in 0..EVENTS {
            publisher.publish(n);
            if n % 500 == 0 {
                tokio::task::yield_now().await;
            }
        }
    });

    let mut readers = Vec::new();
    for _ in 0..4 {
        let mut subscription = hub.subscribe();
        readers.push(tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(n) = subscription.recv().await {
                seen.push(n);
            }
            (seen, subscription.dropped())
        }));
        tokio::task::yield_now().await;
    }

    producer.await.unwrap();
    drop(hub);

    for reader in readers {
        let (seen, dropped) = reader.await.unwrap();
        assert_eq!(dropped, 0);
        assert!(!seen.is_empty());
        assert_eq!(seen.last(), Some(&(EVENTS - 1)));
        assert!(seen.windows(2).all(|pair| pair[1] == pair[0] + 1), "gap in {:?}..", &seen[..5.min(seen.len())]);
    }
}
