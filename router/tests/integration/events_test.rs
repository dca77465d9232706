//! 統合テスト: エージェントのイベントがノード情報付きで `/events` クライアントに届く

use std::time::Duration;

use crate::support::{agent::FakeAgent, fleet::spawn_fleet};
use futures::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};

#[tokio::test]
async fn test_agent_events_reach_listeners() {
    let alpha = FakeAgent::start("ALPHA", "node-a").await;
    alpha.add_container("a1a1a1a1", "web", "Up 1 minute", 100);
    let fleet = spawn_fleet(&[&alpha]).await;
    alpha.wait_for_subscribers(1).await;

    let response = Client::new()
        .get(fleet.server.url("/events"))
        .send()
        .await
        .unwrap();
    assert_eq!(fleet.state.events.size().await, 1);

    alpha.emit(json!({"status": "die", "id": "a1a1a1a1", "from": "busybox", "time": 42}));

    let mut body = response.bytes_stream();
    let chunk = tokio::time::timeout(Duration::from_secs(5), body.next())
        .await
        .expect("no event within 5s")
        .unwrap()
        .unwrap();
    let event: Value = serde_json::from_slice(&chunk).unwrap();
    assert_eq!(event["status"], "die");
    assert_eq!(event["id"], "a1a1a1a1");
    assert_eq!(event["time"], 42);
    assert_eq!(event["node"]["Name"], "node-a");
    assert_eq!(event["node"]["Addr"], alpha.addr());

    let info: Value = Client::new()
        .get(fleet.server.url("/info"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(info["NEventsListener"], 1);
}

#[tokio::test]
async fn test_event_refreshes_node_inventory() {
    let alpha = FakeAgent::start("ALPHA", "node-a").await;
    let fleet = spawn_fleet(&[&alpha]).await;
    alpha.wait_for_subscribers(1).await;
    assert!(fleet.state.cluster.container("late").await.is_none());

    alpha.add_container("c4c4c4c4", "late", "Up 1 second", 300);
    alpha.emit(json!({"status": "start", "id": "c4c4c4c4", "from": "busybox", "time": 43}));

    for _ in 0..100 {
        if fleet.state.cluster.container("late").await.is_some() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("container started on the agent never showed up");
}
