//! ノードイベント監視
//!
//! ノードごとに1タスクがエージェントの `/events` を購読し、ノード識別情報を付けて
//! ハブへ再配信したうえでノードをリフレッシュする。

use super::{Cluster, Node};
use crate::events::EventsHub;
use bytes::{Buf, BytesMut};
use fleet_common::protocol::Event;
use futures::StreamExt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

/// 切断されたイベントストリームを再接続するまでの待ち時間
const RECONNECT_DELAY_SECS: u64 = 5;

/// 現在クラスタにある各ノードの監視タスクを起動
pub async fn spawn_watchers(cluster: &Cluster, hub: &EventsHub) -> Vec<JoinHandle<()>> {
    cluster
        .nodes()
        .await
        .into_iter()
        .map(|node| {
            let cluster = cluster.clone();
            let hub = hub.clone();
            tokio::spawn(async move { watch_node(cluster, hub, node).await })
        })
        .collect()
}

async fn watch_node(cluster: Cluster, hub: EventsHub, node: Arc<Node>) {
    loop {
        match follow_events(&cluster, &hub, &node).await {
            Ok(()) => info!(addr = %node.addr(), "Node event stream closed"),
            Err(err) => warn!(addr = %node.addr(), error = %err, "Node event stream failed"),
        }
        sleep(Duration::from_secs(RECONNECT_DELAY_SECS)).await;
    }
}

async fn follow_events(
    cluster: &Cluster,
    hub: &EventsHub,
    node: &Node,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let response = cluster.client().events(node.addr()).await?;
    debug!(addr = %node.addr(), "Following node events");

    let mut stream = response.bytes_stream();
    let mut buffer = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        buffer.extend_from_slice(&chunk?);
        for mut event in drain_events(&mut buffer)? {
            event.node = Some(node.info().await);
            hub.handle(&event).await;
            if let Err(err) = cluster.refresh_node(node).await {
                warn!(addr = %node.addr(), error = %err, "Refresh after event failed");
            }
        }
    }
    Ok(())
}

/// `buffer` 先頭の完全なイベントをすべてデコードし、途中までのオブジェクトは残す
pub fn drain_events(buffer: &mut BytesMut) -> Result<Vec<Event>, serde_json::Error> {
    let mut events = Vec::new();
    let mut stream = serde_json::Deserializer::from_slice(&buffer[..]).into_iter::<Event>();
    let consumed = loop {
        match stream.next() {
            Some(Ok(event)) => events.push(event),
            Some(Err(err)) if err.is_eof() => break stream.byte_offset(),
            Some(Err(err)) => return Err(err),
            None => break stream.byte_offset(),
        }
    };
    buffer.advance(consumed);
    Ok(events)
}
