//! クラスタビュー
//!
//! 設定されたノードエージェントの読み取りモデル。ハンドラーは参照するだけで、
//! ノード状態はリフレッシュとイベントによって更新される。

mod node;
pub mod watch;

pub use node::{ContainerRecord, Node, NodeSnapshot};

use crate::agent::AgentClient;
use fleet_common::error::{RouterError, RouterResult};
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// クラスタビュー
#[derive(Clone)]
pub struct Cluster {
    nodes: Arc<RwLock<Vec<Arc<Node>>>>,
    client: AgentClient,
}

impl Cluster {
    /// `client` でノードエージェントに接続する空のクラスタを作成
    pub fn new(client: AgentClient) -> Self {
        Self {
            nodes: Arc::new(RwLock::new(Vec::new())),
            client,
        }
    }

    /// Agent client shared with the scheduler
    pub fn client(&self) -> &AgentClient {
        &self.client
    }

    /// ノードエージェントを追加（既知のアドレスなら既存ノードを返す）
    pub async fn add_node(&self, addr: &str) -> Arc<Node> {
        let mut nodes = self.nodes.write().await;
        if let Some(existing) = nodes.iter().find(|node| node.addr() == addr) {
            return existing.clone();
        }
        info!(addr = %addr, "Adding node to cluster");
        let node = Arc::new(Node::new(addr));
        nodes.push(node.clone());
        node
    }

    /// 登録順のノード一覧
    pub async fn nodes(&self) -> Vec<Arc<Node>> {
        self.nodes.read().await.clone()
    }

    /// ノードごとの一貫したスナップショット（登録順）
    pub async fn snapshots(&self) -> Vec<NodeSnapshot> {
        let nodes = self.nodes().await;
        let mut snapshots = Vec::with_capacity(nodes.len());
        for node in nodes {
            snapshots.push(node.snapshot().await);
        }
        snapshots
    }

    /// エンジンIDでノードを取得（識別情報が未取得ならアドレスで）
    pub async fn node(&self, id: &str) -> Option<Arc<Node>> {
        for node in self.nodes().await {
            if node.addr() == id || node.info().await.id == id {
                return Some(node);
            }
        }
        None
    }

    /// クラスタ内の全コンテナ
    pub async fn containers(&self) -> Vec<ContainerRecord> {
        self.snapshots()
            .await
            .into_iter()
            .flat_map(|snapshot| snapshot.containers)
            .collect()
    }

    /// コンテナ参照（ID、IDプレフィックス、名前、`node/name`）を解決
    pub async fn container(&self, reference: &str) -> Option<ContainerRecord> {
        let snapshots = self.snapshots().await;
        find_container(&snapshots, reference).cloned()
    }

    /// execインスタンス `exec_id` を持つコンテナ
    pub async fn container_by_exec_id(&self, exec_id: &str) -> Option<ContainerRecord> {
        self.snapshots()
            .await
            .into_iter()
            .flat_map(|snapshot| snapshot.containers)
            .find(|record| record.exec_ids.iter().any(|id| id == exec_id))
    }

    /// 1ノードをエージェントからリフレッシュ
    pub async fn refresh_node(&self, node: &Node) -> RouterResult<()> {
        node.refresh(&self.client).await
    }

    /// 全ノードを並行してリフレッシュ（失敗は当該ノードにのみ影響）
    pub async fn refresh_all(&self) {
        let nodes = self.nodes().await;
        let results = join_all(nodes.iter().map(|node| node.refresh(&self.client))).await;
        for (node, result) in nodes.iter().zip(results) {
            if let Err(err) = result {
                warn!(addr = %node.addr(), error = %err, "Node refresh failed");
            }
        }
    }

    /// コンテナを所属ノードで即座に再inspect
    pub async fn force_refresh_container(
        &self,
        node_id: &str,
        container_id: &str,
    ) -> RouterResult<()> {
        debug!(node_id = %node_id, container_id = %container_id, "Force refreshing container");
        let node = self
            .node(node_id)
            .await
            .ok_or_else(|| RouterError::NodeNotFound(node_id.to_string()))?;
        node.refresh_container(&self.client, container_id).await
    }
}

/// スナップショットに対してコンテナ参照を解決する
///
/// 優先順位: 完全なID、コンテナ名、`node/name`、最後に1件だけ一致するIDプレフィックス
pub fn find_container<'a>(
    snapshots: &'a [NodeSnapshot],
    reference: &str,
) -> Option<&'a ContainerRecord> {
    if reference.is_empty() {
        return None;
    }
    let all = || snapshots.iter().flat_map(|snapshot| snapshot.containers.iter());

    if let Some(record) = all().find(|record| record.summary.id == reference) {
        return Some(record);
    }
    if let Some(record) = all().find(|record| record.summary.has_name(reference)) {
        return Some(record);
    }
    if let Some((node_ref, name)) = reference.trim_start_matches('/').split_once('/') {
        let scoped = snapshots
            .iter()
            .filter(|snapshot| snapshot.info.matches(node_ref))
            .flat_map(|snapshot| snapshot.containers.iter())
            .find(|record| record.summary.has_name(name));
        if scoped.is_some() {
            return scoped;
        }
    }

    let mut prefixed = all().filter(|record| record.summary.id.starts_with(reference));
    match (prefixed.next(), prefixed.next()) {
        (Some(record), None) => Some(record),
        _ => None,
    }
}
