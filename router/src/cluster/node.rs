//! ノード状態
//!
//! クラスタから見た1台のノードエージェント（識別情報、状態、最新のコンテナ・イメージ一覧）。
//! 可変状態はすべて1つのロックの内側にあり、スナップショットが2回のリフレッシュを混ぜることはない。

use crate::agent::AgentClient;
use fleet_common::{
    error::RouterResult,
    types::{ContainerSummary, ImageSummary, NodeHealth, NodeInfo},
};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// クラスタが追跡するコンテナ
///
/// 所属ノードはIDでのみ参照する（クラスタ経由で解決する）
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerRecord {
    /// コンテナを実行しているノードのID
    pub node_id: String,
    /// ノードが報告した一覧エントリ
    pub summary: ContainerSummary,
    /// inspectで得たexecインスタンス
    pub exec_ids: Vec<String>,
}

impl ContainerRecord {
    /// execインスタンスなしのレコード
    pub fn new(node_id: impl Into<String>, summary: ContainerSummary) -> Self {
        Self {
            node_id: node_id.into(),
            summary,
            exec_ids: Vec::new(),
        }
    }

    /// Engine-assigned container id
    pub fn id(&self) -> &str {
        &self.summary.id
    }
}

/// ノード状態の一貫したコピー
#[derive(Debug, Clone)]
pub struct NodeSnapshot {
    /// Identity
    pub info: NodeInfo,
    /// Health at snapshot time
    pub health: NodeHealth,
    /// Containers
    pub containers: Vec<ContainerRecord>,
    /// Images
    pub images: Vec<ImageSummary>,
}

impl NodeSnapshot {
    /// 直近のリフレッシュにノードが応答したか
    pub fn is_healthy(&self) -> bool {
        self.health == NodeHealth::Healthy
    }
}

#[derive(Debug)]
struct NodeState {
    info: NodeInfo,
    health: NodeHealth,
    containers: Vec<ContainerRecord>,
    images: Vec<ImageSummary>,
}

/// クラスタに参加するノードエージェント
#[derive(Debug)]
pub struct Node {
    addr: String,
    state: RwLock<NodeState>,
}

impl Node {
    /// `addr` の新規ノード（最初のリフレッシュ成功まではUnhealthy）
    pub fn new(addr: impl Into<String>) -> Self {
        let addr = addr.into();
        Self {
            state: RwLock::new(NodeState {
                info: NodeInfo::placeholder(&addr),
                health: NodeHealth::Unhealthy,
                containers: Vec::new(),
                images: Vec::new(),
            }),
            addr,
        }
    }

    /// Agent address
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Current identity
    pub async fn info(&self) -> NodeInfo {
        self.state.read().await.info.clone()
    }

    /// Current health
    pub async fn health(&self) -> NodeHealth {
        self.state.read().await.health
    }

    /// 1回の読み取りロックで全状態をコピー
    pub async fn snapshot(&self) -> NodeSnapshot {
        let state = self.state.read().await;
        NodeSnapshot {
            info: state.info.clone(),
            health: state.health,
            containers: state.containers.clone(),
            images: state.images.clone(),
        }
    }

    /// 状態を記録し、変化があればログに出す
    pub async fn set_health(&self, health: NodeHealth) {
        let mut state = self.state.write().await;
        if state.health != health {
            info!(
                node = %state.info.name,
                addr = %self.addr,
                health = ?health,
                "Node health changed"
            );
        }
        state.health = health;
    }

    /// 一覧を一度に置き換える
    pub async fn replace_inventory(
        &self,
        containers: Vec<ContainerRecord>,
        images: Vec<ImageSummary>,
    ) {
        let mut state = self.state.write().await;
        state.containers = containers;
        state.images = images;
    }

    /// エージェントから識別情報と一覧を取得する
    ///
    /// 失敗時は以前の一覧を残したままノードをUnhealthyにする。
    pub async fn refresh(&self, client: &AgentClient) -> RouterResult<()> {
        match self.fetch(client).await {
            Ok(()) => {
                self.set_health(NodeHealth::Healthy).await;
                Ok(())
            }
            Err(err) => {
                self.set_health(NodeHealth::Unhealthy).await;
                Err(err)
            }
        }
    }

    async fn fetch(&self, client: &AgentClient) -> RouterResult<()> {
        let info = client.info(&self.addr).await?.into_node_info(&self.addr);
        let summaries = client.list_containers(&self.addr).await?;
        let images = client.list_images(&self.addr).await?;

        let known: HashMap<String, Vec<String>> = {
            let state = self.state.read().await;
            state
                .containers
                .iter()
                .map(|record| (record.summary.id.clone(), record.exec_ids.clone()))
                .collect()
        };

        let mut containers = Vec::with_capacity(summaries.len());
        for summary in summaries {
            let exec_ids = match known.get(&summary.id) {
                Some(exec_ids) => exec_ids.clone(),
                None => match client.container_exec_ids(&self.addr, &summary.id).await {
                    Ok(exec_ids) => exec_ids.unwrap_or_default(),
                    Err(err) => {
                        warn!(
                            addr = %self.addr,
                            container_id = %summary.id,
                            error = %err,
                            "Failed to inspect new container"
                        );
                        Vec::new()
                    }
                },
            };
            containers.push(ContainerRecord {
                node_id: info.id.clone(),
                summary,
                exec_ids,
            });
        }

        let mut state = self.state.write().await;
        state.info = info;
        state.containers = containers;
        state.images = images;
        Ok(())
    }

    /// コンテナを1件再inspectし、前回のリフレッシュ以降に作成されたexecを解決可能にする。
    /// エージェントが既に知らないコンテナは一覧から外す。
    pub async fn refresh_container(
        &self,
        client: &AgentClient,
        container_id: &str,
    ) -> RouterResult<()> {
        let exec_ids = client.container_exec_ids(&self.addr, container_id).await?;
        let mut state = self.state.write().await;
        match exec_ids {
            Some(exec_ids) => {
                if let Some(record) = state
                    .containers
                    .iter_mut()
                    .find(|record| record.summary.id == container_id)
                {
                    record.exec_ids = exec_ids;
                }
            }
            None => state
                .containers
                .retain(|record| record.summary.id != container_id),
        }
        Ok(())
    }
}
