//! ノード選択
//!
//! リクエストに応答するノードエージェントを決める。コンテナを保持するノード、
//! または正常ノードからランダムに選ぶ。

use crate::cluster::{Cluster, ContainerRecord, NodeSnapshot};
use fleet_common::{
    error::{RouterError, RouterResult},
    types::NodeInfo,
};
use rand::seq::SliceRandom;

/// リクエストに応答するノード
#[derive(Debug, Clone)]
pub struct Target {
    /// 接続先のエージェントアドレス
    pub addr: String,
    /// ノード識別情報
    pub node: NodeInfo,
}

/// 所属ノードとともに解決したコンテナ
#[derive(Debug, Clone)]
pub struct ContainerTarget {
    /// Owning node
    pub target: Target,
    /// Container record
    pub container: ContainerRecord,
}

/// `snapshots` のうち正常なもの（順序は維持）
pub fn filter_healthy(snapshots: &[NodeSnapshot]) -> Vec<&NodeSnapshot> {
    snapshots.iter().filter(|s| s.is_healthy()).collect()
}

/// 正常ノードから一様ランダムに1台選ぶ
pub fn pick_random_healthy(snapshots: &[NodeSnapshot]) -> RouterResult<&NodeSnapshot> {
    let healthy = filter_healthy(snapshots);
    healthy
        .choose(&mut rand::thread_rng())
        .copied()
        .ok_or(RouterError::NoHealthyNode)
}

/// クラスタビュー上のノードセレクタ
pub struct NodeSelector<'a> {
    cluster: &'a Cluster,
}

impl<'a> NodeSelector<'a> {
    /// Selector reading `cluster`
    pub fn new(cluster: &'a Cluster) -> Self {
        Self { cluster }
    }

    /// 任意の正常ノード
    pub async fn random_healthy(&self) -> RouterResult<Target> {
        let snapshots = self.cluster.snapshots().await;
        let chosen = pick_random_healthy(&snapshots)?;
        Ok(Target {
            addr: chosen.info.addr.clone(),
            node: chosen.info.clone(),
        })
    }

    /// コンテナ `reference`（ID、IDプレフィックス、名前、`node/name`）を保持するノード
    pub async fn container(&self, reference: &str) -> RouterResult<ContainerTarget> {
        let container = self
            .cluster
            .container(reference)
            .await
            .ok_or_else(|| RouterError::ContainerNotFound(reference.to_string()))?;
        self.owner(container).await
    }

    /// execインスタンス `exec_id` を持つコンテナのノード
    pub async fn exec(&self, exec_id: &str) -> RouterResult<ContainerTarget> {
        let container = self
            .cluster
            .container_by_exec_id(exec_id)
            .await
            .ok_or_else(|| RouterError::ExecNotFound(exec_id.to_string()))?;
        self.owner(container).await
    }

    async fn owner(&self, container: ContainerRecord) -> RouterResult<ContainerTarget> {
        let node = self
            .cluster
            .node(&container.node_id)
            .await
            .ok_or_else(|| RouterError::NodeNotFound(container.node_id.clone()))?;
        Ok(ContainerTarget {
            target: Target {
                addr: node.addr().to_string(),
                node: node.info().await,
            },
            container,
        })
    }
}
