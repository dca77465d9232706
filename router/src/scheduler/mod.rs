//! スケジューラ
//!
//! 新しいコンテナを正常ノードのいずれかにランダム配置し、削除は保持ノードで行う

use crate::{
    balancer::pick_random_healthy,
    cluster::{Cluster, ContainerRecord},
};
use fleet_common::{
    error::{RouterError, RouterResult},
    types::ContainerConfig,
};
use tracing::{info, warn};

/// Scheduler
#[derive(Clone)]
pub struct Scheduler {
    cluster: Cluster,
}

impl Scheduler {
    /// `cluster` にコンテナを配置するスケジューラ
    pub fn new(cluster: Cluster) -> Self {
        Self { cluster }
    }

    /// ランダムに選んだ正常ノードでコンテナを作成し、そのIDを返す
    pub async fn create_container(
        &self,
        config: &ContainerConfig,
        name: &str,
    ) -> RouterResult<String> {
        let snapshots = self.cluster.snapshots().await;
        let chosen = pick_random_healthy(&snapshots)?;
        let addr = chosen.info.addr.clone();
        let node_name = chosen.info.name.clone();

        let created = self
            .cluster
            .client()
            .create_container(&addr, config, name)
            .await?;
        info!(
            container_id = %created.id,
            name = %name,
            image = %config.image,
            node = %node_name,
            "Container created"
        );

        self.refresh(&addr).await;
        Ok(created.id)
    }

    /// `container` を所属ノードから削除
    pub async fn remove_container(
        &self,
        container: &ContainerRecord,
        force: bool,
    ) -> RouterResult<()> {
        let node = self
            .cluster
            .node(&container.node_id)
            .await
            .ok_or_else(|| RouterError::NodeNotFound(container.node_id.clone()))?;

        self.cluster
            .client()
            .remove_container(node.addr(), container.id(), force)
            .await?;
        info!(
            container_id = %container.id(),
            force = force,
            node_id = %container.node_id,
            "Container removed"
        );

        self.refresh(node.addr()).await;
        Ok(())
    }

    async fn refresh(&self, addr: &str) {
        if let Some(node) = self.cluster.node(addr).await {
            if let Err(err) = self.cluster.refresh_node(&node).await {
                warn!(addr = %addr, error = %err, "Failed to refresh node after mutation");
            }
        }
    }
}
