//! ハートビートモニター
//!
//! 定期的に全ノードをリフレッシュし、イベントが届かない間も状態と一覧を最新に保つ

use crate::cluster::Cluster;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info};

/// ハートビートモニター
pub struct HealthMonitor {
    cluster: Cluster,
    heartbeat_secs: u64,
}

impl HealthMonitor {
    /// `heartbeat_secs` 秒ごとに `cluster` をリフレッシュするモニターを作成
    pub fn new(cluster: Cluster, heartbeat_secs: u64) -> Self {
        Self {
            cluster,
            heartbeat_secs: heartbeat_secs.max(1),
        }
    }

    /// バックグラウンドで監視を開始
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.monitor_loop().await;
        })
    }

    async fn monitor_loop(&self) {
        let mut timer = interval(Duration::from_secs(self.heartbeat_secs));
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(heartbeat_secs = self.heartbeat_secs, "Heartbeat monitor started");

        // 初回tickは即時。起動時に一度リフレッシュ済み
        timer.tick().await;
        loop {
            timer.tick().await;
            self.check_nodes().await;
        }
    }

    async fn check_nodes(&self) {
        self.cluster.refresh_all().await;
        let snapshots = self.cluster.snapshots().await;
        let healthy = snapshots.iter().filter(|s| s.is_healthy()).count();
        debug!(
            nodes = snapshots.len(),
            healthy = healthy,
            "Heartbeat refresh completed"
        );
    }
}
