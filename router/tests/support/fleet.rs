//! バイナリと同じ構成のルーターを実ノードエージェント上で起動する

use fleet_router::{
    agent::AgentClient,
    cluster::{watch, Cluster},
    events::EventsHub,
    proxy::ProxyEngine,
    scheduler::Scheduler,
    AppState,
};

use super::{
    agent::FakeAgent,
    http::{spawn_fleet_server, TestServer},
};

/// 起動中のルーターとその状態
pub struct TestFleet {
    /// APIサーバー
    pub server: TestServer,
    /// 共有状態（クラスタビュー、イベントハブ）
    pub state: AppState,
}

/// `agents` を管理するルーターをイベント監視付きで起動する
pub async fn spawn_fleet(agents: &[&FakeAgent]) -> TestFleet {
    let cluster = Cluster::new(AgentClient::new(None).unwrap());
    for agent in agents {
        cluster.add_node(&agent.addr()).await;
    }
    cluster.refresh_all().await;

    let events = EventsHub::new();
    watch::spawn_watchers(&cluster, &events).await;
    serve_cluster(cluster, events).await
}

/// 構築済みの `cluster` でルーターを起動する
pub async fn serve_cluster(cluster: Cluster, events: EventsHub) -> TestFleet {
    let client = cluster.client().clone();
    let state = AppState {
        scheduler: Scheduler::new(cluster.clone()),
        proxy: ProxyEngine::new(client, None),
        cluster,
        events,
        debug: false,
        cors: false,
        version: "test".to_string(),
    };
    TestFleet {
        server: spawn_fleet_server(state.clone()).await,
        state,
    }
}
