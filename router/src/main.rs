//! Fleet Router Server Entry Point
//!
//! ノードエージェントへのクラスタAPIを提供するサーバー

use clap::Parser;
use fleet_common::error::{RouterError, RouterResult};
use fleet_router::{
    agent::AgentClient,
    cli::Cli,
    cluster::{watch, Cluster},
    config::{get_env_flag, ManagerConfig},
    events::EventsHub,
    health::HealthMonitor,
    logging,
    proxy::ProxyEngine,
    scheduler::Scheduler,
    server, tls, AppState,
};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let debug = cli.debug || get_env_flag("FLEET_DEBUG", "SWARM_DEBUG");
    if let Err(err) = logging::init(debug) {
        eprintln!("Failed to initialize logging: {}", err);
        std::process::exit(1);
    }

    if let Err(err) = run(cli).await {
        error!("{}", err);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> RouterResult<()> {
    let config = ManagerConfig::resolve(&cli)?;
    info!("Fleet Router v{}", env!("CARGO_PKG_VERSION"));

    let tls = tls::load_client_config(&config.tls)?;
    let client = AgentClient::new(tls.clone())?;

    let cluster = Cluster::new(client.clone());
    for addr in &config.nodes {
        cluster.add_node(addr).await;
    }
    cluster.refresh_all().await;
    let healthy = cluster
        .snapshots()
        .await
        .iter()
        .filter(|snapshot| snapshot.is_healthy())
        .count();
    info!(
        "Cluster initialized: {}/{} nodes healthy",
        healthy,
        config.nodes.len()
    );

    let events = EventsHub::new();
    HealthMonitor::new(cluster.clone(), config.heartbeat_secs).start();
    watch::spawn_watchers(&cluster, &events).await;

    let state = AppState {
        scheduler: Scheduler::new(cluster.clone()),
        proxy: ProxyEngine::new(client, tls),
        cluster,
        events,
        debug: config.debug,
        cors: config.cors,
        version: env!("CARGO_PKG_VERSION").to_string(),
    };
    let bind_addr = config.listen_addr();
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| RouterError::Config(format!("Failed to bind to {}: {}", bind_addr, e)))?;
    info!("Router server listening on {}", bind_addr);

    server::serve(listener, state, async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    })
    .await
}
