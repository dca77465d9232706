//! 統合テスト: attachとexec startが生の双方向セッションになる

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use fleet_common::types::{ContainerSummary, NodeHealth};
use fleet_router::{
    agent::AgentClient,
    cluster::{Cluster, ContainerRecord},
    events::EventsHub,
};
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use serde_json::json;
use std::time::Duration;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time::timeout,
};

use crate::support::{
    agent::FakeAgent,
    fleet::{serve_cluster, spawn_fleet, TestFleet},
    raw_agent::{RawStreamAgent, SeenRequest},
};

/// ルーターへアップグレード要求を送り、生のセッションを返す
async fn open_session(
    router: std::net::SocketAddr,
    path: &str,
) -> TokioIo<hyper::upgrade::Upgraded> {
    let stream = TcpStream::connect(router).await.unwrap();
    let (mut sender, connection) = http1::handshake(TokioIo::new(stream)).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.with_upgrades().await;
    });

    let request = Request::builder()
        .method("POST")
        .uri(path)
        .header(header::HOST, router.to_string())
        .header(header::CONNECTION, "Upgrade")
        .header(header::UPGRADE, "tcp")
        .body(Body::empty())
        .unwrap();
    let response = sender.send_request(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::SWITCHING_PROTOCOLS);
    assert_eq!(response.headers()[header::UPGRADE], "tcp");

    TokioIo::new(hyper::upgrade::on(response).await.unwrap())
}

async fn assert_echo(session: &mut TokioIo<hyper::upgrade::Upgraded>, payload: &[u8]) {
    session.write_all(payload).await.unwrap();
    let mut received = vec![0u8; payload.len()];
    session.read_exact(&mut received).await.unwrap();
    assert_eq!(received, payload);
}

#[tokio::test]
async fn test_exec_start_relays_both_directions() {
    let alpha = FakeAgent::start("ALPHA", "node-a").await;
    alpha.add_container("a1a1a1a1", "web", "Up 1 minute", 100);
    alpha.add_exec("a1a1a1a1", "e1");
    let fleet = spawn_fleet(&[&alpha]).await;

    let mut session = open_session(fleet.server.addr(), "/v1.16/exec/e1/start").await;
    assert_echo(&mut session, b"ls -la\n").await;
    assert_echo(&mut session, b"exit\n").await;
}

#[tokio::test]
async fn test_attach_by_qualified_name() {
    let alpha = FakeAgent::start("ALPHA", "node-a").await;
    alpha.add_container("a1a1a1a1", "web", "Up 1 minute", 100);
    let beta = FakeAgent::start("BETA", "node-b").await;
    beta.add_container("b2b2b2b2", "web", "Up 1 minute", 100);
    let fleet = spawn_fleet(&[&alpha, &beta]).await;

    let mut session = open_session(
        fleet.server.addr(),
        "/containers/node-b/web/attach?stream=1&stdin=1",
    )
    .await;
    assert_echo(&mut session, b"hello").await;
}

#[tokio::test]
async fn test_exec_created_through_router_is_startable() {
    let alpha = FakeAgent::start("ALPHA", "node-a").await;
    alpha.add_container("a1a1a1a1", "web", "Up 1 minute", 100);
    let fleet = spawn_fleet(&[&alpha]).await;

    let created: serde_json::Value = reqwest::Client::new()
        .post(fleet.server.url("/containers/web/exec"))
        .json(&serde_json::json!({"Cmd": ["sh"], "AttachStdin": true}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(created["Id"], "exec-a1a1a1a1");
    for _ in 0..50 {
        if fleet
            .state
            .cluster
            .container_by_exec_id("exec-a1a1a1a1")
            .await
            .is_some()
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let mut session = open_session(fleet.server.addr(), "/exec/exec-a1a1a1a1/start").await;
    assert_echo(&mut session, b"pwd\n").await;
}

/// `agent` だけをノードに持つルーター（コンテナ `web` とexec `e1` を保持）
async fn fleet_over_raw_agent(agent: &RawStreamAgent) -> TestFleet {
    let cluster = Cluster::new(AgentClient::new(None).unwrap());
    let node = cluster.add_node(&agent.addr()).await;
    let summary: ContainerSummary = serde_json::from_value(json!({
        "Id": "c1c1c1c1",
        "Names": ["/web"],
        "Status": "Up 1 minute"
    }))
    .unwrap();
    let mut record = ContainerRecord::new(agent.addr(), summary);
    record.exec_ids.push("e1".to_string());
    node.replace_inventory(vec![record], Vec::new()).await;
    node.set_health(NodeHealth::Healthy).await;
    serve_cluster(cluster, EventsHub::new()).await
}

/// 生のリクエストを送り、ソケットとレスポンスヘッダーを返す
async fn raw_request(router: std::net::SocketAddr, request: &[u8]) -> (TcpStream, String) {
    let mut stream = TcpStream::connect(router).await.unwrap();
    stream.write_all(request).await.unwrap();

    let mut head = Vec::new();
    while !head.ends_with(b"\r\n\r\n") {
        let mut byte = [0u8; 1];
        let read = timeout(Duration::from_secs(5), stream.read(&mut byte))
            .await
            .expect("no response head from router")
            .unwrap();
        assert_eq!(read, 1, "router closed before the response head");
        head.push(byte[0]);
    }
    (stream, String::from_utf8(head).unwrap())
}

async fn assert_raw_echo(stream: &mut TcpStream, payload: &[u8]) {
    stream.write_all(payload).await.unwrap();
    let mut received = vec![0u8; payload.len()];
    timeout(Duration::from_secs(5), stream.read_exact(&mut received))
        .await
        .expect("stdin never came back from the agent")
        .unwrap();
    assert_eq!(received, payload);
}

#[tokio::test]
async fn test_exec_start_with_raw_stream_answer() {
    let agent = RawStreamAgent::start().await;
    let fleet = fleet_over_raw_agent(&agent).await;

    let (mut stream, head) = raw_request(
        fleet.server.addr(),
        b"POST /v1.16/exec/e1/start HTTP/1.1\r\nHost: fleet\r\nContent-Type: application/json\r\nContent-Length: 16\r\n\r\n{\"Detach\":false}",
    )
    .await;
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"), "{head}");
    assert!(head.contains("application/vnd.docker.raw-stream"), "{head}");
    assert!(!head.to_ascii_lowercase().contains("transfer-encoding"), "{head}");

    assert_raw_echo(&mut stream, b"hello").await;
    assert_raw_echo(&mut stream, b"exit\n").await;

    assert_eq!(
        agent.seen(),
        vec![SeenRequest {
            line: "POST /v1.16/exec/e1/start".to_string(),
            host: agent.addr(),
            body: r#"{"Detach":false}"#.to_string(),
        }]
    );
}

#[tokio::test]
async fn test_attach_with_raw_stream_answer_rewrites_name() {
    let agent = RawStreamAgent::start().await;
    let fleet = fleet_over_raw_agent(&agent).await;

    let (mut stream, head) = raw_request(
        fleet.server.addr(),
        b"POST /containers/web/attach?stream=1&stdin=1 HTTP/1.1\r\nHost: fleet\r\n\r\n",
    )
    .await;
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"), "{head}");
    assert_raw_echo(&mut stream, b"ls\n").await;

    assert_eq!(
        agent.seen()[0].line,
        "POST /containers/c1c1c1c1/attach?stream=1&stdin=1"
    );
}

#[tokio::test]
async fn test_raw_session_for_unknown_exec_is_not_found() {
    let agent = RawStreamAgent::start().await;
    let fleet = fleet_over_raw_agent(&agent).await;

    let (mut stream, head) = raw_request(
        fleet.server.addr(),
        b"POST /exec/ghost/start HTTP/1.1\r\nHost: fleet\r\nContent-Length: 0\r\n\r\n",
    )
    .await;
    assert!(head.starts_with("HTTP/1.1 404 Not Found\r\n"), "{head}");
    let mut body = String::new();
    stream.read_to_string(&mut body).await.unwrap();
    assert_eq!(body, "Exec ghost not found\n");
    assert!(agent.seen().is_empty());
}
