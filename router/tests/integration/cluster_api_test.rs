//! 統合テスト: 2台のノードエージェント上のクラスタ全体エンドポイント

use crate::support::{agent::FakeAgent, fleet::spawn_fleet};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};

async fn two_agents() -> (FakeAgent, FakeAgent) {
    let alpha = FakeAgent::start("ALPHA", "node-a").await;
    alpha.add_container("a1a1a1a1", "web", "Up 2 hours", 100);
    let beta = FakeAgent::start("BETA", "node-b").await;
    beta.add_container("b2b2b2b2", "db", "Up 5 minutes", 200);
    beta.add_container("b3b3b3b3", "old", "Exited (0) 1 day ago", 50);
    (alpha, beta)
}

async fn get_json(url: String) -> Value {
    let response = Client::new().get(url).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    response.json().await.unwrap()
}

#[tokio::test]
async fn test_info_lists_every_node() {
    let (alpha, beta) = two_agents().await;
    let fleet = spawn_fleet(&[&alpha, &beta]).await;

    let info = get_json(fleet.server.url("/v1.16/info")).await;
    assert_eq!(info["DriverStatus"][0], json!(["\u{8}Nodes", "2"]));
    assert_eq!(info["DriverStatus"][1], json!(["node-a", alpha.addr()]));
    assert_eq!(info["DriverStatus"][2], json!(["node-b", beta.addr()]));
    assert_eq!(info["Containers"], 3);

    fleet.server.stop().await;
}

#[tokio::test]
async fn test_ping_and_version() {
    let (alpha, beta) = two_agents().await;
    let fleet = spawn_fleet(&[&alpha, &beta]).await;

    let response = Client::new()
        .get(fleet.server.url("/_ping"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.text().await.unwrap(), "OK");

    let version = get_json(fleet.server.url("/version")).await;
    assert_eq!(version["Version"], "fleet/test");
    assert_eq!(version["ApiVersion"], "1.16");
}

#[tokio::test]
async fn test_containers_are_merged_newest_first() {
    let (alpha, beta) = two_agents().await;
    let fleet = spawn_fleet(&[&alpha, &beta]).await;

    let running = get_json(fleet.server.url("/containers/json")).await;
    let names: Vec<&Value> = running
        .as_array()
        .unwrap()
        .iter()
        .map(|c| &c["Names"][0])
        .collect();
    assert_eq!(names, vec!["/node-b/db", "/node-a/web"]);
    assert_eq!(running[0]["Ports"][0]["IP"], "127.0.0.1");

    let all = get_json(fleet.server.url("/containers/json?all=1")).await;
    assert_eq!(all.as_array().unwrap().len(), 3);

    let filtered = get_json(fleet.server.url(
        "/containers/json?all=1&filters=%7B%22node%22%3A%5B%22node-a%22%5D%7D",
    ))
    .await;
    assert_eq!(filtered.as_array().unwrap().len(), 1);
    assert_eq!(filtered[0]["Id"], "a1a1a1a1");
}

#[tokio::test]
async fn test_images_are_concatenated() {
    let (alpha, beta) = two_agents().await;
    let fleet = spawn_fleet(&[&alpha, &beta]).await;

    let images = get_json(fleet.server.url("/images/json")).await;
    let ids: Vec<&Value> = images.as_array().unwrap().iter().map(|i| &i["Id"]).collect();
    assert_eq!(ids, vec!["sha256:ALPHA", "sha256:BETA"]);
}

#[tokio::test]
async fn test_inspect_reports_owning_node() {
    let (alpha, beta) = two_agents().await;
    let fleet = spawn_fleet(&[&alpha, &beta]).await;

    let inspect = get_json(fleet.server.url("/containers/node-b/db/json")).await;
    assert_eq!(inspect["Id"], "b2b2b2b2");
    assert_eq!(inspect["Node"]["Name"], "node-b");
    assert_eq!(inspect["Node"]["Addr"], beta.addr());
    assert_eq!(
        inspect["NetworkSettings"]["Ports"]["80/tcp"][0]["HostIp"],
        "127.0.0.1"
    );

    let missing = Client::new()
        .get(fleet.server.url("/containers/nothing/json"))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_create_conflict_and_remove() {
    let alpha = FakeAgent::start("ALPHA", "node-a").await;
    let fleet = spawn_fleet(&[&alpha]).await;
    let client = Client::new();

    let created = client
        .post(fleet.server.url("/containers/create?name=api"))
        .json(&json!({"Image": "nginx"}))
        .send()
        .await
        .unwrap();
    assert_eq!(created.status(), StatusCode::CREATED);
    let body: Value = created.json().await.unwrap();
    assert_eq!(body["Id"], "alpha0001");

    let all = get_json(fleet.server.url("/containers/json?all=1")).await;
    assert_eq!(all[0]["Names"][0], "/node-a/api");
    assert_eq!(all[0]["Image"], "nginx");

    let conflict = client
        .post(fleet.server.url("/containers/create?name=api"))
        .json(&json!({"Image": "nginx"}))
        .send()
        .await
        .unwrap();
    assert_eq!(conflict.status(), StatusCode::CONFLICT);

    let removed = client
        .delete(fleet.server.url("/containers/api?force=1"))
        .send()
        .await
        .unwrap();
    assert_eq!(removed.status(), StatusCode::NO_CONTENT);
    assert!(fleet.state.cluster.container("api").await.is_none());

    let gone = client
        .delete(fleet.server.url("/containers/api"))
        .send()
        .await
        .unwrap();
    assert_eq!(gone.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unsupported_endpoint() {
    let alpha = FakeAgent::start("ALPHA", "node-a").await;
    let fleet = spawn_fleet(&[&alpha]).await;

    let response = Client::new()
        .post(fleet.server.url("/v1.16/build"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
}
