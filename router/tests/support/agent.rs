//! ルーターが使うRemote APIのサブセットを話すテスト用ノードエージェント
//!
//! イベントストリーミングと、アップグレードによるexec/attachセッションを含む

use std::{
    collections::HashMap,
    convert::Infallible,
    sync::{Arc, Mutex},
    time::Duration,
};

use axum::{
    body::Body,
    extract::{Path, Query, Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use bytes::Bytes;
use hyper_util::rt::TokioIo;
use serde_json::{json, Value};
use tokio::sync::broadcast;

use super::http::{spawn_router, TestServer};

struct AgentState {
    id: String,
    name: String,
    containers: Vec<Value>,
    exec_ids: HashMap<String, Vec<String>>,
    created: usize,
}

#[derive(Clone)]
struct Shared {
    state: Arc<Mutex<AgentState>>,
    events: broadcast::Sender<Bytes>,
}

/// 起動中のフェイクエージェント
pub struct FakeAgent {
    server: TestServer,
    shared: Shared,
}

impl FakeAgent {
    /// エンジンID `id`、ホスト名 `name` を報告するエージェントを起動する
    pub async fn start(id: &str, name: &str) -> Self {
        let (events, _) = broadcast::channel(16);
        let shared = Shared {
            state: Arc::new(Mutex::new(AgentState {
                id: id.to_string(),
                name: name.to_string(),
                containers: Vec::new(),
                exec_ids: HashMap::new(),
                created: 0,
            })),
            events,
        };

        let router = Router::new()
            .nest("/v1.16", routes())
            .merge(routes())
            .with_state(shared.clone());

        Self {
            server: spawn_router(router).await,
            shared,
        }
    }

    /// ルーターに登録する `host:port`
    pub fn addr(&self) -> String {
        self.server.addr().to_string()
    }

    /// コンテナを追加する
    pub fn add_container(&self, id: &str, name: &str, status: &str, created: i64) {
        let mut state = self.shared.state.lock().unwrap();
        state.containers.push(container_json(id, name, "busybox", status, created));
    }

    /// 既存コンテナにexecインスタンスを追加する
    pub fn add_exec(&self, container_id: &str, exec_id: &str) {
        let mut state = self.shared.state.lock().unwrap();
        state
            .exec_ids
            .entry(container_id.to_string())
            .or_default()
            .push(exec_id.to_string());
    }

    /// 開いている全 `/events` ストリームにイベントを1件流す
    pub fn emit(&self, event: Value) {
        let _ = self.shared.events.send(Bytes::from(event.to_string()));
    }

    /// `/events` の購読者が `count` 件になるまで待つ
    pub async fn wait_for_subscribers(&self, count: usize) {
        for _ in 0..100 {
            if self.shared.events.receiver_count() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("{} never got {} event subscribers", self.addr(), count);
    }
}

fn routes() -> Router<Shared> {
    Router::new()
        .route("/info", get(info))
        .route("/images/json", get(images))
        .route("/containers/json", get(containers))
        .route("/containers/create", post(create))
        .route("/containers/:id/json", get(inspect))
        .route("/containers/:id", delete(remove))
        .route("/containers/:id/exec", post(exec_create))
        .route("/containers/:id/attach", post(echo_session))
        .route("/exec/:id/start", post(echo_session))
        .route("/events", get(events_stream))
}

fn container_json(id: &str, name: &str, image: &str, status: &str, created: i64) -> Value {
    json!({
        "Id": id,
        "Names": [format!("/{}", name)],
        "Image": image,
        "Command": "sh",
        "Created": created,
        "Status": status,
        "Ports": [{"IP": "0.0.0.0", "PrivatePort": 80, "PublicPort": 8080, "Type": "tcp"}]
    })
}

fn find<'a>(state: &'a AgentState, id: &str) -> Option<&'a Value> {
    state.containers.iter().find(|c| c["Id"] == id)
}

async fn info(State(shared): State<Shared>) -> Json<Value> {
    let state = shared.state.lock().unwrap();
    Json(json!({
        "ID": state.id,
        "Name": state.name,
        "NCPU": 4,
        "MemTotal": 8_589_934_592_i64,
        "Labels": ["zone=test"]
    }))
}

async fn images(State(shared): State<Shared>) -> Json<Value> {
    let state = shared.state.lock().unwrap();
    Json(json!([{
        "Id": format!("sha256:{}", state.id),
        "RepoTags": ["busybox:latest"],
        "Created": 1,
        "Size": 1024,
        "VirtualSize": 1024
    }]))
}

async fn containers(State(shared): State<Shared>) -> Json<Value> {
    Json(Value::Array(shared.state.lock().unwrap().containers.clone()))
}

async fn inspect(State(shared): State<Shared>, Path(id): Path<String>) -> Response {
    let state = shared.state.lock().unwrap();
    let Some(container) = find(&state, &id) else {
        return (StatusCode::NOT_FOUND, format!("No such container: {}\n", id)).into_response();
    };
    Json(json!({
        "Id": id,
        "Name": container["Names"][0],
        "Config": {"Image": container["Image"]},
        "NetworkSettings": {
            "Ports": {"80/tcp": [{"HostIp": "0.0.0.0", "HostPort": "8080"}]}
        },
        "ExecIDs": state.exec_ids.get(&id)
    }))
    .into_response()
}

async fn create(
    State(shared): State<Shared>,
    Query(query): Query<HashMap<String, String>>,
    Json(config): Json<Value>,
) -> Response {
    let mut state = shared.state.lock().unwrap();
    state.created += 1;
    let id = format!("{}{:04}", state.id.to_lowercase(), state.created);
    let name = query.get("name").cloned().unwrap_or_else(|| id.clone());
    let image = config["Image"].as_str().unwrap_or_default().to_string();
    state
        .containers
        .push(container_json(&id, &name, &image, "Created", 1_700_000_000));
    (StatusCode::CREATED, Json(json!({"Id": id, "Warnings": null}))).into_response()
}

async fn remove(State(shared): State<Shared>, Path(id): Path<String>) -> StatusCode {
    let mut state = shared.state.lock().unwrap();
    let before = state.containers.len();
    state.containers.retain(|c| c["Id"] != id.as_str());
    if state.containers.len() == before {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::NO_CONTENT
    }
}

async fn exec_create(State(shared): State<Shared>, Path(id): Path<String>) -> Response {
    let mut state = shared.state.lock().unwrap();
    if find(&state, &id).is_none() {
        return StatusCode::NOT_FOUND.into_response();
    }
    let exec_id = format!("exec-{}", id);
    state.exec_ids.entry(id).or_default().push(exec_id.clone());
    (StatusCode::CREATED, Json(json!({"Id": exec_id}))).into_response()
}

/// プロトコルを切り替え、受け取ったバイトをそのまま返す
async fn echo_session(mut request: Request) -> Response {
    let on_upgrade = hyper::upgrade::on(&mut request);
    tokio::spawn(async move {
        if let Ok(upgraded) = on_upgrade.await {
            let (mut reader, mut writer) = tokio::io::split(TokioIo::new(upgraded));
            let _ = tokio::io::copy(&mut reader, &mut writer).await;
        }
    });

    Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header(header::CONNECTION, "Upgrade")
        .header(header::UPGRADE, "tcp")
        .body(Body::empty())
        .unwrap()
}

async fn events_stream(State(shared): State<Shared>) -> Response {
    let receiver = shared.events.subscribe();
    let stream = futures::stream::unfold(receiver, |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(payload) => return Some((Ok::<_, Infallible>(payload), receiver)),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });
    Response::new(Body::from_stream(stream))
}
